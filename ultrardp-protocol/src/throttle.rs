//! Pacing and log throttling utilities

use std::time::{Duration, Instant};

/// Frame-rate pacer for capture loops.
///
/// Sleeps for whatever remains of the frame interval after the work already
/// done this iteration, so capture+encode time is not added on top of the
/// target period.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    interval: Duration,
}

impl Pacer {
    pub fn from_fps(fps: u32) -> Self {
        let fps = fps.max(1);
        Self {
            interval: Duration::from_millis(1000 / fps as u64),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sleep out the rest of the interval measured from `iteration_start`
    pub async fn pace(&self, iteration_start: Instant) {
        let elapsed = iteration_start.elapsed();
        if elapsed < self.interval {
            tokio::time::sleep(self.interval - elapsed).await;
        }
    }
}

/// Rate limiter for repetitive log sites.
///
/// `allow` returns true at most once per configured interval; callers skip
/// the log line otherwise. Keeps per-frame anomalies from flooding output.
#[derive(Debug)]
pub struct LogGate {
    min_interval: Duration,
    last: Option<Instant>,
    suppressed: u64,
}

impl LogGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
            suppressed: 0,
        }
    }

    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.min_interval => {
                self.suppressed += 1;
                false
            }
            _ => {
                self.last = Some(now);
                self.suppressed = 0;
                true
            }
        }
    }

    /// Number of events swallowed since the last allowed one
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_allows_first_then_suppresses() {
        let mut gate = LogGate::new(Duration::from_secs(60));
        assert!(gate.allow());
        assert!(!gate.allow());
        assert!(!gate.allow());
        assert_eq!(gate.suppressed(), 2);
    }

    #[test]
    fn gate_reopens_after_interval() {
        let mut gate = LogGate::new(Duration::ZERO);
        assert!(gate.allow());
        assert!(gate.allow());
    }

    #[test]
    fn pacer_interval_from_fps() {
        assert_eq!(Pacer::from_fps(30).interval(), Duration::from_millis(33));
        assert_eq!(Pacer::from_fps(0).interval(), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn pace_skips_sleep_when_late() {
        let pacer = Pacer::from_fps(1000);
        let start = Instant::now() - Duration::from_secs(1);
        // Already over budget: must return without sleeping noticeably.
        let before = Instant::now();
        pacer.pace(start).await;
        assert!(before.elapsed() < Duration::from_millis(100));
    }
}
