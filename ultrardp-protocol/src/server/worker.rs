//! Per-monitor capture worker
//!
//! One worker task owns each server monitor for the full server lifetime
//! and runs its capture → encode → dispatch loop. Workers never share
//! encode buffers, and a failed write to one session never stalls the
//! others: eligible sessions are snapshotted under the registry lock but
//! written to outside it, through each session's own writer mutex.

use super::session::ClientSession;
use super::SessionRegistry;
use crate::capture::{CaptureRegion, FrameEncoder, FrameSource, RawFrame};
use crate::monitor::MonitorInfo;
use crate::packet::{Packet, PacketType};
use crate::shutdown::Shutdown;
use crate::throttle::{LogGate, Pacer};
use crate::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Sleep between checks while no client is connected
const IDLE_WAIT: Duration = Duration::from_millis(500);

/// Back-off after the capture back-end failed on both paths
const CAPTURE_BACKOFF: Duration = Duration::from_secs(1);

const LOG_INTERVAL: Duration = Duration::from_secs(10);

pub(crate) struct CaptureWorker {
    monitor: MonitorInfo,
    /// Zero-based display index for the alternate capture path
    display_index: usize,
    source: Box<dyn FrameSource>,
    encoder: FrameEncoder,
    sessions: SessionRegistry,
    shutdown: Shutdown,
    pacer: Pacer,
    default_quality: u8,
    frames: u64,
    idle_gate: LogGate,
    anomaly_gate: LogGate,
}

impl CaptureWorker {
    pub(crate) fn new(
        monitor: MonitorInfo,
        display_index: usize,
        source: Box<dyn FrameSource>,
        sessions: SessionRegistry,
        shutdown: Shutdown,
        target_fps: u32,
        default_quality: u8,
    ) -> Self {
        Self {
            monitor,
            display_index,
            source,
            encoder: FrameEncoder::new(),
            sessions,
            shutdown,
            pacer: Pacer::from_fps(target_fps),
            default_quality,
            frames: 0,
            idle_gate: LogGate::new(LOG_INTERVAL),
            anomaly_gate: LogGate::new(LOG_INTERVAL),
        }
    }

    pub(crate) async fn run(mut self) {
        let coord_safe = self.monitor.has_safe_coordinates();
        info!(
            monitor = self.monitor.id,
            width = self.monitor.width,
            height = self.monitor.height,
            "capture worker started"
        );
        if !coord_safe {
            warn!(
                monitor = self.monitor.id,
                pos_x = self.monitor.pos_x,
                pos_y = self.monitor.pos_y,
                "coordinates outside safety envelope; using index-addressed capture"
            );
        }

        loop {
            if self.shutdown.is_stopped() {
                break;
            }
            let iteration = Instant::now();

            let (targets, active_count) = self.eligible_sessions().await;
            if active_count == 0 {
                if self.idle_gate.allow() {
                    debug!(monitor = self.monitor.id, "no active clients; capture idle");
                }
                tokio::select! {
                    _ = self.shutdown.stopped() => break,
                    _ = sleep(IDLE_WAIT) => {}
                }
                continue;
            }

            let frame = match self.acquire(coord_safe) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(monitor = self.monitor.id, error = %e, "capture failed; backing off");
                    tokio::select! {
                        _ = self.shutdown.stopped() => break,
                        _ = sleep(CAPTURE_BACKOFF) => {}
                    }
                    continue;
                }
            };

            let quality = targets
                .iter()
                .map(|s| s.quality())
                .max()
                .unwrap_or(self.default_quality);

            let payload = match self.build_frame_payload(&frame, quality) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(monitor = self.monitor.id, error = %e, "encode failed; skipping frame");
                    self.pacer.pace(iteration).await;
                    continue;
                }
            };

            let packet = Packet::new(PacketType::VideoFrame, payload);
            let bytes = packet.to_bytes();
            for session in &targets {
                if !session.is_active() {
                    continue;
                }
                if let Err(e) = session.send_bytes(&bytes).await {
                    warn!(
                        monitor = self.monitor.id,
                        client = session.id(),
                        error = %e,
                        "frame write failed; marking session inactive"
                    );
                    session.deactivate();
                }
            }

            self.sweep_inactive().await;
            self.frames += 1;
            self.pacer.pace(iteration).await;
        }

        info!(
            monitor = self.monitor.id,
            frames = self.frames,
            "capture worker stopped"
        );
    }

    /// Acquire one frame, preferring the rectangular path when coordinates
    /// are safe and falling back to the index path on error. A suspect
    /// all-black frame is retried once on the alternate path, then emitted
    /// regardless.
    fn acquire(&mut self, coord_safe: bool) -> Result<RawFrame> {
        let frame = if coord_safe {
            let (x, y) = self.monitor.position();
            let region = CaptureRegion {
                x,
                y,
                width: self.monitor.width,
                height: self.monitor.height,
            };
            match self.source.capture_region(region) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(
                        monitor = self.monitor.id,
                        error = %e,
                        "rect capture failed; trying index path"
                    );
                    self.source.capture_display(self.display_index)?
                }
            }
        } else {
            self.source.capture_display(self.display_index)?
        };

        if !frame.looks_black() {
            return Ok(frame);
        }

        let retried = self.source.capture_display(self.display_index)?;
        if retried.looks_black() && self.anomaly_gate.allow() {
            warn!(
                monitor = self.monitor.id,
                "frame still black after retry; emitting anyway"
            );
        }
        Ok(retried)
    }

    /// 4-byte LE server monitor id, then the encoded image
    fn build_frame_payload(&mut self, frame: &RawFrame, quality: u8) -> Result<Vec<u8>> {
        let jpeg = self.encoder.encode(frame, quality)?;
        let mut payload = Vec::with_capacity(4 + jpeg.len());
        payload.extend_from_slice(&self.monitor.id.to_le_bytes());
        payload.extend_from_slice(jpeg);
        Ok(payload)
    }

    /// Snapshot sessions mapped to this monitor plus the overall active
    /// count used for idle gating
    async fn eligible_sessions(&self) -> (Vec<Arc<ClientSession>>, usize) {
        let registry = self.sessions.lock().await;
        let active_count = registry.values().filter(|s| s.is_active()).count();
        let targets = registry
            .values()
            .filter(|s| s.is_active() && s.maps_monitor(self.monitor.id))
            .cloned()
            .collect();
        (targets, active_count)
    }

    async fn sweep_inactive(&self) {
        let mut registry = self.sessions.lock().await;
        registry.retain(|id, session| {
            if session.is_active() {
                true
            } else {
                info!(client = %id, "removing inactive session");
                false
            }
        });
    }
}
