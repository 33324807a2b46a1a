//! Display presenters
//!
//! Exactly one presenter owns the rendering context of each local monitor.
//! The display loop polls the [`FrameStore`] at its own cadence and never
//! blocks the network task; decoding happens on the presenter side because
//! decode cost is variable and must not couple to ingest latency.
//!
//! Windowing-toolkit presenters are external implementations of
//! [`Presenter`]; the embedding binary must drive the loop from the thread
//! that owns the rendering contexts (on most toolkits, the main thread).

use super::store::FrameStore;
use crate::shutdown::Shutdown;
use crate::throttle::LogGate;
use crate::Result;
use image::codecs::jpeg::JpegDecoder;
use image::ImageDecoder;
use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Poll cadence of the display loop
pub const DISPLAY_POLL_INTERVAL: Duration = Duration::from_millis(16);

/// Rendering contract for one local monitor.
///
/// Implementations own their rendering context exclusively; no rendering
/// call may happen outside the presenter that owns it. Note for
/// GPU-surface implementations: decoded images are top-left origin while
/// most render targets are bottom-left, so the vertical texture coordinate
/// must be flipped during upload.
pub trait Presenter: Send {
    /// Local monitor id this presenter renders
    fn monitor_id(&self) -> u32;

    /// Decode and show one encoded frame
    fn present(&mut self, frame: &[u8]) -> Result<()>;

    /// Paint the neutral fallback color (no frame yet, or decode failed)
    fn clear(&mut self);

    /// Whether the presenter's surface is still open
    fn is_open(&self) -> bool {
        true
    }
}

/// Drive all presenters from the frame store until stop, or until every
/// presenter reports closed.
///
/// A decode failure clears that presenter to the fallback color and leaves
/// the store entry in place; a later valid frame simply overwrites it.
pub async fn run_display_loop(
    store: FrameStore,
    mut presenters: Vec<Box<dyn Presenter>>,
    shutdown: Shutdown,
) {
    if presenters.is_empty() {
        shutdown.stopped().await;
        return;
    }

    let mut present_gate = LogGate::new(Duration::from_secs(5));
    loop {
        if shutdown.is_stopped() {
            break;
        }
        if presenters.iter().all(|p| !p.is_open()) {
            info!("all presenters closed");
            break;
        }

        for presenter in presenters.iter_mut() {
            if !presenter.is_open() {
                continue;
            }
            match store.latest(presenter.monitor_id()) {
                Some(frame) if !frame.is_empty() => {
                    if let Err(e) = presenter.present(&frame) {
                        if present_gate.allow() {
                            warn!(
                                monitor = presenter.monitor_id(),
                                error = %e,
                                "present failed; clearing to fallback"
                            );
                        }
                        presenter.clear();
                    }
                }
                _ => presenter.clear(),
            }
        }

        tokio::select! {
            _ = shutdown.stopped() => break,
            _ = sleep(DISPLAY_POLL_INTERVAL) => {}
        }
    }
}

/// Presenter with no rendering surface.
///
/// Decodes every frame to validate it, tracks counters, and can dump every
/// Nth received JPEG into a diagnostics directory. Useful headless and as
/// the reference implementation of the contract.
pub struct HeadlessPresenter {
    monitor_id: u32,
    frames_presented: u64,
    last_dimensions: Option<(u32, u32)>,
    open: bool,
    dump: Option<FrameDump>,
    dump_gate: LogGate,
}

struct FrameDump {
    dir: PathBuf,
    every: u64,
}

impl HeadlessPresenter {
    pub fn new(monitor_id: u32) -> Self {
        Self {
            monitor_id,
            frames_presented: 0,
            last_dimensions: None,
            open: true,
            dump: None,
            dump_gate: LogGate::new(Duration::from_secs(30)),
        }
    }

    /// Dump every `every`-th frame as a .jpg under `dir`
    pub fn with_frame_dump(mut self, dir: PathBuf, every: u64) -> Self {
        self.dump = Some(FrameDump {
            dir,
            every: every.max(1),
        });
        self
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn last_dimensions(&self) -> Option<(u32, u32)> {
        self.last_dimensions
    }

    /// Mark the presenter closed, as a window close would
    pub fn close(&mut self) {
        self.open = false;
    }

    fn maybe_dump(&mut self, frame: &[u8]) {
        let Some(dump) = &self.dump else {
            return;
        };
        if self.frames_presented % dump.every != 0 {
            return;
        }

        let path = dump.dir.join(format!(
            "monitor_{}_{:06}.jpg",
            self.monitor_id, self.frames_presented
        ));
        let write = std::fs::create_dir_all(&dump.dir).and_then(|_| std::fs::write(&path, frame));
        match write {
            Ok(()) => debug!(path = %path.display(), "dumped frame"),
            Err(e) => {
                if self.dump_gate.allow() {
                    warn!(error = %e, "frame dump failed");
                }
            }
        }
    }
}

impl Presenter for HeadlessPresenter {
    fn monitor_id(&self) -> u32 {
        self.monitor_id
    }

    fn present(&mut self, frame: &[u8]) -> Result<()> {
        let decoder = JpegDecoder::new(Cursor::new(frame))?;
        let dimensions = decoder.dimensions();
        let mut pixels = vec![0u8; decoder.total_bytes() as usize];
        decoder.read_image(&mut pixels)?;

        self.last_dimensions = Some(dimensions);
        self.maybe_dump(frame);
        self.frames_presented += 1;
        Ok(())
    }

    fn clear(&mut self) {
        // Neutral fallback; nothing to paint without a surface.
        self.last_dimensions = None;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameEncoder, RawFrame};

    fn encoded_frame(width: u32, height: u32) -> Vec<u8> {
        let data = vec![128u8; (width * height * 4) as usize];
        let mut encoder = FrameEncoder::new();
        encoder
            .encode(&RawFrame::new(width, height, data), 80)
            .unwrap()
            .to_vec()
    }

    #[test]
    fn presents_valid_jpeg() {
        let mut presenter = HeadlessPresenter::new(1);
        presenter.present(&encoded_frame(48, 32)).unwrap();

        assert_eq!(presenter.frames_presented(), 1);
        assert_eq!(presenter.last_dimensions(), Some((48, 32)));
    }

    #[test]
    fn decode_error_is_reported_not_panicked() {
        let mut presenter = HeadlessPresenter::new(1);
        let err = presenter.present(&[0xFF, 0xD8, 0x00, 0x01]);
        assert!(err.is_err());
        assert_eq!(presenter.frames_presented(), 0);
    }

    #[tokio::test]
    async fn display_loop_exits_when_all_presenters_close() {
        let store = FrameStore::new();
        store.store(1, &encoded_frame(16, 16));

        let mut presenter = HeadlessPresenter::new(1);
        presenter.close();
        let shutdown = Shutdown::new();

        tokio::time::timeout(
            Duration::from_secs(1),
            run_display_loop(store, vec![Box::new(presenter)], shutdown),
        )
        .await
        .expect("loop must exit once presenters are closed");
    }

    #[tokio::test]
    async fn display_loop_exits_on_shutdown() {
        let store = FrameStore::new();
        let shutdown = Shutdown::new();
        shutdown.signal();

        tokio::time::timeout(
            Duration::from_secs(1),
            run_display_loop(store, vec![Box::new(HeadlessPresenter::new(1))], shutdown),
        )
        .await
        .expect("loop must exit on stop");
    }
}
