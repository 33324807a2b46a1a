//! Synthetic capture back-end
//!
//! Renders a moving gradient per monitor. Keeps the full
//! capture → encode → dispatch pipeline runnable and testable on machines
//! with no capturable display; platform back-ends replace it by
//! implementing [`FrameSource`].

use super::{CaptureRegion, FrameSource, RawFrame};
use crate::monitor::{MonitorConfig, MonitorInfo};
use crate::{ProtocolError, Result};

/// Gradient generator implementing [`FrameSource`]
#[derive(Debug, Clone)]
pub struct PatternSource {
    monitors: MonitorConfig,
    tick: u64,
}

impl PatternSource {
    pub fn new(monitors: MonitorConfig) -> Self {
        Self { monitors, tick: 0 }
    }

    /// A single 1280x720 primary display
    pub fn with_default_layout() -> Self {
        Self::new(MonitorConfig::single(1280, 720))
    }

    fn render(&mut self, width: u32, height: u32) -> RawFrame {
        self.tick = self.tick.wrapping_add(1);
        let phase = (self.tick % 256) as u32;

        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                let r = ((x * 255) / width.max(1) + phase) % 256;
                let g = ((y * 255) / height.max(1)) % 256;
                let b = (r + g) % 256;
                data.extend_from_slice(&[r as u8, g as u8, b as u8, 255]);
            }
        }

        RawFrame::new(width, height, data)
    }
}

impl FrameSource for PatternSource {
    fn monitors(&self) -> Result<MonitorConfig> {
        Ok(self.monitors.clone())
    }

    fn capture_region(&mut self, region: CaptureRegion) -> Result<RawFrame> {
        if region.width == 0 || region.height == 0 {
            return Err(ProtocolError::Capture(format!(
                "empty capture region {}x{}",
                region.width, region.height
            )));
        }
        Ok(self.render(region.width, region.height))
    }

    fn capture_display(&mut self, index: usize) -> Result<RawFrame> {
        let monitor: &MonitorInfo = self
            .monitors
            .monitors
            .get(index)
            .ok_or_else(|| ProtocolError::Capture(format!("no display at index {}", index)))?;
        let (width, height) = (monitor.width, monitor.height);
        Ok(self.render(width, height))
    }
}
