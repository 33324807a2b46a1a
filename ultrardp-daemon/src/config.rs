//! Daemon configuration
//!
//! JSON configuration with per-field defaults, so a missing file or an
//! empty object both yield a runnable setup. The monitor layout stands in
//! for platform display detection, which is a capture back-end concern.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use ultrardp_protocol::monitor::{MonitorConfig, MonitorInfo};
use ultrardp_protocol::{DEFAULT_ADDRESS, DEFAULT_TARGET_FPS};

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on (server) or connect to (client)
    #[serde(default = "default_address")]
    pub address: String,

    /// Capture pipeline tuning
    #[serde(default)]
    pub stream: StreamConfig,

    /// Local display layout and diagnostics
    #[serde(default)]
    pub display: DisplayConfig,
}

/// Capture pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Target capture rate per monitor
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,

    /// JPEG quality when no client overrides it
    #[serde(default = "default_quality")]
    pub default_quality: u8,
}

/// Display configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Monitor layout reported during handshake (both modes)
    #[serde(default = "default_monitors")]
    pub monitors: Vec<MonitorLayout>,

    /// Directory for diagnostic frame dumps; dumping is off when unset
    #[serde(default)]
    pub frame_dump_dir: Option<PathBuf>,

    /// Dump every Nth presented frame
    #[serde(default = "default_frame_dump_every")]
    pub frame_dump_every: u64,
}

/// One monitor in the configured layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorLayout {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub pos_x: i32,
    #[serde(default)]
    pub pos_y: i32,
    #[serde(default)]
    pub primary: bool,
}

impl Config {
    /// Load from `path`, or fall back to defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("failed to parse config {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: default_address(),
            stream: StreamConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            default_quality: default_quality(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            monitors: default_monitors(),
            frame_dump_dir: None,
            frame_dump_every: default_frame_dump_every(),
        }
    }
}

impl DisplayConfig {
    /// Layout as a wire-level monitor configuration, ids assigned 1-based
    /// in declaration order
    pub fn to_monitor_config(&self) -> MonitorConfig {
        MonitorConfig::new(
            self.monitors
                .iter()
                .enumerate()
                .map(|(i, layout)| MonitorInfo {
                    id: (i + 1) as u32,
                    width: layout.width,
                    height: layout.height,
                    pos_x: layout.pos_x as u32,
                    pos_y: layout.pos_y as u32,
                    primary: layout.primary,
                })
                .collect(),
        )
    }
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

fn default_target_fps() -> u32 {
    DEFAULT_TARGET_FPS
}

fn default_quality() -> u8 {
    85
}

fn default_monitors() -> Vec<MonitorLayout> {
    vec![MonitorLayout {
        width: 1280,
        height: 720,
        pos_x: 0,
        pos_y: 0,
        primary: true,
    }]
}

fn default_frame_dump_every() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.address, DEFAULT_ADDRESS);
        assert_eq!(config.stream.target_fps, DEFAULT_TARGET_FPS);
        assert_eq!(config.display.monitors.len(), 1);
        assert!(config.display.frame_dump_dir.is_none());
    }

    #[test]
    fn layout_gets_one_based_ids() {
        let config: Config = serde_json::from_str(
            r#"{
                "display": {
                    "monitors": [
                        {"width": 1920, "height": 1080, "primary": true},
                        {"width": 1920, "height": 1080, "pos_x": -1920}
                    ]
                }
            }"#,
        )
        .unwrap();

        let monitors = config.display.to_monitor_config();
        assert_eq!(monitors.count(), 2);
        assert_eq!(monitors.monitors[0].id, 1);
        assert_eq!(monitors.monitors[1].id, 2);
        assert_eq!(monitors.monitors[1].position(), (-1920, 0));
    }

    #[test]
    fn partial_stream_section_keeps_other_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"stream": {"target_fps": 60}}"#).unwrap();
        assert_eq!(config.stream.target_fps, 60);
        assert_eq!(config.stream.default_quality, 85);
    }
}
