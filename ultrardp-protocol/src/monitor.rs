//! Monitor descriptors, configuration records and the monitor map
//!
//! A [`MonitorConfig`] is exchanged once per direction during the handshake
//! and may be re-sent by the server to signal a topology change. Its wire
//! form is a 4-byte count followed by one 24-byte record per monitor.

use crate::{ProtocolError, Result};
use std::collections::HashMap;
use tracing::debug;

/// Size of one encoded monitor record in bytes
pub const MONITOR_RECORD_LEN: usize = 24;

/// Safety envelope for logical monitor coordinates.
///
/// Positions outside ±10_000 (after widening the wire's u32 to i64) are
/// treated as bogus platform readings; capture for such monitors must go
/// through the index-addressed path instead of a rectangle.
pub const COORDINATE_ENVELOPE: i64 = 10_000;

/// A single monitor as seen by one peer
///
/// Positions are carried as unsigned 32-bit on the wire but are logically
/// signed: a monitor left of the primary encodes near `2^32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorInfo {
    /// 1-based id, unique within one configuration
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub pos_x: u32,
    pub pos_y: u32,
    pub primary: bool,
}

impl MonitorInfo {
    /// Logical signed position, reinterpreting the wire's u32 values
    pub fn position(&self) -> (i32, i32) {
        (self.pos_x as i32, self.pos_y as i32)
    }

    /// Whether both coordinates lie inside the safety envelope.
    ///
    /// The check widens to i64 without reinterpretation, so a wrap-around
    /// value such as `4294964736` fails it even though its signed reading
    /// (`-2560`) would look plausible.
    pub fn has_safe_coordinates(&self) -> bool {
        let x = self.pos_x as i64;
        let y = self.pos_y as i64;
        x.abs() <= COORDINATE_ENVELOPE && y.abs() <= COORDINATE_ENVELOPE
    }
}

/// Ordered set of monitors belonging to one peer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MonitorConfig {
    pub monitors: Vec<MonitorInfo>,
}

impl MonitorConfig {
    pub fn new(monitors: Vec<MonitorInfo>) -> Self {
        Self { monitors }
    }

    /// A single primary monitor at the origin, 1-based id 1
    pub fn single(width: u32, height: u32) -> Self {
        Self {
            monitors: vec![MonitorInfo {
                id: 1,
                width,
                height,
                pos_x: 0,
                pos_y: 0,
                primary: true,
            }],
        }
    }

    pub fn count(&self) -> u32 {
        self.monitors.len() as u32
    }

    pub fn primary(&self) -> Option<&MonitorInfo> {
        self.monitors
            .iter()
            .find(|m| m.primary)
            .or_else(|| self.monitors.first())
    }

    /// Encode to the wire form: count, then 24-byte records.
    ///
    /// The three bytes after the primary flag are reserved padding and are
    /// written as zero.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 4 + MONITOR_RECORD_LEN * self.monitors.len()];
        buf[0..4].copy_from_slice(&self.count().to_le_bytes());

        let mut offset = 4;
        for monitor in &self.monitors {
            buf[offset..offset + 4].copy_from_slice(&monitor.id.to_le_bytes());
            buf[offset + 4..offset + 8].copy_from_slice(&monitor.width.to_le_bytes());
            buf[offset + 8..offset + 12].copy_from_slice(&monitor.height.to_le_bytes());
            buf[offset + 12..offset + 16].copy_from_slice(&monitor.pos_x.to_le_bytes());
            buf[offset + 16..offset + 20].copy_from_slice(&monitor.pos_y.to_le_bytes());
            buf[offset + 20] = monitor.primary as u8;
            // bytes 21..24 remain zero
            offset += MONITOR_RECORD_LEN;
        }

        buf
    }

    /// Decode from the wire form, validating the id invariant.
    ///
    /// Ids must be non-zero and unique; padding bytes are ignored.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(ProtocolError::InvalidMonitorConfig(
                "missing monitor count".to_string(),
            ));
        }

        let mut count_bytes = [0u8; 4];
        count_bytes.copy_from_slice(&data[0..4]);
        let count = u32::from_le_bytes(count_bytes) as usize;

        let expected = 4 + MONITOR_RECORD_LEN * count;
        if data.len() < expected {
            return Err(ProtocolError::InvalidMonitorConfig(format!(
                "truncated config: {} bytes, expected {}",
                data.len(),
                expected
            )));
        }

        let mut monitors = Vec::with_capacity(count);
        let mut offset = 4;
        for _ in 0..count {
            let field = |at: usize| {
                let mut b = [0u8; 4];
                b.copy_from_slice(&data[offset + at..offset + at + 4]);
                u32::from_le_bytes(b)
            };

            let monitor = MonitorInfo {
                id: field(0),
                width: field(4),
                height: field(8),
                pos_x: field(12),
                pos_y: field(16),
                primary: data[offset + 20] == 1,
            };

            if monitor.id == 0 {
                return Err(ProtocolError::InvalidMonitorConfig(
                    "monitor ids are 1-based; got 0".to_string(),
                ));
            }
            if monitors.iter().any(|m: &MonitorInfo| m.id == monitor.id) {
                return Err(ProtocolError::InvalidMonitorConfig(format!(
                    "duplicate monitor id {}",
                    monitor.id
                )));
            }

            monitors.push(monitor);
            offset += MONITOR_RECORD_LEN;
        }

        Ok(Self { monitors })
    }
}

/// Server monitor id → client monitor id
///
/// Partial injection: every server id maps to at most one client id and no
/// client id is the target of two server ids.
pub type MonitorMap = HashMap<u32, u32>;

/// Pair server and client monitors positionally up to the shorter list.
///
/// Deliberately simple and stable; a resolution- or position-aware mapping
/// would be a behavior change on top of the same wire contract.
pub fn build_monitor_map(server: &MonitorConfig, client: &MonitorConfig) -> MonitorMap {
    let mut map = MonitorMap::new();
    for (server_monitor, client_monitor) in server.monitors.iter().zip(client.monitors.iter()) {
        debug!(
            server_id = server_monitor.id,
            client_id = client_monitor.id,
            "mapped monitor"
        );
        map.insert(server_monitor.id, client_monitor.id);
    }
    map
}
