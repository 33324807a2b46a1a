//! UltraRDP protocol and streaming cores
//!
//! A custom remote desktop system: the server captures, encodes and
//! dispatches per-monitor frames over one TCP connection per client; the
//! client buffers the latest frame per monitor and presents it. This crate
//! carries the wire protocol, the session handshake with monitor-mapping
//! negotiation, the server's capture → encode → dispatch pipeline and the
//! client's receive → store → present pipeline.
//!
//! Platform capture back-ends implement [`capture::FrameSource`];
//! windowing presenters implement [`client::Presenter`]. Both are seams —
//! the crate ships a synthetic capture source and a headless presenter so
//! the full pipeline runs anywhere.

pub mod capture;
pub mod client;
pub mod error;
pub mod monitor;
pub mod packet;
pub mod server;
pub mod shutdown;
pub mod throttle;

pub use error::{ProtocolError, Result};
pub use monitor::{build_monitor_map, MonitorConfig, MonitorInfo, MonitorMap};
pub use packet::{Packet, PacketType};
pub use shutdown::Shutdown;

use std::time::Duration;

/// Wire protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Default listen/connect address
pub const DEFAULT_ADDRESS: &str = "localhost:8000";

/// Baseline capture rate; pacing policy, not a protocol constraint
pub const DEFAULT_TARGET_FPS: u32 = 30;

/// Applied to the handshake exchange only; steady-state reads rely on the
/// stop signal instead of deadlines.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
