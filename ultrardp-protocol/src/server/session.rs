//! Server-side client sessions
//!
//! A [`ClientSession`] is created after a successful handshake and lives in
//! the server's registry until disconnect or a failed write. All outbound
//! traffic for one connection (frames from capture workers, pong replies
//! from the read loop) funnels through the session's writer mutex so header
//! and payload bytes from different producers never interleave.

use crate::monitor::{MonitorConfig, MonitorMap};
use crate::packet::{Packet, PacketType};
use crate::shutdown::Shutdown;
use crate::{ProtocolError, Result, HANDSHAKE_TIMEOUT};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, trace, warn};

/// Quality level assigned to a session before any QualityControl override
pub const SESSION_DEFAULT_QUALITY: u8 = 80;

pub(crate) type PacketSink = Box<dyn AsyncWrite + Send + Unpin>;

/// One connected client as the server sees it
pub struct ClientSession {
    id: String,
    writer: Mutex<PacketSink>,
    client_monitors: MonitorConfig,
    monitor_map: MonitorMap,
    quality: AtomicU8,
    active: AtomicBool,
}

impl ClientSession {
    pub(crate) fn new(
        id: String,
        writer: PacketSink,
        client_monitors: MonitorConfig,
        monitor_map: MonitorMap,
    ) -> Self {
        Self {
            id,
            writer: Mutex::new(writer),
            client_monitors,
            monitor_map,
            quality: AtomicU8::new(SESSION_DEFAULT_QUALITY),
            active: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client_monitors(&self) -> &MonitorConfig {
        &self.client_monitors
    }

    pub fn monitor_map(&self) -> &MonitorMap {
        &self.monitor_map
    }

    /// Whether frames for this server monitor should reach this client
    pub fn maps_monitor(&self, server_id: u32) -> bool {
        self.monitor_map.contains_key(&server_id)
    }

    pub fn quality(&self) -> u8 {
        self.quality.load(Ordering::Relaxed)
    }

    /// Store a quality level, clamped to 0-100
    pub fn set_quality(&self, level: u8) {
        self.quality.store(level.min(100), Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Mark the session for removal; it stops receiving frames immediately
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    /// Write one packet under the connection's writer lock
    pub async fn send(&self, packet: &Packet) -> Result<()> {
        let mut writer = self.writer.lock().await;
        packet.write_to(&mut *writer).await
    }

    /// Write pre-encoded wire bytes under the writer lock.
    ///
    /// Lets the dispatcher serialize a frame packet once and reuse the
    /// buffer for every eligible session.
    pub async fn send_bytes(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Run the server side of the handshake on a fresh connection.
///
/// Sends the server's monitor configuration and expects exactly one
/// MonitorConfig packet back. Anything else is fatal for this connection.
pub(crate) async fn perform_handshake<S>(
    stream: &mut S,
    server_monitors: &MonitorConfig,
) -> Result<MonitorConfig>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello = Packet::new(PacketType::Handshake, server_monitors.encode());
    hello.write_to(stream).await?;

    let reply = timeout(HANDSHAKE_TIMEOUT, Packet::read_from(stream))
        .await
        .map_err(|_| ProtocolError::Timeout("handshake reply".to_string()))??;

    if reply.packet_type != PacketType::MonitorConfig {
        return Err(ProtocolError::HandshakeFailed(format!(
            "expected MonitorConfig, got {:?}",
            reply.packet_type
        )));
    }

    MonitorConfig::decode(&reply.payload)
}

/// Per-session read loop.
///
/// Input packets are accepted and ignored until an input back-end exists;
/// quality and ping are handled inline. Any decode or I/O failure
/// deactivates the session and ends the loop.
pub(crate) async fn session_read_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    session: std::sync::Arc<ClientSession>,
    shutdown: Shutdown,
) {
    loop {
        if shutdown.is_stopped() || !session.is_active() {
            break;
        }

        let packet = tokio::select! {
            _ = shutdown.stopped() => break,
            result = Packet::read_from(&mut reader) => match result {
                Ok(packet) => packet,
                Err(e) => {
                    if !shutdown.is_stopped() {
                        warn!(client = session.id(), error = %e, "session read failed");
                    }
                    break;
                }
            },
        };

        handle_session_packet(&session, packet).await;
    }

    session.deactivate();
}

/// Dispatch one inbound packet for a session
pub(crate) async fn handle_session_packet(session: &ClientSession, packet: Packet) {
    match packet.packet_type {
        PacketType::MouseMove | PacketType::MouseButton | PacketType::Keyboard => {
            // No input back-end; payload layout is unspecified anyway.
            trace!(client = session.id(), kind = ?packet.packet_type, "input packet ignored");
        }
        PacketType::QualityControl => match packet.payload.first() {
            Some(&level) => {
                session.set_quality(level);
                info!(
                    client = session.id(),
                    quality = session.quality(),
                    "quality level updated"
                );
            }
            None => warn!(client = session.id(), "empty QualityControl payload"),
        },
        PacketType::Ping => {
            let pong = Packet::new(PacketType::Pong, packet.payload);
            if let Err(e) = session.send(&pong).await {
                warn!(client = session.id(), error = %e, "pong write failed");
                session.deactivate();
            }
        }
        other => {
            trace!(client = session.id(), kind = ?other, "ignoring packet");
        }
    }
}
