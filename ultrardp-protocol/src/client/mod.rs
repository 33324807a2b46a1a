//! UltraRDP client
//!
//! Connects to a server, completes the handshake, then runs two tasks: a
//! network task feeding the [`FrameStore`] and a display loop driving one
//! presenter per local monitor. The two only meet at the store and the
//! stop signal.

mod presenter;
mod receive;
mod store;

pub use presenter::{run_display_loop, HeadlessPresenter, Presenter, DISPLAY_POLL_INTERVAL};
pub use receive::{FrameReceiver, SOI_MARKER};
pub use store::FrameStore;

use crate::monitor::{build_monitor_map, MonitorConfig, MonitorMap};
use crate::packet::{Packet, PacketType};
use crate::shutdown::Shutdown;
use crate::{ProtocolError, Result, HANDSHAKE_TIMEOUT};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use std::sync::Arc;
use tracing::{debug, info, warn};

type PacketSink = Box<dyn AsyncWrite + Send + Unpin>;
type PacketTap = Box<dyn AsyncRead + Send + Unpin>;

/// Connected UltraRDP client
pub struct Client {
    writer: Arc<Mutex<PacketSink>>,
    store: FrameStore,
    server_monitors: MonitorConfig,
    local_monitors: MonitorConfig,
    monitor_map: MonitorMap,
    shutdown: Shutdown,
    network: Option<(FrameReceiver, PacketTap)>,
}

impl Client {
    /// Connect and complete the handshake.
    ///
    /// The first packet from the server must be a Handshake carrying its
    /// monitor configuration; the client answers with its own. Any other
    /// first packet is a fatal protocol error.
    pub async fn connect(address: &str, local_monitors: MonitorConfig) -> Result<Self> {
        let stream = TcpStream::connect(address).await?;
        info!(address, "connected to server");
        Self::from_stream(stream, local_monitors).await
    }

    async fn from_stream(mut stream: TcpStream, local_monitors: MonitorConfig) -> Result<Self> {
        let first = timeout(HANDSHAKE_TIMEOUT, Packet::read_from(&mut stream))
            .await
            .map_err(|_| ProtocolError::Timeout("server handshake".to_string()))??;

        if first.packet_type != PacketType::Handshake {
            return Err(ProtocolError::HandshakeFailed(format!(
                "expected Handshake, got {:?}",
                first.packet_type
            )));
        }
        let server_monitors = MonitorConfig::decode(&first.payload)?;
        info!(
            server_monitors = server_monitors.count(),
            local_monitors = local_monitors.count(),
            "handshake received"
        );

        let reply = Packet::new(PacketType::MonitorConfig, local_monitors.encode());
        reply.write_to(&mut stream).await?;

        let monitor_map = build_monitor_map(&server_monitors, &local_monitors);
        let (reader, writer) = stream.into_split();

        let store = FrameStore::new();
        let receiver = FrameReceiver::new(
            local_monitors.clone(),
            server_monitors.clone(),
            store.clone(),
        );

        Ok(Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            store,
            server_monitors,
            local_monitors,
            monitor_map,
            shutdown: Shutdown::new(),
            network: Some((receiver, Box::new(reader))),
        })
    }

    pub fn store(&self) -> FrameStore {
        self.store.clone()
    }

    pub fn server_monitors(&self) -> &MonitorConfig {
        &self.server_monitors
    }

    pub fn local_monitors(&self) -> &MonitorConfig {
        &self.local_monitors
    }

    /// Monitor map as negotiated at handshake time
    pub fn monitor_map(&self) -> &MonitorMap {
        &self.monitor_map
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn stop(&self) {
        self.shutdown.signal();
    }

    /// Send a latency probe; the server echoes the payload in a Pong
    pub async fn send_ping(&self) -> Result<()> {
        self.send(Packet::new(PacketType::Ping, Vec::new())).await
    }

    /// Request an encode quality level (clamped 0-100 by the server)
    pub async fn send_quality(&self, level: u8) -> Result<()> {
        self.send(Packet::new(PacketType::QualityControl, vec![level.min(100)]))
            .await
    }

    async fn send(&self, packet: Packet) -> Result<()> {
        let mut writer = self.writer.lock().await;
        packet.write_to(&mut *writer).await
    }

    /// Run the network task and the display loop until stop, connection
    /// loss, or every presenter closing.
    ///
    /// Must be driven from the task/thread that owns the presenters'
    /// rendering contexts.
    pub async fn run(mut self, presenters: Vec<Box<dyn Presenter>>) -> Result<()> {
        let (receiver, reader) = self.network.take().ok_or_else(|| {
            ProtocolError::InvalidState("client is already running".to_string())
        })?;

        let shutdown = self.shutdown.clone();
        let network = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                let result = receiver.run(reader, shutdown.clone()).await;
                if let Err(ref e) = result {
                    if !shutdown.is_stopped() {
                        warn!(error = %e, "connection to server lost");
                    }
                }
                // Connection loss also ends the display loop.
                shutdown.signal();
                result
            }
        });

        run_display_loop(self.store.clone(), presenters, shutdown.clone()).await;

        shutdown.signal();
        match network.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "network task ended with error"),
            Err(e) => warn!(error = %e, "network task panicked"),
        }

        info!("client stopped");
        Ok(())
    }
}
