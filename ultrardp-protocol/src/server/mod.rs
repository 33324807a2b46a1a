//! UltraRDP server
//!
//! Owns the TCP listener, the session registry and one capture worker per
//! server monitor. Sessions are registered only after a completed
//! handshake; a failing client is marked inactive and swept without
//! affecting other sessions or the capture workers.

mod session;
mod worker;

pub use session::{ClientSession, SESSION_DEFAULT_QUALITY};

use crate::capture::{FrameSource, DEFAULT_ENCODE_QUALITY};
use crate::monitor::{build_monitor_map, MonitorConfig};
use crate::shutdown::Shutdown;
use crate::{ProtocolError, Result, DEFAULT_TARGET_FPS};
use session::{perform_handshake, session_read_loop};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{info, warn};
use worker::CaptureWorker;

pub(crate) type SessionRegistry = Arc<Mutex<HashMap<String, Arc<ClientSession>>>>;

/// Tunables for the capture pipeline
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    /// Target capture rate per monitor
    pub target_fps: u32,
    /// Encode quality applied when no session overrides it
    pub default_quality: u8,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            target_fps: DEFAULT_TARGET_FPS,
            default_quality: DEFAULT_ENCODE_QUALITY,
        }
    }
}

/// Listening UltraRDP server
pub struct Server {
    listener: TcpListener,
    monitors: MonitorConfig,
    settings: StreamSettings,
    sessions: SessionRegistry,
    shutdown: Shutdown,
}

impl Server {
    /// Bind the listener. `monitors` is the server's own monitor layout as
    /// reported by the capture back-end.
    pub async fn bind(
        address: &str,
        monitors: MonitorConfig,
        settings: StreamSettings,
    ) -> Result<Self> {
        if monitors.monitors.is_empty() {
            return Err(ProtocolError::InvalidState(
                "server needs at least one monitor".to_string(),
            ));
        }

        let listener = TcpListener::bind(address).await?;
        info!(
            address,
            monitors = monitors.count(),
            "server listening"
        );

        Ok(Self {
            listener,
            monitors,
            settings,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            shutdown: Shutdown::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle used to stop the server from another task or a signal handler
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Run the accept loop and all capture workers until stop is signalled.
    ///
    /// `make_source` builds one capture back-end per worker so no platform
    /// handle is ever shared across monitors.
    pub async fn run<F>(self, make_source: F) -> Result<()>
    where
        F: Fn() -> Box<dyn FrameSource>,
    {
        let Server {
            listener,
            monitors,
            settings,
            sessions,
            shutdown,
        } = self;

        let mut workers = Vec::with_capacity(monitors.monitors.len());
        for (index, monitor) in monitors.monitors.iter().enumerate() {
            let worker = CaptureWorker::new(
                *monitor,
                index,
                make_source(),
                sessions.clone(),
                shutdown.clone(),
                settings.target_fps,
                settings.default_quality,
            );
            workers.push(tokio::spawn(worker.run()));
        }

        loop {
            let accepted = tokio::select! {
                _ = shutdown.stopped() => break,
                result = listener.accept() => result,
            };

            match accepted {
                Ok((stream, peer)) => {
                    info!(%peer, "client connected");
                    let monitors = monitors.clone();
                    let sessions = sessions.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, peer, monitors, sessions, shutdown).await
                        {
                            warn!(%peer, error = %e, "session ended with error");
                        }
                    });
                }
                Err(e) => {
                    if shutdown.is_stopped() {
                        break;
                    }
                    warn!(error = %e, "accept failed");
                }
            }
        }

        // Close the listener first, then deactivate every session so
        // workers and read loops finish their current iteration.
        drop(listener);
        {
            let registry = sessions.lock().await;
            for session in registry.values() {
                session.deactivate();
            }
        }
        for handle in workers {
            let _ = handle.await;
        }

        info!("server stopped");
        Ok(())
    }
}

/// Handshake, registration and read loop for one accepted connection
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    server_monitors: MonitorConfig,
    sessions: SessionRegistry,
    shutdown: Shutdown,
) -> Result<()> {
    let client_monitors = perform_handshake(&mut stream, &server_monitors).await?;
    info!(
        %peer,
        client_monitors = client_monitors.count(),
        "handshake complete"
    );

    let monitor_map = build_monitor_map(&server_monitors, &client_monitors);
    let (reader, writer) = stream.into_split();
    let session = Arc::new(ClientSession::new(
        peer.to_string(),
        Box::new(writer),
        client_monitors,
        monitor_map,
    ));

    sessions
        .lock()
        .await
        .insert(session.id().to_string(), session.clone());

    session_read_loop(reader, session.clone(), shutdown).await;

    sessions.lock().await.remove(session.id());
    info!(%peer, "client disconnected");
    Ok(())
}
