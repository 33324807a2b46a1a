//! Client receive loop
//!
//! Decodes packets from the server connection and routes them: frames into
//! the [`FrameStore`], topology updates into a rebuilt monitor map,
//! reserved types into the void. Only decode and I/O failures are fatal;
//! every per-frame problem is handled locally with a rate-limited log.

use super::store::FrameStore;
use crate::monitor::{build_monitor_map, MonitorConfig, MonitorMap};
use crate::packet::{current_timestamp_nanos, Packet, PacketType};
use crate::shutdown::Shutdown;
use crate::throttle::LogGate;
use crate::Result;
use std::time::Duration;
use tokio::io::AsyncRead;
use tracing::{debug, info, trace, warn};

/// JPEG start-of-image marker expected at the head of every frame payload
pub const SOI_MARKER: [u8; 2] = [0xFF, 0xD8];

const LOG_INTERVAL: Duration = Duration::from_secs(5);

/// State of the client's network task
pub struct FrameReceiver {
    store: FrameStore,
    local_monitors: MonitorConfig,
    server_monitors: MonitorConfig,
    monitor_map: MonitorMap,
    short_gate: LogGate,
    soi_gate: LogGate,
    unmapped_gate: LogGate,
}

impl FrameReceiver {
    pub fn new(
        local_monitors: MonitorConfig,
        server_monitors: MonitorConfig,
        store: FrameStore,
    ) -> Self {
        let monitor_map = build_monitor_map(&server_monitors, &local_monitors);
        Self {
            store,
            local_monitors,
            server_monitors,
            monitor_map,
            short_gate: LogGate::new(LOG_INTERVAL),
            soi_gate: LogGate::new(LOG_INTERVAL),
            unmapped_gate: LogGate::new(LOG_INTERVAL),
        }
    }

    pub fn monitor_map(&self) -> &MonitorMap {
        &self.monitor_map
    }

    pub fn server_monitors(&self) -> &MonitorConfig {
        &self.server_monitors
    }

    /// Decode-and-dispatch until stop or a fatal connection error
    pub async fn run<R: AsyncRead + Unpin>(
        mut self,
        mut reader: R,
        shutdown: Shutdown,
    ) -> Result<()> {
        loop {
            if shutdown.is_stopped() {
                return Ok(());
            }

            let packet = tokio::select! {
                _ = shutdown.stopped() => return Ok(()),
                result = Packet::read_from(&mut reader) => result?,
            };

            self.handle(&packet);
        }
    }

    /// Route one packet. Never fails: malformed frames are dropped with a
    /// rate-limited log so the network loop keeps running.
    pub fn handle(&mut self, packet: &Packet) {
        match packet.packet_type {
            PacketType::VideoFrame => self.handle_video_frame(&packet.payload),
            PacketType::MonitorConfig => self.handle_monitor_config(&packet.payload),
            PacketType::Pong => {
                let rtt_ns = current_timestamp_nanos() - packet.timestamp;
                debug!(rtt_ns, "pong received");
            }
            PacketType::Handshake | PacketType::AudioFrame => {
                // Handshake is consumed during connect; a repeat, like the
                // reserved audio channel, is received without action.
                trace!(kind = ?packet.packet_type, "no-op packet");
            }
            other => trace!(kind = ?other, "ignoring packet"),
        }
    }

    fn handle_video_frame(&mut self, payload: &[u8]) {
        if payload.len() < 4 {
            if self.short_gate.allow() {
                warn!(len = payload.len(), "video frame payload shorter than monitor id");
            }
            return;
        }

        let mut id_bytes = [0u8; 4];
        id_bytes.copy_from_slice(&payload[0..4]);
        let server_id = u32::from_le_bytes(id_bytes);

        let Some(&local_id) = self.monitor_map.get(&server_id) else {
            if self.unmapped_gate.allow() {
                debug!(server_id, "dropping frame for unmapped monitor");
            }
            return;
        };

        let image = &payload[4..];
        if image.len() < SOI_MARKER.len() || image[0..2] != SOI_MARKER {
            if self.soi_gate.allow() {
                warn!(server_id, local_id, "frame missing JPEG SOI marker; dropped");
            }
            return;
        }

        self.store.store(local_id, image);
    }

    fn handle_monitor_config(&mut self, payload: &[u8]) {
        match MonitorConfig::decode(payload) {
            Ok(config) => {
                info!(
                    monitors = config.count(),
                    "server monitor topology changed; rebuilding map"
                );
                self.server_monitors = config;
                self.monitor_map = build_monitor_map(&self.server_monitors, &self.local_monitors);
                self.store.retain_mapped(&self.monitor_map);
            }
            Err(e) => warn!(error = %e, "ignoring malformed monitor config"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MonitorInfo;

    fn monitors(ids: &[u32]) -> MonitorConfig {
        MonitorConfig::new(
            ids.iter()
                .enumerate()
                .map(|(i, &id)| MonitorInfo {
                    id,
                    width: 1920,
                    height: 1080,
                    pos_x: (i as u32) * 1920,
                    pos_y: 0,
                    primary: i == 0,
                })
                .collect(),
        )
    }

    fn frame_payload(server_id: u32, image: &[u8]) -> Vec<u8> {
        let mut payload = server_id.to_le_bytes().to_vec();
        payload.extend_from_slice(image);
        payload
    }

    const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x01, 0x02, 0x03];

    #[test]
    fn stores_frame_under_local_id() {
        let store = FrameStore::new();
        let mut receiver =
            FrameReceiver::new(monitors(&[1]), monitors(&[1]), store.clone());

        let packet = Packet::new(PacketType::VideoFrame, frame_payload(1, JPEG_BYTES));
        receiver.handle(&packet);

        assert_eq!(store.latest(1), Some(JPEG_BYTES.to_vec()));
        assert_eq!(store.monitor_ids(), vec![1]);
    }

    #[test]
    fn unmapped_monitor_is_dropped() {
        let store = FrameStore::new();
        let mut receiver =
            FrameReceiver::new(monitors(&[1, 2]), monitors(&[1, 2, 3]), store.clone());

        for id in [1, 2, 3] {
            let packet = Packet::new(PacketType::VideoFrame, frame_payload(id, JPEG_BYTES));
            receiver.handle(&packet);
        }

        // Server monitor 3 has no positional partner on a 2-monitor client.
        assert_eq!(store.monitor_ids(), vec![1, 2]);
    }

    #[test]
    fn short_payload_is_dropped() {
        let store = FrameStore::new();
        let mut receiver = FrameReceiver::new(monitors(&[1]), monitors(&[1]), store.clone());

        receiver.handle(&Packet::new(PacketType::VideoFrame, vec![0x01, 0x00]));
        assert!(store.is_empty());
    }

    #[test]
    fn missing_soi_marker_is_dropped() {
        let store = FrameStore::new();
        let mut receiver = FrameReceiver::new(monitors(&[1]), monitors(&[1]), store.clone());

        receiver.handle(&Packet::new(
            PacketType::VideoFrame,
            frame_payload(1, &[0x00, 0x11, 0x22]),
        ));
        assert!(store.is_empty());

        // Bare monitor id with no image at all is equally invalid.
        receiver.handle(&Packet::new(PacketType::VideoFrame, frame_payload(1, &[])));
        assert!(store.is_empty());
    }

    #[test]
    fn topology_change_rebuilds_map_and_prunes() {
        let store = FrameStore::new();
        let mut receiver =
            FrameReceiver::new(monitors(&[1, 2]), monitors(&[1, 2]), store.clone());

        for id in [1, 2] {
            receiver.handle(&Packet::new(PacketType::VideoFrame, frame_payload(id, JPEG_BYTES)));
        }
        assert_eq!(store.monitor_ids(), vec![1, 2]);

        // Server shrinks to one monitor with a fresh id.
        let new_config = monitors(&[5]);
        receiver.handle(&Packet::new(PacketType::MonitorConfig, new_config.encode()));
        assert_eq!(receiver.monitor_map().len(), 1);
        assert_eq!(receiver.monitor_map().get(&5), Some(&1));
        assert_eq!(store.monitor_ids(), vec![1]);

        // Frames for the retired server id 2 now drop silently.
        receiver.handle(&Packet::new(PacketType::VideoFrame, frame_payload(2, JPEG_BYTES)));
        assert_eq!(store.monitor_ids(), vec![1]);

        // Frames for the new id land under the remapped local monitor.
        receiver.handle(&Packet::new(
            PacketType::VideoFrame,
            frame_payload(5, &[0xFF, 0xD8, 0x42]),
        ));
        assert_eq!(store.latest(1), Some(vec![0xFF, 0xD8, 0x42]));
    }

    #[test]
    fn reserved_and_unknown_packets_are_no_ops() {
        let store = FrameStore::new();
        let mut receiver = FrameReceiver::new(monitors(&[1]), monitors(&[1]), store.clone());

        receiver.handle(&Packet::new(PacketType::AudioFrame, vec![1, 2, 3]));
        receiver.handle(&Packet::new(PacketType::Pong, vec![4]));
        receiver.handle(&Packet::new(PacketType::Unknown(0xEE), vec![5]));
        receiver.handle(&Packet::new(PacketType::Handshake, Vec::new()));

        assert!(store.is_empty());
    }
}
