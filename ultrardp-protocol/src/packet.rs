//! UltraRDP packet framing
//!
//! Every message on the wire is one packet: a fixed 13-byte little-endian
//! header followed by an opaque payload.
//!
//! ```text
//! type (1B) | timestamp (8B, signed ns since epoch) | length (4B) | payload
//! ```
//!
//! Timestamps exist for latency measurement and diagnostics; ordering within
//! one connection is already guaranteed by TCP.

use crate::{ProtocolError, Result};
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the fixed packet header in bytes
pub const HEADER_LEN: usize = 13;

/// Sanity ceiling applied to the declared payload length before allocation.
/// Generous enough for uncompressed-quality 4K JPEG frames.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// Packet type identifiers
///
/// The tag set is closed on the sending side; unknown tags decode to
/// [`PacketType::Unknown`] and are ignored by dispatchers so that newer
/// peers remain compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Server → client monitor configuration, first packet of a session
    Handshake,
    /// Encoded frame, payload prefixed with the 4-byte server monitor id
    VideoFrame,
    /// Reserved for audio streaming
    AudioFrame,
    /// Reserved for pointer motion input
    MouseMove,
    /// Reserved for pointer button input
    MouseButton,
    /// Reserved for keyboard input
    Keyboard,
    /// Monitor configuration (client reply at handshake, or a mid-session
    /// topology update from the server)
    MonitorConfig,
    /// Latency probe; payload is echoed back in a Pong
    Ping,
    /// Reply to a Ping carrying the original payload
    Pong,
    /// Single-byte quality level 0-100
    QualityControl,
    /// Forward-compatibility escape hatch
    Unknown(u8),
}

impl From<u8> for PacketType {
    fn from(value: u8) -> Self {
        match value {
            0x01 => PacketType::Handshake,
            0x02 => PacketType::VideoFrame,
            0x03 => PacketType::AudioFrame,
            0x04 => PacketType::MouseMove,
            0x05 => PacketType::MouseButton,
            0x06 => PacketType::Keyboard,
            0x07 => PacketType::MonitorConfig,
            0x08 => PacketType::Ping,
            0x09 => PacketType::Pong,
            0x0A => PacketType::QualityControl,
            other => PacketType::Unknown(other),
        }
    }
}

impl PacketType {
    /// Wire tag for this packet type
    pub fn to_u8(self) -> u8 {
        match self {
            PacketType::Handshake => 0x01,
            PacketType::VideoFrame => 0x02,
            PacketType::AudioFrame => 0x03,
            PacketType::MouseMove => 0x04,
            PacketType::MouseButton => 0x05,
            PacketType::Keyboard => 0x06,
            PacketType::MonitorConfig => 0x07,
            PacketType::Ping => 0x08,
            PacketType::Pong => 0x09,
            PacketType::QualityControl => 0x0A,
            PacketType::Unknown(other) => other,
        }
    }
}

/// A single protocol packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    /// Nanoseconds since the Unix epoch at construction time
    pub timestamp: i64,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create a packet stamped with the current time
    pub fn new(packet_type: PacketType, payload: Vec<u8>) -> Self {
        Self {
            packet_type,
            timestamp: current_timestamp_nanos(),
            payload,
        }
    }

    /// Create a packet with an explicit timestamp
    pub fn with_timestamp(packet_type: PacketType, timestamp: i64, payload: Vec<u8>) -> Self {
        Self {
            packet_type,
            timestamp,
            payload,
        }
    }

    /// Serialize header and payload into a single wire buffer
    ///
    /// Used by the dispatcher to encode a frame once and fan the same bytes
    /// out to every eligible session.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len());
        bytes.push(self.packet_type.to_u8());
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Write the packet to `writer`: header, then payload
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let mut header = [0u8; HEADER_LEN];
        header[0] = self.packet_type.to_u8();
        header[1..9].copy_from_slice(&self.timestamp.to_le_bytes());
        header[9..13].copy_from_slice(&(self.payload.len() as u32).to_le_bytes());

        writer.write_all(&header).await?;
        if !self.payload.is_empty() {
            writer.write_all(&self.payload).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    /// Read one packet from `reader`
    ///
    /// A short read at any point is an error; `length == 0` yields an empty
    /// payload, not a failure.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).await?;

        let packet_type = PacketType::from(header[0]);

        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&header[1..9]);
        let timestamp = i64::from_le_bytes(ts_bytes);

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&header[9..13]);
        let length = u32::from_le_bytes(len_bytes) as usize;

        if length > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadExceeded(length, MAX_PAYLOAD_LEN));
        }

        let mut payload = vec![0u8; length];
        if length > 0 {
            reader.read_exact(&mut payload).await?;
        }

        Ok(Packet {
            packet_type,
            timestamp,
            payload,
        })
    }
}

/// Current time as nanoseconds since the Unix epoch
pub fn current_timestamp_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}
