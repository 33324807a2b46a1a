//! JPEG frame encoder
//!
//! One encoder per capture worker. Both the RGB staging buffer and the
//! output buffer are reused across frames; nothing here is shared between
//! workers.

use super::RawFrame;
use crate::Result;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::io::Cursor;

pub const MIN_QUALITY: u8 = 1;
pub const MAX_QUALITY: u8 = 100;

/// Quality applied when no session has sent a QualityControl override
pub const DEFAULT_ENCODE_QUALITY: u8 = 85;

/// Reusable JPEG encoder for one capture worker
#[derive(Debug, Default)]
pub struct FrameEncoder {
    rgb: Vec<u8>,
    out: Vec<u8>,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode an RGBA frame as JPEG at the given quality (clamped 1-100).
    ///
    /// Returns a borrow of the internal output buffer; callers copy what
    /// they need before the next call.
    pub fn encode(&mut self, frame: &RawFrame, quality: u8) -> Result<&[u8]> {
        let quality = quality.clamp(MIN_QUALITY, MAX_QUALITY);

        self.rgb.clear();
        self.rgb
            .reserve((frame.width * frame.height * 3) as usize);
        for px in frame.data.chunks_exact(4) {
            self.rgb.extend_from_slice(&px[..3]);
        }

        self.out.clear();
        let mut cursor = Cursor::new(&mut self.out);
        let mut encoder = JpegEncoder::new_with_quality(&mut cursor, quality);
        encoder.encode(
            &self.rgb,
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
        )?;

        Ok(&self.out)
    }
}
