//! JPEG encoding and the published envelope.
//!
//! Wire format (one JSON object per MQTT message):
//!
//! ```text
//! {"dtype":"image/jpeg","timestamp":"2024-03-01T12:00:00.123+00:00",
//!  "src_id":"cam1","height":480,"width":640,"data":"<base64 JPEG>"}
//! ```

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use jpeg_encoder::{ColorType, Encoder, SamplingFactor};
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

pub const JPEG_QUALITY: u8 = 85;
pub const JPEG_MEDIA_TYPE: &str = "image/jpeg";

/// Largest dimension a baseline JPEG can carry.
const MAX_JPEG_DIMENSION: u32 = u16::MAX as u32;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub dtype: String,
    pub timestamp: String,
    pub src_id: String,
    pub height: u32,
    pub width: u32,
    pub data: String,
}

impl Envelope {
    /// Wrap already-encoded JPEG bytes for `frame`.
    pub fn new(frame: &Frame, jpeg: &[u8], src_id: &str) -> Self {
        Self {
            dtype: JPEG_MEDIA_TYPE.to_string(),
            timestamp: format_timestamp(&frame.capture_timestamp()),
            src_id: src_id.to_string(),
            height: frame.height(),
            width: frame.width(),
            data: STANDARD.encode(jpeg),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("serialize envelope")
    }
}

/// ISO-8601, exactly three fractional digits, explicit `+00:00` offset.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, false)
}

/// Encode a BGR frame as baseline JPEG at `JPEG_QUALITY` with 4:2:0 chroma.
///
/// Pixels go to the encoder in BGR order as captured. The forward DCT uses
/// the AVX2 path when the CPU has it.
pub fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>> {
    let (width, height) = (frame.width(), frame.height());
    if width == 0 || height == 0 {
        return Err(anyhow!("cannot encode empty {}x{} frame", width, height));
    }
    if width > MAX_JPEG_DIMENSION || height > MAX_JPEG_DIMENSION {
        return Err(anyhow!(
            "frame {}x{} exceeds JPEG limit of {} pixels per side",
            width,
            height,
            MAX_JPEG_DIMENSION
        ));
    }

    let mut jpeg = Vec::with_capacity(frame.pixels().len() / 8);
    let mut encoder = Encoder::new(&mut jpeg, JPEG_QUALITY);
    encoder.set_sampling_factor(SamplingFactor::F_2_2);
    encoder
        .encode(frame.pixels(), width as u16, height as u16, ColorType::Bgr)
        .context("jpeg encode")?;
    Ok(jpeg)
}
