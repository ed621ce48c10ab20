//! Captured frame container.
//!
//! A `Frame` is created by a capture backend, owned by the acquisition loop
//! until it is pushed into the `FrameQueue`, and then owned by exactly one
//! encode worker. `Frame` is not `Clone`; it moves through the pipeline and
//! is never duplicated.
//!
//! Pixels are interleaved 8-bit BGR, row-major, no padding.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SubsecRound, Utc};
use image::{imageops, imageops::FilterType, ImageBuffer, Rgb};

/// Channels per pixel (B, G, R).
pub const BGR_CHANNELS: u32 = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

pub struct Frame {
    /// Capture instant, truncated to whole milliseconds.
    capture_timestamp: DateTime<Utc>,
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    key_frame: bool,
}

impl Frame {
    /// Build a frame from BGR pixels. Fails if the buffer length does not match
    /// `width * height * 3`.
    pub fn new(
        capture_timestamp: DateTime<Utc>,
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        key_frame: bool,
    ) -> Result<Self> {
        let expected = expected_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "BGR frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            capture_timestamp: capture_timestamp.trunc_subsecs(3),
            pixels,
            width,
            height,
            key_frame,
        })
    }

    /// Build a frame stamped with the current UTC time.
    pub fn captured_now(pixels: Vec<u8>, width: u32, height: u32, key_frame: bool) -> Result<Self> {
        Self::new(Utc::now(), pixels, width, height, key_frame)
    }

    pub fn capture_timestamp(&self) -> DateTime<Utc> {
        self.capture_timestamp
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u32 {
        BGR_CHANNELS
    }

    pub fn is_key_frame(&self) -> bool {
        self.key_frame
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Rescale in place to exactly `width` x `height` (bilinear). Aspect ratio
    /// is not preserved.
    pub fn rescale(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(anyhow!("rescale target must be non-zero, got {}x{}", width, height));
        }
        if width == self.width && height == self.height {
            return Ok(());
        }
        // Channel order does not matter to the resampler, so the BGR bytes are
        // carried in an Rgb buffer as-is.
        let pixels = std::mem::take(&mut self.pixels);
        let source: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_raw(self.width, self.height, pixels)
                .context("frame buffer does not match its dimensions")?;
        let resized = imageops::resize(&source, width, height, FilterType::Triangle);
        self.pixels = resized.into_raw();
        self.width = width;
        self.height = height;
        Ok(())
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("capture_timestamp", &self.capture_timestamp)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("key_frame", &self.key_frame)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

fn expected_len(width: u32, height: u32) -> Result<usize> {
    let len = (width as u64)
        .checked_mul(height as u64)
        .and_then(|v| v.checked_mul(BGR_CHANNELS as u64))
        .ok_or_else(|| anyhow!("BGR frame dimensions overflow"))?;
    usize::try_from(len).map_err(|_| anyhow!("BGR frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
