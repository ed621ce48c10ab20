//! Synthetic frame source.
//!
//! Locator format: `stub://<name>[?frames=K&width=W&height=H&key_interval=N]`.
//!
//! - `frames`: finite stream of K frames, then end-of-stream (default: endless)
//! - `width`/`height`: frame size (default 640x480)
//! - `key_interval`: every Nth frame is flagged as a key frame (default 30)
//!
//! Frame content is a moving gradient derived from the frame index, so frame
//! N is identical after a rewind.

use super::{CaptureError, FrameSource, SourceStats};
use crate::frame::{Frame, BGR_CHANNELS};

pub(crate) const SCHEME: &str = "stub://";

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_KEY_INTERVAL: u64 = 30;

#[derive(Clone, Debug, PartialEq, Eq)]
struct SyntheticConfig {
    name: String,
    frames: Option<u64>,
    width: u32,
    height: u32,
    key_interval: u64,
}

pub struct SyntheticSource {
    locator: String,
    config: SyntheticConfig,
    /// Index of the next frame within the current pass.
    position: u64,
    frames_read: u64,
    rewinds: u64,
}

impl SyntheticSource {
    pub fn open(locator: &str) -> Result<Self, CaptureError> {
        let config = parse_locator(locator).map_err(|reason| CaptureError::Open {
            locator: locator.to_string(),
            reason,
        })?;
        log::info!(
            "SyntheticSource: opened {} ({}x{}, {})",
            config.name,
            config.width,
            config.height,
            config
                .frames
                .map(|k| format!("{k} frames"))
                .unwrap_or_else(|| "endless".to_string())
        );
        Ok(Self {
            locator: locator.to_string(),
            config,
            position: 0,
            frames_read: 0,
            rewinds: 0,
        })
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let mut pixels = vec![0u8; width * height * BGR_CHANNELS as usize];
        let shift = self.position as usize;
        for (i, px) in pixels.chunks_exact_mut(BGR_CHANNELS as usize).enumerate() {
            let x = i % width;
            let y = i / width;
            px[0] = ((x + shift) % 256) as u8;
            px[1] = ((y + shift) % 256) as u8;
            px[2] = ((x + y) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        if let Some(limit) = self.config.frames {
            if self.position >= limit {
                return Err(CaptureError::EndOfStream);
            }
        }
        let key_frame = self.position % self.config.key_interval == 0;
        let pixels = self.generate_pixels();
        let frame = Frame::captured_now(pixels, self.config.width, self.config.height, key_frame)
            .map_err(|e| CaptureError::Decode(e.to_string()))?;
        self.position += 1;
        self.frames_read += 1;
        Ok(frame)
    }

    fn seek_start(&mut self) -> Result<(), CaptureError> {
        self.position = 0;
        self.rewinds += 1;
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "SYNTHETIC"
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_read: self.frames_read,
            rewinds: self.rewinds,
            locator: self.locator.clone(),
        }
    }
}

fn parse_locator(locator: &str) -> Result<SyntheticConfig, String> {
    let rest = locator
        .strip_prefix(SCHEME)
        .ok_or_else(|| format!("expected {SCHEME} locator"))?;
    let (name, query) = match rest.split_once('?') {
        Some((name, query)) => (name, Some(query)),
        None => (rest, None),
    };
    let mut config = SyntheticConfig {
        name: if name.is_empty() { "synthetic" } else { name }.to_string(),
        frames: None,
        width: DEFAULT_WIDTH,
        height: DEFAULT_HEIGHT,
        key_interval: DEFAULT_KEY_INTERVAL,
    };
    for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("malformed parameter '{pair}'"))?;
        match key {
            "frames" => config.frames = Some(parse_positive(key, value)?),
            "width" => config.width = parse_dimension(key, value)?,
            "height" => config.height = parse_dimension(key, value)?,
            "key_interval" => config.key_interval = parse_positive(key, value)?,
            other => return Err(format!("unknown parameter '{other}'")),
        }
    }
    Ok(config)
}

fn parse_positive(key: &str, value: &str) -> Result<u64, String> {
    match value.parse::<u64>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(format!("{key} must be a positive integer, got '{value}'")),
    }
}

fn parse_dimension(key: &str, value: &str) -> Result<u32, String> {
    let v = parse_positive(key, value)?;
    u32::try_from(v).map_err(|_| format!("{key} out of range: {value}"))
}
