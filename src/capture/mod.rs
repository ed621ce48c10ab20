//! Frame capture sources.
//!
//! This module provides the sources that feed the acquisition loop:
//! - Synthetic frames (`stub://` locators, testing and demos)
//! - Local files, V4L2 device nodes and network streams (feature: capture-ffmpeg)
//!
//! Every source produces BGR `Frame`s stamped with their UTC capture time.
//! The source handle is owned by the acquisition loop and never shared with
//! the encode workers.

#[cfg(feature = "capture-ffmpeg")]
mod ffmpeg;
pub mod synthetic;

use thiserror::Error;

use crate::frame::Frame;

#[cfg(feature = "capture-ffmpeg")]
pub use ffmpeg::FfmpegSource;
pub use synthetic::SyntheticSource;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {locator:?}: {reason}")]
    Open { locator: String, reason: String },
    #[error("no more frames available")]
    EndOfStream,
    #[error("failed to seek to start of stream: {0}")]
    Seek(String),
    #[error("failed to decode frame: {0}")]
    Decode(String),
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_read: u64,
    pub rewinds: u64,
    pub locator: String,
}

/// A capture device.
pub trait FrameSource {
    /// Read the next frame. `CaptureError::EndOfStream` when exhausted.
    fn read(&mut self) -> Result<Frame, CaptureError>;

    /// Rewind to the first frame.
    fn seek_start(&mut self) -> Result<(), CaptureError>;

    /// Name of the decoding backend in use.
    fn backend_name(&self) -> &str;

    /// Whether hardware-accelerated decode is actually in effect.
    fn hardware_accelerated(&self) -> bool {
        false
    }

    fn stats(&self) -> SourceStats;
}

/// Open a source for `locator`.
///
/// `stub://` locators always resolve to the synthetic source. Anything else
/// needs the capture-ffmpeg feature.
pub fn open_source(
    locator: &str,
    hardware_accel: bool,
) -> Result<Box<dyn FrameSource>, CaptureError> {
    if locator.trim().is_empty() {
        return Err(CaptureError::Open {
            locator: locator.to_string(),
            reason: "empty input".to_string(),
        });
    }
    if locator.starts_with(synthetic::SCHEME) {
        if hardware_accel {
            log::debug!("hardware decode has no effect on synthetic sources");
        }
        return Ok(Box::new(SyntheticSource::open(locator)?));
    }
    #[cfg(feature = "capture-ffmpeg")]
    {
        Ok(Box::new(FfmpegSource::open(locator, hardware_accel)?))
    }
    #[cfg(not(feature = "capture-ffmpeg"))]
    {
        Err(CaptureError::Open {
            locator: locator.to_string(),
            reason: "device and file capture requires the capture-ffmpeg feature".to_string(),
        })
    }
}

// ----------------------------------------------------------------------------
// Acquisition: looping policy on top of a source
// ----------------------------------------------------------------------------

/// Wraps a source with the end-of-stream policy.
///
/// On end-of-stream with looping enabled the source is rewound and read once
/// more; any failure after that is returned to the caller, which treats it
/// as fatal.
pub struct Acquisition {
    source: Box<dyn FrameSource>,
    looping: bool,
}

impl Acquisition {
    pub fn new(source: Box<dyn FrameSource>, looping: bool) -> Self {
        Self { source, looping }
    }

    pub fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        match self.source.read() {
            Err(CaptureError::EndOfStream) if self.looping => {
                log::debug!("end of stream, rewinding {}", self.source.stats().locator);
                self.source.seek_start()?;
                self.source.read()
            }
            other => other,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.source.backend_name()
    }

    pub fn stats(&self) -> SourceStats {
        self.source.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_locator_fails_to_open() {
        let err = open_source("  ", false).err().expect("open must fail");
        assert!(matches!(err, CaptureError::Open { .. }));
    }

    #[cfg(not(feature = "capture-ffmpeg"))]
    #[test]
    fn device_requires_ffmpeg_feature() {
        let err = open_source("/dev/video0", false)
            .err()
            .expect("open must fail");
        assert!(format!("{err}").contains("capture-ffmpeg"));
    }

    #[test]
    fn acquisition_without_loop_reports_end_of_stream() {
        let source = open_source("stub://finite?frames=2&width=4&height=4", false).expect("open");
        let mut acquisition = Acquisition::new(source, false);
        assert!(acquisition.next_frame().is_ok());
        assert!(acquisition.next_frame().is_ok());
        assert!(matches!(
            acquisition.next_frame(),
            Err(CaptureError::EndOfStream)
        ));
    }

    #[test]
    fn acquisition_with_loop_rewinds() {
        let source = open_source("stub://finite?frames=3&width=4&height=4", false).expect("open");
        let mut acquisition = Acquisition::new(source, true);
        for _ in 0..7 {
            acquisition.next_frame().expect("looping never ends");
        }
        let stats = acquisition.stats();
        assert_eq!(stats.frames_read, 7);
        assert_eq!(stats.rewinds, 2);
    }

    struct BrokenRewind;

    impl FrameSource for BrokenRewind {
        fn read(&mut self) -> Result<Frame, CaptureError> {
            Err(CaptureError::EndOfStream)
        }
        fn seek_start(&mut self) -> Result<(), CaptureError> {
            Err(CaptureError::Seek("not seekable".to_string()))
        }
        fn backend_name(&self) -> &str {
            "BROKEN"
        }
        fn stats(&self) -> SourceStats {
            SourceStats::default()
        }
    }

    #[test]
    fn failed_rewind_is_returned() {
        let mut acquisition = Acquisition::new(Box::new(BrokenRewind), true);
        assert!(matches!(
            acquisition.next_frame(),
            Err(CaptureError::Seek(_))
        ));
    }
}
