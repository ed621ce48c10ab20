//! FFmpeg-backed frame source.
//!
//! Opens anything libavformat/libavdevice can: local files, V4L2 device
//! nodes (`/dev/videoN`) and network URLs. Frames are decoded in-memory and
//! converted to BGR24.

use ffmpeg_next as ffmpeg;

use super::{CaptureError, FrameSource, SourceStats};
use crate::frame::Frame;

pub struct FfmpegSource {
    locator: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    /// EOF has been sent to the decoder; only buffered frames remain.
    draining: bool,
    frames_read: u64,
    rewinds: u64,
}

impl FfmpegSource {
    pub fn open(locator: &str, hardware_accel: bool) -> Result<Self, CaptureError> {
        let open_err = |reason: String| CaptureError::Open {
            locator: locator.to_string(),
            reason,
        };

        ffmpeg::init().map_err(|e| open_err(format!("initialize ffmpeg: {e}")))?;
        ffmpeg::device::register_all();

        let input = ffmpeg::format::input(&locator).map_err(|e| open_err(e.to_string()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| open_err("input has no video stream".to_string()))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(|e| open_err(format!("load video decoder parameters: {e}")))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| open_err(format!("open video decoder: {e}")))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::BGR24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|e| open_err(format!("create BGR scaler: {e}")))?;

        if hardware_accel {
            log::warn!("hardware decode requested; the ffmpeg backend decodes in software");
        }
        log::info!(
            "FfmpegSource: opened {} ({}x{})",
            locator,
            decoder.width(),
            decoder.height()
        );

        Ok(Self {
            locator: locator.to_string(),
            input,
            stream_index,
            decoder,
            scaler,
            draining: false,
            frames_read: 0,
            rewinds: 0,
        })
    }

    fn next_video_packet(&mut self) -> Option<ffmpeg::Packet> {
        for (stream, packet) in self.input.packets() {
            if stream.index() == self.stream_index {
                return Some(packet);
            }
        }
        None
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame, CaptureError> {
        let mut bgr = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut bgr)
            .map_err(|e| CaptureError::Decode(format!("scale frame to BGR: {e}")))?;
        let (pixels, width, height) = frame_to_pixels(&bgr)?;
        self.frames_read += 1;
        Frame::captured_now(pixels, width, height, decoded.is_key())
            .map_err(|e| CaptureError::Decode(e.to_string()))
    }
}

impl FrameSource for FfmpegSource {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded);
            }
            if self.draining {
                return Err(CaptureError::EndOfStream);
            }
            match self.next_video_packet() {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .map_err(|e| CaptureError::Decode(format!("send packet: {e}")))?,
                None => {
                    self.decoder
                        .send_eof()
                        .map_err(|e| CaptureError::Decode(format!("send eof: {e}")))?;
                    self.draining = true;
                }
            }
        }
    }

    fn seek_start(&mut self) -> Result<(), CaptureError> {
        self.input
            .seek(0, ..)
            .map_err(|e| CaptureError::Seek(e.to_string()))?;
        self.decoder.flush();
        self.draining = false;
        self.rewinds += 1;
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "FFMPEG"
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_read: self.frames_read,
            rewinds: self.rewinds,
            locator: self.locator.clone(),
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32), CaptureError> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .ok_or_else(|| CaptureError::Decode("ffmpeg frame is truncated".to_string()))?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .ok_or_else(|| CaptureError::Decode("ffmpeg frame row is out of bounds".to_string()))?,
        );
    }

    Ok((pixels, width, height))
}
