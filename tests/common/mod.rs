//! Shared fixtures for pipeline tests.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use videopub::{CaptureError, Envelope, Frame, FrameSource, Publisher, SourceStats};

/// Records every published message.
#[derive(Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<(String, Vec<u8>)>>,
    calls: AtomicUsize,
    /// Every `slow_every`-th call sleeps for `slow_for`.
    slow_every: usize,
    slow_for: Duration,
    /// Set `flag` once this many messages were published.
    stop_after: Option<(usize, Arc<AtomicBool>)>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skewed(slow_every: usize, slow_for: Duration) -> Self {
        Self {
            slow_every,
            slow_for,
            ..Self::default()
        }
    }

    pub fn stopping_after(count: usize, flag: Arc<AtomicBool>) -> Self {
        Self {
            stop_after: Some((count, flag)),
            ..Self::default()
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.lock().iter().map(|(topic, _)| topic.clone()).collect()
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.lock()
            .iter()
            .map(|(_, payload)| serde_json::from_slice(payload).expect("envelope json"))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, Vec<u8>)>> {
        self.messages.lock().expect("recorder lock")
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.slow_every > 0 && call % self.slow_every == 0 {
            std::thread::sleep(self.slow_for);
        }
        let published = {
            let mut messages = self.lock();
            messages.push((topic.to_string(), payload));
            messages.len()
        };
        if let Some((count, flag)) = &self.stop_after {
            if published >= *count {
                flag.store(true, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

pub fn sequence_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Frame N carries timestamp `sequence_epoch() + N ms`, so capture order is
/// recoverable from published envelopes.
pub struct SequenceSource {
    next: i64,
    limit: i64,
    width: u32,
    height: u32,
    frames_read: u64,
    rewinds: u64,
    fail_rewind: bool,
}

impl SequenceSource {
    pub fn new(limit: i64, width: u32, height: u32) -> Self {
        Self {
            next: 0,
            limit,
            width,
            height,
            frames_read: 0,
            rewinds: 0,
            fail_rewind: false,
        }
    }

    pub fn with_broken_rewind(mut self) -> Self {
        self.fail_rewind = true;
        self
    }
}

impl FrameSource for SequenceSource {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        if self.next >= self.limit {
            return Err(CaptureError::EndOfStream);
        }
        let ts = sequence_epoch() + ChronoDuration::milliseconds(self.next);
        let pixels = vec![(self.next % 256) as u8; (self.width * self.height * 3) as usize];
        let frame = Frame::new(ts, pixels, self.width, self.height, self.next == 0)
            .map_err(|e| CaptureError::Decode(e.to_string()))?;
        self.next += 1;
        self.frames_read += 1;
        Ok(frame)
    }

    fn seek_start(&mut self) -> Result<(), CaptureError> {
        if self.fail_rewind {
            return Err(CaptureError::Seek("source is not seekable".to_string()));
        }
        self.next = 0;
        self.rewinds += 1;
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "SEQUENCE"
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_read: self.frames_read,
            rewinds: self.rewinds,
            locator: "sequence".to_string(),
        }
    }
}

/// Milliseconds since `sequence_epoch()` of an envelope timestamp.
pub fn sequence_number(envelope: &Envelope) -> Result<i64> {
    let ts = DateTime::parse_from_rfc3339(&envelope.timestamp)
        .map_err(|e| anyhow!("bad timestamp {:?}: {}", envelope.timestamp, e))?;
    Ok((ts.with_timezone(&Utc) - sequence_epoch()).num_milliseconds())
}
