//! Work queue between the acquisition loop and the encode workers.
//!
//! Only the acquisition loop pushes; any number of workers pop. `push` never
//! blocks the producer. With no capacity configured the queue grows without
//! bound: a slow broker makes the queue grow instead of throttling capture.
//! With a capacity, the overflow policy decides which frame is discarded.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

/// Which frame to discard when a bounded queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Discard the incoming frame.
    #[default]
    DropNewest,
    /// Evict the oldest queued frame to admit the incoming one.
    DropOldest,
}

impl FromStr for OverflowPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "drop-newest" | "newest" => Ok(Self::DropNewest),
            "drop-oldest" | "oldest" => Ok(Self::DropOldest),
            other => Err(anyhow!(
                "unknown overflow policy '{}': expected 'drop-newest' or 'drop-oldest'",
                other
            )),
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DropNewest => write!(f, "drop-newest"),
            Self::DropOldest => write!(f, "drop-oldest"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueConfig {
    /// `None` means unbounded.
    pub capacity: Option<usize>,
    pub overflow: OverflowPolicy,
}

impl QueueConfig {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Capacity 0 is treated as unbounded.
    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            capacity: (capacity > 0).then_some(capacity),
            overflow,
        }
    }
}

impl fmt::Display for QueueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.capacity {
            None => write!(f, "unbounded"),
            Some(capacity) => write!(f, "capacity {} ({})", capacity, self.overflow),
        }
    }
}

/// What happened to a pushed frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queue was full; the pushed frame was discarded.
    DroppedNewest,
    /// Queue was full; the oldest queued frame was discarded.
    DroppedOldest,
    /// Queue already closed; the pushed frame was discarded.
    Closed,
}

pub struct FrameQueue {
    tx: Option<Sender<Frame>>,
    /// Kept by the producer so drop-oldest can evict.
    rx: Receiver<Frame>,
    overflow: OverflowPolicy,
}

impl FrameQueue {
    pub fn new(config: QueueConfig) -> Self {
        let (tx, rx) = match config.capacity {
            Some(capacity) => crossbeam_channel::bounded(capacity),
            None => crossbeam_channel::unbounded(),
        };
        Self {
            tx: Some(tx),
            rx,
            overflow: config.overflow,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(QueueConfig::unbounded())
    }

    pub fn push(&self, frame: Frame) -> PushOutcome {
        let Some(tx) = self.tx.as_ref() else {
            return PushOutcome::Closed;
        };
        let mut frame = frame;
        let mut evicted = false;
        loop {
            match tx.try_send(frame) {
                Ok(()) if evicted => return PushOutcome::DroppedOldest,
                Ok(()) => return PushOutcome::Queued,
                Err(TrySendError::Full(rejected)) => match self.overflow {
                    OverflowPolicy::DropNewest => return PushOutcome::DroppedNewest,
                    OverflowPolicy::DropOldest => {
                        // A worker may have emptied a slot in the meantime;
                        // either way the retry makes progress.
                        if self.rx.try_recv().is_ok() {
                            evicted = true;
                        }
                        frame = rejected;
                    }
                },
                Err(TrySendError::Disconnected(_)) => return PushOutcome::Closed,
            }
        }
    }

    /// Handle for a worker.
    pub fn consumer(&self) -> FrameConsumer {
        FrameConsumer {
            rx: self.rx.clone(),
        }
    }

    /// Stop accepting frames. Workers drain what is queued, then `pop`
    /// returns `None`.
    pub fn close(&mut self) {
        self.tx = None;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[derive(Clone)]
pub struct FrameConsumer {
    rx: Receiver<Frame>,
}

impl FrameConsumer {
    /// Block until a frame is available. `None` once the queue is closed and
    /// drained.
    pub fn pop(&self) -> Option<Frame> {
        self.rx.recv().ok()
    }
}
