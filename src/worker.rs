//! Encode-and-publish worker pool.
//!
//! Each worker owns one frame at a time: rescale (optional), JPEG encode,
//! wrap in an `Envelope`, publish. A failure on one frame is logged and
//! counted; the worker moves on to the next frame.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crate::encode::{encode_jpeg, Envelope};
use crate::frame::Frame;
use crate::queue::FrameConsumer;
use crate::stats::PipelineStats;
use crate::transport::Publisher;

/// Per-frame settings shared by every worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerSettings {
    pub topic: String,
    pub source_id: String,
    /// Exact output size; aspect ratio is not preserved.
    pub rescale: Option<(u32, u32)>,
    pub perf_stats: bool,
}

pub struct EncodeWorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl EncodeWorkerPool {
    pub fn spawn(
        size: usize,
        consumer: FrameConsumer,
        publisher: Arc<dyn Publisher>,
        settings: Arc<WorkerSettings>,
        stats: Arc<PipelineStats>,
    ) -> Result<Self> {
        let mut handles = Vec::with_capacity(size);
        for index in 0..size {
            let consumer = consumer.clone();
            let publisher = Arc::clone(&publisher);
            let settings = Arc::clone(&settings);
            let stats = Arc::clone(&stats);
            let handle = std::thread::Builder::new()
                .name(format!("videopub-worker-{index}"))
                .spawn(move || worker_loop(&consumer, publisher.as_ref(), &settings, &stats))
                .with_context(|| format!("spawn encode worker {index}"))?;
            handles.push(handle);
        }
        log::debug!("started {} encode workers", size);
        Ok(Self { handles })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to drain the closed queue.
    pub fn join(self) {
        for handle in self.handles {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                log::error!("{} panicked", name);
            }
        }
    }
}

fn worker_loop(
    consumer: &FrameConsumer,
    publisher: &dyn Publisher,
    settings: &WorkerSettings,
    stats: &PipelineStats,
) {
    while let Some(frame) = consumer.pop() {
        process_frame(frame, publisher, settings, stats);
    }
}

fn process_frame(
    mut frame: Frame,
    publisher: &dyn Publisher,
    settings: &WorkerSettings,
    stats: &PipelineStats,
) {
    if let Some((width, height)) = settings.rescale {
        if let Err(e) = frame.rescale(width, height) {
            log::warn!("dropping frame: {:#}", e);
            stats.record_encode_failure();
            return;
        }
    }

    let started = Instant::now();
    let payload = match encode_jpeg(&frame)
        .and_then(|jpeg| Envelope::new(&frame, &jpeg, &settings.source_id).to_json())
    {
        Ok(payload) => payload,
        Err(e) => {
            log::warn!("dropping frame: {:#}", e);
            stats.record_encode_failure();
            return;
        }
    };

    match publisher.publish(&settings.topic, payload) {
        Ok(()) => stats.record_published(),
        Err(e) => {
            log::warn!("dropping frame: {:#}", e);
            stats.record_publish_failure();
            return;
        }
    }

    if settings.perf_stats {
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        log::info!(
            "Processing time: {:.2} ms; speed {:.2} fps",
            duration_ms,
            1000.0 / duration_ms.max(f64::EPSILON)
        );
    }
}
