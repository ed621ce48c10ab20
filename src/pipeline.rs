//! Acquisition loop and pipeline wiring.
//!
//! The calling thread owns the capture source and runs the acquisition loop:
//! read a frame, push it onto the queue, pace. Encode workers drain the queue
//! in the background. Both exits (interrupt and capture failure) close the
//! queue and join the workers before returning, so frames already queued are
//! still published.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::capture::{Acquisition, CaptureError};
use crate::queue::{FrameQueue, PushOutcome, QueueConfig};
use crate::rate::RateLimiter;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::transport::Publisher;
use crate::worker::{EncodeWorkerPool, WorkerSettings};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    pub topic: String,
    pub source_id: String,
    pub rescale: Option<(u32, u32)>,
    /// Target frames per second; 0 disables pacing.
    pub frame_rate: u32,
    pub workers: usize,
    pub queue: QueueConfig,
    pub perf_stats: bool,
}

impl PipelineConfig {
    fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            topic: self.topic.clone(),
            source_id: self.source_id.clone(),
            rescale: self.rescale,
            perf_stats: self.perf_stats,
        }
    }
}

/// Run until `shutdown` is set (returns `Ok`) or capture fails (returns the
/// capture error). Either way the queue is drained first.
pub fn run(
    acquisition: Acquisition,
    config: &PipelineConfig,
    publisher: Arc<dyn Publisher>,
    shutdown: &AtomicBool,
) -> Result<StatsSnapshot> {
    run_with_stats(
        acquisition,
        config,
        publisher,
        shutdown,
        Arc::new(PipelineStats::new()),
    )
}

/// `run`, recording into caller-owned counters that stay readable when the
/// pipeline ends in an error.
pub fn run_with_stats(
    mut acquisition: Acquisition,
    config: &PipelineConfig,
    publisher: Arc<dyn Publisher>,
    shutdown: &AtomicBool,
    stats: Arc<PipelineStats>,
) -> Result<StatsSnapshot> {
    if config.workers == 0 {
        return Err(anyhow!("pipeline needs at least one encode worker"));
    }

    let mut queue = FrameQueue::new(config.queue);
    let pool = EncodeWorkerPool::spawn(
        config.workers,
        queue.consumer(),
        publisher,
        Arc::new(config.worker_settings()),
        Arc::clone(&stats),
    )?;
    let limiter = RateLimiter::from_fps(config.frame_rate);

    log::info!(
        "Start video capture... (topic {}, {} workers, queue {}, frame rate {})",
        config.topic,
        pool.size(),
        config.queue,
        match limiter.interval() {
            Some(_) => format!("{} fps", config.frame_rate),
            None => "unlimited".to_string(),
        }
    );

    let mut last_health = Instant::now();
    let outcome: Result<()> = loop {
        if shutdown.load(Ordering::SeqCst) {
            log::info!("shutdown requested, stopping capture");
            break Ok(());
        }
        let cycle_started = Instant::now();

        let frame = match acquisition.next_frame() {
            Ok(frame) => frame,
            Err(CaptureError::EndOfStream) => {
                log::error!("No more frames available... quitting");
                break Err(CaptureError::EndOfStream.into());
            }
            Err(e) => {
                log::error!("capture failed: {}", e);
                break Err(e.into());
            }
        };
        stats.record_captured();

        match queue.push(frame) {
            PushOutcome::Queued => {}
            PushOutcome::DroppedNewest => {
                stats.record_dropped();
                log::debug!("queue full, dropped incoming frame");
            }
            PushOutcome::DroppedOldest => {
                stats.record_dropped();
                log::debug!("queue full, evicted oldest frame");
            }
            PushOutcome::Closed => {
                break Err(anyhow!("frame queue closed unexpectedly"));
            }
        }

        if last_health.elapsed() >= HEALTH_LOG_INTERVAL {
            log_health(&stats.snapshot(), queue.len());
            last_health = Instant::now();
        }

        limiter.pace(cycle_started);
    };

    queue.close();
    log::debug!("draining {} queued frames", queue.len());
    pool.join();

    let snapshot = stats.snapshot();
    let source = acquisition.stats();
    log::info!(
        "capture stopped: {} ({} frames read from {}, {} rewinds)",
        snapshot,
        source.frames_read,
        source.locator,
        source.rewinds
    );
    outcome.map(|()| snapshot)
}

fn log_health(snapshot: &StatsSnapshot, queue_depth: usize) {
    log::info!(
        "health: captured={} queue_depth={} published={} dropped={} encode_failures={}",
        snapshot.captured,
        queue_depth,
        snapshot.published,
        snapshot.dropped,
        snapshot.encode_failures
    );
}
