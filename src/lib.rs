//! videopub
//!
//! Captures video frames, encodes them as JPEG and publishes them over MQTT
//! as timestamped JSON envelopes. A companion benchmark subscribes to those
//! envelopes and reports delivery latency and throughput.
//!
//! # Architecture
//!
//! One acquisition loop feeds a pool of encode workers through a queue:
//!
//! ```text
//! FrameSource -> RateLimiter -> FrameQueue -> EncodeWorkerPool -> Publisher
//! ```
//!
//! 1. **Single producer**: only the acquisition loop owns the capture source.
//! 2. **Move semantics**: each frame is owned by exactly one stage at a time.
//! 3. **Non-blocking capture**: pushing onto the queue never waits for workers.
//! 4. **Drain on exit**: frames already queued are published before shutdown.
//!
//! # Module Structure
//!
//! - `capture`: frame sources (synthetic, ffmpeg) and the looping policy
//! - `frame`: the owned BGR frame type
//! - `rate`, `queue`, `worker`, `pipeline`: the producer pipeline
//! - `encode`: JPEG encoding and the wire envelope
//! - `transport`: the `Publisher` seam and the MQTT client
//! - `bench`: latency windows for the benchmark consumer
//! - `config`: validated settings for both binaries

pub mod bench;
pub mod capture;
pub mod config;
pub mod encode;
pub mod frame;
pub mod pipeline;
pub mod queue;
pub mod rate;
pub mod stats;
pub mod transport;
pub mod worker;

pub use bench::{envelope_latency, LatencyWindow, WindowReport};
pub use capture::{open_source, Acquisition, CaptureError, FrameSource, SourceStats};
pub use config::{BenchConfig, PublisherConfig};
pub use encode::{encode_jpeg, format_timestamp, Envelope};
pub use frame::Frame;
pub use pipeline::PipelineConfig;
pub use queue::{FrameConsumer, FrameQueue, OverflowPolicy, PushOutcome, QueueConfig};
pub use rate::RateLimiter;
pub use stats::{PipelineStats, StatsSnapshot};
pub use transport::{
    InboundMessage, MqttPublisher, MqttSettings, MqttSubscriber, Publisher, TlsMode, TlsSettings,
};
pub use worker::{EncodeWorkerPool, WorkerSettings};
