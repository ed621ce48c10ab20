//! videopub - Capture video frames and publish them over MQTT.
//!
//! Each frame is JPEG encoded and published as a JSON envelope to
//! `{topic}/{id}`:
//!
//! ```text
//! {"dtype":"image/jpeg","timestamp":"...","src_id":"<id>","height":480,"width":640,"data":"<base64>"}
//! ```
//!
//! Ctrl-C stops capture, publishes the frames already queued and exits 0.

use anyhow::{Context, Result};
use clap::Parser;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use videopub::config::{MqttArgs, PublisherConfig, DEFAULT_INPUT, DEFAULT_TOPIC_PREFIX};
use videopub::{
    open_source, pipeline, Acquisition, FrameSource, MqttPublisher, OverflowPolicy, Publisher,
    QueueConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Publish video frames as JPEG envelopes over MQTT")]
struct Args {
    /// Video input: device node, file, stream URL, or stub://name for synthetic frames.
    #[arg(long, env = "VIDEOPUB_INPUT", default_value = DEFAULT_INPUT)]
    input: String,

    /// Restart from the first frame when the input ends.
    #[arg(long = "loop", env = "VIDEOPUB_LOOP")]
    looping: bool,

    /// Topic prefix; frames go to {topic}/{id}.
    #[arg(long, alias = "header", env = "VIDEOPUB_TOPIC", default_value = DEFAULT_TOPIC_PREFIX)]
    topic: String,

    /// Instance identifier, used as the last topic level and as src_id.
    #[arg(long, env = "VIDEOPUB_ID")]
    id: String,

    /// Rescale frames to this width (requires --height).
    #[arg(long, env = "VIDEOPUB_WIDTH")]
    width: Option<u32>,

    /// Rescale frames to this height (requires --width).
    #[arg(long, env = "VIDEOPUB_HEIGHT")]
    height: Option<u32>,

    /// Target capture rate in frames per second (0 = as fast as the source delivers).
    #[arg(long = "frame_rate", env = "VIDEOPUB_FRAME_RATE", default_value_t = 0)]
    frame_rate: u32,

    /// Number of encode worker threads.
    #[arg(long, env = "VIDEOPUB_THREADS", default_value_t = videopub::config::DEFAULT_THREADS)]
    threads: usize,

    #[command(flatten)]
    mqtt: MqttArgs,

    /// Bound the frame queue (0 = unbounded).
    #[arg(long = "queue_capacity", env = "VIDEOPUB_QUEUE_CAPACITY", default_value_t = 0)]
    queue_capacity: usize,

    /// Frame to discard when a bounded queue is full (drop-newest|drop-oldest).
    #[arg(long, env = "VIDEOPUB_OVERFLOW", default_value = "drop-newest")]
    overflow: String,

    /// Log per-frame processing time.
    #[arg(long = "perf_stats", env = "VIDEOPUB_PERF_STATS")]
    perf_stats: bool,

    /// Enable debug logging.
    #[arg(long, env = "VIDEOPUB_DEBUG")]
    debug: bool,

    /// Request hardware-accelerated decoding.
    #[arg(long, env = "VIDEOPUB_HW")]
    hw: bool,
}

impl Args {
    fn into_config(self) -> Result<PublisherConfig> {
        let overflow = OverflowPolicy::from_str(&self.overflow)?;
        let config = PublisherConfig {
            input: self.input,
            looping: self.looping,
            topic_prefix: self.topic,
            instance_id: Some(self.id),
            width: self.width,
            height: self.height,
            frame_rate: self.frame_rate,
            threads: self.threads,
            mqtt: self.mqtt.settings()?,
            client_id: self.mqtt.mqtt_client_id,
            queue: QueueConfig::bounded(self.queue_capacity, overflow),
            perf_stats: self.perf_stats,
            hardware_accel: self.hw,
        };
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config = args.into_config()?;
    let pipeline_config = config.pipeline_config()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("error setting Ctrl-C handler")?;
    }

    let publisher = Arc::new(
        MqttPublisher::connect(&config.mqtt, &config.client_id()?)
            .context("MQTT connection failed")?,
    );

    let source = open_source(&config.input, config.hardware_accel)
        .with_context(|| format!("failed to open video stream {}", config.input))?;
    log::info!("Using video backend: {}", source.backend_name());
    if config.hardware_accel && !source.hardware_accelerated() {
        log::warn!("hardware decoding unavailable, decoding in software");
    }

    let shared: Arc<dyn Publisher> = publisher.clone();
    let outcome = pipeline::run(
        Acquisition::new(source, config.looping),
        &pipeline_config,
        shared,
        &shutdown,
    );

    match Arc::try_unwrap(publisher) {
        Ok(publisher) => {
            if let Err(e) = publisher.disconnect() {
                log::warn!("{:#}", e);
            }
        }
        Err(_) => log::warn!("publisher still in use, skipping MQTT disconnect"),
    }

    let stats = outcome?;
    log::info!("published {} frames", stats.published);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("videopub").chain(argv.iter().copied()))
            .expect("parse args")
    }

    #[test]
    fn defaults_follow_the_reference_cli() -> Result<()> {
        let args = parse(&["--id", "cam1"]);
        assert_eq!(args.input, "/dev/video0");
        assert_eq!(args.threads, 4);
        assert_eq!(args.frame_rate, 0);
        let config = args.into_config()?;
        assert_eq!(config.topic()?, "videopub/stream/cam1");
        assert_eq!(config.queue, QueueConfig::unbounded());
        Ok(())
    }

    #[test]
    fn header_is_an_alias_for_topic() -> Result<()> {
        let config = parse(&["--header", "site/cams", "--id", "door"]).into_config()?;
        assert_eq!(config.topic()?, "site/cams/door");
        Ok(())
    }

    #[test]
    fn snake_case_flags_are_accepted() -> Result<()> {
        let config = parse(&[
            "--id",
            "cam1",
            "--input",
            "stub://demo",
            "--loop",
            "--frame_rate",
            "15",
            "--queue_capacity",
            "8",
            "--overflow",
            "drop-oldest",
            "--perf_stats",
            "--hw",
        ])
        .into_config()?;
        assert!(config.looping);
        assert!(config.perf_stats);
        assert!(config.hardware_accel);
        assert_eq!(config.frame_rate, 15);
        assert_eq!(
            config.queue,
            QueueConfig::bounded(8, OverflowPolicy::DropOldest)
        );
        Ok(())
    }

    #[test]
    fn missing_id_is_a_usage_error() {
        let err = Args::try_parse_from(["videopub", "--input", "stub://demo"])
            .expect_err("--id is required");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn blank_id_is_rejected() {
        assert!(parse(&["--id", ""]).into_config().is_err());
    }

    #[test]
    fn unknown_overflow_policy_is_rejected() {
        assert!(parse(&["--id", "cam1", "--overflow", "ring"])
            .into_config()
            .is_err());
    }
}
