//! videopub_bench - Measure delivery latency and throughput of published frames.
//!
//! Subscribes to the envelope topics and prints one line per window:
//!
//! ```text
//! Message Per Second: 30  Average Latency: 0.042
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use videopub::bench::run_reporter;
use videopub::config::{BenchConfig, MqttArgs, DEFAULT_BENCH_FILTER, DEFAULT_BENCH_WINDOW_MS};
use videopub::MqttSubscriber;

#[derive(Parser, Debug)]
#[command(author, version, about = "Video publisher benchmark utility")]
struct Args {
    /// Topic filter to subscribe to.
    #[arg(long, env = "VIDEOPUB_BENCH_INPUT", default_value = DEFAULT_BENCH_FILTER)]
    input: String,

    #[command(flatten)]
    mqtt: MqttArgs,

    /// Print the latency of every message.
    #[arg(long = "perf_stats", env = "VIDEOPUB_PERF_STATS")]
    perf_stats: bool,

    /// Enable debug logging.
    #[arg(long, env = "VIDEOPUB_DEBUG")]
    debug: bool,

    /// Reporting window in milliseconds.
    #[arg(long = "window_ms", env = "VIDEOPUB_BENCH_WINDOW_MS", default_value_t = DEFAULT_BENCH_WINDOW_MS)]
    window_ms: u64,
}

impl Args {
    fn into_config(self) -> Result<BenchConfig> {
        let config = BenchConfig {
            filter: self.input,
            mqtt: self.mqtt.settings()?,
            client_id: self.mqtt.mqtt_client_id,
            window: Duration::from_millis(self.window_ms),
            perf_stats: self.perf_stats,
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

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .context("error setting Ctrl-C handler")?;
    }

    let subscriber = MqttSubscriber::subscribe(&config.mqtt, &config.client_id(), &config.filter)
        .context("MQTT connection failed")?;

    log::info!("Start benchmarking...");
    let stdout = std::io::stdout();
    let outcome = run_reporter(
        subscriber.inbound(),
        config.window,
        config.perf_stats,
        &stop,
        &mut stdout.lock(),
    );

    if let Err(e) = subscriber.disconnect() {
        log::warn!("{:#}", e);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() -> Result<()> {
        let config = Args::try_parse_from(["videopub_bench"])?.into_config()?;
        assert_eq!(config.filter, "videopub/stream/#");
        assert_eq!(config.window, Duration::from_secs(1));
        assert!(!config.perf_stats);
        Ok(())
    }

    #[test]
    fn custom_filter_and_window() -> Result<()> {
        let config = Args::try_parse_from([
            "videopub_bench",
            "--input",
            "site/+/door",
            "--window_ms",
            "250",
            "--perf_stats",
        ])?
        .into_config()?;
        assert_eq!(config.filter, "site/+/door");
        assert_eq!(config.window, Duration::from_millis(250));
        assert!(config.perf_stats);
        Ok(())
    }

    #[test]
    fn zero_window_is_rejected() -> Result<()> {
        let args = Args::try_parse_from(["videopub_bench", "--window_ms", "0"])?;
        assert!(args.into_config().is_err());
        Ok(())
    }
}
