use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::PipelineConfig;
use crate::queue::QueueConfig;
use crate::transport::mqtt::{DEFAULT_MQTT_ADDRESS, DEFAULT_MQTT_PORT};
use crate::transport::{MqttSettings, TlsMode, TlsSettings};

pub const DEFAULT_INPUT: &str = "/dev/video0";
pub const DEFAULT_TOPIC_PREFIX: &str = "videopub/stream";
pub const DEFAULT_THREADS: usize = 4;
pub const DEFAULT_BENCH_FILTER: &str = "videopub/stream/#";
pub const DEFAULT_BENCH_WINDOW_MS: u64 = 1000;

/// Broker flags shared by both binaries.
#[derive(clap::Args, Clone, Debug)]
pub struct MqttArgs {
    /// MQTT broker address.
    #[arg(long = "mqtt_address", env = "VIDEOPUB_MQTT_ADDRESS", default_value = DEFAULT_MQTT_ADDRESS)]
    pub mqtt_address: String,

    /// MQTT broker port.
    #[arg(long = "mqtt_port", env = "VIDEOPUB_MQTT_PORT", default_value_t = DEFAULT_MQTT_PORT)]
    pub mqtt_port: u16,

    /// MQTT username.
    #[arg(long = "mqtt_username", env = "VIDEOPUB_MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    /// MQTT password.
    #[arg(long = "mqtt_password", env = "VIDEOPUB_MQTT_PASSWORD", hide_env_values = true)]
    pub mqtt_password: Option<String>,

    /// Use TLS for MQTT, verifying the broker certificate.
    #[arg(long = "mqtt_tls", env = "VIDEOPUB_MQTT_TLS")]
    pub mqtt_tls: bool,

    /// Skip broker certificate verification (requires --mqtt_tls).
    #[arg(long = "mqtt_tls_insecure", env = "VIDEOPUB_MQTT_TLS_INSECURE")]
    pub mqtt_tls_insecure: bool,

    /// Path to a PEM-encoded CA certificate to trust for MQTT TLS.
    #[arg(long = "mqtt_tls_ca_path", env = "VIDEOPUB_MQTT_TLS_CA_PATH")]
    pub mqtt_tls_ca_path: Option<PathBuf>,

    /// MQTT client identifier.
    #[arg(long = "mqtt_client_id", env = "VIDEOPUB_MQTT_CLIENT_ID")]
    pub mqtt_client_id: Option<String>,
}

impl MqttArgs {
    /// Empty credentials are treated as absent.
    pub fn settings(&self) -> Result<MqttSettings> {
        let settings = MqttSettings {
            address: self.mqtt_address.clone(),
            port: self.mqtt_port,
            username: self.mqtt_username.clone().filter(|u| !u.is_empty()),
            password: self.mqtt_password.clone().filter(|p| !p.is_empty()),
            tls: TlsSettings {
                mode: TlsMode::from_flags(self.mqtt_tls, self.mqtt_tls_insecure)?,
                ca_path: self.mqtt_tls_ca_path.clone(),
            },
        };
        settings.validate()?;
        Ok(settings)
    }
}

/// Validated settings for the publisher binary.
#[derive(Clone, Debug)]
pub struct PublisherConfig {
    pub input: String,
    pub looping: bool,
    pub topic_prefix: String,
    pub instance_id: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: u32,
    pub threads: usize,
    pub mqtt: MqttSettings,
    pub client_id: Option<String>,
    pub queue: QueueConfig,
    pub perf_stats: bool,
    pub hardware_accel: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            input: DEFAULT_INPUT.to_string(),
            looping: false,
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            instance_id: None,
            width: None,
            height: None,
            frame_rate: 0,
            threads: DEFAULT_THREADS,
            mqtt: MqttSettings::default(),
            client_id: None,
            queue: QueueConfig::unbounded(),
            perf_stats: false,
            hardware_accel: false,
        }
    }
}

impl PublisherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.input.trim().is_empty() {
            return Err(anyhow!("--input must not be empty"));
        }
        let id = self.instance_id()?;
        validate_topic_part("--id", id)?;
        for segment in self.topic_prefix.split('/') {
            validate_topic_part("--topic", segment)?;
        }
        match (self.width, self.height) {
            (Some(0), _) | (_, Some(0)) => {
                return Err(anyhow!("--width and --height must be non-zero"))
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(anyhow!("--width and --height must be given together"))
            }
            _ => {}
        }
        if self.threads == 0 {
            return Err(anyhow!("--threads must be at least 1"));
        }
        self.mqtt.validate()
    }

    pub fn instance_id(&self) -> Result<&str> {
        self.instance_id
            .as_deref()
            .ok_or_else(|| anyhow!("--id is required"))
    }

    /// `{topic_prefix}/{instance_id}`.
    pub fn topic(&self) -> Result<String> {
        Ok(format!("{}/{}", self.topic_prefix, self.instance_id()?))
    }

    pub fn rescale(&self) -> Option<(u32, u32)> {
        self.width.zip(self.height)
    }

    pub fn client_id(&self) -> Result<String> {
        match &self.client_id {
            Some(id) => Ok(id.clone()),
            None => Ok(format!("videopub-{}", self.instance_id()?)),
        }
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        self.validate()?;
        Ok(PipelineConfig {
            topic: self.topic()?,
            source_id: self.instance_id()?.to_string(),
            rescale: self.rescale(),
            frame_rate: self.frame_rate,
            workers: self.threads,
            queue: self.queue,
            perf_stats: self.perf_stats,
        })
    }
}

fn validate_topic_part(flag: &str, part: &str) -> Result<()> {
    if part.is_empty() {
        return Err(anyhow!("{} must not be empty or contain empty topic levels", flag));
    }
    if part.contains(['+', '#']) {
        return Err(anyhow!(
            "{} must not contain MQTT wildcards ('+' or '#'): {:?}",
            flag,
            part
        ));
    }
    if part.contains('/') {
        return Err(anyhow!("{} must be a single topic level: {:?}", flag, part));
    }
    Ok(())
}

/// Validated settings for the benchmark consumer.
#[derive(Clone, Debug)]
pub struct BenchConfig {
    /// Subscription filter; wildcards allowed.
    pub filter: String,
    pub mqtt: MqttSettings,
    pub client_id: Option<String>,
    pub window: Duration,
    pub perf_stats: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_BENCH_FILTER.to_string(),
            mqtt: MqttSettings::default(),
            client_id: None,
            window: Duration::from_millis(DEFAULT_BENCH_WINDOW_MS),
            perf_stats: false,
        }
    }
}

impl BenchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.filter.trim().is_empty() {
            return Err(anyhow!("--input topic filter must not be empty"));
        }
        if self.window.is_zero() {
            return Err(anyhow!("--window_ms must be non-zero"));
        }
        self.mqtt.validate()
    }

    pub fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("videopub-bench-{}", std::process::id()))
    }
}
