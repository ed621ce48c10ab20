//! MQTT client plumbing (rumqttc, MQTT 3.1.1).
//!
//! The rumqttc `Connection` is driven on a dedicated thread. The first CONNACK
//! is awaited synchronously so that an unreachable or refusing broker fails
//! startup instead of surfacing later as silent message loss. After that,
//! connection errors are logged and the client reconnects on its own.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, Sender};
use rumqttc::{
    Client, ConnectReturnCode, Connection, ConnectionError, Event, Incoming, MqttOptions, Outgoing,
    Publish, QoS,
};
use std::thread::JoinHandle;
use std::time::Duration;

use super::tls::TlsSettings;
use super::Publisher;

pub const DEFAULT_MQTT_ADDRESS: &str = "localhost";
pub const DEFAULT_MQTT_PORT: u16 = 1883;

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Pending requests before `publish` blocks the calling worker.
const REQUEST_CHANNEL_CAPACITY: usize = 64;
/// JPEG frames are far above rumqttc's 10 KiB default packet limit.
const MAX_PACKET_BYTES: usize = 32 * 1024 * 1024;

/// Broker connection settings shared by the publisher and the benchmark.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttSettings {
    pub address: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: TlsSettings,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            address: DEFAULT_MQTT_ADDRESS.to_string(),
            port: DEFAULT_MQTT_PORT,
            username: None,
            password: None,
            tls: TlsSettings::default(),
        }
    }
}

impl MqttSettings {
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(anyhow!("MQTT broker address must not be empty"));
        }
        if self.port == 0 {
            return Err(anyhow!("MQTT broker port must be non-zero"));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(anyhow!("MQTT password provided without a username"));
        }
        self.tls.validate()
    }

    pub fn broker(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    fn options(&self, client_id: &str) -> Result<MqttOptions> {
        let mut options = MqttOptions::new(client_id, self.address.as_str(), self.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        options.set_max_packet_size(MAX_PACKET_BYTES, MAX_PACKET_BYTES);
        if let Some(user) = &self.username {
            options.set_credentials(user.as_str(), self.password.as_deref().unwrap_or_default());
        }
        options.set_transport(self.tls.build_transport()?);
        Ok(options)
    }

    fn open(&self, client_id: &str) -> Result<(Client, Connection)> {
        self.validate()?;
        let (client, mut connection) = Client::new(self.options(client_id)?, REQUEST_CHANNEL_CAPACITY);
        await_connack(&mut connection, &self.broker())?;
        log::info!(
            "MQTT connected to {} (TLS: {}, auth: {})",
            self.broker(),
            self.tls.mode,
            self.username.is_some()
        );
        Ok((client, connection))
    }
}

fn await_connack(connection: &mut Connection, broker: &str) -> Result<()> {
    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    return Ok(());
                }
                return Err(anyhow!(
                    "MQTT broker {} refused connection: {:?}",
                    broker,
                    ack.code
                ));
            }
            Ok(_) => {}
            Err(e) => return Err(anyhow!("failed to connect to MQTT broker {}: {}", broker, e)),
        }
    }
    Err(anyhow!("MQTT connection to {} closed before CONNACK", broker))
}

/// Drive `connection` until the client disconnects or every handle is gone.
///
/// `on_publish` returns false to stop the loop. `on_reconnect` runs after
/// every CONNACK following a connection error.
fn drive_connection(
    mut connection: Connection,
    mut on_publish: impl FnMut(Publish) -> bool,
    mut on_reconnect: impl FnMut(),
) {
    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                if !on_publish(publish) {
                    break;
                }
            }
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                log::info!("MQTT reconnected");
                on_reconnect();
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(ConnectionError::RequestsDone) => break,
            Err(e) => {
                log::warn!("MQTT connection error: {}; reconnecting", e);
                std::thread::sleep(RECONNECT_DELAY);
            }
        }
    }
    log::debug!("MQTT connection loop finished");
}

fn spawn_driver(
    name: &str,
    connection: Connection,
    on_publish: impl FnMut(Publish) -> bool + Send + 'static,
    on_reconnect: impl FnMut() + Send + 'static,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || drive_connection(connection, on_publish, on_reconnect))
        .with_context(|| format!("spawn {name} thread"))
}

fn disconnect(client: &Client, driver: Option<JoinHandle<()>>) -> Result<()> {
    client.disconnect().context("MQTT disconnect")?;
    if let Some(handle) = driver {
        let _ = handle.join();
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Publisher
// ----------------------------------------------------------------------------

/// QoS 0, non-retained publisher.
pub struct MqttPublisher {
    client: Client,
    driver: Option<JoinHandle<()>>,
}

impl MqttPublisher {
    pub fn connect(settings: &MqttSettings, client_id: &str) -> Result<Self> {
        let (client, connection) = settings.open(client_id)?;
        let driver = spawn_driver("videopub-mqtt", connection, |_| true, || {})?;
        Ok(Self {
            client,
            driver: Some(driver),
        })
    }

    /// Flush queued publishes and close the connection.
    pub fn disconnect(mut self) -> Result<()> {
        disconnect(&self.client, self.driver.take())
    }
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .with_context(|| format!("MQTT publish to {topic}"))
    }
}

// ----------------------------------------------------------------------------
// Subscriber
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// QoS 0 subscription whose messages arrive on a channel.
pub struct MqttSubscriber {
    client: Client,
    inbound: Receiver<InboundMessage>,
    driver: Option<JoinHandle<()>>,
}

impl MqttSubscriber {
    pub fn subscribe(settings: &MqttSettings, client_id: &str, filter: &str) -> Result<Self> {
        let (client, connection) = settings.open(client_id)?;
        client
            .subscribe(filter, QoS::AtMostOnce)
            .with_context(|| format!("MQTT subscribe to {filter}"))?;
        log::info!("MQTT subscribed to {}", filter);

        let (tx, inbound): (Sender<InboundMessage>, Receiver<InboundMessage>) =
            crossbeam_channel::unbounded();
        // Clean sessions drop subscriptions on reconnect.
        let resubscriber = client.clone();
        let filter_owned = filter.to_string();
        let driver = spawn_driver(
            "videopub-mqtt-rx",
            connection,
            move |publish| {
                tx.send(InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                })
                .is_ok()
            },
            move || {
                if let Err(e) = resubscriber.try_subscribe(filter_owned.as_str(), QoS::AtMostOnce) {
                    log::warn!("MQTT resubscribe to {} failed: {}", filter_owned, e);
                }
            },
        )?;

        Ok(Self {
            client,
            inbound,
            driver: Some(driver),
        })
    }

    pub fn inbound(&self) -> &Receiver<InboundMessage> {
        &self.inbound
    }

    pub fn disconnect(mut self) -> Result<()> {
        disconnect(&self.client, self.driver.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TlsMode;
    use std::path::PathBuf;

    #[test]
    fn default_settings_match_cli_defaults() {
        let settings = MqttSettings::default();
        assert_eq!(settings.broker(), "localhost:1883");
        assert_eq!(settings.tls.mode, TlsMode::Disabled);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_zero_port_and_empty_address() {
        let settings = MqttSettings {
            port: 0,
            ..MqttSettings::default()
        };
        assert!(settings.validate().is_err());

        let settings = MqttSettings {
            address: " ".to_string(),
            ..MqttSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_password_without_username() {
        let settings = MqttSettings {
            password: Some("secret".to_string()),
            ..MqttSettings::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(format!("{err}").contains("without a username"));
    }

    #[test]
    fn tls_settings_are_validated() {
        let settings = MqttSettings {
            tls: TlsSettings {
                mode: TlsMode::Disabled,
                ca_path: Some(PathBuf::from("/tmp/ca.pem")),
            },
            ..MqttSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn options_carry_credentials() -> Result<()> {
        let settings = MqttSettings {
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            ..MqttSettings::default()
        };
        let options = settings.options("videopub-test")?;
        assert_eq!(options.client_id(), "videopub-test");
        assert_eq!(
            options.credentials(),
            Some(("user".to_string(), "pass".to_string()))
        );
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        Ok(())
    }
}
