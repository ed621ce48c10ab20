//! Messaging transport.
//!
//! Workers publish through the `Publisher` trait; the MQTT implementation
//! lives in `mqtt`, TLS selection in `tls`. The benchmark consumer uses
//! `MqttSubscriber`, which turns the MQTT receive loop into a channel of
//! inbound messages.

pub mod mqtt;
mod tls;

use anyhow::Result;

pub use mqtt::{InboundMessage, MqttPublisher, MqttSettings, MqttSubscriber};
pub use tls::{TlsMode, TlsSettings};

/// Outbound side of the message bus, shared by all encode workers.
///
/// Implementations must accept concurrent calls. Delivery is fire-and-forget:
/// `Ok` means the message was handed to the client, not that it arrived.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}
