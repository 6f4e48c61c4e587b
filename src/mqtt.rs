//! Thin MQTT facade used by device workers to publish scaled samples.

use std::time::Duration;

use rumqttc::{AsyncClient, ConnectionError, Event, MqttOptions, Packet, QoS};
use tracing::{error, info, warn};

use crate::config::MqttConfig;
use crate::error::{Error, Result};

const TOPIC_MAX: usize = 1024;

/// Holds the connected client plus the base topic prefix every publish
/// is concatenated onto.
pub struct Mqtt {
    client: AsyncClient,
    base_topic: String,
}

impl Mqtt {
    /// Connect to the broker, retrying indefinitely on connection
    /// refusal (matching the original's startup posture): any other
    /// failure is fatal. Spawns a background task that drives the
    /// event loop for the lifetime of the process; rumqttc reconnects
    /// on unexpected disconnect on its own ("STOP. GIVING. UP!" in the
    /// original is this same infinite-retry behaviour).
    pub async fn connect(config: &MqttConfig) -> Result<Self> {
        let mut options = MqttOptions::new(config.client_id.clone(), config.ip.to_string(), config.port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(options, 100);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(broker = %config.ip, port = config.port, "connected to mqtt broker");
                    break;
                }
                Ok(_) => continue,
                Err(ConnectionError::Io(e))
                    if e.kind() == std::io::ErrorKind::ConnectionRefused =>
                {
                    warn!("mqtt broker connection refused, retrying in 1s");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    return Err(Error::FatalStartup(format!(
                        "mqtt connection failed: {e}"
                    )));
                }
            }
        }

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt event loop error, rumqttc will retry");
                    }
                }
            }
        });

        Ok(Mqtt {
            client,
            base_topic: config.topic.clone(),
        })
    }

    /// Publish `bytes` on `{base_topic}/{topic_suffix}`, stripping a
    /// leading slash from the suffix so callers can pass poll topics
    /// that start with `/` without doubling the separator.
    pub async fn publish(&self, topic_suffix: &str, bytes: &[u8]) -> Result<()> {
        let suffix = topic_suffix.strip_prefix('/').unwrap_or(topic_suffix);
        let topic = format!("{}/{}", self.base_topic, suffix);
        if topic.len() > TOPIC_MAX {
            return Err(Error::InvalidInput(format!(
                "topic '{topic}' exceeds {TOPIC_MAX} bytes"
            )));
        }
        self.client
            .publish(topic, QoS::AtMostOnce, false, bytes)
            .await
            .map_err(|e| Error::TransportError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leading_slash_before_concatenation() {
        let suffix = "/t";
        let stripped = suffix.strip_prefix('/').unwrap_or(suffix);
        assert_eq!(stripped, "t");
        assert_eq!(format!("base/{stripped}"), "base/t");
    }

    #[test]
    fn topic_over_max_is_rejected() {
        let base = "base";
        let suffix = "x".repeat(TOPIC_MAX);
        let topic = format!("{base}/{suffix}");
        assert!(topic.len() > TOPIC_MAX);
    }
}
