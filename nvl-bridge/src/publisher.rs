//! Publishing emission records
//!
//! The decoder hands over records; a `Publisher` turns them into
//! (topic, payload) pairs on the message bus.

use crate::config::MqttConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use nvl_decoder::{EmissionRecord, UnknownIdentifierRecord};
use rumqttc::{Client, Connection, MqttOptions, QoS};
use std::time::Duration;

/// Sink for dispatcher output
pub trait Publisher: Send + Sync {
    /// Publish one decoded value
    fn publish_record(&self, record: &EmissionRecord) -> Result<()>;

    /// Publish a telegram whose identifier is not configured
    fn publish_unknown(&self, record: &UnknownIdentifierRecord) -> Result<()>;
}

/// JSON payload for a record
pub fn record_payload(record: &EmissionRecord, timestamp: DateTime<Utc>) -> serde_json::Value {
    serde_json::json!({
        "value": record.value,
        "unit": record.unit,
        "class": record.class,
        "cob_id": record.cob_id,
        "variable": record.variable,
        "timestamp": timestamp.to_rfc3339(),
    })
}

/// Publishes to an MQTT broker
pub struct MqttPublisher {
    client: Client,
    qos: QoS,
    config: MqttConfig,
}

impl MqttPublisher {
    /// Connect to the broker. The connection is driven on a background thread;
    /// rumqttc reconnects on the next poll after an error.
    pub fn connect(config: &MqttConfig) -> Result<Self> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        // Credentials are validated as a pair when the config is parsed
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, connection) = Client::new(options, 100);
        std::thread::Builder::new()
            .name("mqtt-connection".to_string())
            .spawn(move || drive_connection(connection))
            .context("Failed to start MQTT connection thread")?;

        log::info!("MQTT publisher for {}:{}", config.host, config.port);
        Ok(Self {
            client,
            qos: qos_from(config.qos),
            config: config.clone(),
        })
    }
}

impl Publisher for MqttPublisher {
    fn publish_record(&self, record: &EmissionRecord) -> Result<()> {
        let payload = record_payload(record, Utc::now()).to_string();
        self.client
            .publish(record.topic.as_str(), self.qos, record.retain, payload)
            .with_context(|| format!("Failed to publish on {}", record.topic))
    }

    fn publish_unknown(&self, record: &UnknownIdentifierRecord) -> Result<()> {
        let topic = self.config.unknown_topic_for(record.cob_id);
        self.client
            .publish(topic.as_str(), self.qos, false, record.raw.clone())
            .with_context(|| format!("Failed to publish on {}", topic))
    }
}

fn qos_from(level: u8) -> QoS {
    match level {
        2 => QoS::ExactlyOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::AtMostOnce,
    }
}

fn drive_connection(mut connection: Connection) {
    for notification in connection.iter() {
        match notification {
            Ok(event) => log::trace!("MQTT event: {:?}", event),
            Err(e) => {
                log::warn!("MQTT connection error: {}", e);
                std::thread::sleep(Duration::from_secs(1));
            }
        }
    }
    log::debug!("MQTT connection loop ended");
}

/// Prints records instead of publishing them (`--dry-run`)
pub struct StdoutPublisher {
    config: MqttConfig,
}

impl StdoutPublisher {
    pub fn new(config: &MqttConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Topic followed by the raw telegram as lowercase hex
    fn unknown_line(&self, record: &UnknownIdentifierRecord) -> String {
        format!(
            "{} {}",
            self.config.unknown_topic_for(record.cob_id),
            hex::encode(&record.raw)
        )
    }
}

impl Publisher for StdoutPublisher {
    fn publish_record(&self, record: &EmissionRecord) -> Result<()> {
        let retain = if record.retain { " (retain)" } else { "" };
        println!("{}{} {}", record.topic, retain, record_payload(record, Utc::now()));
        Ok(())
    }

    fn publish_unknown(&self, record: &UnknownIdentifierRecord) -> Result<()> {
        println!("{}", self.unknown_line(record));
        Ok(())
    }
}
