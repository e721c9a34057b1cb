//! Configuration loading and parsing

use anyhow::{Context, Result};
use nvl_decoder::{NvlConfig, Registry};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main application configuration (loaded from a TOML file)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub nvl: NvlConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Largest accepted datagram; longer ones are dropped, not truncated
    #[serde(default = "default_max_datagram")]
    pub max_datagram: usize,
    /// Packets buffered between the receive loop and the workers
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_datagram: default_max_datagram(),
            queue_depth: default_queue_depth(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:1202".to_string()
}

/// Largest UDP payload over IPv4
pub const MAX_UDP_PAYLOAD: usize = 65507;

fn default_max_datagram() -> usize {
    MAX_UDP_PAYLOAD
}

fn default_queue_depth() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MqttConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// 0, 1 or 2
    #[serde(default)]
    pub qos: u8,
    /// Topic for telegrams with an unknown identifier; `{cob_id}` is substituted
    #[serde(default = "default_unknown_topic")]
    pub unknown_topic: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            qos: 0,
            unknown_topic: default_unknown_topic(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "nvl-bridge".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_unknown_topic() -> String {
    "nvl/unknown/{cob_id}".to_string()
}

impl MqttConfig {
    /// Topic for an unknown identifier
    pub fn unknown_topic_for(&self, cob_id: u32) -> String {
        self.unknown_topic.replace("{cob_id}", &cob_id.to_string())
    }
}

/// Parse configuration text and validate the NVL section.
///
/// Returns the config together with the registry built from it, so a file is
/// either accepted as a whole or rejected as a whole.
pub fn parse_config(content: &str) -> Result<(AppConfig, Registry)> {
    let config: AppConfig = toml::from_str(content).context("Failed to parse TOML")?;

    if config.mqtt.qos > 2 {
        anyhow::bail!("mqtt.qos must be 0, 1 or 2, got {}", config.mqtt.qos);
    }
    if !(1..=MAX_UDP_PAYLOAD).contains(&config.listen.max_datagram) {
        anyhow::bail!(
            "listen.max_datagram must be between 1 and {}, got {}",
            MAX_UDP_PAYLOAD,
            config.listen.max_datagram
        );
    }
    if config.listen.queue_depth == 0 {
        anyhow::bail!("listen.queue_depth must be positive");
    }
    if config.mqtt.username.is_some() != config.mqtt.password.is_some() {
        anyhow::bail!("mqtt.username and mqtt.password must be set together");
    }

    let registry = Registry::load(&config.nvl).context("Invalid NVL definitions")?;
    Ok((config, registry))
}

/// Load and validate configuration from a TOML file
pub fn load_config(path: &Path) -> Result<(AppConfig, Registry)> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    parse_config(&content).with_context(|| format!("Invalid config file: {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [listen]
        bind = "127.0.0.1:1202"

        [mqtt]
        host = "broker.local"
        qos = 1

        [nvl]
        on_change = true
        header_bytes = 20

        [nvl.identifier]
        offset = 8
        width = 2

        [[nvl.lists]]
        cob_id = 386
        topic = "plc/hall"

        [[nvl.lists.variables]]
        name = "temperature"
        type = "REAL"
        precision = 1
        unit = "°C"
        class = "temperature"

        [[nvl.lists.variables]]
        name = "light"
        type = "BOOL"
        retain = true
    "#;

    #[test]
    fn test_config_deserialization() {
        let (config, registry) = parse_config(SAMPLE).unwrap();
        assert_eq!(config.listen.bind, "127.0.0.1:1202");
        assert_eq!(config.listen.max_datagram, MAX_UDP_PAYLOAD);
        assert_eq!(config.listen.queue_depth, 1024);
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 1883);

        let def = registry.lookup(386).unwrap();
        assert_eq!(def.variables.len(), 2);
        assert_eq!(def.variables[0].precision, 1);
        assert!(def.variables[1].retain);
    }

    #[test]
    fn test_defaults_for_empty_file() {
        let (config, registry) = parse_config("").unwrap();
        assert_eq!(config.listen.bind, "0.0.0.0:1202");
        assert_eq!(config.mqtt.unknown_topic_for(385), "nvl/unknown/385");
        assert_eq!(registry.stats().num_lists, 0);
    }

    #[test]
    fn test_invalid_definition_rejects_whole_file() {
        let bad = SAMPLE.replace("type = \"BOOL\"", "type = \"STRING\"");
        let err = parse_config(&bad).unwrap_err();
        assert!(format!("{:#}", err).contains("unknown type tag"));
    }

    #[test]
    fn test_example_file_is_valid() {
        let (_, registry) = parse_config(include_str!("../nvl.example.toml")).unwrap();
        assert_eq!(registry.cob_ids(), vec![386, 387]);
        assert_eq!(registry.lookup(386).unwrap().required_length(), 27);
        assert!(!registry.on_change_for(registry.lookup(387).unwrap()));
    }

    #[test]
    fn test_invalid_qos() {
        let bad = SAMPLE.replace("qos = 1", "qos = 3");
        assert!(parse_config(&bad).is_err());
    }

    #[test]
    fn test_max_datagram_bounds() {
        let with = |value: &str| SAMPLE.replace("[mqtt]", &format!("max_datagram = {}\n[mqtt]", value));

        let (config, _) = parse_config(&with("65507")).unwrap();
        assert_eq!(config.listen.max_datagram, 65507);
        let (config, _) = parse_config(&with("1")).unwrap();
        assert_eq!(config.listen.max_datagram, 1);

        let err = parse_config(&with("65508")).unwrap_err();
        assert!(format!("{:#}", err).contains("between 1 and 65507"));
        assert!(parse_config(&with("0")).is_err());
    }

    #[test]
    fn test_credentials_must_be_paired() {
        let user_only = SAMPLE.replace("qos = 1", "qos = 1\nusername = \"plc\"");
        let err = parse_config(&user_only).unwrap_err();
        assert!(format!("{:#}", err).contains("username and mqtt.password"));

        let pass_only = SAMPLE.replace("qos = 1", "qos = 1\npassword = \"secret\"");
        assert!(parse_config(&pass_only).is_err());

        let both = SAMPLE.replace("qos = 1", "qos = 1\nusername = \"plc\"\npassword = \"secret\"");
        let (config, _) = parse_config(&both).unwrap();
        assert_eq!(config.mqtt.username.as_deref(), Some("plc"));
    }
}
