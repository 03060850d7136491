use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// MQTT broker connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name or address. Required.
    #[serde(default)]
    pub host: Option<String>,

    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Optional username for broker authentication.
    #[serde(default)]
    pub username: Option<String>,

    /// Password used together with `username`.
    #[serde(default)]
    pub password: Option<String>,

    /// Prefix of the MQTT client id; the process id is appended.
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_port() -> u16 {
    1883
}

fn default_client_id_prefix() -> String {
    "lux2prom".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            username: None,
            password: None,
            client_id_prefix: default_client_id_prefix(),
            keep_alive_secs: default_keep_alive(),
        }
    }
}

impl MqttConfig {
    /// Check that the required connection settings are present.
    pub fn validate(&self) -> Result<()> {
        match self.host.as_deref() {
            None | Some("") => {
                return Err(Error::Config("MQTT host is required".to_string()));
            }
            Some(_) => {}
        }

        if self.keep_alive_secs < 5 {
            return Err(Error::Config(
                "MQTT keep_alive_secs must be >= 5".to_string(),
            ));
        }

        if self.password.is_some() && self.username.is_none() {
            return Err(Error::Config(
                "MQTT password given without a username".to_string(),
            ));
        }

        Ok(())
    }

    /// The password with every character replaced by `*`, for display.
    pub fn masked_password(&self) -> String {
        self.password
            .as_deref()
            .map(|p| "*".repeat(p.chars().count()))
            .unwrap_or_default()
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        mqtt: MqttConfig,
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    fn test_parse_mqtt_config() {
        let json5 = r#"
        {
            mqtt: {
                host: "broker.local",
                port: 8883,
                username: "lux",
                password: "secret",
            },
            logging: {
                level: "debug",
            },
        }
        "#;

        let config: TestConfig = json5::from_str(json5).unwrap();

        assert_eq!(config.mqtt.host.as_deref(), Some("broker.local"));
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.username.as_deref(), Some("lux"));
        assert_eq!(config.mqtt.masked_password(), "******");
        assert_eq!(config.logging.level, "debug");
        assert!(config.mqtt.validate().is_ok());
    }

    #[test]
    fn test_default_config() {
        let config: TestConfig = json5::from_str("{}").unwrap();

        assert_eq!(config.mqtt.host, None);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.keep_alive_secs, 60);
        assert_eq!(config.mqtt.client_id_prefix, "lux2prom");
        assert_eq!(config.mqtt.masked_password(), "");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_missing_host_is_rejected() {
        let config = MqttConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("host is required"));

        let config = MqttConfig {
            host: Some(String::new()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_password_without_username_is_rejected() {
        let config = MqttConfig {
            host: Some("localhost".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_logging_format() {
        let json5 = r#"{ logging: { level: "debug", format: "json" } }"#;

        let config: TestConfig = json5::from_str(json5).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
