//! Configuration for the lux2prom exporter.

use std::path::{Path, PathBuf};

use lux_common::{DEFAULT_BANK, LoggingConfig, MqttConfig, telemetry_topic};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{Catalog, CatalogError};
use crate::http::{HEALTH_PATH, READY_PATH};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// MQTT broker settings.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Which dongle to follow.
    #[serde(default)]
    pub dongle: DongleConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Path to a JSON5 metric catalog. The built-in catalog is used if unset.
    #[serde(default)]
    pub catalog: Option<PathBuf>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Source dongle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DongleConfig {
    /// Dongle serial, used as topic prefix and `dongle` label. Required.
    #[serde(default)]
    pub id: Option<String>,

    /// Register bank topic suffix (default: "inputbank1").
    #[serde(default = "default_bank")]
    pub bank: String,
}

fn default_bank() -> String {
    DEFAULT_BANK.to_string()
}

impl Default for DongleConfig {
    fn default() -> Self {
        Self {
            id: None,
            bank: default_bank(),
        }
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:8000").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Metric name prefix (default: "lux").
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_namespace() -> String {
    "lux".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            namespace: default_namespace(),
        }
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    ///
    /// The result is not validated, so that CLI and environment overrides can
    /// fill in required values first. Call [`validate`](Self::validate) once
    /// all overrides are applied.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(json5::from_str(content)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mqtt
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        match self.dongle.id.as_deref() {
            None | Some("") => {
                return Err(ConfigError::Validation(
                    "Dongle id is required".to_string(),
                ));
            }
            Some(id) if id.contains(['/', '+', '#']) => {
                return Err(ConfigError::Validation(format!(
                    "Dongle id must not contain MQTT topic separators or wildcards: {}",
                    id
                )));
            }
            Some(_) => {}
        }

        if self.dongle.bank.is_empty() || self.dongle.bank.contains(['/', '+', '#']) {
            return Err(ConfigError::Validation(format!(
                "Invalid register bank: {:?}",
                self.dongle.bank
            )));
        }

        // Validate listen address format
        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        // Validate path starts with /
        let path = &self.prometheus.path;
        if !path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }
        if path == HEALTH_PATH || path == READY_PATH {
            return Err(ConfigError::Validation(format!(
                "Metrics path {} is reserved",
                path
            )));
        }
        // Route parameters and wildcards
        if path.contains([':', '*']) {
            return Err(ConfigError::Validation(format!(
                "Metrics path must be a literal path: {}",
                path
            )));
        }

        let namespace = &self.prometheus.namespace;
        if !namespace.is_empty()
            && (namespace.starts_with(|c: char| c.is_ascii_digit())
                || !namespace
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_'))
        {
            return Err(ConfigError::Validation(format!(
                "Invalid metric namespace: {}",
                namespace
            )));
        }

        Ok(())
    }

    /// The configured dongle id, or an empty string if unset.
    pub fn dongle_id(&self) -> &str {
        self.dongle.id.as_deref().unwrap_or_default()
    }

    /// Topic carrying this dongle's readings.
    pub fn topic(&self) -> String {
        telemetry_topic(self.dongle_id(), &self.dongle.bank)
    }

    /// Load the configured catalog, falling back to the built-in one.
    pub fn load_catalog(&self) -> Result<Catalog, ConfigError> {
        let catalog = match &self.catalog {
            Some(path) => Catalog::load_from_file(path)?,
            None => Catalog::builtin()?,
        };
        Ok(catalog)
    }
}
