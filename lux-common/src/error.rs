use thiserror::Error;

/// Common error type for lux2prom components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("MQTT connection error: {0}")]
    Connection(String),
}

impl From<rumqttc::ConnectionError> for Error {
    fn from(e: rumqttc::ConnectionError) -> Self {
        Error::Connection(e.to_string())
    }
}

/// Result type alias using lux2prom's Error.
pub type Result<T> = std::result::Result<T, Error>;
