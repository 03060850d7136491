use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet};

use crate::config::MqttConfig;
use crate::error::{Error, Result};

/// Capacity of the request channel between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 64;

/// Build client options from the configuration.
pub fn mqtt_options(config: &MqttConfig) -> Result<MqttOptions> {
    config.validate()?;

    let host = config
        .host
        .clone()
        .ok_or_else(|| Error::Config("MQTT host is required".to_string()))?;
    let client_id = format!("{}-{}", config.client_id_prefix, std::process::id());

    let mut options = MqttOptions::new(client_id, host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

    if let Some(username) = &config.username {
        options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
    }

    Ok(options)
}

/// Connect to the MQTT broker using the provided configuration.
///
/// Drives the event loop until the broker acknowledges the connection, so an
/// unreachable or refusing broker is reported here rather than on the first
/// message.
pub async fn connect(config: &MqttConfig) -> Result<(AsyncClient, EventLoop)> {
    let options = mqtt_options(config)?;

    tracing::info!(
        host = ?config.host,
        port = config.port,
        client_id = %options.client_id(),
        "Connecting to MQTT broker"
    );

    let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code != ConnectReturnCode::Success {
                    return Err(Error::Connection(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )));
                }
                tracing::info!(
                    session_present = ack.session_present,
                    "Connected to MQTT broker"
                );
                return Ok((client, eventloop));
            }
            event => {
                tracing::trace!(?event, "MQTT event before CONNACK");
            }
        }
    }
}
