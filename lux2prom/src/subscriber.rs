//! MQTT subscriber feeding the dispatcher.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::dispatcher::SharedDispatcher;

/// Delay before polling again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Consumes readings from one dongle topic and dispatches them sequentially.
pub struct TelemetrySubscriber {
    dispatcher: SharedDispatcher,
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
}

impl TelemetrySubscriber {
    /// Create a subscriber from an already connected client.
    pub fn new(
        dispatcher: SharedDispatcher,
        client: AsyncClient,
        eventloop: EventLoop,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            client,
            eventloop,
            topic: topic.into(),
        }
    }

    /// Subscribe and process messages until the shutdown signal is received.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        self.client
            .subscribe(self.topic.as_str(), QoS::AtMostOnce)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to subscribe to {}: {}", self.topic, e))?;

        info!(topic = %self.topic, "Subscribed to telemetry topic");

        loop {
            tokio::select! {
                event = self.eventloop.poll() => {
                    match event {
                        Ok(event) => self.handle_event(event),
                        Err(e) => {
                            warn!(
                                error = %e,
                                retry_in_secs = RECONNECT_DELAY.as_secs(),
                                "MQTT connection error"
                            );
                            tokio::select! {
                                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                                _ = shutdown.changed() => {}
                            }
                        }
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }

            if *shutdown.borrow() {
                break;
            }
        }

        info!("Disconnecting from the MQTT broker");
        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "Disconnect request failed");
        } else {
            // Flush the DISCONNECT packet
            let _ = tokio::time::timeout(Duration::from_secs(1), self.eventloop.poll()).await;
        }

        Ok(())
    }

    fn handle_event(&self, event: Event) {
        match event {
            Event::Incoming(Packet::Publish(publish)) => {
                if publish.topic != self.topic {
                    debug!(topic = %publish.topic, "Ignoring message on unexpected topic");
                    return;
                }
                // Per-message errors are logged by the dispatcher
                let _ = self.dispatcher.dispatch(&publish.payload);
            }
            Event::Incoming(Packet::ConnAck(_)) => {
                // Clean sessions drop subscriptions across reconnects
                info!(topic = %self.topic, "Reconnected, resubscribing");
                if let Err(e) = self.client.try_subscribe(self.topic.as_str(), QoS::AtMostOnce) {
                    warn!(error = %e, "Failed to resubscribe");
                }
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                debug!(pkid = ack.pkid, "Subscription acknowledged");
            }
            other => {
                trace!(event = ?other, "MQTT event");
            }
        }
    }
}
