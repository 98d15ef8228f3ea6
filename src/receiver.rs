//! MQTT broker receivers
//!
//! One receiver per configured broker, each driving its own `rumqttc`
//! event loop in a dedicated task. Subscriptions are (re)issued on every
//! CONNACK so they survive reconnects, and connection errors back off for
//! a fixed delay before polling again. Publish packets are forwarded to
//! the supervisor as raw byte events; decoding happens there.

use crate::config::{Broker, ListenDescriptor};
use crate::data::DataIdentifier;
use crate::supervisor::BrokerEvent;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Delay before polling again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Capacity of the request channel between `AsyncClient` and its event
/// loop; subscriptions are the only requests we issue.
const CLIENT_QUEUE_CAPACITY: usize = 16;

/// Subscribes to one broker and forwards everything it publishes.
pub struct BrokerReceiver {
    descriptor: ListenDescriptor,
    events: mpsc::UnboundedSender<BrokerEvent>,
}

impl BrokerReceiver {
    pub fn new(
        descriptor: ListenDescriptor,
        events: mpsc::UnboundedSender<BrokerEvent>,
    ) -> Self {
        Self { descriptor, events }
    }

    /// Connect and pump the event loop until the stop signal arrives or
    /// the supervisor goes away. Reconnection is handled by polling
    /// again after a delay; rumqttc re-establishes the session.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let broker = &self.descriptor.broker;
        let (client, mut event_loop) = AsyncClient::new(mqtt_options(broker), CLIENT_QUEUE_CAPACITY);
        info!(broker = %broker, "receiver started");

        loop {
            tokio::select! {
                event = event_loop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!(broker = %broker, code = ?ack.code, "broker connected");
                        for topic in &self.descriptor.subscriptions {
                            if let Err(e) = client.subscribe(topic.clone(), QoS::AtMostOnce).await {
                                error!(broker = %broker, topic = %topic, "subscribe failed: {e}");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let event = BrokerEvent {
                            id: DataIdentifier::new(broker.name.clone(), publish.topic.clone()),
                            payload: publish.payload.to_vec(),
                        };
                        if self.events.send(event).is_err() {
                            debug!(broker = %broker, "supervisor gone, receiver exiting");
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(
                            broker = %broker,
                            "connection error: {e}, retrying in {}s",
                            RECONNECT_DELAY.as_secs()
                        );
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                },
                _ = shutdown.recv() => {
                    // Fire-and-forget: the broker notices the disconnect
                    // on its own if the request never makes it out.
                    let _ = client.disconnect().await;
                    break;
                }
            }
        }
        debug!(broker = %broker, "receiver stopped");
    }
}

/// Connection options for one configured broker. The client id is derived
/// from the broker name so parallel bridge instances against the same
/// broker need distinct broker names, not distinct binaries.
fn mqtt_options(broker: &Broker) -> MqttOptions {
    let mut options = MqttOptions::new(
        format!("mqspeak-{}", broker.name),
        broker.host.clone(),
        broker.port,
    );
    options.set_keep_alive(KEEP_ALIVE);
    if let Some(credentials) = &broker.credentials {
        options.set_credentials(credentials.user.clone(), credentials.password.clone());
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;

    fn broker(credentials: Option<Credentials>) -> Broker {
        Broker {
            name: "local".to_string(),
            host: "10.0.0.7".to_string(),
            port: 1884,
            credentials,
        }
    }

    #[test]
    fn options_follow_broker_configuration() {
        let options = mqtt_options(&broker(None));
        assert_eq!(options.client_id(), "mqspeak-local");
        assert_eq!(options.broker_address(), ("10.0.0.7".to_string(), 1884));
        assert_eq!(options.keep_alive(), KEEP_ALIVE);
        assert_eq!(options.credentials(), None);
    }

    #[test]
    fn credentials_are_passed_through() {
        let options = mqtt_options(&broker(Some(Credentials {
            user: "bridge".to_string(),
            password: "secret".to_string(),
        })));
        assert_eq!(
            options.credentials(),
            Some(("bridge".to_string(), "secret".to_string()))
        );
    }
}
