//! MQTT client driving the [`IngestListener`]

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::IngestListener;
use crate::config::BusConfig;
use crate::error::{Result, TrackerError};

/// Capacity of the client request queue
const REQUEST_CAPACITY: usize = 16;

/// Pause before polling again after a lost connection
const RETRY_INTERVAL: Duration = Duration::from_secs(1);

fn mqtt_options(config: &BusConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_s));
    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.clone().unwrap_or_default());
    }
    options
}

/// Subscribe to the site topic and feed every publish to `listener`
///
/// Failing to reach the broker before the first acknowledged connection is
/// fatal. Once connected, connection errors are logged and the client keeps
/// reconnecting, resubscribing after each acknowledgement.
///
/// # Errors
///
/// Returns `TrackerError::Bus` if the broker is unreachable at startup
pub async fn run(config: &BusConfig, listener: IngestListener, cancel: CancellationToken) -> Result<()> {
    let (client, mut eventloop) = AsyncClient::new(mqtt_options(config), REQUEST_CAPACITY);
    let topic = config.topic();
    let mut connected = false;

    info!("Connecting to MQTT broker {}:{}", config.host, config.port);

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected = true;
                client
                    .try_subscribe(topic.as_str(), QoS::AtLeastOnce)
                    .map_err(|e| TrackerError::Bus(format!("Failed to subscribe to {}: {}", topic, e)))?;
                info!("Connected to {}:{}, subscribed to {}", config.host, config.port, topic);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                listener.on_message(&publish.topic, &publish.payload);
            }
            Ok(other) => debug!("MQTT event: {:?}", other),
            Err(e) if !connected => {
                return Err(TrackerError::Bus(format!(
                    "Failed to connect to {}:{}: {}",
                    config.host, config.port, e
                )));
            }
            Err(e) => {
                warn!("MQTT connection error: {}, retrying in {:?}", e, RETRY_INTERVAL);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RETRY_INTERVAL) => {}
                }
            }
        }
    }

    if let Err(e) = client.try_disconnect() {
        debug!("MQTT disconnect not sent: {}", e);
    }
    info!("MQTT client stopped");
    Ok(())
}
