//! # MQTT Broker Link
//!
//! Wraps a `rumqttc` client. [`MqttLink::connect`] blocks until the broker
//! acknowledges the session (or fails), then hands the event loop to a
//! background task that keeps the connection alive, reconnects, and watches
//! the Home Assistant status topic.
//!
//! The bridge only needs the [`Publish`] trait, so tests substitute a
//! recording publisher.

use crate::config::MqttConfig;
use anyhow::{anyhow, bail, Result};
use log::{debug, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Capacity of the client request queue; publishes fail instead of blocking when it is full.
const REQUEST_QUEUE_CAPACITY: usize = 64;

/// Delay before polling again after a connection error (the poll reconnects).
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long shutdown waits for the event loop to flush DISCONNECT.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Payload Home Assistant publishes on its status topic after (re)starting.
const HA_ONLINE: &[u8] = b"online";

#[derive(Debug, Error)]
#[error("Failed to publish to {topic}: {reason}")]
pub struct PublishError {
    pub topic: String,
    pub reason: String,
}

/// Sink for outgoing messages.
pub trait Publish {
    /// Queue `payload` for `topic`. Must not block on the network.
    fn publish(&self, topic: &str, payload: String) -> Result<(), PublishError>;
}

/// Connected MQTT client handle.
#[derive(Clone)]
pub struct MqttLink {
    client: AsyncClient,
}

impl MqttLink {
    /// Connect to the broker and start the background event loop.
    ///
    /// Fails if the broker refuses the connection, is unreachable, or does not
    /// answer within `connect_timeout_secs`; startup is not retried.
    pub async fn connect(config: &MqttConfig) -> Result<(Self, JoinHandle<()>)> {
        let mut options = MqttOptions::new(config.client_id(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);

        info!("MQTT connecting to {}:{}", config.host, config.port);
        let timeout = Duration::from_secs(config.connect_timeout_secs.max(1));
        tokio::time::timeout(timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| {
                anyhow!(
                    "Timed out after {:?} connecting to MQTT broker {}:{}",
                    timeout,
                    config.host,
                    config.port
                )
            })?
            .map_err(|e| {
                anyhow!(
                    "Failed to connect to MQTT broker {}:{}: {}",
                    config.host,
                    config.port,
                    e
                )
            })?;
        info!("MQTT connected");

        // Not using home-assistant status for anything beyond logging yet.
        // TODO: publish MQTT discovery configs once the sensor set is configurable.
        client
            .subscribe(config.status_topic.clone(), QoS::AtMostOnce)
            .await
            .map_err(|e| anyhow!("Failed to subscribe to {}: {}", config.status_topic, e))?;

        let handle = tokio::spawn(drive_event_loop(
            eventloop,
            client.clone(),
            config.status_topic.clone(),
        ));
        Ok((Self { client }, handle))
    }

    /// Queue DISCONNECT and give the event loop a short grace period to send it.
    ///
    /// Never blocks on a full request queue: while the broker is unreachable
    /// rumqttc stops draining it, so a blocking disconnect would hang shutdown.
    pub async fn shutdown(&self, mut events: JoinHandle<()>) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("MQTT disconnect not queued: {}", e);
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut events).await.is_err() {
            debug!("MQTT event loop still busy after {:?}, aborting", SHUTDOWN_GRACE);
            events.abort();
        }
    }
}

impl Publish for MqttLink {
    fn publish(&self, topic: &str, payload: String) -> Result<(), PublishError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| PublishError {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => bail!("{}", e),
        }
    }
}

async fn drive_event_loop(mut eventloop: EventLoop, client: AsyncClient, status_topic: String) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                // Clean session: subscriptions are gone after a reconnect.
                info!("MQTT reconnected");
                if let Err(e) = client.try_subscribe(status_topic.clone(), QoS::AtMostOnce) {
                    warn!("Failed to resubscribe to {}: {}", status_topic, e);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if is_restart_notice(&publish.topic, &publish.payload, &status_topic) {
                    info!("Home-assistant restart detected");
                } else {
                    debug!(
                        "Ignoring MQTT message on {} ({} bytes)",
                        publish.topic,
                        publish.payload.len()
                    );
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent, stopping event loop");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT connection error: {} (retrying)", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// True when Home Assistant announced it came online.
pub fn is_restart_notice(topic: &str, payload: &[u8], status_topic: &str) -> bool {
    topic == status_topic && payload == HA_ONLINE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_online_on_status_topic_is_a_restart() {
        let status = "homeassistant/status";
        assert!(is_restart_notice(status, b"online", status));
        assert!(!is_restart_notice(status, b"offline", status));
        assert!(!is_restart_notice("iot/raw/nrf24/1.2/47", b"online", status));
    }

    #[tokio::test]
    async fn shutdown_returns_with_full_queue_and_no_broker() {
        let mut options = MqttOptions::new("shutdown-test", "127.0.0.1", 1);
        options.set_keep_alive(Duration::from_secs(5));
        let (client, eventloop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);
        let events = tokio::spawn(drive_event_loop(
            eventloop,
            client.clone(),
            "homeassistant/status".to_string(),
        ));
        let link = MqttLink { client };

        let queued = (0..REQUEST_QUEUE_CAPACITY * 2)
            .filter(|i| link.publish("iot/raw/nrf24/1.2/47", format!("t={i}")).is_ok())
            .count();
        assert!(queued <= REQUEST_QUEUE_CAPACITY + 1, "queued {queued}");

        let finished = tokio::time::timeout(Duration::from_secs(5), link.shutdown(events)).await;
        assert!(finished.is_ok(), "shutdown hung with a full request queue");
    }

    #[tokio::test]
    async fn unreachable_broker_fails_fast() {
        let config = MqttConfig {
            host: "127.0.0.1".to_string(),
            // Nothing listens on port 1 in the test environment.
            port: 1,
            connect_timeout_secs: 2,
            ..MqttConfig::default()
        };
        let err = MqttLink::connect(&config).await.err().expect("connect should fail");
        let msg = err.to_string();
        assert!(
            msg.contains("127.0.0.1:1"),
            "error should name the broker: {msg}"
        );
    }
}
