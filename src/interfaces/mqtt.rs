use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use rumqttc::{AsyncClient, Event as MqttEvent, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::constants::topics;
use crate::helpers::rand_hex;
use crate::knot::{dispatch, DeviceUpdate, Event, RoutingKey, Snapshot};

#[derive(Error, Debug)]
pub enum MqttError {
    #[error(transparent)]
    MqttClient(#[from] rumqttc::ClientError),
    #[error("could not encode registry: {0}")]
    Json(#[from] serde_json::Error),
}

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

pub fn get_rand_client_id(prefix: Option<&str>) -> String {
    const RAND_ID_BYTES: usize = 3;
    let randhex = rand_hex(RAND_ID_BYTES);

    if let Some(pref) = prefix {
        format!("{pref}-{randhex}")
    } else {
        randhex
    }
}

pub fn client_conn(host: &str, port: u16, client_id: String) -> (AsyncClient, EventLoop) {
    log::info!("Establishing MQTT connection to {host}:{port} as {client_id}");

    let mut mqttoptions = MqttOptions::new(client_id, host, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    mqttoptions.set_clean_session(true);

    AsyncClient::new(mqttoptions, 100)
}

/// Every topic the gateway listens on
pub fn inbound_topics() -> Vec<&'static str> {
    RoutingKey::ALL
        .into_iter()
        .map(RoutingKey::as_str)
        .chain([topics::GATEWAY_DEVICE])
        .collect()
}

/// Drive the connection and turn incoming publishes into protocol events.
///
/// Subscriptions are renewed on every (re)connect. Connection errors are
/// retried with exponential backoff until `shutdown` fires.
pub async fn run_subscriber(
    client: AsyncClient,
    mut eventloop: EventLoop,
    events: flume::Sender<Event>,
    shutdown: CancellationToken,
) {
    let mut backoff = ExponentialBackoff {
        max_elapsed_time: None,
        ..Default::default()
    };

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                log::debug!("MQTT subscriber shutting down");
                disconnect(&client, &mut eventloop).await;
                return;
            }
            notification = eventloop.poll() => match notification {
                Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => {
                    log::info!("Connected to MQTT broker");
                    backoff.reset();
                    if let Err(e) = subscribe(&client).await {
                        log::error!("Could not subscribe: {e}");
                    }
                }
                Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                    route(&publish.topic, &publish.payload, &events).await;
                }
                Ok(notification) => log::trace!("Notification = {:?}", notification),
                Err(e) => {
                    let delay = backoff.next_backoff().unwrap_or(backoff.max_interval);
                    log::warn!("MQTT connection error: {e}; retrying in {delay:?}");
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

/// Queue a DISCONNECT and keep polling until it is on the wire
pub async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(e) = client.disconnect().await {
        log::debug!("Could not request MQTT disconnect: {e}");
        return;
    }

    let flush = async {
        loop {
            match eventloop.poll().await {
                Ok(MqttEvent::Outgoing(Outgoing::Disconnect)) => {
                    log::debug!("Disconnected from MQTT broker");
                    return;
                }
                Ok(notification) => log::trace!("Notification = {:?}", notification),
                Err(e) => {
                    log::debug!("MQTT connection closed before disconnect: {e}");
                    return;
                }
            }
        }
    };
    if tokio::time::timeout(DISCONNECT_TIMEOUT, flush).await.is_err() {
        log::warn!("MQTT disconnect not sent within {DISCONNECT_TIMEOUT:?}");
    }
}

async fn subscribe(client: &AsyncClient) -> Result<(), MqttError> {
    for topic in inbound_topics() {
        log::info!("Subscribing to {}", topic);
        client.subscribe(topic, QoS::AtLeastOnce).await?;
    }
    Ok(())
}

/// Forward one message into the event stream; anything undecodable is dropped
pub async fn route(topic: &str, payload: &[u8], events: &flume::Sender<Event>) {
    let event = if topic == topics::GATEWAY_DEVICE {
        match serde_json::from_slice::<DeviceUpdate>(payload) {
            Ok(update) => Event::Submitted(update),
            Err(e) => {
                log::warn!("Discarding device snapshot on {topic}: {e}");
                return;
            }
        }
    } else {
        match dispatch(topic, payload) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                log::warn!("Discarding message on {topic}: {e}");
                return;
            }
        }
    };

    if events.send_async(event).await.is_err() {
        log::debug!("Event stream closed; message on {topic} dropped");
    }
}

/// Mirror every relayed registry snapshot to a retained topic
pub async fn publish_registry(
    client: AsyncClient,
    snapshots: flume::Receiver<Snapshot>,
    shutdown: CancellationToken,
) {
    loop {
        let snapshot = tokio::select! {
            _ = shutdown.cancelled() => return,
            snapshot = snapshots.recv_async() => match snapshot {
                Ok(snapshot) => snapshot,
                Err(_) => return,
            }
        };
        if let Err(e) = publish_snapshot(&client, &snapshot).await {
            log::error!("Could not publish device registry: {e}");
        }
    }
}

async fn publish_snapshot(client: &AsyncClient, snapshot: &Snapshot) -> Result<(), MqttError> {
    let payload = serde_json::to_vec(snapshot)?;
    log::debug!(
        "Publishing registry of {} device(s) to {}",
        snapshot.len(),
        topics::GATEWAY_REGISTRY
    );
    client
        .publish(topics::GATEWAY_REGISTRY, QoS::AtLeastOnce, true, payload)
        .await?;
    Ok(())
}
