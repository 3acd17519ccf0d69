//! Publish side of the pub/sub broker

use crate::config::BrokerConfig;
use crate::error::CnsError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
const REQUEST_CAPACITY: usize = 64;
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Fire-and-forget publisher shared by the broadcaster and the command
/// channel. Publishes are independent; no ordering across callers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), CnsError>;

    fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> Result<(), CnsError>;
}

pub fn qos_from_level(level: u8) -> Result<QoS, CnsError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(CnsError::Config(format!("Invalid QoS level: {}", other))),
    }
}

/// Client id for this node: stable per machine, random otherwise.
pub fn client_id(machine_id: Option<&str>) -> String {
    match machine_id {
        Some(id) if !id.is_empty() => format!("nutricycle-{}", id),
        _ => format!("nutricycle-{}", uuid::Uuid::new_v4().simple()),
    }
}

/// MQTT broker connection backed by rumqttc
pub struct MqttBroker {
    client: AsyncClient,
    qos: QoS,
    connected: Arc<AtomicBool>,
    driver: Mutex<Option<JoinHandle<()>>>,
    address: String,
}

impl MqttBroker {
    /// Connect and wait for the first ConnAck. The background driver keeps
    /// reconnecting afterwards.
    pub async fn connect(config: &BrokerConfig, machine_id: Option<&str>) -> Result<Self, CnsError> {
        let host = config
            .host
            .as_deref()
            .ok_or_else(|| CnsError::Config("No MQTT broker host configured".to_string()))?;
        let qos = qos_from_level(config.qos)?;
        let address = format!("{}:{}", host, config.port);

        let mut options = MqttOptions::new(client_id(machine_id), host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let (first_tx, first_rx) = oneshot::channel();
        let driver = tokio::spawn(drive(eventloop, connected.clone(), first_tx, address.clone()));

        let first = tokio::time::timeout(Duration::from_millis(config.connect_timeout_ms), first_rx).await;
        match first {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(msg))) => {
                driver.abort();
                return Err(CnsError::Transport(format!("MQTT connect to {} failed: {}", address, msg)));
            }
            Ok(Err(_)) => {
                driver.abort();
                return Err(CnsError::Transport(format!("MQTT driver for {} exited", address)));
            }
            Err(_) => {
                driver.abort();
                return Err(CnsError::Transport(format!(
                    "MQTT connect to {} timed out after {} ms",
                    address, config.connect_timeout_ms
                )));
            }
        }

        Ok(Self {
            client,
            qos,
            connected,
            driver: Mutex::new(Some(driver)),
            address,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

async fn drive(
    mut eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    first: oneshot::Sender<Result<(), String>>,
    address: String,
) {
    let mut first = Some(first);
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    connected.store(true, Ordering::SeqCst);
                    info!("Connected to MQTT broker {}", address);
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Ok(()));
                    }
                } else {
                    connected.store(false, Ordering::SeqCst);
                    warn!("MQTT broker {} refused connection: {:?}", address, ack.code);
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Err(format!("{:?}", ack.code)));
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                debug!("MQTT disconnect sent to {}", address);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if connected.swap(false, Ordering::SeqCst) {
                    warn!("MQTT connection to {} lost: {}", address, e);
                } else {
                    debug!("MQTT connect attempt to {} failed: {}", address, e);
                }
                if let Some(tx) = first.take() {
                    let _ = tx.send(Err(e.to_string()));
                }
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        }
    }
}

/// Queue a DISCONNECT request. The request channel may be full with nobody
/// draining it, so give up after `limit`.
async fn request_disconnect(client: &AsyncClient, limit: Duration) -> Result<(), CnsError> {
    match tokio::time::timeout(limit, client.disconnect()).await {
        Ok(result) => result.map_err(|e| CnsError::Transport(e.to_string())),
        Err(_) => Err(CnsError::Transport(format!(
            "MQTT disconnect timed out after {} ms",
            limit.as_millis()
        ))),
    }
}

#[async_trait]
impl Broker for MqttBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), CnsError> {
        if !self.is_connected() {
            return Err(CnsError::NotConnected);
        }
        // Non-blocking: a full request buffer is reported, not waited on.
        self.client
            .try_publish(topic, self.qos, false, payload.to_vec())?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<(), CnsError> {
        let result = request_disconnect(&self.client, DISCONNECT_TIMEOUT).await;
        self.connected.store(false, Ordering::SeqCst);
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
        info!("Disconnected from MQTT broker {}", self.address);
        result
    }
}
