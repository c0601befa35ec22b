// MIT License - Copyright (c) 2026 Peter Wright
// rumqttc broker transport

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rumqttc::{
    AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS, Transport,
};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::attributes::AttributeHub;
use crate::error::{BridgeError, Result};
use crate::message::{last_will, ClientIdentity};
use crate::publisher::{BrokerTransport, ConnectionState, Topics};

/// How long a graceful disconnect may spend flushing requests already
/// handed to the client.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Device access token on ThingsBoard.
    pub username: String,
    pub password: Option<String>,
    pub tls: bool,
    pub keep_alive: Duration,
    /// Pause between reconnection attempts after the event loop fails.
    pub reconnect_interval: Duration,
    /// Request channel capacity of the client.
    pub capacity: usize,
}

/// Where an incoming publish should go.
#[derive(Debug, PartialEq, Eq)]
enum Route {
    AttributeUpdate,
    AttributeResponse(u32),
    Unknown,
}

fn route(topics: &Topics, topic: &str) -> Route {
    if topic == topics.attributes {
        return Route::AttributeUpdate;
    }
    match topic
        .strip_prefix(&topics.attribute_response_prefix)
        .map(str::parse::<u32>)
    {
        Some(Ok(id)) => Route::AttributeResponse(id),
        _ => Route::Unknown,
    }
}

fn build_options(settings: &MqttSettings, topics: &Topics, identity: &ClientIdentity) -> MqttOptions {
    let mut opts = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    opts.set_keep_alive(settings.keep_alive);
    opts.set_credentials(
        &settings.username,
        settings.password.as_deref().unwrap_or_default(),
    );
    let will = Value::Object(last_will(identity)).to_string();
    opts.set_last_will(LastWill::new(&topics.status, will, QoS::AtLeastOnce, true));
    if settings.tls {
        opts.set_transport(Transport::tls_with_default_config());
    }
    opts
}

/// Shared between the transport handle and its poller task.
struct Shared {
    state: AtomicU8,
    connects: AtomicU64,
    /// Set once a graceful disconnect is queued.
    closing: AtomicBool,
}

impl Shared {
    fn set(&self, state: ConnectionState) {
        let raw = match state {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        };
        self.state.store(raw, Ordering::SeqCst);
    }

    fn get(&self) -> ConnectionState {
        match self.state.load(Ordering::SeqCst) {
            2 => ConnectionState::Connected,
            1 => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// [`BrokerTransport`] over rumqttc.
///
/// The event loop runs in its own task from the first [`connect`] on and
/// reconnects by itself; attribute topics are resubscribed on every ConnAck.
///
/// [`connect`]: BrokerTransport::connect
pub struct MqttTransport {
    client: AsyncClient,
    eventloop: Mutex<Option<EventLoop>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<Shared>,
    hub: Arc<AttributeHub>,
    topics: Topics,
    reconnect_interval: Duration,
    cancel: CancellationToken,
}

impl MqttTransport {
    pub fn new(
        settings: &MqttSettings,
        topics: Topics,
        identity: &ClientIdentity,
        hub: Arc<AttributeHub>,
    ) -> Self {
        let opts = build_options(settings, &topics, identity);
        let (client, eventloop) = AsyncClient::new(opts, settings.capacity);
        Self {
            client,
            eventloop: Mutex::new(Some(eventloop)),
            poller: Mutex::new(None),
            shared: Arc::new(Shared {
                state: AtomicU8::new(0),
                connects: AtomicU64::new(0),
                closing: AtomicBool::new(false),
            }),
            hub,
            topics,
            reconnect_interval: settings.reconnect_interval,
            cancel: CancellationToken::new(),
        }
    }

    fn spawn_poller(&self, mut eventloop: EventLoop) -> JoinHandle<()> {
        let client = self.client.clone();
        let shared = Arc::clone(&self.shared);
        let hub = Arc::clone(&self.hub);
        let topics = self.topics.clone();
        let interval = self.reconnect_interval;
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let subscriptions = [
                topics.attributes.clone(),
                format!("{}+", topics.attribute_response_prefix),
            ];
            loop {
                let polled = tokio::select! {
                    _ = cancel.cancelled() => break,
                    polled = eventloop.poll() => polled,
                };
                match polled {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // rumqttc does not resubscribe after a reconnect; without
                        // this a broker restart silently stops attribute updates.
                        info!("MQTT: connected, subscribing to attribute topics");
                        for topic in &subscriptions {
                            if let Err(e) = client.try_subscribe(topic, QoS::AtLeastOnce) {
                                error!("Failed to subscribe to {topic}: {e}");
                            }
                        }
                        // subscriptions are queued ahead of anything sent from now on
                        shared.set(ConnectionState::Connected);
                        shared.connects.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(Event::Incoming(Packet::Publish(msg))) => {
                        match route(&topics, &msg.topic) {
                            Route::AttributeUpdate => hub.dispatch_update(&msg.payload),
                            Route::AttributeResponse(id) => hub.dispatch_response(id, &msg.payload),
                            Route::Unknown => debug!("Ignoring publish on {}", msg.topic),
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("MQTT: broker sent disconnect");
                        shared.set(ConnectionState::Disconnected);
                    }
                    // everything queued before the disconnect is on the wire
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        debug!("MQTT: disconnect sent");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) if shared.closing.load(Ordering::SeqCst) => {
                        debug!("MQTT connection closed while disconnecting: {e}");
                        break;
                    }
                    Err(e) => {
                        if shared.get() == ConnectionState::Connected {
                            warn!("MQTT connection lost: {e}");
                        } else {
                            error!("MQTT event loop error: {e}");
                        }
                        shared.set(ConnectionState::Connecting);
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(interval) => {}
                        }
                    }
                }
            }
            shared.set(ConnectionState::Disconnected);
            debug!("MQTT poller stopped");
        })
    }
}

impl BrokerTransport for MqttTransport {
    async fn connect(&self) -> Result<()> {
        let eventloop = self
            .eventloop
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match eventloop {
            Some(eventloop) => {
                if self.cancel.is_cancelled() {
                    return Err(BridgeError::NotConnected);
                }
                self.shared.set(ConnectionState::Connecting);
                let handle = self.spawn_poller(eventloop);
                *self.poller.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
                Ok(())
            }
            // already polling; the event loop reconnects on its own
            None => Ok(()),
        }
    }

    async fn send(&self, topic: &str, payload: String, retain: bool) -> Result<()> {
        if self.shared.get() != ConnectionState::Connected {
            return Err(BridgeError::NotConnected);
        }
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await?;
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.shared.get()
    }

    fn connect_count(&self) -> u64 {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Queue a DISCONNECT behind everything already sent and keep the
    /// event loop running until it goes out, bounded by a timeout.
    async fn disconnect(&self) -> Result<()> {
        if self.shared.get() == ConnectionState::Connected {
            self.shared.closing.store(true, Ordering::SeqCst);
        } else {
            self.cancel.cancel();
        }
        let handle = self.poller.lock().unwrap_or_else(|e| e.into_inner()).take();

        let flush = async {
            if !self.cancel.is_cancelled()
                && let Err(e) = self.client.disconnect().await
            {
                warn!("MQTT disconnect failed: {e}");
                self.cancel.cancel();
            }
            if let Some(handle) = handle {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(DISCONNECT_TIMEOUT, flush).await.is_err() {
            warn!("MQTT poller did not flush in time, dropping the connection");
        }
        self.cancel.cancel();
        self.shared.set(ConnectionState::Disconnected);
        Ok(())
    }
}
