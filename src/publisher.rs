// MIT License - Copyright (c) 2026 Peter Wright
// Broker publisher and queue drain loop

//! The [`Publisher`] sits between the [`DurableQueue`] and a
//! [`BrokerTransport`]. Producers either hand it a message directly
//! ([`Publisher::publish`]) or enqueue it; the drain loop
//! ([`Publisher::run`]) empties the queue whenever the broker is connected
//! and the [`RateLimiter`] admits another send.
//!
//! A message that fails on the wire is appended back to the tail of the
//! queue before the failure is reported. Delivery is at-least-once.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::attributes::{AttributeCallback, AttributeHub, ResponseCallback};
use crate::backoff::{sleep_or_cancel, Backoff};
use crate::error::{BridgeError, Result};
use crate::message::{connected_status, ClientIdentity, OutboundMessage, PublishKind};
use crate::queue::DurableQueue;
use crate::rate_limit::RateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Publish/subscribe transport to the broker.
///
/// Implementations report their state as the underlying connection goes up
/// and down; the publisher only reads it.
pub trait BrokerTransport: Send + Sync + 'static {
    /// Start (or restart) connecting. Returns once the attempt is under way;
    /// completion is observed through [`BrokerTransport::state`].
    fn connect(&self) -> impl Future<Output = Result<()>> + Send;

    fn send(&self, topic: &str, payload: String, retain: bool)
    -> impl Future<Output = Result<()>> + Send;

    fn state(&self) -> ConnectionState;

    /// Number of connections established so far. Changes on every reconnect.
    fn connect_count(&self) -> u64;

    fn disconnect(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Whether a message may be buffered when it cannot be sent right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Buffered,
    /// High-rate, low-value telemetry: drop instead of queueing.
    DropIfUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Sent,
    Queued,
    Dropped,
}

/// Broker topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub telemetry: String,
    pub attributes: String,
    pub attribute_request_prefix: String,
    pub attribute_response_prefix: String,
    /// Retained connection status and last will.
    pub status: String,
}

impl Default for Topics {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            telemetry: TOPIC_TELEMETRY.to_string(),
            attributes: TOPIC_ATTRIBUTES.to_string(),
            attribute_request_prefix: TOPIC_ATTRIBUTE_REQUEST.to_string(),
            attribute_response_prefix: TOPIC_ATTRIBUTE_RESPONSE.to_string(),
            status: TOPIC_TELEMETRY.to_string(),
        }
    }
}

impl Topics {
    pub fn for_kind(&self, kind: PublishKind) -> &str {
        match kind {
            PublishKind::Telemetry => &self.telemetry,
            PublishKind::Attribute => &self.attributes,
        }
    }
}

/// Drain loop timing.
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    /// Wait after a failed send before the next attempt.
    pub retry_interval: Duration,
    /// Wait after the rate limiter denies a send.
    pub rate_pause: Duration,
    /// Re-check interval while connecting or idle.
    pub poll_interval: Duration,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            rate_pause: Duration::from_millis(200),
            poll_interval: Duration::from_secs(1),
            reconnect_base: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(60),
        }
    }
}

pub struct Publisher<T: BrokerTransport> {
    transport: Arc<T>,
    queue: Arc<DurableQueue>,
    limiter: Arc<RateLimiter>,
    hub: Arc<AttributeHub>,
    topics: Topics,
    settings: PublisherSettings,
    identity: Mutex<ClientIdentity>,
    serial_up: Arc<AtomicBool>,
}

impl<T: BrokerTransport> Publisher<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<T>,
        queue: Arc<DurableQueue>,
        limiter: Arc<RateLimiter>,
        hub: Arc<AttributeHub>,
        topics: Topics,
        settings: PublisherSettings,
        identity: ClientIdentity,
        serial_up: Arc<AtomicBool>,
    ) -> Self {
        Self {
            transport,
            queue,
            limiter,
            hub,
            topics,
            settings,
            identity: Mutex::new(identity),
            serial_up,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn queue(&self) -> &Arc<DurableQueue> {
        &self.queue
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Panel model id reported in status messages from now on.
    pub fn set_panel_model_id(&self, id: u32) {
        let mut identity = self.identity.lock().unwrap_or_else(|e| e.into_inner());
        *identity = identity.with_model_id(id);
    }

    /// Start connecting and wait up to `timeout` for the broker to accept.
    pub async fn connect(&self, timeout: Duration) -> Result<()> {
        info!("Connecting to broker");
        self.transport.connect().await?;
        let wait = async {
            while self.transport.state() != ConnectionState::Connected {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| BridgeError::ConnectionTimeout)
    }

    /// Send now if possible, otherwise buffer or drop per `delivery`.
    ///
    /// A failed wire send is queued again (when buffered) before the
    /// error is returned.
    pub async fn publish(&self, msg: OutboundMessage, delivery: Delivery) -> Result<PublishOutcome> {
        if self.transport.state() != ConnectionState::Connected {
            return Ok(self.hold(msg, delivery, "broker not connected"));
        }
        let Some(admission) = self.limiter.try_admit() else {
            return Ok(self.hold(msg, delivery, "rate limit reached"));
        };
        match self.send(&msg).await {
            Ok(()) => Ok(PublishOutcome::Sent),
            Err(e) => {
                self.limiter.refund(admission);
                if delivery == Delivery::Buffered {
                    self.queue.enqueue(msg);
                    warn!("Publish failed, message queued for retry: {e}");
                } else {
                    debug!("Publish failed, message dropped: {e}");
                }
                Err(e)
            }
        }
    }

    fn hold(&self, msg: OutboundMessage, delivery: Delivery, reason: &str) -> PublishOutcome {
        match delivery {
            Delivery::Buffered => {
                debug!("{reason}, queueing message");
                self.queue.enqueue(msg);
                PublishOutcome::Queued
            }
            Delivery::DropIfUnavailable => {
                debug!("{reason}, dropping message");
                PublishOutcome::Dropped
            }
        }
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        let topic = self.topics.for_kind(msg.kind());
        self.transport.send(topic, msg.to_json(), false).await
    }

    /// Retained status message, sent once per broker connection.
    async fn announce(&self) {
        let serial_up = self.serial_up.load(Ordering::Relaxed);
        let payload = {
            let identity = self.identity.lock().unwrap_or_else(|e| e.into_inner());
            connected_status(&identity, serial_up)
        };
        let json = Value::Object(payload).to_string();
        match self.transport.send(&self.topics.status, json, true).await {
            Ok(()) => info!("Broker connected, status published (serial up: {serial_up})"),
            Err(e) => warn!("Failed to publish connection status: {e}"),
        }
    }

    /// Drain the queue until cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let s = &self.settings;
        let mut backoff = Backoff::new(s.reconnect_base, s.reconnect_cap);
        let mut announced = 0u64;

        while !cancel.is_cancelled() {
            match self.transport.state() {
                ConnectionState::Connected => {
                    backoff.reset();
                    let count = self.transport.connect_count();
                    if count != announced {
                        announced = count;
                        self.announce().await;
                    }
                    if !self.drain_one(&cancel).await? {
                        break;
                    }
                }
                ConnectionState::Connecting => {
                    if !sleep_or_cancel(&cancel, s.poll_interval).await {
                        break;
                    }
                }
                ConnectionState::Disconnected => {
                    match self.transport.connect().await {
                        Ok(()) => {}
                        Err(e) if e.is_retryable() => warn!("Broker connect failed: {e}"),
                        Err(e) => return Err(e),
                    }
                    let delay = backoff.next_delay();
                    debug!("Waiting {delay:?} for broker connection");
                    if !sleep_or_cancel(&cancel, delay).await {
                        break;
                    }
                }
            }
        }
        debug!("Drain loop stopped with {} queued", self.queue.len());
        Ok(())
    }

    /// One step of the drain loop. Returns `false` if cancelled.
    ///
    /// A send error that cannot clear up on its own ends the loop; the
    /// message is back in the queue by then.
    async fn drain_one(&self, cancel: &CancellationToken) -> Result<bool> {
        let s = &self.settings;
        if self.queue.is_empty() {
            return Ok(tokio::select! {
                _ = cancel.cancelled() => false,
                _ = self.queue.notified() => true,
                _ = tokio::time::sleep(s.poll_interval) => true,
            });
        }

        // Admission first: a denied message is never taken off the queue.
        let Some(admission) = self.limiter.try_admit() else {
            return Ok(sleep_or_cancel(cancel, s.rate_pause).await);
        };
        let Some(msg) = self.queue.dequeue_if_any() else {
            self.limiter.refund(admission);
            return Ok(true);
        };

        match self.send(&msg).await {
            Ok(()) => {
                debug!("Published queued message ({} left)", self.queue.len());
                Ok(true)
            }
            Err(e) => {
                self.limiter.refund(admission);
                self.queue.enqueue(msg);
                if !e.is_retryable() {
                    error!("Send failed permanently, message requeued: {e}");
                    return Err(e);
                }
                error!("Send failed, message requeued: {e}");
                Ok(sleep_or_cancel(cancel, s.retry_interval).await)
            }
        }
    }

    /// Call `callback` whenever the named attribute changes remotely.
    pub fn subscribe_attribute(&self, name: impl Into<String>, callback: AttributeCallback) {
        self.hub.subscribe(name, callback);
    }

    /// Ask the broker for the current values of `names`; `callback` runs once.
    pub async fn request_attributes(&self, names: &[&str], callback: ResponseCallback) -> Result<u32> {
        let id = self
            .hub
            .register_request(names.iter().map(|n| n.to_string()).collect(), callback);
        let mut body = Map::new();
        body.insert("sharedKeys".into(), Value::from(names.join(",")));
        body.insert("clientKeys".into(), Value::from(names.join(",")));
        let topic = format!("{}{id}", self.topics.attribute_request_prefix);

        match self
            .transport
            .send(&topic, Value::Object(body).to_string(), false)
            .await
        {
            Ok(()) => {
                debug!("Requested attributes {names:?} (request {id})");
                Ok(id)
            }
            Err(e) => {
                let details = e.to_string();
                self.hub.cancel_request(id, e);
                Err(BridgeError::Attribute { details })
            }
        }
    }

    /// Disconnect from the broker. Queued messages stay queued.
    pub async fn stop(&self) -> Result<()> {
        info!("Disconnecting from broker ({} messages queued)", self.queue.len());
        self.transport.disconnect().await
    }
}
