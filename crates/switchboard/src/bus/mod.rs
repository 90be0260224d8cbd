// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message bus: one broker connection shared by a participant, with at most
//! one handler per exact topic filter.
//!
//! The [`Transport`] trait is the seam to the concrete pub/sub system
//! ([`nats::NatsTransport`] in production, [`memory::MemoryBroker`] for
//! tests). Each subscription runs a forwarding task that decodes raw
//! messages into [`BrokerMessage`]s and pushes them into the handler's
//! channel until unsubscribed.

pub mod memory;
pub mod nats;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::message::{BrokerMessage, Event, MessageKind};

/// A message as it crosses the transport boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub topic: String,
    pub kind: MessageKind,
    pub payload: Bytes,
}

impl From<&BrokerMessage> for RawMessage {
    fn from(msg: &BrokerMessage) -> Self {
        Self { topic: msg.topic.clone(), kind: msg.kind, payload: Bytes::from(msg.payload()) }
    }
}

pub type RawStream = BoxStream<'static, RawMessage>;

/// Handler side of a subscription.
pub type Handler = mpsc::Sender<BrokerMessage>;

/// Pub/sub connection as used by the bus.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, endpoint: &str, token: &str) -> anyhow::Result<()>;
    fn is_connected(&self) -> bool;
    /// Subscribe with a `+`-wildcard topic filter.
    async fn subscribe(&self, filter: &str) -> anyhow::Result<RawStream>;
    async fn publish(&self, message: RawMessage) -> anyhow::Result<()>;
    async fn disconnect(&self) -> anyhow::Result<()>;
}

pub struct MessageBus {
    transport: Arc<dyn Transport>,
    subscriptions: Mutex<HashMap<String, CancellationToken>>,
    clock: Clock,
}

impl MessageBus {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport, subscriptions: Mutex::new(HashMap::new()), clock: Clock::default() }
    }

    /// Connect if not already connected.
    pub async fn connect(&self, token: &str, endpoint: &str) -> Result<()> {
        if self.transport.is_connected() {
            return Ok(());
        }
        self.transport.connect(endpoint, token).await.map_err(Error::connectivity)?;
        debug!(endpoint, "broker connected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Route messages matching `topic` to `handler`.
    pub async fn subscribe(&self, topic: &str, handler: Handler) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let mut subs = self.subscriptions.lock().await;
        if subs.contains_key(topic) {
            return Err(Error::DuplicateSubscription(topic.to_owned()));
        }
        let mut stream = self.transport.subscribe(topic).await.map_err(Error::connectivity)?;

        let cancel = CancellationToken::new();
        subs.insert(topic.to_owned(), cancel.clone());

        let filter = topic.to_owned();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    raw = stream.next() => {
                        let Some(raw) = raw else { break };
                        let msg = BrokerMessage::from_wire(raw.topic, raw.kind, &raw.payload);
                        if handler.send(msg).await.is_err() {
                            debug!(filter = %filter, "handler dropped, ending subscription");
                            break;
                        }
                    }
                }
            }
        });
        debug!(topic, "subscribed");
        Ok(())
    }

    pub async fn unsubscribe(&self, topic: &str) {
        if let Some(cancel) = self.subscriptions.lock().await.remove(topic) {
            cancel.cancel();
            debug!(topic, "unsubscribed");
        }
    }

    /// Publish and wait for the transport to accept the message.
    pub async fn publish_async(&self, message: BrokerMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.transport.publish(RawMessage::from(&message)).await.map_err(Error::connectivity)
    }

    /// Publish without waiting for the transport; later failures are logged.
    pub fn publish(&self, message: BrokerMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            if let Err(e) = transport.publish(RawMessage::from(&message)).await {
                warn!(topic = %message.topic, err = %e, "publish failed");
            }
        });
        Ok(())
    }

    /// Encode `event` with a fresh timestamp and publish it on `topic`.
    pub async fn publish_event(&self, topic: String, event: &Event) -> Result<()> {
        let data = event.to_data(&self.timestamp());
        self.publish_async(BrokerMessage::event(topic, data)).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        for (_, cancel) in self.subscriptions.lock().await.drain() {
            cancel.cancel();
        }
        self.transport.disconnect().await.map_err(Error::connectivity)
    }

    /// Next message timestamp, strictly increasing within this bus.
    pub fn timestamp(&self) -> String {
        self.clock.next()
    }
}

/// Millisecond UTC clock that never repeats or goes backwards.
#[derive(Debug, Default)]
pub struct Clock {
    last: AtomicI64,
}

impl Clock {
    pub fn next(&self) -> String {
        let now = Utc::now().timestamp_millis();
        let prev = match self.last.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        }) {
            Ok(prev) | Err(prev) => prev,
        };
        let millis = now.max(prev + 1);
        DateTime::<Utc>::from_timestamp_millis(millis)
            .unwrap_or_default()
            .format("%Y-%m-%dT%H:%M:%S%.3fZ")
            .to_string()
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
