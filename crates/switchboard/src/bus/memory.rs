// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process broker. Every [`MemoryTransport`] created from the same
//! [`MemoryBroker`] sees the others' publishes, routed with the same `+`
//! wildcard rule the real broker applies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use super::{RawMessage, RawStream, Transport};
use crate::topic;

struct Route {
    filter: String,
    tx: mpsc::UnboundedSender<RawMessage>,
}

#[derive(Default)]
struct BrokerState {
    routes: Vec<Route>,
    history: Vec<RawMessage>,
    refuse_connections: bool,
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new client connection to this broker.
    pub fn transport(&self) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport { broker: self.clone(), connected: AtomicBool::new(false) })
    }

    /// When set, `connect` fails as if the broker were unreachable.
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Every message published so far, in order.
    pub fn history(&self) -> Vec<RawMessage> {
        self.lock().history.clone()
    }

    /// Published messages whose topic matches `filter`.
    pub fn published_to(&self, filter: &str) -> Vec<RawMessage> {
        self.lock().history.iter().filter(|m| topic::matches(filter, &m.topic)).cloned().collect()
    }

    pub fn publish(&self, message: RawMessage) {
        let mut state = self.lock();
        state.routes.retain(|r| !r.tx.is_closed());
        for route in state.routes.iter().filter(|r| topic::matches(&r.filter, &message.topic)) {
            let _ = route.tx.send(message.clone());
        }
        state.history.push(message);
    }

    fn route(&self, filter: &str) -> mpsc::UnboundedReceiver<RawMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().routes.push(Route { filter: filter.to_owned(), tx });
        rx
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct MemoryTransport {
    broker: MemoryBroker,
    connected: AtomicBool,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, _endpoint: &str, token: &str) -> anyhow::Result<()> {
        if self.broker.lock().refuse_connections {
            anyhow::bail!("connection refused");
        }
        if token.is_empty() {
            anyhow::bail!("authorization violation");
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn subscribe(&self, filter: &str) -> anyhow::Result<RawStream> {
        if !self.is_connected() {
            anyhow::bail!("not connected");
        }
        let rx = self.broker.route(filter);
        Ok(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|m| (m, rx))
        })
        .boxed())
    }

    async fn publish(&self, message: RawMessage) -> anyhow::Result<()> {
        if !self.is_connected() {
            anyhow::bail!("not connected");
        }
        self.broker.publish(message);
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
