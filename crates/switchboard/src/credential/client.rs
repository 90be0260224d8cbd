// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-side credential client.
//!
//! Requests are answered asynchronously on the agent's topic. Each request
//! waits up to `timeout` for a response and is re-sent up to `attempts`
//! times; concurrent callers asking for the same name share the wait.
//! Decrypted values are cached for the life of the client and zeroized on
//! drop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::jwk::KeyPair;
use crate::bus::MessageBus;
use crate::error::{Error, Result};
use crate::message::{BrokerMessage, Event};
use crate::topic::TopicGenerator;

pub type Secret = Zeroizing<String>;

#[derive(Debug, Clone, Copy)]
pub struct CredentialClientConfig {
    pub timeout: Duration,
    pub attempts: u32,
}

impl Default for CredentialClientConfig {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(10), attempts: 3 }
    }
}

pub struct CredentialClient {
    topics: TopicGenerator,
    bus: Arc<MessageBus>,
    keys: KeyPair,
    config: CredentialClientConfig,
    cache: Mutex<HashMap<String, Secret>>,
    pending: Mutex<HashMap<String, Vec<oneshot::Sender<Secret>>>>,
    listener: Mutex<Option<CancellationToken>>,
}

impl CredentialClient {
    pub fn new(
        authority_id: &str,
        agent_id: &str,
        bus: Arc<MessageBus>,
        keys: KeyPair,
        config: CredentialClientConfig,
    ) -> Self {
        Self {
            topics: TopicGenerator::new(authority_id, agent_id),
            bus,
            keys,
            config,
            cache: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            listener: Mutex::new(None),
        }
    }

    pub fn agent_id(&self) -> &str {
        self.topics.sender_id()
    }

    /// Subscribe to the agent's topic and start handling responses.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut listener = self.listener.lock().await;
        if listener.is_some() {
            return Ok(());
        }
        let (tx, mut rx) = mpsc::channel(32);
        self.bus.subscribe(&self.topics.subscribe_as_agent(), tx).await?;

        let cancel = CancellationToken::new();
        *listener = Some(cancel.clone());
        let client = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = rx.recv() => {
                        let Some(msg) = msg else { break };
                        client.handle_message(msg).await;
                    }
                }
            }
        });
        debug!(agent_id = %self.agent_id(), "credential client listening");
        Ok(())
    }

    pub async fn stop(&self) {
        if let Some(cancel) = self.listener.lock().await.take() {
            cancel.cancel();
            self.bus.unsubscribe(&self.topics.subscribe_as_agent()).await;
        }
    }

    /// Fetch a credential by name, from cache or from the authority.
    pub async fn get_credential(&self, name: &str) -> Result<Secret> {
        if let Some(secret) = self.cache.lock().await.get(name) {
            return Ok(secret.clone());
        }

        for attempt in 1..=self.config.attempts {
            let (tx, rx) = oneshot::channel();
            // Waiters whose callers gave up do not count as in flight.
            let first_waiter = {
                let mut pending = self.pending.lock().await;
                let waiters = pending.entry(name.to_owned()).or_default();
                waiters.retain(|w| !w.is_closed());
                waiters.push(tx);
                waiters.len() == 1
            };
            if first_waiter || attempt > 1 {
                if let Err(e) = self.send_request(name).await {
                    drop(rx);
                    self.prune_waiters(name).await;
                    return Err(e);
                }
            }

            let outcome = tokio::time::timeout(self.config.timeout, rx).await;
            match outcome {
                Ok(Ok(secret)) => return Ok(secret),
                Ok(Err(_)) => return Err(Error::Cancelled),
                Err(_) => {
                    warn!(agent_id = %self.agent_id(), credential = name, attempt, "credential request timed out");
                    self.prune_waiters(name).await;
                }
            }
        }
        Err(Error::NotFound(format!("credential {name}")))
    }

    async fn prune_waiters(&self, name: &str) {
        let mut pending = self.pending.lock().await;
        if let Some(waiters) = pending.get_mut(name) {
            waiters.retain(|w| !w.is_closed());
            if waiters.is_empty() {
                pending.remove(name);
            }
        }
    }

    async fn send_request(&self, name: &str) -> Result<()> {
        let event = Event::CredentialRequest {
            agent_id: self.agent_id().to_owned(),
            credential_name: name.to_owned(),
            jwk: self.keys.public_jwk().clone(),
        };
        self.bus.publish_event(self.topics.publish_to_authority(), &event).await
    }

    /// Handle one message from the agent's topic.
    pub async fn handle_message(&self, message: BrokerMessage) {
        if message.sender_id.as_deref() != Some(self.topics.authority_id()) {
            debug!(topic = %message.topic, "ignoring message not sent by the authority");
            return;
        }
        let event = match message.decode() {
            Ok(event) => event,
            Err(e) => {
                debug!(topic = %message.topic, err = %e, "dropping undecodable message");
                return;
            }
        };
        let Event::CredentialResponse { credential_name, encrypted_credential } = event else {
            return;
        };
        let secret = match self.keys.decrypt(&encrypted_credential) {
            Ok(secret) => secret,
            Err(e) => {
                warn!(credential = %credential_name, err = %e, "could not decrypt credential");
                return;
            }
        };
        info!(agent_id = %self.agent_id(), credential = %credential_name, "credential received");

        self.cache.lock().await.insert(credential_name.clone(), secret.clone());
        let waiters = self.pending.lock().await.remove(&credential_name).unwrap_or_default();
        for waiter in waiters {
            let _ = waiter.send(secret.clone());
        }
    }

    pub async fn cached(&self, name: &str) -> bool {
        self.cache.lock().await.contains_key(name)
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
