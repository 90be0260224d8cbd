// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The authority side of the protocol.
//!
//! Listens on its inbox topic for `host_connect` and `credential_request`,
//! answers from the records repository, and pushes agent lifecycle changes
//! to the hosting host. Incoming messages are dispatched sequentially by a
//! single task.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{MessageBus, Transport};
use crate::credential::Jwk;
use crate::discovery::{Discovery, DiscoveryConfig};
use crate::error::{Error, Result};
use crate::message::{BrokerMessage, Event};
use crate::model::{AgentModel, HostModel};
use crate::records::RecordsRepository;
use crate::topic::TopicGenerator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityState {
    Uninitialized,
    Initializing,
    Initialized,
    Connected,
}

pub struct Authority {
    discovery: Discovery,
    bus: MessageBus,
    topics: TopicGenerator,
    records: Arc<dyn RecordsRepository>,
    state: watch::Sender<AuthorityState>,
    connect_lock: Mutex<()>,
    dispatch: Mutex<Option<CancellationToken>>,
}

impl Authority {
    pub fn new(
        config: DiscoveryConfig,
        transport: Arc<dyn Transport>,
        records: Arc<dyn RecordsRepository>,
    ) -> Result<Arc<Self>> {
        let discovery = Discovery::new(&config)?;
        let topics = TopicGenerator::new(discovery.id(), discovery.id());
        Ok(Arc::new(Self {
            discovery,
            bus: MessageBus::new(transport),
            topics,
            records,
            state: watch::Sender::new(AuthorityState::Uninitialized),
            connect_lock: Mutex::new(()),
            dispatch: Mutex::new(None),
        }))
    }

    pub fn id(&self) -> &str {
        self.discovery.id()
    }

    pub fn topics(&self) -> &TopicGenerator {
        &self.topics
    }

    pub fn state(&self) -> AuthorityState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<AuthorityState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == AuthorityState::Connected && self.bus.is_connected()
    }

    pub fn broker_uri(&self) -> Option<String> {
        self.discovery.broker_uri()
    }

    /// Run discovery with backoff. Returns immediately once initialized.
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        if self.discovery.is_initialized() {
            return Ok(());
        }
        self.state.send_if_modified(|s| {
            let changed = *s == AuthorityState::Uninitialized;
            if changed {
                *s = AuthorityState::Initializing;
            }
            changed
        });
        match self.discovery.initialize_with_backoff(cancel).await {
            Ok(_) => {
                self.state.send_if_modified(|s| {
                    if *s == AuthorityState::Connected {
                        return false;
                    }
                    *s = AuthorityState::Initialized;
                    true
                });
                Ok(())
            }
            Err(e) => {
                self.state.send_if_modified(|s| {
                    let changed = *s == AuthorityState::Initializing;
                    if changed {
                        *s = AuthorityState::Uninitialized;
                    }
                    changed
                });
                Err(e)
            }
        }
    }

    /// Connect to the broker and start handling the authority inbox.
    /// Discovery runs first unless a broker URI is already known.
    pub async fn connect(self: &Arc<Self>, access_token: &str, cancel: &CancellationToken) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        let broker_uri = match self.discovery.broker_uri() {
            Some(uri) => uri,
            None => {
                self.initialize(cancel).await?;
                self.discovery
                    .broker_uri()
                    .ok_or_else(|| Error::Connectivity("no broker uri after discovery".to_owned()))?
            }
        };

        self.bus.connect(access_token, &broker_uri).await?;
        let (tx, rx) = mpsc::channel(256);
        self.bus.subscribe(&self.topics.subscribe_as_authority(), tx).await?;

        let token = cancel.child_token();
        *self.dispatch.lock().await = Some(token.clone());
        tokio::spawn(Arc::clone(self).dispatch_loop(rx, token));

        self.state.send_replace(AuthorityState::Connected);
        info!(authority_id = %self.id(), broker = %broker_uri, "authority connected");
        Ok(())
    }

    pub async fn disconnect(&self) {
        let _guard = self.connect_lock.lock().await;
        if self.state() != AuthorityState::Connected {
            return;
        }
        if let Some(token) = self.dispatch.lock().await.take() {
            token.cancel();
        }
        self.bus.unsubscribe(&self.topics.subscribe_as_authority()).await;
        if let Err(e) = self.bus.disconnect().await {
            warn!(err = %e, "broker disconnect failed");
        }
        let next = if self.discovery.is_initialized() {
            AuthorityState::Initialized
        } else {
            AuthorityState::Uninitialized
        };
        self.state.send_replace(next);
        info!(authority_id = %self.id(), "authority disconnected");
    }

    async fn dispatch_loop(self: Arc<Self>, mut rx: mpsc::Receiver<BrokerMessage>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    self.handle_message(msg).await;
                }
            }
        }
        debug!("authority dispatch stopped");
    }

    /// Dispatch one inbox message. Never fails; problems are logged and the
    /// message is dropped.
    pub async fn handle_message(&self, message: BrokerMessage) {
        let Some(sender) = message.sender_id.clone() else {
            debug!(topic = %message.topic, "dropping message without sender");
            return;
        };
        let event = match message.decode() {
            Ok(event) => event,
            Err(e) => {
                debug!(topic = %message.topic, err = %e, "dropping undecodable message");
                return;
            }
        };

        let result = match event {
            Event::HostConnect { host } => {
                if host.id != sender {
                    warn!(sender = %sender, host_id = %host.id, "host_connect sender mismatch, dropping");
                    return;
                }
                self.on_host_connected(host).await
            }
            Event::CredentialRequest { agent_id, credential_name, jwk } => {
                if agent_id != sender {
                    warn!(sender = %sender, agent_id = %agent_id, "credential_request sender mismatch, dropping");
                    return;
                }
                self.handle_credential_request(&agent_id, &credential_name, jwk).await.map(|_| ())
            }
            other => {
                debug!(kind = other.kind(), sender = %sender, "ignoring event");
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(sender = %sender, code = e.as_str(), err = %e, "event handling failed");
        }
    }

    /// Record the host's plugins and reply with its canonical state.
    pub async fn on_host_connected(&self, reported: HostModel) -> Result<()> {
        info!(host_id = %reported.id, plugins = reported.plugins.len(), "host connected");
        let host = self
            .records
            .get_host_by_id(&reported.id)
            .await
            .map_err(Error::Records)?
            .ok_or_else(|| Error::NotFound(format!("host {}", reported.id)))?;
        let plugins = self
            .records
            .sync_plugins_for_host_by_id(&host.id, &reported.plugins)
            .await
            .map_err(Error::Records)?;
        let agents = self.records.get_agents_for_host_by_id(&host.id).await.map_err(Error::Records)?;

        let topic = self.topics.publish_to_host(&host.id);
        debug!(host_id = %host.id, plugins = plugins.len(), agents = agents.len(), "sending host_welcome");
        self.bus.publish_event(topic, &Event::HostWelcome { host, plugins, agents }).await
    }

    /// Seal the named credential to the requester's key and send it to the
    /// agent. Returns `false` (and sends nothing) when no credential exists.
    pub async fn handle_credential_request(
        &self,
        agent_id: &str,
        credential_name: &str,
        jwk: Jwk,
    ) -> Result<bool> {
        let secret = self
            .records
            .get_credential_for_agent_by_name(agent_id, credential_name)
            .await
            .map_err(Error::Records)?;
        let Some(secret) = secret else {
            info!(agent_id, credential = credential_name, "credential not found, not responding");
            return Ok(false);
        };
        let encrypted_credential = jwk.encrypt(secret.as_bytes())?;
        drop(secret);

        let event = Event::CredentialResponse {
            credential_name: credential_name.to_owned(),
            encrypted_credential,
        };
        self.bus.publish_event(self.topics.publish_to_agent(agent_id), &event).await?;
        info!(agent_id, credential = credential_name, "credential sent");
        Ok(true)
    }

    // -- agent lifecycle ------------------------------------------------------

    pub async fn agent_created(&self, agent: &AgentModel) -> Result<()> {
        self.require_connected()?;
        if agent.is_enabled {
            self.send_agent_connect(agent).await?;
        }
        Ok(())
    }

    pub async fn agent_updated(&self, agent: &AgentModel) -> Result<()> {
        self.require_connected()?;
        self.send_agent_disconnect(agent).await?;
        if agent.is_enabled {
            self.send_agent_connect(agent).await?;
        }
        Ok(())
    }

    pub async fn agent_deleted(&self, agent: &AgentModel) -> Result<()> {
        self.require_connected()?;
        self.send_agent_disconnect(agent).await
    }

    fn require_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    async fn host_for(&self, agent: &AgentModel) -> Result<String> {
        let found = self.records.get_host_id_for_agent_by_id(&agent.id).await.map_err(Error::Records)?;
        found
            .or_else(|| agent.host_id.clone())
            .ok_or_else(|| Error::NotFound(format!("host for agent {}", agent.id)))
    }

    async fn send_agent_connect(&self, agent: &AgentModel) -> Result<()> {
        let host_id = self.host_for(agent).await?;
        debug!(agent_id = %agent.id, host_id = %host_id, "sending agent_connect");
        let event = Event::AgentConnect { agent: agent.clone() };
        self.bus.publish_event(self.topics.publish_to_host(&host_id), &event).await
    }

    async fn send_agent_disconnect(&self, agent: &AgentModel) -> Result<()> {
        let host_id = self.host_for(agent).await?;
        debug!(agent_id = %agent.id, host_id = %host_id, "sending agent_disconnect");
        let event = Event::AgentDisconnect { agent_id: agent.id.clone() };
        self.bus.publish_event(self.topics.publish_to_host(&host_id), &event).await
    }
}

#[cfg(test)]
#[path = "authority_tests.rs"]
mod tests;
