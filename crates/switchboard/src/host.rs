// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The host side of the protocol.
//!
//! A host authenticates with client credentials, announces its capabilities
//! with `host_connect`, and then materializes agents as the authority
//! instructs. Agent runtimes are built by an injected [`AgentFactory`]; the
//! host only tracks them by id and drives connect/disconnect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{MessageBus, Transport};
use crate::discovery::{Discovery, DiscoveryConfig};
use crate::error::{Error, Result};
use crate::message::{BrokerMessage, Event};
use crate::model::{AgentModel, HostModel, Plugin};
use crate::oauth::{self, CONNECT_SCOPE};
use crate::registry::{Capability, CapabilityRegistry, PluginDescriptor, Reconciliation};
use crate::topic::TopicGenerator;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);
const RUN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub discovery: DiscoveryConfig,
    pub host_id: String,
    pub host_secret: String,
    pub host_name: Option<String>,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    AgentConnected { agent_id: String, name: String },
    AgentDisconnected { agent_id: String },
}

/// A live agent managed by the host.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    async fn connect(&mut self) -> anyhow::Result<()>;
    async fn disconnect(&mut self) -> anyhow::Result<()>;
}

/// What a factory gets to build an agent with.
#[derive(Clone)]
pub struct AgentContext {
    pub authority_id: String,
    pub host_id: String,
    pub bus: Arc<MessageBus>,
    pub plugins: Vec<Plugin>,
}

#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn create_agent(
        &self,
        agent: &AgentModel,
        context: &AgentContext,
    ) -> anyhow::Result<Box<dyn AgentRuntime>>;

    async fn dispose_agent(&self, agent_id: &str) -> anyhow::Result<()>;
}

/// The running inbox loop of a connected host.
struct Dispatch {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Dispatch {
    /// Cancel the loop and wait until any message it was handling is done.
    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            debug!(err = %e, "dispatch task ended abnormally");
        }
    }
}

pub struct Host {
    id: String,
    name: String,
    secret: String,
    discovery: Discovery,
    bus: Arc<MessageBus>,
    topics: TopicGenerator,
    retry_delay: Duration,
    factory: Arc<dyn AgentFactory>,
    registry: Mutex<CapabilityRegistry>,
    agents: Mutex<HashMap<String, Box<dyn AgentRuntime>>>,
    state: watch::Sender<HostState>,
    events: broadcast::Sender<HostEvent>,
    dispatch: Mutex<Option<Dispatch>>,
    connect_lock: Mutex<()>,
}

impl Host {
    pub fn new(
        config: HostConfig,
        transport: Arc<dyn Transport>,
        factory: Arc<dyn AgentFactory>,
    ) -> Result<Arc<Self>> {
        if config.host_id.trim().is_empty() {
            return Err(Error::InvalidConfig("host id is required".to_owned()));
        }
        if config.host_secret.is_empty() {
            return Err(Error::InvalidConfig("host secret is required".to_owned()));
        }
        let discovery = Discovery::new(&config.discovery)?;
        let topics = TopicGenerator::new(discovery.id(), config.host_id.as_str());
        let (events, _) = broadcast::channel(64);
        Ok(Arc::new(Self {
            name: config.host_name.unwrap_or_else(|| config.host_id.clone()),
            id: config.host_id,
            secret: config.host_secret,
            discovery,
            bus: Arc::new(MessageBus::new(transport)),
            topics,
            retry_delay: config.retry_delay,
            factory,
            registry: Mutex::new(CapabilityRegistry::new()),
            agents: Mutex::new(HashMap::new()),
            state: watch::Sender::new(HostState::Disconnected),
            events,
            dispatch: Mutex::new(None),
            connect_lock: Mutex::new(()),
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topics(&self) -> &TopicGenerator {
        &self.topics
    }

    pub fn state(&self) -> HostState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<HostState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == HostState::Connected && self.bus.is_connected()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    // -- capabilities ---------------------------------------------------------

    pub async fn add_plugin<C: Capability>(&self, instance: C) -> Result<()> {
        self.registry.lock().await.add_plugin(instance).map(|_| ())
    }

    pub async fn add_plugin_from_type<C: Capability>(&self) -> Result<()> {
        self.registry.lock().await.add_plugin_from_type::<C>().map(|_| ())
    }

    pub async fn add_plugin_descriptor(&self, descriptor: PluginDescriptor) -> Result<()> {
        self.registry.lock().await.add_descriptor(descriptor).map(|_| ())
    }

    pub async fn instance<C: Capability>(&self) -> Option<Arc<C>> {
        self.registry.lock().await.instance::<C>()
    }

    pub async fn plugins(&self) -> Vec<Plugin> {
        self.registry.lock().await.plugins().to_vec()
    }

    pub async fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn snapshot(&self) -> HostModel {
        HostModel { id: self.id.clone(), name: self.name.clone(), plugins: self.plugins().await }
    }

    // -- lifecycle ------------------------------------------------------------

    /// Connect, retrying on failure with a fixed delay until connected or
    /// cancelled.
    pub async fn start(self: &Arc<Self>, cancel: &CancellationToken) -> Result<()> {
        info!(host_id = %self.id, "starting host");
        loop {
            if self.is_connected() {
                return Ok(());
            }
            match self.connect(cancel).await {
                Ok(()) => return Ok(()),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    error!(host_id = %self.id, code = e.as_str(), err = %e, "unable to connect");
                    info!(delay = ?self.retry_delay, "retrying connect");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }
    }

    /// Start, then stay up until cancelled or the connection drops.
    pub async fn run(self: &Arc<Self>, cancel: &CancellationToken) -> Result<()> {
        match self.start(cancel).await {
            Ok(()) => {}
            Err(Error::Cancelled) => return Ok(()),
            Err(e) => return Err(e),
        }
        let mut tick = tokio::time::interval(RUN_POLL_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.stop().await;
                    return Ok(());
                }
                _ = tick.tick() => {
                    if !self.is_connected() {
                        info!(host_id = %self.id, "host no longer connected");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One connection attempt: discovery, token, broker, inbox, announce.
    pub async fn connect(self: &Arc<Self>, cancel: &CancellationToken) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.state.send_replace(HostState::Connecting);
        match self.try_connect(cancel).await {
            Ok(()) => {
                self.state.send_replace(HostState::Connected);
                info!(host_id = %self.id, "host connected");
                Ok(())
            }
            Err(e) => {
                self.teardown().await;
                self.state.send_replace(HostState::Disconnected);
                Err(e)
            }
        }
    }

    async fn try_connect(self: &Arc<Self>, cancel: &CancellationToken) -> Result<()> {
        let endpoints = self.discovery.initialize_with_backoff(cancel).await?;
        let token = oauth::client_credentials(
            self.discovery.http(),
            &endpoints.token_endpoint,
            &self.id,
            &self.secret,
            CONNECT_SCOPE,
        )
        .await?;
        let broker_uri = self
            .discovery
            .broker_uri()
            .ok_or_else(|| Error::Connectivity("no broker uri".to_owned()))?;

        self.bus.connect(&token.access_token, &broker_uri).await?;
        let (tx, rx) = mpsc::channel(256);
        self.bus.subscribe(&self.topics.subscribe_as_host(), tx).await?;

        let dispatch = cancel.child_token();
        let task = tokio::spawn(Arc::clone(self).dispatch_loop(rx, dispatch.clone()));
        *self.dispatch.lock().await = Some(Dispatch { cancel: dispatch, task });

        let host = self.snapshot().await;
        debug!(host_id = %self.id, plugins = host.plugins.len(), "sending host_connect");
        self.bus.publish_event(self.topics.publish_to_authority(), &Event::HostConnect { host }).await
    }

    async fn stop_dispatch(&self) {
        let dispatch = self.dispatch.lock().await.take();
        if let Some(dispatch) = dispatch {
            dispatch.shutdown().await;
        }
    }

    async fn teardown(&self) {
        self.stop_dispatch().await;
        self.bus.unsubscribe(&self.topics.subscribe_as_host()).await;
        if let Err(e) = self.bus.disconnect().await {
            debug!(err = %e, "broker disconnect failed");
        }
    }

    /// Disconnect every agent, then leave the broker.
    pub async fn stop(&self) {
        let _guard = self.connect_lock.lock().await;
        if self.state() == HostState::Disconnected {
            return;
        }
        // No agent_connect may land after the drain below.
        self.stop_dispatch().await;
        let agents: Vec<(String, Box<dyn AgentRuntime>)> = self.agents.lock().await.drain().collect();
        for (agent_id, mut runtime) in agents {
            if let Err(e) = runtime.disconnect().await {
                warn!(agent_id = %agent_id, err = %e, "agent disconnect failed");
            }
            if let Err(e) = self.factory.dispose_agent(&agent_id).await {
                warn!(agent_id = %agent_id, err = %e, "agent dispose failed");
            }
            let _ = self.events.send(HostEvent::AgentDisconnected { agent_id });
        }
        self.teardown().await;
        self.state.send_replace(HostState::Disconnected);
        info!(host_id = %self.id, "host stopped");
    }

    // -- dispatch -------------------------------------------------------------

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
        debug!("host dispatch stopped");
    }

    /// Dispatch one inbox message. Never fails; problems are logged and the
    /// message is dropped without touching host state.
    pub async fn handle_message(&self, message: BrokerMessage) {
        if message.sender_id.as_deref() != Some(self.topics.authority_id()) {
            warn!(topic = %message.topic, "dropping message not sent by the authority");
            return;
        }
        let event = match message.decode() {
            Ok(event) => event,
            Err(e) => {
                debug!(topic = %message.topic, err = %e, "dropping undecodable message");
                return;
            }
        };
        match event {
            Event::HostWelcome { host, plugins, agents } => {
                if host.id != self.id {
                    warn!(host_id = %host.id, "welcome addressed to another host, dropping");
                    return;
                }
                self.receive_host_welcome(&plugins, agents).await;
            }
            Event::AgentConnect { agent } => {
                if let Err(e) = self.receive_agent_connect(agent).await {
                    warn!(code = e.as_str(), err = %e, "agent connect failed");
                }
            }
            Event::AgentDisconnect { agent_id } => {
                if let Err(e) = self.receive_agent_disconnect(&agent_id).await {
                    warn!(agent_id = %agent_id, code = e.as_str(), err = %e, "agent disconnect failed");
                }
            }
            other => debug!(kind = other.kind(), "ignoring event"),
        }
    }

    /// Adopt canonical plugin ids, then connect every listed agent.
    pub async fn receive_host_welcome(&self, plugins: &[Plugin], agents: Vec<AgentModel>) -> Reconciliation {
        let outcome = self.registry.lock().await.reconcile(plugins);
        info!(
            host_id = %self.id,
            matched = outcome.matched,
            adopted = outcome.adopted,
            agents = agents.len(),
            "host welcomed"
        );
        for agent in agents {
            let agent_id = agent.id.clone();
            if let Err(e) = self.receive_agent_connect(agent).await {
                warn!(agent_id = %agent_id, code = e.as_str(), err = %e, "agent connect failed");
            }
        }
        outcome
    }

    /// Build, connect, and track an agent. A second connect for a live agent
    /// is a no-op.
    pub async fn receive_agent_connect(&self, agent: AgentModel) -> Result<()> {
        let mut agents = self.agents.lock().await;
        if agents.contains_key(&agent.id) {
            debug!(agent_id = %agent.id, "agent already connected");
            return Ok(());
        }
        let context = AgentContext {
            authority_id: self.topics.authority_id().to_owned(),
            host_id: self.id.clone(),
            bus: Arc::clone(&self.bus),
            plugins: self.plugins().await,
        };
        let mut runtime = self.factory.create_agent(&agent, &context).await.map_err(Error::Agent)?;
        if let Err(e) = runtime.connect().await {
            if let Err(dispose) = self.factory.dispose_agent(&agent.id).await {
                debug!(agent_id = %agent.id, err = %dispose, "dispose after failed connect");
            }
            return Err(Error::Agent(e));
        }
        info!(agent_id = %agent.id, name = %runtime.name(), "agent connected");
        let event = HostEvent::AgentConnected { agent_id: agent.id.clone(), name: runtime.name().to_owned() };
        agents.insert(agent.id, runtime);
        let _ = self.events.send(event);
        Ok(())
    }

    pub async fn receive_agent_disconnect(&self, agent_id: &str) -> Result<()> {
        let mut runtime = self
            .agents
            .lock()
            .await
            .remove(agent_id)
            .ok_or_else(|| Error::NotFound(format!("agent {agent_id}")))?;
        if let Err(e) = runtime.disconnect().await {
            warn!(agent_id, err = %e, "agent disconnect failed");
        }
        let disposed = self.factory.dispose_agent(agent_id).await;
        if let Err(ref e) = disposed {
            warn!(agent_id, err = %e, "agent dispose failed");
        }
        info!(agent_id, "agent disconnected");
        let _ = self.events.send(HostEvent::AgentDisconnected { agent_id: agent_id.to_owned() });
        disposed.map_err(Error::Agent)
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
