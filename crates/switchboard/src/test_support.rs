// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: recording agents and broker assertion helpers.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::bus::memory::MemoryBroker;
use crate::bus::RawMessage;
use crate::host::{AgentContext, AgentFactory, AgentRuntime};
use crate::message::{BrokerMessage, Event};
use crate::model::AgentModel;

/// Decode a message captured by a [`MemoryBroker`].
pub fn decode_raw(raw: &RawMessage) -> anyhow::Result<Event> {
    let message = BrokerMessage::from_wire(raw.topic.clone(), raw.kind, &raw.payload);
    Ok(message.decode()?)
}

/// Poll the broker until at least `count` messages matching `filter` have
/// been published.
pub async fn wait_for_published(
    broker: &MemoryBroker,
    filter: &str,
    count: usize,
    timeout: Duration,
) -> anyhow::Result<Vec<RawMessage>> {
    let deadline = Instant::now() + timeout;
    loop {
        let found = broker.published_to(filter);
        if found.len() >= count {
            return Ok(found);
        }
        if Instant::now() >= deadline {
            anyhow::bail!("timed out waiting for {count} message(s) on {filter}, saw {}", found.len());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Lifecycle calls seen by a [`RecordingFactory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCall {
    Created(String),
    Connected(String),
    Disconnected(String),
    Disposed(String),
}

/// Agent factory that builds inert agents and records every lifecycle call.
#[derive(Default)]
pub struct RecordingFactory {
    calls: Arc<Mutex<Vec<AgentCall>>>,
    fail_connect: bool,
    fail_dispose: bool,
    create_delay: Option<Duration>,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agents built by this factory fail to connect.
    pub fn failing() -> Self {
        Self { fail_connect: true, ..Self::default() }
    }

    /// `dispose_agent` records the call and then fails.
    pub fn failing_dispose() -> Self {
        Self { fail_dispose: true, ..Self::default() }
    }

    /// `create_agent` sleeps for `delay` before building the agent.
    pub fn slow(delay: Duration) -> Self {
        Self { create_delay: Some(delay), ..Self::default() }
    }

    pub fn calls(&self) -> Vec<AgentCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn created(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, AgentCall::Created(_))).count()
    }

    pub fn disposed(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, AgentCall::Disposed(_))).count()
    }
}

fn record(calls: &Mutex<Vec<AgentCall>>, call: AgentCall) {
    if let Ok(mut calls) = calls.lock() {
        calls.push(call);
    }
}

#[async_trait]
impl AgentFactory for RecordingFactory {
    async fn create_agent(
        &self,
        agent: &AgentModel,
        _context: &AgentContext,
    ) -> anyhow::Result<Box<dyn AgentRuntime>> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        record(&self.calls, AgentCall::Created(agent.id.clone()));
        Ok(Box::new(RecordingAgent {
            id: agent.id.clone(),
            name: agent.name.clone(),
            calls: Arc::clone(&self.calls),
            fail_connect: self.fail_connect,
        }))
    }

    async fn dispose_agent(&self, agent_id: &str) -> anyhow::Result<()> {
        record(&self.calls, AgentCall::Disposed(agent_id.to_owned()));
        if self.fail_dispose {
            anyhow::bail!("agent {agent_id} could not be disposed");
        }
        Ok(())
    }
}

pub struct RecordingAgent {
    id: String,
    name: String,
    calls: Arc<Mutex<Vec<AgentCall>>>,
    fail_connect: bool,
}

#[async_trait]
impl AgentRuntime for RecordingAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> anyhow::Result<()> {
        if self.fail_connect {
            anyhow::bail!("agent {} refused to connect", self.id);
        }
        record(&self.calls, AgentCall::Connected(self.id.clone()));
        Ok(())
    }

    async fn disconnect(&mut self) -> anyhow::Result<()> {
        record(&self.calls, AgentCall::Disconnected(self.id.clone()));
        Ok(())
    }
}
