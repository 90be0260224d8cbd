// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Default agent runtime: an agent that can fetch its credentials from the
//! authority and exposes the host's capabilities. Anything smarter is built
//! by a custom [`AgentFactory`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::credential::client::Secret;
use crate::credential::{CredentialClient, CredentialClientConfig, KeyPair};
use crate::host::{AgentContext, AgentFactory, AgentRuntime};
use crate::model::{AgentModel, Plugin};

pub struct Agent {
    id: String,
    name: String,
    plugins: Vec<Plugin>,
    credentials: Arc<CredentialClient>,
}

impl Agent {
    pub fn new(model: &AgentModel, context: &AgentContext, keys: KeyPair, config: CredentialClientConfig) -> Self {
        let credentials = CredentialClient::new(
            &context.authority_id,
            &model.id,
            Arc::clone(&context.bus),
            keys,
            config,
        );
        Self {
            id: model.id.clone(),
            name: model.name.clone(),
            plugins: context.plugins.clone(),
            credentials: Arc::new(credentials),
        }
    }

    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    pub async fn get_credential(&self, name: &str) -> crate::Result<Secret> {
        self.credentials.get_credential(name).await
    }

    pub fn credentials(&self) -> &Arc<CredentialClient> {
        &self.credentials
    }
}

#[async_trait]
impl AgentRuntime for Agent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> anyhow::Result<()> {
        self.credentials.start().await?;
        debug!(agent_id = %self.id, plugins = self.plugins.len(), "agent listening");
        Ok(())
    }

    async fn disconnect(&mut self) -> anyhow::Result<()> {
        self.credentials.stop().await;
        Ok(())
    }
}

/// Builds [`Agent`]s with a fresh key pair each.
#[derive(Default)]
pub struct DefaultAgentFactory {
    config: CredentialClientConfig,
    key_bits: Option<usize>,
    live: Mutex<HashMap<String, Arc<CredentialClient>>>,
}

impl DefaultAgentFactory {
    pub fn new(config: CredentialClientConfig) -> Self {
        Self { config, ..Self::default() }
    }

    /// Use smaller keys; key generation dominates agent startup in tests.
    pub fn with_key_bits(mut self, bits: usize) -> Self {
        self.key_bits = Some(bits);
        self
    }

    /// Credential client of a live agent.
    pub async fn credentials(&self, agent_id: &str) -> Option<Arc<CredentialClient>> {
        self.live.lock().await.get(agent_id).cloned()
    }
}

#[async_trait]
impl AgentFactory for DefaultAgentFactory {
    async fn create_agent(
        &self,
        model: &AgentModel,
        context: &AgentContext,
    ) -> anyhow::Result<Box<dyn AgentRuntime>> {
        let bits = self.key_bits;
        let keys = tokio::task::spawn_blocking(move || match bits {
            Some(bits) => KeyPair::generate_with_bits(bits),
            None => KeyPair::generate(),
        })
        .await??;
        let agent = Agent::new(model, context, keys, self.config);
        self.live.lock().await.insert(model.id.clone(), Arc::clone(agent.credentials()));
        info!(agent_id = %model.id, host_id = %context.host_id, "agent created");
        Ok(Box::new(agent))
    }

    async fn dispose_agent(&self, agent_id: &str) -> anyhow::Result<()> {
        if self.live.lock().await.remove(agent_id).is_some() {
            debug!(agent_id, "agent disposed");
        }
        Ok(())
    }
}
