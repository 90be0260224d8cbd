// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Records the authority consults while handling events.
//!
//! [`RecordsRepository`] is the seam to whatever store backs the authority.
//! [`MemoryRecords`] is a complete in-process implementation, optionally
//! seeded from a JSON file.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use zeroize::Zeroizing;

use crate::model::{AgentModel, Credential, Function, HostModel, Plugin};

#[async_trait]
pub trait RecordsRepository: Send + Sync {
    async fn get_host_by_id(&self, host_id: &str) -> anyhow::Result<Option<HostModel>>;

    /// Enabled agents assigned to the host.
    async fn get_agents_for_host_by_id(&self, host_id: &str) -> anyhow::Result<Vec<AgentModel>>;

    /// Record any reported plugins the authority does not know yet, then
    /// return every plugin associated with the host.
    async fn sync_plugins_for_host_by_id(
        &self,
        host_id: &str,
        reported: &[Plugin],
    ) -> anyhow::Result<Vec<Plugin>>;

    async fn get_credential_for_agent_by_name(
        &self,
        agent_id: &str,
        credential_name: &str,
    ) -> anyhow::Result<Option<Zeroizing<String>>>;

    async fn get_host_id_for_agent_by_id(&self, agent_id: &str) -> anyhow::Result<Option<String>>;
}

/// Seed file layout for [`MemoryRecords::load`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordsSeed {
    #[serde(default)]
    pub hosts: Vec<HostSeed>,
    #[serde(default)]
    pub agents: Vec<AgentModel>,
    #[serde(default)]
    pub credentials: Vec<Credential>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostSeed {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub plugins: Vec<Plugin>,
}

struct HostEntry {
    host: HostModel,
    owner_id: Option<String>,
}

#[derive(Default)]
struct RecordsState {
    hosts: HashMap<String, HostEntry>,
    agents: HashMap<String, AgentModel>,
    credentials: Vec<Credential>,
}

#[derive(Default)]
pub struct MemoryRecords {
    state: RwLock<RecordsState>,
}

impl MemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: RecordsSeed) -> Self {
        let mut state = RecordsState::default();
        for h in seed.hosts {
            let host = HostModel { id: h.id.clone(), name: h.name, plugins: h.plugins };
            state.hosts.insert(h.id, HostEntry { host, owner_id: h.owner_id });
        }
        for agent in seed.agents {
            state.agents.insert(agent.id.clone(), agent);
        }
        state.credentials = seed.credentials;
        Self { state: RwLock::new(state) }
    }

    /// Read a JSON seed file. Blocks on file I/O; call at startup or from
    /// `spawn_blocking`, not from async code.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading records seed {}", path.display()))?;
        let seed: RecordsSeed = serde_json::from_str(&contents)
            .with_context(|| format!("parsing records seed {}", path.display()))?;
        debug!(
            hosts = seed.hosts.len(),
            agents = seed.agents.len(),
            credentials = seed.credentials.len(),
            "records seed loaded"
        );
        Ok(Self::from_seed(seed))
    }

    pub async fn add_host(&self, id: &str, name: &str, owner_id: Option<&str>) {
        let host = HostModel { id: id.to_owned(), name: name.to_owned(), plugins: Vec::new() };
        self.state
            .write()
            .await
            .hosts
            .insert(id.to_owned(), HostEntry { host, owner_id: owner_id.map(str::to_owned) });
    }

    pub async fn add_agent(&self, agent: AgentModel) {
        self.state.write().await.agents.insert(agent.id.clone(), agent);
    }

    pub async fn remove_agent(&self, agent_id: &str) -> Option<AgentModel> {
        self.state.write().await.agents.remove(agent_id)
    }

    pub async fn add_credential(&self, credential: Credential) {
        self.state.write().await.credentials.push(credential);
    }

    pub async fn plugins_for_host(&self, host_id: &str) -> Vec<Plugin> {
        self.state.read().await.hosts.get(host_id).map(|e| e.host.plugins.clone()).unwrap_or_default()
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Canonical copy of a reported plugin with fresh ids.
fn assign_ids(reported: &Plugin) -> Plugin {
    Plugin {
        id: Some(new_id()),
        unique_name: reported.unique_name.clone().or_else(|| Some(reported.name.clone())),
        name: reported.name.clone(),
        description: reported.description.clone(),
        functions: reported
            .functions
            .iter()
            .map(|f| Function { id: Some(new_id()), ..f.clone() })
            .collect(),
    }
}

#[async_trait]
impl RecordsRepository for MemoryRecords {
    async fn get_host_by_id(&self, host_id: &str) -> anyhow::Result<Option<HostModel>> {
        Ok(self.state.read().await.hosts.get(host_id).map(|e| e.host.clone()))
    }

    async fn get_agents_for_host_by_id(&self, host_id: &str) -> anyhow::Result<Vec<AgentModel>> {
        let state = self.state.read().await;
        let mut agents: Vec<AgentModel> = state
            .agents
            .values()
            .filter(|a| a.is_enabled && a.host_id.as_deref() == Some(host_id))
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    async fn sync_plugins_for_host_by_id(
        &self,
        host_id: &str,
        reported: &[Plugin],
    ) -> anyhow::Result<Vec<Plugin>> {
        let mut state = self.state.write().await;
        let entry = state
            .hosts
            .get_mut(host_id)
            .with_context(|| format!("unknown host {host_id}"))?;
        for plugin in reported {
            if plugin.position_in(&entry.host.plugins).is_none() {
                debug!(host_id, plugin = %plugin.name, "recording new plugin");
                entry.host.plugins.push(assign_ids(plugin));
            }
        }
        Ok(entry.host.plugins.clone())
    }

    async fn get_credential_for_agent_by_name(
        &self,
        agent_id: &str,
        credential_name: &str,
    ) -> anyhow::Result<Option<Zeroizing<String>>> {
        let state = self.state.read().await;
        let owner = state
            .agents
            .get(agent_id)
            .and_then(|a| a.host_id.as_deref())
            .and_then(|h| state.hosts.get(h))
            .and_then(|e| e.owner_id.as_deref());
        let Some(owner) = owner else { return Ok(None) };
        Ok(state
            .credentials
            .iter()
            .find(|c| c.owner_id == owner && c.agent_id == agent_id && c.name == credential_name)
            .map(|c| Zeroizing::new(c.value.clone())))
    }

    async fn get_host_id_for_agent_by_id(&self, agent_id: &str) -> anyhow::Result<Option<String>> {
        Ok(self.state.read().await.agents.get(agent_id).and_then(|a| a.host_id.clone()))
    }
}

#[cfg(test)]
#[path = "records_tests.rs"]
mod tests;
