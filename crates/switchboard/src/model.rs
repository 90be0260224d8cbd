// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Records exchanged between authority and hosts.
//!
//! Field names serialize in snake_case. Ids are optional where a host may
//! describe something before the authority has assigned it an id.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub description: String,
}

impl Parameter {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { name: name.into(), kind: kind.into(), description: String::new() }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<Parameter>,
    #[serde(default)]
    pub outputs: Vec<Parameter>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plugin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_name: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub functions: Vec<Function>,
}

impl Plugin {
    /// Locate the plugin in `plugins` that denotes the same capability:
    /// first by unique name, then by display name.
    pub fn position_in(&self, plugins: &[Plugin]) -> Option<usize> {
        if let Some(ref unique) = self.unique_name {
            if let Some(i) =
                plugins.iter().position(|p| p.unique_name.as_deref() == Some(unique.as_str()))
            {
                return Some(i);
            }
        }
        plugins.iter().position(|p| p.name == self.name)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// A host as known to the authority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostModel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub plugins: Vec<Plugin>,
}

fn enabled() -> bool {
    true
}

/// An agent as known to the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentModel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    #[serde(default = "enabled")]
    pub is_enabled: bool,
}

impl AgentModel {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            host_id: None,
            is_enabled: true,
        }
    }

    pub fn on_host(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = Some(host_id.into());
        self
    }
}

/// A named secret owned by a user and granted to one agent.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub owner_id: String,
    pub agent_id: String,
    pub name: String,
    pub value: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("owner_id", &self.owner_id)
            .field("agent_id", &self.agent_id)
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .finish()
    }
}
