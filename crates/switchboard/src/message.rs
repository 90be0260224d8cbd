// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker message envelope and the closed set of protocol events.
//!
//! On the wire an event carries a string-keyed map whose `type` entry names
//! the event. Structured fields may arrive either as embedded JSON or as a
//! JSON-encoded string; [`Event::decode`] accepts both and always emits the
//! embedded form.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::credential::Jwk;
use crate::model::{AgentModel, HostModel, Plugin};
use crate::topic::Address;

/// String-keyed payload of an event.
pub type Data = serde_json::Map<String, Value>;

pub const HOST_CONNECT: &str = "host_connect";
pub const HOST_WELCOME: &str = "host_welcome";
pub const AGENT_CONNECT: &str = "agent_connect";
pub const AGENT_DISCONNECT: &str = "agent_disconnect";
pub const CREDENTIAL_REQUEST: &str = "credential_request";
pub const CREDENTIAL_RESPONSE: &str = "credential_response";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Event,
    Information,
    Context,
    Unknown,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "EVENT",
            Self::Information => "INFORMATION",
            Self::Context => "CONTEXT",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "EVENT" => Self::Event,
            "INFORMATION" => Self::Information,
            "CONTEXT" => Self::Context,
            _ => Self::Unknown,
        }
    }
}

/// A message as seen by a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub kind: MessageKind,
    pub topic: String,
    /// Parsed from the topic; `None` when the topic is not an event address.
    pub sender_id: Option<String>,
    pub data: Option<Data>,
}

impl BrokerMessage {
    pub fn event(topic: impl Into<String>, data: Data) -> Self {
        let topic = topic.into();
        let sender_id = sender_of(&topic);
        Self { kind: MessageKind::Event, topic, sender_id, data: Some(data) }
    }

    /// Build from transport fields. Payloads that are not a JSON object are
    /// carried as `data: None` so dispatch can drop them.
    pub fn from_wire(topic: impl Into<String>, kind: MessageKind, payload: &[u8]) -> Self {
        let topic = topic.into();
        let sender_id = sender_of(&topic);
        let data = match kind {
            MessageKind::Event => serde_json::from_slice::<Data>(payload).ok(),
            _ => None,
        };
        Self { kind, topic, sender_id, data }
    }

    pub fn payload(&self) -> Vec<u8> {
        match self.data {
            Some(ref data) => serde_json::to_vec(data).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    pub fn decode(&self) -> Result<Event, DecodeError> {
        if self.kind != MessageKind::Event {
            return Err(DecodeError::NotEvent);
        }
        let data = self.data.as_ref().ok_or(DecodeError::NotEvent)?;
        Event::decode(data)
    }
}

fn sender_of(topic: &str) -> Option<String> {
    Address::parse(topic).and_then(|a| a.sender_id().map(str::to_owned))
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("message is not an event")]
    NotEvent,
    #[error("event has no type")]
    MissingType,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{field}`: {source}")]
    InvalidField { field: &'static str, source: serde_json::Error },
    #[error("field `{0}` is empty")]
    Empty(&'static str),
}

/// Protocol events. Anything with an unrecognised `type` decodes to
/// [`Event::Unknown`] and is ignored by dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    HostConnect { host: HostModel },
    HostWelcome { host: HostModel, plugins: Vec<Plugin>, agents: Vec<AgentModel> },
    AgentConnect { agent: AgentModel },
    AgentDisconnect { agent_id: String },
    CredentialRequest { agent_id: String, credential_name: String, jwk: Jwk },
    CredentialResponse { credential_name: String, encrypted_credential: String },
    Unknown { kind: String },
}

impl Event {
    pub fn kind(&self) -> &str {
        match self {
            Self::HostConnect { .. } => HOST_CONNECT,
            Self::HostWelcome { .. } => HOST_WELCOME,
            Self::AgentConnect { .. } => AGENT_CONNECT,
            Self::AgentDisconnect { .. } => AGENT_DISCONNECT,
            Self::CredentialRequest { .. } => CREDENTIAL_REQUEST,
            Self::CredentialResponse { .. } => CREDENTIAL_RESPONSE,
            Self::Unknown { kind } => kind.as_str(),
        }
    }

    pub fn decode(data: &Data) -> Result<Self, DecodeError> {
        let kind = match data.get("type") {
            Some(Value::String(s)) if !s.is_empty() => s.as_str(),
            _ => return Err(DecodeError::MissingType),
        };
        let event = match kind {
            HOST_CONNECT => {
                let host: HostModel = field(data, "host")?;
                non_empty("host.id", &host.id)?;
                Self::HostConnect { host }
            }
            HOST_WELCOME => {
                let host: HostModel = field(data, "host")?;
                non_empty("host.id", &host.id)?;
                Self::HostWelcome {
                    host,
                    plugins: optional_field(data, "plugins")?.unwrap_or_default(),
                    agents: optional_field(data, "agents")?.unwrap_or_default(),
                }
            }
            AGENT_CONNECT => {
                let agent: AgentModel = field(data, "agent")?;
                non_empty("agent.id", &agent.id)?;
                Self::AgentConnect { agent }
            }
            AGENT_DISCONNECT => {
                let agent_id: String = field(data, "agent_id")?;
                non_empty("agent_id", &agent_id)?;
                Self::AgentDisconnect { agent_id }
            }
            CREDENTIAL_REQUEST => {
                let agent_id: String = field(data, "agent_id")?;
                let credential_name: String = field(data, "credential_name")?;
                non_empty("agent_id", &agent_id)?;
                non_empty("credential_name", &credential_name)?;
                Self::CredentialRequest { agent_id, credential_name, jwk: field(data, "jwk")? }
            }
            CREDENTIAL_RESPONSE => {
                let credential_name: String = field(data, "credential_name")?;
                non_empty("credential_name", &credential_name)?;
                Self::CredentialResponse {
                    credential_name,
                    encrypted_credential: field(data, "encrypted_credential")?,
                }
            }
            other => Self::Unknown { kind: other.to_owned() },
        };
        Ok(event)
    }

    /// Encode as a data map stamped with `timestamp`.
    pub fn to_data(&self, timestamp: &str) -> Data {
        let mut data = Data::new();
        data.insert("type".to_owned(), Value::String(self.kind().to_owned()));
        data.insert("timestamp".to_owned(), Value::String(timestamp.to_owned()));
        match self {
            Self::HostConnect { host } => {
                insert(&mut data, "host", host);
            }
            Self::HostWelcome { host, plugins, agents } => {
                insert(&mut data, "host", host);
                insert(&mut data, "plugins", plugins);
                insert(&mut data, "agents", agents);
            }
            Self::AgentConnect { agent } => {
                insert(&mut data, "agent", agent);
            }
            Self::AgentDisconnect { agent_id } => {
                insert(&mut data, "agent_id", agent_id);
            }
            Self::CredentialRequest { agent_id, credential_name, jwk } => {
                insert(&mut data, "agent_id", agent_id);
                insert(&mut data, "credential_name", credential_name);
                insert(&mut data, "jwk", jwk);
            }
            Self::CredentialResponse { credential_name, encrypted_credential } => {
                insert(&mut data, "credential_name", credential_name);
                insert(&mut data, "encrypted_credential", encrypted_credential);
            }
            Self::Unknown { .. } => {}
        }
        data
    }
}

fn insert(data: &mut Data, key: &str, value: &impl Serialize) {
    data.insert(key.to_owned(), serde_json::to_value(value).unwrap_or_default());
}

fn non_empty(name: &'static str, value: &str) -> Result<(), DecodeError> {
    if value.trim().is_empty() {
        return Err(DecodeError::Empty(name));
    }
    Ok(())
}

fn field<T: DeserializeOwned>(data: &Data, key: &'static str) -> Result<T, DecodeError> {
    optional_field(data, key)?.ok_or(DecodeError::MissingField(key))
}

// A string value is first tried as nested JSON, then as the value itself.
fn optional_field<T: DeserializeOwned>(data: &Data, key: &'static str) -> Result<Option<T>, DecodeError> {
    let value = match data.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(v) => v,
    };
    if let Value::String(s) = value {
        if let Ok(parsed) = serde_json::from_str::<T>(s) {
            return Ok(Some(parsed));
        }
    }
    T::deserialize(value)
        .map(Some)
        .map_err(|source| DecodeError::InvalidField { field: key, source })
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
