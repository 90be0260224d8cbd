// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hierarchical topic addressing.
//!
//! Every event topic has five slash-separated segments:
//!
//! ```text
//! event/{sender}/{authority}/{host}/{agent}
//! ```
//!
//! `-` marks an absent host or agent (and stands for the authority in the
//! sender position), `+` is a single-segment wildcard used only in
//! subscription filters. A generator is bound to one authority and one
//! sender and produces the topics that participant listens on or writes to.

pub const EVENT_PREFIX: &str = "event/";
pub const CONNECT_PREFIX: &str = "connect/";

/// Placeholder for an absent host/agent, or the authority as sender.
pub const NONE: &str = "-";

/// Single-segment wildcard.
pub const ANY: &str = "+";

/// Builds subscribe and publish topics for one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicGenerator {
    authority_id: String,
    sender_segment: String,
    sender_id: String,
}

impl TopicGenerator {
    pub fn new(authority_id: impl Into<String>, sender_id: impl Into<String>) -> Self {
        let authority_id = authority_id.into();
        let sender_id = sender_id.into();
        let sender_segment = if sender_id == authority_id { NONE.to_owned() } else { sender_id.clone() };
        Self { authority_id, sender_segment, sender_id }
    }

    pub fn authority_id(&self) -> &str {
        &self.authority_id
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn connect_to(&self, topic: &str) -> String {
        format!("{CONNECT_PREFIX}{topic}")
    }

    /// Filter matching events from any sender addressed to `(host, agent)`.
    pub fn subscribe_as(&self, host_id: Option<&str>, agent_id: Option<&str>) -> String {
        format!(
            "{EVENT_PREFIX}{ANY}/{}/{}/{}",
            self.authority_id,
            host_id.unwrap_or(NONE),
            agent_id.unwrap_or(NONE)
        )
    }

    /// Topic for an event from this sender addressed to `(host, agent)`.
    pub fn publish_to(&self, host_id: Option<&str>, agent_id: Option<&str>) -> String {
        format!(
            "{EVENT_PREFIX}{}/{}/{}/{}",
            self.sender_segment,
            self.authority_id,
            host_id.unwrap_or(NONE),
            agent_id.unwrap_or(NONE)
        )
    }

    pub fn subscribe_as_authority(&self) -> String {
        self.subscribe_as(None, None)
    }

    pub fn subscribe_as_host(&self) -> String {
        self.subscribe_as(Some(&self.sender_segment), None)
    }

    pub fn subscribe_as_agent(&self) -> String {
        self.subscribe_as(None, Some(&self.sender_segment))
    }

    pub fn publish_to_authority(&self) -> String {
        self.publish_to(None, None)
    }

    pub fn publish_to_host(&self, host_id: &str) -> String {
        self.publish_to(Some(host_id), None)
    }

    pub fn publish_to_agent(&self, agent_id: &str) -> String {
        self.publish_to(None, Some(agent_id))
    }
}

/// A parsed event topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub sender: String,
    pub authority: String,
    pub host: Option<String>,
    pub agent: Option<String>,
}

impl Address {
    /// Parse `event/{sender}/{authority}/{host}/{agent}`. Returns `None` for
    /// anything else, including `connect/` topics.
    pub fn parse(topic: &str) -> Option<Self> {
        let rest = topic.strip_prefix(EVENT_PREFIX)?;
        let parts: Vec<&str> = rest.split('/').collect();
        let [sender, authority, host, agent] = parts.as_slice() else {
            return None;
        };
        if sender.is_empty() || authority.is_empty() || host.is_empty() || agent.is_empty() {
            return None;
        }
        let optional = |seg: &str| (seg != NONE).then(|| seg.to_owned());
        Some(Self {
            sender: (*sender).to_owned(),
            authority: (*authority).to_owned(),
            host: optional(*host),
            agent: optional(*agent),
        })
    }

    /// Concrete sender id; the `-` placeholder resolves to the authority.
    pub fn sender_id(&self) -> Option<&str> {
        match self.sender.as_str() {
            NONE => Some(&self.authority),
            ANY => None,
            other => Some(other),
        }
    }
}

/// Whether a concrete `topic` is delivered to a subscription `filter`.
///
/// Segments must match exactly, except that `+` in the filter matches any
/// single segment. Segment counts must be equal.
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');
    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (None, None) => return true,
            (Some(f), Some(t)) if f == ANY || f == t => continue,
            _ => return false,
        }
    }
}

#[cfg(test)]
#[path = "topic_tests.rs"]
mod tests;
