// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker topic access control.
//!
//! The broker asks, for every publish and subscribe, whether a client may
//! touch a topic. Event topics are checked against per-role masks of four
//! segments (`sender/authority/host/agent`):
//!
//! | mask seg | matches                                        |
//! |----------|------------------------------------------------|
//! | `+`      | anything                                       |
//! | `*`      | anything except `0`                            |
//! | `?`      | an id whose relationship is verified by lookup |
//! | other    | itself                                         |
//!
//! Subscriptions must use `+` as sender; writes must carry the caller's own
//! id as sender. `connect/` topics are always allowed.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::topic::{ANY, CONNECT_PREFIX, EVENT_PREFIX, NONE};

/// Segment matching any id except `0`.
pub const ANY_EXCLUSIVE: &str = "*";
/// Segment meaning "all".
pub const ALL: &str = "0";
/// Segment whose value must pass a relationship lookup.
pub const QUERY: &str = "?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Subscribe,
}

impl Access {
    /// Map the broker's access code. `3` (read+write) is never granted.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Read),
            2 => Some(Self::Write),
            4 => Some(Self::Subscribe),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Authority,
    Host,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "authority" => Some(Self::Authority),
            "host" => Some(Self::Host),
            _ => None,
        }
    }
}

/// Broker ACL webhook body.
#[derive(Debug, Clone, Deserialize)]
pub struct AclCheckRequest {
    pub acc: u8,
    #[serde(default)]
    pub clientid: String,
    pub topic: String,
}

/// Confirms that a host may act for the given source and target agents.
#[async_trait]
pub trait RelationshipVerifier: Send + Sync {
    async fn verify(
        &self,
        host_id: &str,
        source_id: Option<&str>,
        target_agent_id: Option<&str>,
    ) -> anyhow::Result<bool>;
}

/// The caller whose access is being checked.
#[derive(Debug, Clone, Default)]
pub struct Principal<'a> {
    pub roles: &'a [Role],
    /// Present when the caller authenticated as a host.
    pub host_id: Option<&'a str>,
    /// The authority the caller belongs to.
    pub authority_id: Option<&'a str>,
}

pub struct MessageAclChecker<V> {
    verifier: V,
}

impl<V: RelationshipVerifier> MessageAclChecker<V> {
    pub fn new(verifier: V) -> Self {
        Self { verifier }
    }

    pub async fn check_access(&self, request: &AclCheckRequest, principal: &Principal<'_>) -> bool {
        if request.topic.starts_with(CONNECT_PREFIX) {
            return true;
        }
        let topic = request.topic.strip_prefix(EVENT_PREFIX).unwrap_or(&request.topic);
        let Some(access) = Access::from_code(request.acc) else {
            debug!(acc = request.acc, topic, "denied: unsupported access code");
            return false;
        };
        if topic.is_empty() {
            return false;
        }

        for mask in masks(principal, access) {
            if check_mask(topic, &mask, access) {
                return true;
            }
            if mask.contains(QUERY) {
                let Some(host_id) = principal.host_id else { continue };
                if self.check_query_mask(topic, &mask, access, host_id).await {
                    return true;
                }
            }
        }
        debug!(client = %request.clientid, topic, ?access, "denied");
        false
    }

    async fn check_query_mask(&self, topic: &str, mask: &str, access: Access, host_id: &str) -> bool {
        let Some((t, m)) = split_pair(topic, mask) else { return false };

        for i in 1..4 {
            if m[i] != QUERY && !segment_matches(m[i], t[i]) {
                return false;
            }
        }

        let source = (m[0] == QUERY).then_some(t[0]);
        let target = (m[3] == QUERY).then_some(t[3]);
        if source == Some(NONE) || target == Some(NONE) {
            return false;
        }
        let source = match access {
            Access::Subscribe => {
                if t[0] != ANY {
                    return false;
                }
                None
            }
            Access::Write => {
                if source.is_some() && source == target {
                    return false;
                }
                if source.is_none() && m[0] != t[0] {
                    return false;
                }
                source
            }
            Access::Read => source,
        };

        match self.verifier.verify(host_id, source, target).await {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(host_id, err = %e, "relationship lookup failed");
                false
            }
        }
    }
}

/// Masks granted to a principal for one kind of access, in check order.
pub fn masks(principal: &Principal<'_>, access: Access) -> Vec<String> {
    let mut masks = Vec::new();
    let Some(auth) = principal.authority_id else { return masks };

    if principal.roles.contains(&Role::Authority) {
        match access {
            Access::Read | Access::Subscribe => {
                masks.push(format!("{ANY_EXCLUSIVE}/{auth}/{NONE}/{NONE}"));
            }
            Access::Write => masks.push(format!("{NONE}/{auth}/{ANY}/{ANY}")),
        }
    }
    if principal.roles.contains(&Role::Host) {
        let Some(host) = principal.host_id else { return masks };
        match access {
            Access::Read | Access::Subscribe => masks.extend([
                format!("{NONE}/{auth}/{ALL}/{NONE}"),
                format!("{NONE}/{auth}/{host}/{NONE}"),
                format!("{NONE}/{auth}/{host}/{QUERY}"),
                format!("{ANY_EXCLUSIVE}/{auth}/{NONE}/{QUERY}"),
            ]),
            Access::Write => masks.extend([
                format!("{host}/{auth}/{NONE}/{NONE}"),
                format!("{QUERY}/{auth}/{NONE}/{NONE}"),
                format!("{QUERY}/{auth}/{NONE}/{QUERY}"),
            ]),
        }
    }
    masks
}

fn split_pair<'a>(topic: &'a str, mask: &'a str) -> Option<(Vec<&'a str>, Vec<&'a str>)> {
    let t: Vec<&str> = topic.split('/').collect();
    let m: Vec<&str> = mask.split('/').collect();
    (t.len() == 4 && m.len() == 4).then_some((t, m))
}

fn segment_matches(mask: &str, topic: &str) -> bool {
    match mask {
        ANY => true,
        ANY_EXCLUSIVE => topic != ALL,
        QUERY => false,
        other => other == topic,
    }
}

/// Structural mask check, without relationship lookups.
pub fn check_mask(topic: &str, mask: &str, access: Access) -> bool {
    let Some((t, m)) = split_pair(topic, mask) else { return false };
    match access {
        Access::Subscribe if t[0] != ANY => return false,
        Access::Write if t[0] != m[0] => return false,
        _ => {}
    }
    (1..4).all(|i| segment_matches(m[i], t[i]))
}

#[cfg(test)]
#[path = "acl_tests.rs"]
mod tests;
