// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Errors surfaced by the coordination layer.
///
/// Variants fall into four groups: transient connectivity failures (retried
/// by the caller's loop), protocol violations (dropped by dispatch), missing
/// records (logged, no response), and caller misuse (returned immediately).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connectivity failure: {0}")]
    Connectivity(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("capability already registered: {0}")]
    DuplicateCapability(String),
    #[error("topic already has a handler: {0}")]
    DuplicateSubscription(String),
    #[error("not connected")]
    NotConnected,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("crypto failure: {0}")]
    Crypto(String),
    #[error("records repository failed: {0:#}")]
    Records(anyhow::Error),
    #[error("agent runtime failed: {0:#}")]
    Agent(anyhow::Error),
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub fn connectivity(err: impl fmt::Display) -> Self {
        Self::Connectivity(err.to_string())
    }

    /// Whether an outer retry loop should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connectivity(_) => "CONNECTIVITY",
            Self::Protocol(_) => "PROTOCOL",
            Self::NotFound(_) => "NOT_FOUND",
            Self::DuplicateCapability(_) => "DUPLICATE_CAPABILITY",
            Self::DuplicateSubscription(_) => "DUPLICATE_SUBSCRIPTION",
            Self::NotConnected => "NOT_CONNECTED",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Crypto(_) => "CRYPTO",
            Self::Records(_) => "RECORDS",
            Self::Agent(_) => "AGENT",
            Self::Cancelled => "CANCELLED",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
