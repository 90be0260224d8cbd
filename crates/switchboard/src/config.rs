// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::discovery::DiscoveryConfig;
use crate::host::HostConfig;

/// Coordination protocol between an authority and its hosts.
#[derive(Debug, Parser)]
#[command(name = "switchboard", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log format (json or text).
    #[arg(long, global = true, env = "SWITCHBOARD_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, env = "SWITCHBOARD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the authority: answer host connects and credential requests.
    Authority(AuthorityArgs),
    /// Run a host: connect to the authority and run the agents it assigns.
    Host(HostArgs),
}

/// Where to find the authority and its broker.
#[derive(Debug, Clone, Args)]
pub struct DiscoveryArgs {
    /// Public authority URI; its host is the authority id.
    #[arg(long, env = "SWITCHBOARD_AUTHORITY_URI")]
    pub authority_uri: String,

    /// Reach discovery and the token endpoint through this URI instead.
    #[arg(long, env = "SWITCHBOARD_AUTHORITY_URI_INTERNAL")]
    pub authority_uri_internal: Option<String>,

    /// Broker URI, overriding the discovered one.
    #[arg(long, env = "SWITCHBOARD_BROKER_URI")]
    pub broker_uri: Option<String>,

    /// Upper bound for the discovery retry delay, in seconds.
    #[arg(long, env = "SWITCHBOARD_MAX_BACKOFF_SECS", default_value_t = 16)]
    pub max_backoff_secs: u64,
}

impl DiscoveryArgs {
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs.max(1))
    }

    pub fn to_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            authority_uri: self.authority_uri.clone(),
            authority_uri_internal: self.authority_uri_internal.clone(),
            broker_uri: self.broker_uri.clone(),
            max_backoff: self.max_backoff(),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct AuthorityArgs {
    #[command(flatten)]
    pub discovery: DiscoveryArgs,

    /// Bearer token the authority presents to the broker.
    #[arg(long, env = "SWITCHBOARD_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: String,

    /// JSON file seeding hosts, agents, and credentials.
    #[arg(long, env = "SWITCHBOARD_RECORDS")]
    pub records: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct HostArgs {
    #[command(flatten)]
    pub discovery: DiscoveryArgs,

    /// Host client id issued by the authority.
    #[arg(long, env = "SWITCHBOARD_HOST_ID")]
    pub host_id: String,

    /// Host client secret.
    #[arg(long, env = "SWITCHBOARD_HOST_SECRET", hide_env_values = true)]
    pub host_secret: String,

    /// Display name announced to the authority (defaults to the host id).
    #[arg(long, env = "SWITCHBOARD_HOST_NAME")]
    pub host_name: Option<String>,

    /// Delay between connection attempts, in seconds.
    #[arg(long, env = "SWITCHBOARD_RETRY_SECS", default_value_t = 10)]
    pub retry_secs: u64,
}

impl HostArgs {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }

    pub fn to_config(&self) -> HostConfig {
        HostConfig {
            discovery: self.discovery.to_config(),
            host_id: self.host_id.clone(),
            host_secret: self.host_secret.clone(),
            host_name: self.host_name.clone(),
            retry_delay: self.retry_delay(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
