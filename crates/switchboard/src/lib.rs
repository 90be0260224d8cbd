// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Switchboard: coordination protocol between a central Authority and the
//! Host processes that run its Agents, carried entirely over pub/sub.

pub mod acl;
pub mod agent;
pub mod authority;
pub mod backoff;
pub mod bus;
pub mod config;
pub mod credential;
pub mod discovery;
pub mod error;
pub mod host;
pub mod message;
pub mod model;
pub mod oauth;
pub mod records;
pub mod registry;
pub mod test_support;
pub mod topic;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

pub use crate::error::{Error, Result};

use crate::agent::DefaultAgentFactory;
use crate::authority::Authority;
use crate::bus::nats::NatsTransport;
use crate::config::{AuthorityArgs, Cli, Command, HostArgs};
use crate::host::{Host, HostEvent};
use crate::records::MemoryRecords;

/// Run the selected role until Ctrl-C (or, for a host, until disconnected).
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
            }
            shutdown.cancel();
        });
    }

    match cli.command {
        Command::Authority(args) => run_authority(args, shutdown).await,
        Command::Host(args) => run_host(args, shutdown).await,
    }
}

async fn run_authority(args: AuthorityArgs, shutdown: CancellationToken) -> anyhow::Result<()> {
    let records = match args.records {
        Some(path) => tokio::task::spawn_blocking(move || MemoryRecords::load(&path)).await??,
        None => MemoryRecords::new(),
    };
    let authority = Authority::new(
        args.discovery.to_config(),
        Arc::new(NatsTransport::new()),
        Arc::new(records),
    )?;

    authority.connect(&args.access_token, &shutdown).await?;
    info!(authority_id = %authority.id(), "authority running");

    shutdown.cancelled().await;
    authority.disconnect().await;
    Ok(())
}

async fn run_host(args: HostArgs, shutdown: CancellationToken) -> anyhow::Result<()> {
    let host = Host::new(
        args.to_config(),
        Arc::new(NatsTransport::new()),
        Arc::new(DefaultAgentFactory::default()),
    )?;

    let mut events = host.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                HostEvent::AgentConnected { agent_id, name } => {
                    info!(agent_id = %agent_id, name = %name, "agent connected");
                }
                HostEvent::AgentDisconnected { agent_id } => {
                    info!(agent_id = %agent_id, "agent disconnected");
                }
            }
        }
    });

    host.run(&shutdown).await?;
    Ok(())
}
