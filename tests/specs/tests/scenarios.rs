// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end protocol scenarios: authority and host talking through the
//! in-process broker, with discovery and tokens served over real HTTP.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use switchboard::agent::DefaultAgentFactory;
use switchboard::credential::CredentialClientConfig;
use switchboard::host::{Host, HostEvent, HostState};
use switchboard::model::{AgentModel, Credential};
use switchboard::registry::{Capability, FunctionDescriptor, PluginDescriptor};
use switchboard::test_support::{AgentCall, RecordingFactory};
use switchboard::Error;
use switchboard_specs::{eventually, Scenario, HOST_ID, OWNER_ID, TIMEOUT};

struct Weather;

impl Capability for Weather {
    fn describe() -> PluginDescriptor {
        PluginDescriptor::new("Weather")
            .unique_name("Acme.Weather")
            .description("Forecasts")
            .function(
                FunctionDescriptor::new("forecast")
                    .input("city", "string", "City name")
                    .returns("string", "Forecast text"),
            )
    }
}

fn quick_credentials() -> CredentialClientConfig {
    CredentialClientConfig { timeout: Duration::from_millis(300), attempts: 2 }
}

// ── host connect ──────────────────────────────────────────────────────────

#[tokio::test]
async fn host_with_nothing_gets_empty_welcome() -> anyhow::Result<()> {
    let scenario = Scenario::start().await?;
    let factory = Arc::new(RecordingFactory::new());
    let host = scenario.new_host(factory.clone())?;

    scenario.connect_host(&host).await?;

    assert_eq!(host.state(), HostState::Connected);
    assert!(host.is_connected());
    assert_eq!(scenario.kinds(&scenario.authority_inbox())?, vec!["host_connect"]);
    assert_eq!(scenario.kinds(&scenario.host_inbox())?, vec!["host_welcome"]);
    assert!(host.plugins().await.is_empty());
    assert!(host.agent_ids().await.is_empty());
    assert_eq!(factory.created(), 0);
    assert_eq!(scenario.oidc.token_requests(), 1);
    Ok(())
}

#[tokio::test]
async fn plugin_ids_backfilled_from_welcome() -> anyhow::Result<()> {
    let scenario = Scenario::start().await?;
    let host = scenario.new_host(Arc::new(RecordingFactory::new()))?;
    host.add_plugin(Weather).await?;

    scenario.connect_host(&host).await?;

    let h = &host;
    eventually(TIMEOUT, move || async move { h.plugins().await.iter().all(|p| p.id.is_some()) }).await?;
    let canonical = scenario.records.plugins_for_host(HOST_ID).await;
    let local = host.plugins().await;
    assert_eq!(canonical.len(), 1);
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].unique_name.as_deref(), Some("Acme.Weather"));
    assert_eq!(local[0].id, canonical[0].id);
    assert_eq!(local[0].functions[0].id, canonical[0].functions[0].id);
    assert!(host.instance::<Weather>().await.is_some());
    Ok(())
}

#[tokio::test]
async fn reconnect_keeps_canonical_ids() -> anyhow::Result<()> {
    let scenario = Scenario::start().await?;
    let host = scenario.new_host(Arc::new(RecordingFactory::new()))?;
    host.add_plugin(Weather).await?;
    scenario.connect_host(&host).await?;
    let h = &host;
    eventually(TIMEOUT, move || async move { h.plugins().await.iter().all(|p| p.id.is_some()) }).await?;
    let first = host.plugins().await;

    host.stop().await;
    assert_eq!(host.state(), HostState::Disconnected);
    host.start(&scenario.cancel).await?;
    let broker = &scenario.broker;
    let inbox = scenario.host_inbox();
    let inbox = inbox.as_str();
    eventually(TIMEOUT, move || async move { broker.published_to(inbox).len() >= 2 }).await?;

    assert_eq!(host.plugins().await, first);
    assert_eq!(scenario.records.plugins_for_host(HOST_ID).await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn rejected_secret_keeps_retrying_until_cancelled() -> anyhow::Result<()> {
    let scenario = Scenario::start().await?;
    let host = Host::new(
        scenario.host_config("wrong"),
        scenario.broker.transport(),
        Arc::new(RecordingFactory::new()),
    )?;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let result = host.start(&cancel).await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(host.state(), HostState::Disconnected);
    assert!(scenario.oidc.token_requests() >= 2);
    assert!(scenario.kinds(&scenario.authority_inbox())?.is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_host_is_not_welcomed() -> anyhow::Result<()> {
    let scenario = Scenario::start().await?;
    let oidc = switchboard_specs::FakeOidc::start(&[("h9", "pw")], switchboard_specs::BROKER_URI).await?;
    let config = switchboard::host::HostConfig {
        host_id: "h9".into(),
        host_secret: "pw".into(),
        discovery: switchboard::discovery::DiscoveryConfig::new(oidc.uri()),
        ..scenario.host_config("pw")
    };
    let host = Host::new(config, scenario.broker.transport(), Arc::new(RecordingFactory::new()))?;
    host.start(&scenario.cancel).await?;

    let broker = &scenario.broker;
    eventually(TIMEOUT, move || async move {
        broker.published_to("event/h9/+/-/-").len() == 1
    })
    .await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(scenario.broker.published_to("event/+/+/h9/-").is_empty());
    Ok(())
}

// ── agents ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn agent_created_materializes_exactly_once() -> anyhow::Result<()> {
    let scenario = Scenario::start().await?;
    let factory = Arc::new(RecordingFactory::new());
    let host = scenario.new_host(factory.clone())?;
    scenario.connect_host(&host).await?;
    let mut events = host.subscribe_events();

    let agent = AgentModel::new("a1", "Scout").on_host(HOST_ID);
    scenario.records.add_agent(agent.clone()).await;
    scenario.authority.agent_created(&agent).await?;
    scenario.authority.agent_created(&agent).await?;

    let h = &host;
    eventually(TIMEOUT, move || async move { h.agent_ids().await.len() == 1 }).await?;
    let broker = &scenario.broker;
    let inbox = scenario.host_inbox();
    let inbox = inbox.as_str();
    eventually(TIMEOUT, move || async move { broker.published_to(inbox).len() == 3 }).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(factory.created(), 1);
    assert_eq!(events.try_recv()?, HostEvent::AgentConnected { agent_id: "a1".into(), name: "Scout".into() });
    assert!(events.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn welcome_connects_existing_agents() -> anyhow::Result<()> {
    let scenario = Scenario::start().await?;
    scenario.records.add_agent(AgentModel::new("a1", "Scout").on_host(HOST_ID)).await;
    scenario
        .records
        .add_agent(AgentModel { is_enabled: false, ..AgentModel::new("a2", "Idle").on_host(HOST_ID) })
        .await;
    let factory = Arc::new(RecordingFactory::new());
    let host = scenario.new_host(factory.clone())?;

    scenario.connect_host(&host).await?;

    let h = &host;
    eventually(TIMEOUT, move || async move { h.agent_ids().await == vec!["a1".to_owned()] }).await?;
    assert_eq!(factory.created(), 1);
    Ok(())
}

#[tokio::test]
async fn agent_update_and_delete_cycle() -> anyhow::Result<()> {
    let scenario = Scenario::start().await?;
    let agent = AgentModel::new("a1", "Scout").on_host(HOST_ID);
    scenario.records.add_agent(agent.clone()).await;
    let factory = Arc::new(RecordingFactory::new());
    let host = scenario.new_host(factory.clone())?;
    scenario.connect_host(&host).await?;
    let h = &host;
    eventually(TIMEOUT, move || async move { h.agent_ids().await.len() == 1 }).await?;

    let renamed = AgentModel { name: "Scout v2".into(), ..agent.clone() };
    scenario.authority.agent_updated(&renamed).await?;
    let f = &factory;
    eventually(TIMEOUT, move || async move { f.created() == 2 && h.agent_ids().await.len() == 1 }).await?;
    assert_eq!(factory.disposed(), 1);

    scenario.authority.agent_deleted(&renamed).await?;
    eventually(TIMEOUT, move || async move { h.agent_ids().await.is_empty() }).await?;
    assert_eq!(factory.disposed(), 2);
    Ok(())
}

#[tokio::test]
async fn stop_disposes_live_agents() -> anyhow::Result<()> {
    let scenario = Scenario::start().await?;
    scenario.records.add_agent(AgentModel::new("a1", "Scout").on_host(HOST_ID)).await;
    let factory = Arc::new(RecordingFactory::new());
    let host = scenario.new_host(factory.clone())?;
    scenario.connect_host(&host).await?;
    let h = &host;
    eventually(TIMEOUT, move || async move { h.agent_ids().await.len() == 1 }).await?;

    host.stop().await;

    assert!(host.agent_ids().await.is_empty());
    assert!(!host.is_connected());
    assert_eq!(factory.calls().last(), Some(&AgentCall::Disposed("a1".into())));
    Ok(())
}

// ── credentials ───────────────────────────────────────────────────────────

async fn credential_scenario(config: CredentialClientConfig) -> anyhow::Result<(Scenario, Arc<Host>, Arc<DefaultAgentFactory>)> {
    let scenario = Scenario::start().await?;
    scenario.records.add_agent(AgentModel::new("a1", "Scout").on_host(HOST_ID)).await;
    scenario
        .records
        .add_credential(Credential {
            owner_id: OWNER_ID.into(),
            agent_id: "a1".into(),
            name: "github".into(),
            value: "ghp_secret".into(),
        })
        .await;
    let factory = Arc::new(DefaultAgentFactory::new(config).with_key_bits(1024));
    let host = scenario.new_host(factory.clone())?;
    scenario.connect_host(&host).await?;
    let h = &host;
    eventually(TIMEOUT, move || async move { h.agent_ids().await.len() == 1 }).await?;
    Ok((scenario, host, factory))
}

#[tokio::test]
async fn credential_delivered_sealed() -> anyhow::Result<()> {
    let (scenario, _host, factory) = credential_scenario(quick_credentials()).await?;
    let client = factory.credentials("a1").await.ok_or_else(|| anyhow::anyhow!("agent a1 not live"))?;

    let secret = client.get_credential("github").await?;

    assert_eq!(secret.as_str(), "ghp_secret");
    let responses = scenario.broker.published_to(&scenario.agent_inbox("a1"));
    assert_eq!(responses.len(), 1);
    assert!(!String::from_utf8_lossy(&responses[0].payload).contains("ghp_secret"));

    let again = client.get_credential("github").await?;
    assert_eq!(again.as_str(), "ghp_secret");
    assert_eq!(scenario.broker.published_to(&scenario.agent_inbox("a1")).len(), 1);
    Ok(())
}

#[tokio::test]
async fn missing_credential_gets_no_response() -> anyhow::Result<()> {
    let (scenario, _host, factory) = credential_scenario(quick_credentials()).await?;
    let client = factory.credentials("a1").await.ok_or_else(|| anyhow::anyhow!("agent a1 not live"))?;

    let result = client.get_credential("gitlab").await;

    assert!(matches!(result, Err(Error::NotFound(_))));
    assert!(scenario.broker.published_to(&scenario.agent_inbox("a1")).is_empty());
    let requests = scenario.kinds("event/a1/+/-/-")?;
    assert_eq!(requests, vec!["credential_request", "credential_request"]);
    Ok(())
}
