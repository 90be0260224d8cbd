// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario harness: a real Authority and Host wired through an in-process
//! broker, with discovery and the token endpoint served by a local axum app.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

use axum::extract::{Form, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use switchboard::authority::Authority;
use switchboard::bus::memory::MemoryBroker;
use switchboard::discovery::DiscoveryConfig;
use switchboard::host::{AgentFactory, Host, HostConfig};
use switchboard::message::Event;
use switchboard::records::MemoryRecords;
use switchboard::test_support::decode_raw;

pub const HOST_ID: &str = "h1";
pub const HOST_SECRET: &str = "s3cret";
pub const OWNER_ID: &str = "u1";
pub const BROKER_URI: &str = "memory://broker";
pub const TIMEOUT: Duration = Duration::from_secs(5);

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return Ok(());
        }
        if Instant::now() >= deadline {
            anyhow::bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ── fake identity provider ────────────────────────────────────────────────

struct OidcState {
    issuer: String,
    broker_uri: String,
    clients: HashMap<String, String>,
    discovery_requests: AtomicUsize,
    token_requests: AtomicUsize,
}

/// Serves the discovery document and a client-credentials token endpoint.
pub struct FakeOidc {
    addr: SocketAddr,
    state: Arc<OidcState>,
    shutdown: CancellationToken,
}

impl FakeOidc {
    pub async fn start(clients: &[(&str, &str)], broker_uri: &str) -> anyhow::Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(OidcState {
            issuer: format!("http://{addr}"),
            broker_uri: broker_uri.to_owned(),
            clients: clients.iter().map(|(id, secret)| ((*id).to_owned(), (*secret).to_owned())).collect(),
            discovery_requests: AtomicUsize::new(0),
            token_requests: AtomicUsize::new(0),
        });
        let app = Router::new()
            .route("/.well-known/openid-configuration", get(discovery))
            .route("/connect/token", post(token))
            .with_state(Arc::clone(&state));

        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await;
        });
        Ok(Self { addr, state, shutdown })
    }

    pub fn uri(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn discovery_requests(&self) -> usize {
        self.state.discovery_requests.load(Ordering::SeqCst)
    }

    pub fn token_requests(&self) -> usize {
        self.state.token_requests.load(Ordering::SeqCst)
    }
}

impl Drop for FakeOidc {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn discovery(State(state): State<Arc<OidcState>>) -> Json<serde_json::Value> {
    state.discovery_requests.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "issuer": state.issuer,
        "token_endpoint": format!("{}/connect/token", state.issuer),
        "broker_uri": state.broker_uri,
    }))
}

async fn token(
    State(state): State<Arc<OidcState>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.token_requests.fetch_add(1, Ordering::SeqCst);
    if form.get("grant_type").map(String::as_str) != Some("client_credentials") {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "unsupported_grant_type" }))).into_response();
    }
    let authorized = basic_credentials(&headers)
        .is_some_and(|(id, secret)| state.clients.get(&id).is_some_and(|s| *s == secret));
    if !authorized {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid_client" }))).into_response();
    }
    Json(json!({ "access_token": "issued-token", "expires_in": 3600, "token_type": "Bearer" })).into_response()
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_owned(), secret.to_owned()))
}

// ── scenario ──────────────────────────────────────────────────────────────

/// A connected authority with one registered host record, `h1`.
pub struct Scenario {
    pub broker: MemoryBroker,
    pub oidc: FakeOidc,
    pub records: Arc<MemoryRecords>,
    pub authority: Arc<Authority>,
    pub cancel: CancellationToken,
}

impl Scenario {
    pub async fn start() -> anyhow::Result<Self> {
        ensure_crypto();
        let broker = MemoryBroker::new();
        let oidc = FakeOidc::start(&[(HOST_ID, HOST_SECRET)], BROKER_URI).await?;
        let records = Arc::new(MemoryRecords::new());
        records.add_host(HOST_ID, "Lab", Some(OWNER_ID)).await;

        let authority = Authority::new(DiscoveryConfig::new(oidc.uri()), broker.transport(), records.clone())?;
        let cancel = CancellationToken::new();
        authority.connect("authority-token", &cancel).await?;
        Ok(Self { broker, oidc, records, authority, cancel })
    }

    pub fn host_config(&self, secret: &str) -> HostConfig {
        HostConfig {
            discovery: DiscoveryConfig {
                max_backoff: Duration::from_millis(50),
                ..DiscoveryConfig::new(self.oidc.uri())
            },
            host_id: HOST_ID.to_owned(),
            host_secret: secret.to_owned(),
            host_name: Some("Lab".to_owned()),
            retry_delay: Duration::from_millis(50),
        }
    }

    pub fn new_host(&self, factory: Arc<dyn AgentFactory>) -> anyhow::Result<Arc<Host>> {
        Ok(Host::new(self.host_config(HOST_SECRET), self.broker.transport(), factory)?)
    }

    /// Connect `host` and wait until its welcome has been sent.
    pub async fn connect_host(&self, host: &Arc<Host>) -> anyhow::Result<()> {
        host.start(&self.cancel).await?;
        let broker = &self.broker;
        let inbox = self.host_inbox();
        let inbox = inbox.as_str();
        eventually(TIMEOUT, move || async move { welcomes(broker, inbox) >= 1 }).await
    }

    pub fn host_inbox(&self) -> String {
        format!("event/+/{}/{HOST_ID}/-", self.authority.id())
    }

    pub fn agent_inbox(&self, agent_id: &str) -> String {
        format!("event/+/{}/-/{agent_id}", self.authority.id())
    }

    pub fn authority_inbox(&self) -> String {
        format!("event/+/{}/-/-", self.authority.id())
    }

    /// Kinds of the events published to `filter`, in order.
    pub fn kinds(&self, filter: &str) -> anyhow::Result<Vec<String>> {
        self.broker
            .published_to(filter)
            .iter()
            .map(|raw| decode_raw(raw).map(|event| event.kind().to_owned()))
            .collect()
    }
}

impl Drop for Scenario {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn welcomes(broker: &MemoryBroker, inbox: &str) -> usize {
    broker
        .published_to(inbox)
        .iter()
        .filter(|raw| matches!(decode_raw(raw), Ok(Event::HostWelcome { .. })))
        .count()
}
