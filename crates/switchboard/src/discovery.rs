// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authority endpoint discovery.
//!
//! Fetches `{authority_uri}/.well-known/openid-configuration` and extracts the
//! token endpoint and broker URI. Discovery is retried with capped doubling
//! backoff until it succeeds or is cancelled; once it succeeds the result is
//! cached for the life of the process.

use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::error::{Error, Result};

pub const OPENID_CONFIGURATION_PATH: &str = "/.well-known/openid-configuration";

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub authority_uri: String,
    /// Reach the authority through a different host/port (e.g. an internal
    /// service name); the discovered token endpoint is rewritten to match.
    pub authority_uri_internal: Option<String>,
    /// Broker URI that takes precedence over the discovered one.
    pub broker_uri: Option<String>,
    pub max_backoff: Duration,
}

impl DiscoveryConfig {
    pub fn new(authority_uri: impl Into<String>) -> Self {
        Self {
            authority_uri: authority_uri.into(),
            authority_uri_internal: None,
            broker_uri: None,
            max_backoff: crate::backoff::DEFAULT_MAX_DELAY,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenIdConfiguration {
    #[serde(default)]
    token_endpoint: Option<String>,
    #[serde(default)]
    broker_uri: Option<String>,
}

/// Endpoints resolved from the discovery document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub broker_uri: String,
    pub token_endpoint: String,
}

pub struct Discovery {
    id: String,
    authority_uri: Url,
    internal_uri: Option<Url>,
    broker_override: Option<String>,
    backoff: Backoff,
    endpoints: OnceCell<Endpoints>,
    http: reqwest::Client,
}

impl Discovery {
    pub fn new(config: &DiscoveryConfig) -> Result<Self> {
        let authority_uri = parse_uri("authority_uri", &config.authority_uri)?;
        let id = authority_uri
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidConfig(format!("authority_uri has no host: {authority_uri}")))?
            .to_owned();
        let internal_uri = match config.authority_uri_internal {
            Some(ref uri) => Some(parse_uri("authority_uri_internal", uri)?),
            None => None,
        };
        Ok(Self {
            id,
            authority_uri,
            internal_uri,
            broker_override: config.broker_uri.clone().filter(|u| !u.is_empty()),
            backoff: Backoff::with_max(config.max_backoff),
            endpoints: OnceCell::new(),
            http: crate::oauth::http_client()?,
        })
    }

    /// The authority's id: the host component of its URI.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_initialized(&self) -> bool {
        self.endpoints.initialized()
    }

    pub fn endpoints(&self) -> Option<&Endpoints> {
        self.endpoints.get()
    }

    /// The configured override, otherwise the discovered broker URI.
    pub fn broker_uri(&self) -> Option<String> {
        self.broker_override.clone().or_else(|| self.endpoints.get().map(|e| e.broker_uri.clone()))
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Run discovery until it succeeds. Concurrent callers share one attempt
    /// loop; later callers return the cached result immediately.
    pub async fn initialize_with_backoff(&self, cancel: &CancellationToken) -> Result<&Endpoints> {
        if let Some(endpoints) = self.endpoints.get() {
            debug!(authority = %self.id, "discovery already complete");
            return Ok(endpoints);
        }
        self.endpoints
            .get_or_try_init(|| async {
                let mut delays = self.backoff.delays();
                loop {
                    let attempt = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        result = self.fetch() => result,
                    };
                    match attempt {
                        Ok(endpoints) => {
                            info!(
                                authority = %self.id,
                                broker = %endpoints.broker_uri,
                                token_endpoint = %endpoints.token_endpoint,
                                "discovery complete"
                            );
                            return Ok(endpoints);
                        }
                        Err(e) => {
                            let delay = delays.next_delay();
                            warn!(authority = %self.id, err = %e, ?delay, "discovery failed, retrying");
                            tokio::select! {
                                _ = cancel.cancelled() => return Err(Error::Cancelled),
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                    }
                }
            })
            .await
    }

    async fn fetch(&self) -> Result<Endpoints> {
        let base = self.internal_uri.as_ref().unwrap_or(&self.authority_uri);
        let url = format!("{}{OPENID_CONFIGURATION_PATH}", base.as_str().trim_end_matches('/'));
        let doc: OpenIdConfiguration = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(Error::connectivity)?
            .json()
            .await
            .map_err(Error::connectivity)?;

        let broker_uri = self
            .broker_override
            .clone()
            .or(doc.broker_uri)
            .ok_or_else(|| Error::Connectivity("discovery document has no broker_uri".to_owned()))?;
        let token_endpoint = doc
            .token_endpoint
            .ok_or_else(|| Error::Connectivity("discovery document has no token_endpoint".to_owned()))?;
        let token_endpoint = match self.internal_uri {
            Some(ref internal) => rewrite_origin(&token_endpoint, internal)?,
            None => token_endpoint,
        };
        Ok(Endpoints { broker_uri, token_endpoint })
    }
}

fn parse_uri(name: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| Error::InvalidConfig(format!("{name} {value:?}: {e}")))
}

/// Replace the host and port of `endpoint` with those of `internal`.
fn rewrite_origin(endpoint: &str, internal: &Url) -> Result<String> {
    let mut url = Url::parse(endpoint).map_err(Error::connectivity)?;
    url.set_host(internal.host_str())
        .map_err(|e| Error::InvalidConfig(format!("internal host: {e}")))?;
    url.set_port(internal.port())
        .map_err(|()| Error::InvalidConfig("internal port cannot be applied".to_owned()))?;
    Ok(url.to_string())
}
