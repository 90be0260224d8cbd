// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth client-credentials token requests.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Scope requested by hosts for broker access.
pub const CONNECT_SCOPE: &str = "connect";

/// Standard OAuth2 token response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// Build the shared HTTP client, installing the ring TLS provider if no
/// provider has been chosen yet.
pub fn http_client() -> Result<reqwest::Client> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| Error::InvalidConfig(format!("http client: {e}")))
}

/// POST `grant_type=client_credentials` with HTTP Basic client
/// authentication and return the issued token.
pub async fn client_credentials(
    client: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    scope: &str,
) -> Result<TokenResponse> {
    let resp = client
        .post(token_url)
        .basic_auth(client_id, Some(client_secret))
        .form(&[("grant_type", "client_credentials"), ("scope", scope)])
        .send()
        .await
        .map_err(Error::connectivity)?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(Error::Connectivity(format!("token request failed ({status}): {text}")));
    }

    let token: TokenResponse = resp.json().await.map_err(Error::connectivity)?;
    if token.access_token.is_empty() {
        return Err(Error::Connectivity("token response has an empty access_token".to_owned()));
    }
    Ok(token)
}
