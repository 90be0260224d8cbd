// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential delivery to agents.
//!
//! An agent publishes a `credential_request` carrying its public key; the
//! authority answers on the agent's topic with the secret sealed to that key.

pub mod client;
pub mod jwk;

pub use client::{CredentialClient, CredentialClientConfig};
pub use jwk::{Jwk, KeyPair};
