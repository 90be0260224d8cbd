// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RSA public keys in JWK form and OAEP-SHA256 sealing.
//!
//! The authority encrypts a credential to the requesting agent's public key;
//! only the agent holding the private half can recover it. Ciphertext travels
//! as standard base64, key components as unpadded base64url.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

pub const DEFAULT_KEY_BITS: usize = 2048;

/// RSA public key as a JSON Web Key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub n: String,
    pub e: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
}

impl Jwk {
    pub fn from_public_key(key: &RsaPublicKey) -> Self {
        let n = URL_SAFE_NO_PAD.encode(key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(key.e().to_bytes_be());
        let kid = Some(thumbprint(&n, &e));
        Self { kty: "RSA".to_owned(), n, e, kid, alg: Some("RSA-OAEP-256".to_owned()) }
    }

    pub fn to_public_key(&self) -> Result<RsaPublicKey> {
        if self.kty != "RSA" {
            return Err(Error::Crypto(format!("unsupported key type {:?}", self.kty)));
        }
        let n = decode_component("n", &self.n)?;
        let e = decode_component("e", &self.e)?;
        RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
            .map_err(|e| Error::Crypto(format!("invalid RSA key: {e}")))
    }

    /// Encrypt with RSA-OAEP-SHA256, returning standard base64 ciphertext.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        if plaintext.is_empty() {
            return Err(Error::Crypto("refusing to encrypt an empty value".to_owned()));
        }
        let key = self.to_public_key()?;
        let sealed = key
            .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), plaintext)
            .map_err(|e| Error::Crypto(format!("encrypt: {e}")))?;
        Ok(STANDARD.encode(sealed))
    }
}

// RFC 7638 thumbprint over the required members in lexicographic order.
fn thumbprint(n: &str, e: &str) -> String {
    let canonical = format!(r#"{{"e":"{e}","kty":"RSA","n":"{n}"}}"#);
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}

fn decode_component(name: &str, value: &str) -> Result<Vec<u8>> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| Error::Crypto(format!("jwk {name}: {e}")))?;
    if bytes.is_empty() {
        return Err(Error::Crypto(format!("jwk {name} is empty")));
    }
    Ok(bytes)
}

/// An agent's ephemeral RSA key pair. The private half never leaves memory.
pub struct KeyPair {
    private: RsaPrivateKey,
    public: Jwk,
}

impl KeyPair {
    pub fn generate() -> Result<Self> {
        Self::generate_with_bits(DEFAULT_KEY_BITS)
    }

    pub fn generate_with_bits(bits: usize) -> Result<Self> {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(|e| Error::Crypto(format!("keygen: {e}")))?;
        let public = Jwk::from_public_key(&private.to_public_key());
        Ok(Self { private, public })
    }

    pub fn public_jwk(&self) -> &Jwk {
        &self.public
    }

    /// Decrypt base64 ciphertext produced by [`Jwk::encrypt`].
    pub fn decrypt(&self, ciphertext: &str) -> Result<Zeroizing<String>> {
        let sealed = STANDARD
            .decode(ciphertext)
            .map_err(|e| Error::Crypto(format!("ciphertext: {e}")))?;
        let plain = Zeroizing::new(
            self.private
                .decrypt(Oaep::new::<Sha256>(), &sealed)
                .map_err(|e| Error::Crypto(format!("decrypt: {e}")))?,
        );
        let text = std::str::from_utf8(&plain)
            .map_err(|e| Error::Crypto(format!("credential is not utf-8: {e}")))?;
        Ok(Zeroizing::new(text.to_owned()))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").field("public", &self.public).finish_non_exhaustive()
    }
}
