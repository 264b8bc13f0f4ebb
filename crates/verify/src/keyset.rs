// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Verification key set.
//!
//! Keys are supplied at agent start from a JSON file and are immutable
//! for the agent's lifetime. Each key is tagged with the algorithm it
//! verifies; lookups are by key id.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// The one MAC algorithm this agent verifies.
pub const ALG_HMAC_SHA256: &str = "hmac-sha256";

#[derive(Debug, Error)]
pub enum KeySetError {
    #[error("failed to read key file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse key file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("key {kid} uses unsupported algorithm {algorithm}")]
    UnsupportedAlgorithm { kid: String, algorithm: String },

    #[error("key {kid} has invalid secret material: {source}")]
    InvalidSecret {
        kid: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("duplicate key id {0}")]
    DuplicateKeyId(String),
}

/// One verification key: algorithm tag plus secret material.
#[derive(Clone)]
pub struct VerificationKey {
    id: String,
    algorithm: String,
    secret: Vec<u8>,
}

impl VerificationKey {
    pub fn new(id: impl Into<String>, algorithm: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self { id: id.into(), algorithm: algorithm.into(), secret: secret.into() }
    }

    /// Convenience for symmetric keys whose secret is a passphrase.
    pub fn hmac(id: impl Into<String>, secret: impl AsRef<[u8]>) -> Self {
        Self::new(id, ALG_HMAC_SHA256, secret.as_ref().to_vec())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub(crate) fn secret(&self) -> &[u8] {
        &self.secret
    }
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secret material stays out of logs.
        f.debug_struct("VerificationKey")
            .field("id", &self.id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Immutable set of verification keys indexed by key id.
#[derive(Debug, Default, Clone)]
pub struct KeySet {
    keys: HashMap<String, VerificationKey>,
}

#[derive(Deserialize)]
struct KeyFile {
    keys: Vec<KeyEntry>,
}

#[derive(Deserialize)]
struct KeyEntry {
    kid: String,
    alg: String,
    secret: String,
}

impl KeySet {
    pub fn new(keys: impl IntoIterator<Item = VerificationKey>) -> Result<Self, KeySetError> {
        let mut set = Self::default();
        for key in keys {
            set.insert(key)?;
        }
        Ok(set)
    }

    fn insert(&mut self, key: VerificationKey) -> Result<(), KeySetError> {
        if key.algorithm != ALG_HMAC_SHA256 {
            return Err(KeySetError::UnsupportedAlgorithm {
                kid: key.id.clone(),
                algorithm: key.algorithm.clone(),
            });
        }
        if self.keys.contains_key(&key.id) {
            return Err(KeySetError::DuplicateKeyId(key.id));
        }
        self.keys.insert(key.id.clone(), key);
        Ok(())
    }

    /// Parse the agent's key file: `{"keys": [{"kid", "alg", "secret"}]}`
    /// with base64 secret material.
    pub fn from_json_str(raw: &str) -> Result<Self, KeySetError> {
        let file: KeyFile = serde_json::from_str(raw)?;
        let mut set = Self::default();
        for entry in file.keys {
            let secret = B64
                .decode(&entry.secret)
                .map_err(|source| KeySetError::InvalidSecret { kid: entry.kid.clone(), source })?;
            set.insert(VerificationKey::new(entry.kid, entry.alg, secret))?;
        }
        Ok(set)
    }

    pub fn from_file(path: &Path) -> Result<Self, KeySetError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn get(&self, kid: &str) -> Option<&VerificationKey> {
        self.keys.get(kid)
    }

    /// The sole key, when the set holds exactly one. Lets unsigned `kid`
    /// headers verify against single-key configurations.
    pub fn sole_key(&self) -> Option<&VerificationKey> {
        if self.keys.len() == 1 {
            self.keys.values().next()
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }
}

#[cfg(test)]
#[path = "keyset_tests.rs"]
mod tests;
