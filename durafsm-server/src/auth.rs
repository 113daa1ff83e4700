//! Bearer token authentication for the HTTP API.
//!
//! Only SHA-256 hashes of tokens are configured; a request is authorized
//! when the hash of its bearer token is one of them.

use crate::config::AuthConfig;
use crate::error::ServerError;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Validates bearer tokens against pre-configured hashes.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    valid_hashes: HashSet<String>,
}

impl TokenValidator {
    pub fn new(hashes: impl IntoIterator<Item = String>) -> Self {
        Self {
            valid_hashes: hashes
                .into_iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .collect(),
        }
    }

    /// A validator when `auth.required` is set, `None` otherwise.
    pub fn from_config(config: &AuthConfig) -> Option<Self> {
        config
            .required
            .then(|| Self::new(config.token_hashes.iter().cloned()))
    }

    pub fn token_count(&self) -> usize {
        self.valid_hashes.len()
    }

    /// Validates a plaintext token by hashing and comparing.
    pub fn validate(&self, token: &str) -> bool {
        !self.valid_hashes.is_empty() && self.valid_hashes.contains(&Self::hash_token(token))
    }

    /// Checks an `Authorization` header value of the form `Bearer <token>`.
    pub fn authorize(&self, header: Option<&str>) -> Result<(), ServerError> {
        let token = header
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or(ServerError::Unauthorized)?;
        if self.validate(token) {
            Ok(())
        } else {
            Err(ServerError::Unauthorized)
        }
    }

    /// Hashes a token using SHA-256, returning a lowercase hex string.
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }
}
