// Bearer Token Authentication
//
// Tokens map to a user id. Only the SHA-256 of a token is kept, in memory and
// in the durable token table.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const MIN_TOKEN_LEN: usize = 32;
const GENERATED_TOKEN_LEN: usize = 48;
const TOKEN_PREFIX: &str = "fp_";

/// Token authentication system
pub struct TokenAuth {
    tokens: Arc<RwLock<HashMap<String, TokenInfo>>>,
}

/// Token information
#[derive(Clone, Debug)]
pub struct TokenInfo {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

fn strip_bearer(token: &str) -> &str {
    token.strip_prefix("Bearer ").unwrap_or(token).trim()
}

fn well_formed(token: &str) -> bool {
    if token.len() < MIN_TOKEN_LEN {
        tracing::warn!("Token rejected: too short ({} chars)", token.len());
        return false;
    }
    if !token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        tracing::warn!("Token rejected: invalid characters");
        return false;
    }
    true
}

/// SHA-256 hex digest of a token (with or without the "Bearer " prefix)
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(strip_bearer(token).as_bytes()))
}

/// Fresh random token suitable for `register`
pub fn generate_token() -> String {
    let body: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_TOKEN_LEN)
        .map(char::from)
        .collect();
    format!("{}{}", TOKEN_PREFIX, body)
}

impl TokenAuth {
    pub fn new() -> Self {
        Self {
            tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Resolve a token to its user, recording the use. `None` if the token is
    /// malformed or unknown.
    pub async fn authenticate(&self, token: &str) -> Option<TokenInfo> {
        let token = strip_bearer(token);
        if !well_formed(token) {
            return None;
        }

        let mut tokens = self.tokens.write().await;
        match tokens.get_mut(&hash_token(token)) {
            Some(info) => {
                info.last_used = Some(Utc::now());
                tracing::debug!("Token validated for user {}", info.user_id);
                Some(info.clone())
            }
            None => {
                tracing::warn!("Token validation failed: token not found in registry");
                None
            }
        }
    }

    /// Register a plaintext token; returns its hash for persistence
    pub async fn register(&self, token: &str, user_id: &str) -> Result<String> {
        let token = strip_bearer(token);
        if token.len() < MIN_TOKEN_LEN {
            return Err(anyhow::anyhow!(
                "Token too short (min {} chars)",
                MIN_TOKEN_LEN
            ));
        }
        if !well_formed(token) {
            return Err(anyhow::anyhow!("Token contains invalid characters"));
        }

        let hash = hash_token(token);
        self.register_hashed(hash.clone(), user_id, Utc::now()).await;
        Ok(hash)
    }

    /// Register an already-hashed token (loaded from storage)
    pub async fn register_hashed(&self, token_hash: String, user_id: &str, created_at: DateTime<Utc>) {
        let info = TokenInfo {
            user_id: user_id.to_string(),
            created_at,
            last_used: None,
        };
        self.tokens.write().await.insert(token_hash, info);
    }

    /// Get registered token count
    pub async fn token_count(&self) -> usize {
        self.tokens.read().await.len()
    }
}

impl Default for TokenAuth {
    fn default() -> Self {
        Self::new()
    }
}
