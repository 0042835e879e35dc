//! Token Store
//!
//! Owns session-token records. Tokens are HS512 JWTs carrying the username,
//! but the record held here is authoritative for expiry: a token is valid
//! iff it is present and `now < expires_at`.
//!
//! Expired records are purged lazily on lookup and eagerly by the sweeper.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::session::guard::{AuthConfig, MAX_TOKEN_TTL};

/// Signing algorithm for session tokens.
pub const TOKEN_ALGORITHM: Algorithm = Algorithm::HS512;

/// Claims embedded in every session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Username the token was issued to.
    pub sub: String,
    /// Issued at (Unix seconds).
    pub iat: i64,
    /// Expiry (Unix seconds). Informational; the store decides validity.
    pub exp: i64,
    /// Random token id so two tokens never collide.
    pub jti: String,
}

/// Stored state for one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    /// Owning username.
    pub username: String,
    /// When the token was issued.
    pub issued_at: DateTime<Utc>,
    /// First instant at which the token is no longer valid.
    pub expires_at: DateTime<Utc>,
}

impl TokenRecord {
    /// Whether the record is still valid at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// A freshly issued token.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    /// Opaque token string handed to the client.
    pub token: String,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
}

/// Token store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    /// The user already holds a valid token.
    #[error("session already active for user")]
    Conflict,
    /// JWT encoding failed.
    #[error("token signing failed: {0}")]
    Signing(String),
    /// `now + ttl` is not representable.
    #[error("token expiry out of range")]
    ExpiryOutOfRange,
}

#[derive(Debug, Default)]
struct TokenTable {
    records: HashMap<String, TokenRecord>,
    by_user: HashMap<String, String>,
}

impl TokenTable {
    fn remove(&mut self, token: &str) -> Option<TokenRecord> {
        let record = self.records.remove(token)?;
        if self.by_user.get(&record.username).map(String::as_str) == Some(token) {
            self.by_user.remove(&record.username);
        }
        Some(record)
    }
}

/// Session-token registry.
pub struct TokenStore {
    table: RwLock<TokenTable>,
    encoding_key: EncodingKey,
    ttl: Duration,
}

impl TokenStore {
    /// Create an empty store signing with the configured secret.
    ///
    /// The lifetime is capped at [`MAX_TOKEN_TTL`].
    pub fn new(config: &AuthConfig) -> Self {
        let secs = config.token_ttl.min(MAX_TOKEN_TTL).as_secs() as i64;
        Self {
            table: RwLock::new(TokenTable::default()),
            encoding_key: EncodingKey::from_secret(&config.secret),
            ttl: Duration::try_seconds(secs).unwrap_or_else(Duration::zero),
        }
    }

    /// Token lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for `username` using the wall clock.
    pub async fn issue(&self, username: &str) -> Result<IssuedToken, TokenError> {
        self.issue_at(username, Utc::now()).await
    }

    /// Issue a token for `username` as of `now`.
    ///
    /// Fails with [`TokenError::Conflict`] while the user still holds a valid
    /// token. A stale token left over from an earlier session is replaced.
    pub async fn issue_at(
        &self,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or(TokenError::ExpiryOutOfRange)?;
        let claims = TokenClaims {
            sub: username.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        let token = encode(&Header::new(TOKEN_ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        let mut table = self.table.write().await;
        if let Some(existing) = table.by_user.get(username).cloned() {
            let still_valid = table
                .records
                .get(&existing)
                .is_some_and(|record| record.is_valid_at(now));
            if still_valid {
                return Err(TokenError::Conflict);
            }
            table.remove(&existing);
        }

        table.by_user.insert(username.to_string(), token.clone());
        table.records.insert(
            token.clone(),
            TokenRecord {
                username: username.to_string(),
                issued_at: now,
                expires_at,
            },
        );

        info!(user = username, token = %fingerprint(&token), "session token issued");
        Ok(IssuedToken { token, expires_at })
    }

    /// Look up a token using the wall clock.
    pub async fn lookup(&self, token: &str) -> Option<TokenRecord> {
        self.lookup_at(token, Utc::now()).await
    }

    /// Look up a token as of `now`. Expired records read as absent and are
    /// purged on the way out.
    pub async fn lookup_at(&self, token: &str, now: DateTime<Utc>) -> Option<TokenRecord> {
        {
            let table = self.table.read().await;
            match table.records.get(token) {
                None => return None,
                Some(record) if record.is_valid_at(now) => return Some(record.clone()),
                Some(_) => {}
            }
        }

        let mut table = self.table.write().await;
        if table
            .records
            .get(token)
            .is_some_and(|record| !record.is_valid_at(now))
        {
            table.remove(token);
            debug!(token = %fingerprint(token), "expired token purged on lookup");
        }
        None
    }

    /// Delete a token. Returns whether anything was removed.
    pub async fn revoke(&self, token: &str) -> bool {
        let removed = self.table.write().await.remove(token).is_some();
        if removed {
            info!(token = %fingerprint(token), "session token revoked");
        }
        removed
    }

    /// Delete every record with `expires_at <= now`. Returns the number removed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut table = self.table.write().await;
        let expired: Vec<String> = table
            .records
            .iter()
            .filter(|(_, record)| !record.is_valid_at(now))
            .map(|(token, _)| token.clone())
            .collect();

        for token in &expired {
            table.remove(token);
        }
        expired.len()
    }

    /// The user's currently valid token, if any.
    pub async fn active_token_for(&self, username: &str) -> Option<String> {
        self.active_token_for_at(username, Utc::now()).await
    }

    /// The user's token valid at `now`, if any.
    pub async fn active_token_for_at(&self, username: &str, now: DateTime<Utc>) -> Option<String> {
        let table = self.table.read().await;
        let token = table.by_user.get(username)?;
        table
            .records
            .get(token)
            .filter(|record| record.is_valid_at(now))
            .map(|_| token.clone())
    }

    /// Number of stored records, expired or not.
    pub async fn len(&self) -> usize {
        self.table.read().await.records.len()
    }

    /// True when no records are stored.
    pub async fn is_empty(&self) -> bool {
        self.table.read().await.records.is_empty()
    }

    #[cfg(test)]
    pub(crate) async fn insert_record(&self, token: &str, record: TokenRecord) {
        let mut table = self.table.write().await;
        table.by_user.insert(record.username.clone(), token.to_string());
        table.records.insert(token.to_string(), record);
    }
}

/// Run [`TokenStore::sweep`] on a fixed interval until the task is aborted.
pub fn spawn_sweeper(store: Arc<TokenStore>, every: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let removed = store.sweep(Utc::now()).await;
            if removed > 0 {
                debug!(removed, "token sweep");
            }
        }
    })
}

/// Short, log-safe identifier for a token.
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}
