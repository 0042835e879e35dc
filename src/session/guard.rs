//! Authorization Guard
//!
//! Decides whether a presented token currently authenticates a user.
//! A token passes only if the store holds a live record for it, its JWT
//! signature verifies against the service secret, and the signed `sub`
//! matches the username on the record.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, warn};

use crate::session::token::{fingerprint, TokenClaims, TokenStore, TOKEN_ALGORITHM};

/// Default token lifetime.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Longest accepted token lifetime (one year).
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// HMAC secret used to sign and verify tokens.
    pub secret: Vec<u8>,
    /// Lifetime of an issued token.
    pub token_ttl: Duration,
    /// How often expired tokens are swept.
    pub sweep_interval: Duration,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("token_ttl", &self.token_ttl)
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        let mut secret = vec![0u8; 64];
        rand::thread_rng().fill_bytes(&mut secret);
        Self {
            secret,
            token_ttl: DEFAULT_TOKEN_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl AuthConfig {
    /// Config with a fixed secret and default timings.
    pub fn with_secret(secret: &[u8]) -> Self {
        Self {
            secret: secret.to_vec(),
            token_ttl: DEFAULT_TOKEN_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Create config from environment variables.
    ///
    /// Without `TYPERACE_SECRET` a random secret is generated, so tokens do
    /// not survive a restart.
    pub fn from_env() -> Self {
        let mut config = match std::env::var("TYPERACE_SECRET") {
            Ok(secret) if !secret.is_empty() => Self::with_secret(secret.as_bytes()),
            _ => Self::default(),
        };
        if let Some(ttl) = env_secs("TYPERACE_TOKEN_TTL") {
            config.token_ttl = ttl;
        }
        if let Some(every) = env_secs("TYPERACE_SWEEP_INTERVAL") {
            config.sweep_interval = every;
        }
        config
    }

    /// Validates the timings are within acceptable bounds.
    pub fn validate(&self) -> Result<(), String> {
        if self.token_ttl.is_zero() {
            return Err("token_ttl must be greater than 0".to_string());
        }
        if self.token_ttl > MAX_TOKEN_TTL {
            return Err(format!(
                "token_ttl exceeds maximum allowed ({} seconds)",
                MAX_TOKEN_TTL.as_secs()
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err("sweep_interval must be greater than 0".to_string());
        }
        if self.secret.is_empty() {
            return Err("secret must not be empty".to_string());
        }
        Ok(())
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Authorization failures. Each maps to a WebSocket close code and reason.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No token presented.
    #[error("missing token")]
    MissingToken,
    /// Token unknown, revoked or expired.
    #[error("token not found")]
    NotFound,
    /// Token is malformed or its signature does not verify.
    #[error("invalid token")]
    Invalid,
    /// Signed username disagrees with the stored record.
    #[error("token mismatch")]
    Mismatch,
}

impl AuthError {
    /// Application close code sent when a channel is rejected.
    pub fn close_code(&self) -> u16 {
        match self {
            AuthError::MissingToken => 4001,
            AuthError::NotFound => 4002,
            AuthError::Invalid => 4003,
            AuthError::Mismatch => 4004,
        }
    }

    /// Close reason text.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "Unauthorized: missing token",
            AuthError::NotFound => "Unauthorized: token not found",
            AuthError::Invalid => "Unauthorized: invalid token",
            AuthError::Mismatch => "Unauthorized: token mismatch",
        }
    }
}

/// Token-checking front of the [`TokenStore`].
pub struct AuthGuard {
    tokens: Arc<TokenStore>,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl AuthGuard {
    /// Create a guard over `tokens` verifying with the configured secret.
    pub fn new(tokens: Arc<TokenStore>, config: &AuthConfig) -> Self {
        let mut validation = Validation::new(TOKEN_ALGORITHM);
        // Expiry is decided by the store record, not the embedded claim.
        validation.validate_exp = false;
        validation.required_spec_claims = std::collections::HashSet::new();

        Self {
            tokens,
            decoding_key: DecodingKey::from_secret(&config.secret),
            validation,
        }
    }

    /// The store this guard reads.
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Authorize `token` against the wall clock.
    pub async fn authorize(&self, token: &str) -> Result<String, AuthError> {
        self.authorize_at(token, Utc::now()).await
    }

    /// Authorize `token` as of `now`, returning the authenticated username.
    ///
    /// A token whose signature fails to verify is revoked.
    pub async fn authorize_at(&self, token: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        if token.split('.').count() != 3 {
            return Err(AuthError::Invalid);
        }

        let record = self
            .tokens
            .lookup_at(token, now)
            .await
            .ok_or(AuthError::NotFound)?;

        let claims = match decode::<TokenClaims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => data.claims,
            Err(e) => {
                warn!(token = %fingerprint(token), error = %e, "token failed verification, revoking");
                self.tokens.revoke(token).await;
                return Err(AuthError::Invalid);
            }
        };

        if claims.sub != record.username {
            warn!(
                token = %fingerprint(token),
                signed = %claims.sub,
                stored = %record.username,
                "token username mismatch"
            );
            return Err(AuthError::Mismatch);
        }

        debug!(user = %record.username, "token authorized");
        Ok(record.username)
    }
}

// =============================================================================
// TESTS
// =============================================================================
