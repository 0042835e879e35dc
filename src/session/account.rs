//! Account Flow
//!
//! Register, login, logout and verify. Login enforces the single-session
//! policy: while a user holds a valid token, a second login is rejected.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::session::guard::{AuthError, AuthGuard};
use crate::session::token::{IssuedToken, TokenError, TokenStore};
use crate::store::{CredentialError, CredentialStore, LedgerError, UserLedger};

/// Account errors.
#[derive(Debug, Error)]
pub enum AccountError {
    /// Missing or empty username/password.
    #[error("username and password are required")]
    InvalidInput,
    /// Registration for a name that exists.
    #[error("username already exists")]
    UsernameTaken,
    /// Unknown user, wrong password, or rejected token.
    #[error("invalid username or password")]
    Unauthorized,
    /// Token presented to verify/logout was rejected.
    #[error("{0}")]
    Token(#[from] AuthError),
    /// The user already has a live session.
    #[error("user already logged in")]
    Conflict,
    /// Hashing failed.
    #[error("credential error: {0}")]
    Credentials(#[from] CredentialError),
    /// Ledger failure.
    #[error("ledger error: {0}")]
    Ledger(LedgerError),
    /// Internal failure (signing, task join).
    #[error("internal error: {0}")]
    Internal(String),
}

impl AccountError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AccountError::InvalidInput => 400,
            AccountError::UsernameTaken | AccountError::Conflict => 409,
            AccountError::Unauthorized | AccountError::Token(_) => 401,
            AccountError::Credentials(_)
            | AccountError::Ledger(_)
            | AccountError::Internal(_) => 500,
        }
    }
}

impl From<LedgerError> for AccountError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UsernameTaken => AccountError::UsernameTaken,
            other => AccountError::Ledger(other),
        }
    }
}

impl From<TokenError> for AccountError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Conflict => AccountError::Conflict,
            TokenError::Signing(msg) => AccountError::Internal(msg),
            e @ TokenError::ExpiryOutOfRange => AccountError::Internal(e.to_string()),
        }
    }
}

/// Login flow over the ledger, credential store and token store.
pub struct Accounts {
    ledger: Arc<dyn UserLedger>,
    credentials: Arc<dyn CredentialStore>,
    guard: Arc<AuthGuard>,
}

impl Accounts {
    /// Wire the collaborators together.
    pub fn new(
        ledger: Arc<dyn UserLedger>,
        credentials: Arc<dyn CredentialStore>,
        guard: Arc<AuthGuard>,
    ) -> Self {
        Self {
            ledger,
            credentials,
            guard,
        }
    }

    fn tokens(&self) -> &Arc<TokenStore> {
        self.guard.tokens()
    }

    /// Register a new user.
    pub async fn register(&self, username: &str, password: &str) -> Result<(), AccountError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AccountError::InvalidInput);
        }
        if self.ledger.find_user(username).is_some() {
            return Err(AccountError::UsernameTaken);
        }

        let credentials = self.credentials.clone();
        let password = password.to_string();
        let hash = tokio::task::spawn_blocking(move || credentials.hash(&password))
            .await
            .map_err(|e| AccountError::Internal(e.to_string()))??;

        self.ledger.create_user(username, &hash)?;
        info!(user = username, "user registered");
        Ok(())
    }

    /// Check credentials and issue a session token.
    pub async fn login(&self, username: &str, password: &str) -> Result<IssuedToken, AccountError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AccountError::InvalidInput);
        }
        let user = self
            .ledger
            .find_user(username)
            .ok_or(AccountError::Unauthorized)?;

        let credentials = self.credentials.clone();
        let password = password.to_string();
        let hash = user.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || credentials.verify(&hash, &password))
            .await
            .map_err(|e| AccountError::Internal(e.to_string()))?;
        if !matches {
            warn!(user = username, "login failed: bad password");
            return Err(AccountError::Unauthorized);
        }

        let issued = self.tokens().issue(username).await.map_err(|e| {
            if e == TokenError::Conflict {
                warn!(user = username, "login rejected: session already active");
            }
            AccountError::from(e)
        })?;
        Ok(issued)
    }

    /// End a session. Unknown tokens are not an error.
    pub async fn logout(&self, token: &str) -> Result<(), AccountError> {
        if token.trim().is_empty() {
            return Err(AccountError::Token(AuthError::MissingToken));
        }
        self.tokens().revoke(token.trim()).await;
        Ok(())
    }

    /// Username the token authenticates.
    pub async fn verify(&self, token: &str) -> Result<String, AccountError> {
        Ok(self.guard.authorize(token).await?)
    }

    /// Victory count for a user.
    pub fn victories(&self, username: &str) -> Option<u64> {
        self.ledger.find_user(username).map(|u| u.victories)
    }
}
