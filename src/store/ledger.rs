//! User Ledger
//!
//! Persistent record of registered users and their victory counters.
//! The match coordinator only ever reads usernames and bumps victories.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    /// Unique username.
    pub username: String,
    /// Opaque password hash produced by the credential store.
    #[serde(skip)]
    pub password_hash: String,
    /// Races won.
    pub victories: u64,
}

/// Ledger errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Username is already registered.
    #[error("username already exists")]
    UsernameTaken,
    /// No user with that name.
    #[error("unknown user: {0}")]
    UnknownUser(String),
}

/// Storage for user records.
pub trait UserLedger: Send + Sync {
    /// Register a new user.
    fn create_user(&self, username: &str, password_hash: &str) -> Result<(), LedgerError>;

    /// Look up a user by name.
    fn find_user(&self, username: &str) -> Option<User>;

    /// Add one victory to a user's counter.
    fn increment_victories(&self, username: &str) -> Result<(), LedgerError>;
}

/// In-process ledger.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    users: RwLock<BTreeMap<String, User>>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered users.
    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    /// True if nobody has registered.
    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

impl UserLedger for MemoryLedger {
    fn create_user(&self, username: &str, password_hash: &str) -> Result<(), LedgerError> {
        let mut users = self.users.write();
        if users.contains_key(username) {
            return Err(LedgerError::UsernameTaken);
        }
        users.insert(
            username.to_string(),
            User {
                username: username.to_string(),
                password_hash: password_hash.to_string(),
                victories: 0,
            },
        );
        Ok(())
    }

    fn find_user(&self, username: &str) -> Option<User> {
        self.users.read().get(username).cloned()
    }

    fn increment_victories(&self, username: &str) -> Result<(), LedgerError> {
        let mut users = self.users.write();
        let user = users
            .get_mut(username)
            .ok_or_else(|| LedgerError::UnknownUser(username.to_string()))?;
        user.victories += 1;
        Ok(())
    }
}
