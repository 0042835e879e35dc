//! Session Layer
//!
//! Token lifecycle and the authorization check every protected action
//! goes through.

pub mod account;
pub mod guard;
pub mod token;

pub use account::{AccountError, Accounts};
pub use guard::{AuthConfig, AuthError, AuthGuard};
pub use token::{spawn_sweeper, IssuedToken, TokenClaims, TokenError, TokenRecord, TokenStore};
