//! External Collaborators
//!
//! User ledger, credential hashing and practice text. The core only talks to
//! these through their traits; the in-memory implementations back the binary
//! and the tests.

pub mod corpus;
pub mod credentials;
pub mod ledger;

pub use corpus::{MemoryCorpus, TextCorpus};
pub use credentials::{Argon2Credentials, CredentialError, CredentialStore};
pub use ledger::{LedgerError, MemoryLedger, User, UserLedger};
