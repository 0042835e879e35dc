//! # Typerace Server
//!
//! Session and real-time match coordination for head-to-head typing races.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TYPERACE SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  session/        - Who is allowed in                         │
//! │  ├── token.rs    - Token store, expiry, sweeper              │
//! │  ├── guard.rs    - Authorization guard                       │
//! │  └── account.rs  - Register / login / logout / verify        │
//! │                                                              │
//! │  store/          - External collaborators (traits)           │
//! │  ├── ledger.rs   - Users and victory counters                │
//! │  ├── credentials.rs - Password hashing                       │
//! │  └── corpus.rs   - Practice texts                            │
//! │                                                              │
//! │  network/        - Real-time race                            │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── channel.rs  - Per-connection adapter                    │
//! │  ├── room.rs     - Room state machine                        │
//! │  ├── coordinator.rs - Pairing and relay                      │
//! │  └── server.rs   - WebSocket server                          │
//! │                                                              │
//! │  http.rs         - Login flow and read-only queries          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Pairing Guarantee
//!
//! Every room mutation happens under the coordinator's single registry
//! lock, so a room never holds more than two participants and both
//! participants always see `game_start` exactly once.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod http;
pub mod network;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use network::{MatchCoordinator, RaceServer, ServerConfig};
pub use session::{Accounts, AuthConfig, AuthGuard, TokenStore};
pub use store::{MemoryCorpus, MemoryLedger};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
