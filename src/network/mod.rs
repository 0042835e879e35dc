//! Network Layer
//!
//! WebSocket transport for the race: wire messages, per-connection
//! channels, rooms and the coordinator that pairs them.

pub mod channel;
pub mod coordinator;
pub mod protocol;
pub mod room;
pub mod server;

pub use channel::{drive, Channel, ChannelError, ChannelEvent, ChannelId};
pub use coordinator::{JoinOutcome, MatchCoordinator, MatchError, RoomSnapshot};
pub use protocol::{ClientMessage, ServerMessage};
pub use room::{ChallengeRoom, RoomError, RoomId, RoomState, SeatOutcome};
pub use server::{token_from_query, RaceServer, ServerConfig, ServerError};
