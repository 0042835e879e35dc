//! Match Coordinator
//!
//! Owns every admitted channel and every room. All registry mutations run
//! under a single lock, so pairing is atomic: two concurrent joiners can
//! never both take the second seat of the same room.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::network::channel::{Channel, ChannelId};
use crate::network::protocol::ClientMessage;
use crate::network::room::{ChallengeRoom, RoomError, RoomId, RoomState, SeatOutcome};
use crate::store::{TextCorpus, UserLedger};

/// Coordinator errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MatchError {
    /// The channel was never attached, or has been detached.
    #[error("channel not attached")]
    NotAttached,
    /// The channel has no room.
    #[error("channel is not in a room")]
    NoRoom,
    /// The channel already holds a seat.
    #[error("channel already in room {0}")]
    AlreadyInRoom(RoomId),
    /// No practice text is available for a new room.
    #[error("text corpus is empty")]
    NoText,
    /// The room rejected the action.
    #[error(transparent)]
    Room(#[from] RoomError),
}

/// Result of a successful join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Room the channel was seated in.
    pub room_id: RoomId,
    /// Whether the room was created for this join.
    pub created: bool,
    /// Whether this join started the race.
    pub started: bool,
}

/// Read-only view of a room.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    /// Room identifier.
    pub id: RoomId,
    /// Lifecycle state.
    pub state: RoomState,
    /// Participants in join order.
    pub participants: Vec<String>,
    /// Assigned text.
    pub text: String,
    /// Seconds since creation.
    pub age_secs: u64,
}

impl From<&ChallengeRoom> for RoomSnapshot {
    fn from(room: &ChallengeRoom) -> Self {
        Self {
            id: room.id(),
            state: room.state(),
            participants: room.usernames(),
            text: room.text().to_string(),
            age_secs: room.age().as_secs(),
        }
    }
}

#[derive(Debug)]
struct Attachment {
    channel: Channel,
    room: Option<RoomId>,
}

#[derive(Debug, Default)]
struct Registry {
    /// Rooms in creation order.
    rooms: Vec<ChallengeRoom>,
    /// Admitted channels in admission order.
    attachments: Vec<Attachment>,
}

impl Registry {
    fn attachment_mut(&mut self, id: ChannelId) -> Option<&mut Attachment> {
        self.attachments.iter_mut().find(|a| a.channel.id() == id)
    }

    fn room_of(&mut self, id: ChannelId) -> Result<&mut ChallengeRoom, MatchError> {
        let room_id = self
            .attachments
            .iter()
            .find(|a| a.channel.id() == id)
            .ok_or(MatchError::NotAttached)?
            .room
            .ok_or(MatchError::NoRoom)?;
        self.rooms
            .iter_mut()
            .find(|r| r.id() == room_id)
            .ok_or(MatchError::NoRoom)
    }
}

/// Pairs admitted channels into rooms and relays the race between them.
pub struct MatchCoordinator {
    registry: Mutex<Registry>,
    corpus: Arc<dyn TextCorpus>,
    ledger: Arc<dyn UserLedger>,
}

impl MatchCoordinator {
    /// Create a coordinator drawing texts from `corpus` and crediting wins
    /// to `ledger`.
    pub fn new(corpus: Arc<dyn TextCorpus>, ledger: Arc<dyn UserLedger>) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            corpus,
            ledger,
        }
    }

    /// Register an authenticated channel.
    pub async fn attach(&self, channel: Channel) {
        debug!(user = %channel.username(), channel = %channel.id(), "channel attached");
        self.registry.lock().await.attachments.push(Attachment {
            channel,
            room: None,
        });
    }

    /// Forget a closed channel, leaving its room if it had one.
    /// Rooms left without participants are destroyed.
    pub async fn detach(&self, id: ChannelId) -> Option<RoomId> {
        let mut registry = self.registry.lock().await;
        let idx = registry
            .attachments
            .iter()
            .position(|a| a.channel.id() == id)?;
        let attachment = registry.attachments.remove(idx);
        debug!(user = %attachment.channel.username(), channel = %id, "channel detached");

        let room_id = attachment.room?;
        let room_idx = registry.rooms.iter().position(|r| r.id() == room_id)?;
        let room = &mut registry.rooms[room_idx];
        room.unseat(id);

        if room.is_empty() {
            registry.rooms.remove(room_idx);
            info!(room = %room_id, "room destroyed");
        } else {
            info!(room = %room_id, user = %attachment.channel.username(), "participant left room");
        }
        Some(room_id)
    }

    /// Apply one inbound message from channel `id`.
    pub async fn handle(&self, id: ChannelId, message: ClientMessage) -> Result<(), MatchError> {
        match message {
            ClientMessage::Join => self.join(id).await.map(|_| ()),
            ClientMessage::Progress { progress } => self.progress(id, progress).await,
            ClientMessage::Complete { wpm, errors } => self.complete(id, wpm, errors).await,
        }
    }

    /// Seat the channel in the first open room, or in a new room with a
    /// freshly drawn text.
    pub async fn join(&self, id: ChannelId) -> Result<JoinOutcome, MatchError> {
        let mut guard = self.registry.lock().await;
        let registry = &mut *guard;

        let attachment = registry
            .attachments
            .iter()
            .find(|a| a.channel.id() == id)
            .ok_or(MatchError::NotAttached)?;
        if let Some(room_id) = attachment.room {
            return Err(MatchError::AlreadyInRoom(room_id));
        }
        let channel = attachment.channel.clone();

        let (room_idx, created) = match registry
            .rooms
            .iter()
            .position(|r| r.accepts(channel.username()))
        {
            Some(idx) => (idx, false),
            None => {
                let text = self.corpus.random_line().ok_or(MatchError::NoText)?;
                registry.rooms.push(ChallengeRoom::new(text));
                (registry.rooms.len() - 1, true)
            }
        };

        let room = &mut registry.rooms[room_idx];
        let room_id = room.id();
        let username = channel.username().to_string();
        let outcome = room.seat(channel)?;
        let started = outcome == SeatOutcome::Started;

        if created {
            info!(room = %room_id, user = %username, "room created");
        }
        if started {
            info!(room = %room_id, players = ?room.usernames(), "race started");
        }

        if let Some(attachment) = registry.attachment_mut(id) {
            attachment.room = Some(room_id);
        }

        Ok(JoinOutcome {
            room_id,
            created,
            started,
        })
    }

    /// Relay a progress value to the sender's opponent.
    pub async fn progress(&self, id: ChannelId, progress: f64) -> Result<(), MatchError> {
        let mut registry = self.registry.lock().await;
        registry.room_of(id)?.relay_progress(id, progress)?;
        Ok(())
    }

    /// Finish the sender's race and credit the win.
    ///
    /// The result reaches the room before the ledger is touched; a ledger
    /// failure is logged and does not undo the broadcast.
    pub async fn complete(&self, id: ChannelId, wpm: f64, errors: u32) -> Result<(), MatchError> {
        let (room_id, winner) = {
            let mut registry = self.registry.lock().await;
            let room = registry.room_of(id)?;
            let winner = room.finish(id, wpm, errors).map_err(|e| {
                if e == RoomError::NotActive {
                    debug!(room = %room.id(), "completion ignored, race not active");
                }
                e
            })?;
            (room.id(), winner)
        };

        info!(room = %room_id, winner = %winner, wpm, errors, "race finished");
        if let Err(e) = self.ledger.increment_victories(&winner) {
            warn!(user = %winner, error = %e, "failed to record victory");
        }
        Ok(())
    }

    /// Distinct usernames of admitted channels, in admission order.
    pub async fn connected_users(&self) -> Vec<String> {
        let registry = self.registry.lock().await;
        let mut users: Vec<String> = Vec::new();
        for attachment in &registry.attachments {
            let name = attachment.channel.username();
            if !users.iter().any(|u| u == name) {
                users.push(name.to_string());
            }
        }
        users
    }

    /// Number of admitted channels.
    pub async fn channel_count(&self) -> usize {
        self.registry.lock().await.attachments.len()
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.registry.lock().await.rooms.len()
    }

    /// Views of every room in creation order.
    pub async fn room_snapshot(&self) -> Vec<RoomSnapshot> {
        let registry = self.registry.lock().await;
        registry.rooms.iter().map(RoomSnapshot::from).collect()
    }

    /// View of the room a channel sits in.
    pub async fn room_for(&self, id: ChannelId) -> Option<RoomSnapshot> {
        let mut registry = self.registry.lock().await;
        registry.room_of(id).ok().map(|room| RoomSnapshot::from(&*room))
    }
}
