//! Challenge Room
//!
//! Pairing context for one race. A room seats at most two participants in
//! join order, holds the text both of them type, and moves through
//! `Waiting -> Active -> Finished`. Rooms are destroyed by the coordinator
//! once their last participant leaves.

use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::network::channel::{Channel, ChannelId};
use crate::network::protocol::ServerMessage;

/// Unique room identifier.
pub type RoomId = Uuid;

/// Participants per race.
pub const ROOM_CAPACITY: usize = 2;

/// Room lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    /// Fewer than two participants, race not started.
    Waiting,
    /// Race in progress.
    Active,
    /// A completion has been broadcast.
    Finished,
}

/// Result of seating a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatOutcome {
    /// Seated; waiting for an opponent.
    Waiting,
    /// Seated as the second participant; the race has started.
    Started,
}

/// Room errors.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum RoomError {
    /// Both seats taken.
    #[error("room is full")]
    Full,
    /// Room no longer accepts participants.
    #[error("room is not waiting for players")]
    NotWaiting,
    /// The user already holds a seat here.
    #[error("already seated")]
    AlreadySeated,
    /// The channel has no seat here.
    #[error("not seated in this room")]
    NotSeated,
    /// Race messages are only accepted while active.
    #[error("race is not active")]
    NotActive,
}

/// One race room.
#[derive(Debug)]
pub struct ChallengeRoom {
    id: RoomId,
    text: String,
    state: RoomState,
    participants: Vec<Channel>,
    created_at: Instant,
}

impl ChallengeRoom {
    /// Create an empty room bound to `text`.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            state: RoomState::Waiting,
            participants: Vec::with_capacity(ROOM_CAPACITY),
            created_at: Instant::now(),
        }
    }

    /// Room identifier.
    pub fn id(&self) -> RoomId {
        self.id
    }

    /// Text assigned at creation.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RoomState {
        self.state
    }

    /// Seated participants.
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// True once everyone has left.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Usernames in join order.
    pub fn usernames(&self) -> Vec<String> {
        self.participants
            .iter()
            .map(|c| c.username().to_string())
            .collect()
    }

    /// Time since creation.
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Whether this channel holds a seat.
    pub fn contains(&self, channel: ChannelId) -> bool {
        self.participants.iter().any(|c| c.id() == channel)
    }

    /// Waiting with a free seat.
    pub fn is_open(&self) -> bool {
        self.state == RoomState::Waiting && self.participants.len() < ROOM_CAPACITY
    }

    /// Open, and `username` is not already racing here.
    pub fn accepts(&self, username: &str) -> bool {
        self.is_open() && !self.participants.iter().any(|c| c.username() == username)
    }

    /// Seat a participant. The second seat notifies the first occupant and
    /// starts the race for both.
    pub fn seat(&mut self, channel: Channel) -> Result<SeatOutcome, RoomError> {
        if self.state != RoomState::Waiting {
            return Err(RoomError::NotWaiting);
        }
        if self.participants.len() >= ROOM_CAPACITY {
            return Err(RoomError::Full);
        }
        if self
            .participants
            .iter()
            .any(|c| c.id() == channel.id() || c.username() == channel.username())
        {
            return Err(RoomError::AlreadySeated);
        }

        self.participants.push(channel);
        if self.participants.len() < ROOM_CAPACITY {
            return Ok(SeatOutcome::Waiting);
        }

        self.participants[0].deliver(ServerMessage::OpponentJoined);
        self.broadcast(&ServerMessage::GameStart {
            text: self.text.clone(),
        });
        self.state = RoomState::Active;
        Ok(SeatOutcome::Started)
    }

    /// Forward a progress value to everyone except the sender.
    /// Returns how many participants it was sent to.
    pub fn relay_progress(&self, from: ChannelId, progress: f64) -> Result<usize, RoomError> {
        if self.state != RoomState::Active {
            return Err(RoomError::NotActive);
        }
        if !self.contains(from) {
            return Err(RoomError::NotSeated);
        }

        let mut relayed = 0;
        for peer in self.participants.iter().filter(|c| c.id() != from) {
            peer.deliver(ServerMessage::OpponentProgress { progress });
            relayed += 1;
        }
        Ok(relayed)
    }

    /// Record a completion: broadcast the result and finish the race.
    /// Returns the winner's username.
    pub fn finish(&mut self, from: ChannelId, wpm: f64, errors: u32) -> Result<String, RoomError> {
        if self.state != RoomState::Active {
            return Err(RoomError::NotActive);
        }
        let winner = self
            .participants
            .iter()
            .find(|c| c.id() == from)
            .map(|c| c.username().to_string())
            .ok_or(RoomError::NotSeated)?;

        self.broadcast(&ServerMessage::GameOver {
            winner: winner.clone(),
            wpm,
            errors,
        });
        self.state = RoomState::Finished;
        Ok(winner)
    }

    /// Remove a participant and tell whoever remains. State is unchanged.
    pub fn unseat(&mut self, channel: ChannelId) -> Option<Channel> {
        let idx = self.participants.iter().position(|c| c.id() == channel)?;
        let leaving = self.participants.remove(idx);
        self.broadcast(&ServerMessage::OpponentLeft);
        Some(leaving)
    }

    fn broadcast(&self, message: &ServerMessage) {
        for participant in &self.participants {
            participant.deliver(message.clone());
        }
    }
}
