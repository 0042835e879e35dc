//! Protocol Messages
//!
//! Wire format for the race channel. Every frame is a JSON object tagged by
//! its `type` field.

use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Request a seat in a room.
    Join,

    /// Fraction of the text typed so far. Expected in [0, 1]; not clamped.
    Progress {
        /// Completion fraction.
        progress: f64,
    },

    /// The sender finished the text. Browsers serialize a non-finite wpm
    /// as `null`, so both numbers are read leniently.
    Complete {
        /// Measured words per minute.
        #[serde(default, deserialize_with = "lenient_wpm")]
        wpm: f64,
        /// Typing mistakes.
        #[serde(default, deserialize_with = "lenient_errors")]
        errors: u32,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A second participant has joined your room.
    OpponentJoined,

    /// The race starts; both participants receive the same text.
    GameStart {
        /// Text to type.
        text: String,
    },

    /// Progress relayed from the other participant.
    OpponentProgress {
        /// Completion fraction, as sent.
        progress: f64,
    },

    /// The race is over.
    GameOver {
        /// Username of the first finisher.
        winner: String,
        /// Winner's words per minute.
        wpm: f64,
        /// Winner's mistakes.
        errors: u32,
    },

    /// The other participant disconnected.
    OpponentLeft,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

/// `null` and non-finite values read as 0.
fn lenient_wpm<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let wpm = Option::<f64>::deserialize(deserializer)?;
    Ok(wpm.filter(|w| w.is_finite()).unwrap_or(0.0))
}

/// Accepts fractional counts, rounded and saturated into `u32`.
fn lenient_errors<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let errors = Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0);
    if !errors.is_finite() {
        return Ok(0);
    }
    Ok(errors.round().clamp(0.0, u32::MAX as f64) as u32)
}

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Wire name of the message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::OpponentJoined => "opponent_joined",
            ServerMessage::GameStart { .. } => "game_start",
            ServerMessage::OpponentProgress { .. } => "opponent_progress",
            ServerMessage::GameOver { .. } => "game_over",
            ServerMessage::OpponentLeft => "opponent_left",
        }
    }
}
