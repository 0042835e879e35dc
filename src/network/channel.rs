//! Channel Adapter
//!
//! One live, bidirectional connection per participant. Outbound messages go
//! through a bounded queue drained by the transport's writer task; inbound
//! frames and the final close arrive as [`ChannelEvent`]s consumed by
//! [`drive`], the per-channel task.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::network::coordinator::MatchCoordinator;
use crate::network::protocol::{ClientMessage, ServerMessage};

/// Unique identifier of one connection.
pub type ChannelId = Uuid;

/// Outbound delivery errors.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The outbound queue is full.
    #[error("outbound queue full")]
    Full,
    /// The writer side has gone away.
    #[error("channel closed")]
    Closed,
}

/// Write handle for one authenticated connection.
#[derive(Debug, Clone)]
pub struct Channel {
    id: ChannelId,
    username: String,
    outbound: mpsc::Sender<ServerMessage>,
}

impl Channel {
    /// Wrap an outbound queue for `username`.
    pub fn new(username: impl Into<String>, outbound: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            outbound,
        }
    }

    /// Create a channel together with the receiving end of its queue.
    pub fn pair(
        username: impl Into<String>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(username, tx), rx)
    }

    /// Connection identifier.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Authenticated owner.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Queue a message without waiting.
    pub fn send(&self, message: ServerMessage) -> Result<(), ChannelError> {
        self.outbound.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::Full,
            mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
        })
    }

    /// Queue a message, logging instead of failing when it cannot be delivered.
    pub(crate) fn deliver(&self, message: ServerMessage) {
        let kind = message.kind();
        if let Err(e) = self.send(message) {
            warn!(user = %self.username, channel = %self.id, kind, error = %e, "dropped outbound message");
        }
    }
}

/// Something that happened on the inbound side of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A text frame arrived.
    Frame(String),
    /// The connection closed. Always the last event.
    Closed,
}

/// Per-channel task: admit the channel, process its frames in order, and
/// detach it when it closes.
///
/// A dropped event sender counts as a close, so the coordinator always sees
/// the disconnect.
pub async fn drive(
    coordinator: Arc<MatchCoordinator>,
    channel: Channel,
    mut events: mpsc::Receiver<ChannelEvent>,
) {
    let id = channel.id();
    let username = channel.username().to_string();
    coordinator.attach(channel).await;

    while let Some(event) = events.recv().await {
        let text = match event {
            ChannelEvent::Frame(text) => text,
            ChannelEvent::Closed => break,
        };

        let message = match ClientMessage::from_json(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!(user = %username, error = %e, "discarding malformed message");
                continue;
            }
        };

        if let Err(e) = coordinator.handle(id, message).await {
            debug!(user = %username, error = %e, "message not applied");
        }
    }

    coordinator.detach(id).await;
}
