use std::time::{SystemTime, UNIX_EPOCH};

use agri_chat_client::Role;

/// Stable identifier for one message.
///
/// Allocated from a per-controller counter that never rewinds, so an id from a
/// log that has since been reset can never match a message in the new log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identifier for one dispatched send.
///
/// Changes on every dispatch so late events from an earlier send are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamSessionId(pub u64);

impl StreamSessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Bumped whenever the message log is reset for a different conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LogGeneration(pub u64);

impl LogGeneration {
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

/// Stream routing key used for stale-event rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub generation: LogGeneration,
    pub session_id: StreamSessionId,
}

impl StreamTarget {
    pub const fn new(generation: LogGeneration, session_id: StreamSessionId) -> Self {
        Self {
            generation,
            session_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    pub fn role(self) -> Role {
        match self {
            Self::User => Role::User,
            Self::Assistant => Role::Assistant,
        }
    }
}

/// Lifecycle status for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    Streaming(StreamSessionId),
    Done,
    Failed(String),
}

impl MessageStatus {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender: Sender,
    pub text: String,
    pub timestamp_unix_seconds: u64,
    pub status: MessageStatus,
}

impl Message {
    pub fn new(id: MessageId, sender: Sender, text: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            id,
            sender,
            text: text.into(),
            timestamp_unix_seconds: unix_now(),
            status,
        }
    }

    pub fn user(id: MessageId, text: impl Into<String>) -> Self {
        Self::new(id, Sender::User, text, MessageStatus::Done)
    }

    pub fn assistant(id: MessageId, text: impl Into<String>) -> Self {
        Self::new(id, Sender::Assistant, text, MessageStatus::Done)
    }

    /// Creates the empty assistant record that a send fills incrementally.
    pub fn placeholder(id: MessageId, session_id: StreamSessionId) -> Self {
        Self::new(
            id,
            Sender::Assistant,
            String::new(),
            MessageStatus::Streaming(session_id),
        )
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
