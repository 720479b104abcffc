use agri_chat_client::ConversationId;

use super::identity::IdentityState;
use super::message::{MessageId, StreamTarget};

/// Stream lifecycle mapped into session language.
///
/// Every send yields `Opened` at most once, then deltas, then exactly one of
/// `Done` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventPayload {
    /// Response headers arrived; carries the server-assigned id, if any.
    Opened {
        conversation_id: Option<ConversationId>,
    },
    Delta(String),
    Done,
    Failed {
        /// True when the request was rejected before any body was read.
        before_stream: bool,
        message: String,
    },
}

impl StreamEventPayload {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }
}

/// Emitted by the stream worker, routed by target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEventMapped {
    pub target: StreamTarget,
    pub payload: StreamEventPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// User-visible, dismissible message. Not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            text: text.into(),
        }
    }
}

/// Render hints for the presentation layer, drained with `take_updates`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// The log was replaced or cleared; redraw it entirely.
    LogReplaced,
    MessageAppended(MessageId),
    MessageDelta { id: MessageId, text: String },
    MessageFinished(MessageId),
    IdentityChanged(IdentityState),
    ScrollToEnd,
    /// Content arrived while the viewport was scrolled away from the tail.
    UnseenContent,
    DirectoryRefreshed,
}
