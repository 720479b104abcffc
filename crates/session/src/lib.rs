//! Streaming chat session core for the advisory assistant screen.
//!
//! [`ChatSessionController`] owns one conversation view at a time: it resolves
//! which conversation a message belongs to, composes questions from text plus
//! attached field data, and folds the streamed answer into the message log.

mod attachment;
mod controller;
mod directory;
mod events;
mod identity;
mod log;
mod message;
mod navigation;
mod scroll;
mod worker;

pub use attachment::{
    AddOutcome, Attachment, AttachmentBuilder, AttachmentError, AttachmentId, AttachmentKind,
    AttachmentPayload, AttachmentResult, AttachmentSource, CONTEXT_SEPARATOR, IMAGE_EXTENSIONS,
    ImagePicker, MAX_IMAGE_SIZE, SensorAttachmentSource, validate_image,
};
pub use controller::{
    ChatSessionController, DEFAULT_HISTORY_LIMIT, DEFAULT_STREAM_IDLE_TIMEOUT, STREAM_ERROR_MARKER,
    SendOutcome, SessionOptions,
};
pub use directory::ConversationDirectory;
pub use events::{Notice, NoticeLevel, SessionUpdate, StreamEventMapped, StreamEventPayload};
pub use identity::{
    ConversationIdentity, IdentityRejection, IdentityState, IdentityTransition,
    IdentityTransitionResult,
};
pub use log::{MessageLog, flatten_history};
pub use message::{
    LogGeneration, Message, MessageId, MessageStatus, Sender, StreamSessionId, StreamTarget,
};
pub use navigation::Navigator;
pub use scroll::TailFollow;
