//! HTTP client for the advisory assistant backend.
//!
//! Covers the streaming chat endpoint, conversation history and listing, and
//! the field sensor lookups used for message attachments.

mod backend;
mod decode;
mod http;
mod types;

pub use backend::{
    BoxFuture, ChatBackend, ChatRequest, ChatStream, ClientConfig, ClientError, ClientResult,
    DEFAULT_API_BASE_URL, DeltaStream, SensorSource,
};
pub use decode::Utf8StreamDecoder;
pub use http::{AdvisoryHttpClient, CONVERSATION_ID_HEADER};
pub use types::{
    ConversationId, ConversationSummary, Coordinates, DEFAULT_CONVERSATION_TITLE, HistoryMessage,
    HistoryTurn, Role, SoilReading, WeatherReport,
};
