use std::fmt;
use std::future::Future;
use std::pin::Pin;

use futures::stream::BoxStream;
use snafu::Snafu;

use super::types::{
    ConversationId, ConversationSummary, Coordinates, HistoryMessage, HistoryTurn, SoilReading,
    WeatherReport,
};

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000/api/";

/// Connection settings for the advisory backend.
///
/// The bearer token is handed over by the surrounding login flow and attached
/// verbatim; this crate never inspects or refreshes it.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub bearer_token: Option<String>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, bearer_token: Option<String>) -> Self {
        let mut base_url = base_url.into().trim().to_string();
        if base_url.is_empty() {
            base_url = DEFAULT_API_BASE_URL.to_string();
        }
        // Relative endpoint joins drop the last path segment without a trailing slash.
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Self {
            base_url,
            bearer_token: bearer_token
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE_URL, None)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// One send: the composed question plus recent prior turns for context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub conversation_id: Option<ConversationId>,
    pub question: String,
    pub history: Vec<HistoryMessage>,
}

impl ChatRequest {
    pub fn new(conversation_id: Option<ConversationId>, question: impl Into<String>) -> Self {
        Self {
            conversation_id,
            question: question.into(),
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<HistoryMessage>) -> Self {
        self.history = history;
        self
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type DeltaStream = BoxStream<'static, ClientResult<String>>;
pub type ClientResult<T> = Result<T, ClientError>;

/// Response of an opened chat stream.
///
/// `conversation_id` comes from the response headers and is available before
/// any of the body has been read.
pub struct ChatStream {
    pub conversation_id: Option<ConversationId>,
    pub deltas: DeltaStream,
}

impl fmt::Debug for ChatStream {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ChatStream")
            .field("conversation_id", &self.conversation_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClientError {
    #[snafu(display("invalid backend url '{url}': {details}"))]
    InvalidUrl {
        stage: &'static str,
        url: String,
        details: String,
    },
    #[snafu(display("failed to build http client on `{stage}`, {source}"))]
    BuildHttpClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("http request failed on `{stage}`, {source}"))]
    Request {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("{endpoint} returned status {status}: {body}"))]
    UnexpectedStatus {
        stage: &'static str,
        endpoint: String,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to decode response from {endpoint}, {source}"))]
    DecodeBody {
        stage: &'static str,
        endpoint: String,
        source: reqwest::Error,
    },
    #[snafu(display("connection dropped while streaming the answer, {source}"))]
    BodyChunk {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("{sensor} data is currently unavailable"))]
    SensorUnavailable {
        stage: &'static str,
        sensor: &'static str,
    },
}

/// Chat transport: streaming send, history load and conversation listing.
pub trait ChatBackend: Send + Sync {
    /// Resolves once response headers are available; the body is consumed lazily.
    fn open_chat<'a>(&'a self, request: ChatRequest) -> BoxFuture<'a, ClientResult<ChatStream>>;
    fn load_history<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> BoxFuture<'a, ClientResult<Vec<HistoryTurn>>>;
    fn list_conversations<'a>(&'a self) -> BoxFuture<'a, ClientResult<Vec<ConversationSummary>>>;
}

/// Field data lookups used to build message attachments.
pub trait SensorSource: Send + Sync {
    fn fetch_weather<'a>(
        &'a self,
        coordinates: Coordinates,
    ) -> BoxFuture<'a, ClientResult<WeatherReport>>;
    fn fetch_soil_moisture<'a>(&'a self) -> BoxFuture<'a, ClientResult<SoilReading>>;
}
