use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Title shown for conversations the server returns without a name.
pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";

/// Server-assigned conversation identifier.
///
/// The backend is free to send numeric or string ids; both forms compare equal
/// once decoded, so `42` and `"42"` name the same conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ConversationId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl Serialize for ConversationId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ConversationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawConversationId {
            Text(String),
            Unsigned(u64),
            Signed(i64),
        }

        let id = match RawConversationId::deserialize(deserializer)? {
            RawConversationId::Text(text) => text,
            RawConversationId::Unsigned(value) => value.to_string(),
            RawConversationId::Signed(value) => value.to_string(),
        };
        Ok(Self::new(id))
    }
}

/// Sidebar entry returned by the conversation listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    #[serde(default, alias = "name", alias = "title")]
    pub display_name: String,
}

impl ConversationSummary {
    pub fn new(id: impl Into<ConversationId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }

    /// Trims the display name and substitutes the default title when blank.
    pub fn normalized(mut self) -> Self {
        let trimmed = self.display_name.trim();
        self.display_name = if trimmed.is_empty() {
            DEFAULT_CONVERSATION_TITLE.to_string()
        } else {
            trimmed.to_string()
        };
        self
    }
}

/// One persisted question/answer exchange as returned by the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HistoryTurn {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
}

impl HistoryTurn {
    pub fn new(question: Option<&str>, answer: Option<&str>) -> Self {
        Self {
            question: question.map(str::to_string),
            answer: answer.map(str::to_string),
        }
    }
}

/// Speaker role carried in the request's prior-turn context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}

impl HistoryMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Latitude/longitude pair used for weather lookups.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    pub temperature_celsius: f64,
    pub condition: String,
    pub humidity_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoilReading {
    pub moisture_percent: f64,
    pub status: Option<String>,
}
