use agri_chat_client::{HistoryMessage, HistoryTurn};

use super::message::{Message, MessageId, MessageStatus};

/// Ordered message records of the active conversation.
///
/// Messages are never removed one at a time; the only removal is a full reset.
#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Appends `delta` to the streaming message `id`.
    ///
    /// Returns false without touching anything when the message is gone (log
    /// reset) or already finished.
    pub fn update_tail(&mut self, id: MessageId, delta: &str) -> bool {
        let Some(message) = self.find_streaming_mut(id) else {
            return false;
        };
        message.text.push_str(delta);
        true
    }

    /// Moves a streaming message to its terminal status.
    pub fn finish(&mut self, id: MessageId, status: MessageStatus, marker: Option<&str>) -> bool {
        let Some(message) = self.find_streaming_mut(id) else {
            return false;
        };
        if let Some(marker) = marker {
            message.text.push_str(marker);
        }
        message.status = status;
        true
    }

    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub fn reset(&mut self) {
        self.messages.clear();
    }

    /// Up to `limit` finished, non-empty messages preceding `before`, oldest first.
    pub fn history_before(&self, before: MessageId, limit: usize) -> Vec<HistoryMessage> {
        let end = self
            .messages
            .iter()
            .position(|message| message.id == before)
            .unwrap_or(self.messages.len());

        let mut history = self.messages[..end]
            .iter()
            .rev()
            .filter(|message| message.status == MessageStatus::Done && !message.text.is_empty())
            .take(limit)
            .map(|message| HistoryMessage::new(message.sender.role(), message.text.clone()))
            .collect::<Vec<_>>();
        history.reverse();
        history
    }

    fn find_streaming_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|message| message.id == id && message.status.is_streaming())
    }
}

/// Flattens loaded turns into user/assistant messages, preserving turn order.
///
/// `alloc` hands out message ids; turns with neither side produce nothing.
pub fn flatten_history(
    turns: Vec<HistoryTurn>,
    mut alloc: impl FnMut() -> MessageId,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(turns.len() * 2);
    for turn in turns {
        if let Some(question) = turn.question.filter(|text| !text.trim().is_empty()) {
            messages.push(Message::user(alloc(), question));
        }
        if let Some(answer) = turn.answer.filter(|text| !text.trim().is_empty()) {
            messages.push(Message::assistant(alloc(), answer));
        }
    }
    messages
}
