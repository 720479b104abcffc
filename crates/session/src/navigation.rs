use agri_chat_client::ConversationId;

/// Router owning the "which conversation is open" hint.
pub trait Navigator: Send {
    /// Replaces the current hint in place; must not trigger a fresh load.
    fn replace_conversation(&mut self, conversation_id: Option<&ConversationId>);
}
