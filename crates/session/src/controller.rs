use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use agri_chat_client::{ChatBackend, ChatRequest, ConversationId};
use tokio::sync::mpsc;

use super::attachment::{
    AddOutcome, Attachment, AttachmentBuilder, AttachmentId, AttachmentKind, AttachmentSource,
    CONTEXT_SEPARATOR,
};
use super::directory::ConversationDirectory;
use super::events::{Notice, SessionUpdate, StreamEventMapped, StreamEventPayload};
use super::identity::{ConversationIdentity, IdentityState, IdentityTransition};
use super::log::{MessageLog, flatten_history};
use super::message::{
    LogGeneration, Message, MessageId, MessageStatus, StreamSessionId, StreamTarget,
};
use super::navigation::Navigator;
use super::scroll::TailFollow;
use super::worker::run_stream_worker;

/// Appended to an assistant message whose stream failed.
pub const STREAM_ERROR_MARKER: &str = "\n\n[Response interrupted. Please try again.]";
pub const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Prior messages sent along with each question.
pub const DEFAULT_HISTORY_LIMIT: usize = 12;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub stream_idle_timeout: Duration,
    pub history_limit: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            stream_idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank text and no attachments; nothing happened.
    Ignored,
    Dispatched,
    /// Another send is in flight; this one goes out when it ends.
    Queued,
}

/// Controller-level stream metadata kept outside the message log.
#[derive(Debug, Clone, Copy)]
struct ActiveStream {
    target: StreamTarget,
    assistant_message_id: MessageId,
}

#[derive(Debug)]
struct QueuedSend {
    user_message_id: MessageId,
    question: String,
}

/// One chat screen: identity, log, attachments and the directory, driven by
/// user intents and by stream events pumped through `next_event`/`apply_event`.
pub struct ChatSessionController {
    backend: Arc<dyn ChatBackend>,
    navigator: Box<dyn Navigator>,
    options: SessionOptions,
    identity: ConversationIdentity,
    log: MessageLog,
    attachments: AttachmentBuilder,
    directory: ConversationDirectory,
    follow: TailFollow,
    current_hint: Option<ConversationId>,
    generation: LogGeneration,
    active_stream: Option<ActiveStream>,
    queued_sends: VecDeque<QueuedSend>,
    next_message_id: u64,
    next_stream_session_id: u64,
    event_tx: mpsc::UnboundedSender<StreamEventMapped>,
    event_rx: mpsc::UnboundedReceiver<StreamEventMapped>,
    notices: Vec<Notice>,
    updates: Vec<SessionUpdate>,
}

impl ChatSessionController {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        attachment_source: Arc<dyn AttachmentSource>,
        navigator: Box<dyn Navigator>,
        options: SessionOptions,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            directory: ConversationDirectory::new(backend.clone()),
            backend,
            navigator,
            options,
            identity: ConversationIdentity::default(),
            log: MessageLog::new(),
            attachments: AttachmentBuilder::new(attachment_source),
            follow: TailFollow::new(),
            current_hint: None,
            generation: LogGeneration::default(),
            active_stream: None,
            queued_sends: VecDeque::new(),
            next_message_id: 1,
            next_stream_session_id: 1,
            event_tx,
            event_rx,
            notices: Vec::new(),
            updates: Vec::new(),
        }
    }

    pub fn identity(&self) -> &IdentityState {
        self.identity.state()
    }

    pub fn messages(&self) -> &[Message] {
        self.log.messages()
    }

    pub fn attachments(&self) -> &[Attachment] {
        self.attachments.attachments()
    }

    pub fn directory(&self) -> &ConversationDirectory {
        &self.directory
    }

    pub fn current_hint(&self) -> Option<&ConversationId> {
        self.current_hint.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        self.active_stream.is_some()
    }

    pub fn queued_sends(&self) -> usize {
        self.queued_sends.len()
    }

    pub fn has_unseen_content(&self) -> bool {
        self.follow.has_unseen_content()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn take_updates(&mut self) -> Vec<SessionUpdate> {
        std::mem::take(&mut self.updates)
    }

    /// Initial directory load, then the router's initial hint.
    pub async fn mount(&mut self, hint: Option<ConversationId>) {
        self.refresh_directory().await;
        self.navigate(hint).await;
    }

    /// Follows a change of the external navigation hint.
    ///
    /// A hint naming the conversation already bound (for example the router
    /// echoing an id this controller just assigned) changes nothing.
    pub async fn navigate(&mut self, hint: Option<ConversationId>) {
        if hint == self.current_hint {
            return;
        }
        self.current_hint = hint.clone();

        if let Some(id) = &hint
            && self.identity.conversation_id() == Some(id)
        {
            return;
        }

        tracing::info!(conversation_id = ?hint, "switching conversation");
        self.detach_conversation();
        self.apply_identity(IdentityTransition::Navigate(hint.clone()));

        if let Some(id) = hint {
            self.load_history(id).await;
        }
    }

    /// Explicit "new conversation": empty log, no attachments, no hint.
    pub fn new_conversation(&mut self) {
        self.detach_conversation();
        self.attachments.clear();
        self.apply_identity(IdentityTransition::NewConversation);
        self.current_hint = None;
        self.navigator.replace_conversation(None);
    }

    pub async fn add_attachment(&mut self, kind: AttachmentKind) -> Option<AttachmentId> {
        match self.attachments.add(kind).await {
            AddOutcome::Added(id) => Some(id),
            AddOutcome::Duplicate(kind) => {
                self.notices.push(Notice::warning(format!(
                    "A {kind} attachment is already added; remove it first to replace it."
                )));
                None
            }
            AddOutcome::Cancelled => None,
            AddOutcome::Failed(error) => {
                self.notices
                    .push(Notice::error(format!("Could not attach {kind}: {error}")));
                None
            }
        }
    }

    pub fn remove_attachment(&mut self, id: AttachmentId) -> bool {
        self.attachments.remove(id)
    }

    /// Reports whether the viewport currently sits at the tail of the log.
    pub fn set_viewport_pinned(&mut self, pinned: bool) {
        let had_unseen = self.follow.has_unseen_content();
        self.follow.set_pinned(pinned);
        if pinned && had_unseen {
            self.updates.push(SessionUpdate::ScrollToEnd);
        }
    }

    /// Composes and issues a send. Must be called within a tokio runtime.
    pub fn send(&mut self, raw_text: &str) -> SendOutcome {
        // Blankness is judged on trimmed text; the question keeps it verbatim.
        let blank = raw_text.trim().is_empty();
        if blank && self.attachments.is_empty() {
            return SendOutcome::Ignored;
        }

        let context = self.attachments.compose_context();
        let question = match (blank, context.is_empty()) {
            (false, false) => format!("{raw_text}{CONTEXT_SEPARATOR}{context}"),
            (false, true) => raw_text.to_string(),
            (true, _) => context,
        };

        let user_message_id = self.alloc_message_id();
        self.log.append(Message::user(user_message_id, question.clone()));
        self.attachments.clear();
        self.updates.push(SessionUpdate::MessageAppended(user_message_id));
        // Sending always brings the view back to the tail.
        self.follow.reset();
        self.updates.push(SessionUpdate::ScrollToEnd);

        if self.active_stream.is_some() {
            tracing::debug!(queued = self.queued_sends.len() + 1, "send queued behind active stream");
            self.queued_sends.push_back(QueuedSend {
                user_message_id,
                question,
            });
            return SendOutcome::Queued;
        }

        self.dispatch(user_message_id, question);
        SendOutcome::Dispatched
    }

    /// Waits for the next stream event from any worker, current or stale.
    pub async fn next_event(&mut self) -> Option<StreamEventMapped> {
        self.event_rx.recv().await
    }

    pub async fn process_next_event(&mut self) {
        if let Some(event) = self.next_event().await {
            self.apply_event(event).await;
        }
    }

    pub async fn apply_event(&mut self, event: StreamEventMapped) {
        if !self.stream_event_is_current(event.target) {
            // Detached sends still count as completed sends for the directory.
            if event.payload.is_terminal() {
                tracing::debug!(target = ?event.target, "stale stream finished");
                self.refresh_directory().await;
            }
            return;
        }

        match event.payload {
            StreamEventPayload::Opened { conversation_id } => self.handle_opened(conversation_id),
            StreamEventPayload::Delta(text) => self.handle_delta(text),
            StreamEventPayload::Done => self.finish_stream(None).await,
            StreamEventPayload::Failed {
                before_stream,
                message,
            } => self.finish_stream(Some((before_stream, message))).await,
        }
    }

    fn dispatch(&mut self, user_message_id: MessageId, question: String) {
        let session_id = StreamSessionId::new(self.next_stream_session_id);
        self.next_stream_session_id = self.next_stream_session_id.saturating_add(1);
        let target = StreamTarget::new(self.generation, session_id);

        let history = self
            .log
            .history_before(user_message_id, self.options.history_limit);
        let assistant_message_id = self.alloc_message_id();
        self.log
            .append(Message::placeholder(assistant_message_id, session_id));
        self.updates
            .push(SessionUpdate::MessageAppended(assistant_message_id));

        self.apply_identity(IdentityTransition::SendIssued);
        self.active_stream = Some(ActiveStream {
            target,
            assistant_message_id,
        });

        let request = ChatRequest::new(self.identity.conversation_id().cloned(), question)
            .with_history(history);
        tracing::info!(
            target = ?target,
            conversation_id = ?request.conversation_id,
            "dispatching chat send"
        );

        tokio::spawn(run_stream_worker(
            self.backend.clone(),
            request,
            target,
            self.options.stream_idle_timeout,
            self.event_tx.clone(),
        ));
    }

    fn handle_opened(&mut self, conversation_id: Option<ConversationId>) {
        let Some(id) = conversation_id else {
            return;
        };
        if *self.identity.state() != IdentityState::PendingNew {
            if self.identity.conversation_id() != Some(&id) {
                tracing::warn!(
                    assigned = %id,
                    bound = ?self.identity.conversation_id(),
                    "ignoring conversation id for an already bound conversation"
                );
            }
            return;
        }

        if self.apply_identity(IdentityTransition::Assigned(id.clone())) {
            self.current_hint = Some(id.clone());
            self.navigator.replace_conversation(Some(&id));
        }
    }

    fn handle_delta(&mut self, text: String) {
        let Some(active_stream) = self.active_stream else {
            return;
        };
        if !self.log.update_tail(active_stream.assistant_message_id, &text) {
            return;
        }

        self.updates.push(SessionUpdate::MessageDelta {
            id: active_stream.assistant_message_id,
            text,
        });
        if self.follow.content_appended() {
            self.updates.push(SessionUpdate::ScrollToEnd);
        } else {
            self.updates.push(SessionUpdate::UnseenContent);
        }
    }

    async fn finish_stream(&mut self, failure: Option<(bool, String)>) {
        let Some(active_stream) = self.active_stream.take() else {
            return;
        };
        let message_id = active_stream.assistant_message_id;

        match failure {
            None => {
                self.log.finish(message_id, MessageStatus::Done, None);
            }
            Some((before_stream, message)) => {
                let empty = self.log.get(message_id).is_some_and(|message| message.text.is_empty());
                let marker = if empty {
                    STREAM_ERROR_MARKER.trim_start()
                } else {
                    STREAM_ERROR_MARKER
                };
                self.log
                    .finish(message_id, MessageStatus::Failed(message.clone()), Some(marker));

                let notice = if before_stream {
                    format!("The assistant could not be reached: {message}")
                } else {
                    format!("The answer was cut off: {message}")
                };
                self.notices.push(Notice::error(notice));
            }
        }
        self.updates.push(SessionUpdate::MessageFinished(message_id));

        // A new conversation the server never named goes back to unbound.
        self.apply_identity(IdentityTransition::SendAbandoned);
        self.refresh_directory().await;

        if let Some(next) = self.queued_sends.pop_front() {
            self.dispatch(next.user_message_id, next.question);
        }
    }

    async fn load_history(&mut self, id: ConversationId) {
        match self.backend.load_history(&id).await {
            Ok(turns) => {
                let mut next = self.next_message_id;
                let messages = flatten_history(turns, || {
                    let message_id = MessageId::new(next);
                    next = next.saturating_add(1);
                    message_id
                });
                self.next_message_id = next;

                tracing::debug!(conversation_id = %id, count = messages.len(), "history loaded");
                self.log.replace_all(messages);
                self.updates.push(SessionUpdate::LogReplaced);
                self.updates.push(SessionUpdate::ScrollToEnd);
            }
            Err(error) => {
                tracing::warn!(conversation_id = %id, error = %error, "failed to load history");
                self.notices
                    .push(Notice::error(format!("Could not load this conversation: {error}")));
            }
        }
    }

    async fn refresh_directory(&mut self) {
        match self.directory.refresh().await {
            Ok(_) => self.updates.push(SessionUpdate::DirectoryRefreshed),
            Err(error) => {
                tracing::warn!(error = %error, "failed to refresh conversation directory");
                self.notices.push(Notice::warning(format!(
                    "Could not refresh recent chats: {error}"
                )));
            }
        }
    }

    /// Empties the log and detaches any in-flight stream from it.
    ///
    /// The worker keeps draining in the background; its events fail the
    /// target check from here on.
    fn detach_conversation(&mut self) {
        if let Some(active_stream) = self.active_stream.take() {
            tracing::debug!(target = ?active_stream.target, "detaching active stream");
        }
        self.queued_sends.clear();
        self.generation = self.generation.next();
        self.log.reset();
        self.follow.reset();
        self.updates.push(SessionUpdate::LogReplaced);
    }

    /// Returns true when the transition was accepted.
    fn apply_identity(&mut self, transition: IdentityTransition) -> bool {
        let previous = self.identity.state().clone();
        match self.identity.apply(transition) {
            Ok(next) => {
                if next != previous {
                    tracing::debug!(from = ?previous, to = ?next, "identity changed");
                    self.updates.push(SessionUpdate::IdentityChanged(next));
                }
                true
            }
            Err(rejection) => {
                tracing::warn!(rejection = ?rejection, "identity transition rejected");
                false
            }
        }
    }

    fn stream_event_is_current(&self, target: StreamTarget) -> bool {
        target.generation == self.generation
            && self
                .active_stream
                .is_some_and(|active_stream| active_stream.target == target)
    }

    fn alloc_message_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_message_id);
        self.next_message_id = self.next_message_id.saturating_add(1);
        id
    }
}
