use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agri_chat_client::{
    BoxFuture, ChatBackend, ChatRequest, ChatStream, ClientError, ClientResult, ConversationId,
    ConversationSummary, HistoryMessage, HistoryTurn, Role, WeatherReport,
};
use agri_chat_session::{
    AttachmentKind, AttachmentPayload, AttachmentResult, AttachmentSource, ChatSessionController,
    IdentityState, MessageStatus, Navigator, NoticeLevel, STREAM_ERROR_MARKER, SendOutcome,
    Sender, SessionOptions, SessionUpdate,
};
use futures::StreamExt;
use tokio::sync::mpsc;

type DeltaSender = mpsc::UnboundedSender<ClientResult<String>>;

enum ScriptedOpen {
    Stream {
        conversation_id: Option<ConversationId>,
        deltas: mpsc::UnboundedReceiver<ClientResult<String>>,
    },
    Reject(u16),
}

/// Backend whose streams are fed by the test through channels.
#[derive(Default)]
struct ScriptedBackend {
    opens: Mutex<VecDeque<ScriptedOpen>>,
    requests: Mutex<Vec<ChatRequest>>,
    histories: Mutex<HashMap<ConversationId, Vec<HistoryTurn>>>,
    list_calls: AtomicUsize,
    listing_down: AtomicBool,
}

impl ScriptedBackend {
    fn push_stream(&self, conversation_id: Option<&str>) -> DeltaSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.opens.lock().unwrap().push_back(ScriptedOpen::Stream {
            conversation_id: conversation_id.map(ConversationId::from),
            deltas: rx,
        });
        tx
    }

    fn push_rejection(&self, status: u16) {
        self.opens
            .lock()
            .unwrap()
            .push_back(ScriptedOpen::Reject(status));
    }

    fn set_history(&self, id: &str, turns: Vec<HistoryTurn>) {
        self.histories
            .lock()
            .unwrap()
            .insert(ConversationId::from(id), turns);
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn fail_listing(&self) {
        self.listing_down.store(true, Ordering::SeqCst);
    }

    fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

impl ChatBackend for ScriptedBackend {
    fn open_chat<'a>(&'a self, request: ChatRequest) -> BoxFuture<'a, ClientResult<ChatStream>> {
        self.requests.lock().unwrap().push(request);
        let scripted = self.opens.lock().unwrap().pop_front();
        Box::pin(async move {
            match scripted {
                Some(ScriptedOpen::Stream {
                    conversation_id,
                    deltas,
                }) => Ok(ChatStream {
                    conversation_id,
                    deltas: futures::stream::unfold(deltas, |mut deltas| async move {
                        deltas.recv().await.map(|delta| (delta, deltas))
                    })
                    .boxed(),
                }),
                Some(ScriptedOpen::Reject(status)) => Err(ClientError::UnexpectedStatus {
                    stage: "test",
                    endpoint: "chat/stream".to_string(),
                    status,
                    body: "unavailable".to_string(),
                }),
                None => Err(ClientError::UnexpectedStatus {
                    stage: "test",
                    endpoint: "chat/stream".to_string(),
                    status: 500,
                    body: "unscripted send".to_string(),
                }),
            }
        })
    }

    fn load_history<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> BoxFuture<'a, ClientResult<Vec<HistoryTurn>>> {
        let turns = self
            .histories
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        Box::pin(async move { Ok(turns) })
    }

    fn list_conversations<'a>(&'a self) -> BoxFuture<'a, ClientResult<Vec<ConversationSummary>>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let down = self.listing_down.load(Ordering::SeqCst);
        Box::pin(async move {
            if down {
                return Err(ClientError::UnexpectedStatus {
                    stage: "test",
                    endpoint: "chats".to_string(),
                    status: 502,
                    body: "bad gateway".to_string(),
                });
            }
            Ok(vec![ConversationSummary::new("42", "Irrigation")])
        })
    }
}

struct SunnyWeather;

impl AttachmentSource for SunnyWeather {
    fn collect<'a>(
        &'a self,
        kind: AttachmentKind,
    ) -> BoxFuture<'a, AttachmentResult<Option<AttachmentPayload>>> {
        Box::pin(async move {
            Ok(match kind {
                AttachmentKind::Weather => Some(AttachmentPayload::Weather(WeatherReport {
                    temperature_celsius: 30.0,
                    condition: "Sunny".to_string(),
                    humidity_percent: Some(40.0),
                })),
                AttachmentKind::Soil | AttachmentKind::Image => None,
            })
        })
    }
}

#[derive(Clone, Default)]
struct RecordingNavigator {
    replacements: Arc<Mutex<Vec<Option<ConversationId>>>>,
}

impl Navigator for RecordingNavigator {
    fn replace_conversation(&mut self, conversation_id: Option<&ConversationId>) {
        self.replacements
            .lock()
            .unwrap()
            .push(conversation_id.cloned());
    }
}

struct Harness {
    backend: Arc<ScriptedBackend>,
    navigator: RecordingNavigator,
    controller: ChatSessionController,
}

fn harness_with(options: SessionOptions) -> Harness {
    let backend = Arc::new(ScriptedBackend::default());
    let navigator = RecordingNavigator::default();
    let controller = ChatSessionController::new(
        backend.clone(),
        Arc::new(SunnyWeather),
        Box::new(navigator.clone()),
        options,
    );
    Harness {
        backend,
        navigator,
        controller,
    }
}

fn harness() -> Harness {
    harness_with(SessionOptions::default())
}

fn texts(controller: &ChatSessionController) -> Vec<String> {
    controller
        .messages()
        .iter()
        .map(|message| message.text.clone())
        .collect()
}

#[tokio::test]
async fn blank_send_without_attachments_does_nothing() {
    let mut h = harness();

    assert_eq!(h.controller.send(""), SendOutcome::Ignored);
    assert_eq!(h.controller.send("   \n"), SendOutcome::Ignored);

    assert!(h.controller.messages().is_empty());
    assert!(h.backend.requests().is_empty());
    assert!(h.controller.take_notices().is_empty());
}

#[tokio::test]
async fn question_includes_attachment_context_and_clears_attachments() {
    let mut h = harness();
    let stream = h.backend.push_stream(Some("42"));
    h.controller.add_attachment(AttachmentKind::Weather).await;
    assert_eq!(h.controller.attachments()[0].label, "Sunny 30°C");

    assert_eq!(h.controller.send("water?"), SendOutcome::Dispatched);

    assert!(h.controller.attachments().is_empty());
    assert_eq!(h.controller.messages()[0].text, "water?\n[Weather: Sunny, 30°C]");
    h.controller.process_next_event().await;
    assert_eq!(
        h.backend.requests()[0].question,
        "water?\n[Weather: Sunny, 30°C]"
    );
    drop(stream);
}

#[tokio::test]
async fn question_keeps_user_text_verbatim() {
    let mut h = harness();
    let _stream = h.backend.push_stream(Some("42"));
    h.controller.add_attachment(AttachmentKind::Weather).await;

    h.controller.send("  water?\n  line two  ");

    assert_eq!(
        h.controller.messages()[0].text,
        "  water?\n  line two  \n[Weather: Sunny, 30°C]"
    );
    h.controller.process_next_event().await;
    assert_eq!(
        h.backend.requests()[0].question,
        "  water?\n  line two  \n[Weather: Sunny, 30°C]"
    );
}

#[tokio::test]
async fn attachment_only_send_uses_context_as_question() {
    let mut h = harness();
    let _stream = h.backend.push_stream(Some("42"));
    h.controller.add_attachment(AttachmentKind::Weather).await;

    assert_eq!(h.controller.send(""), SendOutcome::Dispatched);
    assert_eq!(h.controller.messages()[0].text, "[Weather: Sunny, 30°C]");
}

#[tokio::test]
async fn duplicate_attachment_yields_one_notice_and_no_change() {
    let mut h = harness();
    h.controller.add_attachment(AttachmentKind::Weather).await;
    let before = h.controller.attachments().to_vec();
    h.controller.take_notices();

    assert_eq!(h.controller.add_attachment(AttachmentKind::Weather).await, None);

    assert_eq!(h.controller.attachments(), before.as_slice());
    let notices = h.controller.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Warning);
}

#[tokio::test]
async fn new_conversation_binds_to_assigned_id_and_refreshes_once() {
    let mut h = harness();
    h.controller.mount(None).await;
    assert_eq!(h.backend.list_calls(), 1);

    let stream = h.backend.push_stream(Some("42"));
    h.controller.send("When should I sow wheat?");
    assert_eq!(h.controller.identity(), &IdentityState::PendingNew);

    h.controller.process_next_event().await;
    assert_eq!(
        h.controller.identity(),
        &IdentityState::Bound(ConversationId::from("42"))
    );
    assert_eq!(
        *h.navigator.replacements.lock().unwrap(),
        vec![Some(ConversationId::from("42"))]
    );

    for delta in ["Early ", "Nov", "ember."] {
        stream.send(Ok(delta.to_string())).unwrap();
        h.controller.process_next_event().await;
    }
    assert_eq!(h.backend.list_calls(), 1);

    drop(stream);
    h.controller.process_next_event().await;

    assert_eq!(h.backend.list_calls(), 2);
    let answer = &h.controller.messages()[1];
    assert_eq!(answer.sender, Sender::Assistant);
    assert_eq!(answer.text, "Early November.");
    assert_eq!(answer.status, MessageStatus::Done);
    assert!(!h.controller.is_streaming());

    // The router echoing the replaced hint must not reload anything.
    h.controller.navigate(Some(ConversationId::from("42"))).await;
    assert_eq!(texts(&h.controller).len(), 2);
}

#[tokio::test]
async fn delta_text_concatenates_regardless_of_chunking() {
    let mut h = harness();
    let stream = h.backend.push_stream(None);
    h.controller.send("hi");
    h.controller.process_next_event().await;

    let chunks = ["Ap", "ply 4", "0 kg", "", " urea", "/acre", "."];
    for chunk in chunks {
        stream.send(Ok(chunk.to_string())).unwrap();
    }
    drop(stream);
    while h.controller.is_streaming() {
        h.controller.process_next_event().await;
    }

    assert_eq!(h.controller.messages()[1].text, chunks.concat());
}

#[tokio::test]
async fn follow_up_send_reuses_bound_conversation_and_history() {
    let mut h = harness();
    h.backend
        .set_history("7", vec![HistoryTurn::new(Some("Soil pH?"), Some("6.5 is ideal."))]);
    h.controller.navigate(Some(ConversationId::from("7"))).await;
    assert_eq!(texts(&h.controller), ["Soil pH?", "6.5 is ideal."]);

    let stream = h.backend.push_stream(None);
    h.controller.send("And for rice?");
    h.controller.process_next_event().await;
    drop(stream);
    h.controller.process_next_event().await;

    let request = &h.backend.requests()[0];
    assert_eq!(request.conversation_id, Some(ConversationId::from("7")));
    assert_eq!(
        request.history,
        vec![
            HistoryMessage::new(Role::User, "Soil pH?"),
            HistoryMessage::new(Role::Assistant, "6.5 is ideal."),
        ]
    );
    assert_eq!(
        h.controller.identity(),
        &IdentityState::Bound(ConversationId::from("7"))
    );
    assert!(h.navigator.replacements.lock().unwrap().is_empty());
}

#[tokio::test]
async fn switching_conversation_mid_stream_freezes_abandoned_send() {
    let mut h = harness();
    h.backend
        .set_history("8", vec![HistoryTurn::new(Some("Pest control?"), Some("Use neem."))]);
    let stream = h.backend.push_stream(Some("42"));
    h.controller.send("Rain tomorrow?");
    h.controller.process_next_event().await;
    stream.send(Ok("Rai".to_string())).unwrap();
    h.controller.process_next_event().await;
    assert_eq!(h.controller.messages()[1].text, "Rai");
    let list_calls = h.backend.list_calls();

    h.controller.navigate(Some(ConversationId::from("8"))).await;
    let switched = texts(&h.controller);
    assert_eq!(switched, ["Pest control?", "Use neem."]);
    assert!(!h.controller.is_streaming());

    stream.send(Ok("n expected".to_string())).unwrap();
    h.controller.process_next_event().await;
    assert_eq!(texts(&h.controller), switched);
    assert_eq!(
        h.controller.identity(),
        &IdentityState::Bound(ConversationId::from("8"))
    );

    // The detached send still counts as completed for the directory.
    drop(stream);
    h.controller.process_next_event().await;
    assert_eq!(texts(&h.controller), switched);
    assert_eq!(h.backend.list_calls(), list_calls + 1);
}

#[tokio::test]
async fn mid_stream_failure_keeps_partial_text_with_marker() {
    let mut h = harness();
    h.controller.navigate(Some(ConversationId::from("9"))).await;
    let stream = h.backend.push_stream(None);
    h.controller.send("Will it rain?");
    h.controller.process_next_event().await;

    stream.send(Ok("Rai".to_string())).unwrap();
    stream
        .send(Err(ClientError::SensorUnavailable {
            stage: "test",
            sensor: "connection",
        }))
        .unwrap();
    h.controller.process_next_event().await;
    h.controller.process_next_event().await;

    let answer = &h.controller.messages()[1];
    assert_eq!(answer.text, format!("Rai{STREAM_ERROR_MARKER}"));
    assert!(matches!(answer.status, MessageStatus::Failed(_)));
    assert_eq!(h.backend.list_calls(), 1);
    assert_eq!(
        h.controller.identity(),
        &IdentityState::Bound(ConversationId::from("9"))
    );
    assert_eq!(h.controller.take_notices().len(), 1);
}

#[tokio::test]
async fn rejected_first_send_returns_identity_to_unbound() {
    let mut h = harness();
    h.backend.push_rejection(503);

    h.controller.send("hello");
    h.controller.process_next_event().await;

    assert_eq!(h.controller.identity(), &IdentityState::Unbound);
    let answer = &h.controller.messages()[1];
    assert_eq!(answer.text, STREAM_ERROR_MARKER.trim_start());
    assert!(matches!(answer.status, MessageStatus::Failed(_)));
    assert_eq!(h.controller.messages()[0].text, "hello");
    let notices = h.controller.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Error);
    assert_eq!(h.backend.list_calls(), 1);
}

#[tokio::test]
async fn second_send_while_pending_is_queued_behind_the_create() {
    let mut h = harness();
    let first = h.backend.push_stream(Some("42"));
    let second = h.backend.push_stream(None);

    assert_eq!(h.controller.send("first"), SendOutcome::Dispatched);
    assert_eq!(h.controller.send("second"), SendOutcome::Queued);
    assert_eq!(h.controller.queued_sends(), 1);

    h.controller.process_next_event().await;
    first.send(Ok("one".to_string())).unwrap();
    h.controller.process_next_event().await;
    drop(first);
    h.controller.process_next_event().await;

    // The queued send goes out against the id the first one resolved.
    h.controller.process_next_event().await;
    second.send(Ok("two".to_string())).unwrap();
    h.controller.process_next_event().await;
    drop(second);
    h.controller.process_next_event().await;

    let requests = h.backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].conversation_id, None);
    assert_eq!(requests[1].conversation_id, Some(ConversationId::from("42")));
    assert_eq!(
        requests[1].history,
        vec![
            HistoryMessage::new(Role::User, "first"),
            HistoryMessage::new(Role::Assistant, "one"),
        ]
    );
    assert_eq!(texts(&h.controller), ["first", "one", "second", "two"]);
    assert_eq!(h.backend.list_calls(), 2);
}

#[tokio::test]
async fn queued_send_after_failed_create_starts_a_new_conversation() {
    let mut h = harness();
    h.backend.push_rejection(503);
    let second = h.backend.push_stream(Some("43"));

    assert_eq!(h.controller.send("first"), SendOutcome::Dispatched);
    assert_eq!(h.controller.send("second"), SendOutcome::Queued);

    // The rejection finishes the first send and dispatches the queued one.
    h.controller.process_next_event().await;
    assert_eq!(h.controller.identity(), &IdentityState::PendingNew);
    assert_eq!(h.controller.queued_sends(), 0);

    h.controller.process_next_event().await;
    drop(second);
    h.controller.process_next_event().await;

    let requests = h.backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].conversation_id, None);
    assert_eq!(requests[1].conversation_id, None);
    assert_eq!(
        h.controller.identity(),
        &IdentityState::Bound(ConversationId::from("43"))
    );
}

#[tokio::test]
async fn failed_directory_refresh_only_raises_a_warning() {
    let mut h = harness();
    h.backend
        .set_history("9", vec![HistoryTurn::new(Some("Seed rate?"), Some("50 kg/acre."))]);
    h.controller.navigate(Some(ConversationId::from("9"))).await;
    h.controller.take_notices();
    h.backend.fail_listing();

    let stream = h.backend.push_stream(None);
    h.controller.send("And for barley?");
    h.controller.process_next_event().await;
    stream.send(Ok("45 kg/acre.".to_string())).unwrap();
    h.controller.process_next_event().await;
    drop(stream);
    h.controller.process_next_event().await;

    let notices = h.controller.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Warning);
    assert_eq!(
        texts(&h.controller),
        ["Seed rate?", "50 kg/acre.", "And for barley?", "45 kg/acre."]
    );
    assert_eq!(h.controller.messages()[3].status, MessageStatus::Done);
    assert_eq!(
        h.controller.identity(),
        &IdentityState::Bound(ConversationId::from("9"))
    );
    assert!(!h.controller.is_streaming());
}

#[tokio::test]
async fn new_conversation_clears_log_attachments_and_hint() {
    let mut h = harness();
    h.backend
        .set_history("5", vec![HistoryTurn::new(Some("q"), Some("a"))]);
    h.controller.navigate(Some(ConversationId::from("5"))).await;
    h.controller.add_attachment(AttachmentKind::Weather).await;

    h.controller.new_conversation();

    assert!(h.controller.messages().is_empty());
    assert!(h.controller.attachments().is_empty());
    assert_eq!(h.controller.identity(), &IdentityState::Unbound);
    assert_eq!(h.controller.current_hint(), None);
    assert_eq!(*h.navigator.replacements.lock().unwrap(), vec![None]);
}

#[tokio::test]
async fn scrolled_away_view_gets_unseen_content_instead_of_scroll() {
    let mut h = harness();
    let stream = h.backend.push_stream(None);
    h.controller.send("hi");
    h.controller.process_next_event().await;
    h.controller.take_updates();

    h.controller.set_viewport_pinned(false);
    stream.send(Ok("hello".to_string())).unwrap();
    h.controller.process_next_event().await;

    let updates = h.controller.take_updates();
    assert!(updates.contains(&SessionUpdate::UnseenContent));
    assert!(!updates.contains(&SessionUpdate::ScrollToEnd));
    assert!(h.controller.has_unseen_content());

    h.controller.set_viewport_pinned(true);
    assert_eq!(h.controller.take_updates(), vec![SessionUpdate::ScrollToEnd]);
    assert!(!h.controller.has_unseen_content());
}

#[tokio::test]
async fn idle_stream_times_out_as_terminal_error() {
    let mut h = harness_with(SessionOptions {
        stream_idle_timeout: Duration::from_millis(50),
        ..SessionOptions::default()
    });
    let stream = h.backend.push_stream(Some("11"));
    h.controller.send("anyone there?");
    h.controller.process_next_event().await;

    h.controller.process_next_event().await;

    assert!(!h.controller.is_streaming());
    assert!(matches!(
        h.controller.messages()[1].status,
        MessageStatus::Failed(_)
    ));
    assert_eq!(
        h.controller.identity(),
        &IdentityState::Bound(ConversationId::from("11"))
    );
    drop(stream);
}
