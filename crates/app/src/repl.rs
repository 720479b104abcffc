use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use agri_chat_client::{BoxFuture, ConversationId};
use agri_chat_session::{
    AttachmentId, AttachmentKind, ChatSessionController, IdentityState, ImagePicker, MessageId,
    MessageStatus, Navigator, NoticeLevel, Sender, SessionUpdate, StreamEventMapped,
};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, watch};

pub const HELP: &str = "\
commands:
  /new                 start a new conversation
  /open <id>           open a conversation from the list
  /list                show recent conversations
  /weather             attach current weather
  /soil                attach soil moisture reading
  /image <path>        attach an image file
  /remove <n>          drop attachment #n
  /attachments         show pending attachments
  /scroll <pin|free>   follow new text or hold the view
  /quit                exit
anything else is sent as a question";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    New,
    Open(ConversationId),
    List,
    Attach(AttachmentKind),
    Image(PathBuf),
    Remove(AttachmentId),
    Attachments,
    Scroll { pinned: bool },
    Help,
    Quit,
    Send(String),
    Invalid(String),
}

impl Command {
    /// Questions are passed through untouched; only commands are trimmed.
    pub fn parse(raw: &str) -> Self {
        let line = raw.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Send(raw.to_string());
        };

        let (name, argument) = match rest.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (rest, ""),
        };

        match (name, argument) {
            ("new", "") => Self::New,
            ("list", "") => Self::List,
            ("weather", "") => Self::Attach(AttachmentKind::Weather),
            ("soil", "") => Self::Attach(AttachmentKind::Soil),
            ("attachments", "") => Self::Attachments,
            ("help", "") => Self::Help,
            ("quit" | "exit", "") => Self::Quit,
            ("open", id) if !id.is_empty() => Self::Open(ConversationId::from(id)),
            ("image", path) if !path.is_empty() => Self::Image(PathBuf::from(path)),
            ("remove", id) => match id.trim_start_matches('#').parse::<u64>() {
                Ok(id) => Self::Remove(AttachmentId(id)),
                Err(_) => Self::Invalid("usage: /remove <attachment number>".to_string()),
            },
            ("scroll", "pin") => Self::Scroll { pinned: true },
            ("scroll", "free") => Self::Scroll { pinned: false },
            _ => Self::Invalid(format!("unknown command '/{rest}', try /help")),
        }
    }
}

/// Terminal stand-in for the router: owns the "open conversation" hint.
#[derive(Clone)]
pub struct RouteState {
    route: Arc<watch::Sender<Option<ConversationId>>>,
}

impl RouteState {
    pub fn new(initial: Option<ConversationId>) -> Self {
        let (route, _) = watch::channel(initial);
        Self {
            route: Arc::new(route),
        }
    }

    pub fn current(&self) -> Option<ConversationId> {
        self.route.borrow().clone()
    }

    /// User-initiated navigation.
    pub fn open(&self, conversation_id: Option<ConversationId>) {
        self.route.send_replace(conversation_id);
    }
}

impl Navigator for RouteState {
    fn replace_conversation(&mut self, conversation_id: Option<&ConversationId>) {
        tracing::debug!(conversation_id = ?conversation_id, "route replaced");
        self.route.send_replace(conversation_id.cloned());
    }
}

/// Hands the path given to `/image` to the attachment builder.
#[derive(Default)]
pub struct QueuedImagePicker {
    pending: Mutex<Option<PathBuf>>,
}

impl QueuedImagePicker {
    pub async fn queue(&self, path: PathBuf) {
        *self.pending.lock().await = Some(path);
    }
}

impl ImagePicker for QueuedImagePicker {
    fn pick_image<'a>(&'a self) -> BoxFuture<'a, Option<PathBuf>> {
        Box::pin(async move { self.pending.lock().await.take() })
    }
}

/// Writes session updates and notices as a running transcript.
pub struct Renderer<W> {
    out: W,
    /// Assistant message being printed and how many bytes of it are out.
    streaming: Option<(MessageId, usize)>,
}

impl<W> Renderer<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(out: W) -> Self {
        Self {
            out,
            streaming: None,
        }
    }

    /// Prints a status line. An answer in progress resumes on a fresh prompt.
    pub async fn line(&mut self, text: &str) -> io::Result<()> {
        let interrupted = self.streaming.is_some();
        if interrupted {
            self.out.write_all(b"\n").await?;
        }
        self.out.write_all(text.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        if interrupted {
            self.out.write_all(b"assistant> ").await?;
        }
        self.out.flush().await
    }

    pub async fn render(&mut self, controller: &mut ChatSessionController) -> io::Result<()> {
        let updates = controller.take_updates();

        if updates.contains(&SessionUpdate::LogReplaced) {
            self.streaming = None;
            self.print_transcript(controller).await?;
        } else {
            for update in updates {
                self.apply_update(controller, update).await?;
            }
        }

        for notice in controller.take_notices() {
            let tag = match notice.level {
                NoticeLevel::Info => "info",
                NoticeLevel::Warning => "warning",
                NoticeLevel::Error => "error",
            };
            self.line(&format!("[{tag}] {}", notice.text)).await?;
        }
        self.out.flush().await
    }

    async fn apply_update(
        &mut self,
        controller: &ChatSessionController,
        update: SessionUpdate,
    ) -> io::Result<()> {
        match update {
            SessionUpdate::MessageAppended(id) => {
                let is_assistant = controller
                    .messages()
                    .iter()
                    .any(|message| message.id == id && message.sender == Sender::Assistant);
                if is_assistant {
                    self.close_stream_line().await?;
                    self.out.write_all(b"assistant> ").await?;
                    self.streaming = Some((id, 0));
                }
            }
            SessionUpdate::MessageDelta { id, .. } => {
                // A viewport held away from the tail catches up on the next scroll.
                if !controller.has_unseen_content() {
                    self.catch_up(controller, id).await?;
                }
            }
            SessionUpdate::ScrollToEnd => {
                if let Some((id, _)) = self.streaming {
                    self.catch_up(controller, id).await?;
                }
            }
            SessionUpdate::MessageFinished(id) => {
                if !matches!(self.streaming, Some((streaming_id, _)) if streaming_id == id) {
                    return Ok(());
                }
                // Failure markers are added at finish time, not as deltas.
                self.catch_up(controller, id).await?;
                self.streaming = None;
                self.out.write_all(b"\n").await?;
            }
            SessionUpdate::IdentityChanged(_)
            | SessionUpdate::LogReplaced
            | SessionUpdate::UnseenContent
            | SessionUpdate::DirectoryRefreshed => {}
        }
        Ok(())
    }

    async fn print_transcript(&mut self, controller: &ChatSessionController) -> io::Result<()> {
        match controller.identity() {
            IdentityState::Bound(id) => {
                let title = controller
                    .directory()
                    .find(id)
                    .map(|summary| summary.display_name)
                    .unwrap_or_else(|| id.to_string());
                self.line(&format!("--- {title} ---")).await?;
            }
            IdentityState::Unbound | IdentityState::PendingNew => {
                self.line("--- new conversation ---").await?;
            }
        }

        for message in controller.messages() {
            let speaker = match message.sender {
                Sender::User => "you",
                Sender::Assistant => "assistant",
            };
            self.close_stream_line().await?;
            self.out
                .write_all(format!("{speaker}> {}", message.text).as_bytes())
                .await?;
            if let MessageStatus::Streaming(_) = message.status {
                self.streaming = Some((message.id, message.text.len()));
            } else {
                self.out.write_all(b"\n").await?;
            }
        }
        Ok(())
    }

    async fn catch_up(
        &mut self,
        controller: &ChatSessionController,
        id: MessageId,
    ) -> io::Result<()> {
        let Some((streaming_id, printed)) = &mut self.streaming else {
            return Ok(());
        };
        if *streaming_id != id {
            return Ok(());
        }

        let rest = controller
            .messages()
            .iter()
            .find(|message| message.id == id)
            .and_then(|message| message.text.get(*printed..));
        if let Some(rest) = rest {
            self.out.write_all(rest.as_bytes()).await?;
            *printed += rest.len();
        }
        Ok(())
    }

    async fn close_stream_line(&mut self) -> io::Result<()> {
        if self.streaming.take().is_some() {
            self.out.write_all(b"\n").await?;
        }
        Ok(())
    }
}

enum Input {
    Line(io::Result<Option<String>>),
    Event(Option<StreamEventMapped>),
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Runs the interactive loop until `/quit` or end of input.
pub async fn run(
    mut controller: ChatSessionController,
    route: RouteState,
    images: Arc<QueuedImagePicker>,
) -> io::Result<()> {
    let mut renderer = Renderer::new(tokio::io::stdout());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    renderer
        .line("Agri assistant ready. Ask a question or type /help.")
        .await?;
    controller.mount(route.current()).await;
    renderer.render(&mut controller).await?;

    let mut input_open = true;
    loop {
        if !input_open && !controller.is_streaming() && controller.queued_sends() == 0 {
            break;
        }

        let input = tokio::select! {
            line = lines.next_line(), if input_open => Input::Line(line),
            event = controller.next_event() => Input::Event(event),
        };

        match input {
            Input::Line(Ok(Some(line))) => {
                let flow = handle_command(
                    Command::parse(&line),
                    &mut controller,
                    &route,
                    &images,
                    &mut renderer,
                )
                .await?;
                if flow == Flow::Quit {
                    break;
                }
            }
            Input::Line(Ok(None)) => input_open = false,
            Input::Line(Err(error)) => {
                tracing::error!(error = %error, "failed to read input");
                input_open = false;
            }
            Input::Event(Some(event)) => controller.apply_event(event).await,
            Input::Event(None) => break,
        }

        // Follow the route like a router would; an echoed id is a no-op.
        controller.navigate(route.current()).await;
        renderer.render(&mut controller).await?;
    }

    Ok(())
}

async fn handle_command<W>(
    command: Command,
    controller: &mut ChatSessionController,
    route: &RouteState,
    images: &QueuedImagePicker,
    renderer: &mut Renderer<W>,
) -> io::Result<Flow>
where
    W: AsyncWrite + Unpin,
{
    match command {
        Command::New => controller.new_conversation(),
        Command::Open(id) => route.open(Some(id)),
        Command::List => {
            let summaries = controller.directory().list();
            if summaries.is_empty() {
                renderer.line("no conversations yet").await?;
            }
            for summary in summaries.iter() {
                let marker = if controller.identity().conversation_id() == Some(&summary.id) {
                    "*"
                } else {
                    " "
                };
                renderer
                    .line(&format!("{marker} {:>6}  {}", summary.id, summary.display_name))
                    .await?;
            }
        }
        Command::Attach(kind) => attach(controller, kind, renderer).await?,
        Command::Image(path) => {
            images.queue(path).await;
            attach(controller, AttachmentKind::Image, renderer).await?;
        }
        Command::Remove(id) => {
            if !controller.remove_attachment(id) {
                renderer.line(&format!("no attachment #{id}")).await?;
            }
        }
        Command::Attachments => {
            if controller.attachments().is_empty() {
                renderer.line("no attachments").await?;
            }
            for attachment in controller.attachments() {
                renderer
                    .line(&format!(
                        "#{} [{}] {}",
                        attachment.id,
                        attachment.kind.icon(),
                        attachment.label
                    ))
                    .await?;
            }
        }
        Command::Scroll { pinned } => {
            controller.set_viewport_pinned(pinned);
            if !pinned {
                renderer
                    .line("holding new text; /scroll pin to catch up")
                    .await?;
            }
        }
        Command::Help => renderer.line(HELP).await?,
        Command::Quit => return Ok(Flow::Quit),
        Command::Send(text) => {
            controller.send(&text);
        }
        Command::Invalid(message) => renderer.line(&message).await?,
    }
    Ok(Flow::Continue)
}

async fn attach<W>(
    controller: &mut ChatSessionController,
    kind: AttachmentKind,
    renderer: &mut Renderer<W>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if let Some(id) = controller.add_attachment(kind).await
        && let Some(attachment) = controller
            .attachments()
            .iter()
            .find(|attachment| attachment.id == id)
    {
        renderer
            .line(&format!("attached #{id} [{}] {}", kind.icon(), attachment.label))
            .await?;
    }
    Ok(())
}
