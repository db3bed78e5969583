use crate::config::PushConfig;
use crate::error::{ConsoleError, Result};
use crate::session::SessionManager;
use crate::types::{ConversationPayload, MessagePayload};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClosedPayload {
    ById {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    Conversation(ConversationPayload),
}

impl ClosedPayload {
    pub fn conversation_id(&self) -> &str {
        match self {
            ClosedPayload::ById { conversation_id } => conversation_id,
            ClosedPayload::Conversation(conversation) => &conversation.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub conversation_id: String,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    #[serde(default = "default_true")]
    pub is_typing: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub user_id: String,
}

/// Events received on the push channel, framed as `{"event": .., "data": ..}`.
/// Legacy names are accepted as aliases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum PushEvent {
    #[serde(rename = "message:new", alias = "newMessage")]
    MessageNew(MessagePayload),
    #[serde(rename = "conversation:updated")]
    ConversationUpdated(ConversationPayload),
    #[serde(rename = "conversation:new", alias = "conversationAssigned")]
    ConversationNew(ConversationPayload),
    #[serde(rename = "conversation:closed")]
    ConversationClosed(ClosedPayload),
    #[serde(rename = "typing:user")]
    Typing(TypingPayload),
    #[serde(rename = "user:online")]
    UserOnline(PresencePayload),
    #[serde(rename = "user:offline")]
    UserOffline(PresencePayload),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushEventKind {
    MessageNew,
    ConversationUpdated,
    ConversationNew,
    ConversationClosed,
    Typing,
    UserOnline,
    UserOffline,
}

impl PushEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            PushEventKind::MessageNew => "message:new",
            PushEventKind::ConversationUpdated => "conversation:updated",
            PushEventKind::ConversationNew => "conversation:new",
            PushEventKind::ConversationClosed => "conversation:closed",
            PushEventKind::Typing => "typing:user",
            PushEventKind::UserOnline => "user:online",
            PushEventKind::UserOffline => "user:offline",
        }
    }
}

impl PushEvent {
    pub fn kind(&self) -> PushEventKind {
        match self {
            PushEvent::MessageNew(_) => PushEventKind::MessageNew,
            PushEvent::ConversationUpdated(_) => PushEventKind::ConversationUpdated,
            PushEvent::ConversationNew(_) => PushEventKind::ConversationNew,
            PushEvent::ConversationClosed(_) => PushEventKind::ConversationClosed,
            PushEvent::Typing(_) => PushEventKind::Typing,
            PushEvent::UserOnline(_) => PushEventKind::UserOnline,
            PushEvent::UserOffline(_) => PushEventKind::UserOffline,
        }
    }
}

pub fn parse_push_frame(text: &str) -> Option<PushEvent> {
    match serde_json::from_str::<PushEvent>(text) {
        Ok(event) => Some(event),
        Err(err) => {
            let name = serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|v| v.get("event").and_then(|e| e.as_str()).map(str::to_string));
            debug!(event = ?name, "ignoring push frame: {err}");
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub conversation_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub conversation_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum PushCommand {
    #[serde(rename = "conversation:join")]
    Join(ConversationRef),
    #[serde(rename = "conversation:leave")]
    Leave(ConversationRef),
    #[serde(rename = "typing:start")]
    TypingStart(ConversationRef),
    #[serde(rename = "typing:stop")]
    TypingStop(ConversationRef),
    #[serde(rename = "message:send")]
    SendMessage(OutgoingMessage),
}

impl PushCommand {
    fn conversation(id: &str) -> ConversationRef {
        ConversationRef {
            conversation_id: id.to_string(),
        }
    }

    pub fn join(id: &str) -> Self {
        PushCommand::Join(Self::conversation(id))
    }

    pub fn leave(id: &str) -> Self {
        PushCommand::Leave(Self::conversation(id))
    }

    pub fn typing_start(id: &str) -> Self {
        PushCommand::TypingStart(Self::conversation(id))
    }

    pub fn typing_stop(id: &str) -> Self {
        PushCommand::TypingStop(Self::conversation(id))
    }

    pub fn send_message(id: &str, content: &str) -> Self {
        PushCommand::SendMessage(OutgoingMessage {
            conversation_id: id.to_string(),
            content: content.to_string(),
        })
    }
}

type EventListener = Arc<dyn Fn(&PushEvent) + Send + Sync>;

/// Typed publish/subscribe for push events. Callback listeners run in
/// isolation: one panicking listener never stops delivery to the others.
/// Async consumers use [`EventBus::stream`].
pub struct EventBus {
    listeners: Mutex<Vec<(u64, Option<PushEventKind>, EventListener)>>,
    next_id: AtomicU64,
    tx: broadcast::Sender<PushEvent>,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            tx,
        }
    }

    pub fn subscribe<F>(&self, kind: Option<PushEventKind>, listener: F) -> u64
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, kind, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(listener_id, _, _)| *listener_id != id);
    }

    pub fn stream(&self) -> broadcast::Receiver<PushEvent> {
        self.tx.subscribe()
    }

    /// Delivers an event to matching listeners and stream subscribers.
    /// Returns how many callback listeners completed without panicking.
    pub fn publish(&self, event: PushEvent) -> usize {
        let kind = event.kind();
        let matching: Vec<EventListener> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, filter, _)| filter.map_or(true, |k| k == kind))
            .map(|(_, _, listener)| listener.clone())
            .collect();

        let mut delivered = 0;
        for listener in matching {
            match catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(event = kind.name(), "push listener panicked"),
            }
        }
        let _ = self.tx.send(event);
        delivered
    }
}

#[derive(Debug, Clone)]
pub struct PushCommands {
    tx: mpsc::UnboundedSender<PushCommand>,
}

impl PushCommands {
    pub fn new(tx: mpsc::UnboundedSender<PushCommand>) -> Self {
        Self { tx }
    }

    pub fn send(&self, command: PushCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| ConsoleError::Push("push connection closed".to_string()))
    }

    pub fn join_conversation(&self, id: &str) -> Result<()> {
        self.send(PushCommand::join(id))
    }

    pub fn leave_conversation(&self, id: &str) -> Result<()> {
        self.send(PushCommand::leave(id))
    }

    pub fn typing_start(&self, id: &str) -> Result<()> {
        self.send(PushCommand::typing_start(id))
    }

    pub fn typing_stop(&self, id: &str) -> Result<()> {
        self.send(PushCommand::typing_stop(id))
    }

    pub fn send_message(&self, id: &str, content: &str) -> Result<()> {
        self.send(PushCommand::send_message(id, content))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    Closed,
    Shutdown,
}

pub fn push_url(base: &str, token: Option<&str>) -> Result<String> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|err| ConsoleError::Push(format!("invalid push url {base}: {err}")))?;
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url.to_string())
}

/// Runs one socket connection until the server closes it or the command
/// channel is dropped. Rooms in `rooms` are joined right after connecting and
/// kept in sync with the join/leave commands that pass through.
pub async fn run_push_connection(
    url: &str,
    bus: &EventBus,
    commands: &mut mpsc::UnboundedReceiver<PushCommand>,
    rooms: &mut HashSet<String>,
    connected: &AtomicBool,
) -> Result<ConnectionEnd> {
    let (socket, _) = tokio_tungstenite::connect_async(url).await?;
    let (mut sink, mut stream) = socket.split();
    connected.store(true, Ordering::SeqCst);
    info!("push channel connected");

    for room in rooms.iter() {
        let frame = serde_json::to_string(&PushCommand::join(room))?;
        sink.send(WsMessage::Text(frame)).await?;
    }

    let end = loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    None => break ConnectionEnd::Closed,
                    Some(Err(err)) => return Err(err.into()),
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(event) = parse_push_frame(&text) {
                            debug!(event = event.kind().name(), "push event");
                            bus.publish(event);
                        }
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        sink.send(WsMessage::Pong(payload)).await?;
                    }
                    Some(Ok(WsMessage::Close(_))) => break ConnectionEnd::Closed,
                    Some(Ok(_)) => {}
                }
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break ConnectionEnd::Shutdown;
                };
                match &command {
                    PushCommand::Join(room) => {
                        rooms.insert(room.conversation_id.clone());
                    }
                    PushCommand::Leave(room) => {
                        rooms.remove(&room.conversation_id);
                    }
                    _ => {}
                }
                let frame = serde_json::to_string(&command)?;
                sink.send(WsMessage::Text(frame)).await?;
            }
        }
    };

    connected.store(false, Ordering::SeqCst);
    info!(?end, "push channel disconnected");
    Ok(end)
}

pub struct PushClient {
    bus: Arc<EventBus>,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

impl PushClient {
    pub fn spawn(
        config: &PushConfig,
        session: Arc<SessionManager>,
        bus: Arc<EventBus>,
        mut rx: mpsc::UnboundedReceiver<PushCommand>,
    ) -> Self {
        let connected = Arc::new(AtomicBool::new(false));
        let base_url = config.url.clone();
        let task_bus = bus.clone();
        let task_connected = connected.clone();

        let task = tokio::spawn(async move {
            let mut rooms = HashSet::new();
            let mut backoff = RECONNECT_MIN;
            loop {
                let url = match push_url(&base_url, session.access_token().as_deref()) {
                    Ok(url) => url,
                    Err(err) => {
                        warn!("push client stopped: {err}");
                        return;
                    }
                };
                let outcome =
                    run_push_connection(&url, &task_bus, &mut rx, &mut rooms, &task_connected).await;
                task_connected.store(false, Ordering::SeqCst);
                match outcome {
                    Ok(ConnectionEnd::Shutdown) => return,
                    Ok(ConnectionEnd::Closed) => backoff = RECONNECT_MIN,
                    Err(err) => warn!("push connection failed: {err}"),
                }
                if rx.is_closed() {
                    return;
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RECONNECT_MAX);
            }
        });

        Self {
            bus,
            connected,
            task,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn disconnect(self) {
        self.task.abort();
        self.connected.store(false, Ordering::SeqCst);
    }
}
