use crate::error::Result;
use crate::http::ApiClient;
use crate::push::{PushCommand, PushCommands, PushEvent, TypingPayload};
use crate::services::{conversations, messages};
use crate::types::{
    message_preview_label, normalize_message, sort_conversations, sort_messages, Conversation,
    ConversationPayload, Direction, Message, MessagePayload,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageOutcome {
    pub is_new: bool,
    pub conversation_known: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub previous: Option<String>,
    pub ticket: u64,
}

fn upsert_message(list: &mut Vec<Message>, message: Message) -> bool {
    match list.iter_mut().find(|m| m.id == message.id) {
        Some(existing) => {
            existing.merge(message);
            false
        }
        None => {
            list.push(message);
            true
        }
    }
}

fn merge_message_lists(
    current: Option<Vec<Message>>,
    incoming: Option<Vec<Message>>,
) -> Option<Vec<Message>> {
    match (current, incoming) {
        (Some(mut current), Some(incoming)) => {
            for message in incoming {
                upsert_message(&mut current, message);
            }
            sort_messages(&mut current);
            Some(current)
        }
        (current, incoming) => current.or(incoming),
    }
}

/// Synchronous conversation state: the conversation list (most recent
/// first), the active conversation and its ascending message timeline.
/// Every mutation is keyed by entity id, so replays and out-of-order
/// deliveries converge.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    active_id: Option<String>,
    messages: Vec<Message>,
    selection: u64,
    counted: HashMap<String, HashSet<String>>,
    detailed: HashSet<String>,
    online_users: HashSet<String>,
    typing: HashMap<String, HashSet<String>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active_id.as_deref().and_then(|id| self.conversation(id))
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active_id.as_deref() == Some(id)
    }

    /// True while `ticket` is still the latest selection and it targets `id`.
    pub fn is_current(&self, id: &str, ticket: u64) -> bool {
        self.is_active(id) && self.selection == ticket
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn online_users(&self) -> &HashSet<String> {
        &self.online_users
    }

    pub fn typing_users(&self, conversation_id: &str) -> Vec<String> {
        let mut users: Vec<String> = self
            .typing
            .get(conversation_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        users.sort();
        users
    }

    pub fn is_detailed(&self, id: &str) -> bool {
        self.detailed.contains(id)
    }

    pub fn mark_detailed(&mut self, id: &str) {
        self.detailed.insert(id.to_string());
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.conversations.iter().position(|c| c.id == id)
    }

    fn remember(&mut self, conversation_id: &str, message_ids: impl IntoIterator<Item = String>) {
        self.counted
            .entry(conversation_id.to_string())
            .or_default()
            .extend(message_ids);
    }

    pub fn replace_all(&mut self, payloads: Vec<ConversationPayload>) {
        let mut conversations = Vec::with_capacity(payloads.len());
        for payload in payloads {
            if let Some(items) = payload.messages.as_ref() {
                let ids: Vec<String> = items.iter().map(|m| m.id.clone()).collect();
                self.remember(&payload.id, ids);
            }
            let mut conversation = Conversation::from_payload(payload);
            if self.is_active(&conversation.id) {
                conversation.unread_count = 0;
            }
            conversations.push(conversation);
        }
        sort_conversations(&mut conversations);
        self.conversations = conversations;
        debug!(count = self.conversations.len(), "conversation list replaced");
    }

    /// Merges a conversation into the collection. Existing entries keep their
    /// local unread count and any messages already buffered for them.
    /// Returns true when the conversation was new.
    pub fn upsert_conversation(&mut self, mut payload: ConversationPayload) -> bool {
        let id = payload.id.clone();
        if let Some(items) = payload.messages.as_ref() {
            let ids: Vec<String> = items.iter().map(|m| m.id.clone()).collect();
            self.remember(&id, ids);
        }

        let inserted = match self.position(&id) {
            Some(idx) => {
                payload.unread_count = None;
                let conversation = &mut self.conversations[idx];
                let buffered = conversation.messages.take();
                conversation.apply(payload);
                let incoming = conversation.messages.take();
                conversation.messages = merge_message_lists(buffered, incoming);
                false
            }
            None => {
                self.conversations.push(Conversation::from_payload(payload));
                true
            }
        };

        if self.is_active(&id) {
            if let Some(idx) = self.position(&id) {
                self.conversations[idx].unread_count = 0;
            }
        }
        sort_conversations(&mut self.conversations);
        inserted
    }

    pub fn apply_conversation_update(&mut self, payload: ConversationPayload) -> bool {
        let id = payload.id.clone();
        let carried: Option<Vec<Message>> = payload
            .messages
            .as_ref()
            .map(|items| items.iter().cloned().map(normalize_message).collect());
        let inserted = self.upsert_conversation(payload);
        if let Some(carried) = carried {
            if self.is_active(&id) {
                self.merge_messages(&id, carried);
            }
        }
        inserted
    }

    /// Applies one message. Repeated ids update in place and never count
    /// twice toward unread.
    pub fn add_message(&mut self, message: Message) -> MessageOutcome {
        let conversation_id = message.conversation_id.clone();
        let is_new = self
            .counted
            .entry(conversation_id.clone())
            .or_default()
            .insert(message.id.clone());
        let is_active = self.is_active(&conversation_id);

        if is_active {
            upsert_message(&mut self.messages, message.clone());
            sort_messages(&mut self.messages);
        }

        let conversation_known = match self.position(&conversation_id) {
            Some(idx) => {
                let conversation = &mut self.conversations[idx];
                if let Some(cache) = conversation.messages.as_mut() {
                    upsert_message(cache, message.clone());
                    sort_messages(cache);
                }
                conversation.advance_summary(
                    Some(message.created_at),
                    message_preview_label(&message),
                    message.direction,
                );
                if is_active {
                    conversation.unread_count = 0;
                } else if is_new && message.direction == Direction::Inbound {
                    conversation.unread_count += 1;
                }
                sort_conversations(&mut self.conversations);
                true
            }
            None => false,
        };

        if !is_new {
            debug!(message_id = %message.id, "duplicate message applied in place");
        }
        MessageOutcome {
            is_new,
            conversation_known,
        }
    }

    /// Merges fetched messages into a conversation. Fetches never count
    /// toward unread. Returns how many timeline entries were inserted.
    pub fn merge_messages(&mut self, conversation_id: &str, incoming: Vec<Message>) -> usize {
        if incoming.is_empty() {
            return 0;
        }
        self.remember(conversation_id, incoming.iter().map(|m| m.id.clone()));
        let latest = incoming.iter().max_by_key(|m| m.created_at).cloned();
        let is_active = self.is_active(conversation_id);

        let mut inserted = 0;
        if is_active {
            for message in incoming.iter().cloned() {
                if upsert_message(&mut self.messages, message) {
                    inserted += 1;
                }
            }
            sort_messages(&mut self.messages);
        }

        if let Some(idx) = self.position(conversation_id) {
            let conversation = &mut self.conversations[idx];
            let cache = conversation.messages.take();
            conversation.messages = merge_message_lists(cache, Some(incoming));
            if let Some(latest) = latest {
                conversation.advance_summary(
                    Some(latest.created_at),
                    message_preview_label(&latest),
                    latest.direction,
                );
            }
            if is_active {
                conversation.unread_count = 0;
            }
            sort_conversations(&mut self.conversations);
        }
        inserted
    }

    pub fn set_messages(&mut self, mut messages: Vec<Message>) {
        sort_messages(&mut messages);
        let owner = messages.last().cloned();
        self.messages = messages;
        if let Some(last) = owner {
            let ids: Vec<String> = self.messages.iter().map(|m| m.id.clone()).collect();
            self.remember(&last.conversation_id, ids);
            if let Some(idx) = self.position(&last.conversation_id) {
                let conversation = &mut self.conversations[idx];
                conversation.advance_summary(
                    Some(last.created_at),
                    message_preview_label(&last),
                    last.direction,
                );
                conversation.unread_count = 0;
                sort_conversations(&mut self.conversations);
            }
        }
    }

    /// Makes `id` the active conversation. Switching clears the timeline;
    /// re-selecting the same id keeps whatever is buffered. An empty
    /// timeline is seeded from the conversation's cached messages.
    pub fn activate(&mut self, id: &str) -> Activation {
        let previous = self.active_id.replace(id.to_string());
        if previous.as_deref() != Some(id) {
            self.messages.clear();
        }
        if self.messages.is_empty() {
            if let Some(cached) = self.conversation(id).and_then(|c| c.messages.clone()) {
                self.messages = cached;
                sort_messages(&mut self.messages);
            }
        }
        self.clear_unread(id);
        self.selection += 1;
        Activation {
            previous,
            ticket: self.selection,
        }
    }

    pub fn deactivate(&mut self) -> Option<String> {
        self.selection += 1;
        self.messages.clear();
        self.active_id.take()
    }

    pub fn clear_unread(&mut self, id: &str) {
        if let Some(idx) = self.position(id) {
            self.conversations[idx].unread_count = 0;
        }
    }

    pub fn remove_conversation(&mut self, id: &str) -> bool {
        self.conversations.retain(|c| c.id != id);
        self.counted.remove(id);
        self.detailed.remove(id);
        self.typing.remove(id);
        if self.is_active(id) {
            self.deactivate();
            true
        } else {
            false
        }
    }

    pub fn set_online(&mut self, user_id: &str, online: bool) {
        if online {
            self.online_users.insert(user_id.to_string());
        } else {
            self.online_users.remove(user_id);
        }
    }

    pub fn set_typing(&mut self, payload: &TypingPayload) {
        let who = payload
            .user_id
            .clone()
            .or_else(|| payload.user_name.clone())
            .unwrap_or_else(|| "unknown".to_string());
        if payload.is_typing {
            self.typing
                .entry(payload.conversation_id.clone())
                .or_default()
                .insert(who);
        } else if let Some(users) = self.typing.get_mut(&payload.conversation_id) {
            users.remove(&who);
            if users.is_empty() {
                self.typing.remove(&payload.conversation_id);
            }
        }
    }
}

pub struct Reconciler {
    api: Arc<ApiClient>,
    store: Mutex<ConversationStore>,
    push: Option<PushCommands>,
    page_size: u32,
    message_page_size: u32,
}

impl Reconciler {
    pub fn new(
        api: Arc<ApiClient>,
        push: Option<PushCommands>,
        page_size: u32,
        message_page_size: u32,
    ) -> Self {
        Self {
            api,
            store: Mutex::new(ConversationStore::new()),
            push,
            page_size,
            message_page_size,
        }
    }

    pub fn store(&self) -> MutexGuard<'_, ConversationStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.store().conversations().to_vec()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.store().messages().to_vec()
    }

    pub fn active_conversation(&self) -> Option<Conversation> {
        self.store().active_conversation().cloned()
    }

    fn send_push(&self, command: PushCommand) {
        if let Some(push) = &self.push {
            if let Err(err) = push.send(command) {
                debug!("push command not sent: {err}");
            }
        }
    }

    pub async fn load_conversations(&self) -> Result<Vec<Conversation>> {
        let page = conversations::list(&self.api, 1, self.page_size).await?;
        let mut store = self.store();
        store.replace_all(page.data);
        info!(count = store.conversations().len(), "conversations loaded");
        Ok(store.conversations().to_vec())
    }

    /// Opens a conversation. Returns `None` when a later selection superseded
    /// this one before its responses arrived.
    pub async fn select_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let (activation, needs_detail) = {
            let mut store = self.store();
            let activation = store.activate(id);
            (activation, !store.is_detailed(id))
        };
        let ticket = activation.ticket;

        if activation.previous.as_deref() != Some(id) {
            if let Some(previous) = activation.previous.as_deref() {
                self.send_push(PushCommand::leave(previous));
            }
            self.send_push(PushCommand::join(id));
        }

        if needs_detail {
            let fetched = conversations::get(&self.api, id).await;
            let mut store = self.store();
            if !store.is_current(id, ticket) {
                debug!(conversation_id = id, "discarding stale conversation response");
                return Ok(None);
            }
            match fetched {
                Ok(payload) => {
                    store.apply_conversation_update(payload);
                    store.mark_detailed(id);
                }
                Err(err) => {
                    drop(store);
                    self.abandon_selection(id);
                    return Err(err);
                }
            }
        }

        if self.store().messages().is_empty() {
            let fetched =
                messages::list_for_conversation(&self.api, id, 1, self.message_page_size).await;
            let mut store = self.store();
            if !store.is_current(id, ticket) {
                debug!(conversation_id = id, "discarding stale message response");
                return Ok(None);
            }
            match fetched {
                Ok(list) => {
                    store.merge_messages(id, list);
                }
                Err(err) => {
                    drop(store);
                    self.abandon_selection(id);
                    return Err(err);
                }
            }
        }

        let mut store = self.store();
        if !store.is_current(id, ticket) {
            return Ok(None);
        }
        store.clear_unread(id);
        Ok(store.active_conversation().cloned())
    }

    fn abandon_selection(&self, id: &str) {
        let abandoned = {
            let mut store = self.store();
            store.is_active(id) && store.deactivate().is_some()
        };
        if abandoned {
            warn!(conversation_id = id, "selection failed, active conversation cleared");
            self.send_push(PushCommand::leave(id));
        }
    }

    pub fn add_message(&self, message: Message) -> MessageOutcome {
        self.store().add_message(message)
    }

    pub fn add_conversation(&self, payload: ConversationPayload) -> bool {
        self.store().upsert_conversation(payload)
    }

    /// Applies a pushed message, first materializing its conversation from
    /// the server when it is not known locally.
    pub async fn receive_message(&self, payload: MessagePayload) -> Result<MessageOutcome> {
        let message = normalize_message(payload);
        let conversation_id = message.conversation_id.clone();
        if !self.store().contains(&conversation_id) {
            debug!(conversation_id = %conversation_id, "message for unknown conversation, fetching");
            match conversations::get(&self.api, &conversation_id).await {
                Ok(conversation) => {
                    let mut store = self.store();
                    store.upsert_conversation(conversation);
                    store.mark_detailed(&conversation_id);
                }
                Err(err) => {
                    warn!(conversation_id = %conversation_id, "could not materialize conversation: {err}");
                    self.store().add_message(message);
                    return Err(err);
                }
            }
        }
        Ok(self.store().add_message(message))
    }

    /// Closes a conversation on the server, then drops it locally. A failed
    /// close leaves local state untouched.
    pub async fn close_conversation(&self, id: &str, tabulation_id: &str) -> Result<()> {
        conversations::close(&self.api, id, tabulation_id).await?;
        let was_active = self.store().remove_conversation(id);
        if was_active {
            self.send_push(PushCommand::leave(id));
        }
        info!(conversation_id = id, "conversation closed");
        Ok(())
    }

    pub async fn send_message(&self, conversation_id: &str, content: &str) -> Result<Message> {
        let message = messages::send(&self.api, conversation_id, content).await?;
        self.store().add_message(message.clone());
        Ok(message)
    }

    pub fn start_typing(&self, conversation_id: &str) {
        self.send_push(PushCommand::typing_start(conversation_id));
    }

    pub fn stop_typing(&self, conversation_id: &str) {
        self.send_push(PushCommand::typing_stop(conversation_id));
    }

    pub async fn handle_push_event(&self, event: PushEvent) -> Result<()> {
        match event {
            PushEvent::MessageNew(payload) => {
                self.receive_message(payload).await?;
            }
            PushEvent::ConversationUpdated(payload) => {
                self.store().apply_conversation_update(payload);
            }
            PushEvent::ConversationNew(payload) => {
                self.store().upsert_conversation(payload);
            }
            PushEvent::ConversationClosed(payload) => {
                let id = payload.conversation_id().to_string();
                if self.store().remove_conversation(&id) {
                    self.send_push(PushCommand::leave(&id));
                }
            }
            PushEvent::Typing(payload) => self.store().set_typing(&payload),
            PushEvent::UserOnline(payload) => self.store().set_online(&payload.user_id, true),
            PushEvent::UserOffline(payload) => self.store().set_online(&payload.user_id, false),
        }
        Ok(())
    }

    /// Consumes push events until the stream closes. A lagging receiver
    /// resynchronizes by reloading the conversation list.
    pub async fn run_push_loop(self: Arc<Self>, mut events: broadcast::Receiver<PushEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let kind = event.kind();
                    if let Err(err) = self.handle_push_event(event).await {
                        warn!(event = kind.name(), "push event handling failed: {err}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "push events dropped, reloading conversations");
                    if let Err(err) = self.load_conversations().await {
                        warn!("resync after lag failed: {err}");
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("push loop finished");
    }
}
