use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConversationStatus {
    Open,
    Closed,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    Admin,
    Supervisor,
    Operator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_online: bool,
    pub last_conversation_assigned_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokensPayload {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub access_token_expires_in: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub refresh_token_expires_in: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthApiResponse {
    pub user: Option<User>,
    pub tokens: Option<AuthTokensPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_expires_in: Option<String>,
    pub refresh_token_expires_in: Option<String>,
    pub user: Option<User>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: String,
    pub conversation_id: String,
    pub content: Option<String>,
    pub direction: Option<Direction>,
    pub from_me: Option<bool>,
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub has_media: Option<bool>,
    pub media_type: Option<String>,
    pub media_caption: Option<String>,
    pub media_file_name: Option<String>,
    pub media_mime_type: Option<String>,
    pub status: Option<MessageStatus>,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub content: String,
    pub direction: Direction,
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub has_media: bool,
    pub media_type: Option<String>,
    pub media_caption: Option<String>,
    pub media_file_name: Option<String>,
    pub media_mime_type: Option<String>,
    pub status: Option<MessageStatus>,
    pub external_id: Option<String>,
}

impl Message {
    pub fn merge(&mut self, incoming: Message) {
        let Message {
            id: _,
            conversation_id,
            content,
            direction,
            sender_id,
            sender_name,
            created_at,
            has_media,
            media_type,
            media_caption,
            media_file_name,
            media_mime_type,
            status,
            external_id,
        } = incoming;
        self.conversation_id = conversation_id;
        self.content = content;
        self.direction = direction;
        self.created_at = created_at;
        self.has_media = has_media;
        merge_opt(&mut self.sender_id, sender_id);
        merge_opt(&mut self.sender_name, sender_name);
        merge_opt(&mut self.media_type, media_type);
        merge_opt(&mut self.media_caption, media_caption);
        merge_opt(&mut self.media_file_name, media_file_name);
        merge_opt(&mut self.media_mime_type, media_mime_type);
        merge_opt(&mut self.status, status);
        merge_opt(&mut self.external_id, external_id);
    }
}

fn merge_opt<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}

pub fn resolve_direction(direction: Option<Direction>, from_me: Option<bool>) -> Direction {
    match (direction, from_me) {
        (Some(direction), _) => direction,
        (None, Some(true)) => Direction::Outbound,
        _ => Direction::Inbound,
    }
}

pub fn normalize_message(payload: MessagePayload) -> Message {
    Message {
        direction: resolve_direction(payload.direction, payload.from_me),
        created_at: payload.timestamp.unwrap_or(payload.created_at),
        id: payload.id,
        conversation_id: payload.conversation_id,
        content: payload.content.unwrap_or_default(),
        sender_id: payload.sender_id,
        sender_name: payload.sender_name,
        has_media: payload.has_media.unwrap_or(false),
        media_type: payload.media_type,
        media_caption: payload.media_caption,
        media_file_name: payload.media_file_name,
        media_mime_type: payload.media_mime_type,
        status: payload.status,
        external_id: payload.external_id,
    }
}

pub fn message_preview_label(message: &Message) -> String {
    if message.has_media {
        if let Some(caption) = message.media_caption.as_deref() {
            if !caption.trim().is_empty() {
                return caption.to_string();
            }
        }
        return match message.media_type.as_deref() {
            Some("IMAGE") => "[Image received]",
            Some("AUDIO") => "[Audio received]",
            Some("DOCUMENT") => "[Document received]",
            Some("VIDEO") => "[Video received]",
            Some("STICKER") => "[Sticker received]",
            _ => "[File received]",
        }
        .to_string();
    }

    if !message.content.trim().is_empty() {
        return message.content.clone();
    }

    match message.direction {
        Direction::Outbound => "Message sent".to_string(),
        Direction::Inbound => "Message received".to_string(),
    }
}

/// A conversation as the backend sends it. Every field except `id` may be
/// absent; absent fields never overwrite local state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPayload {
    pub id: String,
    pub contact_id: Option<String>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub operator_id: Option<String>,
    pub operator_name: Option<String>,
    pub service_instance_id: Option<String>,
    pub service_instance_name: Option<String>,
    pub status: Option<ConversationStatus>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_preview: Option<String>,
    pub last_customer_message_preview: Option<String>,
    pub last_message_direction: Option<Direction>,
    pub message_count: Option<u32>,
    pub unread_count: Option<u32>,
    pub tabulation_id: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub messages: Option<Vec<MessagePayload>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub contact_id: String,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub operator_id: Option<String>,
    pub operator_name: Option<String>,
    pub service_instance_id: String,
    pub service_instance_name: Option<String>,
    pub status: ConversationStatus,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_preview: Option<String>,
    pub last_customer_message_preview: Option<String>,
    pub last_message_direction: Option<Direction>,
    pub message_count: Option<u32>,
    pub unread_count: u32,
    pub tabulation_id: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Partial message list carried by detailed fetches; `None` means the
    /// conversation was only seen as a list summary.
    pub messages: Option<Vec<Message>>,
}

impl Conversation {
    pub fn from_payload(payload: ConversationPayload) -> Self {
        let mut conversation = Conversation {
            id: payload.id.clone(),
            contact_id: String::new(),
            contact_name: None,
            contact_phone: None,
            operator_id: None,
            operator_name: None,
            service_instance_id: String::new(),
            service_instance_name: None,
            status: ConversationStatus::Open,
            last_message_at: None,
            last_message_preview: None,
            last_customer_message_preview: None,
            last_message_direction: None,
            message_count: None,
            unread_count: 0,
            tabulation_id: None,
            closed_at: None,
            created_at: None,
            updated_at: None,
            messages: None,
        };
        conversation.apply(payload);
        conversation
    }

    /// Merges a payload into this conversation. Fields absent from the
    /// payload keep their local value; summary fields never move backwards.
    pub fn apply(&mut self, payload: ConversationPayload) {
        let ConversationPayload {
            id: _,
            contact_id,
            contact_name,
            contact_phone,
            operator_id,
            operator_name,
            service_instance_id,
            service_instance_name,
            status,
            last_message_at,
            last_message_preview,
            last_customer_message_preview,
            last_message_direction,
            message_count,
            unread_count,
            tabulation_id,
            closed_at,
            created_at,
            updated_at,
            messages,
        } = payload;

        merge_opt(&mut self.contact_name, contact_name);
        merge_opt(&mut self.contact_phone, contact_phone);
        merge_opt(&mut self.operator_id, operator_id);
        merge_opt(&mut self.operator_name, operator_name);
        merge_opt(&mut self.service_instance_name, service_instance_name);
        merge_opt(&mut self.message_count, message_count);
        merge_opt(&mut self.tabulation_id, tabulation_id);
        merge_opt(&mut self.closed_at, closed_at);
        merge_opt(&mut self.created_at, created_at);
        merge_opt(&mut self.updated_at, updated_at);
        if let Some(contact_id) = contact_id {
            self.contact_id = contact_id;
        }
        if let Some(service_instance_id) = service_instance_id {
            self.service_instance_id = service_instance_id;
        }
        if let Some(status) = status {
            self.status = status;
        }
        if let Some(unread) = unread_count {
            self.unread_count = unread;
        }

        let mut messages: Option<Vec<Message>> =
            messages.map(|items| items.into_iter().map(normalize_message).collect());
        if let Some(items) = messages.as_mut() {
            sort_messages(items);
        }

        match messages.as_ref().and_then(|items| items.last()) {
            Some(last) => {
                let preview = message_preview_label(last);
                self.advance_summary(Some(last.created_at), preview, last.direction);
            }
            None => {
                if let Some(preview) = last_message_preview {
                    let direction = last_message_direction
                        .or(self.last_message_direction)
                        .unwrap_or(Direction::Inbound);
                    self.advance_summary(last_message_at, preview, direction);
                } else if let Some(at) = last_message_at {
                    if self.last_message_at.map(|cur| at >= cur).unwrap_or(true) {
                        self.last_message_at = Some(at);
                        merge_opt(&mut self.last_message_direction, last_message_direction);
                    }
                }
            }
        }
        merge_opt(
            &mut self.last_customer_message_preview,
            last_customer_message_preview,
        );

        if messages.is_some() {
            self.messages = messages;
        }
    }

    /// Moves the summary to a newer message. Older data is ignored so that
    /// out-of-order deliveries converge on the same state.
    pub fn advance_summary(
        &mut self,
        at: Option<DateTime<Utc>>,
        preview: String,
        direction: Direction,
    ) -> bool {
        let is_newer = match (at, self.last_message_at) {
            (Some(at), Some(current)) => at >= current,
            (None, Some(_)) => false,
            _ => true,
        };
        if !is_newer {
            return false;
        }
        if at.is_some() {
            self.last_message_at = at;
        }
        if direction == Direction::Inbound {
            self.last_customer_message_preview = Some(preview.clone());
        }
        self.last_message_preview = Some(preview);
        self.last_message_direction = Some(direction);
        true
    }

    pub fn sort_key(&self) -> Option<DateTime<Utc>> {
        self.last_message_at
            .or(self.updated_at)
            .or(self.created_at)
    }
}

pub fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
}

/// Descending by recency; conversations without any timestamp sink.
pub fn sort_conversations(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub meta: Option<PageMeta>,
}

/// List endpoints answer with either a bare array or a paginated envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ListResponse<T> {
    Items(Vec<T>),
    Page(Page<T>),
}

impl<T> ListResponse<T> {
    pub fn into_page(self) -> Page<T> {
        match self {
            ListResponse::Page(page) => page,
            ListResponse::Items(items) => {
                let total = items.len();
                Page {
                    meta: Some(PageMeta {
                        total: total as u64,
                        page: 1,
                        limit: total as u32,
                        total_pages: if total == 0 { 0 } else { 1 },
                    }),
                    data: items,
                }
            }
        }
    }

    pub fn into_items(self) -> Vec<T> {
        match self {
            ListResponse::Page(page) => page.data,
            ListResponse::Items(items) => items,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub cpf: Option<String>,
    pub additional1: Option<String>,
    pub additional2: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional2: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    #[serde(default)]
    pub imported: u64,
    #[serde(default)]
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Processing,
    Paused,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub status: CampaignStatus,
    pub service_instance_id: String,
    pub template_id: Option<String>,
    #[serde(default)]
    pub delay_seconds: u32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_contacts: u64,
    #[serde(default)]
    pub sent_count: u64,
    #[serde(default)]
    pub failed_count: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignInput {
    pub name: String,
    pub service_instance_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    pub delay_seconds: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignUploadResult {
    #[serde(default)]
    pub total_contacts: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    pub body: String,
    pub service_instance_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tabulation {
    pub id: String,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceProvider {
    EvolutionApi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstanceCredentials {
    pub api_token: String,
    pub server_url: String,
    pub instance_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    pub id: String,
    pub name: String,
    pub provider: ServiceProvider,
    pub credentials: Option<ServiceInstanceCredentials>,
    #[serde(default)]
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeResponse {
    pub base64: Option<String>,
    pub pairing_code: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Statistics {
    pub total_conversations: u64,
    pub active_conversations: u64,
    pub closed_conversations: u64,
    pub total_messages: u64,
    pub average_response_time: f64,
    pub response_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorPerformance {
    pub operator_id: String,
    pub operator_name: String,
    #[serde(default)]
    pub total_conversations: u64,
    #[serde(default)]
    pub average_response_time: f64,
    #[serde(default)]
    pub total_messages: u64,
    pub satisfaction: Option<f64>,
}
