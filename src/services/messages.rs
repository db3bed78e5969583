use super::paged;
use crate::error::Result;
use crate::http::{encode_segment, ApiClient, ApiRequest};
use crate::types::{normalize_message, Message, MessagePayload};
use bytes::Bytes;
use serde::Serialize;

pub const DEFAULT_VIA: &str = "whatsapp";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: String,
    pub content: String,
    pub via: String,
}

impl SendMessageRequest {
    pub fn new(conversation_id: &str, content: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            via: DEFAULT_VIA.to_string(),
        }
    }
}

pub async fn send(api: &ApiClient, conversation_id: &str, content: &str) -> Result<Message> {
    let request = SendMessageRequest::new(conversation_id, content);
    let payload: MessagePayload = api
        .send_json(ApiRequest::post("/messages/send").json(&request)?)
        .await?;
    Ok(normalize_message(payload))
}

/// Messages of a conversation, normalized and in the order the server sent them.
pub async fn list_for_conversation(
    api: &ApiClient,
    conversation_id: &str,
    page: u32,
    limit: u32,
) -> Result<Vec<Message>> {
    let path = format!("/messages/conversation/{}", encode_segment(conversation_id));
    let page = api
        .get_list::<MessagePayload>(paged(ApiRequest::get(path), page, limit))
        .await?;
    Ok(page.data.into_iter().map(normalize_message).collect())
}

pub async fn media(api: &ApiClient, message_id: &str) -> Result<Bytes> {
    let path = format!("/messages/{}/media", encode_segment(message_id));
    api.get_bytes(ApiRequest::get(path)).await
}
