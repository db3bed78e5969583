use super::paged;
use crate::error::Result;
use crate::http::{encode_segment, ApiClient, ApiRequest};
use crate::types::{ConversationPayload, Page};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversation {
    pub contact_id: String,
    pub service_instance_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConversation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tabulation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<crate::types::ConversationStatus>,
}

fn conversation_path(id: &str) -> String {
    format!("/conversations/{}", encode_segment(id))
}

pub async fn list(api: &ApiClient, page: u32, limit: u32) -> Result<Page<ConversationPayload>> {
    api.get_list(paged(ApiRequest::get("/conversations"), page, limit))
        .await
}

pub async fn get(api: &ApiClient, id: &str) -> Result<ConversationPayload> {
    api.get_json(ApiRequest::get(conversation_path(id))).await
}

pub async fn create(api: &ApiClient, input: &CreateConversation) -> Result<ConversationPayload> {
    api.send_json(ApiRequest::post("/conversations").json(input)?)
        .await
}

pub async fn assign_operator(
    api: &ApiClient,
    id: &str,
    operator_id: &str,
) -> Result<ConversationPayload> {
    let body = serde_json::json!({ "operatorId": operator_id });
    api.send_json(ApiRequest::patch(format!("{}/assign", conversation_path(id))).json(&body)?)
        .await
}

pub async fn close(api: &ApiClient, id: &str, tabulation_id: &str) -> Result<()> {
    let body = serde_json::json!({ "tabulationId": tabulation_id });
    api.send_empty(ApiRequest::post(format!("{}/close", conversation_path(id))).json(&body)?)
        .await
}

pub async fn queue(api: &ApiClient) -> Result<Vec<ConversationPayload>> {
    Ok(api
        .get_list(ApiRequest::get("/conversations/queue"))
        .await?
        .data)
}

pub async fn update(
    api: &ApiClient,
    id: &str,
    input: &UpdateConversation,
) -> Result<ConversationPayload> {
    api.send_json(ApiRequest::patch(conversation_path(id)).json(input)?)
        .await
}

pub async fn delete(api: &ApiClient, id: &str) -> Result<()> {
    api.send_empty(ApiRequest::delete(conversation_path(id))).await
}
