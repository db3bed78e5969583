use super::paged;
use crate::error::Result;
use crate::http::{encode_segment, ApiClient, ApiRequest};
use crate::types::{Page, User, UserRole};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: UserRole,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

fn user_path(id: &str) -> String {
    format!("/users/{}", encode_segment(id))
}

pub async fn list(api: &ApiClient, page: u32, limit: u32) -> Result<Page<User>> {
    api.get_list(paged(ApiRequest::get("/users"), page, limit)).await
}

pub async fn get(api: &ApiClient, id: &str) -> Result<User> {
    api.get_json(ApiRequest::get(user_path(id))).await
}

pub async fn create(api: &ApiClient, input: &CreateUser) -> Result<User> {
    api.send_json(ApiRequest::post("/users").json(input)?).await
}

pub async fn update(api: &ApiClient, id: &str, input: &UpdateUser) -> Result<User> {
    api.send_json(ApiRequest::patch(user_path(id)).json(input)?)
        .await
}

pub async fn delete(api: &ApiClient, id: &str) -> Result<()> {
    api.send_empty(ApiRequest::delete(user_path(id))).await
}

pub async fn set_online(api: &ApiClient, is_online: bool) -> Result<User> {
    let body = serde_json::json!({ "isOnline": is_online });
    api.send_json(ApiRequest::patch("/users/me/online").json(&body)?)
        .await
}

pub async fn online_operators(api: &ApiClient) -> Result<Vec<User>> {
    Ok(api
        .get_list(ApiRequest::get("/users/online"))
        .await?
        .data)
}
