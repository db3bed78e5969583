use super::paged;
use crate::error::Result;
use crate::http::{encode_segment, ApiClient, ApiRequest};
use crate::types::{Page, Tabulation};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct TabulationInput {
    pub name: String,
}

fn tabulation_path(id: &str) -> String {
    format!("/tabulations/{}", encode_segment(id))
}

pub async fn list(api: &ApiClient, page: u32, limit: u32) -> Result<Page<Tabulation>> {
    api.get_list(paged(ApiRequest::get("/tabulations"), page, limit))
        .await
}

pub async fn get(api: &ApiClient, id: &str) -> Result<Tabulation> {
    api.get_json(ApiRequest::get(tabulation_path(id))).await
}

pub async fn create(api: &ApiClient, input: &TabulationInput) -> Result<Tabulation> {
    api.send_json(ApiRequest::post("/tabulations").json(input)?)
        .await
}

pub async fn update(api: &ApiClient, id: &str, input: &TabulationInput) -> Result<Tabulation> {
    api.send_json(ApiRequest::patch(tabulation_path(id)).json(input)?)
        .await
}

pub async fn delete(api: &ApiClient, id: &str) -> Result<()> {
    api.send_empty(ApiRequest::delete(tabulation_path(id))).await
}
