use super::paged;
use crate::error::Result;
use crate::http::{encode_segment, ApiClient, ApiRequest};
use crate::types::{Page, Template};
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_instance_id: Option<String>,
}

fn template_path(id: &str) -> String {
    format!("/templates/{}", encode_segment(id))
}

pub async fn list(api: &ApiClient, page: u32, limit: u32) -> Result<Page<Template>> {
    api.get_list(paged(ApiRequest::get("/templates"), page, limit))
        .await
}

pub async fn get(api: &ApiClient, id: &str) -> Result<Template> {
    api.get_json(ApiRequest::get(template_path(id))).await
}

pub async fn create(api: &ApiClient, input: &TemplateInput) -> Result<Template> {
    api.send_json(ApiRequest::post("/templates").json(input)?).await
}

pub async fn update(api: &ApiClient, id: &str, input: &TemplateInput) -> Result<Template> {
    api.send_json(ApiRequest::patch(template_path(id)).json(input)?)
        .await
}

pub async fn delete(api: &ApiClient, id: &str) -> Result<()> {
    api.send_empty(ApiRequest::delete(template_path(id))).await
}
