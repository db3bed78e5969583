use super::paged;
use crate::error::Result;
use crate::http::{encode_segment, ApiClient, ApiRequest, MultipartField};
use crate::types::{Contact, ContactInput, ImportResult, Page};
use bytes::Bytes;

fn contact_path(id: &str) -> String {
    format!("/contacts/{}", encode_segment(id))
}

pub async fn list(api: &ApiClient, page: u32, limit: u32) -> Result<Page<Contact>> {
    api.get_list(paged(ApiRequest::get("/contacts"), page, limit))
        .await
}

pub async fn create(api: &ApiClient, input: &ContactInput) -> Result<Contact> {
    api.send_json(ApiRequest::post("/contacts").json(input)?).await
}

pub async fn update(api: &ApiClient, id: &str, input: &ContactInput) -> Result<Contact> {
    api.send_json(ApiRequest::patch(contact_path(id)).json(input)?)
        .await
}

pub async fn delete(api: &ApiClient, id: &str) -> Result<()> {
    api.send_empty(ApiRequest::delete(contact_path(id))).await
}

pub async fn import_csv(api: &ApiClient, file_name: &str, csv: Bytes) -> Result<ImportResult> {
    let field = MultipartField {
        name: "file".to_string(),
        file_name: Some(file_name.to_string()),
        mime_type: Some("text/csv".to_string()),
        data: csv,
    };
    api.send_json(ApiRequest::post("/contacts/import/csv").multipart(vec![field]))
        .await
}
