use super::paged;
use crate::error::Result;
use crate::http::{encode_segment, ApiClient, ApiRequest, MultipartField};
use crate::types::{Campaign, CampaignInput, CampaignUploadResult, Page};
use bytes::Bytes;

fn campaign_path(id: &str) -> String {
    format!("/campaigns/{}", encode_segment(id))
}

pub async fn list(api: &ApiClient, page: u32, limit: u32) -> Result<Page<Campaign>> {
    api.get_list(paged(ApiRequest::get("/campaigns"), page, limit))
        .await
}

pub async fn get(api: &ApiClient, id: &str) -> Result<Campaign> {
    api.get_json(ApiRequest::get(campaign_path(id))).await
}

pub async fn create(api: &ApiClient, input: &CampaignInput) -> Result<Campaign> {
    api.send_json(ApiRequest::post("/campaigns").json(input)?).await
}

pub async fn upload_contacts(
    api: &ApiClient,
    id: &str,
    file_name: &str,
    csv: Bytes,
) -> Result<CampaignUploadResult> {
    let field = MultipartField {
        name: "file".to_string(),
        file_name: Some(file_name.to_string()),
        mime_type: Some("text/csv".to_string()),
        data: csv,
    };
    let path = format!("{}/upload", campaign_path(id));
    api.send_json(ApiRequest::post(path).multipart(vec![field]))
        .await
}

async fn transition(api: &ApiClient, id: &str, action: &str) -> Result<Campaign> {
    let path = format!("{}/{action}", campaign_path(id));
    api.send_json(ApiRequest::post(path)).await
}

pub async fn start(api: &ApiClient, id: &str) -> Result<Campaign> {
    transition(api, id, "start").await
}

pub async fn pause(api: &ApiClient, id: &str) -> Result<Campaign> {
    transition(api, id, "pause").await
}

pub async fn resume(api: &ApiClient, id: &str) -> Result<Campaign> {
    transition(api, id, "resume").await
}

pub async fn delete(api: &ApiClient, id: &str) -> Result<()> {
    api.send_empty(ApiRequest::delete(campaign_path(id))).await
}
