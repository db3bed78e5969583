use crate::error::Result;
use crate::http::{encode_segment, ApiClient, ApiRequest};
use crate::types::{QrCodeResponse, ServiceInstance, ServiceInstanceCredentials, ServiceProvider};
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstanceInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ServiceProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<ServiceInstanceCredentials>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

fn instance_path(id: &str) -> String {
    format!("/service-instances/{}", encode_segment(id))
}

pub async fn list(api: &ApiClient) -> Result<Vec<ServiceInstance>> {
    Ok(api
        .get_list(ApiRequest::get("/service-instances"))
        .await?
        .data)
}

pub async fn get(api: &ApiClient, id: &str) -> Result<ServiceInstance> {
    api.get_json(ApiRequest::get(instance_path(id))).await
}

pub async fn create(api: &ApiClient, input: &ServiceInstanceInput) -> Result<ServiceInstance> {
    api.send_json(ApiRequest::post("/service-instances").json(input)?)
        .await
}

pub async fn update(
    api: &ApiClient,
    id: &str,
    input: &ServiceInstanceInput,
) -> Result<ServiceInstance> {
    api.send_json(ApiRequest::patch(instance_path(id)).json(input)?)
        .await
}

pub async fn delete(api: &ApiClient, id: &str) -> Result<()> {
    api.send_empty(ApiRequest::delete(instance_path(id))).await
}

pub async fn qr_code(api: &ApiClient, id: &str) -> Result<QrCodeResponse> {
    api.get_json(ApiRequest::get(format!("{}/qrcode", instance_path(id))))
        .await
}
