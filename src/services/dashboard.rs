use crate::error::Result;
use crate::http::{ApiClient, ApiRequest};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardStats {
    pub active_conversations: u64,
    pub total_messages: u64,
    pub response_rate: f64,
    pub average_response_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentConversation {
    pub id: String,
    #[serde(default)]
    pub contact_name: String,
    #[serde(default)]
    pub contact_phone: String,
    pub operator_name: Option<String>,
    #[serde(default)]
    pub last_message: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyPerformance {
    pub date: NaiveDate,
    #[serde(default)]
    pub response_rate: f64,
    #[serde(default)]
    pub average_response_time: f64,
    #[serde(default)]
    pub closed_conversations: u64,
}

pub async fn stats(api: &ApiClient) -> Result<DashboardStats> {
    api.get_json(ApiRequest::get("/dashboard/stats")).await
}

pub async fn recent_conversations(api: &ApiClient) -> Result<Vec<RecentConversation>> {
    Ok(api
        .get_list(ApiRequest::get("/dashboard/recent-conversations"))
        .await?
        .data)
}

pub async fn weekly_performance(api: &ApiClient) -> Result<Vec<WeeklyPerformance>> {
    Ok(api
        .get_list(ApiRequest::get("/dashboard/weekly-performance"))
        .await?
        .data)
}
