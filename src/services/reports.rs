use crate::error::Result;
use crate::http::{ApiClient, ApiRequest};
use crate::types::{ConversationPayload, OperatorPerformance, Page, Statistics};
use bytes::Bytes;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportFilters {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub operator_id: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ReportFilters {
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = Vec::new();
        let text = [
            ("startDate", &self.start_date),
            ("endDate", &self.end_date),
            ("operatorId", &self.operator_id),
        ];
        for (key, value) in text {
            if let Some(value) = value {
                query.push((key.to_string(), value.clone()));
            }
        }
        if let Some(page) = self.page {
            query.push(("page".to_string(), page.to_string()));
        }
        if let Some(limit) = self.limit {
            query.push(("limit".to_string(), limit.to_string()));
        }
        query
    }

    fn apply(&self, mut request: ApiRequest) -> ApiRequest {
        request.query.extend(self.to_query());
        request
    }
}

pub async fn statistics(api: &ApiClient, filters: &ReportFilters) -> Result<Statistics> {
    api.get_json(filters.apply(ApiRequest::get("/reports/statistics")))
        .await
}

pub async fn operator_performance(
    api: &ApiClient,
    filters: &ReportFilters,
) -> Result<Vec<OperatorPerformance>> {
    Ok(api
        .get_list(filters.apply(ApiRequest::get("/reports/operator-performance")))
        .await?
        .data)
}

pub async fn finished_conversations(
    api: &ApiClient,
    filters: &ReportFilters,
) -> Result<Page<ConversationPayload>> {
    api.get_list(filters.apply(ApiRequest::get("/reports/finished-conversations")))
        .await
}

/// Raw CSV export of one report. `report` is the report path segment, such
/// as `statistics` or `finished-conversations`.
pub async fn export(api: &ApiClient, report: &str, filters: &ReportFilters) -> Result<Bytes> {
    let path = format!("/reports/{report}/export");
    api.get_bytes(filters.apply(ApiRequest::get(path))).await
}
