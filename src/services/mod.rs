//! Thin REST wrappers over [`ApiClient`](crate::http::ApiClient). Every call
//! goes through the authenticated client, so bearer handling and refresh are
//! shared. List calls accept both the bare-array and the paginated shape.

pub mod campaigns;
pub mod contacts;
pub mod conversations;
pub mod dashboard;
pub mod messages;
pub mod reports;
pub mod service_instances;
pub mod tabulations;
pub mod templates;
pub mod users;

use crate::http::ApiRequest;

pub(crate) fn paged(request: ApiRequest, page: u32, limit: u32) -> ApiRequest {
    request.query("page", page).query("limit", limit)
}
