use crate::auth::request_refresh;
use crate::config::ApiConfig;
use crate::error::{ConsoleError, Result};
use crate::session::SessionManager;
use crate::types::{ListResponse, LoginResponse, Page};
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

pub fn encode_segment(value: &str) -> String {
    utf8_percent_encode(value, PATH_SEGMENT).to_string()
}

pub fn is_auth_endpoint(path: &str) -> bool {
    path.contains("/auth/login") || path.contains("/auth/refresh")
}

#[derive(Debug, Clone)]
pub struct MultipartField {
    pub name: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Multipart(Vec<MultipartField>),
}

/// A replayable request. `attempt` counts how many times the request has
/// already been answered with 401 and retried.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    pub attempt: u32,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            attempt: 0,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self> {
        self.body = RequestBody::Json(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn multipart(mut self, fields: Vec<MultipartField>) -> Self {
        self.body = RequestBody::Multipart(fields);
        self
    }

    pub fn is_retried(&self) -> bool {
        self.attempt > 0
    }
}

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    waiters: Vec<oneshot::Sender<Result<LoginResponse>>>,
}

enum RefreshFailure {
    Led(ConsoleError),
    Joined(ConsoleError),
}

/// Resets the in-flight flag if the refreshing future is dropped before it
/// settles; dropping the senders wakes every waiter with an error.
struct InFlightGuard<'a> {
    state: &'a Mutex<RefreshState>,
    armed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.in_flight = false;
            state.waiters.clear();
        }
    }
}

pub struct ApiClient {
    base_url: String,
    http: Client,
    refresh_http: Client,
    session: Arc<SessionManager>,
    refresh: Mutex<RefreshState>,
    refresh_margin_ms: i64,
}

impl ApiClient {
    pub fn new(config: &ApiConfig, session: Arc<SessionManager>, refresh_margin_ms: i64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(ConsoleError::from_reqwest)?;
        let refresh_http = Client::builder()
            .timeout(Duration::from_millis(config.refresh_timeout_ms))
            .build()
            .map_err(ConsoleError::from_reqwest)?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            refresh_http,
            session,
            refresh: Mutex::new(RefreshState::default()),
            refresh_margin_ms,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn execute(&self, mut request: ApiRequest) -> Result<Response> {
        let auth_endpoint = is_auth_endpoint(&request.path);

        if !auth_endpoint
            && self.session.refresh_token().is_some()
            && self.session.should_refresh(self.refresh_margin_ms)
        {
            debug!(path = %request.path, "access token near expiry, refreshing first");
            if let Err(RefreshFailure::Led(err) | RefreshFailure::Joined(err)) =
                self.refresh_single_flight().await
            {
                warn!("proactive refresh failed: {err}");
            }
        }

        loop {
            let token = if auth_endpoint {
                None
            } else {
                self.session.access_token()
            };
            let response = self.dispatch(&request, token.as_deref()).await?;
            if response.status() != StatusCode::UNAUTHORIZED || auth_endpoint {
                return ensure_success(response).await;
            }

            let failure = ensure_success(response)
                .await
                .err()
                .unwrap_or(ConsoleError::Unauthorized { message: None });

            if request.is_retried() {
                debug!(path = %request.path, "401 on retried request, giving up");
                return Err(failure);
            }

            if self.session.refresh_token().is_none() {
                info!(path = %request.path, "401 without refresh token, clearing session");
                self.session.clear();
                return Err(failure);
            }

            request.attempt += 1;

            // Another request already rotated the token after this one was sent.
            if let Some(current) = self.session.access_token() {
                if token.as_deref() != Some(current.as_str()) {
                    debug!(path = %request.path, "replaying with rotated token");
                    continue;
                }
            }

            match self.refresh_single_flight().await {
                Ok(_) => {
                    debug!(path = %request.path, "replaying after refresh");
                }
                Err(RefreshFailure::Led(_)) => return Err(failure),
                Err(RefreshFailure::Joined(err)) => return Err(err),
            }
        }
    }

    pub async fn refresh_session(&self) -> Result<LoginResponse> {
        self.refresh_single_flight()
            .await
            .map_err(|(RefreshFailure::Led(err) | RefreshFailure::Joined(err))| err)
    }

    async fn refresh_single_flight(&self) -> std::result::Result<LoginResponse, RefreshFailure> {
        let waiter = {
            let mut state = self.refresh.lock().unwrap_or_else(|e| e.into_inner());
            if state.in_flight {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Some(rx)
            } else {
                state.in_flight = true;
                None
            }
        };

        if let Some(rx) = waiter {
            debug!("refresh in flight, queued");
            return match rx.await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(err)) => Err(RefreshFailure::Joined(err)),
                Err(_) => Err(RefreshFailure::Joined(ConsoleError::Network(
                    "token refresh was abandoned".to_string(),
                ))),
            };
        }

        let mut guard = InFlightGuard {
            state: &self.refresh,
            armed: true,
        };
        let result = self.perform_refresh().await;

        let waiters = {
            let mut state = self.refresh.lock().unwrap_or_else(|e| e.into_inner());
            state.in_flight = false;
            std::mem::take(&mut state.waiters)
        };
        guard.armed = false;

        match result {
            Ok(response) => {
                info!(queued = waiters.len(), "token refreshed");
                for waiter in waiters {
                    let _ = waiter.send(Ok(response.clone()));
                }
                Ok(response)
            }
            Err(err) => {
                warn!(queued = waiters.len(), "token refresh failed: {err}");
                for waiter in waiters {
                    let _ = waiter.send(Err(err.clone()));
                }
                self.session.clear();
                Err(RefreshFailure::Led(err))
            }
        }
    }

    async fn perform_refresh(&self) -> Result<LoginResponse> {
        let refresh_token = self
            .session
            .refresh_token()
            .ok_or(ConsoleError::NoRefreshToken)?;
        let response = request_refresh(&self.refresh_http, &self.base_url, &refresh_token).await?;
        self.session.persist_session(&response)?;
        Ok(response)
    }

    async fn dispatch(&self, request: &ApiRequest, token: Option<&str>) -> Result<Response> {
        let mut builder = self
            .http
            .request(request.method.clone(), self.url(&request.path))
            .header("X-Request-Id", uuid::Uuid::new_v4().to_string());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(fields) => builder.multipart(build_form(fields)?),
        };

        let response = builder.send().await.map_err(ConsoleError::from_reqwest)?;
        debug!(
            method = %request.method,
            path = %request.path,
            attempt = request.attempt,
            status = response.status().as_u16(),
            "api response"
        );
        Ok(response)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = self.execute(request).await?;
        response.json::<T>().await.map_err(ConsoleError::from_reqwest)
    }

    pub async fn get_list<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<Page<T>> {
        let list: ListResponse<T> = self.get_json(request).await?;
        Ok(list.into_page())
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        self.get_json(request).await
    }

    pub async fn send_empty(&self, request: ApiRequest) -> Result<()> {
        self.execute(request).await.map(|_| ())
    }

    pub async fn get_bytes(&self, request: ApiRequest) -> Result<Bytes> {
        let response = self.execute(request).await?;
        response.bytes().await.map_err(ConsoleError::from_reqwest)
    }
}

fn build_form(fields: &[MultipartField]) -> Result<reqwest::multipart::Form> {
    let mut form = reqwest::multipart::Form::new();
    for field in fields {
        let mut part = reqwest::multipart::Part::bytes(field.data.to_vec());
        if let Some(file_name) = &field.file_name {
            part = part.file_name(file_name.clone());
        }
        if let Some(mime) = &field.mime_type {
            part = part
                .mime_str(mime)
                .map_err(|err| ConsoleError::Validation(format!("invalid mime type {mime}: {err}")))?;
        }
        form = form.part(field.name.clone(), part);
    }
    Ok(form)
}

pub async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let parsed = serde_json::from_str::<serde_json::Value>(&body).ok();
    Err(ConsoleError::from_status(status, parsed.as_ref()))
}
