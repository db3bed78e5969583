use crate::config::ApiConfig;
use crate::error::{ConsoleError, Result};
use crate::http::{ensure_success, ApiClient, ApiRequest};
use crate::session::Subscription;
use crate::storage::KeyValueStore;
use crate::types::{AuthApiResponse, LoginRequest, LoginResponse, RefreshTokenRequest, User};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const USER_KEY: &str = "console.user";

/// Flattens a login/refresh body. Both tokens are required.
pub fn map_auth_response(payload: AuthApiResponse) -> Result<LoginResponse> {
    let tokens = payload.tokens.ok_or_else(ConsoleError::invalid_auth_response)?;
    let access_token = tokens
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(ConsoleError::invalid_auth_response)?;
    let refresh_token = tokens
        .refresh_token
        .filter(|t| !t.is_empty())
        .ok_or_else(ConsoleError::invalid_auth_response)?;

    Ok(LoginResponse {
        access_token,
        refresh_token,
        access_token_expires_in: tokens.access_token_expires_in,
        refresh_token_expires_in: tokens.refresh_token_expires_in,
        user: payload.user,
    })
}

async fn post_auth<B: serde::Serialize>(
    client: &Client,
    base_url: &str,
    path: &str,
    body: &B,
) -> Result<LoginResponse> {
    let url = format!("{}{}", base_url.trim_end_matches('/'), path);
    let response = client
        .post(&url)
        .json(body)
        .send()
        .await
        .map_err(ConsoleError::from_reqwest)?;
    let response = ensure_success(response).await?;
    let payload: AuthApiResponse = response.json().await.map_err(ConsoleError::from_reqwest)?;
    map_auth_response(payload)
}

pub async fn request_refresh(
    client: &Client,
    base_url: &str,
    refresh_token: &str,
) -> Result<LoginResponse> {
    debug!("requesting token refresh");
    post_auth(
        client,
        base_url,
        "/auth/refresh",
        &RefreshTokenRequest {
            refresh_token: refresh_token.to_string(),
        },
    )
    .await
}

pub struct AuthService {
    api: Arc<ApiClient>,
    auth_http: Client,
    durable: Arc<dyn KeyValueStore>,
    session_watch: Option<Subscription>,
}

impl AuthService {
    pub fn new(config: &ApiConfig, api: Arc<ApiClient>, durable: Arc<dyn KeyValueStore>) -> Result<Self> {
        let auth_http = Client::builder()
            .timeout(Duration::from_millis(config.auth_timeout_ms))
            .build()
            .map_err(ConsoleError::from_reqwest)?;

        // Any session teardown, including a failed refresh, drops the profile too.
        let store = durable.clone();
        let session_watch = api.session().subscribe(move |snapshot| {
            if snapshot.is_none() {
                if let Err(err) = store.remove(USER_KEY) {
                    warn!("failed to remove stored user: {err:#}");
                }
            }
        });

        Ok(Self {
            api,
            auth_http,
            durable,
            session_watch: Some(session_watch),
        })
    }

    pub async fn login(&self, credentials: &LoginRequest) -> Result<LoginResponse> {
        let response = post_auth(&self.auth_http, self.api.base_url(), "/auth/login", credentials).await?;
        self.api.session().persist_session(&response)?;
        if let Some(user) = &response.user {
            self.persist_user(user);
        }
        info!(email = %credentials.email, "logged in");
        Ok(response)
    }

    /// Refreshes with an explicit token, or with the stored one through the
    /// client's single-flight path.
    pub async fn refresh(&self, refresh_token: Option<&str>) -> Result<LoginResponse> {
        let response = match refresh_token {
            Some(token) => {
                let response = request_refresh(&self.auth_http, self.api.base_url(), token).await?;
                self.api.session().persist_session(&response)?;
                response
            }
            None => {
                if self.api.session().refresh_token().is_none() {
                    return Err(ConsoleError::NoRefreshToken);
                }
                self.api.refresh_session().await?
            }
        };
        if let Some(user) = &response.user {
            self.persist_user(user);
        }
        Ok(response)
    }

    pub async fn profile(&self) -> Result<User> {
        let user: User = self.api.get_json(ApiRequest::get("/auth/profile")).await?;
        self.persist_user(&user);
        Ok(user)
    }

    pub fn logout(&self) {
        self.api.session().clear();
        info!("logged out");
    }

    pub fn stored_user(&self) -> Option<User> {
        let raw = self.durable.get(USER_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(err) => {
                debug!("ignoring unreadable stored user: {err}");
                None
            }
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.api.session().access_token().is_some()
    }

    fn persist_user(&self, user: &User) {
        let stored = serde_json::to_string(user)
            .map_err(anyhow::Error::from)
            .and_then(|raw| self.durable.set(USER_KEY, &raw));
        if let Err(err) = stored {
            warn!("failed to persist user profile: {err:#}");
        }
    }
}

impl Drop for AuthService {
    fn drop(&mut self) {
        if let Some(watch) = self.session_watch.take() {
            watch.unsubscribe();
        }
    }
}
