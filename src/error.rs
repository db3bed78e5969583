use reqwest::StatusCode;
use serde_json::Value;

/// Errors surfaced by the session, REST and reconciler layers.
///
/// Cloneable so a single refresh failure can be delivered to every request
/// queued behind it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConsoleError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized { message: Option<String> },

    #[error("forbidden")]
    Forbidden { message: Option<String> },

    #[error("not found")]
    NotFound { message: Option<String> },

    #[error("request rejected ({status}): {}", .message.as_deref().unwrap_or("no details"))]
    Conflict { status: u16, message: Option<String> },

    #[error("server error ({status})")]
    Server { status: u16, message: Option<String> },

    #[error("unexpected status {status}")]
    Status { status: u16, message: Option<String> },

    #[error("network error: {0}")]
    Network(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("push channel error: {0}")]
    Push(String),

    #[error("refresh token unavailable")]
    NoRefreshToken,
}

pub type Result<T> = std::result::Result<T, ConsoleError>;

pub const INVALID_AUTH_RESPONSE: &str = "invalid authentication response";

impl ConsoleError {
    pub fn invalid_auth_response() -> Self {
        Self::Validation(INVALID_AUTH_RESPONSE.to_string())
    }

    pub fn from_status(status: StatusCode, body: Option<&Value>) -> Self {
        let message = body.and_then(backend_message);
        let code = status.as_u16();
        match code {
            401 => Self::Unauthorized { message },
            403 => Self::Forbidden { message },
            404 => Self::NotFound { message },
            400 | 409 | 422 => Self::Conflict {
                status: code,
                message,
            },
            500..=599 => Self::Server {
                status: code,
                message,
            },
            _ => Self::Status {
                status: code,
                message,
            },
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status, None)
        } else {
            Self::Network(err.to_string())
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::Forbidden { .. } => Some(403),
            Self::NotFound { .. } => Some(404),
            Self::Conflict { status, .. }
            | Self::Server { status, .. }
            | Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// True when the UI should route the operator back to the login view.
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::NoRefreshToken)
    }

    fn backend_message(&self) -> Option<&str> {
        match self {
            Self::Unauthorized { message }
            | Self::Forbidden { message }
            | Self::NotFound { message }
            | Self::Conflict { message, .. }
            | Self::Server { message, .. }
            | Self::Status { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    /// Human-readable text for transient UI notices. Never contains status codes.
    pub fn user_message(&self) -> String {
        if let Some(message) = self.backend_message() {
            if !message.trim().is_empty() {
                return message.to_string();
            }
        }

        match self {
            Self::Unauthorized { .. } | Self::NoRefreshToken => {
                "Session expired. Please sign in again.".to_string()
            }
            Self::Forbidden { .. } => "You do not have permission to perform this action.".to_string(),
            Self::NotFound { .. } => {
                "Resource not found. Check that the information is correct.".to_string()
            }
            Self::Conflict { status: 400, .. } => {
                "Invalid data. Check the information and try again.".to_string()
            }
            Self::Conflict { status: 409, .. } => {
                "Conflict. This information already exists.".to_string()
            }
            Self::Conflict { .. } => "Validation failed. Check the submitted data.".to_string(),
            Self::Server { status: 500, .. } => {
                "Internal server error. Try again in a few moments.".to_string()
            }
            Self::Server { .. } => {
                "Service temporarily unavailable. Try again in a few moments.".to_string()
            }
            Self::Network(_) => {
                "Could not reach the server. Check your internet connection.".to_string()
            }
            Self::Validation(message) => message.clone(),
            _ => GENERIC_MESSAGE.to_string(),
        }
    }
}

const GENERIC_MESSAGE: &str = "An unexpected error occurred. Try again.";

pub fn backend_message(body: &Value) -> Option<String> {
    match body.get("message")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        _ => None,
    }
}

impl From<serde_json::Error> for ConsoleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ConsoleError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Push(err.to_string())
    }
}
