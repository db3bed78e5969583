use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub push: PushConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub conversations: ConversationsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub auth_timeout_ms: u64,
    pub refresh_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000/api".to_string(),
            timeout_ms: 30_000,
            auth_timeout_ms: 15_000,
            refresh_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub enabled: bool,
    pub url: String,
    pub event_buffer: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "ws://127.0.0.1:3000/ws".to_string(),
            event_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub refresh_margin_ms: i64,
    pub default_access_expiry_secs: i64,
    pub default_refresh_expiry_secs: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_margin_ms: 30_000,
            default_access_expiry_secs: 900,
            default_refresh_expiry_secs: 7 * 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: "~/.operator-console".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationsConfig {
    pub page_size: u32,
    pub message_page_size: u32,
}

impl Default for ConversationsConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            message_page_size: 100,
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn resolve_config_path() -> PathBuf {
    env::var("OPERATOR_CONSOLE_CONFIG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| expand_tilde("~/.operator-console/console.json"))
}

pub fn load_config() -> Config {
    let config_path = resolve_config_path();

    let mut cfg = Config::default();

    if config_path.exists() {
        match fs::read_to_string(&config_path) {
            Ok(raw) => match serde_json::from_str::<Config>(&raw) {
                Ok(file_cfg) => cfg = file_cfg,
                Err(err) => {
                    tracing::warn!(path = %config_path.display(), "ignoring malformed config: {err}")
                }
            },
            Err(err) => tracing::warn!(path = %config_path.display(), "cannot read config: {err}"),
        }
    }

    if let Ok(url) = env::var("OPERATOR_CONSOLE_API_URL") {
        if !url.trim().is_empty() {
            cfg.api.base_url = url;
        }
    }

    if let Ok(url) = env::var("OPERATOR_CONSOLE_PUSH_URL") {
        if !url.trim().is_empty() {
            cfg.push.url = url;
        }
    }

    if let Ok(dir) = env::var("OPERATOR_CONSOLE_STATE_DIR") {
        if !dir.trim().is_empty() {
            cfg.storage.state_dir = dir;
        }
    }

    cfg
}

pub fn ensure_config_dir() {
    let path = resolve_config_path();
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
}

pub fn resolve_state_dir(cfg: &Config) -> PathBuf {
    expand_tilde(&cfg.storage.state_dir)
}
