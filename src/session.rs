use crate::config::SessionConfig;
use crate::error::{ConsoleError, Result};
use crate::storage::KeyValueStore;
use crate::types::LoginResponse;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

pub const ACCESS_TOKEN_KEY: &str = "console.accessToken";
pub const ACCESS_TOKEN_EXPIRES_KEY: &str = "console.accessTokenExpiresAt";
pub const REFRESH_TOKEN_KEY: &str = "console.refreshToken";
pub const REFRESH_TOKEN_EXPIRES_KEY: &str = "console.refreshTokenExpiresAt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
}

const MAX_EXPIRES_IN_SECS: f64 = 100.0 * 365.0 * 24.0 * 60.0 * 60.0;
const MAX_EXPIRES_IN_MS: i64 = 100 * 365 * 24 * 60 * 60 * 1000;

/// Parses a relative expiry such as `"15m"`, `"1h"`, `"7d"` or a raw second
/// count (`"900"`) into milliseconds. Unparseable, negative or implausibly
/// large values (over a century) yield `fallback_secs`.
pub fn parse_expires_in_ms(value: Option<&str>, fallback_secs: i64) -> i64 {
    let fallback = fallback_secs.saturating_mul(1000);
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return fallback;
    };

    let split = raw.char_indices().last().map(|(idx, _)| idx).unwrap_or(0);
    let (amount, unit) = raw.split_at(split);
    let multiplier = match unit {
        "s" => Some(1_000),
        "m" => Some(60 * 1_000),
        "h" => Some(60 * 60 * 1_000),
        "d" => Some(24 * 60 * 60 * 1_000),
        _ => None,
    };
    if let Some(multiplier) = multiplier {
        if !amount.is_empty() && amount.bytes().all(|b| b.is_ascii_digit()) {
            return match amount.parse::<i64>().ok().and_then(|a| a.checked_mul(multiplier)) {
                Some(ms) if ms <= MAX_EXPIRES_IN_MS => ms,
                _ => fallback,
            };
        }
    }

    match raw.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && (0.0..=MAX_EXPIRES_IN_SECS).contains(&seconds) => {
            (seconds * 1000.0) as i64
        }
        _ => fallback,
    }
}

pub fn parse_expires_in(value: Option<&str>, fallback_secs: i64) -> Duration {
    Duration::milliseconds(parse_expires_in_ms(value, fallback_secs))
}

fn expires_at(now: DateTime<Utc>, value: Option<&str>, fallback_secs: i64) -> DateTime<Utc> {
    now.checked_add_signed(parse_expires_in(value, fallback_secs))
        .or_else(|| now.checked_add_signed(Duration::seconds(fallback_secs)))
        .unwrap_or(now)
}

type Listener = Arc<dyn Fn(Option<&SessionSnapshot>) + Send + Sync>;
type ListenerList = Arc<Mutex<Vec<(u64, Listener)>>>;

pub struct Subscription {
    id: u64,
    listeners: ListenerList,
}

impl Subscription {
    pub fn unsubscribe(self) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.retain(|(id, _)| *id != self.id);
    }
}

#[derive(Debug, Clone)]
struct CachedAccess {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Owns the access/refresh token pair. The access token lives in tab-scoped
/// storage, the refresh token in durable storage.
pub struct SessionManager {
    tab: Arc<dyn KeyValueStore>,
    durable: Arc<dyn KeyValueStore>,
    cache: RwLock<Option<CachedAccess>>,
    listeners: ListenerList,
    next_listener: AtomicU64,
    defaults: SessionConfig,
}

impl SessionManager {
    pub fn new(
        tab: Arc<dyn KeyValueStore>,
        durable: Arc<dyn KeyValueStore>,
        defaults: SessionConfig,
    ) -> Self {
        Self {
            tab,
            durable,
            cache: RwLock::new(None),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener: AtomicU64::new(1),
            defaults,
        }
    }

    pub fn hydrate(&self) {
        if let Some(stored) = self.read_stored_access() {
            if Utc::now() < stored.expires_at {
                debug!("session hydrated from storage");
                *self.cache.write().unwrap_or_else(|e| e.into_inner()) = Some(stored);
            }
        }
    }

    pub fn access_token(&self) -> Option<String> {
        let now = Utc::now();
        if let Some(cached) = self.cache.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            if now < cached.expires_at {
                return Some(cached.token.clone());
            }
        }

        let stored = self.read_stored_access()?;
        if now >= stored.expires_at {
            return None;
        }
        let token = stored.token.clone();
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = Some(stored);
        Some(token)
    }

    pub fn access_token_expires_at(&self) -> Option<DateTime<Utc>> {
        if let Some(cached) = self.cache.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            return Some(cached.expires_at);
        }
        read_timestamp(self.tab.as_ref(), ACCESS_TOKEN_EXPIRES_KEY)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.durable
            .get(REFRESH_TOKEN_KEY)
            .filter(|token| !token.is_empty())
    }

    pub fn refresh_token_expires_at(&self) -> Option<DateTime<Utc>> {
        read_timestamp(self.durable.as_ref(), REFRESH_TOKEN_EXPIRES_KEY)
    }

    /// True when the access token expires within `margin_ms`. Unknown expiry
    /// never asks for a refresh.
    pub fn should_refresh(&self, margin_ms: i64) -> bool {
        match self.access_token_expires_at() {
            Some(expires_at) => (expires_at - Utc::now()).num_milliseconds() <= margin_ms,
            None => false,
        }
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let access = self.read_stored_access()?;
        Some(SessionSnapshot {
            access_token: access.token,
            refresh_token: self.refresh_token()?,
            access_token_expires_at: access.expires_at,
            refresh_token_expires_at: self.refresh_token_expires_at()?,
        })
    }

    pub fn persist_session(&self, response: &LoginResponse) -> Result<SessionSnapshot> {
        if response.access_token.trim().is_empty() || response.refresh_token.trim().is_empty() {
            return Err(ConsoleError::invalid_auth_response());
        }

        let now = Utc::now();
        let snapshot = SessionSnapshot {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone(),
            access_token_expires_at: expires_at(
                now,
                response.access_token_expires_in.as_deref(),
                self.defaults.default_access_expiry_secs,
            ),
            refresh_token_expires_at: expires_at(
                now,
                response.refresh_token_expires_in.as_deref(),
                self.defaults.default_refresh_expiry_secs,
            ),
        };

        // A partial write must not leave a mix of old and new tokens behind.
        if let Err(err) = self.write_session(&snapshot) {
            warn!("failed to persist session, clearing: {err:#}");
            self.clear();
            return Err(ConsoleError::Storage(err.to_string()));
        }

        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = Some(CachedAccess {
            token: snapshot.access_token.clone(),
            expires_at: snapshot.access_token_expires_at,
        });

        info!(
            access_expires_at = %snapshot.access_token_expires_at,
            refresh_expires_at = %snapshot.refresh_token_expires_at,
            "session persisted"
        );
        self.notify(Some(&snapshot));
        Ok(snapshot)
    }

    pub fn clear(&self) {
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = None;
        for (store, key) in [
            (&self.tab, ACCESS_TOKEN_KEY),
            (&self.tab, ACCESS_TOKEN_EXPIRES_KEY),
            (&self.durable, REFRESH_TOKEN_KEY),
            (&self.durable, REFRESH_TOKEN_EXPIRES_KEY),
        ] {
            if let Err(err) = store.remove(key) {
                warn!(key, "failed to remove session entry: {err:#}");
            }
        }
        info!("session cleared");
        self.notify(None);
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Option<&SessionSnapshot>) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            id,
            listeners: self.listeners.clone(),
        }
    }

    fn notify(&self, snapshot: Option<&SessionSnapshot>) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(snapshot))).is_err() {
                warn!("session listener panicked");
            }
        }
    }

    fn write_session(&self, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
        self.tab.set(ACCESS_TOKEN_KEY, &snapshot.access_token)?;
        self.tab.set(
            ACCESS_TOKEN_EXPIRES_KEY,
            &snapshot.access_token_expires_at.timestamp_millis().to_string(),
        )?;
        self.durable.set(REFRESH_TOKEN_KEY, &snapshot.refresh_token)?;
        self.durable.set(
            REFRESH_TOKEN_EXPIRES_KEY,
            &snapshot.refresh_token_expires_at.timestamp_millis().to_string(),
        )?;
        Ok(())
    }

    fn read_stored_access(&self) -> Option<CachedAccess> {
        let token = self.tab.get(ACCESS_TOKEN_KEY).filter(|t| !t.is_empty())?;
        let expires_at = read_timestamp(self.tab.as_ref(), ACCESS_TOKEN_EXPIRES_KEY)?;
        Some(CachedAccess { token, expires_at })
    }
}

fn read_timestamp(store: &dyn KeyValueStore, key: &str) -> Option<DateTime<Utc>> {
    let millis = store.get(key)?.trim().parse::<i64>().ok()?;
    if millis <= 0 {
        return None;
    }
    Utc.timestamp_millis_opt(millis).single()
}
