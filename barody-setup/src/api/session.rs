// Server-side sessions
//
// Session data stays in process memory, keyed by an opaque id carried in a cookie. It holds the
// setup token between wizard visits, the post-setup redirect target, the signed-in user and
// one-shot flash messages. Idle sessions expire and the store is capped.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Cookie a browser may carry a setup token in (read by the redirect view).
pub const SETUP_TOKEN_COOKIE: &str = "setup_token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    Success,
    Info,
    Error,
}

impl FlashLevel {
    pub fn css_class(self) -> &'static str {
        match self {
            FlashLevel::Success => "success",
            FlashLevel::Info => "info",
            FlashLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashMessage {
    pub level: FlashLevel,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionData {
    pub setup_token: Option<String>,
    pub post_setup_redirect: Option<String>,
    pub user_id: Option<i64>,
    pub messages: Vec<FlashMessage>,
}

impl SessionData {
    pub fn flash(&mut self, level: FlashLevel, text: impl Into<String>) {
        self.messages.push(FlashMessage {
            level,
            text: text.into(),
        });
    }
}

/// Sessions idle longer than this are dropped.
pub const SESSION_IDLE_TTL: Duration = Duration::from_secs(2 * 60 * 60);
/// Upper bound on live sessions; the least recently seen one is evicted past it.
pub const MAX_SESSIONS: usize = 10_000;

#[derive(Debug)]
struct Entry {
    data: SessionData,
    last_seen: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) >= ttl
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
    ttl: Duration,
    capacity: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_limits(SESSION_IDLE_TTL, MAX_SESSIONS)
    }
}

impl SessionStore {
    pub fn with_limits(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Current data for `id`; unknown and expired sessions read as empty.
    pub async fn load(&self, id: &str) -> SessionData {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        match inner.get_mut(id) {
            Some(entry) if !entry.is_expired(now, self.ttl) => {
                entry.last_seen = now;
                entry.data.clone()
            }
            Some(_) => {
                inner.remove(id);
                SessionData::default()
            }
            None => SessionData::default(),
        }
    }

    /// Mutate (creating if needed) the session `id`.
    pub async fn update<R>(&self, id: &str, f: impl FnOnce(&mut SessionData) -> R) -> R {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        if inner
            .get(id)
            .is_some_and(|entry| entry.is_expired(now, self.ttl))
        {
            inner.remove(id);
        }
        if !inner.contains_key(id) && inner.len() >= self.capacity {
            self.make_room(&mut inner, now);
        }

        let entry = inner.entry(id.to_string()).or_insert_with(|| Entry {
            data: SessionData::default(),
            last_seen: now,
        });
        entry.last_seen = now;
        f(&mut entry.data)
    }

    /// Remove and return pending flash messages. Never creates a session.
    pub async fn take_messages(&self, id: &str) -> Vec<FlashMessage> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        match inner.get_mut(id) {
            Some(entry) if !entry.is_expired(now, self.ttl) => {
                entry.last_seen = now;
                std::mem::take(&mut entry.data.messages)
            }
            _ => Vec::new(),
        }
    }

    /// Drop idle sessions; returns how many were removed.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Instant::now()).await
    }

    async fn sweep_at(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock().await;
        let before = inner.len();
        inner.retain(|_, entry| !entry.is_expired(now, self.ttl));
        before - inner.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn make_room(&self, inner: &mut HashMap<String, Entry>, now: Instant) {
        inner.retain(|_, entry| !entry.is_expired(now, self.ttl));
        while inner.len() >= self.capacity {
            let Some(oldest) = inner
                .iter()
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            inner.remove(&oldest);
        }
    }
}

/// A request's session id plus the cookie jar to return with the response.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: String,
    pub jar: CookieJar,
}

impl SessionHandle {
    /// Reuse the session cookie when present, otherwise mint a new id and set the cookie.
    pub fn resolve(jar: CookieJar, cookie_name: &str) -> Self {
        if let Some(id) = jar
            .get(cookie_name)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
        {
            return Self { id, jar };
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        let cookie = Cookie::build((cookie_name.to_string(), id.clone()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .build();
        Self {
            id,
            jar: jar.add(cookie),
        }
    }
}
