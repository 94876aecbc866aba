use axum::http::{header, HeaderMap};
use std::{collections::HashMap, sync::RwLock};
use tokio::time::{Duration, Instant};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "launcher_session";

pub type SessionId = Uuid;

/// in-memory login sessions with a fixed lifetime
#[derive(Debug)]
pub struct SessionStore {
    ttl: Duration,
    sessions: RwLock<HashMap<SessionId, Instant>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Default::default(),
        }
    }

    pub fn create(&self) -> SessionId {
        let id = Uuid::new_v4();

        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(id, Instant::now() + self.ttl);
        }

        id
    }

    pub fn is_valid(&self, id: &SessionId) -> bool {
        let now = Instant::now();

        if let Ok(sessions) = self.sessions.read() {
            match sessions.get(id) {
                Some(expires) if *expires > now => return true,
                None => return false,
                _ => {}
            }
        }

        // expired, forget it
        self.destroy(id);

        false
    }

    pub fn destroy(&self, id: &SessionId) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.remove(id);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cookie(&self, id: &SessionId) -> String {
        format!(
            "{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
            self.ttl.as_secs()
        )
    }
}

pub fn expired_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0")
}

/// read the session id from the request cookies
pub fn session_id(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| value.parse().ok())
}
