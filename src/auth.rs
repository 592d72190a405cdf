use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

pub const SESSION_COOKIE: &str = "sitedeck_session";

const SESSION_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// In-memory admin sessions keyed by random token. Sessions expire after
/// 24 hours; a restart logs everyone out, which is acceptable for a
/// single-admin deployment.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_session(&self, username: impl Into<String>) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        let session = Session {
            username: username.into(),
            created_at: Utc::now(),
        };
        self.sessions.write().await.insert(token.clone(), session);
        token
    }

    pub async fn get_session(&self, token: &str) -> Option<Session> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(token)?;
        if Utc::now().signed_duration_since(session.created_at)
            >= Duration::hours(SESSION_TTL_HOURS)
        {
            return None;
        }
        Some(session.clone())
    }

    pub async fn delete_session(&self, token: &str) {
        self.sessions.write().await.remove(token);
    }
}

/// Admin credentials the login endpoint checks against.
#[derive(Debug, Clone)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

impl AdminCredentials {
    pub fn matches(&self, username: &str, password: &str) -> bool {
        self.username == username && self.password == password
    }
}
