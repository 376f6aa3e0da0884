use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// One authenticated browser/client instance, bound to a bearer token.
///
/// `ip_address` and `user_agent` are captured at login for display and audit
/// only; they are never consulted when deciding whether a request is
/// authenticated.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub token: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub active: bool,
}

impl Session {
    pub fn new(user_id: Uuid, token: String, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            token,
            ip_address,
            user_agent,
            created_at: now,
            last_seen_at: now,
            active: true,
        }
    }
}

/// Point-in-time snapshot of registry occupancy.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub active: usize,
    pub total: usize,
    pub by_user: HashMap<Uuid, usize>,
}
