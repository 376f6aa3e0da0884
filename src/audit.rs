use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

/// Security-relevant rejection kinds reported to the audit sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    SessionNotFound,
    RateLimited,
    CsrfRejected,
}

impl AuditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditKind::SessionNotFound => "session_not_found",
            AuditKind::RateLimited => "rate_limited",
            AuditKind::CsrfRejected => "csrf_rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub client_id: String,
    pub kind: AuditKind,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(client_id: impl Into<String>, kind: AuditKind) -> Self {
        Self {
            client_id: client_id.into(),
            kind,
            timestamp: Utc::now(),
        }
    }
}

/// Fire-and-forget receiver for security audit events.
///
/// Implementations must never block or fail the request path; anything that
/// can go wrong while recording an event is swallowed by the implementation.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn notify(&self, event: AuditEvent);
}

/// Default sink that emits a structured warn record per event.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait::async_trait]
impl AuditSink for TracingAuditSink {
    async fn notify(&self, event: AuditEvent) {
        warn!(
            category = "audit",
            event_type = event.kind.as_str(),
            client_id = %event.client_id,
            timestamp = %event.timestamp.to_rfc3339(),
            "security audit event"
        );
    }
}
