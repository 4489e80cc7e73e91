use serde::{Deserialize, Serialize};

/// A single audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: AuditEventType,
    pub source: AuditSource,
    pub details: serde_json::Value,
}

impl AuditEntry {
    /// Create an entry stamped with a fresh UUID v4 and the current UTC time.
    pub fn new(
        event_type: AuditEventType,
        source: AuditSource,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event_type,
            source,
            details,
        }
    }
}

/// The category of audit event being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ProcessStarted,
    ProcessStopped,
    /// A client was accepted and paired with an upstream connection.
    SessionOpened,
    SessionClosed,
    /// The session pool was saturated; the accepted socket was closed.
    SessionRefused,
    /// The upstream dial failed or timed out.
    UpstreamUnreachable,
    /// A filter failed on the relay path and the untransformed line was
    /// forwarded instead.
    FilterFailed,
    FilterChainReloaded,
    ConfigReloadFailed,
}

/// Identifies the component and optional session metadata for an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSource {
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AuditSource {
    /// Source with only a component name.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            remote_addr: None,
            session_id: None,
        }
    }

    /// Attach the session identity, builder style.
    pub fn with_session(mut self, session_id: impl ToString, remote_addr: impl ToString) -> Self {
        self.session_id = Some(session_id.to_string());
        self.remote_addr = Some(remote_addr.to_string());
        self
    }
}
