pub mod broadcaster;
pub mod channel;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One NETCONF lifecycle emission, delivered in order to the notification
/// sink and to any other subscribers of the pipeline's event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub event_type: NetconfEventType,
    pub hostname: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    /// Free-form, sanitized context (commit id, diff excerpt, error string).
    /// Never contains credentials.
    pub details: String,
    pub delivery_status: DeliveryStatus,
}

impl NotificationEvent {
    pub fn new(
        event_type: NetconfEventType,
        hostname: impl Into<String>,
        success: bool,
        details: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            hostname: hostname.into(),
            success,
            timestamp: Utc::now(),
            details: details.into(),
            delivery_status: DeliveryStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetconfEventType {
    Connect,
    Preview,
    Commit,
    Rollback,
    Disconnect,
}

impl NetconfEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetconfEventType::Connect => "CONNECT",
            NetconfEventType::Preview => "PREVIEW",
            NetconfEventType::Commit => "COMMIT",
            NetconfEventType::Rollback => "ROLLBACK",
            NetconfEventType::Disconnect => "DISCONNECT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}
