use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A server-pushed announcement, kept exactly as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl Announcement {
    #[must_use]
    pub fn new(payload: Value, received_at: DateTime<Utc>) -> Self {
        Self {
            payload,
            received_at,
        }
    }

    /// Split a sync response's `announcements` field into individual entries.
    ///
    /// Arrays yield one announcement per element; any other non-null value is
    /// kept as a single announcement.
    #[must_use]
    pub fn from_response(value: Value, received_at: DateTime<Utc>) -> Vec<Self> {
        match value {
            Value::Null => Vec::new(),
            Value::Array(items) => items
                .into_iter()
                .map(|payload| Self::new(payload, received_at))
                .collect(),
            other => vec![Self::new(other, received_at)],
        }
    }
}
