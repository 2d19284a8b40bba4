//! Comment, Event, and Label records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::EventKind;

/// An immutable post on an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,

    pub issue_id: String,

    pub author: String,

    pub text: String,

    pub created_at: DateTime<Utc>,
}

/// An append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic event id, assigned by the store.
    pub id: i64,

    pub issue_id: String,

    pub kind: EventKind,

    pub actor: String,

    /// Kind-specific detail (close reason, dependency target, label name...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// A short string tag attached to an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub issue_id: String,
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_serde_roundtrip() {
        let c = Comment {
            id: 7,
            issue_id: "sk-ab1".into(),
            author: "alice".into(),
            text: "root cause is the retry loop".into(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&c).unwrap();
        let back: Comment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn event_payload_omitted_when_absent() {
        let e = Event {
            id: 1,
            issue_id: "sk-ab1".into(),
            kind: EventKind::Created,
            actor: "bot-3".into(),
            payload: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(!json.contains("payload"));
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, EventKind::Created);
    }
}
