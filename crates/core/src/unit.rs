//! Conversation units (single utterances) and the spans matched inside them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{Collection, Record, new_id};

/// One utterance from the conversational stream.
///
/// Only `processed` and `sanitized_text` change after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationUnit {
    pub id: String,

    pub session_id: String,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    pub raw_text: String,

    #[serde(default)]
    pub sanitized_text: Option<String>,

    #[serde(default = "default_speaker")]
    pub speaker: String,

    #[serde(default)]
    pub processed: bool,
}

fn default_speaker() -> String {
    "user".into()
}

impl ConversationUnit {
    pub fn new(session_id: impl Into<String>, speaker: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            raw_text: raw_text.into(),
            sanitized_text: None,
            speaker: speaker.into(),
            processed: false,
        }
    }

    /// The text the pipeline works on: sanitized when available, raw otherwise.
    pub fn working_text(&self) -> &str {
        match self.sanitized_text.as_deref() {
            Some(text) if !text.is_empty() => text,
            _ => &self.raw_text,
        }
    }
}

impl Record for ConversationUnit {
    const COLLECTION: Collection = Collection::ConversationUnits;

    fn id(&self) -> &str {
        &self.id
    }
}

/// A text region matched by a registered pattern. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub id: String,

    pub unit_id: String,

    pub pattern_id: String,

    pub text: String,

    pub start: usize,

    pub end: usize,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Record for Span {
    const COLLECTION: Collection = Collection::Spans;

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_text_prefers_sanitized() {
        let mut unit = ConversationUnit::new("s1", "user", "um  I think so");
        assert_eq!(unit.working_text(), "um  I think so");

        unit.sanitized_text = Some("I think so".into());
        assert_eq!(unit.working_text(), "I think so");

        unit.sanitized_text = Some(String::new());
        assert_eq!(unit.working_text(), "um  I think so");
    }

    #[test]
    fn timestamps_are_stored_as_millis() {
        let unit = ConversationUnit::new("s1", "user", "hello");
        let json = serde_json::to_value(&unit).unwrap();
        assert!(json["timestamp"].is_i64());
        assert_eq!(json["processed"], serde_json::json!(false));
    }
}
