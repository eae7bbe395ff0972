//! Observer triggers and the immutable findings observers persist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{Collection, JsonList, Record, new_id};

/// What caused an observer dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    NewClaim,
    SessionEnd,
    Schedule,
    Manual,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewClaim => "new_claim",
            Self::SessionEnd => "session_end",
            Self::Schedule => "schedule",
            Self::Manual => "manual",
        }
    }
}

/// An analyzer's finding. Never updated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverOutput {
    pub id: String,

    pub observer_type: String,

    pub output_type: String,

    pub trigger: Trigger,

    /// Free-form finding, shaped per output type.
    pub payload: serde_json::Value,

    #[serde(default)]
    pub source_claim_ids: JsonList<String>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl ObserverOutput {
    pub fn new(
        observer_type: impl Into<String>,
        output_type: impl Into<String>,
        trigger: Trigger,
        payload: serde_json::Value,
        source_claim_ids: Vec<String>,
    ) -> Self {
        Self {
            id: new_id(),
            observer_type: observer_type.into(),
            output_type: output_type.into(),
            trigger,
            payload,
            source_claim_ids: source_claim_ids.into(),
            created_at: Utc::now(),
        }
    }

    pub fn references(&self, claim_id: &str) -> bool {
        self.source_claim_ids.iter().any(|id| id == claim_id)
    }
}

impl Record for ObserverOutput {
    const COLLECTION: Collection = Collection::ObserverOutputs;

    fn id(&self) -> &str {
        &self.id
    }
}
