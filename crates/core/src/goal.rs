//! Goals tracked across conversations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{Collection, JsonList, Record, new_id};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    #[default]
    Active,
    Achieved,
    Abandoned,
    Blocked,
    Stalled,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Achieved => "achieved",
            Self::Abandoned => "abandoned",
            Self::Blocked => "blocked",
            Self::Stalled => "stalled",
        }
    }

    /// Achieved and abandoned goals are closed; everything else may still move.
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Achieved | Self::Abandoned)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,

    pub title: String,

    #[serde(default)]
    pub status: GoalStatus,

    /// Content words of the title, used for overlap matching.
    #[serde(default)]
    pub keywords: JsonList<String>,

    #[serde(default)]
    pub source_claim_ids: JsonList<String>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_referenced: DateTime<Utc>,
}

impl Goal {
    pub fn new(title: impl Into<String>, keywords: Vec<String>, claim_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            title: title.into(),
            status: GoalStatus::Active,
            keywords: keywords.into(),
            source_claim_ids: vec![claim_id.into()].into(),
            created_at: now,
            last_referenced: now,
        }
    }
}

impl Record for Goal {
    const COLLECTION: Collection = Collection::Goals;

    fn id(&self) -> &str {
        &self.id
    }
}
