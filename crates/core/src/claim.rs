//! Claims: derived, confidence-bearing, decaying knowledge units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{Collection, JsonList, Record, new_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    Factual,
    Belief,
    Intention,
    Goal,
    Concern,
    Preference,
    Commitment,
    Emotion,
    Hypothetical,
    Decision,
    Question,
    Memory,
    SelfPerception,
}

impl ClaimType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Factual => "factual",
            Self::Belief => "belief",
            Self::Intention => "intention",
            Self::Goal => "goal",
            Self::Concern => "concern",
            Self::Preference => "preference",
            Self::Commitment => "commitment",
            Self::Emotion => "emotion",
            Self::Hypothetical => "hypothetical",
            Self::Decision => "decision",
            Self::Question => "question",
            Self::Memory => "memory",
            Self::SelfPerception => "self_perception",
        }
    }
}

/// How quickly a claim's confidence should decay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Temporality {
    Eternal,
    SlowlyDecaying,
    FastDecaying,
    PointInTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Abstraction {
    Specific,
    General,
    Hypothetical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stakes {
    Low,
    Medium,
    High,
    Existential,
}

impl Stakes {
    /// Weight used by salience: low 0.2, medium 0.5, high 0.8, existential 1.0.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Low => 0.2,
            Self::Medium => 0.5,
            Self::High => 0.8,
            Self::Existential => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimState {
    Active,
    Stale,
    Dormant,
    Superseded,
}

impl ClaimState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Stale => "stale",
            Self::Dormant => "dormant",
            Self::Superseded => "superseded",
        }
    }

    /// Ordering along the decay path; decay never moves a claim backwards.
    pub fn decay_rank(&self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Stale => 1,
            Self::Dormant => 2,
            Self::Superseded => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    #[default]
    Working,
    LongTerm,
}

impl MemoryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::LongTerm => "long_term",
        }
    }
}

/// The storage-independent attributes the claim deriver produces.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimAttributes {
    pub claim_type: ClaimType,
    pub temporality: Temporality,
    pub abstraction: Abstraction,
    pub stakes: Stakes,
    pub initial_confidence: f64,
    pub emotional_valence: f64,
    pub emotional_intensity: f64,
}

impl Default for ClaimAttributes {
    fn default() -> Self {
        Self {
            claim_type: ClaimType::Belief,
            temporality: Temporality::SlowlyDecaying,
            abstraction: Abstraction::Specific,
            stakes: Stakes::Low,
            initial_confidence: 0.5,
            emotional_valence: 0.0,
            emotional_intensity: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,

    pub statement: String,

    /// Normalized statement, used to find repeats of the same claim.
    pub normalized_statement: String,

    #[serde(default)]
    pub subject: String,

    pub claim_type: ClaimType,

    pub temporality: Temporality,

    pub abstraction: Abstraction,

    pub stakes: Stakes,

    pub initial_confidence: f64,

    pub current_confidence: f64,

    pub state: ClaimState,

    #[serde(default)]
    pub emotional_valence: f64,

    #[serde(default)]
    pub emotional_intensity: f64,

    #[serde(default = "default_confirmations")]
    pub confirmation_count: u32,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_confirmed: DateTime<Utc>,

    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_accessed: Option<DateTime<Utc>>,

    #[serde(default)]
    pub memory_tier: MemoryTier,

    #[serde(default)]
    pub salience: f64,

    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub promoted_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub superseded_by: Option<String>,

    #[serde(default)]
    pub source_proposition_id: Option<String>,

    #[serde(default)]
    pub source_stance_id: Option<String>,

    #[serde(default)]
    pub session_id: Option<String>,

    #[serde(default)]
    pub entity_ids: JsonList<String>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    /// Baseline for the next decay pass.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_decayed_at: DateTime<Utc>,
}

fn default_confirmations() -> u32 {
    1
}

impl Claim {
    /// Build a fresh working-tier claim from derived attributes.
    pub fn from_attributes(statement: impl Into<String>, subject: impl Into<String>, attrs: &ClaimAttributes) -> Self {
        let statement = statement.into();
        let now = Utc::now();
        let confidence = attrs.initial_confidence.clamp(0.0, 1.0);
        Self {
            id: new_id(),
            normalized_statement: normalize_statement(&statement),
            statement,
            subject: subject.into(),
            claim_type: attrs.claim_type,
            temporality: attrs.temporality,
            abstraction: attrs.abstraction,
            stakes: attrs.stakes,
            initial_confidence: confidence,
            current_confidence: confidence,
            state: ClaimState::Active,
            emotional_valence: attrs.emotional_valence.clamp(-1.0, 1.0),
            emotional_intensity: attrs.emotional_intensity.clamp(0.0, 1.0),
            confirmation_count: 1,
            last_confirmed: now,
            last_accessed: None,
            memory_tier: MemoryTier::Working,
            salience: 0.0,
            promoted_at: None,
            superseded_by: None,
            source_proposition_id: None,
            source_stance_id: None,
            session_id: None,
            entity_ids: JsonList::new(),
            created_at: now,
            last_decayed_at: now,
        }
    }

    /// Eligible for the decay pass: not eternal and not superseded.
    pub fn is_decayable(&self) -> bool {
        self.temporality != Temporality::Eternal && self.state != ClaimState::Superseded
    }

    pub fn is_long_term(&self) -> bool {
        self.memory_tier == MemoryTier::LongTerm
    }

    /// Patch applied when the claim is confirmed again.
    ///
    /// Confidence is restored to at least its seed, the decay baseline resets,
    /// and a stale or dormant claim becomes active. Returns `None` for a
    /// superseded claim, which is never revived.
    pub fn reinforcement_patch(&self, now: DateTime<Utc>) -> Option<serde_json::Value> {
        if self.state == ClaimState::Superseded {
            return None;
        }
        let confidence = self
            .current_confidence
            .max(self.initial_confidence)
            .clamp(0.0, 1.0);
        Some(serde_json::json!({
            "confirmation_count": self.confirmation_count.saturating_add(1),
            "last_confirmed": now.timestamp_millis(),
            "last_decayed_at": now.timestamp_millis(),
            "current_confidence": confidence,
            "state": ClaimState::Active,
        }))
    }
}

impl Record for Claim {
    const COLLECTION: Collection = Collection::Claims;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Join record linking a claim to the unit and proposition it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimSource {
    pub id: String,

    pub claim_id: String,

    pub unit_id: String,

    pub proposition_id: String,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl ClaimSource {
    pub fn new(claim_id: impl Into<String>, unit_id: impl Into<String>, proposition_id: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            claim_id: claim_id.into(),
            unit_id: unit_id.into(),
            proposition_id: proposition_id.into(),
            created_at: Utc::now(),
        }
    }
}

impl Record for ClaimSource {
    const COLLECTION: Collection = Collection::ClaimSources;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Lowercase, drop punctuation, collapse whitespace.
pub fn normalize_statement(statement: &str) -> String {
    statement
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() || c == '\'' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
