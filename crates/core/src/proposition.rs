//! Propositions ("what is said"), stances ("how it is held"), relations
//! between propositions, and the extraction audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{Collection, JsonList, Record};

/// The kind of content a proposition expresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropositionType {
    #[default]
    State,
    Event,
    Process,
    Hypothetical,
    Generic,
}

impl PropositionType {
    /// Parse a label produced by the extractor; unknown labels map to `State`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "event" => Self::Event,
            "process" => Self::Process,
            "hypothetical" => Self::Hypothetical,
            "generic" => Self::Generic,
            _ => Self::State,
        }
    }
}

/// Content of an utterance, stripped of modality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposition {
    pub id: String,

    pub unit_id: String,

    pub content: String,

    #[serde(default)]
    pub subject: String,

    #[serde(default)]
    pub proposition_type: PropositionType,

    /// Canonical entities referenced, filled in after resolution.
    #[serde(default)]
    pub entity_ids: JsonList<String>,

    #[serde(default)]
    pub span_ids: JsonList<String>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Record for Proposition {
    const COLLECTION: Collection = Collection::Propositions;

    fn id(&self) -> &str {
        &self.id
    }
}

// ── Stance dimensions ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evidence {
    Direct,
    #[default]
    Inferred,
    Hearsay,
    Assumption,
}

impl Evidence {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "direct" => Self::Direct,
            "hearsay" => Self::Hearsay,
            "assumption" => Self::Assumption,
            _ => Self::Inferred,
        }
    }
}

/// How sure the speaker is, and on what basis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epistemic {
    pub certainty: f64,
    #[serde(default)]
    pub evidence: Evidence,
}

impl Default for Epistemic {
    fn default() -> Self {
        Self {
            certainty: 0.5,
            evidence: Evidence::Inferred,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolitionalType {
    Want,
    Intend,
    Hope,
    Fear,
    Prefer,
}

impl VolitionalType {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "want" => Some(Self::Want),
            "intend" => Some(Self::Intend),
            "hope" => Some(Self::Hope),
            "fear" => Some(Self::Fear),
            "prefer" => Some(Self::Prefer),
            _ => None,
        }
    }
}

/// What the speaker wants, intends, hopes, fears, or prefers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volitional {
    pub valence: f64,
    pub strength: f64,
    pub volitional_type: VolitionalType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeonticType {
    Must,
    Should,
    May,
    MustNot,
}

impl DeonticType {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "must" => Some(Self::Must),
            "should" => Some(Self::Should),
            "may" => Some(Self::May),
            "must_not" | "mustnot" => Some(Self::MustNot),
            _ => None,
        }
    }
}

/// Obligation or permission attached to the proposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deontic {
    pub strength: f64,
    #[serde(default)]
    pub source: String,
    pub deontic_type: DeonticType,
}

/// Emotional colouring of the proposition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Affective {
    #[serde(default)]
    pub valence: f64,
    #[serde(default)]
    pub arousal: f64,
    #[serde(default)]
    pub emotions: Vec<String>,
}

/// The four-dimensional attitude held toward a proposition.
///
/// A proposition may have several stances; the earliest is primary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stance {
    pub id: String,

    pub proposition_id: String,

    #[serde(default)]
    pub epistemic: Epistemic,

    #[serde(default)]
    pub volitional: Option<Volitional>,

    #[serde(default)]
    pub deontic: Option<Deontic>,

    #[serde(default)]
    pub affective: Affective,

    /// A prior stance on the same proposition that this one replaces.
    #[serde(default)]
    pub supersedes: Option<String>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Stance {
    /// A neutral stance: moderate certainty, no volition, no obligation, no affect.
    pub fn neutral(id: impl Into<String>, proposition_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            proposition_id: proposition_id.into(),
            epistemic: Epistemic::default(),
            volitional: None,
            deontic: None,
            affective: Affective::default(),
            supersedes: None,
            created_at: Utc::now(),
        }
    }

    /// Clamp every scalar into its documented range.
    pub fn clamped(mut self) -> Self {
        self.epistemic.certainty = self.epistemic.certainty.clamp(0.0, 1.0);
        if let Some(v) = self.volitional.as_mut() {
            v.valence = v.valence.clamp(-1.0, 1.0);
            v.strength = v.strength.clamp(0.0, 1.0);
        }
        if let Some(d) = self.deontic.as_mut() {
            d.strength = d.strength.clamp(0.0, 1.0);
        }
        self.affective.valence = self.affective.valence.clamp(-1.0, 1.0);
        self.affective.arousal = self.affective.arousal.clamp(0.0, 1.0);
        self
    }
}

impl Record for Stance {
    const COLLECTION: Collection = Collection::Stances;

    fn id(&self) -> &str {
        &self.id
    }
}

/// A discourse relation between two propositions of the same unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,

    pub unit_id: String,

    pub source_proposition_id: String,

    pub target_proposition_id: String,

    /// e.g. "cause", "contrast", "elaboration", "condition"
    pub relation_type: String,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Record for Relation {
    const COLLECTION: Collection = Collection::Relations;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Audit record of the LLM call that produced a proposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionTrace {
    pub id: String,

    pub proposition_id: String,

    pub unit_id: String,

    pub input_text: String,

    #[serde(default)]
    pub matched_span: Option<String>,

    pub prompt: String,

    pub response: String,

    pub model: String,

    pub tokens_used: u32,

    pub latency_ms: u64,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Record for ExtractionTrace {
    const COLLECTION: Collection = Collection::ExtractionTraces;

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_parse_leniently() {
        assert_eq!(PropositionType::from_label("Event"), PropositionType::Event);
        assert_eq!(PropositionType::from_label("??"), PropositionType::State);
        assert_eq!(Evidence::from_label("DIRECT"), Evidence::Direct);
        assert_eq!(VolitionalType::from_label("fear"), Some(VolitionalType::Fear));
        assert_eq!(VolitionalType::from_label("dread"), None);
        assert_eq!(DeonticType::from_label("must-not"), Some(DeonticType::MustNot));
        assert_eq!(DeonticType::from_label("mustNot"), Some(DeonticType::MustNot));
    }

    #[test]
    fn stance_clamps_out_of_range_values() {
        let mut stance = Stance::neutral("st1", "p1");
        stance.epistemic.certainty = 1.7;
        stance.affective.valence = -3.0;
        stance.affective.arousal = -0.2;
        stance.volitional = Some(Volitional {
            valence: 2.0,
            strength: 1.5,
            volitional_type: VolitionalType::Want,
        });

        let stance = stance.clamped();
        assert_eq!(stance.epistemic.certainty, 1.0);
        assert_eq!(stance.affective.valence, -1.0);
        assert_eq!(stance.affective.arousal, 0.0);
        let v = stance.volitional.unwrap();
        assert_eq!(v.valence, 1.0);
        assert_eq!(v.strength, 1.0);
    }
}
