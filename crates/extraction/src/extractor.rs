//! LLM extraction: prompt construction and the structured response contract.
//!
//! The model is asked for a single JSON object:
//!
//! ```json
//! {
//!   "propositions": [{ "content": "...", "subject": "...", "type": "state",
//!                      "stance": { "epistemic": {...}, "volitional": {...},
//!                                  "deontic": {...}, "affective": {...} } }],
//!   "relations":    [{ "source": 0, "target": 1, "type": "cause" }],
//!   "entities":     [{ "text": "Sam", "mention_type": "proper_noun",
//!                      "suggested_type": "person", "proposition_index": 0 }]
//! }
//! ```
//!
//! Anything unparseable degrades to an empty response rather than an error.

use chrono::Utc;
use kenning_core::entity::{Entity, EntityMention, EntityType, MentionType};
use kenning_core::error::LlmError;
use kenning_core::llm::{parse_json_block, CallOptions, LlmClient, LlmRequest, ModelTier};
use kenning_core::proposition::{
    Affective, Deontic, DeonticType, Epistemic, Evidence, ExtractionTrace, Proposition, PropositionType, Relation,
    Stance, Volitional, VolitionalType,
};
use kenning_core::record::{new_id, JsonList};
use kenning_core::unit::Span;
use serde::Deserialize;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub const SYSTEM_PROMPT: &str = "You analyse one utterance from a personal conversation. \
Split it into atomic propositions (what is said) and, for each, the stance the speaker holds: \
epistemic {certainty 0-1, evidence: direct|inferred|hearsay|assumption}, \
volitional {type: want|intend|hope|fear|prefer, strength 0-1, valence -1..1} or null, \
deontic {type: must|should|may|must_not, strength 0-1, source} or null, \
affective {valence -1..1, arousal 0-1, emotions: [..]}. \
Proposition type is one of state|event|process|hypothetical|generic. \
List entity mentions with mention_type pronoun|proper_noun|common_noun|definite_description|self_reference. \
Reply with a single JSON object and nothing else.";

/// Everything the extraction prompt is built from.
#[derive(Debug, Clone, Default)]
pub struct ExtractionContext {
    pub text: String,
    pub spans: Vec<Span>,
    /// Most recently referenced canonical entities.
    pub entities: Vec<Entity>,
    /// Most recent earlier propositions, oldest first.
    pub propositions: Vec<Proposition>,
}

impl ExtractionContext {
    pub fn prompt(&self) -> String {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "Utterance: \"{}\"", self.text);

        if !self.spans.is_empty() {
            prompt.push_str("\nMarked spans:\n");
            for span in &self.spans {
                let _ = writeln!(prompt, "- [{}] \"{}\"", span.pattern_id, span.text);
            }
        }

        if !self.entities.is_empty() {
            prompt.push_str("\nKnown entities:\n");
            for entity in &self.entities {
                let _ = write!(prompt, "- {} ({})", entity.canonical_name, entity.entity_type.as_str());
                if !entity.aliases.is_empty() {
                    let _ = write!(prompt, " aka {}", entity.aliases.join(", "));
                }
                prompt.push('\n');
            }
        }

        if !self.propositions.is_empty() {
            prompt.push_str("\nEarlier in the conversation:\n");
            for p in &self.propositions {
                let _ = writeln!(prompt, "- {}", p.content);
            }
        }

        prompt.push_str("\nReturn {\"propositions\": [...], \"relations\": [...], \"entities\": [...]}.");
        prompt
    }
}

// --- Response contract (lenient) ---

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExtractionResponse {
    pub propositions: Vec<RawProposition>,
    pub relations: Vec<RawRelation>,
    pub entities: Vec<RawMention>,
}

impl ExtractionResponse {
    /// Decode the first JSON object in `text`; empty when absent or malformed.
    pub fn parse(text: &str) -> Self {
        parse_json_block(text).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawProposition {
    pub content: String,
    pub subject: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub stance: Option<RawStance>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawStance {
    pub epistemic: Option<RawEpistemic>,
    pub volitional: Option<RawVolitional>,
    pub deontic: Option<RawDeontic>,
    pub affective: Option<RawAffective>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawEpistemic {
    pub certainty: Option<f64>,
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawVolitional {
    #[serde(rename = "type")]
    pub kind: String,
    pub strength: Option<f64>,
    pub valence: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawDeontic {
    #[serde(rename = "type")]
    pub kind: String,
    pub strength: Option<f64>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawAffective {
    pub valence: Option<f64>,
    pub arousal: Option<f64>,
    pub emotions: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawRelation {
    pub source: usize,
    pub target: usize,
    #[serde(rename = "type")]
    pub relation_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawMention {
    pub text: String,
    pub mention_type: String,
    pub suggested_type: Option<String>,
    pub proposition_index: Option<usize>,
}

impl RawStance {
    fn into_stance(self, proposition_id: &str) -> Stance {
        let mut stance = Stance::neutral(new_id(), proposition_id);
        if let Some(e) = self.epistemic {
            stance.epistemic = Epistemic {
                certainty: e.certainty.unwrap_or(0.5),
                evidence: e.evidence.as_deref().map(Evidence::from_label).unwrap_or_default(),
            };
        }
        stance.volitional = self.volitional.and_then(|v| {
            VolitionalType::from_label(&v.kind).map(|volitional_type| Volitional {
                valence: v.valence.unwrap_or(0.0),
                strength: v.strength.unwrap_or(0.5),
                volitional_type,
            })
        });
        stance.deontic = self.deontic.and_then(|d| {
            DeonticType::from_label(&d.kind).map(|deontic_type| Deontic {
                strength: d.strength.unwrap_or(0.5),
                source: d.source.unwrap_or_default(),
                deontic_type,
            })
        });
        if let Some(a) = self.affective {
            stance.affective = Affective {
                valence: a.valence.unwrap_or(0.0),
                arousal: a.arousal.unwrap_or(0.0),
                emotions: a.emotions.into_iter().filter(|e| !e.trim().is_empty()).collect(),
            };
        }
        stance.clamped()
    }
}

/// One LLM round-trip and its audit data.
#[derive(Debug, Clone)]
pub struct ExtractionOutput {
    pub prompt: String,
    pub raw: String,
    pub model: String,
    pub tokens_used: u32,
    pub latency_ms: u64,
    pub response: ExtractionResponse,
}

/// Records ready to persist for one unit.
#[derive(Debug, Clone, Default)]
pub struct ExtractedRecords {
    pub propositions: Vec<Proposition>,
    pub stances: Vec<Stance>,
    pub relations: Vec<Relation>,
    pub mentions: Vec<EntityMention>,
    pub traces: Vec<ExtractionTrace>,
}

impl ExtractionOutput {
    /// Turn the parsed response into records for `unit_id`.
    ///
    /// Propositions with empty content are dropped; relations and mentions
    /// pointing at a dropped or out-of-range proposition lose that link.
    pub fn into_records(self, unit_id: &str, input_text: &str, spans: &[Span]) -> ExtractedRecords {
        let now = Utc::now();
        let mut records = ExtractedRecords::default();
        let mut index_to_id: Vec<Option<String>> = Vec::with_capacity(self.response.propositions.len());

        for raw in self.response.propositions {
            let content = raw.content.trim().to_string();
            if content.is_empty() {
                index_to_id.push(None);
                continue;
            }
            let lower = content.to_lowercase();
            let covered: Vec<&Span> = spans.iter().filter(|s| lower.contains(&s.text.to_lowercase())).collect();

            let subject = match raw.subject.trim() {
                "" => "user".to_string(),
                s => s.to_string(),
            };
            let proposition = Proposition {
                id: new_id(),
                unit_id: unit_id.to_string(),
                content,
                subject,
                proposition_type: PropositionType::from_label(&raw.kind),
                entity_ids: JsonList::new(),
                span_ids: covered.iter().map(|s| s.id.clone()).collect(),
                created_at: now,
            };

            let stance = raw.stance.unwrap_or_default().into_stance(&proposition.id);

            records.traces.push(ExtractionTrace {
                id: new_id(),
                proposition_id: proposition.id.clone(),
                unit_id: unit_id.to_string(),
                input_text: input_text.to_string(),
                matched_span: covered.first().copied().or(spans.first()).map(|s| s.text.clone()),
                prompt: self.prompt.clone(),
                response: self.raw.clone(),
                model: self.model.clone(),
                tokens_used: self.tokens_used,
                latency_ms: self.latency_ms,
                created_at: now,
            });

            index_to_id.push(Some(proposition.id.clone()));
            records.stances.push(stance);
            records.propositions.push(proposition);
        }

        let lookup = |index: usize| index_to_id.get(index).cloned().flatten();

        for raw in self.response.relations {
            if let (Some(source), Some(target)) = (lookup(raw.source), lookup(raw.target))
                && source != target
            {
                records.relations.push(Relation {
                    id: new_id(),
                    unit_id: unit_id.to_string(),
                    source_proposition_id: source,
                    target_proposition_id: target,
                    relation_type: match raw.relation_type.trim() {
                        "" => "related".to_string(),
                        t => t.to_lowercase(),
                    },
                    created_at: now,
                });
            }
        }

        for raw in self.response.entities {
            let text = raw.text.trim();
            if text.is_empty() {
                continue;
            }
            let mut mention = EntityMention::new(unit_id, text, MentionType::from_label(&raw.mention_type));
            mention.suggested_type = raw.suggested_type.as_deref().map(EntityType::from_label);
            mention.proposition_id = raw.proposition_index.and_then(lookup);
            records.mentions.push(mention);
        }

        records
    }
}

/// Calls the LLM client with the extraction prompt.
pub struct PropositionExtractor {
    llm: Arc<dyn LlmClient>,
    tier: ModelTier,
    options: CallOptions,
}

impl PropositionExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, tier: ModelTier, options: CallOptions) -> Self {
        Self { llm, tier, options }
    }

    pub async fn extract(&self, context: &ExtractionContext) -> Result<ExtractionOutput, LlmError> {
        let prompt = context.prompt();
        let request = LlmRequest::new(self.tier, prompt.clone())
            .with_system(SYSTEM_PROMPT)
            .with_options(self.options.clone());

        let started = Instant::now();
        let response = self.llm.call(request).await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let parsed = ExtractionResponse::parse(&response.content);
        debug!(
            propositions = parsed.propositions.len(),
            mentions = parsed.entities.len(),
            model = %response.model,
            latency_ms,
            "Extraction response parsed"
        );

        Ok(ExtractionOutput {
            prompt,
            raw: response.content,
            model: response.model,
            tokens_used: response.tokens_used,
            latency_ms,
            response: parsed,
        })
    }
}

/// Tier label from configuration; unknown labels fall back to medium.
pub fn tier_from_label(label: &str) -> ModelTier {
    match label.trim().to_lowercase().as_str() {
        "small" => ModelTier::Small,
        "large" => ModelTier::Large,
        _ => ModelTier::Medium,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kenning_providers::ScriptedClient;

    const WORRIED: &str = r#"Here is the analysis:
    {"propositions": [{"content": "I might lose my job", "subject": "job", "type": "state",
       "stance": {"epistemic": {"certainty": 0.6, "evidence": "inferred"},
                  "volitional": {"type": "fear", "strength": 0.8, "valence": -0.8},
                  "affective": {"valence": -0.7, "arousal": 0.7, "emotions": ["worry"]}}}],
     "relations": [],
     "entities": [{"text": "I", "mention_type": "self_reference", "proposition_index": 0},
                  {"text": "my job", "mention_type": "common_noun", "suggested_type": "thing", "proposition_index": 0}]}"#;

    fn span(text: &str) -> Span {
        Span {
            id: format!("span-{text}"),
            unit_id: "u1".into(),
            pattern_id: "emotion".into(),
            text: text.into(),
            start: 0,
            end: text.len(),
            created_at: Utc::now(),
        }
    }

    fn output(raw: &str) -> ExtractionOutput {
        ExtractionOutput {
            prompt: "prompt".into(),
            raw: raw.into(),
            model: "m".into(),
            tokens_used: 42,
            latency_ms: 7,
            response: ExtractionResponse::parse(raw),
        }
    }

    #[test]
    fn parses_structured_response() {
        let records = output(WORRIED).into_records("u1", "I'm really worried I might lose my job", &[span("worried")]);
        assert_eq!(records.propositions.len(), 1);
        let p = &records.propositions[0];
        assert_eq!(p.subject, "job");
        assert_eq!(p.proposition_type, PropositionType::State);

        let s = &records.stances[0];
        assert_eq!(s.proposition_id, p.id);
        let v = s.volitional.as_ref().unwrap();
        assert_eq!(v.volitional_type, VolitionalType::Fear);
        assert!(v.strength > 0.5);
        assert!(s.affective.valence < 0.0 && s.affective.arousal > 0.5);

        assert_eq!(records.mentions.len(), 2);
        assert_eq!(records.mentions[0].mention_type, MentionType::SelfReference);
        assert_eq!(records.mentions[1].suggested_type, Some(EntityType::Thing));
        assert_eq!(records.mentions[1].proposition_id.as_deref(), Some(p.id.as_str()));

        let trace = &records.traces[0];
        assert_eq!(trace.proposition_id, p.id);
        assert_eq!(trace.matched_span.as_deref(), Some("worried"));
        assert_eq!(trace.tokens_used, 42);
        assert_eq!(trace.input_text, "I'm really worried I might lose my job");
    }

    #[test]
    fn trace_prefers_covered_span_then_first_span() {
        let spans = [span("yesterday"), span("job")];
        let records = output(WORRIED).into_records("u1", "Yesterday I feared for my job", &spans);
        assert_eq!(records.traces[0].matched_span.as_deref(), Some("job"));

        let records = output(WORRIED).into_records("u1", "Yesterday I lost sleep", &spans[..1]);
        assert_eq!(records.traces[0].matched_span.as_deref(), Some("yesterday"));

        let records = output(WORRIED).into_records("u1", "I'm worried", &[]);
        assert!(records.traces[0].matched_span.is_none());
    }

    #[test]
    fn malformed_response_is_empty() {
        assert!(ExtractionResponse::parse("no json at all").propositions.is_empty());
        assert!(ExtractionResponse::parse("{\"propositions\": 5}").propositions.is_empty());
        let records = output("{broken").into_records("u1", "x", &[]);
        assert!(records.propositions.is_empty() && records.traces.is_empty());
    }

    #[test]
    fn drops_empty_propositions_and_dangling_links() {
        let raw = r#"{"propositions": [{"content": ""}, {"content": "A"}, {"content": "B", "type": "event"}],
                      "relations": [{"source": 1, "target": 2, "type": "Cause"},
                                    {"source": 0, "target": 1, "type": "cause"},
                                    {"source": 1, "target": 9}],
                      "entities": [{"text": "Sam", "mention_type": "proper_noun", "proposition_index": 0},
                                   {"text": "  "}]}"#;
        let records = output(raw).into_records("u1", "A. B.", &[]);
        assert_eq!(records.propositions.len(), 2);
        assert_eq!(records.propositions[1].proposition_type, PropositionType::Event);
        assert_eq!(records.propositions[0].subject, "user");
        assert_eq!(records.relations.len(), 1);
        assert_eq!(records.relations[0].relation_type, "cause");
        assert_eq!(records.mentions.len(), 1);
        assert!(records.mentions[0].proposition_id.is_none());
        // Missing stance becomes a neutral one.
        assert_eq!(records.stances[0].epistemic.certainty, 0.5);
        assert!(records.stances[0].volitional.is_none());
    }

    #[test]
    fn prompt_includes_context() {
        let mut sam = Entity::new("Sam", EntityType::Person);
        sam.aliases = JsonList(vec!["Samuel".into()]);
        let ctx = ExtractionContext {
            text: "He called again".into(),
            spans: vec![span("again")],
            entities: vec![sam],
            propositions: vec![],
        };
        let prompt = ctx.prompt();
        assert!(prompt.contains("He called again"));
        assert!(prompt.contains("[emotion] \"again\""));
        assert!(prompt.contains("Sam (person) aka Samuel"));
        assert!(!prompt.contains("Earlier in the conversation"));
    }

    #[tokio::test]
    async fn extractor_calls_llm_with_system_prompt() {
        let llm = Arc::new(ScriptedClient::with_responses([WORRIED]));
        let extractor = PropositionExtractor::new(llm.clone(), ModelTier::Medium, CallOptions::default());
        let ctx = ExtractionContext {
            text: "I'm really worried I might lose my job".into(),
            ..Default::default()
        };
        let out = extractor.extract(&ctx).await.unwrap();
        assert_eq!(out.response.propositions.len(), 1);
        assert_eq!(llm.calls(), 1);
        assert_eq!(llm.requests()[0].system_prompt.as_deref(), Some(SYSTEM_PROMPT));
    }

    #[test]
    fn tier_labels() {
        assert_eq!(tier_from_label("small"), ModelTier::Small);
        assert_eq!(tier_from_label("LARGE"), ModelTier::Large);
        assert_eq!(tier_from_label("??"), ModelTier::Medium);
    }
}
