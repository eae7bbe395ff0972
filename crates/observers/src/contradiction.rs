//! Contradiction detection.
//!
//! Candidates come from cheap overlap scoring; the LLM only judges the
//! shortlisted pairs. Its answer must be a JSON object of claim-id pairs.
//! Anything else, including pairs that were never proposed, is ignored.

use async_trait::async_trait;
use kenning_core::claim::{Claim, ClaimState};
use kenning_core::error::ObserverError;
use kenning_core::llm::{parse_json_block, CallOptions, LlmClient, LlmRequest, ModelTier};
use kenning_core::observation::{ObserverOutput, Trigger};
use kenning_core::store::{Query, StoreExt};
use kenning_core::text::{jaccard, keywords, shared_keywords};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::observer::{Observer, ObserverContext};

pub const KIND: &str = "contradiction";
pub const OUTPUT: &str = "contradiction";

/// Similarity assigned to claims about the same subject.
pub const SUBJECT_OVERLAP: f64 = 0.8;
/// Claims considered as candidates per run.
const POOL: usize = 500;

const SYSTEM_PROMPT: &str = "You check whether statements a person made contradict each other. \
Answer with JSON only: {\"contradictions\": [{\"claim_a\": \"<id>\", \"claim_b\": \"<id>\", \
\"type\": \"direct|temporal|implication\", \"explanation\": \"<one sentence>\"}]}. \
Use an empty list when nothing contradicts. Only use the ids given.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionType {
    /// Both cannot be true at once.
    Direct,
    /// A change of mind over time.
    Temporal,
    /// One implies the negation of the other.
    Implication,
}

#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub claim: &'a Claim,
    pub similarity: f64,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(default)]
    contradictions: Vec<Pair>,
}

#[derive(Debug, Deserialize)]
struct Pair {
    claim_a: String,
    claim_b: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    explanation: String,
}

fn subjects_overlap(a: &Claim, b: &Claim) -> bool {
    let (sa, sb) = (a.subject.trim().to_lowercase(), b.subject.trim().to_lowercase());
    if sa.is_empty() || sb.is_empty() {
        return false;
    }
    sa == sb || shared_keywords(&keywords(&sa), &keywords(&sb)) > 0
}

/// `SUBJECT_OVERLAP` for claims about the same subject, else keyword Jaccard.
pub fn similarity(a: &Claim, b: &Claim) -> f64 {
    if subjects_overlap(a, b) {
        SUBJECT_OVERLAP
    } else {
        jaccard(&keywords(&a.statement), &keywords(&b.statement))
    }
}

/// The most similar live claims to `claim`, best first.
pub fn find_candidates<'a>(claim: &Claim, pool: &'a [Claim], min_similarity: f64, max: usize) -> Vec<Candidate<'a>> {
    let mut candidates: Vec<Candidate<'a>> = pool
        .iter()
        .filter(|other| other.id != claim.id && other.state != ClaimState::Superseded)
        .map(|other| Candidate {
            claim: other,
            similarity: similarity(claim, other),
        })
        .filter(|c| c.similarity >= min_similarity)
        .collect();
    candidates.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    candidates.truncate(max);
    candidates
}

fn prompt(claim: &Claim, candidates: &[Candidate<'_>]) -> String {
    let mut text = format!("New statement [{}]: {}\n\nEarlier statements:\n", claim.id, claim.statement);
    for c in candidates {
        text.push_str(&format!("[{}]: {}\n", c.claim.id, c.claim.statement));
    }
    text.push_str("\nWhich earlier statements contradict the new one?");
    text
}

fn parse_type(raw: &str) -> Option<ContradictionType> {
    match raw.trim().to_lowercase().as_str() {
        "direct" => Some(ContradictionType::Direct),
        "temporal" => Some(ContradictionType::Temporal),
        "implication" => Some(ContradictionType::Implication),
        _ => None,
    }
}

pub struct ContradictionObserver {
    min_similarity: f64,
    max_candidates: usize,
}

impl ContradictionObserver {
    pub fn new(min_similarity: f64, max_candidates: usize) -> Self {
        Self {
            min_similarity,
            max_candidates: max_candidates.max(1),
        }
    }
}

#[async_trait]
impl Observer for ContradictionObserver {
    fn kind(&self) -> &str {
        KIND
    }

    fn triggers(&self) -> &[Trigger] {
        &[Trigger::NewClaim]
    }

    fn priority(&self) -> i32 {
        90
    }

    fn uses_llm(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &ObserverContext) -> Result<Vec<ObserverOutput>, ObserverError> {
        let llm = ctx.llm(KIND)?;
        let pool: Vec<Claim> = ctx
            .store
            .query(Query::new().sort_desc("created_at").limit(POOL))
            .await?;
        let known: Vec<ObserverOutput> = ctx.store.query(Query::new().eq("observer_type", KIND)).await?;

        let mut outputs = Vec::new();
        for claim in &ctx.claims {
            let candidates = find_candidates(claim, &pool, self.min_similarity, self.max_candidates);
            if candidates.is_empty() {
                continue;
            }

            let request = LlmRequest::new(ModelTier::Small, prompt(claim, &candidates))
                .with_system(SYSTEM_PROMPT)
                .with_options(CallOptions {
                    temperature: 0.0,
                    max_tokens: 512,
                });
            let response = llm.call(request).await.map_err(|source| ObserverError::Llm {
                observer: KIND.to_string(),
                source,
            })?;
            let Some(verdict) = parse_json_block::<Verdict>(&response.content) else {
                debug!(claim_id = %claim.id, "Unparseable contradiction verdict");
                continue;
            };

            for pair in verdict.contradictions {
                let other_id = if pair.claim_a == claim.id {
                    &pair.claim_b
                } else if pair.claim_b == claim.id {
                    &pair.claim_a
                } else {
                    continue;
                };
                let Some(candidate) = candidates.iter().find(|c| &c.claim.id == other_id) else {
                    continue;
                };
                let Some(kind) = parse_type(&pair.kind) else {
                    continue;
                };
                let ids = vec![claim.id.clone(), candidate.claim.id.clone()];
                if known.iter().chain(outputs.iter()).any(|o| ids.iter().all(|id| o.references(id))) {
                    continue;
                }
                outputs.push(ctx.output(
                    KIND,
                    OUTPUT,
                    json!({
                        "claim_a": claim.id,
                        "claim_b": candidate.claim.id,
                        "statement_a": claim.statement,
                        "statement_b": candidate.claim.statement,
                        "contradiction_type": kind,
                        "explanation": pair.explanation,
                        "similarity": candidate.similarity,
                    }),
                    ids,
                ));
            }
        }
        Ok(outputs)
    }
}
