//! Recurring topics, emotions, and concerns.
//!
//! Claims are clustered by subject or keyword overlap. Once a cluster
//! reaches the minimum size a `pattern_detected` output is recorded; later
//! growth of the same cluster records `pattern_reinforced` against the
//! original detection instead of a second detection.

use async_trait::async_trait;
use kenning_core::claim::{Claim, ClaimState, ClaimType};
use kenning_core::error::ObserverError;
use kenning_core::observation::{ObserverOutput, Trigger};
use kenning_core::store::{Query, StoreExt};
use kenning_core::text::{jaccard, keywords};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};

use crate::observer::{Observer, ObserverContext};

pub const KIND: &str = "pattern";
pub const DETECTED: &str = "pattern_detected";
pub const REINFORCED: &str = "pattern_reinforced";

/// Claims considered per run.
const HISTORY: usize = 200;
const MIN_OVERLAP: f64 = 0.3;

pub struct PatternObserver {
    min_occurrences: usize,
}

impl PatternObserver {
    pub fn new(min_occurrences: usize) -> Self {
        Self {
            min_occurrences: min_occurrences.max(2),
        }
    }

    /// Rises with each occurrence past the minimum, capped below certainty.
    pub fn confidence(&self, occurrences: usize) -> f64 {
        let extra = occurrences.saturating_sub(self.min_occurrences) as f64;
        (0.5 + 0.1 * extra).min(0.95)
    }
}

fn category(claim_type: ClaimType) -> &'static str {
    match claim_type {
        ClaimType::Concern => "concern",
        ClaimType::Emotion => "emotion",
        _ => "topic",
    }
}

fn subject_key(claim: &Claim) -> String {
    claim.subject.trim().to_lowercase()
}

/// Claims in `history` that belong with `seed`: same subject, or enough
/// keyword overlap.
pub fn cluster<'a>(seed: &Claim, history: &'a [Claim]) -> Vec<&'a Claim> {
    let subject = subject_key(seed);
    let words = keywords(&seed.statement);
    history
        .iter()
        .filter(|c| {
            c.id == seed.id
                || (!subject.is_empty() && subject_key(c) == subject)
                || jaccard(&words, &keywords(&c.statement)) >= MIN_OVERLAP
        })
        .collect()
}

/// The seed's subject, or else the keyword most members share.
fn label(seed: &Claim, members: &[&Claim]) -> String {
    let subject = subject_key(seed);
    if !subject.is_empty() {
        return subject;
    }
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for member in members {
        for word in keywords(&member.statement) {
            *counts.entry(word).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by_key(|(_, n)| *n)
        .map(|(word, _)| word)
        .unwrap_or_default()
}

#[async_trait]
impl Observer for PatternObserver {
    fn kind(&self) -> &str {
        KIND
    }

    fn triggers(&self) -> &[Trigger] {
        &[Trigger::NewClaim, Trigger::Schedule, Trigger::Manual]
    }

    fn priority(&self) -> i32 {
        50
    }

    async fn run(&self, ctx: &ObserverContext) -> Result<Vec<ObserverOutput>, ObserverError> {
        let history: Vec<Claim> = ctx
            .store
            .query::<Claim>(Query::new().sort_desc("created_at").limit(HISTORY))
            .await?
            .into_iter()
            .filter(|c| c.state != ClaimState::Superseded)
            .collect();
        let seeds: Vec<&Claim> = if ctx.claims.is_empty() {
            history.iter().collect()
        } else {
            ctx.claims.iter().collect()
        };

        let previous: Vec<ObserverOutput> = ctx
            .store
            .query(Query::new().eq("observer_type", KIND).sort_asc("created_at"))
            .await?;

        let mut seen = HashSet::new();
        let mut outputs = Vec::new();
        for seed in seeds {
            let mut members = cluster(seed, &history);
            if !members.iter().any(|c| c.id == seed.id) {
                members.push(seed);
            }
            if members.len() < self.min_occurrences {
                continue;
            }

            let key = format!("{}:{}", category(seed.claim_type), label(seed, &members));
            if !seen.insert(key.clone()) {
                continue;
            }

            let occurrences = members.len();
            let same_key: Vec<&ObserverOutput> = previous.iter().filter(|o| o.payload["key"] == key.as_str()).collect();
            let recorded = same_key
                .iter()
                .filter_map(|o| o.payload["occurrences"].as_u64())
                .max()
                .unwrap_or(0) as usize;
            if occurrences <= recorded {
                continue;
            }

            let claim_ids: Vec<String> = members.iter().map(|c| c.id.clone()).collect();
            let confidence = self.confidence(occurrences);
            let output = match same_key.iter().find(|o| o.output_type == DETECTED) {
                Some(detected) => ctx.output(
                    KIND,
                    REINFORCED,
                    json!({
                        "pattern_id": detected.id,
                        "key": key,
                        "occurrences": occurrences,
                        "confidence": confidence,
                    }),
                    claim_ids,
                ),
                None => ctx.output(
                    KIND,
                    DETECTED,
                    json!({
                        "key": key,
                        "category": category(seed.claim_type),
                        "label": label(seed, &members),
                        "occurrences": occurrences,
                        "confidence": confidence,
                    }),
                    claim_ids,
                ),
            };
            outputs.push(output);
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kenning_core::claim::ClaimAttributes;
    use kenning_core::store::Store;
    use kenning_store::InMemoryStore;
    use std::sync::Arc;

    fn concern(statement: &str, subject: &str) -> Claim {
        Claim::from_attributes(
            statement,
            subject,
            &ClaimAttributes {
                claim_type: ClaimType::Concern,
                ..ClaimAttributes::default()
            },
        )
    }

    fn ctx(store: Arc<dyn Store>, claims: Vec<Claim>) -> ObserverContext {
        ObserverContext {
            store,
            llm: None,
            trigger: Trigger::NewClaim,
            session_id: None,
            claims,
            now: Utc::now(),
        }
    }

    #[test]
    fn confidence_ramps_with_occurrences() {
        let observer = PatternObserver::new(3);
        assert_eq!(observer.confidence(3), 0.5);
        assert!((observer.confidence(5) - 0.7).abs() < 1e-9);
        assert_eq!(observer.confidence(50), 0.95);
    }

    #[test]
    fn clusters_by_subject_or_overlap() {
        let seed = concern("I might lose my job", "job");
        let history = vec![
            seed.clone(),
            concern("Work is scary", "job"),
            concern("Might lose the job soon", "company"),
            concern("The weather is nice", "weather"),
        ];
        let members = cluster(&seed, &history);
        assert_eq!(members.len(), 3);
    }

    #[tokio::test]
    async fn detects_once_then_reinforces() {
        let store = Arc::new(InMemoryStore::new());
        let observer = PatternObserver::new(3);
        let claims = vec![
            concern("I might lose my job", "job"),
            concern("My job feels shaky", "job"),
        ];
        for c in &claims {
            store.create(c).await.unwrap();
        }

        // Two occurrences: below the minimum.
        let out = observer.run(&ctx(store.clone(), vec![claims[1].clone()])).await.unwrap();
        assert!(out.is_empty());

        let third = concern("Worried about my job again", "job");
        store.create(&third).await.unwrap();
        let out = observer.run(&ctx(store.clone(), vec![third.clone()])).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].output_type, DETECTED);
        assert_eq!(out[0].payload["key"], "concern:job");
        store.create(&out[0]).await.unwrap();

        // Same cluster size again: nothing new.
        let out = observer.run(&ctx(store.clone(), vec![third])).await.unwrap();
        assert!(out.is_empty());

        let fourth = concern("The job situation keeps me up", "job");
        store.create(&fourth).await.unwrap();
        let detected_id = {
            let all: Vec<ObserverOutput> = store.query(Query::new()).await.unwrap();
            all[0].id.clone()
        };
        let out = observer.run(&ctx(store.clone(), vec![fourth])).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].output_type, REINFORCED);
        assert_eq!(out[0].payload["pattern_id"], detected_id.as_str());
        assert_eq!(out[0].payload["occurrences"], 4);
    }
}
