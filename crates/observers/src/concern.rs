//! Concerns: new worries as they appear, and their resolution at session end.

use async_trait::async_trait;
use kenning_core::claim::{Claim, ClaimType};
use kenning_core::error::ObserverError;
use kenning_core::observation::{ObserverOutput, Trigger};
use kenning_core::store::{Query, StoreExt};
use kenning_core::text::{contains_any, keywords, shared_keywords};
use serde_json::json;

use crate::observer::{Observer, ObserverContext};

pub const KIND: &str = "concern";
pub const NEW: &str = "concern_new";
pub const RECURRING: &str = "concern_recurring";
pub const RESOLVED: &str = "concern_resolved";

const RESOLUTION: &[&str] = &[
    "resolved",
    "sorted out",
    "worked out",
    "figured out",
    "no longer worried",
    "not worried anymore",
    "not worried about",
    "relieved",
    "fixed",
    "all good now",
];

/// Negative and aroused enough to count as a worry, or typed as one.
pub fn is_concern(claim: &Claim) -> bool {
    claim.claim_type == ClaimType::Concern || (claim.emotional_valence < -0.3 && claim.emotional_intensity > 0.5)
}

fn subject_of(output: &ObserverOutput) -> &str {
    output.payload["subject"].as_str().unwrap_or_default()
}

pub struct ConcernObserver;

impl ConcernObserver {
    async fn on_new_claims(&self, ctx: &ObserverContext) -> Result<Vec<ObserverOutput>, ObserverError> {
        let mut raised: Vec<ObserverOutput> = ctx.store.query(Query::new().eq("output_type", NEW)).await?;
        let recurring: Vec<ObserverOutput> = ctx.store.query(Query::new().eq("output_type", RECURRING)).await?;
        let mut outputs: Vec<ObserverOutput> = Vec::new();

        for claim in ctx.claims.iter().filter(|c| is_concern(c)) {
            let recorded = raised
                .iter()
                .chain(&recurring)
                .chain(&outputs)
                .any(|o| o.references(&claim.id));
            if recorded {
                continue;
            }
            let subject = claim.subject.trim().to_lowercase();
            let earlier = raised.iter().find(|o| !subject.is_empty() && subject_of(o) == subject);
            let (output_type, payload) = match earlier {
                Some(first) => (
                    RECURRING,
                    json!({
                        "claim_id": claim.id,
                        "concern_output_id": first.id,
                        "subject": subject,
                        "statement": claim.statement,
                    }),
                ),
                None => (
                    NEW,
                    json!({
                        "claim_id": claim.id,
                        "subject": subject,
                        "statement": claim.statement,
                        "valence": claim.emotional_valence,
                        "intensity": claim.emotional_intensity,
                        "stakes": claim.stakes,
                    }),
                ),
            };
            let output = ctx.output(KIND, output_type, payload, vec![claim.id.clone()]);
            if output_type == NEW {
                raised.push(output.clone());
            }
            outputs.push(output);
        }
        Ok(outputs)
    }

    /// Match open concerns against resolution language said this session.
    async fn on_session_end(&self, ctx: &ObserverContext) -> Result<Vec<ObserverOutput>, ObserverError> {
        let Some(session_id) = ctx.session_id.as_deref() else {
            return Ok(Vec::new());
        };
        let raised: Vec<ObserverOutput> = ctx.store.query(Query::new().eq("output_type", NEW)).await?;
        let resolved: Vec<ObserverOutput> = ctx.store.query(Query::new().eq("output_type", RESOLVED)).await?;
        let said: Vec<Claim> = ctx
            .store
            .query(Query::new().eq("session_id", session_id).sort_asc("created_at"))
            .await?;
        let resolving: Vec<&Claim> = said.iter().filter(|c| contains_any(&c.statement, RESOLUTION)).collect();
        if resolving.is_empty() {
            return Ok(Vec::new());
        }

        let mut outputs = Vec::new();
        for concern in &raised {
            let Some(concern_claim) = concern.payload["claim_id"].as_str() else {
                continue;
            };
            if resolved.iter().any(|r| r.payload["concern_output_id"] == concern.id.as_str()) {
                continue;
            }
            let subject = subject_of(concern);
            let words = keywords(concern.payload["statement"].as_str().unwrap_or_default());
            let resolver = resolving.iter().find(|c| {
                c.id != concern_claim
                    && ((!subject.is_empty() && c.subject.trim().to_lowercase() == subject)
                        || shared_keywords(&words, &keywords(&c.statement)) > 0)
            });
            if let Some(claim) = resolver {
                outputs.push(ctx.output(
                    KIND,
                    RESOLVED,
                    json!({
                        "concern_output_id": concern.id,
                        "concern_claim_id": concern_claim,
                        "resolving_claim_id": claim.id,
                        "subject": subject,
                    }),
                    vec![concern_claim.to_string(), claim.id.clone()],
                ));
            }
        }
        Ok(outputs)
    }
}

#[async_trait]
impl Observer for ConcernObserver {
    fn kind(&self) -> &str {
        KIND
    }

    fn triggers(&self) -> &[Trigger] {
        &[Trigger::NewClaim, Trigger::SessionEnd]
    }

    fn priority(&self) -> i32 {
        80
    }

    async fn run(&self, ctx: &ObserverContext) -> Result<Vec<ObserverOutput>, ObserverError> {
        match ctx.trigger {
            Trigger::SessionEnd => self.on_session_end(ctx).await,
            _ => self.on_new_claims(ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kenning_core::claim::ClaimAttributes;
    use kenning_core::store::Store;
    use kenning_store::InMemoryStore;
    use std::sync::Arc;

    fn ctx(store: Arc<dyn Store>, trigger: Trigger, session: Option<&str>, claims: Vec<Claim>) -> ObserverContext {
        ObserverContext {
            store,
            llm: None,
            trigger,
            session_id: session.map(String::from),
            claims,
            now: chrono::Utc::now(),
        }
    }

    fn worry(statement: &str, subject: &str) -> Claim {
        Claim::from_attributes(
            statement,
            subject,
            &ClaimAttributes {
                emotional_valence: -0.7,
                emotional_intensity: 0.8,
                ..ClaimAttributes::default()
            },
        )
    }

    #[test]
    fn heuristic_or_type() {
        assert!(is_concern(&worry("x", "y")));
        let calm = Claim::from_attributes("x", "y", &ClaimAttributes::default());
        assert!(!is_concern(&calm));
        let typed = Claim::from_attributes(
            "x",
            "y",
            &ClaimAttributes {
                claim_type: ClaimType::Concern,
                ..ClaimAttributes::default()
            },
        );
        assert!(is_concern(&typed));
    }

    #[tokio::test]
    async fn new_then_recurring() {
        let store = Arc::new(InMemoryStore::new());
        let first = worry("I might lose my job", "job");
        let out = ConcernObserver
            .run(&ctx(store.clone(), Trigger::NewClaim, None, vec![first.clone()]))
            .await
            .unwrap();
        assert_eq!(out[0].output_type, NEW);
        store.create(&out[0]).await.unwrap();

        // Already recorded for this claim.
        let again = ConcernObserver
            .run(&ctx(store.clone(), Trigger::NewClaim, None, vec![first]))
            .await
            .unwrap();
        assert!(again.is_empty());

        let second = worry("Layoffs are coming", "job");
        let out = ConcernObserver
            .run(&ctx(store.clone(), Trigger::NewClaim, None, vec![second]))
            .await
            .unwrap();
        assert_eq!(out[0].output_type, RECURRING);
    }

    #[tokio::test]
    async fn recurring_concern_is_recorded_once() {
        let store = Arc::new(InMemoryStore::new());
        let first = worry("I might lose my job", "job");
        let out = ConcernObserver
            .run(&ctx(store.clone(), Trigger::NewClaim, None, vec![first]))
            .await
            .unwrap();
        store.create(&out[0]).await.unwrap();

        let second = worry("Layoffs are coming", "job");
        let out = ConcernObserver
            .run(&ctx(store.clone(), Trigger::NewClaim, None, vec![second.clone()]))
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].output_type, RECURRING);
        store.create(&out[0]).await.unwrap();

        let again = ConcernObserver
            .run(&ctx(store.clone(), Trigger::NewClaim, None, vec![second]))
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn same_subject_in_one_batch_recurs_against_the_first() {
        let store = Arc::new(InMemoryStore::new());
        let first = worry("I might lose my job", "job");
        let second = worry("Layoffs are coming", "job");
        let out = ConcernObserver
            .run(&ctx(store.clone(), Trigger::NewClaim, None, vec![first, second]))
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].output_type, NEW);
        assert_eq!(out[1].output_type, RECURRING);
        assert_eq!(out[1].payload["concern_output_id"], json!(out[0].id));
    }

    #[tokio::test]
    async fn session_end_finds_resolution() {
        let store = Arc::new(InMemoryStore::new());
        let mut raised = worry("I might lose my job", "job");
        raised.session_id = Some("s1".into());
        store.create(&raised).await.unwrap();
        let out = ConcernObserver
            .run(&ctx(store.clone(), Trigger::NewClaim, None, vec![raised.clone()]))
            .await
            .unwrap();
        store.create(&out[0]).await.unwrap();

        let mut relief = Claim::from_attributes("The job thing got sorted out", "job", &ClaimAttributes::default());
        relief.session_id = Some("s2".into());
        store.create(&relief).await.unwrap();

        let none = ConcernObserver
            .run(&ctx(store.clone(), Trigger::SessionEnd, Some("s1"), vec![]))
            .await
            .unwrap();
        assert!(none.is_empty());

        let out = ConcernObserver
            .run(&ctx(store.clone(), Trigger::SessionEnd, Some("s2"), vec![]))
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].output_type, RESOLVED);
        assert!(out[0].references(&raised.id));
        assert!(out[0].references(&relief.id));
        store.create(&out[0]).await.unwrap();

        let twice = ConcernObserver
            .run(&ctx(store.clone(), Trigger::SessionEnd, Some("s2"), vec![]))
            .await
            .unwrap();
        assert!(twice.is_empty());
    }
}
