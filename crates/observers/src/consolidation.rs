//! Flags claims worth keeping long-term, and optionally promotes them.
//!
//! Runs last for every event so that earlier observers see claims in their
//! working-tier state.

use async_trait::async_trait;
use kenning_core::claim::{Claim, ClaimState};
use kenning_core::error::ObserverError;
use kenning_core::observation::{ObserverOutput, Trigger};
use kenning_core::store::{Query, StoreExt};
use kenning_memory::{consolidation_score, MemoryService};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::observer::{Observer, ObserverContext};

pub const KIND: &str = "consolidation";
pub const OUTPUT: &str = "consolidation_candidate";

pub struct ConsolidationObserver {
    threshold: f64,
    /// Promotes flagged claims when set.
    promoter: Option<Arc<MemoryService>>,
}

impl ConsolidationObserver {
    pub fn new(threshold: f64) -> Self {
        Self { threshold, promoter: None }
    }

    pub fn with_promotion(mut self, memory: Arc<MemoryService>) -> Self {
        self.promoter = Some(memory);
        self
    }
}

#[async_trait]
impl Observer for ConsolidationObserver {
    fn kind(&self) -> &str {
        KIND
    }

    fn triggers(&self) -> &[Trigger] {
        &[Trigger::NewClaim, Trigger::SessionEnd, Trigger::Schedule, Trigger::Manual]
    }

    fn priority(&self) -> i32 {
        0
    }

    async fn run(&self, ctx: &ObserverContext) -> Result<Vec<ObserverOutput>, ObserverError> {
        let scope: Vec<Claim> = if ctx.trigger == Trigger::NewClaim {
            ctx.claims.clone()
        } else {
            ctx.store.query(Query::new().sort_asc("created_at")).await?
        };
        let flagged: Vec<ObserverOutput> = ctx.store.query(Query::new().eq("output_type", OUTPUT)).await?;

        let mut outputs = Vec::new();
        for claim in scope
            .iter()
            .filter(|c| !c.is_long_term() && c.state != ClaimState::Superseded)
        {
            if flagged.iter().any(|o| o.references(&claim.id)) {
                continue;
            }
            let score = consolidation_score(claim);
            if score < self.threshold {
                continue;
            }

            let promoted = match &self.promoter {
                Some(memory) => memory.promote_to_long_term(&claim.id).await?,
                None => false,
            };
            if promoted {
                info!(claim_id = %claim.id, score, "Consolidated into long-term memory");
            }
            outputs.push(ctx.output(
                KIND,
                OUTPUT,
                json!({
                    "claim_id": claim.id,
                    "score": score,
                    "promoted": promoted,
                }),
                vec![claim.id.clone()],
            ));
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kenning_config::MemoryConfig;
    use kenning_core::claim::{ClaimAttributes, ClaimType, MemoryTier, Stakes};
    use kenning_core::event::EventBus;
    use kenning_core::store::Store;
    use kenning_store::InMemoryStore;

    fn strong() -> Claim {
        let mut c = Claim::from_attributes(
            "It's important that I finish this degree",
            "degree",
            &ClaimAttributes {
                claim_type: ClaimType::Commitment,
                stakes: Stakes::High,
                emotional_intensity: 0.8,
                ..ClaimAttributes::default()
            },
        );
        c.confirmation_count = 3;
        c
    }

    fn ctx(store: Arc<dyn Store>, trigger: Trigger, claims: Vec<Claim>) -> ObserverContext {
        ObserverContext {
            store,
            llm: None,
            trigger,
            session_id: None,
            claims,
            now: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn flags_without_promoting_by_default() {
        let store = Arc::new(InMemoryStore::new());
        let weak = Claim::from_attributes("meh", "x", &ClaimAttributes::default());
        let keeper = strong();
        let out = ConsolidationObserver::new(0.6)
            .run(&ctx(store.clone(), Trigger::NewClaim, vec![weak, keeper.clone()]))
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload["claim_id"], keeper.id.as_str());
        assert_eq!(out[0].payload["promoted"], false);
    }

    #[tokio::test]
    async fn promotes_once_when_enabled() {
        let store = Arc::new(InMemoryStore::new());
        let keeper = strong();
        store.create(&keeper).await.unwrap();
        let memory = Arc::new(MemoryService::new(
            store.clone(),
            MemoryConfig::default(),
            Arc::new(EventBus::default()),
        ));
        let observer = ConsolidationObserver::new(0.6).with_promotion(memory);

        let out = observer.run(&ctx(store.clone(), Trigger::Schedule, vec![])).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload["promoted"], true);
        store.create(&out[0]).await.unwrap();

        let reloaded: Claim = store.get(&keeper.id).await.unwrap().unwrap();
        assert_eq!(reloaded.memory_tier, MemoryTier::LongTerm);

        // Long-term now, and already flagged.
        assert!(observer.run(&ctx(store.clone(), Trigger::Schedule, vec![])).await.unwrap().is_empty());
    }
}
