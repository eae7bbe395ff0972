//! Per-person sentiment and its trend.

use async_trait::async_trait;
use kenning_core::claim::{Claim, ClaimState};
use kenning_core::entity::{Entity, EntityType};
use kenning_core::error::ObserverError;
use kenning_core::observation::{ObserverOutput, Trigger};
use kenning_core::store::{Query, StoreExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;

use crate::observer::{Observer, ObserverContext};

pub const KIND: &str = "relationship";

const MIN_CLAIMS: usize = 2;
const TREND_DELTA: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub average_valence: f64,
    pub trend: Trend,
    /// Late-half mean minus early-half mean.
    pub delta: f64,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Aggregate valences given oldest first.
pub fn sentiment(valences: &[f64]) -> Sentiment {
    let (early, late) = valences.split_at(valences.len() / 2);
    let delta = if early.is_empty() { 0.0 } else { mean(late) - mean(early) };
    let trend = if delta > TREND_DELTA {
        Trend::Improving
    } else if delta < -TREND_DELTA {
        Trend::Declining
    } else {
        Trend::Stable
    };
    Sentiment {
        average_valence: mean(valences),
        trend,
        delta,
    }
}

pub struct RelationshipObserver;

#[async_trait]
impl Observer for RelationshipObserver {
    fn kind(&self) -> &str {
        KIND
    }

    fn triggers(&self) -> &[Trigger] {
        &[Trigger::NewClaim, Trigger::SessionEnd, Trigger::Schedule]
    }

    fn priority(&self) -> i32 {
        60
    }

    async fn run(&self, ctx: &ObserverContext) -> Result<Vec<ObserverOutput>, ObserverError> {
        let people: Vec<Entity> = ctx
            .store
            .query(Query::new().eq("entity_type", EntityType::Person))
            .await?;
        let wanted: Option<BTreeSet<&str>> = (ctx.trigger == Trigger::NewClaim).then(|| {
            ctx.claims
                .iter()
                .flat_map(|c| c.entity_ids.iter().map(String::as_str))
                .collect()
        });
        let people: Vec<&Entity> = people
            .iter()
            .filter(|p| wanted.as_ref().is_none_or(|ids| ids.contains(p.id.as_str())))
            .collect();
        if people.is_empty() {
            return Ok(Vec::new());
        }

        let claims: Vec<Claim> = ctx.store.query(Query::new().sort_asc("created_at")).await?;
        let mut outputs = Vec::new();
        for person in people {
            let about: Vec<&Claim> = claims
                .iter()
                .filter(|c| c.state != ClaimState::Superseded && c.entity_ids.iter().any(|id| id == &person.id))
                .collect();
            if about.len() < MIN_CLAIMS {
                continue;
            }
            let valences: Vec<f64> = about.iter().map(|c| c.emotional_valence).collect();
            let summary = sentiment(&valences);
            outputs.push(ctx.output(
                KIND,
                "relationship_update",
                json!({
                    "entity_id": person.id,
                    "name": person.canonical_name,
                    "claim_count": about.len(),
                    "average_valence": summary.average_valence,
                    "trend": summary.trend,
                    "delta": summary.delta,
                }),
                about.iter().map(|c| c.id.clone()).collect(),
            ));
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use kenning_core::claim::ClaimAttributes;
    use kenning_core::store::Store;
    use kenning_store::InMemoryStore;
    use std::sync::Arc;

    #[test]
    fn trend_from_halves() {
        assert_eq!(sentiment(&[-0.5, -0.4, 0.3, 0.5]).trend, Trend::Improving);
        assert_eq!(sentiment(&[0.6, 0.5, -0.2, -0.1]).trend, Trend::Declining);
        assert_eq!(sentiment(&[0.2, 0.3, 0.2]).trend, Trend::Stable);
        assert_eq!(sentiment(&[0.9]).delta, 0.0);
        assert!((sentiment(&[-0.5, -0.4, 0.3, 0.5]).average_valence - (-0.025)).abs() < 1e-9);
    }

    fn about(entity: &Entity, valence: f64, minutes_ago: i64) -> Claim {
        let mut c = Claim::from_attributes(
            "something about them",
            entity.canonical_name.as_str(),
            &ClaimAttributes {
                emotional_valence: valence,
                ..ClaimAttributes::default()
            },
        );
        c.entity_ids = vec![entity.id.clone()].into();
        c.created_at = Utc::now() - Duration::minutes(minutes_ago);
        c
    }

    #[tokio::test]
    async fn reports_people_named_by_new_claims() {
        let store = Arc::new(InMemoryStore::new());
        let sam = Entity::new("Sam", EntityType::Person);
        let alex = Entity::new("Alex", EntityType::Person);
        store.create(&sam).await.unwrap();
        store.create(&alex).await.unwrap();

        let claims = vec![about(&sam, 0.6, 30), about(&sam, 0.5, 20), about(&sam, -0.4, 10), about(&sam, -0.6, 0)];
        for c in &claims {
            store.create(c).await.unwrap();
        }
        store.create(&about(&alex, 0.1, 5)).await.unwrap();
        store.create(&about(&alex, 0.1, 4)).await.unwrap();

        let ctx = ObserverContext {
            store: store.clone() as Arc<dyn Store>,
            llm: None,
            trigger: Trigger::NewClaim,
            session_id: None,
            claims: vec![claims[3].clone()],
            now: Utc::now(),
        };
        let out = RelationshipObserver.run(&ctx).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload["name"], "Sam");
        assert_eq!(out[0].payload["trend"], "declining");
        assert_eq!(out[0].payload["claim_count"], 4);

        let sweep = ObserverContext {
            trigger: Trigger::Schedule,
            claims: vec![],
            ..ctx
        };
        assert_eq!(RelationshipObserver.run(&sweep).await.unwrap().len(), 2);
    }
}
