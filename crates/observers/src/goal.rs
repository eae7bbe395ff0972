//! Goal tracking: new goals, continued work, status changes, and stalls.

use async_trait::async_trait;
use chrono::Duration;
use kenning_core::claim::{Claim, ClaimType};
use kenning_core::error::ObserverError;
use kenning_core::goal::{Goal, GoalStatus};
use kenning_core::observation::{ObserverOutput, Trigger};
use kenning_core::store::{Query, StoreExt};
use kenning_core::text::{contains_any, keywords, shared_keywords};
use serde_json::json;
use tracing::debug;

use crate::observer::{Observer, ObserverContext};

pub const KIND: &str = "goal";

const ACHIEVED: &[&str] = &["achieved", "accomplished", "finished", "completed", "reached my goal", "did it"];
const ABANDONED: &[&str] = &["gave up", "giving up", "give up on", "abandoned", "no longer pursuing"];
const BLOCKED: &[&str] = &["blocked", "stuck", "can't make progress", "hit a wall"];

/// Status language in a statement, checked in this order.
pub fn status_change(statement: &str) -> Option<GoalStatus> {
    if contains_any(statement, ACHIEVED) {
        Some(GoalStatus::Achieved)
    } else if contains_any(statement, ABANDONED) {
        Some(GoalStatus::Abandoned)
    } else if contains_any(statement, BLOCKED) {
        Some(GoalStatus::Blocked)
    } else {
        None
    }
}

pub struct GoalObserver {
    stalled_after: Duration,
}

impl GoalObserver {
    pub fn new(stalled_after_days: i64) -> Self {
        Self {
            stalled_after: Duration::days(stalled_after_days.max(1)),
        }
    }

    async fn on_claim(&self, ctx: &ObserverContext, claim: &Claim, goals: &mut [Goal]) -> Result<Option<ObserverOutput>, ObserverError> {
        let words = keywords(&claim.statement);
        let best = goals
            .iter_mut()
            .filter(|g| g.status.is_open())
            .map(|g| (shared_keywords(&g.keywords, &words), g))
            .filter(|(overlap, _)| *overlap > 0)
            .max_by_key(|(overlap, _)| *overlap)
            .map(|(_, g)| g);

        let Some(goal) = best else {
            if !matches!(claim.claim_type, ClaimType::Goal | ClaimType::Intention) {
                return Ok(None);
            }
            let goal = Goal::new(claim.statement.clone(), words, claim.id.clone());
            ctx.store.create(&goal).await?;
            debug!(goal_id = %goal.id, "New goal");
            return Ok(Some(ctx.output(
                KIND,
                "goal_new",
                json!({"goal_id": goal.id, "title": goal.title}),
                vec![claim.id.clone()],
            )));
        };

        if !goal.source_claim_ids.iter().any(|id| id == &claim.id) {
            goal.source_claim_ids.push(claim.id.clone());
        }
        let previous = goal.status;
        let status = status_change(&claim.statement).unwrap_or(match previous {
            GoalStatus::Stalled => GoalStatus::Active,
            other => other,
        });
        goal.status = status;
        goal.last_referenced = ctx.now;

        ctx.store
            .update::<Goal>(
                &goal.id,
                json!({
                    "status": status,
                    "last_referenced": ctx.now.timestamp_millis(),
                    "source_claim_ids": goal.source_claim_ids.encode(),
                }),
            )
            .await?;

        let (output_type, payload) = if status != previous {
            (
                "goal_status_changed",
                json!({"goal_id": goal.id, "title": goal.title, "from": previous, "to": status}),
            )
        } else {
            ("goal_continuing", json!({"goal_id": goal.id, "title": goal.title}))
        };
        Ok(Some(ctx.output(KIND, output_type, payload, vec![claim.id.clone()])))
    }

    async fn sweep_stalled(&self, ctx: &ObserverContext, goals: &[Goal]) -> Result<Vec<ObserverOutput>, ObserverError> {
        let mut outputs = Vec::new();
        for goal in goals
            .iter()
            .filter(|g| g.status == GoalStatus::Active && ctx.now - g.last_referenced > self.stalled_after)
        {
            if ctx
                .store
                .update::<Goal>(&goal.id, json!({"status": GoalStatus::Stalled}))
                .await?
            {
                outputs.push(ctx.output(
                    KIND,
                    "goal_stalled",
                    json!({
                        "goal_id": goal.id,
                        "title": goal.title,
                        "days_since_reference": (ctx.now - goal.last_referenced).num_days(),
                    }),
                    goal.source_claim_ids.to_vec(),
                ));
            }
        }
        Ok(outputs)
    }
}

#[async_trait]
impl Observer for GoalObserver {
    fn kind(&self) -> &str {
        KIND
    }

    fn triggers(&self) -> &[Trigger] {
        &[Trigger::NewClaim, Trigger::Schedule, Trigger::Manual]
    }

    fn priority(&self) -> i32 {
        70
    }

    async fn run(&self, ctx: &ObserverContext) -> Result<Vec<ObserverOutput>, ObserverError> {
        let mut goals: Vec<Goal> = ctx.store.query(Query::new().sort_desc("last_referenced")).await?;
        if ctx.trigger != Trigger::NewClaim {
            return self.sweep_stalled(ctx, &goals).await;
        }

        let mut outputs = Vec::new();
        for claim in &ctx.claims {
            if let Some(output) = self.on_claim(ctx, claim, &mut goals).await? {
                outputs.push(output);
            }
        }
        Ok(outputs)
    }
}
