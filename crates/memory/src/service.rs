//! Store-backed memory operations.

use chrono::{DateTime, Utc};
use kenning_config::MemoryConfig;
use kenning_core::claim::{Claim, ClaimState, MemoryTier};
use kenning_core::entity::Entity;
use kenning_core::error::StoreError;
use kenning_core::event::{DomainEvent, EventBus};
use kenning_core::goal::Goal;
use kenning_core::store::{Query, Store, StoreExt};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::consolidation::consolidation_score;
use crate::decay::{decay_claim, DecayError, DecayReport};
use crate::salience::{breakdown, salience, SalienceBreakdown};
use crate::top_of_mind::TopOfMind;

pub struct MemoryService {
    store: Arc<dyn Store>,
    config: MemoryConfig,
    events: Arc<EventBus>,
}

impl MemoryService {
    pub fn new(store: Arc<dyn Store>, config: MemoryConfig, events: Arc<EventBus>) -> Self {
        Self { store, config, events }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn salience(&self, claim: &Claim) -> f64 {
        salience(claim, &self.config, Utc::now())
    }

    pub fn salience_breakdown(&self, claim: &Claim) -> SalienceBreakdown {
        breakdown(claim, &self.config, Utc::now())
    }

    pub fn should_promote(&self, claim: &Claim) -> bool {
        consolidation_score(claim) >= self.config.promotion_threshold
    }

    pub async fn run_decay(&self) -> DecayReport {
        self.run_decay_at(Utc::now()).await
    }

    /// Decay every eligible claim up to `now`. One failing claim is recorded
    /// in the report and the pass continues.
    pub async fn run_decay_at(&self, now: DateTime<Utc>) -> DecayReport {
        let mut report = DecayReport::default();
        let claims: Vec<Claim> = match self.store.query(Query::new()).await {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %e, "Decay pass could not load claims");
                report.errors.push(DecayError {
                    claim_id: None,
                    message: e.to_string(),
                });
                return report;
            }
        };

        for listed in &claims {
            match self.decay_one(&listed.id, now).await {
                Ok(Some(transition)) => {
                    report.processed += 1;
                    match transition {
                        Some(ClaimState::Stale) => report.became_stale += 1,
                        Some(ClaimState::Dormant) => report.became_dormant += 1,
                        _ => {}
                    }
                }
                Ok(None) => {}
                Err(message) => report.errors.push(DecayError {
                    claim_id: Some(listed.id.clone()),
                    message,
                }),
            }
        }

        info!(
            processed = report.processed,
            stale = report.became_stale,
            dormant = report.became_dormant,
            errors = report.errors.len(),
            "Decay pass finished"
        );
        self.events.publish(DomainEvent::DecayCompleted {
            processed: report.processed,
            became_stale: report.became_stale,
            became_dormant: report.became_dormant,
            errors: report.errors.len(),
            timestamp: now,
        });
        report
    }

    /// Decay a single claim from its current stored state. `Ok(None)` when it
    /// is gone or not decayable; otherwise the state it moved into, if any.
    async fn decay_one(&self, claim_id: &str, now: DateTime<Utc>) -> Result<Option<Option<ClaimState>>, String> {
        let Some(claim) = self.store.get::<Claim>(claim_id).await.map_err(|e| e.to_string())? else {
            return Ok(None);
        };
        let Some(update) = decay_claim(&claim, &self.config, now)? else {
            return Ok(None);
        };

        let transition = (update.state != claim.state).then_some(update.state);
        let mut patch = json!({
            "current_confidence": update.confidence,
            "last_decayed_at": now.timestamp_millis(),
        });
        if let Some(state) = transition {
            patch["state"] = json!(state);
        }
        if !self
            .store
            .update::<Claim>(claim_id, patch)
            .await
            .map_err(|e| e.to_string())?
        {
            return Ok(None);
        }

        self.reconcile_after_decay(&claim).await.map_err(|e| e.to_string())?;
        Ok(Some(transition))
    }

    /// Restore a supersede or reinforce that landed between reading `before`
    /// and writing its decayed values.
    async fn reconcile_after_decay(&self, before: &Claim) -> Result<(), StoreError> {
        let Some(after) = self.store.get::<Claim>(&before.id).await? else {
            return Ok(());
        };
        if after.superseded_by.is_some() {
            if after.state != ClaimState::Superseded {
                warn!(claim_id = %after.id, "Decay raced a supersede; restoring superseded state");
                self.store
                    .update::<Claim>(&after.id, json!({"state": ClaimState::Superseded}))
                    .await?;
            }
        } else if after.last_confirmed > before.last_confirmed {
            warn!(claim_id = %after.id, "Decay raced a reinforcement; restoring confirmation");
            let confidence = after
                .current_confidence
                .max(after.initial_confidence)
                .clamp(0.0, 1.0);
            self.store
                .update::<Claim>(
                    &after.id,
                    json!({
                        "current_confidence": confidence,
                        "state": ClaimState::Active,
                        "last_decayed_at": after.last_confirmed.timestamp_millis(),
                    }),
                )
                .await?;
        }
        Ok(())
    }

    /// Move a claim to long-term memory. `false` if it is missing or
    /// already long-term.
    pub async fn promote_to_long_term(&self, claim_id: &str) -> Result<bool, StoreError> {
        let Some(claim) = self.store.get::<Claim>(claim_id).await? else {
            return Ok(false);
        };
        if claim.is_long_term() {
            return Ok(false);
        }

        let now = Utc::now();
        let updated = self
            .store
            .update::<Claim>(
                claim_id,
                json!({
                    "memory_tier": MemoryTier::LongTerm,
                    "promoted_at": now.timestamp_millis(),
                }),
            )
            .await?;
        if updated {
            info!(claim_id, "Promoted claim to long-term memory");
            self.events.publish(DomainEvent::ClaimPromoted {
                claim_id: claim_id.to_string(),
                timestamp: now,
            });
        }
        Ok(updated)
    }

    /// Stamp `last_accessed` on each claim. Returns how many were found.
    pub async fn record_access(&self, claim_ids: &[String]) -> Result<usize, StoreError> {
        let now = Utc::now().timestamp_millis();
        let mut found = 0;
        for id in claim_ids {
            if self
                .store
                .update::<Claim>(id, json!({"last_accessed": now}))
                .await?
            {
                found += 1;
            }
        }
        Ok(found)
    }

    /// Confirm a claim again. `false` if missing or superseded.
    pub async fn reinforce(&self, claim_id: &str) -> Result<bool, StoreError> {
        let Some(claim) = self.store.get::<Claim>(claim_id).await? else {
            return Ok(false);
        };
        let now = Utc::now();
        let Some(patch) = claim.reinforcement_patch(now) else {
            return Ok(false);
        };
        let updated = self.store.update::<Claim>(claim_id, patch).await?;
        if updated {
            self.events.publish(DomainEvent::ClaimReinforced {
                claim_id: claim_id.to_string(),
                confirmation_count: claim.confirmation_count.saturating_add(1),
                timestamp: now,
            });
        }
        Ok(updated)
    }

    /// Persist the current salience of every non-superseded claim.
    /// Returns how many values changed.
    pub async fn refresh_salience(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let claims: Vec<Claim> = self.store.query(Query::new()).await?;
        let mut changed = 0;
        for claim in claims.iter().filter(|c| c.state != ClaimState::Superseded) {
            let value = salience(claim, &self.config, now);
            if (value - claim.salience).abs() > 1e-6
                && self
                    .store
                    .update::<Claim>(&claim.id, json!({"salience": value}))
                    .await?
            {
                changed += 1;
            }
        }
        debug!(changed, "Refreshed salience");
        Ok(changed)
    }

    /// Mark `old_id` as replaced by `new_id`. `false` if either is missing,
    /// they are the same claim, or `old_id` is already superseded.
    pub async fn supersede_claim(&self, old_id: &str, new_id: &str) -> Result<bool, StoreError> {
        if old_id == new_id {
            return Ok(false);
        }
        let (Some(old), Some(_)) = (
            self.store.get::<Claim>(old_id).await?,
            self.store.get::<Claim>(new_id).await?,
        ) else {
            return Ok(false);
        };
        if old.state == ClaimState::Superseded {
            return Ok(false);
        }
        let updated = self
            .store
            .update::<Claim>(
                old_id,
                json!({"state": ClaimState::Superseded, "superseded_by": new_id}),
            )
            .await?;
        if updated {
            info!(old = old_id, new = new_id, "Claim superseded");
        }
        Ok(updated)
    }

    pub async fn top_of_mind(&self, limit: Option<usize>) -> Result<TopOfMind, StoreError> {
        let claims: Vec<Claim> = self.store.query(Query::new()).await?;
        let entities: Vec<Entity> = self.store.query(Query::new()).await?;
        let goals: Vec<Goal> = self.store.query(Query::new()).await?;
        Ok(TopOfMind::build(
            &claims,
            &entities,
            &goals,
            &self.config,
            limit.unwrap_or(self.config.top_of_mind_limit),
            Utc::now(),
        ))
    }
}
