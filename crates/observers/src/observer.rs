//! Observer trait: the abstraction over claim analyzers.
//!
//! Observers are registered in an [`ObserverRegistry`] and run by the
//! dispatcher whenever a matching event arrives. An observer returns the
//! findings it wants recorded; the dispatcher persists them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kenning_core::claim::{Claim, ClaimType};
use kenning_core::error::ObserverError;
use kenning_core::llm::LlmClient;
use kenning_core::observation::{ObserverOutput, Trigger};
use kenning_core::store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Something that happened and may interest observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverEvent {
    pub trigger: Trigger,

    /// Claims that caused a `new_claim` event. Empty for other triggers.
    #[serde(default)]
    pub claim_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl ObserverEvent {
    pub fn new(trigger: Trigger) -> Self {
        Self {
            trigger,
            claim_ids: Vec::new(),
            session_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn new_claim(claim_id: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            claim_ids: vec![claim_id.into()],
            session_id,
            ..Self::new(Trigger::NewClaim)
        }
    }

    pub fn session_end(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::new(Trigger::SessionEnd)
        }
    }
}

/// Everything an observer run can see.
pub struct ObserverContext {
    pub store: Arc<dyn Store>,
    pub llm: Option<Arc<dyn LlmClient>>,
    pub trigger: Trigger,
    pub session_id: Option<String>,
    /// The triggering claims, loaded once per event.
    pub claims: Vec<Claim>,
    pub now: DateTime<Utc>,
}

impl ObserverContext {
    /// The LLM client, or `LlmUnavailable` naming the observer.
    pub fn llm(&self, observer: &str) -> Result<&Arc<dyn LlmClient>, ObserverError> {
        self.llm.as_ref().ok_or_else(|| ObserverError::LlmUnavailable {
            observer: observer.to_string(),
        })
    }

    pub fn output(&self, observer: &str, output_type: &str, payload: serde_json::Value, claim_ids: Vec<String>) -> ObserverOutput {
        ObserverOutput::new(observer, output_type, self.trigger, payload, claim_ids)
    }
}

/// The core Observer trait.
///
/// Each analyzer (pattern, goal, concern, relationship, contradiction,
/// narrative, consolidation) implements this trait.
#[async_trait]
pub trait Observer: Send + Sync {
    /// Unique type id (e.g., "pattern", "contradiction").
    fn kind(&self) -> &str;

    fn triggers(&self) -> &[Trigger];

    /// Only run for `new_claim` events carrying one of these claim types.
    fn claim_types(&self) -> Option<&[ClaimType]> {
        None
    }

    /// Higher runs first. Zero or below runs after everything else.
    fn priority(&self) -> i32;

    fn uses_llm(&self) -> bool {
        false
    }

    /// Override the dispatcher's default rate limit.
    fn min_run_interval(&self) -> Option<Duration> {
        None
    }

    /// Whether this observer wants the event at all.
    fn should_run(&self, trigger: Trigger, claims: &[Claim]) -> bool {
        if !self.triggers().contains(&trigger) {
            return false;
        }
        match (trigger, self.claim_types()) {
            (Trigger::NewClaim, Some(types)) => claims.iter().any(|c| types.contains(&c.claim_type)),
            _ => true,
        }
    }

    /// Analyze and return findings. An empty vec is a no-op run.
    async fn run(&self, ctx: &ObserverContext) -> Result<Vec<ObserverOutput>, ObserverError>;
}

/// Registered observers, kept in descending priority order.
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn Observer>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self { observers: Vec::new() }
    }

    /// Register an observer. Replaces any existing one with the same kind.
    pub fn register(&mut self, observer: Arc<dyn Observer>) {
        self.observers.retain(|o| o.kind() != observer.kind());
        let at = self
            .observers
            .iter()
            .position(|o| o.priority() < observer.priority())
            .unwrap_or(self.observers.len());
        self.observers.insert(at, observer);
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn Observer>> {
        self.observers.iter().find(|o| o.kind() == kind)
    }

    /// Observers in the order they would run.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Observer>> {
        self.observers.iter()
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.observers.iter().map(|o| o.kind()).collect()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
