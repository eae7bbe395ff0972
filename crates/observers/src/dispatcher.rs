//! Event dispatch over the observer registry.
//!
//! One event is processed at a time. Events arriving while one is in flight
//! are queued and drained in order by whichever caller started the drain.
//! Within an event, observers run concurrently; LLM-using observers share
//! a fixed number of slots, and observers with priority zero or below run
//! only after the rest have finished.

use chrono::Utc;
use futures::future::join_all;
use kenning_config::ObserverConfig;
use kenning_core::claim::Claim;
use kenning_core::event::{DomainEvent, EventBus};
use kenning_core::llm::LlmClient;
use kenning_core::observation::Trigger;
use kenning_core::store::{Store, StoreExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::observer::{Observer, ObserverContext, ObserverEvent, ObserverRegistry};

/// The outcome of one observer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverRunReport {
    pub observer: String,
    pub trigger: Trigger,
    /// Ids of the outputs persisted by this run.
    pub output_ids: Vec<String>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ObserverRunReport {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Default)]
struct DispatchState {
    queue: VecDeque<ObserverEvent>,
    busy: bool,
}

pub struct Dispatcher {
    registry: ObserverRegistry,
    store: Arc<dyn Store>,
    llm: Option<Arc<dyn LlmClient>>,
    events: Arc<EventBus>,
    llm_slots: Semaphore,
    min_run_interval: Duration,
    last_run: Mutex<HashMap<String, Instant>>,
    state: Mutex<DispatchState>,
}

impl Dispatcher {
    pub fn new(
        registry: ObserverRegistry,
        store: Arc<dyn Store>,
        llm: Option<Arc<dyn LlmClient>>,
        config: &ObserverConfig,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            store,
            llm,
            events,
            llm_slots: Semaphore::new(config.max_concurrent_llm.max(1)),
            min_run_interval: Duration::from_millis(config.min_run_interval_ms),
            last_run: Mutex::new(HashMap::new()),
            state: Mutex::new(DispatchState::default()),
        }
    }

    pub fn registry(&self) -> &ObserverRegistry {
        &self.registry
    }

    /// Queue `event` and, unless another caller is already draining, drain
    /// the queue. Returns the reports of every event this call processed;
    /// an event queued behind an active drain returns an empty vec.
    pub async fn dispatch(&self, event: ObserverEvent) -> Vec<ObserverRunReport> {
        {
            let mut state = self.state.lock().await;
            state.queue.push_back(event);
            if state.busy {
                debug!(queued = state.queue.len(), "Dispatch in progress, event queued");
                return Vec::new();
            }
            state.busy = true;
        }

        let mut reports = Vec::new();
        loop {
            let next = {
                let mut state = self.state.lock().await;
                match state.queue.pop_front() {
                    Some(event) => event,
                    None => {
                        state.busy = false;
                        break;
                    }
                }
            };
            reports.extend(self.process(next).await);
        }
        reports
    }

    /// Events waiting behind the one in flight.
    pub async fn pending(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    async fn process(&self, event: ObserverEvent) -> Vec<ObserverRunReport> {
        let mut claims = Vec::with_capacity(event.claim_ids.len());
        for id in &event.claim_ids {
            match self.store.get::<Claim>(id).await {
                Ok(Some(claim)) => claims.push(claim),
                Ok(None) => debug!(claim_id = %id, "Triggering claim not found"),
                Err(e) => warn!(claim_id = %id, error = %e, "Could not load triggering claim"),
            }
        }

        let selected = self.select(event.trigger, &claims).await;
        if selected.is_empty() {
            debug!(trigger = event.trigger.as_str(), "No observers selected");
            return Vec::new();
        }
        info!(
            trigger = event.trigger.as_str(),
            observers = selected.len(),
            "Dispatching observers"
        );

        let ctx = ObserverContext {
            store: self.store.clone(),
            llm: self.llm.clone(),
            trigger: event.trigger,
            session_id: event.session_id,
            claims,
            now: Utc::now(),
        };

        let (first, last): (Vec<_>, Vec<_>) = selected.into_iter().partition(|o| o.priority() > 0);
        let mut reports = join_all(first.iter().map(|o| self.run_one(o, &ctx))).await;
        reports.extend(join_all(last.iter().map(|o| self.run_one(o, &ctx))).await);
        reports
    }

    /// Observers that want this trigger and are past their rate limit,
    /// in priority order. Selection stamps the run time.
    async fn select(&self, trigger: Trigger, claims: &[Claim]) -> Vec<Arc<dyn Observer>> {
        let mut last_run = self.last_run.lock().await;
        let now = Instant::now();
        let mut selected = Vec::new();

        for observer in self.registry.iter() {
            if !observer.should_run(trigger, claims) {
                continue;
            }
            let interval = observer.min_run_interval().unwrap_or(self.min_run_interval);
            if let Some(at) = last_run.get(observer.kind())
                && now.duration_since(*at) < interval
            {
                debug!(observer = observer.kind(), "Rate limited, skipping");
                continue;
            }
            last_run.insert(observer.kind().to_string(), now);
            selected.push(observer.clone());
        }
        selected
    }

    async fn run_one(&self, observer: &Arc<dyn Observer>, ctx: &ObserverContext) -> ObserverRunReport {
        let _slot = if observer.uses_llm() {
            self.llm_slots.acquire().await.ok()
        } else {
            None
        };

        let started = Instant::now();
        let mut output_ids = Vec::new();
        let mut error = None;

        match observer.run(ctx).await {
            Ok(outputs) => {
                for output in outputs {
                    if let Err(e) = self.store.create(&output).await {
                        error = Some(e.to_string());
                        break;
                    }
                    output_ids.push(output.id);
                }
            }
            Err(e) => error = Some(e.to_string()),
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        match &error {
            None => debug!(observer = observer.kind(), outputs = output_ids.len(), duration_ms, "Observer finished"),
            Some(e) => warn!(observer = observer.kind(), error = %e, "Observer failed"),
        }
        self.events.publish(DomainEvent::ObserverRan {
            observer: observer.kind().to_string(),
            outputs: output_ids.len(),
            success: error.is_none(),
            duration_ms,
            timestamp: Utc::now(),
        });

        ObserverRunReport {
            observer: observer.kind().to_string(),
            trigger: ctx.trigger,
            output_ids,
            duration_ms,
            error,
        }
    }
}
