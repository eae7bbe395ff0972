//! Observer dispatch for Kenning.
//!
//! Observers are pluggable analyzers that react to new claims, session
//! ends, scheduled sweeps, and manual requests. Each one records its
//! findings as immutable observer outputs.
//!
//! | Observer        | Priority | LLM | Triggers                             |
//! |-----------------|----------|-----|--------------------------------------|
//! | contradiction   | 90       | yes | new_claim                            |
//! | concern         | 80       | no  | new_claim, session_end               |
//! | goal            | 70       | no  | new_claim, schedule, manual          |
//! | relationship    | 60       | no  | new_claim, session_end, schedule     |
//! | pattern         | 50       | no  | new_claim, schedule, manual          |
//! | narrative       | 20       | yes | session_end, schedule, manual        |
//! | consolidation   | 0        | no  | all                                  |

pub mod bridge;
pub mod concern;
pub mod consolidation;
pub mod contradiction;
pub mod dispatcher;
pub mod goal;
pub mod narrative;
pub mod observer;
pub mod pattern;
pub mod relationship;

use kenning_config::ObserverConfig;
use kenning_memory::MemoryService;
use std::sync::Arc;
use tracing::debug;

pub use bridge::spawn_bridge;
pub use dispatcher::{Dispatcher, ObserverRunReport};
pub use observer::{Observer, ObserverContext, ObserverEvent, ObserverRegistry};

/// Create a registry with every built-in observer not listed in
/// `config.disabled`.
pub fn default_registry(config: &ObserverConfig, memory: Arc<MemoryService>) -> ObserverRegistry {
    let mut consolidation = consolidation::ConsolidationObserver::new(memory.config().promotion_threshold);
    if config.auto_promote {
        consolidation = consolidation.with_promotion(memory);
    }

    let all: Vec<Arc<dyn Observer>> = vec![
        Arc::new(contradiction::ContradictionObserver::new(
            config.contradiction_min_similarity,
            config.contradiction_max_candidates,
        )),
        Arc::new(concern::ConcernObserver),
        Arc::new(goal::GoalObserver::new(config.stalled_goal_days)),
        Arc::new(relationship::RelationshipObserver),
        Arc::new(pattern::PatternObserver::new(config.pattern_min_occurrences)),
        Arc::new(narrative::NarrativeObserver::new(config.narrative_min_claims)),
        Arc::new(consolidation),
    ];

    let mut registry = ObserverRegistry::new();
    for observer in all {
        if config.disabled.iter().any(|kind| kind == observer.kind()) {
            debug!(observer = observer.kind(), "Observer disabled");
            continue;
        }
        registry.register(observer);
    }
    registry
}
