//! Domain event system: decoupled communication between bounded contexts.
//!
//! The pipeline publishes claim events; the observer bridge subscribes and
//! turns them into dispatches. Other consumers (CLI progress, logging) can
//! subscribe without the publishers knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::claim::ClaimType;
use crate::task::TaskStatus;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A conversation unit was stored
    UnitIngested {
        unit_id: String,
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A pipeline task changed status
    TaskStateChanged {
        task_id: String,
        unit_id: String,
        status: TaskStatus,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// The deriver produced a new claim
    ClaimCreated {
        claim_id: String,
        claim_type: ClaimType,
        session_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// An existing claim was confirmed again
    ClaimReinforced {
        claim_id: String,
        confirmation_count: u32,
        timestamp: DateTime<Utc>,
    },

    /// An observer finished a run
    ObserverRan {
        observer: String,
        outputs: usize,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A decay pass finished
    DecayCompleted {
        processed: usize,
        became_stale: usize,
        became_dormant: usize,
        errors: usize,
        timestamp: DateTime<Utc>,
    },

    /// A claim moved to long-term memory
    ClaimPromoted {
        claim_id: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ClaimCreated {
            claim_id: "c1".into(),
            claim_type: ClaimType::Concern,
            session_id: Some("s1".into()),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ClaimCreated { claim_id, claim_type, .. } => {
                assert_eq!(claim_id, "c1");
                assert_eq!(*claim_type, ClaimType::Concern);
            }
            _ => panic!("Expected ClaimCreated event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::ClaimPromoted {
            claim_id: "c1".into(),
            timestamp: Utc::now(),
        });
    }
}
