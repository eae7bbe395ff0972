//! Turns domain events into observer dispatches.

use kenning_core::event::{DomainEvent, EventBus};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::dispatcher::Dispatcher;
use crate::observer::ObserverEvent;

/// The dispatch a domain event calls for, if any.
pub fn observer_event(event: &DomainEvent) -> Option<ObserverEvent> {
    match event {
        DomainEvent::ClaimCreated { claim_id, session_id, .. } => {
            Some(ObserverEvent::new_claim(claim_id.clone(), session_id.clone()))
        }
        _ => None,
    }
}

/// Subscribe to `events` and dispatch every new claim until the bus closes.
pub fn spawn_bridge(dispatcher: Arc<Dispatcher>, events: &EventBus) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(dispatch) = observer_event(&event) {
                        let reports = dispatcher.dispatch(dispatch).await;
                        debug!(runs = reports.len(), "Bridged new claim");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Observer bridge fell behind, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
