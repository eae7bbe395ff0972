//! # Kenning Pipeline
//!
//! Turns conversation units into propositions, entities, and claims.
//!
//! Each unit gets one durable [`Task`](kenning_core::Task) that walks
//! `preprocess → extract → resolve → derive → complete`, persisting a
//! checkpoint after every step. The [`TaskQueue`] drains pending tasks one
//! at a time through a single-slot semaphore; a task that fails is marked
//! `failed` and the queue moves on.

pub mod queue;
pub mod steps;

#[cfg(test)]
pub(crate) mod test_support;

pub use queue::{QueueStatus, TaskQueue};
pub use steps::{ingest_unit, Pipeline};
