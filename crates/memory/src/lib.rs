//! # Kenning Memory
//!
//! Salience scoring, confidence decay, long-term promotion, and the
//! top-of-mind snapshot.
//!
//! The scoring functions in [`salience`], [`decay`], and [`consolidation`]
//! are pure and take an explicit `now`; [`MemoryService`] applies them to
//! the store. Decay and consolidation are meant to be driven by an outside
//! scheduler and only ever patch the claim fields they own.

pub mod consolidation;
pub mod decay;
pub mod salience;
pub mod service;
pub mod top_of_mind;

pub use consolidation::consolidation_score;
pub use decay::{DecayError, DecayReport};
pub use salience::SalienceBreakdown;
pub use service::MemoryService;
pub use top_of_mind::TopOfMind;
