//! # Kenning Core
//!
//! Domain records, traits, and error definitions for the Kenning
//! extraction-and-memory core. This crate has **no backend dependencies**;
//! it defines the logical model that every other crate works against.
//!
//! ## Design Philosophy
//!
//! External collaborators (the record store and the LLM client) are traits
//! here. Implementations live in their own crates, so:
//! - Backends can be swapped via configuration
//! - Tests run against the in-memory store and a scripted LLM
//! - Every crate depends inward on core

pub mod error;
pub mod record;
pub mod unit;
pub mod proposition;
pub mod entity;
pub mod claim;
pub mod goal;
pub mod observation;
pub mod task;
pub mod store;
pub mod llm;
pub mod event;
pub mod text;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use record::{Collection, JsonList, Record};
pub use unit::{ConversationUnit, Span};
pub use proposition::{Proposition, PropositionType, Relation, Stance, ExtractionTrace};
pub use entity::{Entity, EntityMention, EntityType, MentionType};
pub use claim::{Claim, ClaimAttributes, ClaimSource, ClaimState, ClaimType, MemoryTier, Stakes, Temporality};
pub use goal::{Goal, GoalStatus};
pub use observation::{ObserverOutput, Trigger};
pub use task::{Checkpoint, PipelineStep, Task, TaskStatus};
pub use store::{Query, Store, StoreChange, StoreExt};
pub use llm::{LlmClient, LlmRequest, LlmResponse, ModelTier};
pub use event::{DomainEvent, EventBus};
