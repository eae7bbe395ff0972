//! Extraction building blocks for Kenning.
//!
//! - [`patterns`]: keyword/regex span matching and text sanitization
//! - [`extractor`]: the LLM extraction prompt and response contract
//! - [`resolver`]: entity-mention resolution against canonical entities
//! - [`deriver`]: the proposition + stance → claim attribute rule tree
//!
//! The matcher and deriver are pure; the resolver and extractor talk to the
//! store and LLM traits from `kenning-core`.

pub mod deriver;
pub mod extractor;
pub mod patterns;
pub mod resolver;

pub use deriver::derive;
pub use extractor::{ExtractionContext, ExtractionOutput, ExtractionResponse, PropositionExtractor};
pub use patterns::{Extractor, MatchResult, PatternKind, PatternMatch, PatternMatcher};
pub use resolver::{EntityResolver, RecencyContext, ResolutionOutcome, ResolutionStats};
