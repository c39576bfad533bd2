//! The 4-dimensional weighted matching engine.
//!
//! - [`vectorizer`]: quiz answers → per-dimension session vectors
//! - [`similarity`]: cosine similarity and the 0–100 rescale
//! - [`engine`]: snapshot load, candidate filtering, composite scoring, ranking
//! - [`results`]: persisted result sets

pub mod engine;
pub mod results;
pub mod similarity;
pub mod types;
pub mod vectorizer;

pub use engine::{compute, compute_matches, MatchComputation};
pub use types::{CandidateFilter, MatchError, MatchingResult, WeightingPolicy};
