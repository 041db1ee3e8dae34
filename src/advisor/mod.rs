//! Index advisor.
//!
//! Turns the statements captured in one session into a short list of
//! single-column secondary indexes worth adding.

pub mod cache;
pub mod candidate;
pub mod job;
pub mod recommender;
pub mod scorer;

pub use cache::{CacheStats, CardinalityCache};
pub use candidate::CandidateGenerator;
pub use job::{optimize_session, spawn_optimize, AnalysisHandle, IndexApplier};
pub use recommender::{
    AdvisorOutcome, AdvisorState, AnalysisProgress, Recommendation, Recommender,
};
pub use scorer::IndexScorer;
