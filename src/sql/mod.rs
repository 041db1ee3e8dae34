//! SQL text analysis: clause extraction and normalization.

pub mod extractor;
pub mod normalize;

pub use extractor::{ClauseExtractor, ColumnRef, ExtractedClauses};
pub use normalize::{normalize, StatementKind, PLACEHOLDER};
