//! Index scoring.
//!
//! The score is the expected fraction of the table a lookup through the index
//! would still read. Values are assumed to be evenly distributed across a
//! column's distinct values, so the fraction is `1 / cardinality`.

use std::collections::HashMap;

use crate::catalog::{DBIndex, DBTable};
use crate::config::AdvisorConfig;

/// Scores candidate indexes against a table snapshot.
#[derive(Debug, Clone, Copy)]
pub struct IndexScorer<'a> {
    config: &'a AdvisorConfig,
}

impl<'a> IndexScorer<'a> {
    pub fn new(config: &'a AdvisorConfig) -> Self {
        Self { config }
    }

    /// Whether the candidate's column type can carry a useful index.
    /// Unknown columns are not scorable.
    pub fn is_scorable(&self, candidate: &DBIndex, table: &DBTable) -> bool {
        table
            .column(&candidate.column)
            .map(|c| self.config.is_indexable_type(&c.data_type))
            .unwrap_or(false)
    }

    /// Score in `[0, 1]`; lower is better.
    pub fn score(&self, candidate: &DBIndex, table: &DBTable) -> f64 {
        let cardinality = candidate
            .cardinality
            .or_else(|| table.column(&candidate.column).and_then(|c| c.cardinality))
            .unwrap_or(self.config.default_cardinality)
            .max(1) as f64;
        let total_rows = table.total_rows.max(1) as f64;

        let rows_fetched_on_average = total_rows / cardinality;
        (rows_fetched_on_average / total_rows).clamp(0.0, 1.0)
    }

    /// Drop unscorable candidates and fill in `score` for the rest.
    /// Candidates on tables missing from `tables` are dropped too.
    pub fn score_all(
        &self,
        candidates: Vec<DBIndex>,
        tables: &HashMap<String, DBTable>,
    ) -> Vec<DBIndex> {
        candidates
            .into_iter()
            .filter_map(|mut c| {
                let table = tables.get(&c.table)?;
                if !self.is_scorable(&c, table) {
                    return None;
                }
                c.score = self.score(&c, table);
                Some(c)
            })
            .collect()
    }
}
