//! Session-level index recommendation.
//!
//! Analysis runs as a small state machine:
//!
//! ```text
//! Idle -> Collecting -> Enriching -> Scored -> Recommended | NoSuggestions | Failed
//! ```
//!
//! `Collecting` describes every referenced table once (coarse shape and row
//! count). `Enriching` runs exact distinct counts only for the columns that
//! survived candidate filtering. Each relevant query then votes for its best
//! candidate with its own duration, and candidates whose accumulated time
//! clears the significance threshold are recommended.
//!
//! Cancellation is checked between tables, between queries and between
//! enriched columns.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::cache::CardinalityCache;
use super::candidate::CandidateGenerator;
use super::scorer::IndexScorer;
use crate::catalog::{ColumnKey, DBIndex, DBTable, TableStatsProvider};
use crate::config::AdvisorConfig;
use crate::error::{QueryWatchError, Result};
use crate::recorder::CapturedQuery;
use crate::sql::{ClauseExtractor, ExtractedClauses, StatementKind};

/// A proposed secondary index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub table: String,
    pub column: String,
    /// Sum of the durations of the queries this index would serve
    pub cumulative_time_saved_ms: f64,
    pub query_count: usize,
    /// Best score observed for this candidate
    pub score: f64,
}

impl Recommendation {
    pub fn key(&self) -> ColumnKey {
        ColumnKey::new(self.table.clone(), self.column.clone())
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} (saves ~{:.2} ms over {} quer{}, score {:.4})",
            self.table,
            self.column,
            self.cumulative_time_saved_ms,
            self.query_count,
            if self.query_count == 1 { "y" } else { "ies" },
            self.score
        )
    }
}

/// Where an analysis run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvisorState {
    Idle,
    Collecting,
    Enriching,
    Scored,
    Recommended,
    NoSuggestions,
    Failed,
    Cancelled,
}

impl AdvisorState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AdvisorState::Recommended
                | AdvisorState::NoSuggestions
                | AdvisorState::Failed
                | AdvisorState::Cancelled
        )
    }
}

/// Result of analysing one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AdvisorOutcome {
    Recommended(Vec<Recommendation>),
    /// Analysis ran and nothing needs to be done
    NoSuggestions,
    /// Some referenced tables could not be described. Queries touching them
    /// were skipped; `partial` holds what the remaining queries produced.
    Failed {
        missing_tables: Vec<String>,
        partial: Vec<Recommendation>,
    },
}

impl AdvisorOutcome {
    pub fn recommendations(&self) -> &[Recommendation] {
        match self {
            AdvisorOutcome::Recommended(recs) => recs,
            AdvisorOutcome::NoSuggestions => &[],
            AdvisorOutcome::Failed { partial, .. } => partial,
        }
    }

    pub fn missing_tables(&self) -> &[String] {
        match self {
            AdvisorOutcome::Failed { missing_tables, .. } => missing_tables,
            _ => &[],
        }
    }

    pub fn state(&self) -> AdvisorState {
        match self {
            AdvisorOutcome::Recommended(_) => AdvisorState::Recommended,
            AdvisorOutcome::NoSuggestions => AdvisorState::NoSuggestions,
            AdvisorOutcome::Failed { .. } => AdvisorState::Failed,
        }
    }
}

/// Shared view of a running analysis: current state plus a cancel switch.
#[derive(Debug)]
pub struct AnalysisProgress {
    state: RwLock<AdvisorState>,
    cancelled: AtomicBool,
}

impl Default for AnalysisProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisProgress {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(AdvisorState::Idle),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> AdvisorState {
        *self.state.read()
    }

    /// Ask the run to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn transition(&self, next: AdvisorState) {
        let mut state = self.state.write();
        let previous = *state;
        debug!(from = ?previous, to = ?next, "advisor state transition");
        *state = next;
    }

    fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            self.transition(AdvisorState::Cancelled);
            return Err(QueryWatchError::Cancelled);
        }
        Ok(())
    }
}

/// A query that passed the relevance filter.
struct RelevantQuery {
    duration_ms: f64,
    clauses: ExtractedClauses,
}

#[derive(Default)]
struct Aggregate {
    time_ms: f64,
    queries: usize,
    best_score: f64,
}

/// Analyses captured queries against live table statistics.
pub struct Recommender {
    provider: Arc<dyn TableStatsProvider>,
    cache: Arc<CardinalityCache>,
    config: AdvisorConfig,
}

impl Recommender {
    pub fn new(provider: Arc<dyn TableStatsProvider>, config: AdvisorConfig) -> Self {
        let cache = Arc::new(CardinalityCache::new(config.cardinality_ttl));
        Self {
            provider,
            cache,
            config,
        }
    }

    /// Share a cardinality cache between recommenders.
    pub fn with_cache(mut self, cache: Arc<CardinalityCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CardinalityCache> {
        &self.cache
    }

    pub fn analyze(&self, queries: &[CapturedQuery]) -> Result<AdvisorOutcome> {
        self.analyze_with(queries, &AnalysisProgress::new())
    }

    /// Run the full pipeline, reporting state to `progress` and honouring
    /// its cancel switch at every checkpoint.
    pub fn analyze_with(
        &self,
        queries: &[CapturedQuery],
        progress: &AnalysisProgress,
    ) -> Result<AdvisorOutcome> {
        progress.checkpoint()?;
        progress.transition(AdvisorState::Collecting);

        let total_ms: f64 = queries.iter().map(|q| q.duration_ms).sum();
        let threshold = total_ms / self.config.significance_divisor;
        let relevant = self.relevant_queries(queries, threshold);
        debug!(
            captured = queries.len(),
            relevant = relevant.len(),
            threshold_ms = threshold,
            "filtered captured queries"
        );

        // Pass 1: coarse table shape for every referenced table
        let referenced: BTreeSet<&str> = relevant
            .iter()
            .flat_map(|q| q.clauses.tables.iter().map(String::as_str))
            .collect();
        let mut tables: HashMap<String, DBTable> = HashMap::new();
        let mut missing: BTreeSet<String> = BTreeSet::new();
        let mut unavailable: BTreeSet<String> = BTreeSet::new();
        for name in referenced {
            progress.checkpoint()?;
            match self.describe(name) {
                Ok(Some(table)) => {
                    tables.insert(name.to_string(), table);
                }
                Ok(None) => {
                    missing.insert(name.to_string());
                }
                Err(err) if err.is_statement_local() => {
                    warn!(table = name, error = %err, "describing table failed, skipping its queries");
                    unavailable.insert(name.to_string());
                }
                Err(err) => return Err(err),
            }
        }
        if !missing.is_empty() {
            warn!(tables = ?missing, "referenced tables no longer exist");
        }

        progress.transition(AdvisorState::Enriching);
        let generator = CandidateGenerator::new(&self.config);
        let scorer = IndexScorer::new(&self.config);

        let mut per_query: Vec<(f64, Vec<DBIndex>)> = Vec::new();
        for query in &relevant {
            progress.checkpoint()?;
            if query
                .clauses
                .tables
                .iter()
                .any(|t| missing.contains(t) || unavailable.contains(t))
            {
                continue;
            }
            let candidates: Vec<DBIndex> = generator
                .generate(&query.clauses, &tables)
                .into_iter()
                .filter(|c| {
                    tables
                        .get(&c.table)
                        .map(|t| scorer.is_scorable(c, t))
                        .unwrap_or(false)
                })
                .collect();
            if !candidates.is_empty() {
                per_query.push((query.duration_ms, candidates));
            }
        }

        // Pass 2: exact cardinality for surviving candidate columns only
        let targets: BTreeSet<ColumnKey> = per_query
            .iter()
            .flat_map(|(_, candidates)| candidates.iter().map(DBIndex::key))
            .collect();
        for key in &targets {
            progress.checkpoint()?;
            if let Some(cardinality) = self.cardinality(key)? {
                if let Some(table) = tables.get_mut(&key.table) {
                    table.update_cardinality(&key.column, cardinality);
                }
            }
        }

        progress.transition(AdvisorState::Scored);
        let mut aggregates: BTreeMap<ColumnKey, Aggregate> = BTreeMap::new();
        for (duration_ms, candidates) in per_query {
            progress.checkpoint()?;
            let best = scorer
                .score_all(candidates, &tables)
                .into_iter()
                .filter(|c| c.score < self.config.acceptance_threshold)
                .min_by(|a, b| {
                    a.score
                        .total_cmp(&b.score)
                        .then_with(|| a.key().cmp(&b.key()))
                });

            if let Some(best) = best {
                let entry = aggregates.entry(best.key()).or_insert(Aggregate {
                    best_score: f64::INFINITY,
                    ..Default::default()
                });
                entry.time_ms += duration_ms;
                entry.queries += 1;
                entry.best_score = entry.best_score.min(best.score);
            }
        }

        let mut recommendations: Vec<Recommendation> = aggregates
            .into_iter()
            .filter(|(_, agg)| agg.time_ms > threshold)
            .map(|(key, agg)| Recommendation {
                table: key.table,
                column: key.column,
                cumulative_time_saved_ms: agg.time_ms,
                query_count: agg.queries,
                score: agg.best_score,
            })
            .collect();
        recommendations.sort_by(|a, b| {
            b.cumulative_time_saved_ms
                .total_cmp(&a.cumulative_time_saved_ms)
                .then_with(|| a.table.cmp(&b.table))
                .then_with(|| a.column.cmp(&b.column))
        });
        recommendations.truncate(self.config.max_recommendations);

        let outcome = if !missing.is_empty() {
            AdvisorOutcome::Failed {
                missing_tables: missing.into_iter().collect(),
                partial: recommendations,
            }
        } else if recommendations.is_empty() {
            AdvisorOutcome::NoSuggestions
        } else {
            AdvisorOutcome::Recommended(recommendations)
        };
        progress.transition(outcome.state());
        info!(
            state = ?outcome.state(),
            recommendations = outcome.recommendations().len(),
            "index analysis finished"
        );
        Ok(outcome)
    }

    fn relevant_queries(&self, queries: &[CapturedQuery], threshold: f64) -> Vec<RelevantQuery> {
        queries
            .iter()
            .filter(|q| q.duration_ms > threshold)
            .filter(|q| StatementKind::classify(&q.query).is_analyzable())
            .filter_map(|q| match ClauseExtractor::try_extract(&q.query) {
                Ok(clauses) if clauses.kind.is_analyzable() && !clauses.tables.is_empty() => {
                    Some(RelevantQuery {
                        duration_ms: q.duration_ms,
                        clauses,
                    })
                }
                Ok(_) => None,
                Err(err) => {
                    debug!(index = q.index, error = %err, "skipping unparsable statement");
                    None
                }
            })
            .collect()
    }

    /// `Ok(None)` only when the provider says the table does not exist.
    fn describe(&self, name: &str) -> Result<Option<DBTable>> {
        let Some(description) = self.provider.describe_table(name)? else {
            return Ok(None);
        };
        let mut table = DBTable::from_description(name, description);
        match self.provider.column_statistics(name) {
            Ok(stats) => table.apply_column_statistics(&stats),
            Err(err) if err.is_statement_local() => {
                debug!(table = name, error = %err, "no column statistics")
            }
            Err(err) => return Err(err),
        }
        Ok(Some(table))
    }

    /// Exact distinct count, or `None` when the column should fall back to
    /// what pass 1 knew.
    fn cardinality(&self, key: &ColumnKey) -> Result<Option<u64>> {
        let timeout = self.config.cardinality_timeout;
        let result = self.cache.get_or_compute(key, || {
            self.provider
                .column_cardinality(&key.table, &key.column, timeout)
        });
        match result {
            Ok(n) => Ok(Some(n)),
            Err(err) if err.is_statement_local() => {
                warn!(column = %key, error = %err, "cardinality unavailable, using fallback");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

impl fmt::Debug for Recommender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recommender")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DBColumn, MemoryStatsProvider, TableDescription};
    use std::time::Duration;

    fn captured(query: &str, duration_ms: f64) -> CapturedQuery {
        CapturedQuery {
            index: 0,
            query: query.to_string(),
            duration_ms,
            stack: vec![],
            explain_rows: vec![],
        }
    }

    fn provider() -> Arc<MemoryStatsProvider> {
        let provider = Arc::new(MemoryStatsProvider::new());
        provider.register_table(
            "tabUser",
            TableDescription::new(1000)
                .with_column(DBColumn::new("name", "varchar(140)"))
                .with_column(DBColumn::new("email", "varchar(140)"))
                .with_column(DBColumn::new("enabled", "int(1)"))
                .with_column(DBColumn::new("creation", "datetime(6)"))
                .with_column(DBColumn::new("bio", "text"))
                .with_index(DBIndex::new("PRIMARY", "tabUser", "name", 1).with_unique(true)),
        );
        provider.set_distinct_count("tabUser", "email", 1000).unwrap();
        provider.set_distinct_count("tabUser", "enabled", 2).unwrap();
        provider.set_distinct_count("tabUser", "creation", 800).unwrap();
        provider
    }

    fn recommender(provider: Arc<MemoryStatsProvider>) -> Recommender {
        Recommender::new(provider, AdvisorConfig::default())
    }

    /// Delegates to an in-memory provider, failing or cancelling on demand.
    struct ScriptedStats {
        inner: Arc<MemoryStatsProvider>,
        failing_table: Option<&'static str>,
        fatal: bool,
        cancel_on_describe: Option<Arc<AnalysisProgress>>,
    }

    impl ScriptedStats {
        fn new(inner: Arc<MemoryStatsProvider>) -> Self {
            Self {
                inner,
                failing_table: None,
                fatal: false,
                cancel_on_describe: None,
            }
        }
    }

    impl TableStatsProvider for ScriptedStats {
        fn describe_table(&self, table: &str) -> Result<Option<TableDescription>> {
            if let Some(progress) = &self.cancel_on_describe {
                progress.cancel();
            }
            match self.failing_table {
                Some(name) if name == table && self.fatal => {
                    Err(QueryWatchError::internal("pool closed"))
                }
                Some(name) if name == table => Err(QueryWatchError::stats("connection reset")),
                _ => self.inner.describe_table(table),
            }
        }

        fn column_cardinality(&self, table: &str, column: &str, timeout: Duration) -> Result<u64> {
            self.inner.column_cardinality(table, column, timeout)
        }
    }

    fn with_role_table(provider: Arc<MemoryStatsProvider>) -> Arc<MemoryStatsProvider> {
        provider.register_table(
            "tabHasRole",
            TableDescription::new(3000)
                .with_column(DBColumn::new("name", "varchar(140)"))
                .with_column(DBColumn::new("role", "varchar(140)")),
        );
        provider.set_distinct_count("tabHasRole", "role", 3000).unwrap();
        provider
    }

    #[test]
    fn test_recommends_selective_column() {
        let recommender = recommender(provider());
        let outcome = recommender
            .analyze(&[captured("select name from tabUser where email = 'a@b.c'", 50.0)])
            .unwrap();
        let recs = outcome.recommendations();
        assert_eq!(outcome.state(), AdvisorState::Recommended);
        assert_eq!(recs.len(), 1);
        assert_eq!((recs[0].table.as_str(), recs[0].column.as_str()), ("tabUser", "email"));
        assert_eq!(recs[0].cumulative_time_saved_ms, 50.0);
        assert!((recs[0].score - 0.001).abs() < 1e-9);
    }

    #[test]
    fn test_low_cardinality_column_not_recommended() {
        let recommender = recommender(provider());
        let outcome = recommender
            .analyze(&[captured("select name from tabUser where enabled = 1", 50.0)])
            .unwrap();
        assert_eq!(outcome, AdvisorOutcome::NoSuggestions);
    }

    #[test]
    fn test_time_aggregated_across_queries() {
        let recommender = recommender(provider());
        let outcome = recommender
            .analyze(&[
                captured("select name from tabUser where email = 'a'", 20.0),
                captured("select name from tabUser where email = 'b'", 30.0),
                captured("select name from tabUser where creation > '2024-01-01'", 10.0),
            ])
            .unwrap();
        let recs = outcome.recommendations();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].column, "email");
        assert_eq!(recs[0].cumulative_time_saved_ms, 50.0);
        assert_eq!(recs[0].query_count, 2);
        assert_eq!(recs[1].column, "creation");
    }

    #[test]
    fn test_trivial_queries_yield_no_suggestions() {
        let recommender = recommender(provider());
        let outcome = recommender
            .analyze(&[
                captured("select name from tabUser where email = 'a'", 0.0),
                captured("select name from tabUser where email = 'b'", 0.0),
            ])
            .unwrap();
        assert_eq!(outcome, AdvisorOutcome::NoSuggestions);
    }

    #[test]
    fn test_minor_queries_filtered_out() {
        let provider = provider();
        let recommender = recommender(provider.clone());
        let mut queries = vec![captured("select name from tabUser where creation > 'x'", 0.1)];
        queries.push(captured("update tabUser set enabled = 0 where email = 'x'", 500.0));
        let outcome = recommender.analyze(&queries).unwrap();
        let cols: Vec<_> = outcome.recommendations().iter().map(|r| r.column.as_str()).collect();
        assert_eq!(cols, vec!["email"]);
        // creation query was below threshold, so it was never enriched
        assert!(!provider
            .cardinality_queries()
            .contains(&ColumnKey::new("tabUser", "creation")));
    }

    #[test]
    fn test_non_dml_statements_skipped() {
        let recommender = recommender(provider());
        let outcome = recommender
            .analyze(&[
                captured("insert into tabUser (name) values ('x')", 100.0),
                captured("commit", 100.0),
                captured("SELEKT nonsense", 100.0),
            ])
            .unwrap();
        assert_eq!(outcome, AdvisorOutcome::NoSuggestions);
    }

    #[test]
    fn test_second_pass_only_queries_candidates() {
        let provider = provider();
        let recommender = recommender(provider.clone());
        recommender
            .analyze(&[captured(
                "select name from tabUser where email = 'a' and bio like '%x%' and name = 'y'",
                10.0,
            )])
            .unwrap();
        assert_eq!(
            provider.cardinality_queries(),
            vec![ColumnKey::new("tabUser", "email")]
        );
    }

    #[test]
    fn test_cardinality_memoized_across_runs() {
        let provider = provider();
        let recommender = recommender(provider.clone());
        let queries = [captured("select name from tabUser where email = 'a'", 10.0)];
        recommender.analyze(&queries).unwrap();
        recommender.analyze(&queries).unwrap();
        assert_eq!(provider.cardinality_queries().len(), 1);
        assert_eq!(recommender.cache().stats().hits, 1);
    }

    #[test]
    fn test_cardinality_timeout_falls_back_to_default() {
        let provider = provider();
        provider
            .set_query_cost("tabUser", "email", Duration::from_secs(60))
            .unwrap();
        let recommender = recommender(provider);
        // default cardinality 2 gives score 0.5, above the acceptance threshold
        let outcome = recommender
            .analyze(&[captured("select name from tabUser where email = 'a'", 10.0)])
            .unwrap();
        assert_eq!(outcome, AdvisorOutcome::NoSuggestions);
    }

    #[test]
    fn test_histogram_backfill_used_on_timeout() {
        let provider = provider();
        provider
            .set_query_cost("tabUser", "email", Duration::from_secs(60))
            .unwrap();
        provider.set_histogram("tabUser", "email", 900).unwrap();
        let recommender = recommender(provider);
        let outcome = recommender
            .analyze(&[captured("select name from tabUser where email = 'a'", 10.0)])
            .unwrap();
        assert_eq!(outcome.recommendations().len(), 1);
    }

    #[test]
    fn test_missing_table_reported_with_partial_results() {
        let recommender = recommender(provider());
        let outcome = recommender
            .analyze(&[
                captured("select name from tabUser where email = 'a'", 10.0),
                captured("select name from tabGone where x = 1", 10.0),
            ])
            .unwrap();
        assert_eq!(outcome.state(), AdvisorState::Failed);
        assert_eq!(outcome.missing_tables(), &["tabGone".to_string()]);
        assert_eq!(outcome.recommendations().len(), 1);
    }

    #[test]
    fn test_stats_failure_is_not_a_missing_table() {
        let inner = with_role_table(provider());
        let mut stats = ScriptedStats::new(inner);
        stats.failing_table = Some("tabHasRole");
        let recommender = Recommender::new(Arc::new(stats), AdvisorConfig::default());
        let outcome = recommender
            .analyze(&[
                captured("select name from tabUser where email = 'a'", 10.0),
                captured("select name from tabHasRole where role = 'a'", 10.0),
            ])
            .unwrap();
        assert_eq!(outcome.state(), AdvisorState::Recommended);
        assert!(outcome.missing_tables().is_empty());
        let cols: Vec<_> = outcome.recommendations().iter().map(|r| r.column.as_str()).collect();
        assert_eq!(cols, vec!["email"]);
    }

    #[test]
    fn test_non_local_provider_error_aborts() {
        let mut stats = ScriptedStats::new(provider());
        stats.failing_table = Some("tabUser");
        stats.fatal = true;
        let recommender = Recommender::new(Arc::new(stats), AdvisorConfig::default());
        let err = recommender
            .analyze(&[captured("select name from tabUser where email = 'a'", 10.0)])
            .unwrap_err();
        assert!(matches!(err, QueryWatchError::Internal { .. }));
    }

    #[test]
    fn test_max_recommendations() {
        let provider = provider();
        let recommender = Recommender::new(
            provider,
            AdvisorConfig::default().with_max_recommendations(1),
        );
        let outcome = recommender
            .analyze(&[
                captured("select name from tabUser where email = 'a'", 20.0),
                captured("select name from tabUser where creation > 'b'", 30.0),
            ])
            .unwrap();
        let recs = outcome.recommendations();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].column, "creation");
    }

    #[test]
    fn test_cancelled_run() {
        let recommender = recommender(provider());
        let progress = AnalysisProgress::new();
        progress.cancel();
        let err = recommender
            .analyze_with(&[captured("select name from tabUser where email = 'a'", 1.0)], &progress)
            .unwrap_err();
        assert!(matches!(err, QueryWatchError::Cancelled));
        assert_eq!(progress.state(), AdvisorState::Cancelled);
    }

    #[test]
    fn test_cancelled_mid_run() {
        let inner = provider();
        let progress = Arc::new(AnalysisProgress::new());
        let mut stats = ScriptedStats::new(inner.clone());
        stats.cancel_on_describe = Some(progress.clone());
        let recommender = Recommender::new(Arc::new(stats), AdvisorConfig::default());

        let err = recommender
            .analyze_with(
                &[
                    captured("select name from tabUser where email = 'a'", 10.0),
                    captured("select name from tabUser where creation > 'b'", 10.0),
                ],
                &progress,
            )
            .unwrap_err();
        assert!(matches!(err, QueryWatchError::Cancelled));
        assert_eq!(progress.state(), AdvisorState::Cancelled);
        assert!(inner.cardinality_queries().is_empty());
    }

    #[test]
    fn test_progress_reaches_terminal_state() {
        let recommender = recommender(provider());
        let progress = AnalysisProgress::new();
        assert_eq!(progress.state(), AdvisorState::Idle);
        recommender
            .analyze_with(&[captured("select name from tabUser where email = 'a'", 1.0)], &progress)
            .unwrap();
        assert_eq!(progress.state(), AdvisorState::Recommended);
        assert!(progress.state().is_terminal());
    }

    #[test]
    fn test_recommendation_display() {
        let rec = Recommendation {
            table: "tabUser".to_string(),
            column: "email".to_string(),
            cumulative_time_saved_ms: 12.5,
            query_count: 1,
            score: 0.001,
        };
        assert_eq!(rec.to_string(), "tabUser.email (saves ~12.50 ms over 1 query, score 0.0010)");
    }
}
