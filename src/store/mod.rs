//! Session persistence.
//!
//! Every flushed session is written twice into a [`KeyValueStore`]: a small
//! [`SessionSummary`] in the sparse namespace for list views and the full
//! [`SessionRecord`] (statements, headers, form fields, recommendations) in
//! the full namespace. Both are keyed by session id.

mod backend;
mod explain;
mod records;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

pub use backend::{DirectoryStore, KeyValueStore, MemoryStore};
pub use explain::Explainer;
pub use records::{
    annotate_queries, QueryRecord, SessionFilter, SessionRecord, SessionSort, SessionSummary,
    SortField,
};

use crate::advisor::{AdvisorOutcome, Recommendation};
use crate::config::StoreConfig;
use crate::error::{QueryWatchError, Result};
use crate::recorder::{CapturedQuery, Session};
use crate::sql::StatementKind;

/// Post-processes finished sessions and serves them back.
pub struct SessionStore {
    backend: Arc<dyn KeyValueStore>,
    config: StoreConfig,
    explainer: Option<Arc<dyn Explainer>>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, config: StoreConfig) -> Self {
        Self {
            backend,
            config,
            explainer: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), StoreConfig::default())
    }

    /// Run EXPLAIN for SELECT/UPDATE/DELETE statements on flush.
    pub fn with_explainer(mut self, explainer: Arc<dyn Explainer>) -> Self {
        self.explainer = Some(explainer);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Annotate and persist a finished session.
    pub fn flush(&self, session: Session) -> Result<SessionRecord> {
        let summary = SessionSummary::of(&session);
        let queries = session
            .queries
            .into_iter()
            .map(|query| self.explain(query))
            .collect();

        let record = SessionRecord {
            summary,
            headers: session.headers,
            form_fields: session.form_fields,
            queries: annotate_queries(queries),
            suggested_indexes: Vec::new(),
            missing_tables: Vec::new(),
            analyzed_at: None,
        };
        self.write(&record)?;
        info!(
            session = %record.summary.id,
            queries = record.summary.query_count,
            total_query_time_ms = record.summary.total_query_time_ms,
            "session flushed"
        );
        Ok(record)
    }

    pub fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        self.backend
            .get(&self.config.full_namespace, session_id)?
            .map(|json| serde_json::from_str(&json).map_err(QueryWatchError::from))
            .transpose()
    }

    pub fn get_summary(&self, session_id: &str) -> Result<Option<SessionSummary>> {
        self.backend
            .get(&self.config.sparse_namespace, session_id)?
            .map(|json| serde_json::from_str(&json).map_err(QueryWatchError::from))
            .transpose()
    }

    /// Filtered, sorted page of summaries. Only the sparse tier is read.
    pub fn list_sessions(
        &self,
        filter: &SessionFilter,
        sort: SessionSort,
        start: usize,
        len: usize,
    ) -> Result<Vec<SessionSummary>> {
        let mut summaries = Vec::new();
        for key in self.backend.keys(&self.config.sparse_namespace)? {
            if let Some(summary) = self.get_summary(&key)? {
                if filter.matches(&summary) {
                    summaries.push(summary);
                }
            }
        }
        summaries.sort_by(|a, b| sort.compare(a, b));
        Ok(summaries.into_iter().skip(start).take(len).collect())
    }

    /// Record the outcome of an analysis on the stored session.
    pub fn set_analysis(&self, session_id: &str, outcome: &AdvisorOutcome) -> Result<()> {
        self.update(session_id, |record| {
            record.suggested_indexes = outcome.recommendations().to_vec();
            record.missing_tables = outcome.missing_tables().to_vec();
            record.analyzed_at = Some(Utc::now());
        })
    }

    pub fn set_suggested_indexes(
        &self,
        session_id: &str,
        recommendations: Vec<Recommendation>,
    ) -> Result<()> {
        self.update(session_id, |record| {
            record.suggested_indexes = recommendations;
            record.analyzed_at = Some(Utc::now());
        })
    }

    /// Returns whether the session existed.
    pub fn delete(&self, session_id: &str) -> Result<bool> {
        let sparse = self
            .backend
            .delete(&self.config.sparse_namespace, session_id)?;
        let full = self.backend.delete(&self.config.full_namespace, session_id)?;
        Ok(sparse || full)
    }

    pub fn clear(&self) -> Result<()> {
        self.backend.clear(&self.config.sparse_namespace)?;
        self.backend.clear(&self.config.full_namespace)?;
        info!("session store cleared");
        Ok(())
    }

    /// All full records as a JSON array.
    pub fn export(&self) -> Result<String> {
        let mut records = Vec::new();
        for key in self.backend.keys(&self.config.full_namespace)? {
            if let Some(record) = self.get(&key)? {
                records.push(record);
            }
        }
        Ok(serde_json::to_string_pretty(&records)?)
    }

    /// Load records produced by [`SessionStore::export`]. Existing sessions
    /// with the same id are overwritten. Returns the number imported.
    pub fn import(&self, json: &str) -> Result<usize> {
        let records: Vec<SessionRecord> = serde_json::from_str(json)?;
        for record in &records {
            self.write(record)?;
        }
        info!(count = records.len(), "sessions imported");
        Ok(records.len())
    }

    fn update(&self, session_id: &str, f: impl FnOnce(&mut SessionRecord)) -> Result<()> {
        let mut record = self
            .get(session_id)?
            .ok_or_else(|| QueryWatchError::session_not_found(session_id))?;
        f(&mut record);
        self.write(&record)
    }

    fn write(&self, record: &SessionRecord) -> Result<()> {
        let id = record.id();
        let full = serde_json::to_string(record)?;
        let sparse = serde_json::to_string(&record.summary)?;
        self.backend.put(&self.config.full_namespace, id, &full)?;
        self.backend.put(&self.config.sparse_namespace, id, &sparse)
    }

    fn explain(&self, mut query: CapturedQuery) -> CapturedQuery {
        let Some(explainer) = &self.explainer else {
            return query;
        };
        if !StatementKind::classify(&query.query).is_analyzable() {
            return query;
        }
        match explainer.explain(&query.query) {
            Ok(rows) => query.explain_rows = rows,
            Err(err) => debug!(index = query.index, error = %err, "explain failed"),
        }
        query
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("config", &self.config)
            .field("explain", &self.explainer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecorderConfig;
    use crate::recorder::{Recorder, SessionInfo};
    use serde_json::{json, Value};

    fn session(path: &str, queries: &[(&str, f64)]) -> Session {
        let recorder = Recorder::new(RecorderConfig::default().with_capture_stack(false)).unwrap();
        recorder.start();
        recorder.begin(SessionInfo::http(path, "GET").with_header("Host", "localhost"));
        for (query, ms) in queries {
            recorder.observe(query, *ms, vec![]);
        }
        recorder.finish().unwrap()
    }

    #[test]
    fn test_flush_writes_both_tiers() {
        let backend = Arc::new(MemoryStore::new());
        let store = SessionStore::new(backend.clone(), StoreConfig::default());
        let record = store
            .flush(session("/api/users", &[("select 1", 2.0), ("select 2", 3.0)]))
            .unwrap();

        let sparse = backend
            .get("recorder-requests-sparse", record.id())
            .unwrap()
            .unwrap();
        let sparse: Value = serde_json::from_str(&sparse).unwrap();
        assert_eq!(sparse["query_count"], 2);
        assert!(sparse.get("queries").is_none());
        assert!(sparse.get("headers").is_none());

        let full = store.get(record.id()).unwrap().unwrap();
        assert_eq!(full.queries.len(), 2);
        assert_eq!(full.headers.get("Host").map(String::as_str), Some("localhost"));
        assert_eq!(full.summary.total_query_time_ms, 5.0);
    }

    #[test]
    fn test_explain_only_for_dml_and_failures_absorbed() {
        let explainer = |query: &str| -> Result<Vec<Value>> {
            if query.contains("tabBroken") {
                Err(QueryWatchError::explain("unsupported"))
            } else {
                Ok(vec![json!({"select_type": "SIMPLE"})])
            }
        };
        let store = SessionStore::in_memory().with_explainer(Arc::new(explainer));
        let record = store
            .flush(session(
                "/x",
                &[
                    ("select * from tabUser", 1.0),
                    ("select * from tabBroken", 1.0),
                    ("insert into tabUser values (1)", 1.0),
                ],
            ))
            .unwrap();
        assert_eq!(record.queries[0].captured.explain_rows.len(), 1);
        assert!(record.queries[1].captured.explain_rows.is_empty());
        assert!(record.queries[2].captured.explain_rows.is_empty());
    }

    #[test]
    fn test_list_sessions_filters_sorts_and_pages() {
        let store = SessionStore::in_memory();
        store.flush(session("/api/a", &[("select 1", 10.0)])).unwrap();
        store.flush(session("/api/b", &[("select 1", 30.0)])).unwrap();
        store.flush(session("/desk/c", &[("select 1", 20.0)])).unwrap();

        let sort = SessionSort::descending(SortField::TotalQueryTime);
        let all = store
            .list_sessions(&SessionFilter::new(), sort, 0, 10)
            .unwrap();
        let paths: Vec<_> = all.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(paths, vec!["/api/b", "/desk/c", "/api/a"]);

        let page = store
            .list_sessions(&SessionFilter::new(), sort, 1, 1)
            .unwrap();
        assert_eq!(page[0].path, "/desk/c");

        let api = store
            .list_sessions(&SessionFilter::new().with_path_contains("/api"), sort, 0, 10)
            .unwrap();
        assert_eq!(api.len(), 2);
    }

    #[test]
    fn test_set_suggested_indexes() {
        let store = SessionStore::in_memory();
        let record = store.flush(session("/x", &[("select 1", 1.0)])).unwrap();
        let rec = Recommendation {
            table: "tabUser".to_string(),
            column: "email".to_string(),
            cumulative_time_saved_ms: 1.0,
            query_count: 1,
            score: 0.01,
        };
        store
            .set_suggested_indexes(record.id(), vec![rec.clone()])
            .unwrap();
        let stored = store.get(record.id()).unwrap().unwrap();
        assert_eq!(stored.suggested_indexes, vec![rec]);
        assert!(stored.analyzed_at.is_some());

        let err = store.set_suggested_indexes("nope", vec![]).unwrap_err();
        assert!(matches!(err, QueryWatchError::SessionNotFound { .. }));
    }

    #[test]
    fn test_set_analysis_records_missing_tables() {
        let store = SessionStore::in_memory();
        let record = store.flush(session("/x", &[("select 1", 1.0)])).unwrap();
        let outcome = AdvisorOutcome::Failed {
            missing_tables: vec!["tabGone".to_string()],
            partial: vec![],
        };
        store.set_analysis(record.id(), &outcome).unwrap();
        let stored = store.get(record.id()).unwrap().unwrap();
        assert_eq!(stored.missing_tables, vec!["tabGone".to_string()]);
        assert!(stored.suggested_indexes.is_empty());
    }

    #[test]
    fn test_delete_and_clear() {
        let store = SessionStore::in_memory();
        let a = store.flush(session("/a", &[])).unwrap();
        store.flush(session("/b", &[])).unwrap();

        assert!(store.delete(a.id()).unwrap());
        assert!(!store.delete(a.id()).unwrap());
        assert!(store.get(a.id()).unwrap().is_none());

        store.clear().unwrap();
        let all = store
            .list_sessions(&SessionFilter::new(), SessionSort::default(), 0, 10)
            .unwrap();
        assert!(all.is_empty());
    }

    #[test]
    fn test_export_import() {
        let source = SessionStore::in_memory();
        let record = source
            .flush(session("/a", &[("select * from t where a = 1", 4.0)]))
            .unwrap();
        let dump = source.export().unwrap();

        let target = SessionStore::in_memory();
        assert_eq!(target.import(&dump).unwrap(), 1);
        let imported = target.get(record.id()).unwrap().unwrap();
        assert_eq!(imported.summary.path, "/a");
        assert_eq!(imported.queries[0].normalized_query, "select * from t where a = ?");
        assert_eq!(imported.queries[0].captured.duration_ms, 4.0);
        assert_eq!(target.get_summary(record.id()).unwrap().unwrap().query_count, 1);
    }

    #[test]
    fn test_directory_backend() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(
            Arc::new(DirectoryStore::new(dir.path()).unwrap()),
            StoreConfig::default(),
        );
        let record = store.flush(session("/a", &[("select 1", 1.0)])).unwrap();
        assert!(dir
            .path()
            .join("recorder-requests")
            .join(format!("{}.json", record.id()))
            .exists());
        let stored = store.get(record.id()).unwrap().unwrap();
        assert_eq!(stored.id(), record.id());
        assert_eq!(stored.queries.len(), 1);
    }
}
