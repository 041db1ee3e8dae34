//! QueryWatch - SQL capture and index advice for database-backed applications
//!
//! QueryWatch records every SQL statement executed during a unit of work (an
//! HTTP request or a background job), stores the capture, and analyses it
//! against live table statistics to suggest single-column secondary indexes
//! worth adding.
//!
//! # Features
//!
//! - **Explicit capture**: a [`Recorder`] handle bound to the data-access layer
//!   through an [`ExecutionContext`], no global state
//! - **Two-tier storage**: cheap summaries for list views, full records for detail
//! - **Duplicate detection**: exact and normalized copies per statement
//! - **Index advice**: two-pass statistics fetch, uniform-distribution scoring,
//!   prefix-aware filtering of existing composite indexes
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use querywatch::catalog::{DBColumn, MemoryStatsProvider, TableDescription};
//! use querywatch::{AdvisorOutcome, QueryWatch, Result, SessionInfo};
//!
//! fn main() -> Result<()> {
//!     let stats = Arc::new(MemoryStatsProvider::new());
//!     stats.register_table(
//!         "tabUser",
//!         TableDescription::new(10_000)
//!             .with_column(DBColumn::new("name", "varchar(140)"))
//!             .with_column(DBColumn::new("email", "varchar(140)")),
//!     );
//!     stats.set_distinct_count("tabUser", "email", 10_000)?;
//!
//!     let watch = QueryWatch::in_memory(stats)?;
//!     watch.start();
//!
//!     watch.begin(SessionInfo::http("/api/method/login", "POST"));
//!     // The data-access layer reports each statement with its timing
//!     watch
//!         .recorder()
//!         .observe("select name from tabUser where email = 'a@b.c'", 12.5, vec![]);
//!     let record = watch.finish()?.expect("session was open");
//!
//!     let outcome = watch.optimize_now(record.id())?;
//!     assert!(matches!(outcome, AdvisorOutcome::Recommended(_)));
//!     Ok(())
//! }
//! ```

pub mod advisor;
pub mod catalog;
pub mod config;
pub mod error;
pub mod recorder;
pub mod sql;
pub mod store;

// Re-export commonly used types
pub use advisor::{AdvisorOutcome, AdvisorState, AnalysisHandle, IndexApplier, Recommendation};
pub use config::{AdvisorConfig, QueryWatchConfig, RecorderConfig, StoreConfig};
pub use error::{QueryWatchError, Result};
pub use recorder::{ExecutionContext, Recorder, Session, SessionInfo, SessionKind};
pub use store::{SessionFilter, SessionRecord, SessionSort, SessionSummary, SortField};

use std::sync::Arc;

use tracing::info;

use advisor::{optimize_session, spawn_optimize, AnalysisProgress, Recommender};
use catalog::TableStatsProvider;
use store::{Explainer, KeyValueStore, MemoryStore, SessionStore};

/// Entry point wiring the recorder, the session store and the advisor.
pub struct QueryWatch {
    config: QueryWatchConfig,
    recorder: Arc<Recorder>,
    backend: Arc<dyn KeyValueStore>,
    store: Arc<SessionStore>,
    recommender: Arc<Recommender>,
    applier: Option<Arc<dyn IndexApplier>>,
}

impl QueryWatch {
    /// Default configuration over an in-process store.
    pub fn in_memory(provider: Arc<dyn TableStatsProvider>) -> Result<Self> {
        Self::with_config(
            QueryWatchConfig::default(),
            Arc::new(MemoryStore::new()),
            provider,
        )
    }

    pub fn with_config(
        config: QueryWatchConfig,
        backend: Arc<dyn KeyValueStore>,
        provider: Arc<dyn TableStatsProvider>,
    ) -> Result<Self> {
        let recorder = Arc::new(Recorder::new(config.recorder.clone())?);
        let store = Arc::new(SessionStore::new(backend.clone(), config.store.clone()));
        let recommender = Arc::new(Recommender::new(provider, config.advisor.clone()));
        Ok(Self {
            config,
            recorder,
            backend,
            store,
            recommender,
            applier: None,
        })
    }

    /// Attach an EXPLAIN collaborator. Ignored when `RecorderConfig::explain`
    /// is off.
    pub fn with_explainer(mut self, explainer: Arc<dyn Explainer>) -> Self {
        if self.config.recorder.explain {
            self.store = Arc::new(
                SessionStore::new(self.backend.clone(), self.config.store.clone())
                    .with_explainer(explainer),
            );
        }
        self
    }

    pub fn with_index_applier(mut self, applier: Arc<dyn IndexApplier>) -> Self {
        self.applier = Some(applier);
        self
    }

    pub fn config(&self) -> &QueryWatchConfig {
        &self.config
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn recommender(&self) -> &Arc<Recommender> {
        &self.recommender
    }

    /// A context for the data-access layer, bound to this recorder.
    pub fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::new().with_recorder(self.recorder.clone())
    }

    pub fn start(&self) {
        self.recorder.start();
    }

    pub fn stop(&self) {
        self.recorder.stop();
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Open a session for a unit of work. Returns whether it is being captured.
    pub fn begin(&self, info: SessionInfo) -> bool {
        self.recorder.begin(info)
    }

    /// Close the open session and persist it.
    pub fn finish(&self) -> Result<Option<SessionRecord>> {
        self.recorder
            .finish()
            .map(|session| self.store.flush(session))
            .transpose()
    }

    /// Drop the open session without persisting it.
    pub fn discard(&self) {
        self.recorder.discard();
    }

    /// Delete one stored session, or everything (including the open buffer).
    pub fn clear(&self, session_id: Option<&str>) -> Result<()> {
        match session_id {
            Some(id) => {
                self.store.delete(id)?;
            }
            None => {
                self.recorder.discard();
                self.store.clear()?;
            }
        }
        Ok(())
    }

    pub fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        self.store.get(session_id)
    }

    pub fn list_sessions(
        &self,
        filter: &SessionFilter,
        sort: SessionSort,
        start: usize,
        len: usize,
    ) -> Result<Vec<SessionSummary>> {
        self.store.list_sessions(filter, sort, start, len)
    }

    /// Analyse a stored session in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn optimize(&self, session_id: &str) -> AnalysisHandle {
        spawn_optimize(self.store.clone(), self.recommender.clone(), session_id)
    }

    /// Analyse a stored session on the calling thread.
    pub fn optimize_now(&self, session_id: &str) -> Result<AdvisorOutcome> {
        optimize_session(
            &self.store,
            &self.recommender,
            session_id,
            &AnalysisProgress::new(),
        )
    }

    /// Hand an index to the configured [`IndexApplier`].
    pub fn apply_index(&self, table: &str, column: &str) -> Result<()> {
        let applier = self
            .applier
            .as_ref()
            .ok_or_else(|| QueryWatchError::invalid_argument("No index applier configured"))?;
        info!(table, column, "handing off index");
        applier.apply_index(table, column)
    }

    /// All stored sessions as JSON.
    pub fn export(&self) -> Result<String> {
        self.store.export()
    }

    pub fn import(&self, json: &str) -> Result<usize> {
        self.store.import(json)
    }
}

impl std::fmt::Debug for QueryWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryWatch")
            .field("recorder", &self.recorder)
            .field("store", &self.store)
            .field("recommender", &self.recommender)
            .field("applier", &self.applier.is_some())
            .finish()
    }
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::advisor::{AdvisorOutcome, IndexApplier, Recommendation};
    pub use crate::catalog::{TableDescription, TableStatsProvider};
    pub use crate::error::{QueryWatchError, Result};
    pub use crate::recorder::{ExecutionContext, SessionInfo};
    pub use crate::{QueryWatch, QueryWatchConfig};
}
