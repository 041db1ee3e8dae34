//! Out-of-band analysis of stored sessions.
//!
//! [`spawn_optimize`] moves the blocking statistics work onto tokio's blocking
//! pool so the unit of work that produced the capture is never held up. The
//! returned [`AnalysisHandle`] exposes the live [`AdvisorState`] and a cancel
//! switch.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::recommender::{AdvisorOutcome, AdvisorState, AnalysisProgress, Recommender};
use crate::error::{QueryWatchError, Result};
use crate::store::SessionStore;

/// One-way hand-off of an index to whatever applies DDL.
pub trait IndexApplier: Send + Sync {
    fn apply_index(&self, table: &str, column: &str) -> Result<()>;
}

/// Load a stored session, analyse it and write the outcome back.
pub fn optimize_session(
    store: &SessionStore,
    recommender: &Recommender,
    session_id: &str,
    progress: &AnalysisProgress,
) -> Result<AdvisorOutcome> {
    let record = store
        .get(session_id)?
        .ok_or_else(|| QueryWatchError::session_not_found(session_id))?;

    let outcome = recommender.analyze_with(&record.captured_queries(), progress)?;
    store.set_analysis(session_id, &outcome)?;
    info!(
        session = session_id,
        state = ?outcome.state(),
        suggested = outcome.recommendations().len(),
        "session optimized"
    );
    Ok(outcome)
}

/// A background analysis run.
#[derive(Debug)]
pub struct AnalysisHandle {
    session_id: String,
    progress: Arc<AnalysisProgress>,
    task: JoinHandle<Result<AdvisorOutcome>>,
}

impl AnalysisHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> AdvisorState {
        self.progress.state()
    }

    /// Stop at the next checkpoint. The stored capture is left untouched.
    pub fn cancel(&self) {
        self.progress.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to finish.
    pub async fn wait(self) -> Result<AdvisorOutcome> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => {
                warn!(session = %self.session_id, error = %err, "analysis task failed");
                Err(QueryWatchError::internal(format!("analysis task failed: {}", err)))
            }
        }
    }
}

/// Analyse a stored session on the blocking pool.
///
/// Must be called from within a tokio runtime.
pub fn spawn_optimize(
    store: Arc<SessionStore>,
    recommender: Arc<Recommender>,
    session_id: impl Into<String>,
) -> AnalysisHandle {
    let session_id = session_id.into();
    let progress = Arc::new(AnalysisProgress::new());

    let task = {
        let progress = progress.clone();
        let session_id = session_id.clone();
        tokio::task::spawn_blocking(move || {
            optimize_session(&store, &recommender, &session_id, &progress)
        })
    };

    AnalysisHandle {
        session_id,
        progress,
        task,
    }
}
