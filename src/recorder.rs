//! Per-unit-of-work SQL capture.
//!
//! A [`Recorder`] is an explicit handle owned by whoever runs units of work
//! (an HTTP dispatcher, a job runner). The data-access layer holds it through
//! an [`ExecutionContext`] and reports every executed statement; nothing is
//! recorded unless a recorder is bound, enabled and has an open session.
//!
//! ```rust
//! use std::sync::Arc;
//! use querywatch::config::RecorderConfig;
//! use querywatch::recorder::{ExecutionContext, Recorder, SessionInfo};
//!
//! let recorder = Arc::new(Recorder::new(RecorderConfig::default()).unwrap());
//! recorder.start();
//! recorder.begin(SessionInfo::http("/api/users", "GET"));
//!
//! let ctx = ExecutionContext::new().with_recorder(recorder.clone());
//! let rows = ctx.run("SELECT name FROM tabUser WHERE enabled = 1", || 3);
//! assert_eq!(rows, 3);
//!
//! let session = recorder.finish().unwrap();
//! assert_eq!(session.queries.len(), 1);
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RecorderConfig;
use crate::error::Result;

/// Frames from these prefixes never end up in a captured stack.
const INTERNAL_FRAME_PREFIXES: &[&str] = &[
    "querywatch::",
    "std::",
    "core::",
    "alloc::",
    "backtrace::",
    "__rust",
    "rust_begin_unwind",
    "<unknown>",
];

/// One frame of a captured call stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub function: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl StackFrame {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            file: None,
            line: None,
        }
    }

    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }
}

/// One executed statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedQuery {
    /// Position inside the session, starting at 0
    pub index: usize,
    pub query: String,
    pub duration_ms: f64,
    pub stack: Vec<StackFrame>,
    /// EXPLAIN output, filled in when the session is flushed
    #[serde(default)]
    pub explain_rows: Vec<serde_json::Value>,
}

/// What kind of unit of work a session captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionKind {
    HttpRequest,
    BackgroundJob,
}

/// Description of a unit of work, supplied when it begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub kind: SessionKind,
    pub path: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub form_fields: BTreeMap<String, String>,
}

impl SessionInfo {
    pub fn http(path: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            kind: SessionKind::HttpRequest,
            path: path.into(),
            method: method.into(),
            headers: BTreeMap::new(),
            form_fields: BTreeMap::new(),
        }
    }

    /// A background job; the job name doubles as the path.
    pub fn job(name: impl Into<String>) -> Self {
        Self {
            kind: SessionKind::BackgroundJob,
            path: name.into(),
            method: "JOB".to_string(),
            headers: BTreeMap::new(),
            form_fields: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form_fields.insert(name.into(), value.into());
        self
    }
}

/// All statements captured during one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub kind: SessionKind,
    pub started_at: DateTime<Utc>,
    pub path: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub form_fields: BTreeMap<String, String>,
    pub queries: Vec<CapturedQuery>,
    /// Wall-clock duration of the unit of work
    pub duration_ms: f64,
}

impl Session {
    fn begin(info: SessionInfo) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: info.kind,
            started_at: Utc::now(),
            path: info.path,
            method: info.method,
            headers: info.headers,
            form_fields: info.form_fields,
            queries: Vec::new(),
            duration_ms: 0.0,
        }
    }

    /// Sum of all captured statement durations.
    pub fn total_query_time_ms(&self) -> f64 {
        self.queries.iter().map(|q| q.duration_ms).sum()
    }
}

struct ActiveSession {
    session: Session,
    started: Instant,
}

#[derive(Default)]
struct RecorderState {
    enabled_at: Option<Instant>,
    active: Option<ActiveSession>,
}

/// Captures statements for the unit of work currently open on this handle.
pub struct Recorder {
    config: RecorderConfig,
    stack_filter: Option<Regex>,
    path_filter: Option<Regex>,
    state: Mutex<RecorderState>,
}

impl Recorder {
    /// Create a disabled recorder. Fails if a configured filter is not a valid regex.
    pub fn new(config: RecorderConfig) -> Result<Self> {
        let stack_filter = config.stack_filter.as_deref().map(Regex::new).transpose()?;
        let path_filter = config.path_filter.as_deref().map(Regex::new).transpose()?;
        Ok(Self {
            config,
            stack_filter,
            path_filter,
            state: Mutex::new(RecorderState::default()),
        })
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Enable recording for units of work that begin from now on.
    pub fn start(&self) {
        let mut state = self.state.lock();
        if state.enabled_at.is_none() {
            info!("query recording started");
        }
        state.enabled_at = Some(Instant::now());
    }

    /// Disable recording. A session already open is still finished normally.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if state.enabled_at.take().is_some() {
            info!("query recording stopped");
        }
    }

    /// Whether recording is enabled and has not outlived `auto_disable_after`.
    /// Once the limit has passed the recorder turns itself off.
    pub fn is_recording(&self) -> bool {
        let mut state = self.state.lock();
        self.check_enabled(&mut state)
    }

    /// Whether a session is open and collecting statements.
    pub fn is_capturing(&self) -> bool {
        let state = self.state.lock();
        self.config.record_sql && state.active.is_some()
    }

    /// Open a session for a new unit of work. Returns false when the unit
    /// of work is not recorded: recording is disabled, the path is filtered
    /// out, or another session is still open on this handle.
    pub fn begin(&self, info: SessionInfo) -> bool {
        let mut state = self.state.lock();
        if !self.check_enabled(&mut state) {
            return false;
        }
        if let Some(active) = &state.active {
            warn!(
                open_session = %active.session.id,
                path = %info.path,
                "session already open, not recording the new unit of work"
            );
            return false;
        }
        if let Some(filter) = &self.path_filter {
            if !filter.is_match(&info.path) {
                return false;
            }
        }

        let session = Session::begin(info);
        debug!(session_id = %session.id, path = %session.path, "session recording begins");
        state.active = Some(ActiveSession {
            session,
            started: Instant::now(),
        });
        true
    }

    /// Capture hook: append one executed statement to the open session.
    /// No-op when no session is open or SQL recording is off.
    pub fn observe(&self, query: &str, duration_ms: f64, stack: Vec<StackFrame>) {
        if !self.config.record_sql {
            return;
        }
        let stack = if self.config.capture_stack {
            self.trim_stack(stack)
        } else {
            Vec::new()
        };

        let mut state = self.state.lock();
        let Some(active) = state.active.as_mut() else {
            return;
        };
        let duration_ms = if duration_ms.is_finite() && duration_ms > 0.0 {
            duration_ms
        } else {
            0.0
        };
        let index = active.session.queries.len();
        active.session.queries.push(CapturedQuery {
            index,
            query: query.to_string(),
            duration_ms,
            stack,
            explain_rows: Vec::new(),
        });
    }

    /// Close the open session and hand it over for flushing.
    pub fn finish(&self) -> Option<Session> {
        let active = self.state.lock().active.take()?;
        let mut session = active.session;
        let elapsed = active.started.elapsed().as_secs_f64() * 1000.0;
        // Statement timings reported by the caller can't exceed the unit of work
        session.duration_ms = elapsed.max(session.total_query_time_ms());
        debug!(
            session_id = %session.id,
            queries = session.queries.len(),
            duration_ms = session.duration_ms,
            "session recording finished"
        );
        Some(session)
    }

    /// Drop the open session without keeping anything.
    pub fn discard(&self) {
        if let Some(active) = self.state.lock().active.take() {
            debug!(session_id = %active.session.id, "session recording discarded");
        }
    }

    /// Remove internal frames, apply `stack_filter`, cap at `max_stack_depth`.
    pub fn trim_stack(&self, frames: Vec<StackFrame>) -> Vec<StackFrame> {
        frames
            .into_iter()
            .filter(|f| {
                !INTERNAL_FRAME_PREFIXES
                    .iter()
                    .any(|p| f.function.starts_with(p))
            })
            .filter(|f| match &self.stack_filter {
                Some(filter) => {
                    filter.is_match(&f.function)
                        || f.file.as_deref().map(|file| filter.is_match(file)).unwrap_or(false)
                }
                None => true,
            })
            .take(self.config.max_stack_depth)
            .collect()
    }

    fn check_enabled(&self, state: &mut RecorderState) -> bool {
        match state.enabled_at {
            Some(at) if at.elapsed() <= self.config.auto_disable_after => true,
            Some(_) => {
                state.enabled_at = None;
                info!(
                    after = ?self.config.auto_disable_after,
                    "query recording disabled automatically"
                );
                false
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("recording", &self.is_recording())
            .field("capturing", &self.is_capturing())
            .finish()
    }
}

/// Execution context the data-access layer threads through statement execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    recorder: Option<Arc<Recorder>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recorder(mut self, recorder: Arc<Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn recorder(&self) -> Option<&Arc<Recorder>> {
        self.recorder.as_ref()
    }

    /// Run one statement through `execute`, reporting it to the bound recorder.
    pub fn run<T, F>(&self, sql: &str, execute: F) -> T
    where
        F: FnOnce() -> T,
    {
        let Some(recorder) = self.recorder.as_ref().filter(|r| r.is_capturing()) else {
            return execute();
        };

        let started = Instant::now();
        let output = execute();
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let stack = if recorder.config().capture_stack {
            capture_stack()
        } else {
            Vec::new()
        };
        recorder.observe(sql, duration_ms, stack);
        output
    }
}

/// Capture the current call stack as frames.
pub fn capture_stack() -> Vec<StackFrame> {
    parse_backtrace(&std::backtrace::Backtrace::force_capture().to_string())
}

/// Parse the textual form of a backtrace:
///
/// ```text
///    0: app::handler::list_users
///              at ./src/handler.rs:42:9
/// ```
pub fn parse_backtrace(text: &str) -> Vec<StackFrame> {
    let mut frames: Vec<StackFrame> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                let mut parts = location.rsplitn(3, ':');
                let _column = parts.next();
                let line_no = parts.next().and_then(|l| l.parse().ok());
                match (parts.next(), line_no) {
                    (Some(file), Some(line_no)) => {
                        frame.file = Some(file.to_string());
                        frame.line = Some(line_no);
                    }
                    _ => frame.file = Some(location.to_string()),
                }
            }
        } else if let Some((number, function)) = line.split_once(": ") {
            if number.chars().all(|c| c.is_ascii_digit()) && !number.is_empty() {
                frames.push(StackFrame::new(function.trim()));
            }
        }
    }
    frames
}
