//! Persisted record shapes and list-view querying.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::advisor::Recommendation;
use crate::recorder::{CapturedQuery, Session, SessionKind};
use crate::sql::normalize;

/// Cheap list-view record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub kind: SessionKind,
    pub path: String,
    pub method: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: f64,
    pub query_count: usize,
    pub total_query_time_ms: f64,
}

impl SessionSummary {
    pub fn of(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            kind: session.kind,
            path: session.path.clone(),
            method: session.method.clone(),
            started_at: session.started_at,
            duration_ms: session.duration_ms,
            query_count: session.queries.len(),
            total_query_time_ms: session.total_query_time_ms(),
        }
    }
}

/// A captured statement with its post-processing annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    #[serde(flatten)]
    pub captured: CapturedQuery,
    pub normalized_query: String,
    /// Entries in the session with the same exact text, this one included
    pub exact_copies: usize,
    /// Entries in the session with the same normalized text, this one included
    pub normalized_copies: usize,
}

/// Detail-view record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(flatten)]
    pub summary: SessionSummary,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub form_fields: BTreeMap<String, String>,
    pub queries: Vec<QueryRecord>,
    #[serde(default)]
    pub suggested_indexes: Vec<Recommendation>,
    /// Tables the last analysis could not find
    #[serde(default)]
    pub missing_tables: Vec<String>,
    #[serde(default)]
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn id(&self) -> &str {
        &self.summary.id
    }

    /// The captured statements in execution order.
    pub fn captured_queries(&self) -> Vec<CapturedQuery> {
        self.queries.iter().map(|q| q.captured.clone()).collect()
    }
}

/// Annotate each statement with its exact and normalized duplicate counts.
pub fn annotate_queries(queries: Vec<CapturedQuery>) -> Vec<QueryRecord> {
    let normalized: Vec<String> = queries.iter().map(|q| normalize(&q.query)).collect();

    let counts: Vec<(usize, usize)> = {
        let mut exact: HashMap<&str, usize> = HashMap::new();
        let mut similar: HashMap<&str, usize> = HashMap::new();
        for (query, norm) in queries.iter().zip(&normalized) {
            *exact.entry(query.query.as_str()).or_default() += 1;
            *similar.entry(norm.as_str()).or_default() += 1;
        }
        queries
            .iter()
            .zip(&normalized)
            .map(|(query, norm)| (exact[query.query.as_str()], similar[norm.as_str()]))
            .collect()
    };

    queries
        .into_iter()
        .zip(normalized)
        .zip(counts)
        .map(|((captured, normalized_query), (exact_copies, normalized_copies))| QueryRecord {
            captured,
            normalized_query,
            exact_copies,
            normalized_copies,
        })
        .collect()
}

/// List-view filter; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionFilter {
    pub path_contains: Option<String>,
    pub method: Option<String>,
    pub kind: Option<SessionKind>,
    pub min_total_query_time_ms: Option<f64>,
}

impl SessionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path_contains(mut self, needle: impl Into<String>) -> Self {
        self.path_contains = Some(needle.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_kind(mut self, kind: SessionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_min_total_query_time(mut self, ms: f64) -> Self {
        self.min_total_query_time_ms = Some(ms);
        self
    }

    pub fn matches(&self, summary: &SessionSummary) -> bool {
        self.path_contains
            .as_deref()
            .map_or(true, |needle| summary.path.contains(needle))
            && self
                .method
                .as_deref()
                .map_or(true, |m| summary.method.eq_ignore_ascii_case(m))
            && self.kind.map_or(true, |k| summary.kind == k)
            && self
                .min_total_query_time_ms
                .map_or(true, |min| summary.total_query_time_ms >= min)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    StartedAt,
    Duration,
    QueryCount,
    TotalQueryTime,
    Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSort {
    pub field: SortField,
    pub descending: bool,
}

impl Default for SessionSort {
    /// Newest first.
    fn default() -> Self {
        Self {
            field: SortField::StartedAt,
            descending: true,
        }
    }
}

impl SessionSort {
    pub fn ascending(field: SortField) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    pub fn descending(field: SortField) -> Self {
        Self {
            field,
            descending: true,
        }
    }

    pub fn compare(&self, a: &SessionSummary, b: &SessionSummary) -> Ordering {
        let ordering = match self.field {
            SortField::StartedAt => a.started_at.cmp(&b.started_at),
            SortField::Duration => a.duration_ms.total_cmp(&b.duration_ms),
            SortField::QueryCount => a.query_count.cmp(&b.query_count),
            SortField::TotalQueryTime => a.total_query_time_ms.total_cmp(&b.total_query_time_ms),
            SortField::Path => a.path.cmp(&b.path),
        };
        let ordering = if self.descending {
            ordering.reverse()
        } else {
            ordering
        };
        ordering.then_with(|| a.id.cmp(&b.id))
    }
}
