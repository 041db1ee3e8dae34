//! Configuration for the recorder, the index advisor and the session store.
//!
//! Every struct has sensible defaults and `with_*` builders, and can be
//! loaded from JSON with missing fields falling back to the defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Configuration for query capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Capture SQL statements at all
    pub record_sql: bool,
    /// Keep a trimmed call stack with every captured statement
    pub capture_stack: bool,
    /// Run EXPLAIN for analyzable statements when a session is flushed
    pub explain: bool,
    /// Maximum number of frames kept per statement
    pub max_stack_depth: usize,
    /// Frames whose function or file matches this regex are kept. `None` keeps
    /// every frame that does not belong to the recorder or the Rust runtime.
    pub stack_filter: Option<String>,
    /// Recording turns itself off after being enabled this long
    #[serde(with = "duration_ms")]
    pub auto_disable_after: Duration,
    /// Only units of work whose path matches this regex are recorded
    pub path_filter: Option<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            record_sql: true,
            capture_stack: true,
            explain: true,
            max_stack_depth: 20,
            stack_filter: None,
            auto_disable_after: Duration::from_secs(10 * 60),
            path_filter: None,
        }
    }
}

impl RecorderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record_sql(mut self, enabled: bool) -> Self {
        self.record_sql = enabled;
        self
    }

    pub fn with_capture_stack(mut self, enabled: bool) -> Self {
        self.capture_stack = enabled;
        self
    }

    pub fn with_explain(mut self, enabled: bool) -> Self {
        self.explain = enabled;
        self
    }

    pub fn with_max_stack_depth(mut self, depth: usize) -> Self {
        self.max_stack_depth = depth;
        self
    }

    pub fn with_stack_filter(mut self, pattern: impl Into<String>) -> Self {
        self.stack_filter = Some(pattern.into());
        self
    }

    pub fn with_auto_disable_after(mut self, after: Duration) -> Self {
        self.auto_disable_after = after;
        self
    }

    pub fn with_path_filter(mut self, pattern: impl Into<String>) -> Self {
        self.path_filter = Some(pattern.into());
        self
    }
}

/// Configuration for the index advisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    /// A candidate is only worth recommending when its score is below this
    pub acceptance_threshold: f64,
    /// Significance threshold is `total_query_time / significance_divisor`.
    /// Applies both to individual queries and to aggregated savings.
    pub significance_divisor: f64,
    /// Maximum number of recommendations kept per session
    pub max_recommendations: usize,
    /// Cardinality assumed when the column has no statistics
    pub default_cardinality: u64,
    /// Identity (primary key) column, never proposed
    pub identity_column: String,
    /// Wildcard column, never proposed
    pub wildcard: String,
    /// Column types containing any of these (case-insensitive) are not indexable
    pub unindexable_types: Vec<String>,
    /// Budget for a single distinct-count query
    #[serde(with = "duration_ms")]
    pub cardinality_timeout: Duration,
    /// How long a computed cardinality may be reused
    #[serde(with = "duration_ms")]
    pub cardinality_ttl: Duration,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.3,
            significance_divisor: 200.0,
            max_recommendations: 5,
            default_cardinality: 2,
            identity_column: "name".to_string(),
            wildcard: "*".to_string(),
            unindexable_types: vec!["text".to_string(), "json".to_string(), "blob".to_string()],
            cardinality_timeout: Duration::from_secs(10),
            cardinality_ttl: Duration::from_secs(5 * 60),
        }
    }
}

impl AdvisorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_acceptance_threshold(mut self, threshold: f64) -> Self {
        self.acceptance_threshold = threshold;
        self
    }

    pub fn with_significance_divisor(mut self, divisor: f64) -> Self {
        self.significance_divisor = divisor;
        self
    }

    pub fn with_max_recommendations(mut self, n: usize) -> Self {
        self.max_recommendations = n;
        self
    }

    pub fn with_default_cardinality(mut self, cardinality: u64) -> Self {
        self.default_cardinality = cardinality;
        self
    }

    pub fn with_identity_column(mut self, column: impl Into<String>) -> Self {
        self.identity_column = column.into();
        self
    }

    pub fn with_cardinality_timeout(mut self, timeout: Duration) -> Self {
        self.cardinality_timeout = timeout;
        self
    }

    pub fn with_cardinality_ttl(mut self, ttl: Duration) -> Self {
        self.cardinality_ttl = ttl;
        self
    }

    /// Whether a column of this type can usefully carry an index.
    pub fn is_indexable_type(&self, data_type: &str) -> bool {
        let lowered = data_type.to_lowercase();
        !self
            .unindexable_types
            .iter()
            .any(|t| lowered.contains(t.to_lowercase().as_str()))
    }
}

/// Namespaces used in the keyed store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Namespace holding the cheap list-view summaries
    pub sparse_namespace: String,
    /// Namespace holding the full capture payloads
    pub full_namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sparse_namespace: "recorder-requests-sparse".to_string(),
            full_namespace: "recorder-requests".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespaces(mut self, sparse: impl Into<String>, full: impl Into<String>) -> Self {
        self.sparse_namespace = sparse.into();
        self.full_namespace = full.into();
        self
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryWatchConfig {
    pub recorder: RecorderConfig,
    pub advisor: AdvisorConfig,
    pub store: StoreConfig,
}

impl QueryWatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_recorder(mut self, recorder: RecorderConfig) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_advisor(mut self, advisor: AdvisorConfig) -> Self {
        self.advisor = advisor;
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueryWatchConfig::default();
        assert!(config.recorder.record_sql);
        assert_eq!(config.recorder.auto_disable_after, Duration::from_secs(600));
        assert_eq!(config.advisor.default_cardinality, 2);
        assert_eq!(config.advisor.identity_column, "name");
        assert_eq!(config.store.full_namespace, "recorder-requests");
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config = QueryWatchConfig::from_json(
            r#"{"advisor": {"acceptance_threshold": 0.1, "cardinality_ttl": 1000}}"#,
        )
        .unwrap();
        assert_eq!(config.advisor.acceptance_threshold, 0.1);
        assert_eq!(config.advisor.cardinality_ttl, Duration::from_secs(1));
        assert_eq!(config.advisor.max_recommendations, 5);
        assert!(config.recorder.capture_stack);
    }

    #[test]
    fn test_json_roundtrip_preserves_durations() {
        let config = QueryWatchConfig::new().with_recorder(
            RecorderConfig::new().with_auto_disable_after(Duration::from_millis(1500)),
        );
        let parsed = QueryWatchConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_indexable_types() {
        let config = AdvisorConfig::default();
        assert!(config.is_indexable_type("varchar(140)"));
        assert!(config.is_indexable_type("datetime(6)"));
        assert!(!config.is_indexable_type("longtext"));
        assert!(!config.is_indexable_type("JSON"));
        assert!(!config.is_indexable_type("mediumblob"));
    }

    #[test]
    fn test_builders() {
        let config = AdvisorConfig::new()
            .with_max_recommendations(3)
            .with_identity_column("id")
            .with_default_cardinality(4);
        assert_eq!(config.max_recommendations, 3);
        assert_eq!(config.identity_column, "id");
        assert_eq!(config.default_cardinality, 4);
    }
}
