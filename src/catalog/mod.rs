//! Live table metadata consumed by the index advisor.
//!
//! A [`TableStatsProvider`] describes tables (columns, indexes, approximate
//! row count) and answers exact distinct-count queries. Implementations talk
//! to the live database; [`MemoryStatsProvider`] keeps everything in process.

mod table;

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;

pub use table::{ColumnKey, DBColumn, DBIndex, DBTable, TableDescription};

use crate::error::{QueryWatchError, Result};

/// Read-only access to table shape and statistics.
///
/// Implementations against a real database must run every call inside a
/// read-only transaction and must honour `timeout` for distinct counts,
/// returning [`QueryWatchError::Timeout`] when it is exceeded.
pub trait TableStatsProvider: Send + Sync {
    /// Describe a table. `Ok(None)` means the table does not exist.
    fn describe_table(&self, table: &str) -> Result<Option<TableDescription>>;

    /// Exact number of distinct values in `table.column`. Potentially a full scan.
    fn column_cardinality(&self, table: &str, column: &str, timeout: Duration) -> Result<u64>;

    /// Distinct counts the engine already keeps in histograms, if any.
    fn column_statistics(&self, _table: &str) -> Result<HashMap<String, u64>> {
        Ok(HashMap::new())
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryTableStats {
    description: TableDescription,
    distinct_counts: HashMap<String, u64>,
    histograms: HashMap<String, u64>,
    query_costs: HashMap<String, Duration>,
}

/// In-process statistics provider.
///
/// Keeps a log of every distinct-count query it answered, which makes the
/// cost of the second advisor pass observable.
#[derive(Debug, Default)]
pub struct MemoryStatsProvider {
    tables: RwLock<HashMap<String, MemoryTableStats>>,
    cardinality_log: RwLock<Vec<ColumnKey>>,
}

impl MemoryStatsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a table.
    pub fn register_table(&self, name: impl Into<String>, description: TableDescription) {
        self.tables.write().insert(
            name.into(),
            MemoryTableStats {
                description,
                ..Default::default()
            },
        );
    }

    pub fn drop_table(&self, name: &str) -> bool {
        self.tables.write().remove(name).is_some()
    }

    /// Remove every index of a table.
    pub fn drop_indexes(&self, table: &str) -> Result<()> {
        let mut tables = self.tables.write();
        let stats = tables
            .get_mut(table)
            .ok_or_else(|| QueryWatchError::missing_tables([table]))?;
        stats.description.indexes.clear();
        Ok(())
    }

    pub fn add_index(&self, table: &str, index: DBIndex) -> Result<()> {
        let mut tables = self.tables.write();
        let stats = tables
            .get_mut(table)
            .ok_or_else(|| QueryWatchError::missing_tables([table]))?;
        stats.description.indexes.push(index);
        Ok(())
    }

    /// Set the exact distinct count answered by [`TableStatsProvider::column_cardinality`].
    pub fn set_distinct_count(&self, table: &str, column: &str, count: u64) -> Result<()> {
        self.with_table(table, |stats| {
            stats.distinct_counts.insert(column.to_string(), count);
        })
    }

    /// Set a histogram-derived distinct count.
    pub fn set_histogram(&self, table: &str, column: &str, count: u64) -> Result<()> {
        self.with_table(table, |stats| {
            stats.histograms.insert(column.to_string(), count);
        })
    }

    /// Simulated run time of the distinct-count query for a column.
    pub fn set_query_cost(&self, table: &str, column: &str, cost: Duration) -> Result<()> {
        self.with_table(table, |stats| {
            stats.query_costs.insert(column.to_string(), cost);
        })
    }

    /// Distinct-count queries answered so far, in order.
    pub fn cardinality_queries(&self) -> Vec<ColumnKey> {
        self.cardinality_log.read().clone()
    }

    fn with_table(&self, table: &str, f: impl FnOnce(&mut MemoryTableStats)) -> Result<()> {
        let mut tables = self.tables.write();
        let stats = tables
            .get_mut(table)
            .ok_or_else(|| QueryWatchError::missing_tables([table]))?;
        f(stats);
        Ok(())
    }
}

impl TableStatsProvider for MemoryStatsProvider {
    fn describe_table(&self, table: &str) -> Result<Option<TableDescription>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .map(|stats| stats.description.clone()))
    }

    fn column_cardinality(&self, table: &str, column: &str, timeout: Duration) -> Result<u64> {
        self.cardinality_log
            .write()
            .push(ColumnKey::new(table, column));

        let tables = self.tables.read();
        let stats = tables
            .get(table)
            .ok_or_else(|| QueryWatchError::missing_tables([table]))?;

        if let Some(cost) = stats.query_costs.get(column) {
            if *cost > timeout {
                return Err(QueryWatchError::timeout(format!(
                    "count(distinct {}) on {} exceeded {:?}",
                    column, table, timeout
                )));
            }
        }

        if !stats.description.columns.iter().any(|c| c.name == column) {
            return Err(QueryWatchError::stats(format!(
                "Unknown column {}.{}",
                table, column
            )));
        }

        Ok(stats
            .distinct_counts
            .get(column)
            .copied()
            .unwrap_or(stats.description.approx_row_count))
    }

    fn column_statistics(&self, table: &str) -> Result<HashMap<String, u64>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .map(|stats| stats.histograms.clone())
            .unwrap_or_default())
    }
}
