//! Table, column and index snapshots used by the index advisor.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Structured `(table, column)` key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnKey {
    pub table: String,
    pub column: String,
}

impl ColumnKey {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// A column as reported by the statistics provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DBColumn {
    pub name: String,
    /// Number of distinct values, if known
    pub cardinality: Option<u64>,
    pub nullable: bool,
    pub default: Option<String>,
    pub data_type: String,
}

impl DBColumn {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cardinality: None,
            nullable: true,
            default: None,
            data_type: data_type.into(),
        }
    }

    pub fn with_cardinality(mut self, cardinality: u64) -> Self {
        self.cardinality = Some(cardinality);
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// One row of index metadata: a single column at a position inside a
/// (possibly composite) index. Also used for not-yet-existing candidates.
///
/// Equality and hashing are structural over `(table, column, sequence)`:
/// two identically shaped indexes with different names are duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DBIndex {
    pub name: String,
    pub table: String,
    pub column: String,
    /// 1-based position of `column` inside the index
    pub sequence: u32,
    pub unique: Option<bool>,
    pub cardinality: Option<u64>,
    /// Expected fraction of the table scanned when using this index
    pub score: f64,
}

impl DBIndex {
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
        sequence: u32,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            column: column.into(),
            sequence,
            unique: None,
            cardinality: None,
            score: 0.0,
        }
    }

    /// A single-column index that does not exist yet.
    pub fn candidate(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::new("", table, column, 1)
    }

    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = Some(unique);
        self
    }

    pub fn with_cardinality(mut self, cardinality: u64) -> Self {
        self.cardinality = Some(cardinality);
        self
    }

    pub fn key(&self) -> ColumnKey {
        ColumnKey::new(self.table.clone(), self.column.clone())
    }
}

impl PartialEq for DBIndex {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table && self.column == other.column && self.sequence == other.sequence
    }
}

impl Eq for DBIndex {}

impl Hash for DBIndex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.table.hash(state);
        self.column.hash(state);
        self.sequence.hash(state);
    }
}

/// What a provider reports for one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDescription {
    pub columns: Vec<DBColumn>,
    pub indexes: Vec<DBIndex>,
    pub approx_row_count: u64,
}

impl TableDescription {
    pub fn new(approx_row_count: u64) -> Self {
        Self {
            approx_row_count,
            ..Default::default()
        }
    }

    pub fn with_column(mut self, column: DBColumn) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_index(mut self, index: DBIndex) -> Self {
        self.indexes.push(index);
        self
    }
}

/// A table snapshot, rebuilt for every advisor run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DBTable {
    pub name: String,
    pub total_rows: u64,
    pub columns: Vec<DBColumn>,
    pub indexes: Vec<DBIndex>,
}

impl DBTable {
    pub fn from_description(name: impl Into<String>, description: TableDescription) -> Self {
        let name = name.into();
        let indexes = description
            .indexes
            .into_iter()
            .map(|mut index| {
                index.table = name.clone();
                index
            })
            .collect();
        Self {
            name,
            total_rows: description.approx_row_count,
            columns: description.columns,
            indexes,
        }
    }

    /// Look up a column by name. Column names are case-insensitive.
    pub fn column(&self, name: &str) -> Option<&DBColumn> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Existing indexes as ordered column lists, grouped by index name.
    /// Result is sorted by index name.
    pub fn index_columns(&self) -> Vec<(String, Vec<String>)> {
        let mut grouped: BTreeMap<&str, Vec<&DBIndex>> = BTreeMap::new();
        for index in &self.indexes {
            grouped.entry(index.name.as_str()).or_default().push(index);
        }
        grouped
            .into_iter()
            .map(|(name, mut rows)| {
                rows.sort_by_key(|r| r.sequence);
                (
                    name.to_string(),
                    rows.into_iter().map(|r| r.column.clone()).collect(),
                )
            })
            .collect()
    }

    /// Record an exact distinct count for `column`, also on index rows
    /// that lead with it.
    pub fn update_cardinality(&mut self, column: &str, cardinality: u64) {
        if let Some(c) = self.columns.iter_mut().find(|c| c.name == column) {
            c.cardinality = Some(cardinality);
        }
        for index in self
            .indexes
            .iter_mut()
            .filter(|i| i.column == column && i.sequence == 1)
        {
            index.cardinality = Some(cardinality);
        }
    }

    /// Back-fill cardinality from histogram statistics. Only fills gaps.
    pub fn apply_column_statistics(&mut self, distinct_counts: &HashMap<String, u64>) {
        for column in &mut self.columns {
            if column.cardinality.is_none() {
                if let Some(&n) = distinct_counts.get(&column.name) {
                    column.cardinality = Some(n);
                }
            }
        }
        for index in &mut self.indexes {
            if index.cardinality.is_none() && index.sequence == 1 {
                if let Some(&n) = distinct_counts.get(&index.column) {
                    index.cardinality = Some(n);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn user_table() -> DBTable {
        DBTable::from_description(
            "tabUser",
            TableDescription::new(1000)
                .with_column(DBColumn::new("name", "varchar(140)").with_nullable(false))
                .with_column(DBColumn::new("email", "varchar(140)"))
                .with_column(DBColumn::new("enabled", "int(1)").with_default("1"))
                .with_index(DBIndex::new("PRIMARY", "", "name", 1).with_unique(true))
                .with_index(DBIndex::new("idx_ab", "", "enabled", 2))
                .with_index(DBIndex::new("idx_ab", "", "email", 1)),
        )
    }

    #[test]
    fn test_column_lookup_ignores_case() {
        let table = user_table();
        assert_eq!(table.column("EMAIL").map(|c| c.name.as_str()), Some("email"));
        assert!(table.has_column("Enabled"));
        assert!(!table.has_column("emails"));
    }

    #[test]
    fn test_index_equality_is_structural() {
        let a = DBIndex::new("idx_one", "t", "c", 1);
        let b = DBIndex::new("idx_two", "t", "c", 1).with_unique(true);
        let c = DBIndex::new("idx_one", "t", "c", 2);
        assert_eq!(a, b);
        assert_ne!(a, c);
        let set: HashSet<DBIndex> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_from_description_sets_table_on_indexes() {
        let table = user_table();
        assert!(table.indexes.iter().all(|i| i.table == "tabUser"));
        assert_eq!(table.total_rows, 1000);
        assert!(table.has_column("email"));
        assert!(!table.has_column("bio"));
    }

    #[test]
    fn test_index_columns_grouped_and_ordered() {
        let table = user_table();
        assert_eq!(
            table.index_columns(),
            vec![
                ("PRIMARY".to_string(), vec!["name".to_string()]),
                (
                    "idx_ab".to_string(),
                    vec!["email".to_string(), "enabled".to_string()]
                ),
            ]
        );
    }

    #[test]
    fn test_update_cardinality() {
        let mut table = user_table();
        table.update_cardinality("email", 990);
        assert_eq!(table.column("email").unwrap().cardinality, Some(990));
        let lead = table.indexes.iter().find(|i| i.column == "email").unwrap();
        assert_eq!(lead.cardinality, Some(990));
    }

    #[test]
    fn test_apply_column_statistics_only_fills_gaps() {
        let mut table = user_table();
        table.update_cardinality("email", 10);
        let stats: HashMap<String, u64> =
            [("email".to_string(), 500), ("enabled".to_string(), 2)].into();
        table.apply_column_statistics(&stats);
        assert_eq!(table.column("email").unwrap().cardinality, Some(10));
        assert_eq!(table.column("enabled").unwrap().cardinality, Some(2));
        // enabled is second in idx_ab, so the index row is not back-filled
        let row = table.indexes.iter().find(|i| i.column == "enabled").unwrap();
        assert_eq!(row.cardinality, None);
    }
}
