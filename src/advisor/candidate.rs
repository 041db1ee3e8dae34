//! Index candidate generation.
//!
//! Candidates come from WHERE and JOIN columns, plus ORDER BY columns when the
//! statement is a top-N query (has a LIMIT). Bare columns are attributed to
//! the first referenced table that has them, then every column already
//! served by an existing index (as a left prefix of a possibly composite
//! index) is removed.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::catalog::{ColumnKey, DBIndex, DBTable};
use crate::config::AdvisorConfig;
use crate::sql::{ColumnRef, ExtractedClauses};

/// Turns extracted clauses into candidate indexes.
#[derive(Debug, Clone, Copy)]
pub struct CandidateGenerator<'a> {
    config: &'a AdvisorConfig,
}

impl<'a> CandidateGenerator<'a> {
    pub fn new(config: &'a AdvisorConfig) -> Self {
        Self { config }
    }

    /// Columns the statement would like to look up by, before resolution.
    pub fn required_columns(&self, clauses: &ExtractedClauses) -> Vec<ColumnRef> {
        let order_by: &[ColumnRef] = if clauses.has_limit {
            &clauses.order_by_columns
        } else {
            &[]
        };
        let mut seen = BTreeSet::new();
        clauses
            .where_columns
            .iter()
            .chain(clauses.join_columns.iter())
            .chain(order_by.iter())
            .filter(|c| !self.is_excluded(&c.column))
            .filter(|c| seen.insert((*c).clone()))
            .cloned()
            .collect()
    }

    /// Attribute every column to a concrete table that actually has it,
    /// using the table's own spelling of the column name. Columns no known
    /// table owns are dropped.
    pub fn resolve(
        &self,
        columns: &[ColumnRef],
        table_order: &[String],
        tables: &HashMap<String, DBTable>,
    ) -> BTreeSet<ColumnKey> {
        columns
            .iter()
            .filter_map(|column| {
                let owner = match &column.table {
                    Some(table) => tables.get(table).filter(|t| t.has_column(&column.column)),
                    None => table_order
                        .iter()
                        .filter_map(|name| tables.get(name))
                        .find(|t| t.has_column(&column.column)),
                }?;
                let canonical = owner.column(&column.column)?;
                Some(ColumnKey::new(owner.name.clone(), canonical.name.clone()))
            })
            .filter(|key| !self.is_excluded(&key.column))
            .collect()
    }

    /// Drop columns already served by an existing index.
    ///
    /// For every existing index the longest left prefix whose columns are all
    /// required is consumed, falling back to shorter prefixes. Prefixes are
    /// matched against the full requirement set so the order in which
    /// indexes are visited does not matter.
    pub fn remove_existing(
        &self,
        required: BTreeSet<ColumnKey>,
        tables: &HashMap<String, DBTable>,
    ) -> BTreeSet<ColumnKey> {
        let mut by_table: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for key in &required {
            by_table
                .entry(key.table.clone())
                .or_default()
                .insert(key.column.clone());
        }

        let mut remaining = required;
        for (table_name, wanted) in &by_table {
            let Some(table) = tables.get(table_name) else {
                continue;
            };
            for (_, index_columns) in table.index_columns() {
                if let Some(prefix) = longest_consumable_prefix(&index_columns, wanted) {
                    for column in prefix {
                        remaining.remove(&ColumnKey::new(table_name.clone(), column.clone()));
                    }
                }
            }
        }
        remaining
    }

    /// Full pipeline for one statement. Candidates are sorted by (table, column).
    pub fn generate(
        &self,
        clauses: &ExtractedClauses,
        tables: &HashMap<String, DBTable>,
    ) -> Vec<DBIndex> {
        let required = self.required_columns(clauses);
        let resolved = self.resolve(&required, &clauses.tables, tables);
        self.remove_existing(resolved, tables)
            .into_iter()
            .map(|key| DBIndex::candidate(key.table, key.column))
            .collect()
    }

    fn is_excluded(&self, column: &str) -> bool {
        column == self.config.wildcard || column == self.config.identity_column
    }
}

fn longest_consumable_prefix<'c>(
    index_columns: &'c [String],
    wanted: &BTreeSet<String>,
) -> Option<&'c [String]> {
    (1..=index_columns.len())
        .rev()
        .map(|len| &index_columns[..len])
        .find(|prefix| prefix.iter().all(|c| wanted.contains(c)))
}
