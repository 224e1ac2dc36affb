//! Storage seam for materialized results
//!
//! The cache manager performs blocking I/O through [`CacheStore`]; the
//! surrounding application supplies a store bound to its cache server.
//! [`MemoryStore`] backs tests and dry runs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cic_model::LeafId;

use crate::{CacheError, CacheOperation};

/// Rows copied into a materialized table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl ResultTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// One metadata row recording a committed materialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntryRow {
    pub committer: String,
    pub leaf: LeafId,
    pub sql_executed: String,
    pub operation: CacheOperation,
    pub table_name: String,
    pub committed_at: DateTime<Utc>,
}

/// Blocking storage operations against the cache backing store.
///
/// Implementations are not expected to coordinate concurrent writers;
/// callers serialize commits per (leaf, operation) pair.
pub trait CacheStore: std::fmt::Debug {
    /// Latest metadata row for the pair, if any
    fn entry(
        &self,
        leaf: LeafId,
        operation: CacheOperation,
    ) -> Result<Option<CacheEntryRow>, CacheError>;

    fn table_exists(&self, table: &str) -> Result<bool, CacheError>;

    fn create_table(&mut self, table: &str, rows: &ResultTable) -> Result<(), CacheError>;

    /// Dropping an absent table is not an error
    fn drop_table(&mut self, table: &str) -> Result<(), CacheError>;

    fn insert_entry(&mut self, entry: CacheEntryRow) -> Result<(), CacheError>;

    /// Returns how many metadata rows were removed
    fn delete_entries(
        &mut self,
        leaf: LeafId,
        operation: CacheOperation,
    ) -> Result<usize, CacheError>;
}

/// In-memory store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Vec<CacheEntryRow>,
    tables: HashMap<String, ResultTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn entry(
        &self,
        leaf: LeafId,
        operation: CacheOperation,
    ) -> Result<Option<CacheEntryRow>, CacheError> {
        Ok(self
            .entries
            .iter()
            .find(|e| e.leaf == leaf && e.operation == operation)
            .cloned())
    }

    fn table_exists(&self, table: &str) -> Result<bool, CacheError> {
        Ok(self.tables.contains_key(table))
    }

    fn create_table(&mut self, table: &str, rows: &ResultTable) -> Result<(), CacheError> {
        if self.tables.contains_key(table) {
            return Err(CacheError::Storage(format!("table {table} already exists")));
        }
        self.tables.insert(table.to_string(), rows.clone());
        Ok(())
    }

    fn drop_table(&mut self, table: &str) -> Result<(), CacheError> {
        self.tables.remove(table);
        Ok(())
    }

    fn insert_entry(&mut self, entry: CacheEntryRow) -> Result<(), CacheError> {
        self.entries.push(entry);
        Ok(())
    }

    fn delete_entries(
        &mut self,
        leaf: LeafId,
        operation: CacheOperation,
    ) -> Result<usize, CacheError> {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.leaf == leaf && e.operation == operation));
        Ok(before - self.entries.len())
    }
}
