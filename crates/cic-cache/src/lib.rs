//! Materialized-result cache for aggregate leaves
//!
//! Expensive leaf sub-queries can be executed once and their identifier
//! lists written to a side table. On later compiles the tree compiler swaps
//! the inline sub-query for a plain select from that table, provided the
//! stored SQL still matches what would be generated now (see [`text`]).
//! Staleness is not an error: a mismatch simply forces recomputation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use cic_model::{LeafId, TableRef};

mod store;
mod text;

pub use store::{CacheEntryRow, CacheStore, MemoryStore, ResultTable};
pub use text::{fingerprint, normalize};

/// Discriminates multiple materializations of the same leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheOperation {
    /// The distinct identifier list a leaf contributes to the cohort
    IdentifierList,
    /// The leaf's full aggregate result set
    AggregateResults,
}

impl fmt::Display for CacheOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheOperation::IdentifierList => write!(f, "IdentifierList"),
            CacheOperation::AggregateResults => write!(f, "AggregateResults"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    /// Metadata and storage have drifted out-of-band; never treated as a
    /// plain miss, so operators can detect it
    #[error(
        "cache metadata for leaf {leaf} ({operation}) names table {table}, \
         but that table does not exist"
    )]
    Integrity {
        leaf: LeafId,
        operation: CacheOperation,
        table: String,
    },

    #[error(
        "deleting the cache entry for leaf {leaf} ({operation}) removed \
         {removed} metadata rows, expected at most one"
    )]
    DeleteGuard {
        leaf: LeafId,
        operation: CacheOperation,
        removed: usize,
    },

    #[error("cache storage error: {0}")]
    Storage(String),
}

/// Looks up, validates and commits materialized leaf results
#[derive(Debug)]
pub struct CacheManager {
    store: Box<dyn CacheStore>,
    committer: String,
    schema: String,
}

impl CacheManager {
    pub fn new(store: Box<dyn CacheStore>, committer: impl Into<String>) -> Self {
        Self {
            store,
            committer: committer.into(),
            schema: "cache".to_string(),
        }
    }

    /// Schema under which materialized tables live (default `cache`)
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Deterministic name of the backing table for a (leaf, operation) pair
    pub fn table_name(leaf: LeafId, operation: CacheOperation) -> String {
        format!("{operation}_AggregateConfiguration{leaf}")
    }

    /// Schema-qualified reference to a materialized table
    pub fn table_ref(&self, table: &str) -> TableRef {
        TableRef {
            database: None,
            schema: Some(self.schema.clone()),
            name: table.to_string(),
        }
    }

    /// Raw metadata existence check. Does not validate freshness or that the
    /// backing table still exists; administrative tooling only.
    pub fn lookup(
        &self,
        leaf: LeafId,
        operation: CacheOperation,
    ) -> Result<Option<String>, CacheError> {
        Ok(self.store.entry(leaf, operation)?.map(|e| e.table_name))
    }

    /// Backing table for the pair iff the stored SQL still matches
    /// `current_sql` after normalization. A mismatch returns `None`.
    pub fn lookup_if_fresh(
        &self,
        leaf: LeafId,
        operation: CacheOperation,
        current_sql: &str,
    ) -> Result<Option<String>, CacheError> {
        let Some(entry) = self.store.entry(leaf, operation)? else {
            return Ok(None);
        };
        if !self.store.table_exists(&entry.table_name)? {
            return Err(CacheError::Integrity {
                leaf,
                operation,
                table: entry.table_name,
            });
        }
        if normalize(&entry.sql_executed) == normalize(current_sql) {
            debug!(%leaf, %operation, table = %entry.table_name, "cache entry is fresh");
            Ok(Some(entry.table_name))
        } else {
            debug!(
                %leaf,
                %operation,
                stored = %fingerprint(&entry.sql_executed),
                current = %fingerprint(current_sql),
                "cache entry is stale"
            );
            Ok(None)
        }
    }

    /// Replace any previous materialization for the pair and record the SQL
    /// that produced `result`. Returns the backing table name.
    ///
    /// The drop/create/insert sequence is not transactional: if the metadata
    /// insert fails after table creation, the orphaned table is left behind
    /// for operator cleanup.
    pub fn commit(
        &mut self,
        leaf: LeafId,
        operation: CacheOperation,
        result: &ResultTable,
        sql_executed: &str,
    ) -> Result<String, CacheError> {
        self.invalidate(leaf, operation)?;

        let table = Self::table_name(leaf, operation);
        self.store.create_table(&table, result)?;
        self.store.insert_entry(CacheEntryRow {
            committer: self.committer.clone(),
            leaf,
            sql_executed: sql_executed.trim().to_string(),
            operation,
            table_name: table.clone(),
            committed_at: chrono::Utc::now(),
        })?;

        debug!(%leaf, %operation, %table, rows = result.row_count(), "committed materialization");
        Ok(table)
    }

    /// Drop the backing table and metadata row for the pair. Idempotent when
    /// nothing exists; an integrity guard trips if the metadata delete
    /// removes more than one row.
    pub fn invalidate(
        &mut self,
        leaf: LeafId,
        operation: CacheOperation,
    ) -> Result<(), CacheError> {
        if let Some(entry) = self.store.entry(leaf, operation)? {
            self.store.drop_table(&entry.table_name)?;
        }
        let removed = self.store.delete_entries(leaf, operation)?;
        if removed > 1 {
            return Err(CacheError::DeleteGuard {
                leaf,
                operation,
                removed,
            });
        }
        Ok(())
    }

    /// Direct store access for administrative tooling and tests
    pub fn store_mut(&mut self) -> &mut dyn CacheStore {
        self.store.as_mut()
    }
}
