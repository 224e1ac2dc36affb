//! Cohort identification query compiler
//!
//! Turns a tree of patient-set sub-queries combined by set-algebra
//! operators into a single executable SQL statement: leaves compile to
//! `SELECT DISTINCT` identifier queries (or are swapped for previously
//! materialized tables), containers parenthesize and join their children
//! with UNION/INTERSECT/EXCEPT, and parameters declared by independent
//! filter fragments are merged or renamed into one declaration block.

pub mod aggregate;
pub mod builder;
pub mod dialect;
pub mod params;

pub use aggregate::{build_leaf_sql, LeafError, SelectMode};
pub use builder::{CohortQueryBuilder, CompileError, LeafFailure};
pub use dialect::Dialect;
pub use params::{next_available_name, ParameterError, ParameterManager, ResolvedParameter};
