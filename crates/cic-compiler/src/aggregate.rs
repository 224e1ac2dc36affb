//! SQL generation for a single aggregate leaf
//!
//! Produces the `SELECT DISTINCT <identifier> FROM ...` (or `TOP n *`
//! preview) text for one leaf, compiling its filter tree into a labeled
//! WHERE clause and registering every parameter an active fragment
//! references. The output is deterministic for a given leaf state; the
//! cache layer relies on that for staleness detection.

use thiserror::Error;
use tracing::debug;

use cic_model::{AggregateLeaf, ConfigId, FilterContainer, ParameterScope};

use crate::dialect::Dialect;
use crate::params::{substitute_name, ParameterError, ParameterManager};

/// Operating mode for leaf SQL generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// `SELECT DISTINCT <columns>`, the form combined by set operators
    DistinctIdentifiers,
    /// `SELECT TOP n *` style preview of the underlying rows
    Preview { rows: u32 },
}

#[derive(Debug, Error)]
pub enum LeafError {
    #[error("aggregate has no selected columns")]
    NoColumns,

    #[error("HAVING clause requires at least one grouping column")]
    HavingWithoutGrouping,

    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

/// Build the SQL text for one leaf, registering its parameters with
/// `params`. `config` is the owning configuration, if any; it appears in
/// the identity comment so generated SQL can be traced back to its origin.
pub fn build_leaf_sql(
    leaf: &AggregateLeaf,
    config: Option<ConfigId>,
    dialect: Dialect,
    mode: SelectMode,
    params: &mut ParameterManager,
) -> Result<String, LeafError> {
    if leaf.columns.is_empty() {
        return Err(if leaf.having.is_some() {
            LeafError::HavingWithoutGrouping
        } else {
            LeafError::NoColumns
        });
    }

    let columns: Vec<String> = leaf
        .columns
        .iter()
        .map(|c| dialect.qualify_column(c))
        .collect();
    let column_list = columns.join(", ");

    let mut sql = identity_comment(leaf, config);
    sql.push('\n');
    match mode {
        SelectMode::DistinctIdentifiers => {
            sql.push_str(&format!("SELECT DISTINCT {column_list}"));
        }
        SelectMode::Preview { rows } => {
            sql.push_str("SELECT ");
            if let Some(prefix) = dialect.top_select_prefix(rows) {
                sql.push_str(&prefix);
            }
            sql.push('*');
        }
    }
    sql.push_str(&format!("\nFROM {}", dialect.qualify_table(&leaf.table)));

    // renames discovered while compiling fragments, applied to HAVING too
    let mut renames: Vec<(String, String)> = Vec::new();

    if let Some(filters) = &leaf.filters {
        if let Some(body) = compile_filter_container(filters, params, &mut renames)? {
            sql.push_str(&format!("\nWHERE\n(\n{body}\n)"));
        }
    }

    if matches!(mode, SelectMode::DistinctIdentifiers) {
        if let Some(having) = &leaf.having {
            let mut having_sql = having.trim().to_string();
            for (from, to) in &renames {
                having_sql = substitute_name(&having_sql, from, to);
            }
            sql.push_str(&format!("\nGROUP BY\n{column_list}\nHAVING\n{having_sql}"));
        }
    }

    if let SelectMode::Preview { rows } = mode {
        if let Some(suffix) = dialect.top_suffix(rows) {
            sql.push_str(&format!("\n{suffix}"));
        }
    }

    debug!(leaf = %leaf.id, ?mode, bytes = sql.len(), "generated aggregate SQL");
    Ok(sql)
}

/// Leading comment tracing a block back to its origin node
pub(crate) fn identity_comment(leaf: &AggregateLeaf, config: Option<ConfigId>) -> String {
    match config {
        Some(id) => format!("/*cic_{id}_{}*/", leaf.name),
        None => format!("/*{}*/", leaf.name),
    }
}

/// Compile one filter container: active fragments first, then
/// subcontainers, joined with the container's boolean operator. Returns
/// `None` when nothing beneath it survives.
fn compile_filter_container(
    container: &FilterContainer,
    params: &mut ParameterManager,
    renames: &mut Vec<(String, String)>,
) -> Result<Option<String>, LeafError> {
    let mut pieces: Vec<String> = Vec::new();

    for filter in &container.filters {
        if filter.disabled {
            continue;
        }
        let mut fragment = filter.where_sql.trim().to_string();
        for parameter in &filter.parameters {
            let final_name = params.register(parameter, ParameterScope::QueryLevel)?;
            if final_name != parameter.name {
                fragment = substitute_name(&fragment, &parameter.name, &final_name);
                renames.push((parameter.name.clone(), final_name));
            }
        }
        pieces.push(format!("/*{}*/\n{fragment}", filter.name));
    }

    for subcontainer in &container.subcontainers {
        if let Some(body) = compile_filter_container(subcontainer, params, renames)? {
            pieces.push(format!("(\n{body}\n)"));
        }
    }

    if pieces.is_empty() {
        return Ok(None);
    }
    Ok(Some(
        pieces.join(&format!("\n{}\n", container.operator.sql())),
    ))
}
