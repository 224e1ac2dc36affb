//! Recursive compilation of a cohort configuration into one SQL statement
//!
//! The builder walks the container tree in rank order, emitting one
//! parenthesized block per surviving child and joining blocks with the
//! container's set operator. Leaves with a fresh materialization are
//! replaced by a plain select from the cached table; everything else is
//! generated inline. Discovered parameters are resolved once for the whole
//! statement and declared ahead of the body.

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use cic_cache::{CacheError, CacheManager, CacheOperation};
use cic_model::{
    AggregateLeaf, CohortConfiguration, ColumnRef, ConfigId, Container, LeafId, Node, NodeId,
    ParameterScope,
};

use crate::aggregate::{build_leaf_sql, identity_comment, LeafError, SelectMode};
use crate::dialect::Dialect;
use crate::params::{ParameterError, ParameterManager};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("cohort configuration {0} has no root container")]
    MissingRootContainer(ConfigId),

    #[error("stop target {0} is not a direct child of the root container")]
    StopTargetNotTopLevel(NodeId),

    #[error("stop target {0} does not appear in the query tree")]
    StopTargetUnknown(NodeId),

    #[error("dialect {0} cannot combine cached results with set operations")]
    CacheDialectUnsupported(Dialect),

    #[error("nothing to compile: every block in the root container is disabled or empty")]
    NothingToCompile,

    #[error("global parameter error: {0}")]
    GlobalParameter(#[source] ParameterError),

    #[error("{}", format_failures(.0))]
    LeafFailures(Vec<LeafFailure>),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Leaf(#[from] LeafError),
}

/// One leaf that failed to compile; siblings still compile, and the whole
/// set of failures is reported together
#[derive(Debug)]
pub struct LeafFailure {
    pub leaf: LeafId,
    pub name: String,
    pub error: LeafError,
}

fn format_failures(failures: &[LeafFailure]) -> String {
    let details: Vec<String> = failures
        .iter()
        .map(|f| format!("{} (leaf {}): {}", f.name, f.leaf, f.error))
        .collect();
    format!(
        "{} aggregate(s) failed to compile: {}",
        failures.len(),
        details.join("; ")
    )
}

/// State threaded through one recursive compile call
struct CompileContext {
    params: ParameterManager,
    failures: Vec<LeafFailure>,
    stop_at: Option<NodeId>,
    stopped: bool,
}

impl CompileContext {
    fn new(stop_at: Option<NodeId>) -> Self {
        Self {
            params: ParameterManager::new(),
            failures: Vec::new(),
            stop_at,
            stopped: false,
        }
    }
}

/// Compiles cohort trees to SQL, holding the settings that shape the output
/// and a buffer of the last resolved text.
///
/// Any setter marks the buffer out of date; the next `sql_*` call
/// recompiles. A builder instance serves one subject at a time and is not
/// safe for concurrent compile calls; independent trees get independent
/// builders.
#[derive(Debug)]
pub struct CohortQueryBuilder {
    dialect: Dialect,
    cache: Option<CacheManager>,
    include_parameters: bool,
    resolved: Option<String>,
    out_of_date: bool,
}

impl CohortQueryBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            cache: None,
            include_parameters: true,
            resolved: None,
            out_of_date: true,
        }
    }

    pub fn with_cache(mut self, cache: CacheManager) -> Self {
        self.set_cache(Some(cache));
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn cache(&self) -> Option<&CacheManager> {
        self.cache.as_ref()
    }

    pub fn cache_mut(&mut self) -> Option<&mut CacheManager> {
        self.invalidate();
        self.cache.as_mut()
    }

    pub fn set_cache(&mut self, cache: Option<CacheManager>) {
        self.cache = cache;
        self.invalidate();
    }

    /// Whether the parameter declaration block is prepended to the body
    pub fn set_include_parameters(&mut self, include: bool) {
        self.include_parameters = include;
        self.invalidate();
    }

    /// Force recompilation on the next `sql_*` call
    pub fn invalidate(&mut self) {
        self.out_of_date = true;
    }

    pub fn is_out_of_date(&self) -> bool {
        self.out_of_date
    }

    /// Resolved SQL for the configuration, recompiling only when out of date
    pub fn sql_for_configuration(
        &mut self,
        config: &CohortConfiguration,
    ) -> Result<&str, CompileError> {
        let sql = match self.resolved.take() {
            Some(sql) if !self.out_of_date => sql,
            _ => self.compile_configuration(config, None)?,
        };
        self.out_of_date = false;
        Ok(self.resolved.insert(sql))
    }

    /// Resolved SQL for a standalone leaf, recompiling only when out of date
    pub fn sql_for_leaf(
        &mut self,
        leaf: &AggregateLeaf,
        mode: SelectMode,
    ) -> Result<&str, CompileError> {
        let sql = match self.resolved.take() {
            Some(sql) if !self.out_of_date => sql,
            _ => self.compile_leaf(leaf, mode)?,
        };
        self.out_of_date = false;
        Ok(self.resolved.insert(sql))
    }

    /// Single-shot compilation of a whole configuration.
    ///
    /// When `stop_at` names a direct child of the root container,
    /// compilation ends once that child's block has been emitted and the
    /// remaining top-level siblings are left out. Targets anywhere deeper
    /// are a caller error.
    pub fn compile_configuration(
        &self,
        config: &CohortConfiguration,
        stop_at: Option<NodeId>,
    ) -> Result<String, CompileError> {
        let root = config
            .root_container
            .as_ref()
            .ok_or(CompileError::MissingRootContainer(config.id))?;

        if self.cache.is_some() && !self.dialect.supports_set_operations_when_cached() {
            return Err(CompileError::CacheDialectUnsupported(self.dialect));
        }
        if let Some(target) = stop_at {
            let top_level = root.children().iter().any(|c| c.node.id() == target);
            if !top_level {
                return Err(if contains_node(root, target) {
                    CompileError::StopTargetNotTopLevel(target)
                } else {
                    CompileError::StopTargetUnknown(target)
                });
            }
        }

        let compile_id = Uuid::new_v4();
        debug!(
            %compile_id,
            configuration = %config.id,
            fingerprint = %config.fingerprint(),
            dialect = %self.dialect,
            "compiling cohort configuration"
        );

        let mut ctx = CompileContext::new(stop_at);
        for parameter in &config.parameters {
            ctx.params
                .register(parameter, ParameterScope::Global)
                .map_err(CompileError::GlobalParameter)?;
        }

        let body = self.compile_container(root, config, 0, &mut ctx)?;
        if !ctx.failures.is_empty() {
            return Err(CompileError::LeafFailures(ctx.failures));
        }
        let body = body.ok_or(CompileError::NothingToCompile)?;

        let sql = if self.include_parameters && !ctx.params.is_empty() {
            format!("{}\n\n{body}", ctx.params.declaration_block(self.dialect))
        } else {
            body
        };
        debug!(%compile_id, stopped_early = ctx.stopped, bytes = sql.len(), "compiled");
        Ok(sql)
    }

    /// Single-shot compilation of one leaf outside any container
    pub fn compile_leaf(
        &self,
        leaf: &AggregateLeaf,
        mode: SelectMode,
    ) -> Result<String, CompileError> {
        // previews show raw rows; only identifier lists are materialized
        if matches!(mode, SelectMode::DistinctIdentifiers) {
            if let Some(cached) = self.cached_block(leaf, None, mode)? {
                return Ok(cached);
            }
        }

        let mut params = ParameterManager::new();
        let body = build_leaf_sql(leaf, None, self.dialect, mode, &mut params)?;
        if self.include_parameters && !params.is_empty() {
            Ok(format!(
                "{}\n\n{body}",
                params.declaration_block(self.dialect)
            ))
        } else {
            Ok(body)
        }
    }

    fn compile_container(
        &self,
        container: &Container,
        config: &CohortConfiguration,
        depth: usize,
        ctx: &mut CompileContext,
    ) -> Result<Option<String>, CompileError> {
        let mut blocks: Vec<String> = Vec::new();

        for child in container.children() {
            match &child.node {
                Node::Leaf(leaf) => {
                    if leaf.disabled {
                        continue;
                    }
                    match self.leaf_block(leaf, config, ctx)? {
                        Ok(block) => blocks.push(block),
                        Err(error) => ctx.failures.push(LeafFailure {
                            leaf: leaf.id,
                            name: leaf.name.clone(),
                            error,
                        }),
                    }
                }
                Node::Container(subcontainer) => {
                    if let Some(block) =
                        self.compile_container(subcontainer, config, depth + 1, ctx)?
                    {
                        blocks.push(block);
                    }
                }
            }

            if depth == 0 && ctx.stop_at == Some(child.node.id()) {
                ctx.stopped = true;
                debug!(stop_target = %child.node.id(), "stop target reached, compilation is complete");
                break;
            }
        }

        if blocks.is_empty() {
            return Ok(None);
        }
        let keyword = self.dialect.set_operator_sql(container.operation());
        Ok(Some(format!(
            "(\n{}\n)",
            blocks.join(&format!("\n\n{keyword}\n\n"))
        )))
    }

    /// One leaf's block: a select from its fresh materialization if the
    /// cache has one, the inline sub-query otherwise. The outer `Result`
    /// carries hard cache failures; the inner one carries per-leaf errors
    /// that must not abort sibling leaves.
    fn leaf_block(
        &self,
        leaf: &AggregateLeaf,
        config: &CohortConfiguration,
        ctx: &mut CompileContext,
    ) -> Result<Result<String, LeafError>, CacheError> {
        if self.cache.is_some() {
            // probe with a scratch manager so a cache hit registers nothing
            match self.cached_block(leaf, Some(config.id), SelectMode::DistinctIdentifiers) {
                Ok(Some(block)) => return Ok(Ok(block)),
                Ok(None) => {}
                Err(CompileError::Cache(e)) => return Err(e),
                Err(CompileError::Leaf(e)) => return Ok(Err(e)),
                // cached_block raises nothing else
                Err(_) => {}
            }
        }
        Ok(build_leaf_sql(
            leaf,
            Some(config.id),
            self.dialect,
            SelectMode::DistinctIdentifiers,
            &mut ctx.params,
        ))
    }

    /// Select-from-cache block for a leaf whose stored SQL still matches
    /// what would be generated now; `None` on miss or stale entry
    fn cached_block(
        &self,
        leaf: &AggregateLeaf,
        config: Option<ConfigId>,
        mode: SelectMode,
    ) -> Result<Option<String>, CompileError> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };

        let mut scratch = ParameterManager::new();
        let current_sql = build_leaf_sql(leaf, config, self.dialect, mode, &mut scratch)?;

        let Some(table) =
            cache.lookup_if_fresh(leaf.id, CacheOperation::IdentifierList, &current_sql)?
        else {
            debug!(leaf = %leaf.id, "no fresh materialization, compiling inline");
            return Ok(None);
        };

        let columns: Vec<String> = leaf
            .columns
            .iter()
            .map(|c| {
                self.dialect.qualify_column(&ColumnRef {
                    table: None,
                    column: c.column.clone(),
                })
            })
            .collect();
        let table_sql = self.dialect.qualify_table(&cache.table_ref(&table));
        debug!(leaf = %leaf.id, table = %table_sql, "substituting materialized table");
        Ok(Some(format!(
            "/*Cached:{}*/\nSELECT {} FROM {table_sql}",
            identity_comment_label(leaf, config),
            columns.join(", ")
        )))
    }
}

/// Label inside a `/*Cached:...*/` marker, matching the identity comment of
/// the inline form
fn identity_comment_label(leaf: &AggregateLeaf, config: Option<ConfigId>) -> String {
    let comment = identity_comment(leaf, config);
    comment
        .trim_start_matches("/*")
        .trim_end_matches("*/")
        .to_string()
}

/// Whether `target` appears anywhere beneath `container`
fn contains_node(container: &Container, target: NodeId) -> bool {
    container.children().iter().any(|child| match &child.node {
        Node::Leaf(leaf) => NodeId::Leaf(leaf.id) == target,
        Node::Container(sub) => {
            NodeId::Container(sub.id()) == target || contains_node(sub, target)
        }
    })
}
