//! Identity, naming and parameter types shared across the tree

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identity of a top-level cohort configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigId(pub u64);

/// Identity of a set-operation container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(pub u64);

/// Identity of an aggregate leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeafId(pub u64);

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LeafId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of a node in the tree, used to target a leaf or container
/// from outside (e.g. an early-termination point).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id")]
pub enum NodeId {
    Container(ContainerId),
    Leaf(LeafId),
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Container(id) => write!(f, "container:{id}"),
            NodeId::Leaf(id) => write!(f, "leaf:{id}"),
        }
    }
}

impl FromStr for NodeId {
    type Err = String;

    /// Parses `"leaf:3"` / `"container:7"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("expected <kind>:<id>, got {s:?}"))?;
        let id: u64 = id
            .parse()
            .map_err(|_| format!("node id must be an integer, got {id:?}"))?;
        match kind {
            "leaf" => Ok(NodeId::Leaf(LeafId(id))),
            "container" => Ok(NodeId::Container(ContainerId(id))),
            other => Err(format!("unknown node kind {other:?}, expected leaf or container")),
        }
    }
}

/// Set operation combining the children of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetOperation {
    Union,
    Intersect,
    Except,
}

/// A table reference, optionally qualified by database and schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    pub name: String,
}

impl TableRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            database: None,
            schema: None,
            name: name.into(),
        }
    }
}

/// A column reference, optionally qualified by table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    pub column: String,
}

/// Nesting level at which a parameter was declared. Ascending specificity:
/// a more specific declaration overrides a less specific one of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ParameterScope {
    Global,
    CompositeQueryLevel,
    QueryLevel,
    TableInfo,
}

/// A named, typed SQL variable referenced by filter fragments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    /// e.g. `@bob`
    pub name: String,

    /// e.g. `DECLARE @bob AS varchar(10);`
    pub declaration: String,

    /// Raw SQL value text, e.g. `'E11'`
    pub value: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Parameter {
    pub fn new(
        name: impl Into<String>,
        declaration: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            declaration: declaration.into(),
            value: value.into(),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Same logical parameter: name, declaration and value all match.
    /// Comments do not participate in identity.
    pub fn same_logical_parameter(&self, other: &Parameter) -> bool {
        self.name == other.name
            && self.declaration == other.declaration
            && self.value == other.value
    }
}
