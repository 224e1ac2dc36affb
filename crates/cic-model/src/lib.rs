//! Input tree for the cohort identification query compiler
//!
//! A cohort configuration is a tree of set-operation containers whose leaves
//! are dataset-scoped aggregate sub-queries. The compiler treats the tree as
//! a read-only snapshot; all types serialize deterministically so a snapshot
//! can be persisted, diffed and identified by hash.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

mod filter;
mod types;

pub use filter::*;
pub use types::*;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("container {container} has duplicate sibling rank {rank}")]
    DuplicateRank { container: ContainerId, rank: i32 },
}

/// Top-level cohort identification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortConfiguration {
    pub id: ConfigId,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Global parameters, declared ahead of anything discovered in the tree
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,

    /// Exactly one root container per compilable configuration; absence is
    /// a configuration error reported at compile time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_container: Option<Container>,
}

impl CohortConfiguration {
    /// Calculate fingerprint (SHA-256) of the canonical snapshot form
    pub fn fingerprint(&self) -> String {
        fingerprint_of(self)
    }
}

/// A node in the tree: either a set-operation container or an aggregate leaf
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Node {
    Container(Container),
    Leaf(AggregateLeaf),
}

impl Node {
    pub fn id(&self) -> NodeId {
        match self {
            Node::Container(c) => NodeId::Container(c.id()),
            Node::Leaf(l) => NodeId::Leaf(l.id),
        }
    }
}

/// An ordered child slot within a container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Child {
    /// Explicit order among siblings; ties are rejected at construction
    pub rank: i32,

    pub node: Node,
}

impl Child {
    pub fn new(rank: i32, node: Node) -> Self {
        Self { rank, node }
    }
}

/// A set-operation node combining its children via UNION/INTERSECT/EXCEPT
///
/// Children are held sorted by ascending rank. Duplicate ranks are rejected
/// when the container is built, including when deserializing, so the
/// compiler never has to break ties.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ContainerDoc")]
pub struct Container {
    id: ContainerId,
    operation: SetOperation,
    children: Vec<Child>,
}

impl Container {
    pub fn new(
        id: ContainerId,
        operation: SetOperation,
        mut children: Vec<Child>,
    ) -> Result<Self, ModelError> {
        children.sort_by_key(|c| c.rank);
        for pair in children.windows(2) {
            if pair[0].rank == pair[1].rank {
                return Err(ModelError::DuplicateRank {
                    container: id,
                    rank: pair[0].rank,
                });
            }
        }
        Ok(Self {
            id,
            operation,
            children,
        })
    }

    pub fn id(&self) -> ContainerId {
        self.id
    }

    pub fn operation(&self) -> SetOperation {
        self.operation
    }

    /// Children in ascending rank order
    pub fn children(&self) -> &[Child] {
        &self.children
    }
}

/// Mirror of [`Container`] used to validate rank uniqueness on deserialize
#[derive(Deserialize)]
struct ContainerDoc {
    id: ContainerId,
    operation: SetOperation,
    children: Vec<Child>,
}

impl TryFrom<ContainerDoc> for Container {
    type Error = ModelError;

    fn try_from(doc: ContainerDoc) -> Result<Self, Self::Error> {
        Container::new(doc.id, doc.operation, doc.children)
    }
}

/// One dataset-scoped aggregate sub-query contributing a set of identifiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateLeaf {
    pub id: LeafId,

    /// Display name, emitted in the identity comment of the generated SQL
    pub name: String,

    /// Primary table the sub-query selects from
    pub table: TableRef,

    /// Selected columns: the identifier column plus optional extra grouping
    /// columns. Must be non-empty when compiled standalone.
    pub columns: Vec<ColumnRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterContainer>,

    /// Raw HAVING fragment; requires a non-empty grouping clause
    #[serde(skip_serializing_if = "Option::is_none")]
    pub having: Option<String>,

    #[serde(default)]
    pub disabled: bool,

    /// Container that holds this leaf; `None` for a standalone leaf
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ContainerId>,
}

impl AggregateLeaf {
    /// Calculate fingerprint (SHA-256) of the canonical snapshot form
    pub fn fingerprint(&self) -> String {
        fingerprint_of(self)
    }
}

fn fingerprint_of<T: Serialize>(value: &T) -> String {
    let json = serde_json::to_string(value).expect("tree snapshots always serialize");
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}
