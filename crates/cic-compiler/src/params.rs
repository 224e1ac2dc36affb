//! Parameter collection and collision resolution
//!
//! Filter fragments are authored independently, so two of them can declare
//! `@bob` with different meanings. While the tree is walked every discovered
//! parameter is registered here; identical declarations merge, conflicting
//! ones are renamed with a deterministic numeric suffix, and `finalize`
//! hands back the scope-ordered list ready for declaration-block emission.

use std::collections::HashSet;

use regex::{NoExpand, Regex};
use thiserror::Error;

use cic_model::{Parameter, ParameterScope};

use crate::dialect::Dialect;

#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("parameter declaration {declaration:?} does not declare a name")]
    UnparseableDeclaration { declaration: String },

    #[error("parameter {name} declaration {declaration:?} declares a different name")]
    NameMismatch { name: String, declaration: String },

    #[error("parameter {name} has no value")]
    MissingValue { name: String },

    #[error("parameters are already finalized, no further registration is possible")]
    AlreadyResolved,
}

/// A registered parameter together with the name it was finally assigned
#[derive(Debug, Clone)]
pub struct ResolvedParameter {
    pub parameter: Parameter,
    pub scope: ParameterScope,
    /// Equals the original name unless a collision forced a rename
    pub final_name: String,
}

/// Collects parameters during compilation and resolves name collisions
#[derive(Debug, Default)]
pub struct ParameterManager {
    entries: Vec<ResolvedParameter>,
    resolved: bool,
}

impl ParameterManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Register a parameter discovered at `scope` and return the name its
    /// references must use.
    ///
    /// A parameter identical in name, declaration and value to one already
    /// registered is merged and keeps that entry's name. A parameter whose
    /// name is taken but whose declaration or value differs is renamed with
    /// the next free `_2`, `_3`, ... suffix; the first occurrence always
    /// keeps the original name.
    pub fn register(
        &mut self,
        parameter: &Parameter,
        scope: ParameterScope,
    ) -> Result<String, ParameterError> {
        if self.resolved {
            return Err(ParameterError::AlreadyResolved);
        }
        let name = declared_name(parameter)?;
        if parameter.value.trim().is_empty() {
            return Err(ParameterError::MissingValue { name });
        }

        if let Some(existing) = self
            .entries
            .iter()
            .find(|e| e.parameter.same_logical_parameter(parameter))
        {
            return Ok(existing.final_name.clone());
        }

        let taken: HashSet<&str> = self.entries.iter().map(|e| e.final_name.as_str()).collect();
        let final_name = if taken.contains(name.as_str()) {
            next_available_name(&name, &taken)
        } else {
            name.clone()
        };

        self.entries.push(ResolvedParameter {
            parameter: parameter.clone(),
            scope,
            final_name: final_name.clone(),
        });
        Ok(final_name)
    }

    /// Scope a parameter is currently registered at, by final name
    pub fn level_for(&self, name: &str) -> Option<ParameterScope> {
        self.entries
            .iter()
            .find(|e| e.final_name == name)
            .map(|e| e.scope)
    }

    /// De-duplicated, declaration-ordered parameter list: globals first,
    /// then by increasing scope specificity, discovery order within a scope.
    /// Transitions the manager to its read-only resolved state.
    pub fn finalize(&mut self) -> &[ResolvedParameter] {
        if !self.resolved {
            self.entries.sort_by_key(|e| e.scope);
            self.resolved = true;
        }
        &self.entries
    }

    /// Declaration block for all resolved parameters, trailing newline
    /// trimmed. Finalizes the manager if it has not been already.
    pub fn declaration_block(&mut self, dialect: Dialect) -> String {
        self.finalize();
        let mut block = String::new();
        for entry in &self.entries {
            let declaration = substitute_name(
                &entry.parameter.declaration,
                &entry.parameter.name,
                &entry.final_name,
            );
            block.push_str(&dialect.parameter_block(
                &entry.final_name,
                &declaration,
                &entry.parameter.value,
                entry.parameter.comment.as_deref(),
            ));
        }
        block.trim_end().to_string()
    }
}

/// Name declared by a parameter, cross-checked against its declaration text
fn declared_name(parameter: &Parameter) -> Result<String, ParameterError> {
    let pattern = Regex::new(r"[@:][A-Za-z_]\w*").unwrap();
    let from_declaration = pattern
        .find(&parameter.declaration)
        .map(|m| m.as_str().to_string());

    match from_declaration {
        None => Err(ParameterError::UnparseableDeclaration {
            declaration: parameter.declaration.clone(),
        }),
        Some(declared) => {
            if parameter.name.is_empty() || parameter.name == declared {
                Ok(declared)
            } else {
                Err(ParameterError::NameMismatch {
                    name: parameter.name.clone(),
                    declaration: parameter.declaration.clone(),
                })
            }
        }
    }
}

/// First `base_2`, `base_3`, ... not present in `taken`
pub fn next_available_name(base: &str, taken: &HashSet<&str>) -> String {
    let mut suffix = 2;
    loop {
        let candidate = format!("{base}_{suffix}");
        if !taken.contains(candidate.as_str()) {
            return candidate;
        }
        suffix += 1;
    }
}

/// Whole-word substitution of a parameter name in SQL text. `@bob` never
/// matches inside `@bob_2` or `@bobby`.
pub(crate) fn substitute_name(sql: &str, from: &str, to: &str) -> String {
    if from == to {
        return sql.to_string();
    }
    let pattern = Regex::new(&format!(r"{}\b", regex::escape(from))).unwrap();
    pattern.replace_all(sql, NoExpand(to)).into_owned()
}
