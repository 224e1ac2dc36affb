//! Nested AND/OR filter trees attached to aggregate leaves

use serde::{Deserialize, Serialize};

use crate::types::Parameter;

/// Boolean operator joining the members of a filter container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    And,
    Or,
}

impl FilterOperator {
    pub fn sql(&self) -> &'static str {
        match self {
            FilterOperator::And => "AND",
            FilterOperator::Or => "OR",
        }
    }
}

/// One boolean fragment of a WHERE clause
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    /// Display name, emitted as a label comment above the fragment
    pub name: String,

    /// Raw boolean SQL text
    pub where_sql: String,

    #[serde(default)]
    pub disabled: bool,

    /// Parameters referenced by `where_sql`. Not registered when the
    /// filter is disabled.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
}

impl Filter {
    pub fn new(name: impl Into<String>, where_sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            where_sql: where_sql.into(),
            disabled: false,
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

/// AND/OR container of filters and nested subcontainers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterContainer {
    pub operator: FilterOperator,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subcontainers: Vec<FilterContainer>,
}

impl FilterContainer {
    pub fn new(operator: FilterOperator) -> Self {
        Self {
            operator,
            filters: Vec::new(),
            subcontainers: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_subcontainer(mut self, subcontainer: FilterContainer) -> Self {
        self.subcontainers.push(subcontainer);
        self
    }

    /// True when no enabled filter survives anywhere beneath this container,
    /// i.e. it would contribute no SQL at all.
    pub fn is_effectively_empty(&self) -> bool {
        self.filters.iter().all(|f| f.disabled)
            && self.subcontainers.iter().all(|c| c.is_effectively_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effectively_empty() {
        let mut container = FilterContainer::new(FilterOperator::And);
        assert!(container.is_effectively_empty());

        let mut disabled = Filter::new("dead", "1 = 0");
        disabled.disabled = true;
        container.filters.push(disabled);
        assert!(container.is_effectively_empty());

        let nested = FilterContainer::new(FilterOperator::Or)
            .with_filter(Filter::new("alive", "x > 1"));
        container.subcontainers.push(nested);
        assert!(!container.is_effectively_empty());
    }
}
