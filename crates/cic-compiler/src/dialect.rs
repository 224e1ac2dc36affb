//! Engine-specific SQL spelling
//!
//! Everything dialect-sensitive in the generated text funnels through here:
//! set-operator keywords, identifier quoting, parameter declaration blocks,
//! preview row limiting, and whether an engine can combine cached results
//! with set operations at all.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use cic_model::{ColumnRef, SetOperation, TableRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dialect {
    #[serde(rename = "mssql", alias = "microsoftsql")]
    MicrosoftSql,
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "oracle")]
    Oracle,
    #[serde(rename = "postgres", alias = "postgresql")]
    Postgres,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dialect::MicrosoftSql => "mssql",
            Dialect::MySql => "mysql",
            Dialect::Oracle => "oracle",
            Dialect::Postgres => "postgres",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mssql" | "microsoftsql" => Ok(Dialect::MicrosoftSql),
            "mysql" => Ok(Dialect::MySql),
            "oracle" => Ok(Dialect::Oracle),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            other => Err(format!(
                "unknown dialect {other:?}, expected mssql, mysql, oracle or postgres"
            )),
        }
    }
}

impl Dialect {
    /// Keyword for a set operation. Oracle spells EXCEPT as MINUS.
    pub fn set_operator_sql(&self, op: SetOperation) -> &'static str {
        match (self, op) {
            (Dialect::Oracle, SetOperation::Except) => "MINUS",
            (_, SetOperation::Union) => "UNION",
            (_, SetOperation::Intersect) => "INTERSECT",
            (_, SetOperation::Except) => "EXCEPT",
        }
    }

    /// Whether set operations may be compiled when a result cache of this
    /// engine type is configured. MySql cache servers reject all three, so
    /// configuring one is an error surfaced before any I/O.
    pub fn supports_set_operations_when_cached(&self) -> bool {
        !matches!(self, Dialect::MySql)
    }

    fn quote(&self, identifier: &str) -> String {
        match self {
            Dialect::MicrosoftSql => format!("[{identifier}]"),
            Dialect::MySql => format!("`{identifier}`"),
            Dialect::Oracle | Dialect::Postgres => format!("\"{identifier}\""),
        }
    }

    /// Fully-qualified table reference in this engine's quoting style
    pub fn qualify_table(&self, table: &TableRef) -> String {
        let name = self.quote(&table.name);
        match self {
            Dialect::MicrosoftSql => match (&table.database, &table.schema) {
                (Some(db), Some(schema)) => {
                    format!("{}.{}.{name}", self.quote(db), self.quote(schema))
                }
                // default schema: two-dot form
                (Some(db), None) => format!("{}..{name}", self.quote(db)),
                (None, Some(schema)) => format!("{}.{name}", self.quote(schema)),
                (None, None) => name,
            },
            // MySQL has no schema level distinct from the database
            Dialect::MySql => match table.database.as_ref().or(table.schema.as_ref()) {
                Some(db) => format!("{}.{name}", self.quote(db)),
                None => name,
            },
            // cross-database references are not expressible; schema only
            Dialect::Oracle | Dialect::Postgres => match &table.schema {
                Some(schema) => format!("{}.{name}", self.quote(schema)),
                None => name,
            },
        }
    }

    pub fn qualify_column(&self, column: &ColumnRef) -> String {
        match &column.table {
            Some(table) => format!("{}.{}", self.quote(table), self.quote(&column.column)),
            None => self.quote(&column.column),
        }
    }

    /// Prefix inside the SELECT clause limiting a preview, if this engine
    /// limits there (`SELECT TOP 100 *`)
    pub fn top_select_prefix(&self, rows: u32) -> Option<String> {
        match self {
            Dialect::MicrosoftSql => Some(format!("TOP {rows} ")),
            _ => None,
        }
    }

    /// Trailing clause limiting a preview, if this engine limits there
    pub fn top_suffix(&self, rows: u32) -> Option<String> {
        match self {
            Dialect::MicrosoftSql => None,
            Dialect::MySql | Dialect::Postgres => Some(format!("LIMIT {rows}")),
            Dialect::Oracle => Some(format!("FETCH FIRST {rows} ROWS ONLY")),
        }
    }

    /// Declaration-plus-assignment block for one resolved parameter.
    /// `declaration` must already carry the final (possibly renamed) name.
    pub fn parameter_block(
        &self,
        name: &str,
        declaration: &str,
        value: &str,
        comment: Option<&str>,
    ) -> String {
        let mut block = String::new();
        if let Some(comment) = comment {
            block.push_str(&format!("/*{comment}*/\n"));
        }
        // MySQL session variables are declared implicitly by assignment
        if !matches!(self, Dialect::MySql) {
            block.push_str(declaration);
            block.push('\n');
        }
        block.push_str(&format!("SET {name} = {value};\n"));
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TableRef {
        TableRef {
            database: Some("biochem".to_string()),
            schema: None,
            name: "deaths".to_string(),
        }
    }

    #[test]
    fn test_oracle_spells_except_as_minus() {
        assert_eq!(
            Dialect::Oracle.set_operator_sql(SetOperation::Except),
            "MINUS"
        );
        assert_eq!(
            Dialect::MicrosoftSql.set_operator_sql(SetOperation::Except),
            "EXCEPT"
        );
        assert_eq!(
            Dialect::Oracle.set_operator_sql(SetOperation::Union),
            "UNION"
        );
    }

    #[test]
    fn test_qualify_table() {
        assert_eq!(
            Dialect::MicrosoftSql.qualify_table(&table()),
            "[biochem]..[deaths]"
        );
        assert_eq!(Dialect::MySql.qualify_table(&table()), "`biochem`.`deaths`");
        // database is dropped for engines that cannot cross databases
        assert_eq!(Dialect::Postgres.qualify_table(&table()), "\"deaths\"");

        let schema_qualified = TableRef {
            database: None,
            schema: Some("dbo".to_string()),
            name: "deaths".to_string(),
        };
        assert_eq!(
            Dialect::MicrosoftSql.qualify_table(&schema_qualified),
            "[dbo].[deaths]"
        );
        assert_eq!(
            Dialect::Oracle.qualify_table(&schema_qualified),
            "\"dbo\".\"deaths\""
        );
    }

    #[test]
    fn test_qualify_column() {
        let col = ColumnRef {
            table: Some("deaths".to_string()),
            column: "chi".to_string(),
        };
        assert_eq!(Dialect::MicrosoftSql.qualify_column(&col), "[deaths].[chi]");

        let bare = ColumnRef {
            table: None,
            column: "chi".to_string(),
        };
        assert_eq!(Dialect::MySql.qualify_column(&bare), "`chi`");
    }

    #[test]
    fn test_preview_limiting() {
        assert_eq!(
            Dialect::MicrosoftSql.top_select_prefix(100).as_deref(),
            Some("TOP 100 ")
        );
        assert!(Dialect::MicrosoftSql.top_suffix(100).is_none());
        assert_eq!(
            Dialect::Postgres.top_suffix(100).as_deref(),
            Some("LIMIT 100")
        );
        assert_eq!(
            Dialect::Oracle.top_suffix(50).as_deref(),
            Some("FETCH FIRST 50 ROWS ONLY")
        );
    }

    #[test]
    fn test_mysql_cannot_cache_set_operations() {
        assert!(!Dialect::MySql.supports_set_operations_when_cached());
        assert!(Dialect::MicrosoftSql.supports_set_operations_when_cached());
    }

    #[test]
    fn test_parameter_block() {
        let block = Dialect::MicrosoftSql.parameter_block(
            "@bob",
            "DECLARE @bob AS varchar(10);",
            "'fish'",
            Some("favourite fish"),
        );
        assert_eq!(
            block,
            "/*favourite fish*/\nDECLARE @bob AS varchar(10);\nSET @bob = 'fish';\n"
        );

        let mysql = Dialect::MySql.parameter_block("@bob", "DECLARE @bob AS varchar(10);", "'fish'", None);
        assert_eq!(mysql, "SET @bob = 'fish';\n");
    }

    #[test]
    fn test_dialect_parsing() {
        assert_eq!("mssql".parse::<Dialect>().unwrap(), Dialect::MicrosoftSql);
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert!("sqlite".parse::<Dialect>().is_err());
    }
}
