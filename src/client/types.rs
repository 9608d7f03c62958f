//! Request and response bodies of the simple-jdbc server API.

use serde::{Deserialize, Serialize};

/// A query to run against the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Query {
    /// A raw SQL statement.
    Statement { statement: Statement },
}

impl Query {
    pub fn statement(sql: impl Into<String>) -> Self {
        Query::Statement {
            statement: Statement { sql: sql.into() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
}

/// Filters for table listing. Patterns use SQL `LIKE` syntax.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TablesQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_pattern: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CatalogsRequest<'a> {
    pub jdbc_url: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TablesRequest<'a> {
    pub jdbc_url: &'a str,
    #[serde(flatten)]
    pub query: &'a TablesQuery,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PreviewRequest<'a> {
    pub jdbc_url: &'a str,
    pub query: &'a Query,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// A table found by a listing call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableInfo {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub table_type: Option<String>,
}

impl TableInfo {
    /// `catalog.schema.name`, skipping missing parts.
    pub fn qualified_name(&self) -> String {
        [self.catalog.as_deref(), self.schema.as_deref(), Some(self.name.as_str())]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// A result column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: Option<String>,
}

/// First rows of a query result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<serde_json::Value>>,
}
