//! Schema introspection: table DDL, column samples and distinct counts

use crate::models::{ToolInput, ToolOutput, ToolParam};
use crate::Result;
use serde::Serialize;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use super::query::column_value;
use super::Tool;

const SAMPLE_LIMIT: usize = 1000;
const EXAMPLES_SHOWN: usize = 5;
const EXAMPLE_MAX_CHARS: usize = 50;
const CURRENCY_VALUES: &[&str] = &["USD", "RUB", "EUR"];

#[derive(Debug, Clone, Serialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_values: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub examples: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableMeta {
    pub table_name: String,
    pub ddl: Option<String>,
    pub columns: Vec<ColumnMeta>,
    pub ddl_with_comments: String,
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn format_example(value: &Value) -> String {
    match value {
        Value::Number(n) if n.is_f64() => format!("{:.2}", n.as_f64().unwrap_or_default()),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.chars().take(EXAMPLE_MAX_CHARS).collect(),
        Value::Null => "NULL".to_string(),
        other => other.to_string().chars().take(EXAMPLE_MAX_CHARS).collect(),
    }
}

fn column_comment(column: &ColumnMeta) -> String {
    let mut comment = format!("/* {}: ", column.name);
    if let Some(allowed) = &column.allowed_values {
        comment.push_str(&format!("Allowed values: {}. ", allowed.join(", ")));
    }
    let examples = column.examples.as_deref().unwrap_or_default();
    comment.push_str(&format!("Examples: {} */", examples.join(", ")));
    comment
}

pub struct ListTablesTool {
    pool: SqlitePool,
}

impl ListTablesTool {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_schema \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| r.try_get::<String, _>("name").map_err(Into::into))
            .collect()
    }

    async fn table_ddl(&self, table: &str) -> Result<Option<String>> {
        let ddl = sqlx::query_scalar::<_, Option<String>>(
            "SELECT sql FROM sqlite_schema WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_optional(&self.pool)
        .await?;
        Ok(ddl.flatten())
    }

    async fn columns(&self, table: &str) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table)))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| -> Result<(String, String)> {
                let name: String = r.try_get("name")?;
                let column_type: String = r.try_get("type")?;
                Ok((name, column_type))
            })
            .collect()
    }

    async fn column_meta(&self, table: &str, column: &str, column_type: &str) -> ColumnMeta {
        let sql = format!(
            "SELECT DISTINCT {col} FROM {table} WHERE {col} IS NOT NULL LIMIT {limit}",
            col = quote_ident(column),
            table = quote_ident(table),
            limit = SAMPLE_LIMIT,
        );

        match sqlx::query(&sql).fetch_all(&self.pool).await {
            Ok(rows) => {
                let examples: Vec<String> = rows
                    .iter()
                    .take(EXAMPLES_SHOWN)
                    .map(|row| format_example(&column_value(row, 0)))
                    .collect();
                let allowed_values = column
                    .eq_ignore_ascii_case("currency")
                    .then(|| CURRENCY_VALUES.iter().map(|c| c.to_string()).collect());

                ColumnMeta {
                    name: column.to_string(),
                    column_type: column_type.to_string(),
                    unique_values: Some(rows.len()),
                    examples: Some(if rows.is_empty() {
                        vec!["NULL".to_string()]
                    } else {
                        examples
                    }),
                    allowed_values,
                    error: None,
                }
            }
            Err(e) => {
                warn!(table = %table, column = %column, error = %e, "Column sampling failed");
                ColumnMeta {
                    name: column.to_string(),
                    column_type: column_type.to_string(),
                    unique_values: None,
                    examples: None,
                    allowed_values: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Describe every user table in the database.
    pub async fn describe(&self) -> Result<Vec<TableMeta>> {
        let mut tables = Vec::new();

        for table in self.table_names().await? {
            let ddl = self.table_ddl(&table).await?;

            let mut columns = Vec::new();
            for (name, column_type) in self.columns(&table).await? {
                columns.push(self.column_meta(&table, &name, &column_type).await);
            }

            let comments: Vec<String> = columns.iter().map(column_comment).collect();
            let ddl_with_comments = format!(
                "{}\n{}",
                ddl.as_deref().unwrap_or_default(),
                comments.join("\n")
            );

            debug!(table = %table, column_count = columns.len(), "Described table");

            tables.push(TableMeta {
                table_name: table,
                ddl,
                columns,
                ddl_with_comments,
            });
        }

        Ok(tables)
    }
}

#[async_trait::async_trait]
impl Tool for ListTablesTool {
    fn name(&self) -> &'static str {
        "list_tables"
    }

    fn description(&self) -> &'static str {
        "Returns the structure of the database tables with sample data and the \
         number of unique values per column."
    }

    fn inputs(&self) -> Vec<ToolParam> {
        Vec::new()
    }

    fn output_type(&self) -> &'static str {
        "array"
    }

    async fn execute(&self, _input: &ToolInput) -> Result<ToolOutput> {
        let tables = self.describe().await?;
        Ok(ToolOutput::success(serde_json::to_value(tables)?))
    }
}
