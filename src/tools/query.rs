//! Read-only SQL execution against the transactions database

use crate::models::{ToolInput, ToolOutput, ToolParam};
use crate::Result;
use regex::Regex;
use serde_json::{json, Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};
use std::sync::OnceLock;
use tracing::{debug, warn};

use super::Tool;

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "GRANT",
    "ATTACH", "DETACH", "PRAGMA", "VACUUM",
];

const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "LIMIT", "HAVING", "UNION", "EXCEPT", "INTERSECT", "WINDOW",
    "ON", "USING", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "NATURAL", "OUTER",
];

fn keyword_pattern(keyword: &str) -> Regex {
    Regex::new(&format!(r"\b{}\b", keyword)).expect("keyword regex")
}

fn forbidden_patterns() -> &'static Vec<(&'static str, Regex)> {
    static RE: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    RE.get_or_init(|| {
        FORBIDDEN_KEYWORDS
            .iter()
            .map(|kw| (*kw, keyword_pattern(kw)))
            .collect()
    })
}

/// Why a query was refused before reaching the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryRejection {
    NotSelect,
    Forbidden(&'static str),
    MultipleStatements,
    TableDenied(String),
    TableFunction(String),
}

impl std::fmt::Display for QueryRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryRejection::NotSelect => write!(f, "Only SELECT queries are allowed"),
            QueryRejection::Forbidden(kw) => write!(f, "Forbidden operation: {}", kw),
            QueryRejection::MultipleStatements => {
                write!(f, "Only a single statement is allowed")
            }
            QueryRejection::TableDenied(_) => write!(f, "Access to this table is denied"),
            QueryRejection::TableFunction(_) => {
                write!(f, "Table-valued functions are not allowed")
            }
        }
    }
}

/// Blank out string literals and comments, and unquote quoted identifiers,
/// so that only SQL structure is left to inspect.
fn mask_sql(query: &str) -> String {
    let chars: Vec<char> = query.chars().collect();
    let mut out = String::with_capacity(query.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' => {
                out.push(' ');
                i += 1;
                while i < chars.len() && chars[i] != '\'' {
                    out.push(' ');
                    i += 1;
                }
                out.push(' ');
                i += 1;
            }
            '"' | '`' | '[' => {
                let close = if c == '[' { ']' } else { c };
                i += 1;
                while i < chars.len() && chars[i] != close {
                    let ch = chars[i];
                    out.push(if ch.is_alphanumeric() || ch == '_' { ch } else { '_' });
                    i += 1;
                }
                i += 1;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                out.push(' ');
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
                out.push(' ');
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

#[derive(Debug, Clone, PartialEq)]
enum SqlToken {
    Word(String),
    Symbol(char),
}

fn sql_tokens(masked: &str) -> Vec<SqlToken> {
    let mut tokens = Vec::new();
    let mut word = String::new();

    for c in masked.chars() {
        if c.is_alphanumeric() || c == '_' || c == '.' || c == '$' {
            word.push(c);
            continue;
        }
        if !word.is_empty() {
            tokens.push(SqlToken::Word(std::mem::take(&mut word)));
        }
        if !c.is_whitespace() {
            tokens.push(SqlToken::Symbol(c));
        }
    }
    if !word.is_empty() {
        tokens.push(SqlToken::Word(word));
    }

    tokens
}

/// Index just past the parenthesis that closes the one at `open`.
fn skip_group(tokens: &[SqlToken], open: usize) -> usize {
    let mut depth = 0usize;
    for (idx, token) in tokens.iter().enumerate().skip(open) {
        match token {
            SqlToken::Symbol('(') => depth += 1,
            SqlToken::Symbol(')') => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return idx + 1;
                }
            }
            _ => {}
        }
    }
    tokens.len()
}

fn check_table(
    name: &str,
    next: Option<&SqlToken>,
    allowed_tables: &[String],
) -> std::result::Result<(), QueryRejection> {
    let table = name.rsplit('.').next().unwrap_or(name);
    if next == Some(&SqlToken::Symbol('(')) {
        return Err(QueryRejection::TableFunction(table.to_lowercase()));
    }
    if !allowed_tables.iter().any(|t| t.eq_ignore_ascii_case(table)) {
        return Err(QueryRejection::TableDenied(table.to_lowercase()));
    }
    Ok(())
}

/// Check every item of the table list that starts at `start`, up to the
/// clause that ends it.
fn check_table_list(
    tokens: &[SqlToken],
    start: usize,
    allowed_tables: &[String],
) -> std::result::Result<(), QueryRejection> {
    let mut idx = start;
    let mut expect_item = true;

    while idx < tokens.len() {
        match &tokens[idx] {
            // Subqueries carry their own FROM, checked separately.
            SqlToken::Symbol('(') => {
                idx = skip_group(tokens, idx);
                expect_item = false;
                continue;
            }
            SqlToken::Word(word) if expect_item => {
                check_table(word, tokens.get(idx + 1), allowed_tables)?;
                expect_item = false;
            }
            SqlToken::Symbol(',') => expect_item = true,
            SqlToken::Symbol(')') | SqlToken::Symbol(';') => break,
            SqlToken::Word(word) if CLAUSE_KEYWORDS.contains(&word.as_str()) => break,
            _ if expect_item => break,
            _ => {}
        }
        idx += 1;
    }

    Ok(())
}

/// Check that `query` is a single SELECT over allowed tables.
///
/// `allowed_tables` is compared case-insensitively.
pub fn validate_query(query: &str, allowed_tables: &[String]) -> std::result::Result<(), QueryRejection> {
    let masked = mask_sql(query).to_uppercase();
    let masked = masked.trim();

    if !masked.starts_with("SELECT") {
        return Err(QueryRejection::NotSelect);
    }

    for (keyword, pattern) in forbidden_patterns() {
        if pattern.is_match(masked) {
            return Err(QueryRejection::Forbidden(*keyword));
        }
    }

    if masked
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .contains(';')
    {
        return Err(QueryRejection::MultipleStatements);
    }

    let tokens = sql_tokens(masked);
    for (idx, token) in tokens.iter().enumerate() {
        match token {
            SqlToken::Word(word) if word == "FROM" || word == "JOIN" => {
                check_table_list(&tokens, idx + 1, allowed_tables)?;
            }
            // `x IN some_table` reads a table too.
            SqlToken::Word(word) if word == "IN" => {
                if let Some(SqlToken::Word(table)) = tokens.get(idx + 1) {
                    check_table(table, tokens.get(idx + 2), allowed_tables)?;
                }
            }
            SqlToken::Word(word) if word.starts_with("PRAGMA_") => {
                return Err(QueryRejection::TableFunction(word.to_lowercase()));
            }
            _ => {}
        }
    }

    Ok(())
}

pub struct ExecuteQueryTool {
    pool: SqlitePool,
    allowed_tables: Vec<String>,
}

impl ExecuteQueryTool {
    pub fn new(pool: SqlitePool, allowed_tables: Vec<String>) -> Self {
        Self {
            pool,
            allowed_tables,
        }
    }

    /// Validate and run `query`, shaping every outcome as rows for the model.
    pub async fn run_query(&self, query: &str) -> ToolOutput {
        if let Err(rejection) = validate_query(query, &self.allowed_tables) {
            warn!(reason = %rejection, "Rejected SQL query");
            return ToolOutput::failure(
                json!([{ "error": "Internal error", "details": rejection.to_string() }]),
                rejection.to_string(),
            );
        }

        let sql = query.trim().trim_end_matches(';');
        match sqlx::query(sql).fetch_all(&self.pool).await {
            Ok(rows) if rows.is_empty() => ToolOutput::success(json!([
                { "message": "Query executed successfully (no results)" }
            ])),
            Ok(rows) => {
                debug!(row_count = rows.len(), "SQL query returned rows");
                ToolOutput::success(Value::Array(rows.iter().map(row_to_json).collect()))
            }
            Err(e) => {
                warn!(error = %e, "SQL query failed");
                ToolOutput::failure(
                    json!([{ "error": "Database error", "details": e.to_string() }]),
                    e.to_string(),
                )
            }
        }
    }
}

/// Convert a row into a JSON object keyed by column name, using the runtime
/// storage class of each value.
pub(crate) fn row_to_json(row: &SqliteRow) -> Value {
    let mut object = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        object.insert(column.name().to_string(), column_value(row, idx));
    }
    Value::Object(object)
}

pub(crate) fn column_value(row: &SqliteRow, idx: usize) -> Value {
    let storage_class = match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };

    match storage_class.as_str() {
        "INTEGER" | "BOOLEAN" => row.try_get::<i64, _>(idx).map(Value::from).unwrap_or(Value::Null),
        "REAL" | "NUMERIC" => row.try_get::<f64, _>(idx).map(Value::from).unwrap_or(Value::Null),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(idx)
            .map(|bytes| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
            .unwrap_or(Value::Null),
        _ => row.try_get::<String, _>(idx).map(Value::String).unwrap_or(Value::Null),
    }
}

#[async_trait::async_trait]
impl Tool for ExecuteQueryTool {
    fn name(&self) -> &'static str {
        "execute_query"
    }

    fn description(&self) -> &'static str {
        "Safely runs a read-only SQL SELECT query against the financial database \
         and returns the rows."
    }

    fn inputs(&self) -> Vec<ToolParam> {
        vec![ToolParam {
            name: "query",
            param_type: "string",
            description: "SQL SELECT query. Examples: \
                1. SELECT currency, SUM(amount) FROM transactions WHERE operation_type = 'income' GROUP BY currency \
                2. SELECT * FROM transactions WHERE location = 'Diaz PLC' AND operation_date > '2025-01-01'",
            nullable: false,
        }]
    }

    fn output_type(&self) -> &'static str {
        "array"
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let query = input.require_str("query")?;
        Ok(self.run_query(query).await)
    }
}
