//! SQLite access for the transactions store

use crate::error::AssistantError;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

const TRANSACTIONS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    currency TEXT,
    amount REAL,
    operation_type TEXT,
    location TEXT,
    comment TEXT,
    operation_date TEXT
)"#;

const CURRENCIES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS currencies (
    code TEXT PRIMARY KEY,
    name TEXT
)"#;

/// Open a pool for `url`, creating the database file when missing.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(|e| AssistantError::DatabaseError(format!("invalid database url '{}': {}", url, e)))?
        .create_if_missing(true);

    // Every connection to `:memory:` is its own database, so keep exactly one alive.
    let in_memory = url.contains(":memory:");
    let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
    if in_memory {
        pool_options = pool_options.idle_timeout(None).max_lifetime(None);
    }

    let pool = pool_options
        .connect_with(options)
        .await
        .map_err(|e| AssistantError::DatabaseError(format!("cannot open '{}': {}", url, e)))?;

    info!(url = %url, "Connected to transactions database");
    Ok(pool)
}

/// Create the tables the assistant expects, if they are absent.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(TRANSACTIONS_DDL).execute(pool).await?;
    sqlx::query(CURRENCIES_DDL).execute(pool).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// In-memory database with the standard schema and a few rows.
    pub async fn seeded_pool() -> SqlitePool {
        let pool = connect("sqlite::memory:").await.unwrap();
        ensure_schema(&pool).await.unwrap();

        let rows = [
            ("RUB", 3482.12, "expense", "Diaz PLC", "Groceries", "2025-01-01"),
            ("USD", 5429.09, "expense", "Miller Ltd", "Hotel", "2025-01-01"),
            ("USD", 2907.07, "income", "Young-Jones", "Salary", "2024-12-26"),
            ("RUB", 1250.5, "expense", "Diaz PLC", "Dinner", "2025-01-15"),
        ];
        for (currency, amount, op, location, comment, date) in rows {
            sqlx::query(
                "INSERT INTO transactions (currency, amount, operation_type, location, comment, operation_date) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(currency)
            .bind(amount)
            .bind(op)
            .bind(location)
            .bind(comment)
            .bind(date)
            .execute(&pool)
            .await
            .unwrap();
        }

        pool
    }
}
