use std::path::Path;

use sqlx::{Pool, Postgres, Sqlite};
use tokio::fs;

use crate::app_state::AppState;
use crate::config::{validate_schema_name, ConfigError, ServerConfig, SqlDialect};
use crate::db::quote_ident;

pub async fn apply_server_schema(
    config: &ServerConfig,
    state: &AppState,
    config_path: &Path,
) -> Result<(), ConfigError> {
    let base_dir = config_path
        .parent()
        .ok_or_else(|| ConfigError::Invalid("config path has no parent".into()))?;
    match config.dialect()? {
        SqlDialect::Sqlite => {
            let pool = state
                .sqlite
                .as_ref()
                .ok_or_else(|| ConfigError::Invalid("sqlite pool missing".into()))?;
            let schema_path = base_dir.join("sql").join("sqlite").join("schema.sql");
            let content = fs::read_to_string(&schema_path).await.map_err(|_| {
                ConfigError::Invalid(format!("schema not found at {}", schema_path.display()))
            })?;
            apply_sqlite_schema(pool, &content).await?;
        }
        SqlDialect::Postgres => {
            let pool = state
                .postgres
                .as_ref()
                .ok_or_else(|| ConfigError::Invalid("postgres pool missing".into()))?;
            let pg = config
                .postgres
                .as_ref()
                .ok_or_else(|| ConfigError::Invalid("postgres section missing".into()))?;
            let schema = validate_schema_name(&pg.schema)?;
            let schema_path = base_dir.join("sql").join("postgres").join("schema.sql");
            let content = fs::read_to_string(&schema_path).await.map_err(|_| {
                ConfigError::Invalid(format!("schema not found at {}", schema_path.display()))
            })?;
            apply_postgres_schema(pool, &content, &schema).await?;
        }
    }
    tracing::info!("server schema applied");
    Ok(())
}

pub async fn apply_sqlite_schema(pool: &Pool<Sqlite>, content: &str) -> Result<(), ConfigError> {
    for stmt in statements(content) {
        sqlx::query(stmt)
            .execute(pool)
            .await
            .map_err(|e| ConfigError::Invalid(format!("schema apply error: {e}")))?;
    }
    Ok(())
}

async fn apply_postgres_schema(
    pool: &Pool<Postgres>,
    content: &str,
    schema: &str,
) -> Result<(), ConfigError> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| ConfigError::Invalid(format!("schema apply error: {e}")))?;
    let search_stmt = format!("SET search_path TO {}", quote_ident(schema));
    sqlx::query(&search_stmt)
        .execute(&mut *conn)
        .await
        .map_err(|e| ConfigError::Invalid(format!("schema apply error: {e}")))?;

    for stmt in statements(content) {
        sqlx::query(stmt)
            .execute(&mut *conn)
            .await
            .map_err(|e| ConfigError::Invalid(format!("schema apply error: {e}")))?;
    }
    Ok(())
}

fn statements(content: &str) -> impl Iterator<Item = &str> {
    content.split(';').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_skip_blank_chunks() {
        let sql = "CREATE TABLE a (id INTEGER);\n\n ;CREATE TABLE b (id INTEGER)\n";
        let parsed: Vec<&str> = statements(sql).collect();
        assert_eq!(
            parsed,
            vec!["CREATE TABLE a (id INTEGER)", "CREATE TABLE b (id INTEGER)"]
        );
    }

    #[test]
    fn bundled_schemas_define_the_same_tables() {
        let sqlite = include_str!("../res/sql/sqlite/schema.sql");
        let postgres = include_str!("../res/sql/postgres/schema.sql");
        let tables = |sql: &str| {
            statements(sql)
                .filter_map(|s| s.strip_prefix("CREATE TABLE IF NOT EXISTS "))
                .filter_map(|s| s.split_whitespace().next())
                .map(str::to_string)
                .collect::<Vec<_>>()
        };
        assert_eq!(tables(sqlite), tables(postgres));
        assert_eq!(tables(sqlite).len(), 9);
    }
}
