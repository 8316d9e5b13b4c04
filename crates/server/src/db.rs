use std::path::Path;

use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{
  SqliteConnectOptions,
  SqlitePoolOptions
};

use crate::app_state::AppState;
use crate::auth::{
  hash_password,
  normalize_email
};
use crate::config::{
  ConfigError,
  SeedConfig,
  ServerConfig,
  SqlDialect,
  validate_schema_name
};
use crate::time::now_epoch_ms;

/// Child tables first so the sqlite path never trips a foreign key.
const SERVER_TABLES: [&str; 9] = [
  "messages",
  "group_members",
  "interest_groups",
  "friendships",
  "post_likes",
  "posts",
  "interests",
  "user_tokens",
  "users"
];

pub async fn connect_db(
  config: &ServerConfig,
  config_path: &Path
) -> Result<AppState, ConfigError> {
  match config.dialect()? {
    | SqlDialect::Sqlite => {
      let base_dir = config_path
        .parent()
        .ok_or_else(|| {
          ConfigError::Invalid(
            "config path has no parent"
              .into()
          )
        })?;

      let path =
        config.sqlite_path(base_dir);

      let options =
        SqliteConnectOptions::new()
          .filename(&path)
          .create_if_missing(true)
          .foreign_keys(true);

      let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| {
          ConfigError::Invalid(format!(
            "sqlite connect failed for \
             {}: {e}",
            path.display()
          ))
        })?;

      tracing::info!(
        path = %path.display(),
        "sqlite pool ready"
      );

      Ok(AppState::with_sqlite(
        pool,
        config.auth.token_ttl_seconds
      ))
    }
    | SqlDialect::Postgres => {
      let pg = config
        .postgres
        .as_ref()
        .ok_or_else(|| {
          ConfigError::Invalid(
            "postgres section missing"
              .into()
          )
        })?;

      let schema =
        validate_schema_name(
          &pg.schema
        )?;

      let url = format!(
        "postgres://{}:{}@{}:{}/{}?\
         sslmode={}",
        pg.user,
        pg.password,
        pg.host,
        pg.port,
        pg.database,
        pg.ssl_mode
      );

      let pool = PgPoolOptions::new()
        .max_connections(10)
        .after_connect(set_search_path(
          schema.clone()
        ))
        .connect(&url)
        .await
        .map_err(|e| {
          ConfigError::Invalid(format!(
            "postgres connect failed: \
             {e}"
          ))
        })?;

      tracing::info!(
        host = %pg.host,
        database = %pg.database,
        schema = %schema,
        "postgres pool ready"
      );

      Ok(AppState::with_postgres(
        pool,
        config.auth.token_ttl_seconds
      ))
    }
  }
}

pub async fn reset_server_data(
  config: &ServerConfig,
  state: &AppState
) -> Result<(), ConfigError> {
  match config.dialect()? {
    | SqlDialect::Sqlite => {
      let pool = state
        .sqlite
        .as_ref()
        .ok_or_else(|| {
          ConfigError::Invalid(
            "sqlite pool missing"
              .into()
          )
        })?;

      for table in SERVER_TABLES {
        let query = format!(
          "DELETE FROM {}",
          quote_ident(table)
        );

        if let Err(e) =
          sqlx::query(&query)
            .execute(pool)
            .await
          && !is_missing_table_error(&e)
        {
          return Err(
            ConfigError::Invalid(
              format!(
                "cleanup {table} \
                 failed: {e}"
              )
            )
          );
        }
      }
    }
    | SqlDialect::Postgres => {
      let pool = state
        .postgres
        .as_ref()
        .ok_or_else(|| {
          ConfigError::Invalid(
            "postgres pool missing"
              .into()
          )
        })?;

      let schema = config
        .postgres
        .as_ref()
        .ok_or_else(|| {
          ConfigError::Invalid(
            "postgres section missing"
              .into()
          )
        })?
        .schema
        .as_str();

      let schema =
        validate_schema_name(schema)?;

      let table_list = SERVER_TABLES
        .iter()
        .map(|t| {
          format!(
            "{}.{}",
            quote_ident(&schema),
            quote_ident(t)
          )
        })
        .collect::<Vec<_>>()
        .join(", ");

      let stmt = format!(
        "TRUNCATE TABLE {table_list} \
         RESTART IDENTITY CASCADE"
      );

      if let Err(e) = sqlx::query(&stmt)
        .execute(pool)
        .await
        && !is_missing_table_error(&e)
      {
        return Err(
          ConfigError::Invalid(
            format!(
              "cleanup failed: {e}"
            )
          )
        );
      }
    }
  }

  tracing::warn!(
    "server data reset on start"
  );

  Ok(())
}

#[allow(clippy::type_complexity)]
pub fn set_search_path(
  schema: String
) -> impl Fn(
  &mut sqlx::PgConnection,
  sqlx::pool::PoolConnectionMetadata
) -> std::pin::Pin<
  Box<
    dyn std::future::Future<
        Output = Result<
          (),
          sqlx::Error
        >
      > + Send
      + '_
  >
> {
  let schema_name = schema;

  move |conn, _meta| {
    let schema_copy =
      schema_name.clone();

    Box::pin(async move {
      let schema_ident =
        quote_ident(&schema_copy);

      let create_stmt = format!(
        "CREATE SCHEMA IF NOT EXISTS \
         {schema_ident}"
      );

      sqlx::query(&create_stmt)
        .execute(&mut *conn)
        .await?;

      let search_stmt = format!(
        "SET search_path TO \
         {schema_ident}"
      );

      sqlx::query(&search_stmt)
        .execute(&mut *conn)
        .await?;

      Ok(())
    })
  }
}

fn is_missing_table_error(
  e: &sqlx::Error
) -> bool {
  match e {
    | sqlx::Error::Database(db_err) => {
      db_err.code().as_deref()
        == Some("42P01")
        || db_err
          .message()
          .starts_with("no such table")
    }
    | _ => false
  }
}

pub fn quote_ident(
  name: &str
) -> String {
  format!(
    "\"{}\"",
    name.replace('"', "\"\"")
  )
}

pub async fn ensure_default_user(
  state: &AppState,
  seed: &SeedConfig
) -> Result<(), ConfigError> {
  let email =
    normalize_email(&seed.email);

  let password_hash = hash_password(
    &seed.password
  )
  .map_err(|e| {
    ConfigError::Invalid(format!(
      "hash password: {e}"
    ))
  })?;

  let now_ms = now_epoch_ms();

  let result = if let Some(pool) =
    &state.postgres
  {
    sqlx::query(
      "INSERT INTO users (name, email, \
       password_hash, created_at_ms) \
       VALUES ($1, $2, $3, $4) ON \
       CONFLICT (email) DO NOTHING"
    )
    .bind(seed.name.trim())
    .bind(&email)
    .bind(&password_hash)
    .bind(now_ms)
    .execute(pool)
    .await
    .map(|r| r.rows_affected())
  } else {
    let pool = state
      .sqlite
      .as_ref()
      .ok_or_else(|| {
        ConfigError::Invalid(
          "sqlite pool missing".into()
        )
      })?;

    sqlx::query(
      "INSERT OR IGNORE INTO users \
       (name, email, password_hash, \
       created_at_ms) VALUES (?1, ?2, \
       ?3, ?4)"
    )
    .bind(seed.name.trim())
    .bind(&email)
    .bind(&password_hash)
    .bind(now_ms)
    .execute(pool)
    .await
    .map(|r| r.rows_affected())
  };

  let inserted = result.map_err(|e| {
    ConfigError::Invalid(format!(
      "default user insert failed: {e}"
    ))
  })?;

  if inserted > 0 {
    tracing::info!(
      email = %email,
      "default user created"
    );
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn quote_ident_escapes_quotes() {
    assert_eq!(
      quote_ident("users"),
      "\"users\""
    );
    assert_eq!(
      quote_ident("we\"ird"),
      "\"we\"\"ird\""
    );
  }
}
