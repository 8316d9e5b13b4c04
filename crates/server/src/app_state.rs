use axum::http::StatusCode;
use sqlx::{Pool, Postgres, Sqlite};

use crate::errors::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub sqlite: Option<Pool<Sqlite>>,
    pub postgres: Option<Pool<Postgres>>,
    pub token_ttl_seconds: u64,
}

impl AppState {
    pub fn with_sqlite(pool: Pool<Sqlite>, token_ttl_seconds: u64) -> Self {
        Self {
            sqlite: Some(pool),
            postgres: None,
            token_ttl_seconds,
        }
    }

    pub fn with_postgres(pool: Pool<Postgres>, token_ttl_seconds: u64) -> Self {
        Self {
            sqlite: None,
            postgres: Some(pool),
            token_ttl_seconds,
        }
    }

    /// The sqlite pool, for handlers that already checked `postgres` first.
    pub fn sqlite_pool(&self) -> Result<&Pool<Sqlite>, ServerError> {
        self.sqlite.as_ref().ok_or_else(|| {
            ServerError::new(StatusCode::INTERNAL_SERVER_ERROR, "database pool missing")
        })
    }
}
