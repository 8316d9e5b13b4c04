use axum::{
    extract::{Path as AxumPath, State},
    http::HeaderMap,
    Json,
};
use sqlx::types::Json as SqlJson;

use crate::app_state::AppState;
use crate::auth::auth_user_id;
use crate::errors::ServerError;
use crate::handlers::users::user_exists;
use crate::models::{normalize_labels, InterestsRequest, InterestsResponse};
use crate::time::now_epoch_ms;

pub(crate) async fn fetch_hobbies(
    state: &AppState,
    user_id: i64,
) -> Result<Vec<String>, ServerError> {
    let row = if let Some(pool) = &state.postgres {
        sqlx::query_scalar::<_, SqlJson<Vec<String>>>(
            "SELECT hobbies FROM interests WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(ServerError::internal)?
    } else {
        let pool = state.sqlite_pool()?;
        sqlx::query_scalar::<_, SqlJson<Vec<String>>>(
            "SELECT hobbies FROM interests WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(ServerError::internal)?
    };
    Ok(row.map(|hobbies| hobbies.0).unwrap_or_default())
}

pub async fn user_interests(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(user_id): AxumPath<i64>,
) -> Result<Json<InterestsResponse>, ServerError> {
    auth_user_id(&state, &headers).await?;

    if !user_exists(&state, user_id).await? {
        return Err(ServerError::not_found("user not found"));
    }

    let hobbies = fetch_hobbies(&state, user_id).await?;
    Ok(Json(InterestsResponse { user_id, hobbies }))
}

pub async fn update_interests(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<InterestsRequest>,
) -> Result<Json<InterestsResponse>, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    let hobbies = normalize_labels(payload.hobbies);
    let now_ms = now_epoch_ms();

    if let Some(pool) = &state.postgres {
        sqlx::query(
            "INSERT INTO interests (user_id, hobbies, updated_at_ms) VALUES ($1, $2, $3) \
            ON CONFLICT (user_id) DO UPDATE SET hobbies = EXCLUDED.hobbies, \
            updated_at_ms = EXCLUDED.updated_at_ms",
        )
        .bind(user_id)
        .bind(SqlJson(&hobbies))
        .bind(now_ms)
        .execute(pool)
        .await
        .map_err(ServerError::internal)?;
    } else {
        let pool = state.sqlite_pool()?;
        sqlx::query(
            "INSERT INTO interests (user_id, hobbies, updated_at_ms) VALUES (?1, ?2, ?3) \
            ON CONFLICT(user_id) DO UPDATE SET hobbies = excluded.hobbies, \
            updated_at_ms = excluded.updated_at_ms",
        )
        .bind(user_id)
        .bind(SqlJson(&hobbies))
        .bind(now_ms)
        .execute(pool)
        .await
        .map_err(ServerError::internal)?;
    }

    tracing::info!(user_id, count = hobbies.len(), "interests updated");

    Ok(Json(InterestsResponse { user_id, hobbies }))
}
