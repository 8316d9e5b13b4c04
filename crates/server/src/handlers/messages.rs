use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::app_state::AppState;
use crate::auth::auth_user_id;
use crate::errors::ServerError;
use crate::handlers::users::user_exists;
use crate::models::{Message, MessageCreateRequest, PageQuery};
use crate::time::now_epoch_ms;

async fn are_friends(state: &AppState, a: i64, b: i64) -> Result<bool, ServerError> {
    let found = if let Some(pool) = &state.postgres {
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM friendships WHERE status = 'accepted' \
            AND ((user_id = $1 AND friend_id = $2) OR (user_id = $2 AND friend_id = $1))",
        )
        .bind(a)
        .bind(b)
        .fetch_optional(pool)
        .await
        .map_err(ServerError::internal)?
    } else {
        let pool = state.sqlite_pool()?;
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM friendships WHERE status = 'accepted' \
            AND ((user_id = ?1 AND friend_id = ?2) OR (user_id = ?2 AND friend_id = ?1))",
        )
        .bind(a)
        .bind(b)
        .fetch_optional(pool)
        .await
        .map_err(ServerError::internal)?
    };
    Ok(found.is_some())
}

pub async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<MessageCreateRequest>,
) -> Result<(StatusCode, Json<Message>), ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    let recipient_id = payload
        .recipient_id
        .ok_or_else(|| ServerError::bad_request("recipient_id required"))?;
    let content = payload.content.trim();
    if content.is_empty() {
        return Err(ServerError::bad_request("content required"));
    }
    if recipient_id == user_id {
        return Err(ServerError::bad_request("cannot message yourself"));
    }
    if !user_exists(&state, recipient_id).await? {
        return Err(ServerError::not_found("user not found"));
    }
    if !are_friends(&state, user_id, recipient_id).await? {
        return Err(ServerError::forbidden("messages are limited to friends"));
    }

    let now_ms = now_epoch_ms();

    let message = if let Some(pool) = &state.postgres {
        sqlx::query_as::<_, Message>(
            "INSERT INTO messages (sender_id, recipient_id, content, created_at_ms) \
            VALUES ($1, $2, $3, $4) \
            RETURNING id, sender_id, recipient_id, content, created_at_ms",
        )
        .bind(user_id)
        .bind(recipient_id)
        .bind(content)
        .bind(now_ms)
        .fetch_one(pool)
        .await
        .map_err(ServerError::internal)?
    } else {
        let pool = state.sqlite_pool()?;
        sqlx::query_as::<_, Message>(
            "INSERT INTO messages (sender_id, recipient_id, content, created_at_ms) \
            VALUES (?1, ?2, ?3, ?4) \
            RETURNING id, sender_id, recipient_id, content, created_at_ms",
        )
        .bind(user_id)
        .bind(recipient_id)
        .bind(content)
        .bind(now_ms)
        .fetch_one(pool)
        .await
        .map_err(ServerError::internal)?
    };

    tracing::debug!(user_id, recipient_id, message_id = message.id, "message sent");
    Ok((StatusCode::CREATED, Json(message)))
}

/// Messages exchanged with `other_id`, oldest first.
pub async fn conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(other_id): AxumPath<i64>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    if !user_exists(&state, other_id).await? {
        return Err(ServerError::not_found("user not found"));
    }
    let (limit, offset) = page.bounds();

    if let Some(pool) = &state.postgres {
        let rows = sqlx::query_as::<_, Message>(
            "SELECT id, sender_id, recipient_id, content, created_at_ms FROM messages \
            WHERE (sender_id = $1 AND recipient_id = $2) OR (sender_id = $2 AND recipient_id = $1) \
            ORDER BY id LIMIT $3 OFFSET $4",
        )
        .bind(user_id)
        .bind(other_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(ServerError::internal)?;
        return Ok(Json(rows));
    }

    let pool = state.sqlite_pool()?;
    let rows = sqlx::query_as::<_, Message>(
        "SELECT id, sender_id, recipient_id, content, created_at_ms FROM messages \
        WHERE (sender_id = ?1 AND recipient_id = ?2) OR (sender_id = ?2 AND recipient_id = ?1) \
        ORDER BY id LIMIT ?3 OFFSET ?4",
    )
    .bind(user_id)
    .bind(other_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .map_err(ServerError::internal)?;
    Ok(Json(rows))
}
