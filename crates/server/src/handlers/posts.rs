use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::app_state::AppState;
use crate::auth::auth_user_id;
use crate::errors::{map_db_error, ServerError};
use crate::handlers::users::user_exists;
use crate::models::{LikeResponse, PageQuery, Post, PostCreateRequest};
use crate::time::now_epoch_ms;

// Both dialects bind the viewer as the first parameter.
const POST_SELECT_PG: &str = "SELECT p.id, p.author_id, u.name AS author_name, p.content, \
    (SELECT COUNT(*) FROM post_likes l WHERE l.post_id = p.id) AS likes, \
    EXISTS (SELECT 1 FROM post_likes l WHERE l.post_id = p.id AND l.user_id = $1) AS liked_by_me, \
    p.created_at_ms \
    FROM posts p JOIN users u ON u.id = p.author_id";

const POST_SELECT_SQLITE: &str = "SELECT p.id, p.author_id, u.name AS author_name, p.content, \
    (SELECT COUNT(*) FROM post_likes l WHERE l.post_id = p.id) AS likes, \
    EXISTS (SELECT 1 FROM post_likes l WHERE l.post_id = p.id AND l.user_id = ?1) AS liked_by_me, \
    p.created_at_ms \
    FROM posts p JOIN users u ON u.id = p.author_id";

async fn fetch_post(
    state: &AppState,
    viewer_id: i64,
    post_id: i64,
) -> Result<Option<Post>, ServerError> {
    if let Some(pool) = &state.postgres {
        let query = format!("{POST_SELECT_PG} WHERE p.id = $2");
        return sqlx::query_as::<_, Post>(&query)
            .bind(viewer_id)
            .bind(post_id)
            .fetch_optional(pool)
            .await
            .map_err(ServerError::internal);
    }

    let pool = state.sqlite_pool()?;
    let query = format!("{POST_SELECT_SQLITE} WHERE p.id = ?2");
    sqlx::query_as::<_, Post>(&query)
        .bind(viewer_id)
        .bind(post_id)
        .fetch_optional(pool)
        .await
        .map_err(ServerError::internal)
}

pub async fn list_posts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Post>>, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    let (limit, offset) = page.bounds();

    if let Some(pool) = &state.postgres {
        let query = format!("{POST_SELECT_PG} ORDER BY p.id DESC LIMIT $2 OFFSET $3");
        let rows = sqlx::query_as::<_, Post>(&query)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
            .map_err(ServerError::internal)?;
        return Ok(Json(rows));
    }

    let pool = state.sqlite_pool()?;
    let query = format!("{POST_SELECT_SQLITE} ORDER BY p.id DESC LIMIT ?2 OFFSET ?3");
    let rows = sqlx::query_as::<_, Post>(&query)
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(ServerError::internal)?;
    Ok(Json(rows))
}

pub async fn list_user_posts(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(author_id): AxumPath<i64>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Post>>, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    if !user_exists(&state, author_id).await? {
        return Err(ServerError::not_found("user not found"));
    }
    let (limit, offset) = page.bounds();

    if let Some(pool) = &state.postgres {
        let query = format!(
            "{POST_SELECT_PG} WHERE p.author_id = $2 ORDER BY p.id DESC LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query_as::<_, Post>(&query)
            .bind(user_id)
            .bind(author_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
            .map_err(ServerError::internal)?;
        return Ok(Json(rows));
    }

    let pool = state.sqlite_pool()?;
    let query = format!(
        "{POST_SELECT_SQLITE} WHERE p.author_id = ?2 ORDER BY p.id DESC LIMIT ?3 OFFSET ?4"
    );
    let rows = sqlx::query_as::<_, Post>(&query)
        .bind(user_id)
        .bind(author_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(ServerError::internal)?;
    Ok(Json(rows))
}

pub async fn create_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<PostCreateRequest>,
) -> Result<(StatusCode, Json<Post>), ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    let content = payload.content.trim();
    if content.is_empty() {
        return Err(ServerError::bad_request("content required"));
    }
    let now_ms = now_epoch_ms();

    let post_id = if let Some(pool) = &state.postgres {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO posts (author_id, content, created_at_ms) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(user_id)
        .bind(content)
        .bind(now_ms)
        .fetch_one(pool)
        .await
        .map_err(ServerError::internal)?
    } else {
        let pool = state.sqlite_pool()?;
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO posts (author_id, content, created_at_ms) VALUES (?1, ?2, ?3) RETURNING id",
        )
        .bind(user_id)
        .bind(content)
        .bind(now_ms)
        .fetch_one(pool)
        .await
        .map_err(ServerError::internal)?
    };

    tracing::info!(user_id, post_id, "post created");

    let post = fetch_post(&state, user_id, post_id)
        .await?
        .ok_or_else(|| ServerError::internal("created post vanished"))?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn post_detail(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(post_id): AxumPath<i64>,
) -> Result<Json<Post>, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    let post = fetch_post(&state, user_id, post_id)
        .await?
        .ok_or_else(|| ServerError::not_found("post not found"))?;
    Ok(Json(post))
}

pub async fn delete_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(post_id): AxumPath<i64>,
) -> Result<StatusCode, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;

    let author_id = if let Some(pool) = &state.postgres {
        sqlx::query_scalar::<_, i64>("SELECT author_id FROM posts WHERE id = $1")
            .bind(post_id)
            .fetch_optional(pool)
            .await
            .map_err(ServerError::internal)?
    } else {
        let pool = state.sqlite_pool()?;
        sqlx::query_scalar::<_, i64>("SELECT author_id FROM posts WHERE id = ?1")
            .bind(post_id)
            .fetch_optional(pool)
            .await
            .map_err(ServerError::internal)?
    }
    .ok_or_else(|| ServerError::not_found("post not found"))?;

    if author_id != user_id {
        return Err(ServerError::forbidden("only the author can delete a post"));
    }

    if let Some(pool) = &state.postgres {
        sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(post_id)
            .execute(pool)
            .await
            .map_err(ServerError::internal)?;
    } else {
        let pool = state.sqlite_pool()?;
        sqlx::query("DELETE FROM posts WHERE id = ?1")
            .bind(post_id)
            .execute(pool)
            .await
            .map_err(ServerError::internal)?;
    }

    tracing::info!(user_id, post_id, "post deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Removes the caller's like when present, adds it otherwise.
pub async fn toggle_like(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(post_id): AxumPath<i64>,
) -> Result<Json<LikeResponse>, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    let now_ms = now_epoch_ms();

    let (liked, likes) = if let Some(pool) = &state.postgres {
        let mut tx = pool.begin().await.map_err(ServerError::internal)?;

        sqlx::query_scalar::<_, i64>("SELECT id FROM posts WHERE id = $1")
            .bind(post_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(ServerError::internal)?
            .ok_or_else(|| ServerError::not_found("post not found"))?;

        let removed = sqlx::query("DELETE FROM post_likes WHERE post_id = $1 AND user_id = $2")
            .bind(post_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(ServerError::internal)?
            .rows_affected();

        if removed == 0 {
            sqlx::query(
                "INSERT INTO post_likes (post_id, user_id, created_at_ms) VALUES ($1, $2, $3)",
            )
            .bind(post_id)
            .bind(user_id)
            .bind(now_ms)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_error(e, "like already recorded"))?;
        }

        let likes =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM post_likes WHERE post_id = $1")
                .bind(post_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(ServerError::internal)?;

        tx.commit().await.map_err(ServerError::internal)?;
        (removed == 0, likes)
    } else {
        let pool = state.sqlite_pool()?;
        let mut tx = pool.begin().await.map_err(ServerError::internal)?;

        sqlx::query_scalar::<_, i64>("SELECT id FROM posts WHERE id = ?1")
            .bind(post_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(ServerError::internal)?
            .ok_or_else(|| ServerError::not_found("post not found"))?;

        let removed = sqlx::query("DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2")
            .bind(post_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(ServerError::internal)?
            .rows_affected();

        if removed == 0 {
            sqlx::query(
                "INSERT INTO post_likes (post_id, user_id, created_at_ms) VALUES (?1, ?2, ?3)",
            )
            .bind(post_id)
            .bind(user_id)
            .bind(now_ms)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_error(e, "like already recorded"))?;
        }

        let likes =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM post_likes WHERE post_id = ?1")
                .bind(post_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(ServerError::internal)?;

        tx.commit().await.map_err(ServerError::internal)?;
        (removed == 0, likes)
    };

    tracing::debug!(user_id, post_id, liked, likes, "like toggled");

    Ok(Json(LikeResponse {
        post_id,
        liked,
        likes,
    }))
}
