use std::collections::HashSet;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use sqlx::types::Json as SqlJson;

use crate::app_state::AppState;
use crate::auth::auth_user_id;
use crate::errors::{map_db_error, ServerError};
use crate::handlers::interests::fetch_hobbies;
use crate::handlers::users::user_exists;
use crate::models::{
    FriendRequestCreate, FriendRequestRow, FriendSuggestion, FriendSummary, PageQuery,
    SuggestionCandidate,
};
use crate::time::now_epoch_ms;

pub async fn list_friends(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<FriendSummary>>, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    let (limit, offset) = page.bounds();

    if let Some(pool) = &state.postgres {
        let rows = sqlx::query_as::<_, FriendSummary>(
            "SELECT u.id, u.name, u.avatar, u.location, \
            COALESCE(f.accepted_at_ms, f.created_at_ms) AS since_ms \
            FROM friendships f \
            JOIN users u ON u.id = CASE WHEN f.user_id = $1 THEN f.friend_id ELSE f.user_id END \
            WHERE (f.user_id = $1 OR f.friend_id = $1) AND f.status = 'accepted' \
            ORDER BY u.name, u.id LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(ServerError::internal)?;
        return Ok(Json(rows));
    }

    let pool = state.sqlite_pool()?;
    let rows = sqlx::query_as::<_, FriendSummary>(
        "SELECT u.id, u.name, u.avatar, u.location, \
        COALESCE(f.accepted_at_ms, f.created_at_ms) AS since_ms \
        FROM friendships f \
        JOIN users u ON u.id = CASE WHEN f.user_id = ?1 THEN f.friend_id ELSE f.user_id END \
        WHERE (f.user_id = ?1 OR f.friend_id = ?1) AND f.status = 'accepted' \
        ORDER BY u.name, u.id LIMIT ?2 OFFSET ?3",
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .map_err(ServerError::internal)?;
    Ok(Json(rows))
}

pub async fn list_requests(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<FriendRequestRow>>, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;

    if let Some(pool) = &state.postgres {
        let rows = sqlx::query_as::<_, FriendRequestRow>(
            "SELECT f.id, f.user_id AS requester_id, u.name AS requester_name, \
            u.avatar AS requester_avatar, f.created_at_ms \
            FROM friendships f JOIN users u ON u.id = f.user_id \
            WHERE f.friend_id = $1 AND f.status = 'pending' \
            ORDER BY f.id DESC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(ServerError::internal)?;
        return Ok(Json(rows));
    }

    let pool = state.sqlite_pool()?;
    let rows = sqlx::query_as::<_, FriendRequestRow>(
        "SELECT f.id, f.user_id AS requester_id, u.name AS requester_name, \
        u.avatar AS requester_avatar, f.created_at_ms \
        FROM friendships f JOIN users u ON u.id = f.user_id \
        WHERE f.friend_id = ?1 AND f.status = 'pending' \
        ORDER BY f.id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(ServerError::internal)?;
    Ok(Json(rows))
}

/// Creates a pending request. Any row between the two users, in either
/// direction, makes this a conflict.
pub async fn send_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<FriendRequestCreate>,
) -> Result<StatusCode, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    let friend_id = payload
        .friend_id
        .ok_or_else(|| ServerError::bad_request("friend_id required"))?;

    if friend_id == user_id {
        return Err(ServerError::bad_request("cannot befriend yourself"));
    }
    if !user_exists(&state, friend_id).await? {
        return Err(ServerError::not_found("user not found"));
    }

    let now_ms = now_epoch_ms();

    let inserted = if let Some(pool) = &state.postgres {
        let mut tx = pool.begin().await.map_err(ServerError::internal)?;

        // Locking both users in id order serializes requests between the same pair.
        let locked = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM users WHERE id IN ($1, $2) ORDER BY id FOR UPDATE",
        )
        .bind(user_id)
        .bind(friend_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(ServerError::internal)?;
        if locked.len() < 2 {
            return Err(ServerError::not_found("user not found"));
        }

        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM friendships \
            WHERE (user_id = $1 AND friend_id = $2) OR (user_id = $2 AND friend_id = $1)",
        )
        .bind(user_id)
        .bind(friend_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ServerError::internal)?;

        let inserted = if existing.is_some() {
            0
        } else {
            sqlx::query(
                "INSERT INTO friendships (user_id, friend_id, status, created_at_ms) \
                VALUES ($1, $2, 'pending', $3)",
            )
            .bind(user_id)
            .bind(friend_id)
            .bind(now_ms)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_error(e, "friendship already exists or is pending"))?
            .rows_affected()
        };

        tx.commit().await.map_err(ServerError::internal)?;
        inserted
    } else {
        let pool = state.sqlite_pool()?;
        let mut tx = pool.begin().await.map_err(ServerError::internal)?;

        // sqlite runs one writer at a time, so the guarded insert is atomic.
        let inserted = sqlx::query(
            "INSERT INTO friendships (user_id, friend_id, status, created_at_ms) \
            SELECT ?1, ?2, 'pending', ?3 WHERE NOT EXISTS ( \
                SELECT 1 FROM friendships \
                WHERE (user_id = ?1 AND friend_id = ?2) OR (user_id = ?2 AND friend_id = ?1))",
        )
        .bind(user_id)
        .bind(friend_id)
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_error(e, "friendship already exists or is pending"))?
        .rows_affected();

        tx.commit().await.map_err(ServerError::internal)?;
        inserted
    };

    if inserted == 0 {
        return Err(ServerError::new(
            StatusCode::CONFLICT,
            "friendship already exists or is pending",
        ));
    }

    tracing::info!(user_id, friend_id, "friend request sent");
    Ok(StatusCode::CREATED)
}

pub async fn accept_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(requester_id): AxumPath<i64>,
) -> Result<StatusCode, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    let now_ms = now_epoch_ms();

    let rows = if let Some(pool) = &state.postgres {
        sqlx::query(
            "UPDATE friendships SET status = 'accepted', accepted_at_ms = $3 \
            WHERE user_id = $1 AND friend_id = $2 AND status = 'pending'",
        )
        .bind(requester_id)
        .bind(user_id)
        .bind(now_ms)
        .execute(pool)
        .await
        .map_err(ServerError::internal)?
        .rows_affected()
    } else {
        let pool = state.sqlite_pool()?;
        sqlx::query(
            "UPDATE friendships SET status = 'accepted', accepted_at_ms = ?3 \
            WHERE user_id = ?1 AND friend_id = ?2 AND status = 'pending'",
        )
        .bind(requester_id)
        .bind(user_id)
        .bind(now_ms)
        .execute(pool)
        .await
        .map_err(ServerError::internal)?
        .rows_affected()
    };

    if rows == 0 {
        return Err(ServerError::not_found("friend request not found"));
    }

    tracing::info!(user_id, requester_id, "friend request accepted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reject_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(requester_id): AxumPath<i64>,
) -> Result<StatusCode, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;

    let rows = if let Some(pool) = &state.postgres {
        sqlx::query(
            "DELETE FROM friendships WHERE user_id = $1 AND friend_id = $2 AND status = 'pending'",
        )
        .bind(requester_id)
        .bind(user_id)
        .execute(pool)
        .await
        .map_err(ServerError::internal)?
        .rows_affected()
    } else {
        let pool = state.sqlite_pool()?;
        sqlx::query(
            "DELETE FROM friendships WHERE user_id = ?1 AND friend_id = ?2 AND status = 'pending'",
        )
        .bind(requester_id)
        .bind(user_id)
        .execute(pool)
        .await
        .map_err(ServerError::internal)?
        .rows_affected()
    };

    if rows == 0 {
        return Err(ServerError::not_found("friend request not found"));
    }

    tracing::info!(user_id, requester_id, "friend request rejected");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_friend(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(friend_id): AxumPath<i64>,
) -> Result<StatusCode, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;

    let rows = if let Some(pool) = &state.postgres {
        sqlx::query(
            "DELETE FROM friendships WHERE status = 'accepted' \
            AND ((user_id = $1 AND friend_id = $2) OR (user_id = $2 AND friend_id = $1))",
        )
        .bind(user_id)
        .bind(friend_id)
        .execute(pool)
        .await
        .map_err(ServerError::internal)?
        .rows_affected()
    } else {
        let pool = state.sqlite_pool()?;
        sqlx::query(
            "DELETE FROM friendships WHERE status = 'accepted' \
            AND ((user_id = ?1 AND friend_id = ?2) OR (user_id = ?2 AND friend_id = ?1))",
        )
        .bind(user_id)
        .bind(friend_id)
        .execute(pool)
        .await
        .map_err(ServerError::internal)?
        .rows_affected()
    };

    if rows == 0 {
        return Err(ServerError::not_found("friendship not found"));
    }

    tracing::info!(user_id, friend_id, "friend removed");
    Ok(StatusCode::NO_CONTENT)
}

/// Users with no friendship row to the caller, ranked by hobbies shared with
/// the caller (case-insensitive), then by id.
pub async fn suggestions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<FriendSuggestion>>, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    let (limit, offset) = page.bounds();
    let mine: Vec<String> = fetch_hobbies(&state, user_id)
        .await?
        .iter()
        .map(|h| h.to_lowercase())
        .collect();

    let candidates = if let Some(pool) = &state.postgres {
        sqlx::query_as::<_, SuggestionCandidate>(
            "SELECT u.id, u.name, u.avatar, u.location, \
            COALESCE(i.hobbies, '[]'::jsonb) AS hobbies, \
            (SELECT COUNT(*) FROM jsonb_array_elements_text(COALESCE(i.hobbies, '[]'::jsonb)) AS h(value) \
                WHERE LOWER(h.value) IN (SELECT jsonb_array_elements_text($2))) AS shared_count \
            FROM users u LEFT JOIN interests i ON i.user_id = u.id \
            WHERE u.id <> $1 AND NOT EXISTS ( \
                SELECT 1 FROM friendships f \
                WHERE (f.user_id = $1 AND f.friend_id = u.id) \
                OR (f.user_id = u.id AND f.friend_id = $1)) \
            ORDER BY shared_count DESC, u.id LIMIT $3 OFFSET $4",
        )
        .bind(user_id)
        .bind(SqlJson(&mine))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(ServerError::internal)?
    } else {
        let pool = state.sqlite_pool()?;
        sqlx::query_as::<_, SuggestionCandidate>(
            "SELECT u.id, u.name, u.avatar, u.location, \
            COALESCE(i.hobbies, '[]') AS hobbies, \
            (SELECT COUNT(*) FROM json_each(COALESCE(i.hobbies, '[]')) h \
                WHERE LOWER(h.value) IN (SELECT value FROM json_each(?2))) AS shared_count \
            FROM users u LEFT JOIN interests i ON i.user_id = u.id \
            WHERE u.id <> ?1 AND NOT EXISTS ( \
                SELECT 1 FROM friendships f \
                WHERE (f.user_id = ?1 AND f.friend_id = u.id) \
                OR (f.user_id = u.id AND f.friend_id = ?1)) \
            ORDER BY shared_count DESC, u.id LIMIT ?3 OFFSET ?4",
        )
        .bind(user_id)
        .bind(SqlJson(&mine))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(ServerError::internal)?
    };

    let mine: HashSet<String> = mine.into_iter().collect();
    let suggestions = candidates
        .into_iter()
        .map(|candidate| to_suggestion(&mine, candidate))
        .collect();
    Ok(Json(suggestions))
}

/// Keeps the candidate's own spelling and order of the hobbies found in `mine`,
/// which holds lower-cased labels.
fn to_suggestion(mine: &HashSet<String>, candidate: SuggestionCandidate) -> FriendSuggestion {
    FriendSuggestion {
        shared_hobbies: candidate
            .hobbies
            .0
            .into_iter()
            .filter(|h| mine.contains(&h.to_lowercase()))
            .collect(),
        id: candidate.id,
        name: candidate.name,
        avatar: candidate.avatar,
        location: candidate.location,
    }
}

#[cfg(test)]
mod tests {
    use sqlx::types::Json;

    use super::*;

    #[test]
    fn shared_hobbies_keep_the_candidate_spelling() {
        let mine: HashSet<String> = ["chess", "hiking"].iter().map(|h| h.to_string()).collect();
        let candidate = SuggestionCandidate {
            id: 2,
            name: "user2".to_string(),
            avatar: None,
            location: Some("Oslo".to_string()),
            hobbies: Json(vec!["Knitting".into(), "Hiking".into(), "CHESS".into()]),
        };

        let suggestion = to_suggestion(&mine, candidate);
        assert_eq!(suggestion.id, 2);
        assert_eq!(suggestion.location.as_deref(), Some("Oslo"));
        assert_eq!(suggestion.shared_hobbies, vec!["Hiking", "CHESS"]);
    }
}
