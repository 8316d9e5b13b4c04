use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use sqlx::{Postgres, QueryBuilder, Sqlite};

use crate::app_state::AppState;
use crate::auth::{auth_user_id, hash_password, verify_password};
use crate::errors::ServerError;
use crate::models::{
    contains_pattern, page_bounds, PasswordChangeRequest, ProfileUpdateRequest, UserProfile,
    UserSearchQuery, UserSummary,
};

pub(crate) async fn fetch_profile(
    state: &AppState,
    user_id: i64,
) -> Result<Option<UserProfile>, ServerError> {
    if let Some(pool) = &state.postgres {
        return sqlx::query_as::<_, UserProfile>(
            "SELECT u.id, u.name, u.email, u.avatar, u.bio, u.location, u.age, \
            COALESCE(i.hobbies, '[]'::jsonb) AS hobbies, u.created_at_ms \
            FROM users u LEFT JOIN interests i ON i.user_id = u.id \
            WHERE u.id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(ServerError::internal);
    }

    let pool = state.sqlite_pool()?;
    sqlx::query_as::<_, UserProfile>(
        "SELECT u.id, u.name, u.email, u.avatar, u.bio, u.location, u.age, \
        COALESCE(i.hobbies, '[]') AS hobbies, u.created_at_ms \
        FROM users u LEFT JOIN interests i ON i.user_id = u.id \
        WHERE u.id = ?1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(ServerError::internal)
}

pub(crate) async fn user_exists(state: &AppState, user_id: i64) -> Result<bool, ServerError> {
    let found = if let Some(pool) = &state.postgres {
        sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .map_err(ServerError::internal)?
    } else {
        let pool = state.sqlite_pool()?;
        sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .map_err(ServerError::internal)?
    };
    Ok(found.is_some())
}

pub async fn user_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(user_id): AxumPath<i64>,
) -> Result<Json<UserProfile>, ServerError> {
    auth_user_id(&state, &headers).await?;
    let profile = fetch_profile(&state, user_id)
        .await?
        .ok_or_else(|| ServerError::not_found("user not found"))?;
    Ok(Json(profile))
}

/// Maps an optional text field to the value to store: absent keeps the
/// column (`None`), blank clears it (`Some(None)`).
fn optional_text(raw: Option<&str>) -> Option<Option<String>> {
    raw.map(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

pub async fn update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(user_id): AxumPath<i64>,
    Json(payload): Json<ProfileUpdateRequest>,
) -> Result<Json<UserProfile>, ServerError> {
    let caller = auth_user_id(&state, &headers).await?;
    if caller != user_id {
        return Err(ServerError::forbidden("cannot edit another user's profile"));
    }

    let name = match payload.name.as_deref() {
        Some(raw) if raw.trim().is_empty() => {
            return Err(ServerError::bad_request("name cannot be blank"));
        }
        Some(raw) => Some(raw.trim().to_string()),
        None => None,
    };
    if payload.age.is_some_and(|age| age < 0) {
        return Err(ServerError::bad_request("age cannot be negative"));
    }
    let avatar = optional_text(payload.avatar.as_deref());
    let bio = optional_text(payload.bio.as_deref());
    let location = optional_text(payload.location.as_deref());

    let rows = if let Some(pool) = &state.postgres {
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE users SET id = id");
        if let Some(name) = &name {
            builder.push(", name = ").push_bind(name);
        }
        if let Some(avatar) = &avatar {
            builder.push(", avatar = ").push_bind(avatar);
        }
        if let Some(bio) = &bio {
            builder.push(", bio = ").push_bind(bio);
        }
        if let Some(location) = &location {
            builder.push(", location = ").push_bind(location);
        }
        if let Some(age) = payload.age {
            builder.push(", age = ").push_bind(age);
        }
        builder.push(" WHERE id = ").push_bind(user_id);
        builder
            .build()
            .execute(pool)
            .await
            .map_err(ServerError::internal)?
            .rows_affected()
    } else {
        let pool = state.sqlite_pool()?;
        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE users SET id = id");
        if let Some(name) = &name {
            builder.push(", name = ").push_bind(name);
        }
        if let Some(avatar) = &avatar {
            builder.push(", avatar = ").push_bind(avatar);
        }
        if let Some(bio) = &bio {
            builder.push(", bio = ").push_bind(bio);
        }
        if let Some(location) = &location {
            builder.push(", location = ").push_bind(location);
        }
        if let Some(age) = payload.age {
            builder.push(", age = ").push_bind(age);
        }
        builder.push(" WHERE id = ").push_bind(user_id);
        builder
            .build()
            .execute(pool)
            .await
            .map_err(ServerError::internal)?
            .rows_affected()
    };

    if rows == 0 {
        return Err(ServerError::not_found("user not found"));
    }

    tracing::info!(user_id, "profile updated");

    let profile = fetch_profile(&state, user_id)
        .await?
        .ok_or_else(|| ServerError::not_found("user not found"))?;
    Ok(Json(profile))
}

/// Case-insensitive substring match on name or email, excluding the caller.
pub async fn search_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UserSearchQuery>,
) -> Result<Json<Vec<UserSummary>>, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    let q = query.q.as_deref().unwrap_or_default().trim();
    if q.is_empty() {
        return Err(ServerError::bad_request("q required"));
    }
    let (limit, offset) = page_bounds(query.limit, query.offset);
    let pattern = contains_pattern(q);

    if let Some(pool) = &state.postgres {
        let rows = sqlx::query_as::<_, UserSummary>(
            "SELECT id, name, avatar, location FROM users \
            WHERE id <> $1 AND (LOWER(name) LIKE $2 ESCAPE '\\' OR email LIKE $2 ESCAPE '\\') \
            ORDER BY name, id LIMIT $3 OFFSET $4",
        )
        .bind(user_id)
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(ServerError::internal)?;
        return Ok(Json(rows));
    }

    let pool = state.sqlite_pool()?;
    let rows = sqlx::query_as::<_, UserSummary>(
        "SELECT id, name, avatar, location FROM users \
        WHERE id <> ?1 AND (LOWER(name) LIKE ?2 ESCAPE '\\' OR email LIKE ?2 ESCAPE '\\') \
        ORDER BY name, id LIMIT ?3 OFFSET ?4",
    )
    .bind(user_id)
    .bind(&pattern)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .map_err(ServerError::internal)?;
    Ok(Json(rows))
}

pub async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<PasswordChangeRequest>,
) -> Result<StatusCode, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    let current_password = payload.current_password.trim();
    let new_password = payload.new_password.trim();
    if current_password.is_empty() || new_password.is_empty() {
        return Err(ServerError::bad_request(
            "current_password and new_password required",
        ));
    }

    let password_hash = if let Some(pool) = &state.postgres {
        sqlx::query_scalar::<_, String>("SELECT password_hash FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .map_err(ServerError::internal)?
    } else {
        let pool = state.sqlite_pool()?;
        sqlx::query_scalar::<_, String>("SELECT password_hash FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .map_err(ServerError::internal)?
    }
    .ok_or_else(|| ServerError::not_found("user not found"))?;

    verify_password(&password_hash, current_password)
        .map_err(|_| ServerError::new(StatusCode::UNAUTHORIZED, "invalid credentials"))?;

    let new_hash = hash_password(new_password).map_err(ServerError::internal)?;

    if let Some(pool) = &state.postgres {
        sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
            .bind(&new_hash)
            .bind(user_id)
            .execute(pool)
            .await
            .map_err(ServerError::internal)?;
    } else {
        let pool = state.sqlite_pool()?;
        sqlx::query("UPDATE users SET password_hash = ?1 WHERE id = ?2")
            .bind(&new_hash)
            .bind(user_id)
            .execute(pool)
            .await
            .map_err(ServerError::internal)?;
    }

    tracing::info!(user_id, "password changed");
    Ok(StatusCode::NO_CONTENT)
}

/// Deletes the caller. Memberships go with the user through the foreign keys,
/// so the member counts of those groups are decremented in the same transaction.
pub async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;

    let rows = if let Some(pool) = &state.postgres {
        let mut tx = pool.begin().await.map_err(ServerError::internal)?;

        sqlx::query(
            "UPDATE interest_groups SET member_count = GREATEST(member_count - 1, 0) \
            WHERE id IN (SELECT group_id FROM group_members WHERE user_id = $1)",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(ServerError::internal)?;

        let rows = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(ServerError::internal)?
            .rows_affected();

        tx.commit().await.map_err(ServerError::internal)?;
        rows
    } else {
        let pool = state.sqlite_pool()?;
        let mut tx = pool.begin().await.map_err(ServerError::internal)?;

        sqlx::query(
            "UPDATE interest_groups SET member_count = MAX(member_count - 1, 0) \
            WHERE id IN (SELECT group_id FROM group_members WHERE user_id = ?1)",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(ServerError::internal)?;

        let rows = sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(ServerError::internal)?
            .rows_affected();

        tx.commit().await.map_err(ServerError::internal)?;
        rows
    };

    if rows == 0 {
        return Err(ServerError::not_found("user not found"));
    }

    tracing::info!(user_id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::optional_text;

    #[test]
    fn optional_text_distinguishes_absent_and_blank() {
        assert_eq!(optional_text(None), None);
        assert_eq!(optional_text(Some("  ")), Some(None));
        assert_eq!(optional_text(Some(" Oslo ")), Some(Some("Oslo".to_string())));
    }
}
