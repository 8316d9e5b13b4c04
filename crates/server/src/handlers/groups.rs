use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use sqlx::types::Json as SqlJson;
use sqlx::{Postgres, QueryBuilder, Sqlite};

use crate::app_state::AppState;
use crate::auth::auth_user_id;
use crate::errors::{map_db_error, ServerError};
use crate::models::{
    contains_pattern, normalize_labels, page_bounds, Group, GroupCreateRequest,
    GroupDiscoverQuery, GroupMemberRow, PageQuery,
};
use crate::time::now_epoch_ms;

const GROUP_COLUMNS: &str = "g.id, g.name, g.description, g.leader_id, g.tags, \
    g.member_count, g.disbanded, g.created_at_ms";

const INSERTED_COLUMNS: &str =
    "id, name, description, leader_id, tags, member_count, disbanded, created_at_ms";

/// Creates the group and enrolls the caller as leader in one transaction.
pub async fn create_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GroupCreateRequest>,
) -> Result<(StatusCode, Json<Group>), ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ServerError::bad_request("name required"));
    }
    let description = payload
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());
    let tags = normalize_labels(payload.tags);
    let now_ms = now_epoch_ms();

    let group = if let Some(pool) = &state.postgres {
        let mut tx = pool.begin().await.map_err(ServerError::internal)?;

        let query = format!(
            "INSERT INTO interest_groups \
            (name, description, leader_id, tags, member_count, disbanded, created_at_ms) \
            VALUES ($1, $2, $3, $4, 1, FALSE, $5) RETURNING {INSERTED_COLUMNS}"
        );
        let group = sqlx::query_as::<_, Group>(&query)
            .bind(name)
            .bind(description)
            .bind(user_id)
            .bind(SqlJson(&tags))
            .bind(now_ms)
            .fetch_one(&mut *tx)
            .await
            .map_err(ServerError::internal)?;

        sqlx::query(
            "INSERT INTO group_members (group_id, user_id, joined_at_ms) VALUES ($1, $2, $3)",
        )
        .bind(group.id)
        .bind(user_id)
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .map_err(ServerError::internal)?;

        tx.commit().await.map_err(ServerError::internal)?;
        group
    } else {
        let pool = state.sqlite_pool()?;
        let mut tx = pool.begin().await.map_err(ServerError::internal)?;

        let query = format!(
            "INSERT INTO interest_groups \
            (name, description, leader_id, tags, member_count, disbanded, created_at_ms) \
            VALUES (?1, ?2, ?3, ?4, 1, 0, ?5) RETURNING {INSERTED_COLUMNS}"
        );
        let group = sqlx::query_as::<_, Group>(&query)
            .bind(name)
            .bind(description)
            .bind(user_id)
            .bind(SqlJson(&tags))
            .bind(now_ms)
            .fetch_one(&mut *tx)
            .await
            .map_err(ServerError::internal)?;

        sqlx::query(
            "INSERT INTO group_members (group_id, user_id, joined_at_ms) VALUES (?1, ?2, ?3)",
        )
        .bind(group.id)
        .bind(user_id)
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .map_err(ServerError::internal)?;

        tx.commit().await.map_err(ServerError::internal)?;
        group
    };

    tracing::info!(user_id, group_id = group.id, "group created");
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn list_my_groups(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Group>>, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    let (limit, offset) = page.bounds();

    if let Some(pool) = &state.postgres {
        let query = format!(
            "SELECT {GROUP_COLUMNS} FROM interest_groups g \
            JOIN group_members m ON m.group_id = g.id \
            WHERE m.user_id = $1 AND g.disbanded = FALSE \
            ORDER BY g.name, g.id LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, Group>(&query)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
            .map_err(ServerError::internal)?;
        return Ok(Json(rows));
    }

    let pool = state.sqlite_pool()?;
    let query = format!(
        "SELECT {GROUP_COLUMNS} FROM interest_groups g \
        JOIN group_members m ON m.group_id = g.id \
        WHERE m.user_id = ?1 AND g.disbanded = 0 \
        ORDER BY g.name, g.id LIMIT ?2 OFFSET ?3"
    );
    let rows = sqlx::query_as::<_, Group>(&query)
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(ServerError::internal)?;
    Ok(Json(rows))
}

/// Active groups the caller has not joined, largest first.
pub async fn discover_groups(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<GroupDiscoverQuery>,
) -> Result<Json<Vec<Group>>, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    let (limit, offset) = page_bounds(query.limit, query.offset);
    let pattern = query
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(contains_pattern);

    if let Some(pool) = &state.postgres {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {GROUP_COLUMNS} FROM interest_groups g \
            WHERE g.disbanded = FALSE AND NOT EXISTS \
            (SELECT 1 FROM group_members m WHERE m.group_id = g.id AND m.user_id = "
        ));
        builder.push_bind(user_id).push(")");
        if let Some(pattern) = &pattern {
            builder
                .push(" AND LOWER(g.name) LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\'");
        }
        builder
            .push(" ORDER BY g.member_count DESC, g.id LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = builder
            .build_query_as::<Group>()
            .fetch_all(pool)
            .await
            .map_err(ServerError::internal)?;
        return Ok(Json(rows));
    }

    let pool = state.sqlite_pool()?;
    let mut builder = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {GROUP_COLUMNS} FROM interest_groups g \
        WHERE g.disbanded = 0 AND NOT EXISTS \
        (SELECT 1 FROM group_members m WHERE m.group_id = g.id AND m.user_id = "
    ));
    builder.push_bind(user_id).push(")");
    if let Some(pattern) = &pattern {
        builder
            .push(" AND LOWER(g.name) LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\'");
    }
    builder
        .push(" ORDER BY g.member_count DESC, g.id LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let rows = builder
        .build_query_as::<Group>()
        .fetch_all(pool)
        .await
        .map_err(ServerError::internal)?;
    Ok(Json(rows))
}

async fn fetch_active_group(state: &AppState, group_id: i64) -> Result<Group, ServerError> {
    let group = if let Some(pool) = &state.postgres {
        let query = format!(
            "SELECT {GROUP_COLUMNS} FROM interest_groups g \
            WHERE g.id = $1 AND g.disbanded = FALSE"
        );
        sqlx::query_as::<_, Group>(&query)
            .bind(group_id)
            .fetch_optional(pool)
            .await
            .map_err(ServerError::internal)?
    } else {
        let pool = state.sqlite_pool()?;
        let query = format!(
            "SELECT {GROUP_COLUMNS} FROM interest_groups g \
            WHERE g.id = ?1 AND g.disbanded = 0"
        );
        sqlx::query_as::<_, Group>(&query)
            .bind(group_id)
            .fetch_optional(pool)
            .await
            .map_err(ServerError::internal)?
    };
    group.ok_or_else(|| ServerError::not_found("group not found"))
}

pub async fn group_detail(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(group_id): AxumPath<i64>,
) -> Result<Json<Group>, ServerError> {
    auth_user_id(&state, &headers).await?;
    let group = fetch_active_group(&state, group_id).await?;
    Ok(Json(group))
}

/// Members with the leader first, then in join order.
pub async fn list_members(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(group_id): AxumPath<i64>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<GroupMemberRow>>, ServerError> {
    auth_user_id(&state, &headers).await?;
    fetch_active_group(&state, group_id).await?;
    let (limit, offset) = page.bounds();

    if let Some(pool) = &state.postgres {
        let rows = sqlx::query_as::<_, GroupMemberRow>(
            "SELECT m.user_id, u.name, u.avatar, (m.user_id = g.leader_id) AS is_leader, \
            m.joined_at_ms \
            FROM group_members m \
            JOIN users u ON u.id = m.user_id \
            JOIN interest_groups g ON g.id = m.group_id \
            WHERE m.group_id = $1 \
            ORDER BY is_leader DESC, m.joined_at_ms, m.user_id \
            LIMIT $2 OFFSET $3",
        )
        .bind(group_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(ServerError::internal)?;
        return Ok(Json(rows));
    }

    let pool = state.sqlite_pool()?;
    let rows = sqlx::query_as::<_, GroupMemberRow>(
        "SELECT m.user_id, u.name, u.avatar, (m.user_id = g.leader_id) AS is_leader, \
        m.joined_at_ms \
        FROM group_members m \
        JOIN users u ON u.id = m.user_id \
        JOIN interest_groups g ON g.id = m.group_id \
        WHERE m.group_id = ?1 \
        ORDER BY is_leader DESC, m.joined_at_ms, m.user_id \
        LIMIT ?2 OFFSET ?3",
    )
    .bind(group_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .map_err(ServerError::internal)?;
    Ok(Json(rows))
}

pub async fn join_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(group_id): AxumPath<i64>,
) -> Result<StatusCode, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    let now_ms = now_epoch_ms();

    if let Some(pool) = &state.postgres {
        let mut tx = pool.begin().await.map_err(ServerError::internal)?;

        let disbanded = sqlx::query_scalar::<_, bool>(
            "SELECT disbanded FROM interest_groups WHERE id = $1 FOR UPDATE",
        )
        .bind(group_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ServerError::internal)?;
        if disbanded != Some(false) {
            return Err(ServerError::not_found("group not found"));
        }

        sqlx::query(
            "INSERT INTO group_members (group_id, user_id, joined_at_ms) VALUES ($1, $2, $3)",
        )
        .bind(group_id)
        .bind(user_id)
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_error(e, "already a member"))?;

        sqlx::query("UPDATE interest_groups SET member_count = member_count + 1 WHERE id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await
            .map_err(ServerError::internal)?;

        tx.commit().await.map_err(ServerError::internal)?;
    } else {
        let pool = state.sqlite_pool()?;
        let mut tx = pool.begin().await.map_err(ServerError::internal)?;

        let disbanded =
            sqlx::query_scalar::<_, bool>("SELECT disbanded FROM interest_groups WHERE id = ?1")
                .bind(group_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(ServerError::internal)?;
        if disbanded != Some(false) {
            return Err(ServerError::not_found("group not found"));
        }

        sqlx::query(
            "INSERT INTO group_members (group_id, user_id, joined_at_ms) VALUES (?1, ?2, ?3)",
        )
        .bind(group_id)
        .bind(user_id)
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_error(e, "already a member"))?;

        sqlx::query("UPDATE interest_groups SET member_count = member_count + 1 WHERE id = ?1")
            .bind(group_id)
            .execute(&mut *tx)
            .await
            .map_err(ServerError::internal)?;

        tx.commit().await.map_err(ServerError::internal)?;
    }

    tracing::info!(user_id, group_id, "group joined");
    Ok(StatusCode::NO_CONTENT)
}

/// Members may leave an active group; the leader must disband instead.
pub async fn leave_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(group_id): AxumPath<i64>,
) -> Result<StatusCode, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;

    if let Some(pool) = &state.postgres {
        let mut tx = pool.begin().await.map_err(ServerError::internal)?;

        let leader_id = sqlx::query_scalar::<_, i64>(
            "SELECT leader_id FROM interest_groups \
            WHERE id = $1 AND disbanded = FALSE FOR UPDATE",
        )
        .bind(group_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ServerError::internal)?
        .ok_or_else(|| ServerError::not_found("group not found"))?;
        if leader_id == user_id {
            return Err(ServerError::forbidden("group leader cannot leave the group"));
        }

        let removed = sqlx::query("DELETE FROM group_members WHERE group_id = $1 AND user_id = $2")
            .bind(group_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(ServerError::internal)?
            .rows_affected();
        if removed == 0 {
            return Err(ServerError::not_found("not a member of this group"));
        }

        sqlx::query(
            "UPDATE interest_groups SET member_count = GREATEST(member_count - 1, 0) \
            WHERE id = $1",
        )
        .bind(group_id)
        .execute(&mut *tx)
        .await
        .map_err(ServerError::internal)?;

        tx.commit().await.map_err(ServerError::internal)?;
    } else {
        let pool = state.sqlite_pool()?;
        let mut tx = pool.begin().await.map_err(ServerError::internal)?;

        let leader_id = sqlx::query_scalar::<_, i64>(
            "SELECT leader_id FROM interest_groups WHERE id = ?1 AND disbanded = 0",
        )
        .bind(group_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ServerError::internal)?
        .ok_or_else(|| ServerError::not_found("group not found"))?;
        if leader_id == user_id {
            return Err(ServerError::forbidden("group leader cannot leave the group"));
        }

        let removed = sqlx::query("DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2")
            .bind(group_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(ServerError::internal)?
            .rows_affected();
        if removed == 0 {
            return Err(ServerError::not_found("not a member of this group"));
        }

        sqlx::query(
            "UPDATE interest_groups SET member_count = MAX(member_count - 1, 0) WHERE id = ?1",
        )
        .bind(group_id)
        .execute(&mut *tx)
        .await
        .map_err(ServerError::internal)?;

        tx.commit().await.map_err(ServerError::internal)?;
    }

    tracing::info!(user_id, group_id, "group left");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn disband_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(group_id): AxumPath<i64>,
) -> Result<StatusCode, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    let group = fetch_active_group(&state, group_id).await?;
    if group.leader_id != user_id {
        return Err(ServerError::forbidden(
            "only the group leader can disband the group",
        ));
    }

    let rows = if let Some(pool) = &state.postgres {
        sqlx::query(
            "UPDATE interest_groups SET disbanded = TRUE WHERE id = $1 AND disbanded = FALSE",
        )
        .bind(group_id)
        .execute(pool)
        .await
        .map_err(ServerError::internal)?
        .rows_affected()
    } else {
        let pool = state.sqlite_pool()?;
        sqlx::query("UPDATE interest_groups SET disbanded = 1 WHERE id = ?1 AND disbanded = 0")
            .bind(group_id)
            .execute(pool)
            .await
            .map_err(ServerError::internal)?
            .rows_affected()
    };
    if rows == 0 {
        return Err(ServerError::not_found("group not found"));
    }

    tracing::info!(user_id, group_id, "group disbanded");
    Ok(StatusCode::NO_CONTENT)
}
