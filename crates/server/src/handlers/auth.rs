use axum::{extract::State, http::{HeaderMap, StatusCode}, Json};

use crate::app_state::AppState;
use crate::auth::{
    auth_user_id, bearer_token, generate_token, hash_password, hash_token, normalize_email,
    verify_password,
};
use crate::errors::{map_db_error, ServerError};
use crate::handlers::users::fetch_profile;
use crate::models::{LoginRequest, LoginResponse, RegisterRequest, UserProfile};
use crate::time::{expires_at_ms, now_epoch_ms};

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserProfile>), ServerError> {
    let name = payload.name.trim();
    let email = normalize_email(&payload.email);
    let password = payload.password.trim();
    if name.is_empty() || email.is_empty() || password.is_empty() {
        return Err(ServerError::bad_request("name, email and password required"));
    }
    if !email.contains('@') {
        return Err(ServerError::bad_request("invalid email"));
    }
    if payload.age.is_some_and(|age| age < 0) {
        return Err(ServerError::bad_request("age cannot be negative"));
    }
    let location = payload
        .location
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty());

    let password_hash = hash_password(password).map_err(ServerError::internal)?;
    let now_ms = now_epoch_ms();

    let user_id = if let Some(pool) = &state.postgres {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO users (name, email, password_hash, age, location, created_at_ms) \
            VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(name)
        .bind(&email)
        .bind(&password_hash)
        .bind(payload.age)
        .bind(location)
        .bind(now_ms)
        .fetch_one(pool)
        .await
        .map_err(|e| map_db_error(e, "email already registered"))?
    } else {
        let pool = state.sqlite_pool()?;
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO users (name, email, password_hash, age, location, created_at_ms) \
            VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING id",
        )
        .bind(name)
        .bind(&email)
        .bind(&password_hash)
        .bind(payload.age)
        .bind(location)
        .bind(now_ms)
        .fetch_one(pool)
        .await
        .map_err(|e| map_db_error(e, "email already registered"))?
    };

    tracing::info!(user_id, "user registered");

    let profile = fetch_profile(&state, user_id)
        .await?
        .ok_or_else(|| ServerError::internal("registered user vanished"))?;
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ServerError> {
    let email = normalize_email(&payload.email);
    let password = payload.password.trim();
    if email.is_empty() || password.is_empty() {
        return Err(ServerError::bad_request("email and password required"));
    }

    let credentials = if let Some(pool) = &state.postgres {
        sqlx::query_as::<_, (i64, String)>(
            "SELECT id, password_hash FROM users WHERE email = $1",
        )
        .bind(&email)
        .fetch_optional(pool)
        .await
        .map_err(ServerError::internal)?
    } else {
        let pool = state.sqlite_pool()?;
        sqlx::query_as::<_, (i64, String)>(
            "SELECT id, password_hash FROM users WHERE email = ?1",
        )
        .bind(&email)
        .fetch_optional(pool)
        .await
        .map_err(ServerError::internal)?
    };
    let (user_id, password_hash) = credentials
        .ok_or_else(|| ServerError::new(StatusCode::UNAUTHORIZED, "invalid credentials"))?;

    verify_password(&password_hash, password)
        .map_err(|_| ServerError::new(StatusCode::UNAUTHORIZED, "invalid credentials"))?;

    let token = generate_token();
    let token_hash = hash_token(&token);
    let now_ms = now_epoch_ms();
    let expires_at = expires_at_ms(now_ms, state.token_ttl_seconds);

    if let Some(pool) = &state.postgres {
        sqlx::query(
            "INSERT INTO user_tokens (user_id, token_hash, expires_at_ms, created_at_ms) \
            VALUES ($1, $2, $3, $4)",
        )
        .bind(user_id)
        .bind(&token_hash)
        .bind(expires_at)
        .bind(now_ms)
        .execute(pool)
        .await
        .map_err(ServerError::internal)?;
    } else {
        let pool = state.sqlite_pool()?;
        sqlx::query(
            "INSERT INTO user_tokens (user_id, token_hash, expires_at_ms, created_at_ms) \
            VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(user_id)
        .bind(&token_hash)
        .bind(expires_at)
        .bind(now_ms)
        .execute(pool)
        .await
        .map_err(ServerError::internal)?;
    }

    tracing::info!(user_id, "login succeeded");

    let user = fetch_profile(&state, user_id)
        .await?
        .ok_or_else(|| ServerError::new(StatusCode::UNAUTHORIZED, "invalid credentials"))?;

    Ok(Json(LoginResponse {
        token,
        token_type: "bearer".to_string(),
        expires_in: state.token_ttl_seconds,
        user,
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ServerError> {
    let token = bearer_token(&headers)?;
    let token_hash = hash_token(&token);

    if let Some(pool) = &state.postgres {
        sqlx::query("DELETE FROM user_tokens WHERE token_hash = $1")
            .bind(&token_hash)
            .execute(pool)
            .await
            .map_err(ServerError::internal)?;
    } else {
        let pool = state.sqlite_pool()?;
        sqlx::query("DELETE FROM user_tokens WHERE token_hash = ?1")
            .bind(&token_hash)
            .execute(pool)
            .await
            .map_err(ServerError::internal)?;
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserProfile>, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    let profile = fetch_profile(&state, user_id)
        .await?
        .ok_or_else(|| ServerError::not_found("user not found"))?;
    Ok(Json(profile))
}
