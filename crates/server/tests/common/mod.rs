#![allow(dead_code)]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use friendfinder_server::schema::apply_sqlite_schema;
use friendfinder_server::{AppState, router};
use serde_json::{Value, json};
use sqlx::sqlite::SqlitePoolOptions;
use tower::ServiceExt;

const SQLITE_SCHEMA: &str = include_str!("../../res/sql/sqlite/schema.sql");

pub struct TestApp {
    router: Router,
}

pub struct TestUser {
    pub id: i64,
    pub token: String,
}

impl TestApp {
    /// One shared connection keeps the in-memory database alive for the whole test.
    pub async fn new() -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        apply_sqlite_schema(&pool, SQLITE_SCHEMA)
            .await
            .expect("apply schema");
        Self {
            router: router(AppState::with_sqlite(pool, 3600)),
        }
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request("GET", uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request("POST", uri, Some(token), Some(body)).await
    }

    pub async fn post_empty(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request("POST", uri, Some(token), None).await
    }

    pub async fn put(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request("PUT", uri, Some(token), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request("DELETE", uri, Some(token), None).await
    }

    pub async fn register(&self, name: &str) -> i64 {
        let (status, body) = self
            .request(
                "POST",
                "/api/auth/register",
                None,
                Some(json!({
                    "name": name,
                    "email": email_for(name),
                    "password": "correct horse",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register {name}: {body}");
        body["id"].as_i64().expect("user id")
    }

    pub async fn login(&self, name: &str) -> String {
        let (status, body) = self
            .request(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({ "email": email_for(name), "password": "correct horse" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login {name}: {body}");
        body["token"].as_str().expect("token").to_string()
    }

    pub async fn user(&self, name: &str) -> TestUser {
        let id = self.register(name).await;
        let token = self.login(name).await;
        TestUser { id, token }
    }

    /// Makes `a` and `b` accepted friends.
    pub async fn befriend(&self, a: &TestUser, b: &TestUser) {
        let (status, _) = self
            .post("/api/friends/requests", &a.token, json!({ "friend_id": b.id }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = self
            .post_empty(&format!("/api/friends/requests/{}/accept", a.id), &b.token)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
}

pub fn email_for(name: &str) -> String {
    format!("{}@example.com", name.to_lowercase())
}

pub fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}

pub fn ids(body: &Value) -> Vec<i64> {
    body.as_array()
        .expect("array body")
        .iter()
        .map(|item| item["id"].as_i64().expect("id"))
        .collect()
}
