mod common;

use axum::http::StatusCode;
use common::{TestApp, error_code};
use serde_json::json;

#[tokio::test]
async fn messages_require_friendship() {
    let app = TestApp::new().await;
    let ana = app.user("Ana").await;
    let ben = app.user("Ben").await;

    let (status, body) = app
        .post(
            "/api/messages",
            &ana.token,
            json!({ "recipient_id": ben.id, "content": "hi" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "forbidden");
}

#[tokio::test]
async fn friends_exchange_messages_in_order() {
    let app = TestApp::new().await;
    let cal = app.user("Cal").await;
    let dee = app.user("Dee").await;
    app.befriend(&cal, &dee).await;

    let (status, first) = app
        .post(
            "/api/messages",
            &cal.token,
            json!({ "recipient_id": dee.id, "content": " hello " }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["content"], "hello");
    assert_eq!(first["sender_id"], cal.id);

    app.post(
        "/api/messages",
        &dee.token,
        json!({ "recipient_id": cal.id, "content": "hey!" }),
    )
    .await;

    let (status, body) = app
        .get(&format!("/api/messages/{}", cal.id), &dee.token)
        .await;
    assert_eq!(status, StatusCode::OK);
    let contents: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["hello", "hey!"]);
}

#[tokio::test]
async fn invalid_messages_are_rejected() {
    let app = TestApp::new().await;
    let eli = app.user("Eli").await;

    let (status, _) = app
        .post(
            "/api/messages",
            &eli.token,
            json!({ "recipient_id": eli.id, "content": "me" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("/api/messages", &eli.token, json!({ "content": "who?" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(
            "/api/messages",
            &eli.token,
            json!({ "recipient_id": 9999, "content": "hello?" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.get("/api/messages/9999", &eli.token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
