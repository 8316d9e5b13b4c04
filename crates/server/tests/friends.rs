mod common;

use axum::http::StatusCode;
use common::{TestApp, error_code, ids};
use serde_json::json;

#[tokio::test]
async fn request_accept_and_remove_friendship() {
    let app = TestApp::new().await;
    let ana = app.user("Ana").await;
    let ben = app.user("Ben").await;

    let (status, _) = app
        .post("/api/friends/requests", &ana.token, json!({ "friend_id": ben.id }))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app.get("/api/friends/requests", &ben.token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["requester_id"], ana.id);
    assert_eq!(body[0]["requester_name"], "Ana");

    let (_, body) = app.get("/api/friends/requests", &ana.token).await;
    assert_eq!(body, json!([]));

    let (status, _) = app
        .post_empty(&format!("/api/friends/requests/{}/accept", ana.id), &ben.token)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = app.get("/api/friends", &ana.token).await;
    assert_eq!(ids(&body), vec![ben.id]);
    let (_, body) = app.get("/api/friends", &ben.token).await;
    assert_eq!(ids(&body), vec![ana.id]);

    let (_, body) = app.get("/api/friends/requests", &ben.token).await;
    assert_eq!(body, json!([]));

    let (status, _) = app
        .delete(&format!("/api/friends/{}", ana.id), &ben.token)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = app.get("/api/friends", &ana.token).await;
    assert_eq!(body, json!([]));

    let (status, _) = app
        .delete(&format!("/api/friends/{}", ana.id), &ben.token)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_and_reverse_requests_conflict() {
    let app = TestApp::new().await;
    let cal = app.user("Cal").await;
    let dee = app.user("Dee").await;

    app.post("/api/friends/requests", &cal.token, json!({ "friend_id": dee.id }))
        .await;

    let (status, body) = app
        .post("/api/friends/requests", &cal.token, json!({ "friend_id": dee.id }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "conflict");

    let (status, _) = app
        .post("/api/friends/requests", &dee.token, json!({ "friend_id": cal.id }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let app = TestApp::new().await;
    let eli = app.user("Eli").await;

    let (status, _) = app
        .post("/api/friends/requests", &eli.token, json!({ "friend_id": eli.id }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("/api/friends/requests", &eli.token, json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("/api/friends/requests", &eli.token, json!({ "friend_id": 9999 }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post_empty("/api/friends/requests/9999/accept", &eli.token)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rejected_request_can_be_sent_again() {
    let app = TestApp::new().await;
    let fin = app.user("Fin").await;
    let gia = app.user("Gia").await;

    app.post("/api/friends/requests", &fin.token, json!({ "friend_id": gia.id }))
        .await;

    // only the addressee can answer
    let (status, _) = app
        .post_empty(&format!("/api/friends/requests/{}/reject", gia.id), &fin.token)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post_empty(&format!("/api/friends/requests/{}/reject", fin.id), &gia.token)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .post("/api/friends/requests", &fin.token, json!({ "friend_id": gia.id }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn suggestions_skip_linked_users_and_rank_shared_hobbies() {
    let app = TestApp::new().await;
    let me = app.user("Me").await;
    let friend = app.user("Friend").await;
    let pending = app.user("Pending").await;
    let stranger = app.user("Stranger").await;
    let twin = app.user("Twin").await;

    app.befriend(&me, &friend).await;
    app.post("/api/friends/requests", &pending.token, json!({ "friend_id": me.id }))
        .await;

    app.put("/api/users/me/interests", &me.token, json!({ "hobbies": ["chess", "hiking"] }))
        .await;
    app.put("/api/users/me/interests", &twin.token, json!({ "hobbies": ["Hiking"] }))
        .await;

    let (status, body) = app.get("/api/friends/suggestions", &me.token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec![twin.id, stranger.id]);
    assert_eq!(body[0]["shared_hobbies"], json!(["Hiking"]));
    assert_eq!(body[1]["shared_hobbies"], json!([]));
}

#[tokio::test]
async fn suggestions_rank_before_paging() {
    let app = TestApp::new().await;
    let me = app.user("Me").await;
    let early = app.user("Early").await;
    app.user("Middle").await;
    let late = app.user("Late").await;

    app.put("/api/users/me/interests", &me.token, json!({ "hobbies": ["Go", "Tennis"] }))
        .await;
    app.put("/api/users/me/interests", &early.token, json!({ "hobbies": ["tennis"] }))
        .await;
    app.put("/api/users/me/interests", &late.token, json!({ "hobbies": ["go", "TENNIS"] }))
        .await;

    let (_, body) = app.get("/api/friends/suggestions?limit=1", &me.token).await;
    assert_eq!(ids(&body), vec![late.id]);
    assert_eq!(body[0]["shared_hobbies"], json!(["go", "TENNIS"]));

    let (_, body) = app
        .get("/api/friends/suggestions?limit=1&offset=1", &me.token)
        .await;
    assert_eq!(ids(&body), vec![early.id]);
}

#[tokio::test]
async fn crossing_requests_create_a_single_friendship() {
    let app = TestApp::new().await;
    let ana = app.user("Ana").await;
    let ben = app.user("Ben").await;

    let (first, second) = tokio::join!(
        app.post("/api/friends/requests", &ana.token, json!({ "friend_id": ben.id })),
        app.post("/api/friends/requests", &ben.token, json!({ "friend_id": ana.id })),
    );
    let mut statuses = vec![first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::CONFLICT]);

    let (_, ana_requests) = app.get("/api/friends/requests", &ana.token).await;
    let (_, ben_requests) = app.get("/api/friends/requests", &ben.token).await;
    let pending = ana_requests.as_array().unwrap().len() + ben_requests.as_array().unwrap().len();
    assert_eq!(pending, 1);
}
