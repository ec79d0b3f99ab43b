mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use teamchat::app;
use tower::ServiceExt;

async fn call(router: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header("authorization", format!("Bearer {token}"));
    }
    let req = match body {
        Some(body) => req
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let res = router.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

#[tokio::test]
async fn anonymous_requests_are_rejected() {
    let state = common::state().await;
    let router = app(state);

    for uri in ["/api/profile", "/api/teams", "/api/channels"] {
        let (status, _) = call(&router, "GET", uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
    }
    let (status, _) = call(&router, "GET", "/api/profile", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn profile_reports_presence_fields() {
    let state = common::state().await;
    let (alice, token) = common::user(&state, "alice").await;
    let router = app(state);

    let (status, body) = call(&router, "GET", "/api/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], alice);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["online"], false);
    assert!(body["last_seen"].is_string());
}

#[tokio::test]
async fn team_channels_include_team_members() {
    let state = common::state().await;
    let (alice, alice_token) = common::user(&state, "alice").await;
    let (bob, bob_token) = common::user(&state, "bob").await;
    let (carol, _) = common::user(&state, "carol").await;
    let router = app(state);

    let (status, _) = call(&router, "POST", "/api/teams", Some(&alice_token), Some(json!({ "name": "core", "members": [alice] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, team) = call(&router, "POST", "/api/teams", Some(&alice_token), Some(json!({ "name": "core", "members": [bob] }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(team["members"], json!([alice, bob]));

    let (_, teams) = call(&router, "GET", "/api/teams", Some(&bob_token), None).await;
    assert_eq!(teams.as_array().unwrap().len(), 1);

    let (status, channel) = call(
        &router,
        "POST",
        "/api/channels",
        Some(&alice_token),
        Some(json!({ "name": "general", "team": team["id"], "channel_type": "public", "members": [carol] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(channel["members"], json!([alice, bob, carol]));
    assert_eq!(channel["created_by"], alice);

    let (status, _) = call(
        &router,
        "POST",
        "/api/channels",
        Some(&alice_token),
        Some(json!({ "name": "general", "team": team["id"], "channel_type": "public" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, channels) = call(&router, "GET", "/api/channels", Some(&bob_token), None).await;
    assert_eq!(channels[0]["name"], "general");
}

#[tokio::test]
async fn direct_channels_need_exactly_one_peer() {
    let state = common::state().await;
    let (alice, alice_token) = common::user(&state, "alice").await;
    let (bob, _) = common::user(&state, "bob").await;
    let (carol, _) = common::user(&state, "carol").await;
    let router = app(state);

    let (status, body) = call(
        &router,
        "POST",
        "/api/channels",
        Some(&alice_token),
        Some(json!({ "name": "me", "channel_type": "direct", "members": [alice] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Direct messages require exactly 1 other member");

    let (status, body) = call(
        &router,
        "POST",
        "/api/channels",
        Some(&alice_token),
        Some(json!({ "name": "dm", "channel_type": "direct", "members": [bob, carol] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Direct messages require exactly 1 other member");

    let (status, body) = call(
        &router,
        "POST",
        "/api/channels",
        Some(&alice_token),
        Some(json!({ "name": "dm", "channel_type": "direct", "members": [bob] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["channel_type"], "direct");
}

#[tokio::test]
async fn history_and_search_are_members_only() {
    let state = common::state().await;
    let (alice, alice_token) = common::user(&state, "alice").await;
    let (bob, _) = common::user(&state, "bob").await;
    let (_, mallory_token) = common::user(&state, "mallory").await;
    let room = common::channel(&state.db_pool, "general", &[alice, bob]).await;

    // 2024-01-01, 2024-01-02, 2024-01-03 at noon UTC
    let day = 86_400;
    let jan1 = 1_704_067_200 + day / 2;
    common::message(&state.db_pool, room, alice, "Deploy went fine", jan1).await;
    common::message(&state.db_pool, room, bob, "deploy again tomorrow", jan1 + day).await;
    common::message(&state.db_pool, room, bob, "lunch?", jan1 + 2 * day).await;
    let router = app(state);

    let (status, body) = call(&router, "GET", &format!("/api/channels/{room}/messages"), Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::OK);
    let contents: Vec<_> = body.as_array().unwrap().iter().map(|m| m["content"].as_str().unwrap()).collect();
    assert_eq!(contents, vec!["lunch?", "deploy again tomorrow", "Deploy went fine"]);
    assert_eq!(body[0]["username"], "bob");

    let (status, _) = call(&router, "GET", &format!("/api/channels/{room}/messages"), Some(&mallory_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&router, "GET", &format!("/api/channels/{room}/search?q=x"), Some(&mallory_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&router, "GET", &format!("/api/channels/{room}/search?q=deploy"), Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["page"], 1);
    assert_eq!(body["page_size"], 20);
    assert_eq!(body["results"][0]["highlights"][0], "<mark>deploy</mark> again tomorrow");
    assert_eq!(body["results"][1]["highlights"][0], "<mark>Deploy</mark> went fine");

    let (_, body) = call(
        &router,
        "GET",
        &format!("/api/channels/{room}/search?from=2024-01-02&to=2024-01-02"),
        Some(&alice_token),
        None,
    )
    .await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["results"][0]["content"], "deploy again tomorrow");
    assert_eq!(body["results"][0]["highlights"], json!([]));

    let (_, body) = call(&router, "GET", &format!("/api/channels/{room}/search?user={bob}&limit=1&page=2"), Some(&alice_token), None).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["page_size"], 1);
    assert_eq!(body["results"][0]["content"], "deploy again tomorrow");

    let (status, body) = call(&router, "GET", &format!("/api/channels/{room}/search?from=yesterday"), Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid date format for 'from'. Use YYYY-MM-DD");

    let (status, _) = call(&router, "GET", &format!("/api/channels/{room}/search?user=bob"), Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn huge_search_page_is_rejected() {
    let state = common::state().await;
    let (alice, alice_token) = common::user(&state, "alice").await;
    let room = common::channel(&state.db_pool, "general", &[alice]).await;
    let router = app(state);

    let (status, body) = call(
        &router,
        "GET",
        &format!("/api/channels/{room}/search?page={}", i64::MAX),
        Some(&alice_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid page");

    let (status, body) = call(&router, "GET", &format!("/api/channels/{room}/search?page=1000"), Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], json!([]));
}
