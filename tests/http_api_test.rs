mod common;

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, Request, StatusCode},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use std::sync::Arc;

use roomrelay::{
    app,
    auth::{issue_session, REFRESH_TOKEN_HEADER},
    config::Config,
    relay::LocalBroker,
    rooms::msg,
    AppState,
};
use serde_json::Value;
use tower::ServiceExt;

async fn call(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn history(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn delete(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn with_refresh(path: &str, refresh_token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(path);
    if let Some(refresh_token) = refresh_token {
        builder = builder.header(REFRESH_TOKEN_HEADER, refresh_token);
    }
    builder.body(Body::empty()).unwrap()
}

async fn seeded(config: Config, room_id: i64, count: usize) -> AppState {
    let state = common::state_with(config).await;
    for n in 0..count {
        msg::append(&state.db_pool, room_id, None, &format!("m{n}")).await.unwrap();
    }
    state
}

#[tokio::test]
async fn health_is_ok() {
    let router = app(common::state().await);
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = call(&router, request).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn history_requires_a_bearer_token() {
    let router = app(common::state().await);

    let request = Request::builder().uri("/rooms/7/messages").body(Body::empty()).unwrap();
    assert_eq!(call(&router, request).await.status(), StatusCode::UNAUTHORIZED);

    let response = call(&router, history("/rooms/7/messages", "garbage")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn history_pages_newest_first() {
    let state = seeded(Config::local(common::SECRET), 7, 5).await;
    let token = common::access_token(&state, 1);
    let router = app(state);

    let response = call(&router, history("/rooms/7/messages?size=2", &token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = json_body(response).await;
    let ids: Vec<i64> = page["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, [5, 4]);
    assert_eq!(page["hasMore"], true);
    assert_eq!(page["messages"][0]["body"], "m4");
    assert_eq!(page["messages"][0]["senderId"], Value::Null);

    let response = call(&router, history("/rooms/7/messages?cursor=2&size=2", &token)).await;
    let page = json_body(response).await;
    assert_eq!(page["messages"].as_array().unwrap().len(), 1);
    assert_eq!(page["messages"][0]["id"], 1);
    assert_eq!(page["hasMore"], false);

    let page = json_body(call(&router, history("/rooms/8/messages", &token)).await).await;
    assert_eq!(page["messages"].as_array().unwrap().len(), 0);
    assert_eq!(page["hasMore"], false);
}

#[tokio::test]
async fn history_page_size_is_validated_and_clamped() {
    let mut config = Config::local(common::SECRET);
    config.default_page_size = 2;
    config.max_page_size = 3;
    let state = seeded(config, 1, 10).await;
    let token = common::access_token(&state, 1);
    let router = app(state);

    let response = call(&router, history("/rooms/1/messages?size=0", &token)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let page = json_body(call(&router, history("/rooms/1/messages", &token)).await).await;
    assert_eq!(page["messages"].as_array().unwrap().len(), 2);

    let page = json_body(call(&router, history("/rooms/1/messages?size=50", &token)).await).await;
    assert_eq!(page["messages"].as_array().unwrap().len(), 3);
    assert_eq!(page["hasMore"], true);
}

#[tokio::test]
async fn logout_revokes_refresh_credential() {
    let state = common::state().await;
    let pair = issue_session(&state.tokens, state.credentials.as_ref(), 42).await.unwrap();
    let tokens = state.tokens.clone();
    let router = app(state);

    let response = call(&router, with_refresh("/auth/refresh", Some(&pair.refresh_token))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let access = body["access_token"].as_str().unwrap();
    assert_eq!(tokens.verify(access).unwrap().user_id, 42);

    let response = call(&router, with_refresh("/auth/logout", Some(&pair.refresh_token))).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = call(&router, with_refresh("/auth/refresh", Some(&pair.refresh_token))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // a second logout with the same credential is still fine
    let response = call(&router, with_refresh("/auth/logout", Some(&pair.refresh_token))).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn logout_without_credential_is_a_no_op() {
    let state = common::state().await;
    let pair = issue_session(&state.tokens, state.credentials.as_ref(), 7).await.unwrap();
    let router = app(state);

    let response = call(&router, with_refresh("/auth/logout", None)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = call(&router, with_refresh("/auth/refresh", Some(&pair.refresh_token))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn refresh_without_credential_is_a_bad_request() {
    let router = app(common::state().await);
    let response = call(&router, with_refresh("/auth/refresh", None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn history_store_outage_is_a_503() {
    let state = seeded(Config::local(common::SECRET), 7, 3).await;
    let token = common::access_token(&state, 1);
    let db_pool = state.db_pool.clone();
    let router = app(state);

    db_pool.close().await;
    let response = call(&router, history("/rooms/7/messages", &token)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn credential_store_outage_is_a_503() {
    let state = common::state_with_stores(
        Config::local(common::SECRET),
        Arc::new(common::DownCredentials),
        Arc::new(LocalBroker::default()),
    )
    .await;
    let router = app(state);

    let response = call(&router, with_refresh("/auth/logout", Some("abc"))).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = call(&router, with_refresh("/auth/refresh", Some("abc"))).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    // nothing to revoke never reaches the store
    let response = call(&router, with_refresh("/auth/logout", None)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn only_the_sender_may_delete_a_message() {
    let state = common::state().await;
    common::seed_user(&state.db_pool, 1).await;
    common::seed_user(&state.db_pool, 2).await;
    let stored = msg::append(&state.db_pool, 4, Some(1), "regret").await.unwrap();
    let author = common::access_token(&state, 1);
    let other = common::access_token(&state, 2);
    let router = app(state);

    let uri = format!("/rooms/4/messages/{}", stored.id);
    assert_eq!(call(&router, delete(&uri, &other)).await.status(), StatusCode::FORBIDDEN);

    let wrong_room = format!("/rooms/5/messages/{}", stored.id);
    assert_eq!(call(&router, delete(&wrong_room, &author)).await.status(), StatusCode::NOT_FOUND);
    let missing = "/rooms/4/messages/999";
    assert_eq!(call(&router, delete(missing, &author)).await.status(), StatusCode::NOT_FOUND);

    assert_eq!(call(&router, delete(&uri, &author)).await.status(), StatusCode::NO_CONTENT);

    let page = json_body(call(&router, history("/rooms/4/messages", &author)).await).await;
    assert_eq!(page["messages"][0]["id"], stored.id);
    assert_eq!(page["messages"][0]["isDeleted"], true);
    assert_eq!(page["messages"][0]["body"], "regret");
}
