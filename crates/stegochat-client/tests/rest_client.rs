mod common;

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use stegochat_client::api::{ApiClient, AuthClient, ChatApi, ImageUpload};
use stegochat_client::config::ClientConfig;
use stegochat_client::error::ClientError;
use stegochat_types::api::RegisterRequest;

const TOKEN: &str = "secret-token";

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", TOKEN))
}

fn message_json(id: i64, sender: i64, receiver: i64, kind: &str) -> Value {
    json!({
        "id": id,
        "sender_id": sender,
        "receiver_id": receiver,
        "content": if kind == "image" { "/uploads/cat.png" } else { "hello" },
        "message_type": kind,
        "created_at": "2024-05-01T08:00:00.123456",
        "sender_username": "alice"
    })
}

async fn login(Json(body): Json<Value>) -> impl IntoResponse {
    if body["password"] != "hunter22" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Incorrect username or password"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "access_token": TOKEN,
            "token_type": "bearer",
            "user": {"id": 1, "username": body["username"], "email": "a@example.com"}
        })),
    )
}

async fn register(Json(body): Json<Value>) -> impl IntoResponse {
    assert_eq!(body["email"], "bob@example.com");
    Json(json!({
        "token": TOKEN,
        "user": {"id": 2, "username": body["username"], "email": body["email"]}
    }))
}

async fn history(headers: HeaderMap, Path(peer): Path<i64>) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Not authenticated"})));
    }
    if peer == 404 {
        return (StatusCode::NOT_FOUND, Json(json!({"detail": "User not found"})));
    }
    (
        StatusCode::OK,
        Json(json!([message_json(1, 1, peer, "text"), message_json(2, peer, 1, "text")])),
    )
}

async fn me(headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Could not validate credentials"})));
    }
    (
        StatusCode::OK,
        Json(json!({"id": 1, "username": "alice", "email": "a@example.com"})),
    )
}

async fn search(headers: HeaderMap, Query(q): Query<HashMap<String, String>>) -> impl IntoResponse {
    assert!(authorized(&headers));
    let query = q.get("q").cloned().unwrap_or_default();
    Json(json!([{"id": 7, "username": format!("{}-match", query)}]))
}

async fn upload(
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
    body: Bytes,
) -> impl IntoResponse {
    assert!(authorized(&headers));
    let receiver: i64 = q["receiver_id"].parse().unwrap();
    let body = String::from_utf8_lossy(&body);
    assert!(body.contains("name=\"receiver_id\""));
    assert!(body.contains("filename=\"cat.png\""));
    let mut msg = message_json(9, 1, receiver, "image");
    msg["image_data"] = json!({"id": 90, "security_status": "pending"});
    Json(msg)
}

async fn start_server() -> ClientConfig {
    let router = Router::new()
        .route("/api/login", post(login))
        .route("/api/register", post(register))
        .route("/api/me", get(me))
        .route("/docs", get(|| async { "swagger" }))
        .route("/api/messages/{peer}", get(history))
        .route("/api/users/search", get(search))
        .route("/api/messages/image", post(upload))
        .route("/api/admin/security-logs", get(|| async { "not json" }));
    let addr = common::serve(router).await;
    ClientConfig::new(&format!("http://{}", addr)).unwrap()
}

async fn logged_in(config: &ClientConfig) -> ApiClient {
    let session = AuthClient::new(config)
        .unwrap()
        .login("alice", "hunter22")
        .await
        .unwrap();
    ApiClient::new(config, session).unwrap()
}

#[tokio::test]
async fn login_produces_session() {
    let config = start_server().await;
    let client = logged_in(&config).await;
    assert_eq!(client.session().token(), TOKEN);
    assert_eq!(client.session().user().username, "alice");
}

#[tokio::test]
async fn register_accepts_plain_token_field() {
    let config = start_server().await;
    let session = AuthClient::new(&config)
        .unwrap()
        .register(&RegisterRequest {
            username: "bob".into(),
            email: "bob@example.com".into(),
            password: "hunter22".into(),
        })
        .await
        .unwrap();
    assert_eq!(session.user_id(), 2);
    assert_eq!(session.bearer(), format!("Bearer {}", TOKEN));
}

#[tokio::test]
async fn bad_credentials_are_an_auth_error() {
    let config = start_server().await;
    let err = AuthClient::new(&config)
        .unwrap()
        .login("alice", "wrong")
        .await
        .unwrap_err();
    assert!(err.is_auth());
    assert_eq!(err.to_string(), "Not authorized: Incorrect username or password");
}

#[tokio::test]
async fn history_is_fetched_with_bearer_token() {
    let config = start_server().await;
    let client = logged_in(&config).await;

    let messages = client.history(5).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].sender_id, 5);

    match client.history(404).await {
        Err(ClientError::Server { status, detail }) => {
            assert_eq!(status.as_u16(), 404);
            assert_eq!(detail, "User not found");
        }
        other => panic!("expected server error, got {:?}", other),
    }
}

#[tokio::test]
async fn missing_token_is_rejected() {
    let config = start_server().await;
    let stranger = ApiClient::new(
        &config,
        stegochat_client::session::Session::new("bogus", common::user(1)),
    )
    .unwrap();
    assert!(stranger.history(5).await.unwrap_err().is_auth());
}

#[tokio::test]
async fn short_search_skips_the_request() {
    let config = start_server().await;
    let client = logged_in(&config).await;
    assert!(client.search_users("ab").await.unwrap().is_empty());

    let found = client.search_users("bob").await.unwrap();
    assert_eq!(found[0].username, "bob-match");
    assert!(found[0].email.is_none());
}

#[tokio::test]
async fn image_upload_is_multipart() {
    let config = start_server().await;
    let client = logged_in(&config).await;
    let sent = client
        .send_image(4, ImageUpload::new("cat.png", vec![0x89u8, b'P', b'N', b'G']))
        .await
        .unwrap();
    assert_eq!(sent.receiver_id, 4);
    assert!(sent.is_image());
    assert!(sent.image_data.is_some());
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let config = start_server().await;
    let client = logged_in(&config).await;
    assert!(matches!(
        client.security_logs().await,
        Err(ClientError::Decode(_))
    ));
}

#[tokio::test]
async fn logout_hands_back_the_user() {
    let config = start_server().await;
    let client = logged_in(&config).await;
    let user = client.logout();
    assert_eq!(user.id, 1);
    assert_eq!(user.username, "alice");
}

#[tokio::test]
async fn stored_token_resumes_the_session() {
    let config = start_server().await;
    let auth = AuthClient::new(&config).unwrap();

    let session = auth.resume(TOKEN).await.unwrap();
    assert_eq!(session.user_id(), 1);
    assert_eq!(session.token(), TOKEN);
    let client = ApiClient::new(&config, session).unwrap();
    assert_eq!(client.history(5).await.unwrap().len(), 2);

    assert!(auth.resume("expired").await.unwrap_err().is_auth());
}

#[tokio::test]
async fn any_response_means_the_server_is_awake() {
    let config = start_server().await;
    AuthClient::new(&config).unwrap().wake_up().await.unwrap();

    // No HEAD or GET route: 405 still proves the server is up.
    let addr = common::serve(Router::new().route("/docs", post(|| async { "" }))).await;
    let config = ClientConfig::new(&format!("http://{}", addr)).unwrap();
    AuthClient::new(&config).unwrap().wake_up().await.unwrap();
}

#[tokio::test]
async fn unreachable_server_does_not_wake() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = ClientConfig::new(&format!("http://{}", addr)).unwrap();
    config.wake_timeout = std::time::Duration::from_secs(2);
    assert!(matches!(
        AuthClient::new(&config).unwrap().wake_up().await,
        Err(ClientError::Network(_))
    ));
}
