use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use shared::domain::MessageId;
use tokio::{net::TcpListener, sync::Mutex};

use super::*;
use crate::error::ChatError;

#[derive(Clone, Default)]
struct BackendState {
    sent: Arc<Mutex<Vec<(String, SendMessageRequest)>>>,
}

fn backend_message(id: &str, sender: &str, receiver: &str, text: Option<String>) -> Message {
    Message {
        id: MessageId::from(id),
        sender_id: UserId::from(sender),
        receiver_id: UserId::from(receiver),
        text,
        image: None,
        created_at: Utc::now(),
    }
}

async fn list_users() -> Json<Vec<Peer>> {
    Json(vec![Peer {
        id: UserId::from("u1"),
        full_name: "Ada".into(),
        profile_pic: Some("https://cdn.test/ada.png".into()),
    }])
}

async fn history(Path(conversation_id): Path<String>) -> Response {
    match conversation_id.as_str() {
        "blocked" => (
            StatusCode::FORBIDDEN,
            Json(ApiErrorBody::new("You cannot read this conversation")),
        )
            .into_response(),
        "broken" => (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response(),
        other => Json(vec![
            backend_message("m1", other, "me", Some("first".into())),
            backend_message("m2", "me", other, Some("second".into())),
        ])
        .into_response(),
    }
}

async fn send(
    State(state): State<BackendState>,
    Path(conversation_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Json<Message> {
    let created = backend_message("sent-1", "me", &conversation_id, body.text.clone());
    state.sent.lock().await.push((conversation_id, body));
    Json(created)
}

async fn spawn_backend() -> Result<(String, BackendState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = BackendState::default();
    let app = Router::new()
        .route("/api/messages/users", get(list_users))
        .route("/api/messages/:conversation_id", get(history))
        .route("/api/messages/send/:conversation_id", post(send))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}/api"), state))
}

fn api_for(server_url: String) -> HttpChatApi {
    HttpChatApi::new(&ClientSettings {
        server_url,
        ..ClientSettings::default()
    })
    .expect("http api")
}

#[tokio::test]
async fn lists_peers_and_fetches_history_in_server_order() {
    let (server_url, _state) = spawn_backend().await.expect("spawn backend");
    let api = api_for(server_url);

    let peers = api.list_peers().await.expect("peers");
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].full_name, "Ada");

    let history = api
        .fetch_messages(&UserId::from("u1"))
        .await
        .expect("history");
    let ids: Vec<&str> = history.iter().map(|message| message.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
    assert_eq!(history[0].sender_id, UserId::from("u1"));
}

#[tokio::test]
async fn trailing_slash_in_server_url_is_tolerated() {
    let (server_url, _state) = spawn_backend().await.expect("spawn backend");
    let api = api_for(format!("{server_url}/"));

    assert_eq!(api.list_peers().await.expect("peers").len(), 1);
}

#[tokio::test]
async fn send_posts_body_to_conversation_endpoint() {
    let (server_url, state) = spawn_backend().await.expect("spawn backend");
    let api = api_for(server_url);
    let request = SendMessageRequest {
        text: Some("hello".into()),
        image: None,
    };

    let created = api
        .send_message(&UserId::from("u7"), &request)
        .await
        .expect("send");

    assert_eq!(created.receiver_id, UserId::from("u7"));
    assert_eq!(created.text.as_deref(), Some("hello"));
    let sent = state.sent.lock().await;
    assert_eq!(sent.as_slice(), &[("u7".to_string(), request)]);
}

#[tokio::test]
async fn backend_error_message_is_surfaced() {
    let (server_url, _state) = spawn_backend().await.expect("spawn backend");
    let api = api_for(server_url);

    let err = api
        .fetch_messages(&UserId::from("blocked"))
        .await
        .expect_err("forbidden");
    let status = err
        .downcast_ref::<ApiStatusError>()
        .expect("status error");
    assert_eq!(status.status, StatusCode::FORBIDDEN);

    let err = ChatError::network(err, "Failed to load messages");
    assert_eq!(err.to_string(), "You cannot read this conversation");
}

#[tokio::test]
async fn error_without_json_body_falls_back_to_default_text() {
    let (server_url, _state) = spawn_backend().await.expect("spawn backend");
    let api = api_for(server_url);

    let err = api
        .fetch_messages(&UserId::from("broken"))
        .await
        .expect_err("server error");

    let err = ChatError::network(err, "Failed to load messages");
    assert_eq!(err.to_string(), "Failed to load messages");
}

#[tokio::test]
async fn unreachable_backend_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let api = api_for(format!("http://{addr}"));

    let err = api.list_peers().await.expect_err("connection refused");

    let err = ChatError::network(err, "Failed to fetch users");
    assert_eq!(err.to_string(), "Failed to fetch users");
}

#[test]
fn rejects_unusable_server_urls() {
    for server_url in ["not a url", "mailto:someone@example.test"] {
        let result = HttpChatApi::new(&ClientSettings {
            server_url: server_url.into(),
            ..ClientSettings::default()
        });
        assert!(result.is_err(), "{server_url} should be rejected");
    }
}
