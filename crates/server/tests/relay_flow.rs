//! End-to-end tests: REST over reqwest, relay over tokio-tungstenite.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use linkup_server::{app, AppState, ServerConfig, MIN_HASH_COST};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    state: AppState,
    http: String,
    ws: String,
    client: reqwest::Client,
    _dir: TempDir,
}

struct TestUser {
    id: String,
    token: String,
}

async fn start_server() -> TestServer {
    start_server_with(|_| {}).await
}

async fn start_server_with(configure: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ServerConfig::with_data_dir(dir.path());
    config.hash_cost = MIN_HASH_COST;
    configure(&mut config);

    let state = AppState::new(config).await.unwrap();
    let app = app(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        state,
        http: format!("http://{}", addr),
        ws: format!("ws://{}/ws", addr),
        client: reqwest::Client::new(),
        _dir: dir,
    }
}

impl TestServer {
    async fn register(&self, username: &str) -> TestUser {
        let resp = self
            .client
            .post(format!("{}/api/auth/register", self.http))
            .json(&json!({
                "username": username,
                "email": format!("{}@example.com", username),
                "password": "secret123",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);

        let body: Value = resp.json().await.unwrap();
        TestUser {
            id: body["user"]["id"].as_str().unwrap().to_string(),
            token: body["token"].as_str().unwrap().to_string(),
        }
    }

    async fn connect(&self, user: &TestUser) -> Socket {
        let (socket, _) = connect_async(format!("{}?token={}", self.ws, user.token))
            .await
            .unwrap();
        socket
    }

    async fn get(&self, path: &str, user: &TestUser) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.http, path))
            .bearer_auth(&user.token)
            .send()
            .await
            .unwrap()
    }
}

/// Next JSON frame, skipping control frames
async fn next_event(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Skip frames until one named `event` arrives
async fn expect_event(socket: &mut Socket, event: &str) -> Value {
    loop {
        let frame = next_event(socket).await;
        if frame["event"] == event {
            return frame["data"].clone();
        }
    }
}

/// Wait for an online-users frame listing exactly `ids`
async fn expect_online(socket: &mut Socket, ids: &[&str]) {
    let mut expected: Vec<&str> = ids.to_vec();
    expected.sort();
    loop {
        let data = expect_event(socket, "online-users").await;
        let online: Vec<&str> = data
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        if online == expected {
            return;
        }
    }
}

async fn send(socket: &mut Socket, event: &str, data: Value) {
    let frame = json!({ "event": event, "data": data }).to_string();
    socket.send(Message::Text(frame.into())).await.unwrap();
}

#[tokio::test]
async fn test_presence_and_live_delivery() {
    let server = start_server().await;
    let alice = server.register("alice").await;
    let bob = server.register("bob").await;

    let mut alice_ws = server.connect(&alice).await;
    expect_online(&mut alice_ws, &[alice.id.as_str()]).await;

    let mut bob_ws = server.connect(&bob).await;
    expect_online(&mut alice_ws, &[alice.id.as_str(), bob.id.as_str()]).await;
    expect_online(&mut bob_ws, &[alice.id.as_str(), bob.id.as_str()]).await;

    send(
        &mut alice_ws,
        "send-message",
        json!({ "recipient_id": bob.id, "content": "  hi bob  " }),
    )
    .await;

    let received = expect_event(&mut bob_ws, "receive-message").await;
    let sent = expect_event(&mut alice_ws, "message-sent").await;
    assert_eq!(received["content"], "hi bob");
    assert_eq!(received["sender_id"], alice.id.as_str());
    assert_eq!(received["sender"]["username"], "alice");
    assert_eq!(received["recipient"]["username"], "bob");
    assert_eq!(received["id"], sent["id"]);

    send(&mut bob_ws, "typing", json!({ "recipient_id": alice.id })).await;
    let typing = expect_event(&mut alice_ws, "user-typing").await;
    assert_eq!(typing, json!({ "user_id": bob.id, "username": "bob" }));

    send(&mut bob_ws, "stop-typing", json!({ "recipient_id": alice.id })).await;
    let stopped = expect_event(&mut alice_ws, "user-stop-typing").await;
    assert_eq!(stopped, json!({ "user_id": bob.id }));

    bob_ws.close(None).await.unwrap();
    expect_online(&mut alice_ws, &[alice.id.as_str()]).await;
}

#[tokio::test]
async fn test_offline_recipient_reads_history_later() {
    let server = start_server().await;
    let alice = server.register("alice").await;
    let bob = server.register("bob").await;

    let mut alice_ws = server.connect(&alice).await;
    send(
        &mut alice_ws,
        "send-message",
        json!({ "recipient_id": bob.id, "content": "see you later" }),
    )
    .await;
    let sent = expect_event(&mut alice_ws, "message-sent").await;

    let resp = server
        .get(&format!("/api/messages/{}", alice.id), &bob)
        .await;
    assert_eq!(resp.status(), 200);
    let history: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["id"], sent["id"]);
    assert_eq!(history[0]["is_read"], false);
}

#[tokio::test]
async fn test_invalid_message_reports_error() {
    let server = start_server().await;
    let alice = server.register("alice").await;
    let bob = server.register("bob").await;

    let mut alice_ws = server.connect(&alice).await;
    send(
        &mut alice_ws,
        "send-message",
        json!({ "recipient_id": bob.id, "content": "x".repeat(1001) }),
    )
    .await;
    let error = expect_event(&mut alice_ws, "message-error").await;
    assert!(error["message"].as_str().unwrap().contains("1000"));
}

#[tokio::test]
async fn test_bad_token_is_rejected_with_close_code() {
    let server = start_server().await;

    let (mut socket, _) = connect_async(format!("{}?token=nope", server.ws))
        .await
        .unwrap();

    let error = expect_event(&mut socket, "connect-error").await;
    assert_eq!(error["reason"], "invalid or expired credential");
    expect_close(&mut socket, 4001).await;
    assert!(server.state.relay.registry().is_empty());
}

/// Next frame must be a close carrying `code`
async fn expect_close(socket: &mut Socket, code: u16) {
    let close = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .unwrap();
    match close {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(u16::from(frame.code), code),
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_silent_socket_times_out() {
    let server = start_server_with(|config| {
        config.handshake_timeout = Duration::from_millis(300);
    })
    .await;

    let (mut socket, _) = connect_async(server.ws.as_str()).await.unwrap();

    let error = expect_event(&mut socket, "connect-error").await;
    assert_eq!(error["reason"], "authentication timed out");
    expect_close(&mut socket, 4001).await;
    assert!(server.state.relay.registry().is_empty());
}

#[tokio::test]
async fn test_authenticate_frame_handshake() {
    let server = start_server().await;
    let alice = server.register("alice").await;

    let (mut socket, _) = connect_async(server.ws.as_str()).await.unwrap();
    send(&mut socket, "authenticate", json!({ "token": alice.token })).await;
    expect_online(&mut socket, &[alice.id.as_str()]).await;
}

#[tokio::test]
async fn test_disallowed_origin_is_refused() {
    let server = start_server().await;
    let alice = server.register("alice").await;

    let mut request = format!("{}?token={}", server.ws, alice.token)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("Origin", "https://evil.example.com".parse().unwrap());
    assert!(connect_async(request).await.is_err());

    let mut request = format!("{}?token={}", server.ws, alice.token)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("Origin", "https://preview.vercel.app".parse().unwrap());
    assert!(connect_async(request).await.is_ok());
}

#[tokio::test]
async fn test_replaced_session_is_closed() {
    let server = start_server().await;
    let alice = server.register("alice").await;

    let mut first = server.connect(&alice).await;
    expect_online(&mut first, &[alice.id.as_str()]).await;
    let mut second = server.connect(&alice).await;
    expect_online(&mut second, &[alice.id.as_str()]).await;

    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), first.next())
            .await
            .unwrap();
        match frame {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), 4000);
                break;
            }
            Some(Ok(_)) => continue,
            other => panic!("expected close frame, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_rest_surface() {
    let server = start_server().await;
    let alice = server.register("alice").await;
    let bob = server.register("bob").await;
    let carol = server.register("carol").await;

    let health: Value = server
        .client
        .get(format!("{}/api/health", server.http))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["success"], true);

    let missing = server
        .client
        .get(format!("{}/api/nope", server.http))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["error"]["message"], "Route not found");

    let unauthorized = server
        .client
        .get(format!("{}/api/users", server.http))
        .send()
        .await
        .unwrap();
    assert_eq!(unauthorized.status(), 401);

    // Online users sort ahead of offline ones
    let mut carol_ws = server.connect(&carol).await;
    expect_online(&mut carol_ws, &[carol.id.as_str()]).await;

    let users: Vec<Value> = server.get("/api/users", &alice).await.json().await.unwrap();
    let names: Vec<&str> = users.iter().map(|u| u["username"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["carol", "bob"]);
    assert_eq!(users[0]["is_online"], true);
    assert!(users[0].get("password_hash").is_none());

    // Friend request round trip
    let request: Value = server
        .client
        .post(format!("{}/api/friends/request/{}", server.http, bob.id))
        .bearer_auth(&alice.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let accepted = server
        .client
        .put(format!(
            "{}/api/friends/accept/{}",
            server.http,
            request["id"].as_str().unwrap()
        ))
        .bearer_auth(&bob.token)
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), 200);

    let friends: Vec<Value> = server.get("/api/friends", &alice).await.json().await.unwrap();
    assert_eq!(friends.len(), 1);
    assert_eq!(friends[0]["id"], bob.id.as_str());
}
