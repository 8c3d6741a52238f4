//! Integration tests for the live channel: auth, presence, rooms, fan-out and receipts.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use parley_server::config::Config;
use parley_server::state::AppState;

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Helper: start the server on a random port and return (base_url, addr, state).
async fn start_test_server() -> (String, SocketAddr, AppState) {
    start_server_with(Config::default()).await
}

async fn start_server_with(mut config: Config) -> (String, SocketAddr, AppState) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = parley_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = parley_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    config.auth.bcrypt_cost = 4;
    let state = AppState::new(db, jwt_secret, &config);

    let app = parley_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    (format!("http://{}", addr), addr, state)
}

/// Register a user and return (user_id, access_token).
async fn register_user(base_url: &str, username: &str) -> (String, String) {
    let resp = reqwest::Client::new()
        .post(format!("{}/api/auth/register", base_url))
        .json(&json!({
            "username": username,
            "password": "correct horse battery",
            "display_name": username.to_uppercase(),
        }))
        .send()
        .await
        .expect("register request");
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    (
        body["user"]["id"].as_str().unwrap().to_string(),
        body["access_token"].as_str().unwrap().to_string(),
    )
}

async fn create_direct(base_url: &str, token: &str, other_id: &str) -> String {
    let resp = reqwest::Client::new()
        .post(format!("{}/api/conversations/direct", base_url))
        .bearer_auth(token)
        .json(&json!({ "user_id": other_id }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

async fn send_text(base_url: &str, token: &str, conversation_id: &str, text: &str) -> Value {
    let resp = reqwest::Client::new()
        .post(format!("{}/api/messages", base_url))
        .bearer_auth(token)
        .json(&json!({ "conversation_id": conversation_id, "text": text }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    resp.json().await.unwrap()
}

async fn connect(addr: SocketAddr, token: &str) -> WsStream {
    let url = format!("ws://{}/ws?token={}", addr, token);
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("WebSocket connect");
    ws
}

/// Next JSON frame, skipping pings. Panics after two seconds.
async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("receive error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame {:?}", other),
        }
    }
}

/// Next JSON frame of the given type, skipping others (e.g. presence updates).
async fn next_of_type(ws: &mut WsStream, kind: &str) -> Value {
    loop {
        let frame = next_json(ws).await;
        if frame["type"] == kind {
            return frame;
        }
    }
}

/// Collect the types of every frame that arrives within `window`.
async fn frame_types_within(ws: &mut WsStream, window: Duration) -> Vec<String> {
    let mut seen = Vec::new();
    while let Ok(Some(Ok(msg))) = tokio::time::timeout(window, ws.next()).await {
        if let Message::Text(text) = msg {
            let frame: Value = serde_json::from_str(text.as_str()).unwrap();
            seen.push(frame["type"].as_str().unwrap_or_default().to_string());
        }
    }
    seen
}

async fn send_frame(ws: &mut WsStream, frame: Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

/// Join a room and wait for the ack.
async fn join(ws: &mut WsStream, room_id: &str) {
    send_frame(ws, json!({ "type": "join_room", "room_id": room_id })).await;
    let ack = next_of_type(ws, "room_joined").await;
    assert_eq!(ack["room_id"], room_id);
}

async fn expect_close_code(mut ws: WsStream, expected: u16) {
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for close")
        .expect("stream ended")
        .expect("receive error");
    match msg {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), expected),
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn invalid_token_closes_with_4002() {
    let (_base, addr, _state) = start_test_server().await;
    let ws = connect(addr, "not-a-jwt").await;
    expect_close_code(ws, 4002).await;
}

#[tokio::test]
async fn expired_token_closes_with_4001() {
    let (_base, addr, state) = start_test_server().await;
    let token =
        parley_server::auth::jwt::issue_access_token(&state.jwt_secret, "u", "u", -120).unwrap();
    let ws = connect(addr, &token).await;
    expect_close_code(ws, 4001).await;
}

#[tokio::test]
async fn unknown_user_closes_with_4004() {
    let (_base, addr, state) = start_test_server().await;
    let token =
        parley_server::auth::jwt::issue_access_token(&state.jwt_secret, "ghost", "ghost", 60)
            .unwrap();
    let ws = connect(addr, &token).await;
    expect_close_code(ws, 4004).await;
}

#[tokio::test]
async fn presence_online_snapshot_and_offline() {
    let (base, addr, _state) = start_test_server().await;
    let (alice_id, alice_token) = register_user(&base, "alice").await;
    let (bob_id, bob_token) = register_user(&base, "bob").await;

    let mut alice = connect(addr, &alice_token).await;
    // Make sure alice is registered before bob connects.
    send_frame(&mut alice, json!({ "type": "message", "id": "warmup" })).await;
    next_of_type(&mut alice, "message_sent").await;

    let mut bob = connect(addr, &bob_token).await;

    let snapshot = next_of_type(&mut bob, "user_status").await;
    assert_eq!(snapshot["user_id"], alice_id.as_str());
    assert_eq!(snapshot["status"], "online");

    let online = next_of_type(&mut alice, "user_status").await;
    assert_eq!(online["user_id"], bob_id.as_str());
    assert_eq!(online["status"], "online");

    bob.close(None).await.unwrap();
    let offline = next_of_type(&mut alice, "user_status").await;
    assert_eq!(offline["user_id"], bob_id.as_str());
    assert_eq!(offline["status"], "offline");
}

#[tokio::test]
async fn viewer_gets_message_only_and_non_viewer_also_gets_notification() {
    let (base, addr, _state) = start_test_server().await;
    let (a_id, a_token) = register_user(&base, "anna").await;
    let (b_id, b_token) = register_user(&base, "ben").await;
    let conv = create_direct(&base, &a_token, &b_id).await;

    let mut a = connect(addr, &a_token).await;
    let mut b = connect(addr, &b_token).await;
    join(&mut a, &conv).await;
    join(&mut b, &conv).await;

    send_frame(
        &mut b,
        json!({ "type": "set_active_conversation", "conversation_id": conv }),
    )
    .await;
    next_of_type(&mut b, "active_conversation_set").await;

    // B (viewing) sends; A (not viewing) gets the message and a notification.
    let sent = send_text(&base, &b_token, &conv, "hi").await;

    let message = next_of_type(&mut a, "message").await;
    assert_eq!(message["id"], sent["id"]);
    assert_eq!(message["text"], "hi");
    assert_eq!(message["sender_id"], b_id.as_str());

    let notification = next_of_type(&mut a, "notification").await;
    assert_eq!(notification["title"], "BEN");
    assert_eq!(notification["body"], "hi");
    assert_eq!(notification["conversation_id"], conv.as_str());

    // A sends; B is viewing, so only the live message arrives.
    send_text(&base, &a_token, &conv, "hello back").await;
    let message = next_of_type(&mut b, "message").await;
    assert_eq!(message["sender_id"], a_id.as_str());
    let rest = frame_types_within(&mut b, Duration::from_millis(300)).await;
    assert!(!rest.contains(&"notification".to_string()));
}

#[tokio::test]
async fn muted_member_gets_message_but_no_notification() {
    let (base, addr, _state) = start_test_server().await;
    let (_a_id, a_token) = register_user(&base, "amy").await;
    let (b_id, b_token) = register_user(&base, "bo").await;
    let conv = create_direct(&base, &a_token, &b_id).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/conversations/{}/mute", base, conv))
        .bearer_auth(&a_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let mut a = connect(addr, &a_token).await;
    join(&mut a, &conv).await;

    send_text(&base, &b_token, &conv, "psst").await;

    let types = frame_types_within(&mut a, Duration::from_millis(500)).await;
    assert!(types.contains(&"message".to_string()));
    assert!(!types.contains(&"notification".to_string()));
}

#[tokio::test]
async fn receipts_reach_the_sender_and_delete_reaches_the_room() {
    let (base, addr, _state) = start_test_server().await;
    let (_s_id, s_token) = register_user(&base, "sam").await;
    let (r_id, r_token) = register_user(&base, "rita").await;
    let conv = create_direct(&base, &s_token, &r_id).await;

    let mut s = connect(addr, &s_token).await;
    let mut r = connect(addr, &r_token).await;
    join(&mut s, &conv).await;
    join(&mut r, &conv).await;

    let sent = send_text(&base, &s_token, &conv, "hello 👋").await;
    let message_id = sent["id"].as_str().unwrap().to_string();
    assert_eq!(sent["emojis"], "👋");
    next_of_type(&mut r, "message").await;

    send_frame(&mut r, json!({ "type": "delivery_receipt", "message_id": message_id })).await;
    let receipt = next_of_type(&mut s, "delivery_receipt").await;
    assert_eq!(receipt["message_id"], message_id.as_str());
    assert_eq!(receipt["user_id"], r_id.as_str());
    assert_eq!(receipt["conversation_id"], conv.as_str());

    send_frame(&mut r, json!({ "type": "read_receipt", "message_id": message_id })).await;
    next_of_type(&mut s, "read_receipt").await;

    // Receipts are idempotent: repeating one adds nothing and notifies no one.
    send_frame(&mut r, json!({ "type": "read_receipt", "message_id": message_id })).await;
    let types = frame_types_within(&mut s, Duration::from_millis(300)).await;
    assert!(!types.contains(&"read_receipt".to_string()));

    let resp = reqwest::Client::new()
        .delete(format!("{}/api/messages/{}?for_everyone=true", base, message_id))
        .bearer_auth(&s_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    for ws in [&mut s, &mut r] {
        let deleted = next_of_type(ws, "message_deleted").await;
        assert_eq!(deleted["message_id"], message_id.as_str());
        assert_eq!(deleted["deleted_for_everyone"], true);
    }
}

#[tokio::test]
async fn typing_reaches_others_and_bad_frames_do_not_close() {
    let (base, addr, _state) = start_test_server().await;
    let (a_id, a_token) = register_user(&base, "ada").await;
    let (b_id, b_token) = register_user(&base, "bea").await;
    let conv = create_direct(&base, &a_token, &b_id).await;

    let mut a = connect(addr, &a_token).await;
    let mut b = connect(addr, &b_token).await;
    join(&mut a, &conv).await;
    join(&mut b, &conv).await;

    a.send(Message::Text("{not json".into())).await.unwrap();
    let err = next_of_type(&mut a, "error").await;
    assert!(err["message"].as_str().unwrap().starts_with("Malformed frame"));

    send_frame(&mut a, json!({ "type": "brand_new_feature" })).await;
    send_frame(
        &mut a,
        json!({ "type": "typing", "conversation_id": conv, "is_typing": true }),
    )
    .await;

    let typing = next_of_type(&mut b, "typing").await;
    assert_eq!(typing["user_id"], a_id.as_str());
    assert_eq!(typing["is_typing"], true);

    // Still alive after the bad frames.
    send_frame(&mut a, json!({ "type": "message", "message_id": "m1" })).await;
    let ack = next_of_type(&mut a, "message_sent").await;
    assert_eq!(ack["message_id"], "m1");
    assert_eq!(ack["status"], "sent");
}

#[tokio::test]
async fn silent_client_is_dropped_and_cleaned_up_after_pong_timeout() {
    let mut config = Config::default();
    config.live.ping_interval_secs = 1;
    config.live.pong_timeout_secs = 1;
    let (base, addr, state) = start_server_with(config).await;
    let (_a_id, a_token) = register_user(&base, "ava").await;
    let (b_id, b_token) = register_user(&base, "bram").await;
    let conv = create_direct(&base, &a_token, &b_id).await;

    let mut a = connect(addr, &a_token).await;
    let mut b = connect(addr, &b_token).await;
    join(&mut a, &conv).await;
    join(&mut b, &conv).await;
    send_frame(
        &mut b,
        json!({ "type": "set_active_conversation", "conversation_id": conv }),
    )
    .await;
    next_of_type(&mut b, "active_conversation_set").await;
    assert!(state.hub.active.is_active(&b_id, &conv));

    // B stops reading, so its client never answers a ping. A keeps reading
    // and hears B go offline once the pong deadline passes.
    let offline = loop {
        let frame = next_of_type(&mut a, "user_status").await;
        if frame["user_id"] == b_id.as_str() && frame["status"] == "offline" {
            break frame;
        }
    };
    assert_eq!(offline["user_id"], b_id.as_str());

    assert!(!state.hub.presence.is_online(&b_id));
    assert!(!state.hub.rooms.contains(&conv, &b_id));
    assert!(!state.hub.active.is_active(&b_id, &conv));

    // B is no longer counted as viewing, so a new message is not swallowed.
    let sent = send_text(&base, &a_token, &conv, "are you there?").await;
    assert_eq!(sent["text"], "are you there?");
    assert!(!state.hub.active.is_active(&b_id, &conv));
    drop(b);
}
