use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::state::AppState;
use crate::ws::{protocol, Connection, PresenceStatus, ServerEvent};

/// How long the writer gets to flush the closing frame after a keepalive failure.
const CLOSE_FLUSH_GRACE: Duration = Duration::from_secs(1);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards frames from an mpsc channel in order
/// - Keepalive task: pings on an interval and gives up when a pong is late
/// - Reader loop: processes incoming frames one at a time
///
/// The connection ends when the reader loop ends or the keepalive task gives
/// up, whichever comes first. Either way the hub cleanup runs.
///
/// Everything else in the system reaches this client through the
/// [`Connection`] registered in the presence registry.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let conn = Connection::new(tx);
    let conn_id = conn.id();

    // Snapshot of who is already online, before this connection announces itself
    for other in state.hub.presence.online_users() {
        if other == user_id {
            continue;
        }
        conn.push(
            ServerEvent::UserStatus {
                user_id: other,
                status: PresenceStatus::Online,
            }
            .to_frame(),
        );
    }

    state.hub.connect(&user_id, conn.clone());

    tracing::info!(
        user_id = %user_id,
        connection_id = conn_id,
        "WebSocket actor started"
    );

    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_interval = Duration::from_secs(state.live.ping_interval_secs.max(1));
    let pong_timeout = Duration::from_secs(state.live.pong_timeout_secs.max(1));
    let mut ping_handle = tokio::spawn(keepalive_task(
        conn.clone(),
        pong_rx,
        ping_interval,
        pong_timeout,
    ));

    // Reader loop: process incoming WebSocket frames
    let reader = async {
        loop {
            match ws_receiver.next().await {
                Some(Ok(msg)) => match msg {
                    Message::Text(text) => {
                        protocol::handle_text_message(text.as_str(), &conn, &state, &user_id)
                            .await;
                    }
                    Message::Binary(_) => {
                        conn.push(
                            ServerEvent::error("Binary frames are not supported").to_frame(),
                        );
                    }
                    Message::Pong(_) => {
                        let _ = pong_tx.send(());
                    }
                    Message::Ping(data) => {
                        conn.push(Message::Pong(data));
                    }
                    Message::Close(frame) => {
                        tracing::info!(
                            user_id = %user_id,
                            reason = ?frame,
                            "Client initiated close"
                        );
                        break;
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(
                        user_id = %user_id,
                        error = %e,
                        "WebSocket receive error"
                    );
                    break;
                }
                None => {
                    tracing::info!(user_id = %user_id, "WebSocket stream ended");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = reader => {}
        _ = &mut ping_handle => {
            tracing::warn!(
                user_id = %user_id,
                connection_id = conn_id,
                "Keepalive failed, dropping connection"
            );
            // The writer stops on its own once the close frame is out.
            let _ = timeout(CLOSE_FLUSH_GRACE, &mut writer_handle).await;
        }
    }

    writer_handle.abort();
    ping_handle.abort();

    // Rooms, active view and the offline notice are handled by the hub when
    // this was the user's last connection.
    let went_offline = state.hub.disconnect(&user_id, conn_id);

    tracing::info!(
        user_id = %user_id,
        connection_id = conn_id,
        went_offline,
        "WebSocket actor stopped"
    );
}

/// Keepalive task: pings every `every` and returns once a pong misses
/// `pong_timeout` or the writer has gone away.
async fn keepalive_task(
    conn: Connection,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    every: Duration,
    pong_timeout: Duration,
) {
    let mut ping_timer = interval(every);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        // Unsolicited pongs must not answer the next ping.
        while pong_rx.try_recv().is_ok() {}

        if !conn.push(Message::Ping(vec![1, 2, 3, 4].into())) {
            // Writer task has died, connection is gone
            return;
        }

        match timeout(pong_timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!(connection_id = conn.id(), "Pong timeout, closing connection");
                conn.push(Message::Close(Some(CloseFrame {
                    code: 1001,
                    reason: "Pong timeout".into(),
                })));
                return;
            }
        }
    }
}

/// Writer task: receives frames from the mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}
