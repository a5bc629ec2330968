//! Chat WebSocket. Each client message is parsed as JSON; `post_message`
//! streams the reply back as `chunk` frames followed by one `done` frame.
//! Closing the socket mid-reply cancels generation and nothing is persisted.

use std::{fmt::Display, sync::Arc};

use axum::{
  extract::{
    ws::{Message as WsMessage, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::domain::{Message, MessageType};
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::routes::chats::owned_chat;
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state, user), fields(user_id = %user.id))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>, user: AuthUser) -> impl IntoResponse {
  info!(target: "tutor_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state, user))
}

#[instrument(level = "info", skip(socket, state, user), fields(user_id = %user.id))]
async fn handle_ws(socket: WebSocket, state: Arc<AppState>, user: AuthUser) {
  info!(target: "tutor_backend", "WebSocket connected");
  let (mut tx, mut rx) = socket.split();
  session(&mut tx, &mut rx, &state, &user).await;
  info!(target: "tutor_backend", "WebSocket disconnected");
}

/// Serve client frames until the peer closes or a send fails.
async fn session<Tx, Rx, E>(tx: &mut Tx, rx: &mut Rx, state: &AppState, user: &AuthUser)
where
  Tx: Sink<WsMessage> + Unpin,
  Tx::Error: Display,
  Rx: Stream<Item = Result<WsMessage, E>> + Unpin,
{
  while let Some(Ok(msg)) = rx.next().await {
    match msg {
      WsMessage::Text(txt) => {
        let open = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(ClientWsMessage::Ping) => send(tx, &ServerWsMessage::Pong).await,
          Ok(ClientWsMessage::PostMessage { chat_id, text }) => {
            debug!(target: "chat", %chat_id, text_len = text.len(), "WS post_message");
            stream_reply(tx, rx, state, user, chat_id, text).await
          }
          Err(e) => send(tx, &ServerWsMessage::Error { message: format!("Invalid JSON: {e}") }).await,
        };
        if !open {
          break;
        }
      }
      WsMessage::Ping(payload) => {
        let _ = tx.send(WsMessage::Pong(payload)).await;
      }
      WsMessage::Close(_) => break,
      _ => {}
    }
  }
}

/// Returns `false` once the socket is gone.
async fn send<Tx>(tx: &mut Tx, msg: &ServerWsMessage) -> bool
where
  Tx: Sink<WsMessage> + Unpin,
  Tx::Error: Display,
{
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  });
  match tx.send(WsMessage::Text(out)).await {
    Ok(()) => true,
    Err(e) => {
      error!(target: "tutor_backend", error = %e, "WS send error");
      false
    }
  }
}

/// Relay one streamed reply while watching the socket for a close.
async fn stream_reply<Tx, Rx, E>(tx: &mut Tx, rx: &mut Rx, state: &AppState, user: &AuthUser, chat_id: Uuid, text: String) -> bool
where
  Tx: Sink<WsMessage> + Unpin,
  Tx::Error: Display,
  Rx: Stream<Item = Result<WsMessage, E>> + Unpin,
{
  if text.trim().is_empty() {
    return send(tx, &ServerWsMessage::Error { message: "Message text is required.".into() }).await;
  }
  if let Err(e) = owned_chat(state, user, chat_id).await {
    return send(tx, &ServerWsMessage::Error { message: e.to_string() }).await;
  }

  let cancel = CancellationToken::new();
  let mut stream = match state.chats.post_message_streaming(Message::new(chat_id, text, MessageType::User), cancel.clone()).await {
    Ok(Some(stream)) => stream,
    Ok(None) => return send(tx, &ServerWsMessage::Error { message: format!("Chat with ID {chat_id} not found.") }).await,
    Err(e) => return send(tx, &ServerWsMessage::Error { message: e.to_string() }).await,
  };

  let mut reply = String::new();
  loop {
    tokio::select! {
      item = stream.next() => match item {
        Some(Ok(chunk)) => {
          reply.push_str(&chunk);
          if !send(tx, &ServerWsMessage::Chunk { chat_id, text: chunk }).await {
            cancel.cancel();
            return false;
          }
        }
        Some(Err(e)) => {
          warn!(target: "chat", %chat_id, error = %e, "Streaming reply failed");
          return send(tx, &ServerWsMessage::Error { message: e.to_string() }).await;
        }
        None => {
          info!(target: "chat", %chat_id, reply_len = reply.len(), "Streamed reply served");
          return send(tx, &ServerWsMessage::Done { chat_id, reply }).await;
        }
      },
      incoming = rx.next() => match incoming {
        Some(Ok(WsMessage::Ping(payload))) => {
          let _ = tx.send(WsMessage::Pong(payload)).await;
        }
        Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => {
          info!(target: "chat", %chat_id, received = reply.len(), "Socket closed mid-reply; generation cancelled");
          cancel.cancel();
          return false;
        }
        Some(Ok(_)) => debug!(target: "chat", %chat_id, "Ignoring client frame while a reply is streaming"),
      },
    }
  }
}
