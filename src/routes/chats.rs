//! Chat endpoints. Every route works on the caller's own chats only; another
//! user's chat looks exactly like a missing one.

use std::sync::Arc;

use axum::{
  extract::{Path, State},
  http::StatusCode,
  Json,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::domain::{Chat, Message, MessageType};
use crate::error::AppError;
use crate::protocol::*;
use crate::state::AppState;

/// The chat, if it exists and belongs to `user`.
pub async fn owned_chat(state: &AppState, user: &AuthUser, id: Uuid) -> Result<Chat, AppError> {
  state
    .chats
    .get_chat(id)
    .await?
    .filter(|c| c.user_id == user.id)
    .ok_or_else(|| AppError::NotFound(format!("Chat with ID {id} not found.")))
}

async fn chat_out(state: &AppState, chat: Chat) -> Result<ChatOut, AppError> {
  let task_type = state.chats.bound_task_type(chat.id).await?;
  Ok(ChatOut::new(chat, task_type))
}

#[instrument(level = "info", skip(state, user), fields(user_id = %user.id))]
pub async fn list_chats(State(state): State<Arc<AppState>>, user: AuthUser) -> Result<Json<Vec<ChatOut>>, AppError> {
  let mut out = Vec::new();
  for chat in state.chats.list_chats(&user.id).await? {
    out.push(chat_out(&state, chat).await?);
  }
  Ok(Json(out))
}

#[instrument(level = "info", skip(state, user, body), fields(user_id = %user.id))]
pub async fn create_chat(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  Json(body): Json<CreateChatIn>,
) -> Result<Json<ChatOut>, AppError> {
  let name = body.name.trim();
  if name.is_empty() {
    return Err(AppError::Validation("Chat name is required.".into()));
  }
  let chat = state.chats.create_casual_chat(Chat::new(name, &user.id)).await?;
  Ok(Json(ChatOut::new(chat, None)))
}

/// Without a name the chat is named after the problem and the current time.
#[instrument(level = "info", skip(state, user, body), fields(user_id = %user.id, problem_id = %body.problem_id, task_type = %body.task_type))]
pub async fn create_problem_chat(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  Json(body): Json<CreateProblemChatIn>,
) -> Result<Json<ChatOut>, AppError> {
  let problem_id = body.problem_id.trim();
  if problem_id.is_empty() {
    return Err(AppError::Validation("Problem ID is required.".into()));
  }

  let chat = match body.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
    Some(name) => state.chats.create_problem_chat(Chat::new(name, &user.id), problem_id, body.task_type).await?,
    None => {
      let problem = state
        .bank
        .problem(problem_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Problem with ID {problem_id} not found.")))?;
      state
        .chats
        .get_or_create_problem_chat(problem_id, &user.id, &problem.display_name(), body.task_type)
        .await?
    }
  };
  Ok(Json(chat_out(&state, chat).await?))
}

#[instrument(level = "info", skip(state, user), fields(user_id = %user.id))]
pub async fn get_chat(State(state): State<Arc<AppState>>, user: AuthUser, Path(id): Path<Uuid>) -> Result<Json<ChatOut>, AppError> {
  let chat = owned_chat(&state, &user, id).await?;
  Ok(Json(chat_out(&state, chat).await?))
}

#[instrument(level = "info", skip(state, user), fields(user_id = %user.id))]
pub async fn delete_chat(State(state): State<Arc<AppState>>, user: AuthUser, Path(id): Path<Uuid>) -> Result<StatusCode, AppError> {
  owned_chat(&state, &user, id).await?;
  state.chats.delete_chat(id).await?;
  Ok(StatusCode::NO_CONTENT)
}

/// Visible messages only, oldest first.
#[instrument(level = "info", skip(state, user), fields(user_id = %user.id))]
pub async fn list_messages(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<MessageOut>>, AppError> {
  owned_chat(&state, &user, id).await?;
  let messages = state.chats.visible_messages(id).await?;
  Ok(Json(messages.into_iter().map(MessageOut::from).collect()))
}

#[instrument(level = "info", skip(state, user, body), fields(user_id = %user.id, text_len = body.text.len()))]
pub async fn post_message(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  Path(id): Path<Uuid>,
  Json(body): Json<PostMessageIn>,
) -> Result<Json<ReplyOut>, AppError> {
  if body.text.trim().is_empty() {
    return Err(AppError::Validation("Message text is required.".into()));
  }
  owned_chat(&state, &user, id).await?;
  let reply = state.chats.post_message(Message::new(id, body.text, MessageType::User)).await?;
  info!(target: "chat", chat_id = %id, reply_len = reply.len(), "Reply served");
  Ok(Json(ReplyOut { reply }))
}
