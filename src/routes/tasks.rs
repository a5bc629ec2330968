//! Task endpoints: the caller's task list per task type and its lifecycle.

use std::sync::Arc;

use axum::{
  extract::{Path, Query, State},
  Json,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::domain::UserTask;
use crate::error::AppError;
use crate::protocol::*;
use crate::routes::chats::owned_chat;
use crate::state::AppState;

fn task_not_found(id: Uuid) -> AppError {
  AppError::NotFound(format!("Task with ID {id} not found."))
}

/// Get-or-create: the first call for a task type materialises the category's problems.
#[instrument(level = "info", skip(state, user, q), fields(user_id = %user.id, task_type = %q.task_type))]
pub async fn list_tasks(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  Query(q): Query<TasksQuery>,
) -> Result<Json<Vec<UserTaskOut>>, AppError> {
  let tasks = state.tasks.get_or_create_tasks(&user.id, q.task_type).await?;
  Ok(Json(tasks.into_iter().map(UserTaskOut::from).collect()))
}

#[instrument(level = "info", skip(state, user), fields(user_id = %user.id))]
pub async fn get_task(State(state): State<Arc<AppState>>, user: AuthUser, Path(id): Path<Uuid>) -> Result<Json<UserTaskOut>, AppError> {
  let task = state.tasks.get_task(id, &user.id).await?.ok_or_else(|| task_not_found(id))?;
  Ok(Json(task.into()))
}

/// Bind the task to a chat and mark it InProgress.
///
/// Without `chatId` the task's existing chat is reused when it still
/// exists; otherwise a problem chat is opened for it first.
#[instrument(level = "info", skip(state, user, body), fields(user_id = %user.id))]
pub async fn start_task(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  Path(id): Path<Uuid>,
  body: Option<Json<StartTaskIn>>,
) -> Result<Json<UserTaskOut>, AppError> {
  let task = state.tasks.get_task(id, &user.id).await?.ok_or_else(|| task_not_found(id))?;
  let requested = body.and_then(|Json(b)| b.chat_id);

  let chat_id = match requested {
    Some(chat_id) => owned_chat(&state, &user, chat_id).await?.id,
    None => match existing_chat(&state, &task).await? {
      Some(chat_id) => chat_id,
      None => {
        let chat = state
          .chats
          .get_or_create_problem_chat(&task.problem_hash, &user.id, &task.display_name, task.task_type)
          .await?;
        info!(target: "tasks", task_id = %id, chat_id = %chat.id, "Opened a problem chat for the task");
        chat.id
      }
    },
  };

  let started = state
    .tasks
    .start_task(id, chat_id, &user.id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Task with ID {id} not found or bound to another chat.")))?;
  Ok(Json(started.into()))
}

async fn existing_chat(state: &AppState, task: &UserTask) -> Result<Option<Uuid>, AppError> {
  let Some(chat_id) = task.associated_chat_id else { return Ok(None) };
  Ok(state.chats.get_chat(chat_id).await?.map(|c| c.id))
}

#[instrument(level = "info", skip(state, user), fields(user_id = %user.id))]
pub async fn complete_task(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  Path(id): Path<Uuid>,
) -> Result<Json<UserTaskOut>, AppError> {
  let task = state.tasks.complete_task(id, &user.id).await?.ok_or_else(|| task_not_found(id))?;
  Ok(Json(task.into()))
}
