//! Per-user reporting for administrators.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::domain::{ChatType, TaskType, UserTask, UserTaskStatus};
use crate::error::StoreError;
use crate::store::Store;

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
  pub user_id: String,
  pub first_name: String,
  pub last_name: String,
  pub email: String,
  pub student_group: String,
  pub solved_count: usize,
  pub in_progress_count: usize,
  pub normal_chats_count: usize,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskItem {
  pub user_task_id: Uuid,
  pub display_name: String,
  pub chat_id: Option<Uuid>,
  pub task_type: TaskType,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatItem {
  pub chat_id: Uuid,
  pub name: String,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserDetail {
  pub solved_tasks: Vec<TaskItem>,
  pub in_progress_tasks: Vec<TaskItem>,
  pub chats: Vec<ChatItem>,
}

#[derive(Clone)]
pub struct Stats {
  store: Arc<dyn Store>,
}

impl Stats {
  pub fn new(store: Arc<dyn Store>) -> Self {
    Self { store }
  }

  pub async fn user_stats(&self) -> Result<Vec<UserStats>, StoreError> {
    let mut out = Vec::new();
    for user in self.store.users().await? {
      let tasks = self.store.user_tasks_for_user(&user.id).await?;
      let chats = self.store.chats_for_user(&user.id).await?;
      out.push(UserStats {
        solved_count: count_status(&tasks, UserTaskStatus::Solved),
        in_progress_count: count_status(&tasks, UserTaskStatus::InProgress),
        normal_chats_count: chats.iter().filter(|c| c.chat_type == ChatType::Chat).count(),
        user_id: user.id,
        first_name: user.first_name,
        last_name: user.last_name,
        email: user.email,
        student_group: user.student_group,
      });
    }
    Ok(out)
  }

  /// Solved and in-progress tasks plus casual chats of one user. Unknown
  /// users simply have empty lists.
  pub async fn user_details(&self, user_id: &str) -> Result<UserDetail, StoreError> {
    let tasks = self.store.user_tasks_for_user(user_id).await?;
    let chats = self.store.chats_for_user(user_id).await?;
    Ok(UserDetail {
      solved_tasks: items(&tasks, UserTaskStatus::Solved),
      in_progress_tasks: items(&tasks, UserTaskStatus::InProgress),
      chats: chats
        .into_iter()
        .filter(|c| c.chat_type == ChatType::Chat)
        .map(|c| ChatItem { chat_id: c.id, name: c.name })
        .collect(),
    })
  }
}

fn count_status(tasks: &[UserTask], status: UserTaskStatus) -> usize {
  tasks.iter().filter(|t| t.status == status).count()
}

fn items(tasks: &[UserTask], status: UserTaskStatus) -> Vec<TaskItem> {
  tasks
    .iter()
    .filter(|t| t.status == status)
    .map(|t| TaskItem {
      user_task_id: t.id,
      display_name: t.display_name.clone(),
      chat_id: t.associated_chat_id,
      task_type: t.task_type,
    })
    .collect()
}
