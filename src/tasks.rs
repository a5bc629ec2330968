//! User task lifecycle: NotStarted -> InProgress -> Solved.
//!
//! Tasks are created lazily from the problem bank, one per (user, problem,
//! task type). Status never moves backwards, and a task is bound to at most
//! one chat.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::domain::{TaskType, UserTask, UserTaskStatus};
use crate::error::StoreError;
use crate::problem_bank::ProblemBank;
use crate::store::Store;

pub struct TaskTracker {
  store: Arc<dyn Store>,
  bank: Arc<dyn ProblemBank>,
  config: Arc<AppConfig>,
}

impl TaskTracker {
  pub fn new(store: Arc<dyn Store>, bank: Arc<dyn ProblemBank>, config: Arc<AppConfig>) -> Self {
    Self { store, bank, config }
  }

  /// Tasks of `task_type` for `user_id`, sorted by display name.
  ///
  /// An unmapped task type or a failing problem bank yields an empty list.
  #[instrument(level = "info", skip(self))]
  pub async fn get_or_create_tasks(&self, user_id: &str, task_type: TaskType) -> Result<Vec<UserTask>, StoreError> {
    let Some(category) = self.config.category_for(task_type) else {
      warn!(target: "tasks", %task_type, "Task type has no category in task_mode_titles; returning no tasks");
      return Ok(Vec::new());
    };

    let problems = match self.bank.problems_by_type(category).await {
      Ok(p) => p,
      Err(e) => {
        warn!(target: "tasks", %category, error = %e, "Problem bank lookup failed; returning no tasks");
        return Ok(Vec::new());
      }
    };

    let mut tasks = Vec::with_capacity(problems.len());
    let mut created = 0usize;
    for problem in problems {
      if problem.id.is_empty() {
        warn!(target: "tasks", %category, "Skipping problem without id");
        continue;
      }
      if let Some(existing) = self.store.find_user_task(user_id, &problem.id, task_type).await? {
        tasks.push(existing);
        continue;
      }
      let task = UserTask {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        problem_id: problem.id.clone(),
        problem_hash: problem.id.clone(),
        display_name: problem.display_name(),
        task_type,
        status: UserTaskStatus::NotStarted,
        associated_chat_id: None,
      };
      self.store.insert_user_task(task.clone()).await?;
      created += 1;
      tasks.push(task);
    }

    tasks.sort_by(|a, b| a.display_name.cmp(&b.display_name));
    info!(target: "tasks", %category, total = tasks.len(), created, "Tasks resolved");
    Ok(tasks)
  }

  /// The task, if it exists and belongs to `user_id`.
  pub async fn get_task(&self, task_id: Uuid, user_id: &str) -> Result<Option<UserTask>, StoreError> {
    let task = self.store.user_task(task_id).await?.filter(|t| t.user_id == user_id);
    if task.is_none() {
      warn!(target: "tasks", %task_id, %user_id, "Task not found for user");
    }
    Ok(task)
  }

  /// Bind the task to `chat_id` and mark it InProgress.
  ///
  /// Returns `None` when the task is missing or foreign, when it is bound to
  /// a different chat, or when another in-progress task already holds
  /// `chat_id`. A solved task is returned unchanged.
  #[instrument(level = "info", skip(self))]
  pub async fn start_task(&self, task_id: Uuid, chat_id: Uuid, user_id: &str) -> Result<Option<UserTask>, StoreError> {
    let Some(mut task) = self.get_task(task_id, user_id).await? else { return Ok(None) };

    if let Some(bound) = task.associated_chat_id.filter(|bound| *bound != chat_id) {
      warn!(target: "tasks", %task_id, %bound, requested = %chat_id, "Task is bound to another chat");
      return Ok(None);
    }
    match task.status {
      UserTaskStatus::InProgress if task.associated_chat_id == Some(chat_id) => {
        info!(target: "tasks", %task_id, %chat_id, "Task already in progress with this chat");
        return Ok(Some(task));
      }
      UserTaskStatus::Solved => {
        info!(target: "tasks", %task_id, "Task already solved");
        return Ok(Some(task));
      }
      _ => {}
    }
    if let Some(holder) = self.store.in_progress_task_for_chat(chat_id).await?.filter(|h| h.id != task_id) {
      warn!(target: "tasks", %task_id, holder = %holder.id, %chat_id, "Chat already holds an in-progress task");
      return Ok(None);
    }

    task.status = UserTaskStatus::InProgress;
    task.associated_chat_id = Some(chat_id);
    self.store.update_user_task(task.clone()).await?;
    info!(target: "tasks", %task_id, %chat_id, "Task started");
    Ok(Some(task))
  }

  /// Mark the task Solved. Idempotent; `None` when missing or foreign.
  #[instrument(level = "info", skip(self))]
  pub async fn complete_task(&self, task_id: Uuid, user_id: &str) -> Result<Option<UserTask>, StoreError> {
    let Some(mut task) = self.get_task(task_id, user_id).await? else { return Ok(None) };
    if task.status == UserTaskStatus::Solved {
      info!(target: "tasks", %task_id, "Task already solved");
      return Ok(Some(task));
    }
    task.status = UserTaskStatus::Solved;
    self.store.update_user_task(task.clone()).await?;
    info!(target: "tasks", %task_id, %user_id, "Task solved");
    Ok(Some(task))
  }
}
