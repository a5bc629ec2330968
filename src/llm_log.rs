//! Interaction log for model calls.
//!
//! Every call is traced at debug (summary) and trace (full transcript). When
//! `llm_logging.enabled` is set, a readable block is also appended to
//! `llm_logging.log_file_path`. Write failures are logged and swallowed.

use std::path::PathBuf;

use chrono::Local;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, trace};

use crate::config::LlmLoggingConfig;
use crate::domain::{Message, TaskType};

#[derive(Clone, Debug)]
pub struct InteractionLog {
  enabled: bool,
  path: PathBuf,
}

impl InteractionLog {
  pub fn new(cfg: &LlmLoggingConfig) -> Self {
    Self { enabled: cfg.enabled, path: PathBuf::from(&cfg.log_file_path) }
  }

  #[cfg(test)]
  pub fn disabled() -> Self {
    Self { enabled: false, path: PathBuf::new() }
  }

  pub async fn interaction(&self, task_type: TaskType, messages: &[Message], response: &str, model: &str) {
    debug!(target: "llm", %task_type, code = task_type.code(), %model, response_len = response.len(), "LLM interaction");
    trace!(target: "llm", %task_type, %model, messages = %format_messages(messages), %response, "LLM interaction details");
    if self.enabled {
      self.append(render_interaction(task_type, messages, response, model)).await;
    }
  }

  pub async fn solution(&self, problem: &str, solution: &str, model: &str) {
    debug!(target: "llm", %model, problem_len = problem.len(), solution_len = solution.len(), "LLM solution");
    trace!(target: "llm", %model, %problem, %solution, "LLM solution details");
    if self.enabled {
      self.append(render_solution(problem, solution, model)).await;
    }
  }

  /// Fire-and-forget variant for contexts that cannot await (stream finalizers).
  pub fn submit_interaction(&self, task_type: TaskType, messages: Vec<Message>, response: String, model: String) {
    let log = self.clone();
    match tokio::runtime::Handle::try_current() {
      Ok(handle) => {
        handle.spawn(async move { log.interaction(task_type, &messages, &response, &model).await });
      }
      Err(_) => {
        debug!(target: "llm", %task_type, %model, response_len = response.len(), "LLM interaction (no runtime; file log skipped)");
      }
    }
  }

  async fn append(&self, block: String) {
    if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
      if let Err(e) = tokio::fs::create_dir_all(dir).await {
        error!(target: "llm", path = %self.path.display(), error = %e, "Failed to create LLM log directory");
        return;
      }
    }
    let file = tokio::fs::OpenOptions::new().create(true).append(true).open(&self.path).await;
    let result = match file {
      Ok(mut f) => f.write_all(block.as_bytes()).await,
      Err(e) => Err(e),
    };
    match result {
      Ok(()) => debug!(target: "llm", path = %self.path.display(), "LLM interaction logged"),
      Err(e) => error!(target: "llm", path = %self.path.display(), error = %e, "Failed to log LLM interaction"),
    }
  }
}

fn format_messages(messages: &[Message]) -> String {
  messages
    .iter()
    .map(|m| format!("[{:?}]{} {}", m.message_type, if m.is_system_prompt { " (SYSTEM)" } else { "" }, m.text))
    .collect::<Vec<_>>()
    .join("\n")
}

fn render_interaction(task_type: TaskType, messages: &[Message], response: &str, model: &str) -> String {
  let mut out = String::new();
  out.push_str(&format!("==== LLM INTERACTION LOG - {} ====\n", Local::now().format("%Y-%m-%d %H:%M:%S")));
  out.push_str(&format!("Task Type: {} (Code: {})\n", task_type, task_type.code()));
  out.push_str(&format!("Model: {model}\n"));
  out.push_str("\n--- MESSAGES SENT TO LLM ---\n");
  for m in messages {
    out.push_str(&format!("[{:?}] {}\n", m.message_type, if m.is_system_prompt { "(SYSTEM PROMPT)" } else { "" }));
    out.push_str(&m.text);
    out.push_str("\n-----------------------------\n");
  }
  out.push_str("\n--- LLM RESPONSE ---\n");
  out.push_str(response);
  out.push_str("\n=============================================\n\n\n");
  out
}

fn render_solution(problem: &str, solution: &str, model: &str) -> String {
  format!(
    "==== LLM SOLUTION LOG - {} ====\nModel: {model}\n\n--- PROBLEM ---\n{problem}\n\n--- SOLUTION GENERATED BY LLM ---\n{solution}\n=============================================\n\n\n",
    Local::now().format("%Y-%m-%d %H:%M:%S"),
  )
}
