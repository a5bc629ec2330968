//! Domain models: users, chats, messages, user tasks and invite codes.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Tutoring mode. Selects prompt templates and redaction rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Default)]
pub enum TaskType {
  /// Default tutor mode.
  #[default]
  Tutor,
  /// Learning from examples.
  Learning,
  /// Guided solution.
  Guided,
  /// Exam mode: the reference solution is never shown to the model.
  Exam,
}

impl TaskType {
  pub const ALL: [TaskType; 4] = [TaskType::Tutor, TaskType::Learning, TaskType::Guided, TaskType::Exam];

  pub fn as_str(&self) -> &'static str {
    match self {
      TaskType::Tutor => "Tutor",
      TaskType::Learning => "Learning",
      TaskType::Guided => "Guided",
      TaskType::Exam => "Exam",
    }
  }

  /// Stable numeric code used by older clients and in `task_mode_titles` keys.
  pub fn code(&self) -> u8 {
    match self {
      TaskType::Tutor => 0,
      TaskType::Learning => 1,
      TaskType::Guided => 2,
      TaskType::Exam => 3,
    }
  }

  pub fn from_code(code: u64) -> Option<Self> {
    Self::ALL.into_iter().find(|t| u64::from(t.code()) == code)
  }
}

impl fmt::Display for TaskType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TaskType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    if let Ok(code) = s.parse::<u64>() {
      return Self::from_code(code).ok_or_else(|| format!("unknown task type code: {code}"));
    }
    Self::ALL
      .into_iter()
      .find(|t| t.as_str().eq_ignore_ascii_case(s))
      .ok_or_else(|| format!("unknown task type: {s}"))
  }
}

// Accepts either the name ("Exam") or the numeric code (3).
impl<'de> Deserialize<'de> for TaskType {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    struct TaskTypeVisitor;

    impl<'de> de::Visitor<'de> for TaskTypeVisitor {
      type Value = TaskType;

      fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a task type name or numeric code")
      }

      fn visit_u64<E: de::Error>(self, v: u64) -> Result<TaskType, E> {
        TaskType::from_code(v).ok_or_else(|| E::custom(format!("unknown task type code: {v}")))
      }

      fn visit_i64<E: de::Error>(self, v: i64) -> Result<TaskType, E> {
        u64::try_from(v)
          .ok()
          .and_then(TaskType::from_code)
          .ok_or_else(|| E::custom(format!("unknown task type code: {v}")))
      }

      fn visit_str<E: de::Error>(self, v: &str) -> Result<TaskType, E> {
        v.parse().map_err(E::custom)
      }
    }

    deserializer.deserialize_any(TaskTypeVisitor)
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatType {
  Chat,
  ProblemSolver,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
  System,
  User,
  Assistant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UserTaskStatus {
  NotStarted,
  InProgress,
  Solved,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
  User,
  Admin,
}

impl Role {
  pub fn as_str(&self) -> &'static str {
    match self {
      Role::User => "User",
      Role::Admin => "Admin",
    }
  }
}

#[derive(Clone, Debug)]
pub struct User {
  pub id: String,
  pub email: String,
  pub password_hash: String,
  pub roles: Vec<Role>,
  pub first_name: String,
  pub last_name: String,
  pub student_group: String,
  pub used_invite_code_id: Option<Uuid>,
  pub created_at: DateTime<Utc>,
}

impl User {
  pub fn new(email: &str, password_hash: String) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      email: email.to_string(),
      password_hash,
      roles: vec![Role::User],
      first_name: String::new(),
      last_name: String::new(),
      student_group: String::new(),
      used_invite_code_id: None,
      created_at: Utc::now(),
    }
  }

  pub fn has_role(&self, role: Role) -> bool {
    self.roles.contains(&role)
  }
}

/// A conversation. Messages are owned by the chat and stored separately
/// through the repository; they are deleted with it.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
  pub id: Uuid,
  pub name: String,
  pub user_id: String,
  #[serde(rename = "type")]
  pub chat_type: ChatType,
  pub created_at: DateTime<Utc>,
}

impl Chat {
  pub fn new(name: &str, user_id: &str) -> Self {
    Self {
      id: Uuid::new_v4(),
      name: name.to_string(),
      user_id: user_id.to_string(),
      chat_type: ChatType::Chat,
      created_at: Utc::now(),
    }
  }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
  pub id: Uuid,
  pub chat_id: Uuid,
  pub text: String,
  pub message_type: MessageType,
  /// Injected prompt kept for the model but never rendered to the user.
  pub is_system_prompt: bool,
  pub created_at: DateTime<Utc>,
}

impl Message {
  pub fn new(chat_id: Uuid, text: impl Into<String>, message_type: MessageType) -> Self {
    Self {
      id: Uuid::new_v4(),
      chat_id,
      text: text.into(),
      message_type,
      is_system_prompt: false,
      created_at: Utc::now(),
    }
  }

  pub fn hidden(chat_id: Uuid, text: impl Into<String>, message_type: MessageType) -> Self {
    Self { is_system_prompt: true, ..Self::new(chat_id, text, message_type) }
  }
}

/// One user's tracked attempt at one problem.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTask {
  pub id: Uuid,
  pub user_id: String,
  pub problem_id: String,
  /// Correlates with `create_problem_chat`; equal to `problem_id`.
  pub problem_hash: String,
  pub display_name: String,
  pub task_type: TaskType,
  pub status: UserTaskStatus,
  pub associated_chat_id: Option<Uuid>,
}

#[derive(Clone, Debug)]
pub struct InviteCode {
  pub id: Uuid,
  pub code: String,
  pub max_usages: u32,
  pub current_usages: u32,
  pub created_at: DateTime<Utc>,
  pub created_by_id: String,
  pub used_by: Vec<String>,
}

impl InviteCode {
  pub fn new(code: &str, max_usages: u32, created_by_id: &str) -> Self {
    Self {
      id: Uuid::new_v4(),
      code: code.to_string(),
      max_usages,
      current_usages: 0,
      created_at: Utc::now(),
      created_by_id: created_by_id.to_string(),
      used_by: Vec::new(),
    }
  }

  pub fn can_be_used(&self) -> bool {
    self.current_usages < self.max_usages
  }
}
