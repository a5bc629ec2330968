//! Repository seam and its in-memory implementation.
//!
//! Every cross-entity read is an explicit call here; nothing is lazily loaded.
//! `MemoryStore` keeps all tables behind one `RwLock`, so each call is atomic
//! with respect to the others. Across calls there is no locking, and two
//! concurrent read-modify-write sequences on the same row resolve last write
//! wins, the same as a relational store without explicit transactions.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{Chat, InviteCode, Message, TaskType, User, UserTask, UserTaskStatus};
use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
  // users
  async fn insert_user(&self, user: User) -> StoreResult<()>;
  async fn user(&self, id: &str) -> StoreResult<Option<User>>;
  async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
  async fn users(&self) -> StoreResult<Vec<User>>;
  async fn update_user(&self, user: User) -> StoreResult<()>;
  async fn delete_user(&self, id: &str) -> StoreResult<bool>;

  // chats and messages
  async fn insert_chat(&self, chat: Chat) -> StoreResult<()>;
  async fn chat(&self, id: Uuid) -> StoreResult<Option<Chat>>;
  async fn chats_for_user(&self, user_id: &str) -> StoreResult<Vec<Chat>>;
  /// Deletes the chat and its messages. User tasks keep their (now dangling) chat id.
  async fn delete_chat(&self, id: Uuid) -> StoreResult<bool>;
  /// Appends a message, stamping it with a creation time no earlier than
  /// the previous append. Returns the stored message.
  async fn append_message(&self, message: Message) -> StoreResult<Message>;
  /// Messages of a chat ordered by creation time, ties in append order.
  async fn messages_for_chat(&self, chat_id: Uuid) -> StoreResult<Vec<Message>>;

  // user tasks
  async fn insert_user_task(&self, task: UserTask) -> StoreResult<()>;
  async fn user_task(&self, id: Uuid) -> StoreResult<Option<UserTask>>;
  async fn find_user_task(&self, user_id: &str, problem_id: &str, task_type: TaskType) -> StoreResult<Option<UserTask>>;
  async fn in_progress_task(&self, user_id: &str, problem_hash: &str, task_type: TaskType) -> StoreResult<Option<UserTask>>;
  /// The in-progress task holding `chat_id`; there is at most one.
  async fn in_progress_task_for_chat(&self, chat_id: Uuid) -> StoreResult<Option<UserTask>>;
  /// Task bound to `chat_id`, preferring the in-progress one.
  async fn task_for_chat(&self, chat_id: Uuid) -> StoreResult<Option<UserTask>>;
  async fn update_user_task(&self, task: UserTask) -> StoreResult<()>;
  async fn user_tasks_for_user(&self, user_id: &str) -> StoreResult<Vec<UserTask>>;

  // invite codes
  async fn insert_invite_code(&self, code: InviteCode) -> StoreResult<()>;
  async fn invite_code_by_code(&self, code: &str) -> StoreResult<Option<InviteCode>>;
  async fn invite_code(&self, id: Uuid) -> StoreResult<Option<InviteCode>>;
  async fn invite_codes(&self) -> StoreResult<Vec<InviteCode>>;
  async fn delete_invite_code(&self, id: Uuid) -> StoreResult<bool>;
  /// Atomically records one usage of `code` by `user_id`. Returns `None`
  /// when the code is unknown, exhausted, or the user already consumed one.
  async fn consume_invite_code(&self, code: &str, user_id: &str) -> StoreResult<Option<InviteCode>>;
}

#[derive(Default)]
struct Tables {
  users: HashMap<String, User>,
  chats: HashMap<Uuid, Chat>,
  messages: HashMap<Uuid, Vec<Message>>,
  tasks: HashMap<Uuid, UserTask>,
  invites: HashMap<Uuid, InviteCode>,
  last_message_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryStore {
  inner: RwLock<Tables>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn insert_user(&self, user: User) -> StoreResult<()> {
    let mut t = self.inner.write().await;
    if t.users.values().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
      return Err(StoreError::Conflict(format!("email '{}' is already taken", user.email)));
    }
    t.users.insert(user.id.clone(), user);
    Ok(())
  }

  async fn user(&self, id: &str) -> StoreResult<Option<User>> {
    Ok(self.inner.read().await.users.get(id).cloned())
  }

  async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
    let t = self.inner.read().await;
    Ok(t.users.values().find(|u| u.email.eq_ignore_ascii_case(email)).cloned())
  }

  async fn users(&self) -> StoreResult<Vec<User>> {
    let mut users: Vec<User> = self.inner.read().await.users.values().cloned().collect();
    users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.email.cmp(&b.email)));
    Ok(users)
  }

  async fn update_user(&self, user: User) -> StoreResult<()> {
    self.inner.write().await.users.insert(user.id.clone(), user);
    Ok(())
  }

  async fn delete_user(&self, id: &str) -> StoreResult<bool> {
    Ok(self.inner.write().await.users.remove(id).is_some())
  }

  async fn insert_chat(&self, chat: Chat) -> StoreResult<()> {
    let mut t = self.inner.write().await;
    t.messages.entry(chat.id).or_default();
    t.chats.insert(chat.id, chat);
    Ok(())
  }

  async fn chat(&self, id: Uuid) -> StoreResult<Option<Chat>> {
    Ok(self.inner.read().await.chats.get(&id).cloned())
  }

  async fn chats_for_user(&self, user_id: &str) -> StoreResult<Vec<Chat>> {
    let mut chats: Vec<Chat> = self
      .inner
      .read()
      .await
      .chats
      .values()
      .filter(|c| c.user_id == user_id)
      .cloned()
      .collect();
    chats.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(chats)
  }

  async fn delete_chat(&self, id: Uuid) -> StoreResult<bool> {
    let mut t = self.inner.write().await;
    t.messages.remove(&id);
    Ok(t.chats.remove(&id).is_some())
  }

  async fn append_message(&self, mut message: Message) -> StoreResult<Message> {
    let mut t = self.inner.write().await;
    if !t.chats.contains_key(&message.chat_id) {
      return Err(StoreError::Conflict(format!("chat {} does not exist", message.chat_id)));
    }
    let now = Utc::now();
    let stamp = match t.last_message_at {
      Some(last) if last >= now => last + Duration::microseconds(1),
      _ => now,
    };
    t.last_message_at = Some(stamp);
    message.created_at = stamp;
    t.messages.entry(message.chat_id).or_default().push(message.clone());
    Ok(message)
  }

  async fn messages_for_chat(&self, chat_id: Uuid) -> StoreResult<Vec<Message>> {
    let mut messages = self.inner.read().await.messages.get(&chat_id).cloned().unwrap_or_default();
    // stable: equal stamps keep append order
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(messages)
  }

  async fn insert_user_task(&self, task: UserTask) -> StoreResult<()> {
    self.inner.write().await.tasks.insert(task.id, task);
    Ok(())
  }

  async fn user_task(&self, id: Uuid) -> StoreResult<Option<UserTask>> {
    Ok(self.inner.read().await.tasks.get(&id).cloned())
  }

  async fn find_user_task(&self, user_id: &str, problem_id: &str, task_type: TaskType) -> StoreResult<Option<UserTask>> {
    let t = self.inner.read().await;
    Ok(
      t.tasks
        .values()
        .find(|ut| ut.user_id == user_id && ut.problem_hash == problem_id && ut.task_type == task_type)
        .cloned(),
    )
  }

  async fn in_progress_task(&self, user_id: &str, problem_hash: &str, task_type: TaskType) -> StoreResult<Option<UserTask>> {
    let t = self.inner.read().await;
    Ok(
      t.tasks
        .values()
        .find(|ut| {
          ut.user_id == user_id
            && ut.problem_hash == problem_hash
            && ut.task_type == task_type
            && ut.status == UserTaskStatus::InProgress
        })
        .cloned(),
    )
  }

  async fn in_progress_task_for_chat(&self, chat_id: Uuid) -> StoreResult<Option<UserTask>> {
    let t = self.inner.read().await;
    Ok(
      t.tasks
        .values()
        .filter(|ut| ut.associated_chat_id == Some(chat_id) && ut.status == UserTaskStatus::InProgress)
        .min_by_key(|ut| ut.id)
        .cloned(),
    )
  }

  async fn task_for_chat(&self, chat_id: Uuid) -> StoreResult<Option<UserTask>> {
    let t = self.inner.read().await;
    Ok(
      t.tasks
        .values()
        .filter(|ut| ut.associated_chat_id == Some(chat_id))
        .min_by_key(|ut| (ut.status != UserTaskStatus::InProgress, ut.id))
        .cloned(),
    )
  }

  async fn update_user_task(&self, task: UserTask) -> StoreResult<()> {
    self.inner.write().await.tasks.insert(task.id, task);
    Ok(())
  }

  async fn user_tasks_for_user(&self, user_id: &str) -> StoreResult<Vec<UserTask>> {
    let mut tasks: Vec<UserTask> = self
      .inner
      .read()
      .await
      .tasks
      .values()
      .filter(|ut| ut.user_id == user_id)
      .cloned()
      .collect();
    tasks.sort_by(|a, b| a.display_name.cmp(&b.display_name));
    Ok(tasks)
  }

  async fn insert_invite_code(&self, code: InviteCode) -> StoreResult<()> {
    let mut t = self.inner.write().await;
    if t.invites.values().any(|ic| ic.code == code.code) {
      return Err(StoreError::Conflict(format!("invite code '{}' already exists", code.code)));
    }
    t.invites.insert(code.id, code);
    Ok(())
  }

  async fn invite_code_by_code(&self, code: &str) -> StoreResult<Option<InviteCode>> {
    let t = self.inner.read().await;
    Ok(t.invites.values().find(|ic| ic.code == code).cloned())
  }

  async fn invite_code(&self, id: Uuid) -> StoreResult<Option<InviteCode>> {
    Ok(self.inner.read().await.invites.get(&id).cloned())
  }

  async fn invite_codes(&self) -> StoreResult<Vec<InviteCode>> {
    let mut codes: Vec<InviteCode> = self.inner.read().await.invites.values().cloned().collect();
    codes.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(codes)
  }

  async fn delete_invite_code(&self, id: Uuid) -> StoreResult<bool> {
    Ok(self.inner.write().await.invites.remove(&id).is_some())
  }

  async fn consume_invite_code(&self, code: &str, user_id: &str) -> StoreResult<Option<InviteCode>> {
    let mut guard = self.inner.write().await;
    let t = &mut *guard;

    let Some(user) = t.users.get_mut(user_id) else { return Ok(None) };
    if user.used_invite_code_id.is_some() {
      return Ok(None);
    }
    let Some(invite) = t.invites.values_mut().find(|ic| ic.code == code) else { return Ok(None) };
    if !invite.can_be_used() {
      return Ok(None);
    }

    invite.current_usages += 1;
    invite.used_by.push(user.id.clone());
    user.used_invite_code_id = Some(invite.id);
    Ok(Some(invite.clone()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::MessageType;

  #[tokio::test]
  async fn messages_come_back_in_append_order() {
    let store = MemoryStore::new();
    let chat = Chat::new("c", "u1");
    store.insert_chat(chat.clone()).await.unwrap();

    let mut appended = Vec::new();
    for i in 0..20 {
      let kind = if i % 2 == 0 { MessageType::User } else { MessageType::Assistant };
      let m = store.append_message(Message::new(chat.id, format!("m{i}"), kind)).await.unwrap();
      appended.push(m.id);
    }

    let stored = store.messages_for_chat(chat.id).await.unwrap();
    let ids: Vec<Uuid> = stored.iter().map(|m| m.id).collect();
    assert_eq!(ids, appended);
    assert!(stored.windows(2).all(|w| w[0].created_at < w[1].created_at));
  }

  #[tokio::test]
  async fn deleting_a_chat_cascades_to_messages_but_not_tasks() {
    let store = MemoryStore::new();
    let chat = Chat::new("c", "u1");
    store.insert_chat(chat.clone()).await.unwrap();
    let m = store.append_message(Message::new(chat.id, "hi", MessageType::User)).await.unwrap();
    let task = UserTask {
      id: Uuid::new_v4(),
      user_id: "u1".into(),
      problem_id: "p".into(),
      problem_hash: "p".into(),
      display_name: "P".into(),
      task_type: TaskType::Tutor,
      status: UserTaskStatus::InProgress,
      associated_chat_id: Some(chat.id),
    };
    store.insert_user_task(task.clone()).await.unwrap();

    assert!(store.delete_chat(chat.id).await.unwrap());
    assert!(store.chat(chat.id).await.unwrap().is_none());
    assert!(!store.inner.read().await.messages.values().flatten().any(|kept| kept.id == m.id));
    assert!(store.messages_for_chat(chat.id).await.unwrap().is_empty());
    assert_eq!(store.user_task(task.id).await.unwrap().unwrap().associated_chat_id, Some(chat.id));
  }

  #[tokio::test]
  async fn appending_to_a_missing_chat_is_rejected() {
    let store = MemoryStore::new();
    let err = store.append_message(Message::new(Uuid::new_v4(), "x", MessageType::User)).await;
    assert!(matches!(err, Err(StoreError::Conflict(_))));
  }

  #[tokio::test]
  async fn duplicate_emails_conflict_case_insensitively() {
    let store = MemoryStore::new();
    store.insert_user(User::new("a@example.com", "h".into())).await.unwrap();
    let err = store.insert_user(User::new("A@Example.com", "h".into())).await;
    assert!(matches!(err, Err(StoreError::Conflict(_))));
  }

  #[tokio::test]
  async fn consume_invite_code_enforces_ceiling_and_single_use_per_user() {
    let store = MemoryStore::new();
    let alice = User::new("alice@example.com", "h".into());
    let bob = User::new("bob@example.com", "h".into());
    store.insert_user(alice.clone()).await.unwrap();
    store.insert_user(bob.clone()).await.unwrap();
    store.insert_invite_code(InviteCode::new("one", 1, "admin")).await.unwrap();
    store.insert_invite_code(InviteCode::new("two", 2, "admin")).await.unwrap();

    let used = store.consume_invite_code("one", &alice.id).await.unwrap().unwrap();
    assert_eq!(used.current_usages, 1);
    assert_eq!(used.used_by, vec![alice.id.clone()]);

    // exhausted
    assert!(store.consume_invite_code("one", &bob.id).await.unwrap().is_none());
    // alice already holds a code
    assert!(store.consume_invite_code("two", &alice.id).await.unwrap().is_none());
    // unknown
    assert!(store.consume_invite_code("nope", &bob.id).await.unwrap().is_none());

    assert!(store.consume_invite_code("two", &bob.id).await.unwrap().is_some());
    let bob = store.user(&bob.id).await.unwrap().unwrap();
    assert!(bob.used_invite_code_id.is_some());
  }

  fn task(problem: &str, task_type: TaskType, status: UserTaskStatus, chat: Option<Uuid>) -> UserTask {
    UserTask {
      id: Uuid::new_v4(),
      user_id: "u1".into(),
      problem_id: problem.into(),
      problem_hash: problem.into(),
      display_name: problem.into(),
      task_type,
      status,
      associated_chat_id: chat,
    }
  }

  #[tokio::test]
  async fn chat_lookups_prefer_the_in_progress_task() {
    let store = MemoryStore::new();
    let chat = Uuid::new_v4();
    let solved = task("p", TaskType::Guided, UserTaskStatus::Solved, Some(chat));
    let active = task("p", TaskType::Exam, UserTaskStatus::InProgress, Some(chat));
    store.insert_user_task(solved.clone()).await.unwrap();
    store.insert_user_task(active.clone()).await.unwrap();

    for _ in 0..10 {
      assert_eq!(store.task_for_chat(chat).await.unwrap().unwrap().id, active.id);
    }
    assert_eq!(store.in_progress_task_for_chat(chat).await.unwrap().unwrap().id, active.id);
    assert!(store.in_progress_task_for_chat(Uuid::new_v4()).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn in_progress_task_matches_the_task_type() {
    let store = MemoryStore::new();
    let guided = task("p", TaskType::Guided, UserTaskStatus::InProgress, None);
    store.insert_user_task(guided.clone()).await.unwrap();
    store.insert_user_task(task("p", TaskType::Exam, UserTaskStatus::NotStarted, None)).await.unwrap();

    assert_eq!(store.in_progress_task("u1", "p", TaskType::Guided).await.unwrap().unwrap().id, guided.id);
    assert!(store.in_progress_task("u1", "p", TaskType::Exam).await.unwrap().is_none());
    assert!(store.in_progress_task("u2", "p", TaskType::Guided).await.unwrap().is_none());
  }
}
