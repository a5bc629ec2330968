//! Chat orchestration: creating casual and problem chats, and turning an
//! incoming user message into a model reply.
//!
//! Per message the orchestrator reloads the whole history, works out the
//! chat's task type (bound user task first, then the stored system prompt),
//! redacts injected solutions in exam mode, and persists the reply.

use std::sync::Arc;

use chrono::Local;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{Chat, ChatType, Message, MessageType, TaskType};
use crate::error::{ServiceError, StoreError};
use crate::llm::{LlmGateway, ReplyStream};
use crate::problem_bank::ProblemBank;
use crate::prompts::PromptResolver;
use crate::store::Store;
use crate::util::escape_newlines;

#[derive(Clone)]
pub struct ChatOrchestrator {
  store: Arc<dyn Store>,
  llm: Arc<dyn LlmGateway>,
  bank: Arc<dyn ProblemBank>,
  prompts: PromptResolver,
}

impl ChatOrchestrator {
  pub fn new(store: Arc<dyn Store>, llm: Arc<dyn LlmGateway>, bank: Arc<dyn ProblemBank>, prompts: PromptResolver) -> Self {
    Self { store, llm, bank, prompts }
  }

  /// Free-form chat seeded with the default system prompt.
  #[instrument(level = "info", skip(self, chat), fields(chat_id = %chat.id, user_id = %chat.user_id))]
  pub async fn create_casual_chat(&self, mut chat: Chat) -> Result<Chat, StoreError> {
    chat.chat_type = ChatType::Chat;
    self.store.insert_chat(chat.clone()).await?;
    self
      .store
      .append_message(Message::new(chat.id, self.prompts.default_system(), MessageType::System))
      .await?;
    info!(target: "chat", chat_id = %chat.id, "Casual chat created");
    Ok(chat)
  }

  /// Chat bound to a problem-bank problem, opened with a model-written greeting.
  ///
  /// Persists the system prompt, the visible problem statement and (outside
  /// exam mode, when the bank has one) the hidden reference solution, then
  /// asks the model for the opening message. Dropping the future during that
  /// call leaves the chat without an opening message.
  #[instrument(level = "info", skip(self, chat), fields(chat_id = %chat.id, user_id = %chat.user_id))]
  pub async fn create_problem_chat(&self, mut chat: Chat, problem_id: &str, task_type: TaskType) -> Result<Chat, ServiceError> {
    chat.chat_type = ChatType::ProblemSolver;
    let Some(problem) = self.bank.problem(problem_id).await? else {
      error!(target: "chat", %problem_id, "Problem not found in the problem bank");
      return Err(ServiceError::NotFound(format!("Problem with ID {problem_id} not found.")));
    };
    let solution = problem.solution_text();
    if solution.is_none() {
      warn!(target: "chat", %problem_id, "Problem has no model solution; the tutor will work without it");
    }

    self.store.insert_chat(chat.clone()).await?;

    if let Some(mut task) = self.store.in_progress_task(&chat.user_id, problem_id, task_type).await? {
      if let Some(holder) = self.store.in_progress_task_for_chat(chat.id).await? {
        warn!(target: "chat", task_id = %task.id, holder = %holder.id, chat_id = %chat.id, "Chat already holds a task; not rebinding");
      } else {
        info!(target: "chat", task_id = %task.id, chat_id = %chat.id, "Rebinding in-progress task to the new chat");
        task.associated_chat_id = Some(chat.id);
        self.store.update_user_task(task).await?;
      }
    }

    let system = Message::new(chat.id, self.prompts.system_prompt(task_type), MessageType::System);
    let solution_msg = solution
      .filter(|_| task_type != TaskType::Exam)
      .map(|s| Message::hidden(chat.id, self.prompts.tutor_solution(&s), MessageType::User));
    let statement = format!(
      "**Problem statement:** ({})<br/><br/>\n\n{}\n\n",
      problem.id,
      escape_newlines(&problem.statement)
    );

    let system = self.store.append_message(system).await?;
    self.store.append_message(Message::new(chat.id, statement, MessageType::Assistant)).await?;
    let solution_msg = match solution_msg {
      Some(m) => Some(self.store.append_message(m).await?),
      None => None,
    };

    let mut opening_context = vec![system];
    opening_context.extend(solution_msg);
    opening_context.push(Message::hidden(chat.id, problem.statement.clone(), MessageType::User));
    opening_context.push(Message::hidden(chat.id, self.prompts.initial_prompt(task_type), MessageType::User));

    let opening = self.llm.generate_reply(&opening_context, task_type).await?;
    self.store.append_message(Message::new(chat.id, opening, MessageType::Assistant)).await?;

    info!(target: "chat", chat_id = %chat.id, %problem_id, %task_type, "Problem chat created");
    Ok(chat)
  }

  /// Problem chat named "<display name> dd.mm.yyyy HH:MM".
  pub async fn get_or_create_problem_chat(
    &self,
    problem_id: &str,
    user_id: &str,
    display_name: &str,
    task_type: TaskType,
  ) -> Result<Chat, ServiceError> {
    let name = format!("{display_name} {}", Local::now().format("%d.%m.%Y %H:%M"));
    self.create_problem_chat(Chat::new(&name, user_id), problem_id, task_type).await
  }

  /// Persist `message`, ask the model, persist a non-empty reply.
  ///
  /// Returns the reply text; empty when the chat does not exist.
  #[instrument(level = "info", skip(self, message), fields(chat_id = %message.chat_id, text_len = message.text.len()))]
  pub async fn post_message(&self, message: Message) -> Result<String, ServiceError> {
    let Some((chat, history, task_type)) = self.accept(message).await? else { return Ok(String::new()) };

    let reply = self.llm.generate_reply(&history, task_type).await?;
    if reply.is_empty() {
      warn!(target: "chat", chat_id = %chat.id, "Model returned an empty reply; nothing persisted");
    } else {
      self.store.append_message(Message::new(chat.id, reply.clone(), MessageType::Assistant)).await?;
    }
    Ok(reply)
  }

  /// Streaming variant of `post_message`.
  ///
  /// The reply is persisted once the stream ends, and only if it ended
  /// without an error and without `cancel` having tripped. `None` when the
  /// chat does not exist.
  #[instrument(level = "info", skip(self, message, cancel), fields(chat_id = %message.chat_id, text_len = message.text.len()))]
  pub async fn post_message_streaming(&self, message: Message, cancel: CancellationToken) -> Result<Option<ReplyStream>, ServiceError> {
    let Some((chat, history, task_type)) = self.accept(message).await? else { return Ok(None) };

    let mut upstream = self.llm.generate_reply_streaming(history, task_type, cancel.clone());
    let store = self.store.clone();
    let stream = async_stream::stream! {
      let mut reply = String::new();
      let mut failed = false;
      while let Some(item) = upstream.next().await {
        match item {
          Ok(chunk) => {
            reply.push_str(&chunk);
            yield Ok(chunk);
          }
          Err(e) => {
            failed = true;
            yield Err(e);
            break;
          }
        }
      }
      if failed || cancel.is_cancelled() {
        warn!(target: "chat", chat_id = %chat.id, received = reply.len(), "Streaming reply not persisted");
      } else if reply.is_empty() {
        warn!(target: "chat", chat_id = %chat.id, "Model returned an empty reply; nothing persisted");
      } else if let Err(e) = store.append_message(Message::new(chat.id, reply, MessageType::Assistant)).await {
        error!(target: "chat", chat_id = %chat.id, error = %e, "Failed to persist streamed reply");
      }
    };
    Ok(Some(Box::pin(stream)))
  }

  /// Persist the incoming message and assemble the model-bound history.
  async fn accept(&self, message: Message) -> Result<Option<(Chat, Vec<Message>, TaskType)>, ServiceError> {
    let Some(chat) = self.store.chat(message.chat_id).await? else {
      error!(target: "chat", chat_id = %message.chat_id, "Chat not found");
      return Ok(None);
    };
    self.store.append_message(message).await?;
    let mut history = self.store.messages_for_chat(chat.id).await?;

    let task_type = self.task_type_for(&chat, &history).await?;
    if task_type == TaskType::Exam {
      let before = history.len();
      history.retain(|m| !(m.is_system_prompt && self.prompts.carries_solution(&m.text)));
      if history.len() != before {
        info!(target: "chat", chat_id = %chat.id, removed = before - history.len(), "Exam mode: reference solution withheld");
      }
    }
    Ok(Some((chat, history, task_type)))
  }

  /// Casual chats are always `Tutor`. For problem chats the bound user task
  /// wins; otherwise the system prompt is matched against the configured
  /// templates, falling back to `Tutor`.
  async fn task_type_for(&self, chat: &Chat, history: &[Message]) -> Result<TaskType, StoreError> {
    if chat.chat_type != ChatType::ProblemSolver {
      return Ok(TaskType::Tutor);
    }
    if let Some(task) = self.store.task_for_chat(chat.id).await? {
      return Ok(task.task_type);
    }
    let system = history.iter().find(|m| m.message_type == MessageType::System);
    match system.and_then(|m| self.prompts.infer_task_type(&m.text)) {
      Some(t) => Ok(t),
      None => {
        warn!(target: "chat", chat_id = %chat.id, "Could not determine task type; using Tutor");
        Ok(TaskType::Tutor)
      }
    }
  }

  pub async fn list_chats(&self, user_id: &str) -> Result<Vec<Chat>, StoreError> {
    self.store.chats_for_user(user_id).await
  }

  pub async fn get_chat(&self, id: Uuid) -> Result<Option<Chat>, StoreError> {
    self.store.chat(id).await
  }

  /// Task type shown with a chat: the bound task's type, if any.
  pub async fn bound_task_type(&self, chat_id: Uuid) -> Result<Option<TaskType>, StoreError> {
    Ok(self.store.task_for_chat(chat_id).await?.map(|t| t.task_type))
  }

  #[instrument(level = "info", skip(self))]
  pub async fn delete_chat(&self, id: Uuid) -> Result<bool, StoreError> {
    let deleted = self.store.delete_chat(id).await?;
    if deleted {
      info!(target: "chat", chat_id = %id, "Chat deleted");
    }
    Ok(deleted)
  }

  /// Every stored message, oldest first.
  pub async fn messages(&self, chat_id: Uuid) -> Result<Vec<Message>, StoreError> {
    self.store.messages_for_chat(chat_id).await
  }

  /// Messages for display: hidden prompts removed, oldest first.
  pub async fn visible_messages(&self, chat_id: Uuid) -> Result<Vec<Message>, StoreError> {
    let mut messages = self.messages(chat_id).await?;
    messages.retain(|m| !m.is_system_prompt);
    Ok(messages)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Prompts;
  use crate::domain::{UserTask, UserTaskStatus};
  use crate::store::MemoryStore;
  use crate::testing::{problem, FailingLlm, MemoryBank, ScriptedLlm};

  struct Fixture {
    chat: ChatOrchestrator,
    store: Arc<MemoryStore>,
    llm: Arc<ScriptedLlm>,
    prompts: Prompts,
  }

  fn fixture() -> Fixture {
    let bank = MemoryBank::new();
    bank.add(problem("p1", "", "2+2=?", None), "algebra");
    bank.add(problem("p2", "Roots", "x^2 = 4\nfind x", Some("x = 2 or x = -2")), "algebra");
    let store = Arc::new(MemoryStore::new());
    let llm = Arc::new(ScriptedLlm::new("Let's start."));
    let prompts = Prompts::default();
    let chat = ChatOrchestrator::new(store.clone(), llm.clone(), Arc::new(bank), PromptResolver::new(prompts.clone()));
    Fixture { chat, store, llm, prompts }
  }

  #[tokio::test]
  async fn casual_chat_starts_with_default_system_prompt() {
    let f = fixture();
    let chat = f.chat.create_casual_chat(Chat::new("hello", "u1")).await.unwrap();
    assert_eq!(chat.chat_type, ChatType::Chat);
    let messages = f.store.messages_for_chat(chat.id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message_type, MessageType::System);
    assert_eq!(messages[0].text, f.prompts.default_system_prompt);
  }

  #[tokio::test]
  async fn problem_chat_without_solution_has_three_messages() {
    let f = fixture();
    let chat = f.chat.create_problem_chat(Chat::new("T1", "u1"), "p1", TaskType::Learning).await.unwrap();
    assert_eq!(chat.chat_type, ChatType::ProblemSolver);

    let messages = f.store.messages_for_chat(chat.id).await.unwrap();
    let kinds: Vec<MessageType> = messages.iter().map(|m| m.message_type).collect();
    assert_eq!(kinds, [MessageType::System, MessageType::Assistant, MessageType::Assistant]);
    assert!(messages.iter().all(|m| !m.is_system_prompt));
    assert_eq!(messages[0].text, f.prompts.learning_system_prompt);
    assert!(messages[1].text.contains("2+2=?"));
    assert_eq!(messages[2].text, "Let's start.");

    // model saw: system, hidden statement, hidden initial prompt
    let call = f.llm.last_call();
    assert_eq!(call.task_type, TaskType::Learning);
    let texts: Vec<&str> = call.history.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, [f.prompts.learning_system_prompt.as_str(), "2+2=?", f.prompts.learning_initial_prompt.as_str()]);
    assert!(call.history[1..].iter().all(|m| m.is_system_prompt && m.message_type == MessageType::User));
  }

  #[tokio::test]
  async fn problem_chat_hides_solution_and_escapes_statement() {
    let f = fixture();
    let chat = f.chat.create_problem_chat(Chat::new("T2", "u1"), "p2", TaskType::Guided).await.unwrap();

    let all = f.store.messages_for_chat(chat.id).await.unwrap();
    assert_eq!(all.len(), 4);
    assert!(all[1].text.contains("x^2 = 4\\\\find x"));
    assert!(all[2].is_system_prompt);
    assert!(all[2].text.contains("x = 2 or x = -2"));

    let visible = f.chat.visible_messages(chat.id).await.unwrap();
    assert_eq!(visible.len(), 3);
    assert!(visible.iter().all(|m| !m.text.contains("x = 2 or x = -2")));

    let call = f.llm.last_call();
    assert_eq!(call.history.len(), 4);
    assert!(call.history[1].text.contains("x = 2 or x = -2"));
  }

  #[tokio::test]
  async fn exam_problem_chat_never_stores_the_solution() {
    let f = fixture();
    let chat = f.chat.create_problem_chat(Chat::new("T3", "u1"), "p2", TaskType::Exam).await.unwrap();
    let all = f.store.messages_for_chat(chat.id).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|m| !m.text.contains("x = 2 or x = -2")));
  }

  #[tokio::test]
  async fn unknown_problem_is_not_found_and_creates_nothing() {
    let f = fixture();
    let err = f.chat.create_problem_chat(Chat::new("T", "u1"), "nope", TaskType::Tutor).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
    assert!(f.store.chats_for_user("u1").await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn failed_opening_leaves_chat_without_opening_message() {
    let bank = MemoryBank::new();
    bank.add(problem("p1", "", "2+2=?", None), "algebra");
    let store = Arc::new(MemoryStore::new());
    let chat = ChatOrchestrator::new(store.clone(), Arc::new(FailingLlm), Arc::new(bank), PromptResolver::new(Prompts::default()));

    let err = chat.create_problem_chat(Chat::new("T", "u1"), "p1", TaskType::Tutor).await.unwrap_err();
    assert!(matches!(err, ServiceError::Llm(_)));
    let chats = store.chats_for_user("u1").await.unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(store.messages_for_chat(chats[0].id).await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn problem_chat_rebinds_in_progress_task() {
    let f = fixture();
    let task = UserTask {
      id: Uuid::new_v4(),
      user_id: "u1".into(),
      problem_id: "p1".into(),
      problem_hash: "p1".into(),
      display_name: "2+2".into(),
      task_type: TaskType::Guided,
      status: UserTaskStatus::InProgress,
      associated_chat_id: Some(Uuid::new_v4()),
    };
    f.store.insert_user_task(task.clone()).await.unwrap();

    let chat = f.chat.get_or_create_problem_chat("p1", "u1", "2+2", TaskType::Guided).await.unwrap();
    assert!(chat.name.starts_with("2+2 "));
    assert_eq!(f.store.user_task(task.id).await.unwrap().unwrap().associated_chat_id, Some(chat.id));
  }

  #[tokio::test]
  async fn problem_chat_rebinds_only_the_task_of_its_type() {
    let f = fixture();
    let elsewhere = Uuid::new_v4();
    let task = |task_type| UserTask {
      id: Uuid::new_v4(),
      user_id: "u1".into(),
      problem_id: "p1".into(),
      problem_hash: "p1".into(),
      display_name: "2+2".into(),
      task_type,
      status: UserTaskStatus::InProgress,
      associated_chat_id: Some(elsewhere),
    };
    let guided = task(TaskType::Guided);
    let exam = task(TaskType::Exam);
    f.store.insert_user_task(guided.clone()).await.unwrap();
    f.store.insert_user_task(exam.clone()).await.unwrap();

    let chat = f.chat.get_or_create_problem_chat("p1", "u1", "2+2", TaskType::Guided).await.unwrap();
    assert_eq!(f.store.user_task(guided.id).await.unwrap().unwrap().associated_chat_id, Some(chat.id));
    assert_eq!(f.store.user_task(exam.id).await.unwrap().unwrap().associated_chat_id, Some(elsewhere));
    assert_eq!(f.chat.bound_task_type(chat.id).await.unwrap(), Some(TaskType::Guided));
  }

  #[tokio::test]
  async fn post_message_persists_exchange() {
    let f = fixture();
    let chat = f.chat.create_casual_chat(Chat::new("c", "u1")).await.unwrap();
    let reply = f.chat.post_message(Message::new(chat.id, "what is 2+2?", MessageType::User)).await.unwrap();
    assert_eq!(reply, "Let's start.");

    let messages = f.chat.visible_messages(chat.id).await.unwrap();
    let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, [f.prompts.default_system_prompt.as_str(), "what is 2+2?", "Let's start."]);
    assert_eq!(f.llm.last_call().task_type, TaskType::Tutor);
  }

  #[tokio::test]
  async fn empty_reply_is_not_persisted() {
    let store = Arc::new(MemoryStore::new());
    let llm = Arc::new(ScriptedLlm::new(""));
    let chat = ChatOrchestrator::new(store.clone(), llm, Arc::new(MemoryBank::new()), PromptResolver::new(Prompts::default()));
    let c = chat.create_casual_chat(Chat::new("c", "u1")).await.unwrap();
    let reply = chat.post_message(Message::new(c.id, "hi", MessageType::User)).await.unwrap();
    assert!(reply.is_empty());
    assert_eq!(store.messages_for_chat(c.id).await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn missing_chat_yields_empty_reply() {
    let f = fixture();
    let reply = f.chat.post_message(Message::new(Uuid::new_v4(), "hi", MessageType::User)).await.unwrap();
    assert!(reply.is_empty());
    assert!(f.llm.calls().is_empty());
  }

  async fn chat_with_system(f: &Fixture, system: &str, chat_type: ChatType) -> Uuid {
    let mut chat = Chat::new("c", "u1");
    chat.chat_type = chat_type;
    f.store.insert_chat(chat.clone()).await.unwrap();
    f.store.append_message(Message::new(chat.id, system, MessageType::System)).await.unwrap();
    let solution = PromptResolver::new(f.prompts.clone()).tutor_solution("x = 4");
    f.store.append_message(Message::hidden(chat.id, solution, MessageType::User)).await.unwrap();
    chat.id
  }

  #[tokio::test]
  async fn exam_mode_strips_injected_solution() {
    let f = fixture();
    let id = chat_with_system(&f, &f.prompts.exam_system_prompt, ChatType::ProblemSolver).await;
    f.chat.post_message(Message::new(id, "my answer is 4", MessageType::User)).await.unwrap();

    let call = f.llm.last_call();
    assert_eq!(call.task_type, TaskType::Exam);
    assert!(call.history.iter().all(|m| !m.text.contains("x = 4")));
    assert_eq!(call.history.len(), 2);
  }

  #[tokio::test]
  async fn non_exam_modes_keep_injected_solution() {
    for (system, expected) in [
      (Prompts::default().learning_system_prompt, TaskType::Learning),
      (Prompts::default().guided_system_prompt, TaskType::Guided),
      (Prompts::default().tutor_system_prompt, TaskType::Tutor),
      ("something custom".to_string(), TaskType::Tutor),
    ] {
      let f = fixture();
      let id = chat_with_system(&f, &system, ChatType::ProblemSolver).await;
      f.chat.post_message(Message::new(id, "help", MessageType::User)).await.unwrap();
      let call = f.llm.last_call();
      assert_eq!(call.task_type, expected);
      assert!(call.history.iter().any(|m| m.text.contains("x = 4")));
    }
  }

  #[tokio::test]
  async fn casual_chats_are_always_tutor() {
    let f = fixture();
    let id = chat_with_system(&f, &f.prompts.exam_system_prompt, ChatType::Chat).await;
    f.chat.post_message(Message::new(id, "help", MessageType::User)).await.unwrap();
    let call = f.llm.last_call();
    assert_eq!(call.task_type, TaskType::Tutor);
    assert!(call.history.iter().any(|m| m.text.contains("x = 4")));
  }

  #[tokio::test]
  async fn bound_task_type_overrides_system_prompt() {
    let f = fixture();
    let id = chat_with_system(&f, &f.prompts.learning_system_prompt, ChatType::ProblemSolver).await;
    f.store
      .insert_user_task(UserTask {
        id: Uuid::new_v4(),
        user_id: "u1".into(),
        problem_id: "p".into(),
        problem_hash: "p".into(),
        display_name: "P".into(),
        task_type: TaskType::Exam,
        status: UserTaskStatus::InProgress,
        associated_chat_id: Some(id),
      })
      .await
      .unwrap();

    f.chat.post_message(Message::new(id, "answer", MessageType::User)).await.unwrap();
    let call = f.llm.last_call();
    assert_eq!(call.task_type, TaskType::Exam);
    assert!(call.history.iter().all(|m| !m.text.contains("x = 4")));
  }

  #[tokio::test]
  async fn streaming_reply_is_persisted_when_complete() {
    let f = fixture();
    let chat = f.chat.create_casual_chat(Chat::new("c", "u1")).await.unwrap();
    let stream = f
      .chat
      .post_message_streaming(Message::new(chat.id, "hi", MessageType::User), CancellationToken::new())
      .await
      .unwrap()
      .unwrap();
    let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;
    assert!(chunks.len() > 1);
    assert_eq!(chunks.concat(), "Let's start.");

    let messages = f.store.messages_for_chat(chat.id).await.unwrap();
    assert_eq!(messages.last().unwrap().text, "Let's start.");
    assert_eq!(messages.len(), 3);
  }

  #[tokio::test]
  async fn cancelled_stream_keeps_user_message_but_drops_reply() {
    let f = fixture();
    let chat = f.chat.create_casual_chat(Chat::new("c", "u1")).await.unwrap();
    let cancel = CancellationToken::new();
    let mut stream = f
      .chat
      .post_message_streaming(Message::new(chat.id, "hi", MessageType::User), cancel.clone())
      .await
      .unwrap()
      .unwrap();
    assert!(stream.next().await.is_some());
    cancel.cancel();
    while stream.next().await.is_some() {}

    let messages = f.store.messages_for_chat(chat.id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].text, "hi");
  }
}
