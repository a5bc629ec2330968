//! In-crate fakes for the external collaborators: a scripted model gateway
//! that records what it was asked, an in-memory problem bank, a stub problem
//! generator, and a router harness for handler tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
  body::Body,
  http::{header, Request, StatusCode},
  Router,
};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::config::AppConfig;
use crate::domain::{Message, Role, TaskType, User};
use crate::error::UpstreamError;
use crate::geolin::{AnswerCheck, AnswerCheckRequest, ProblemCondition, ProblemGenerator, ProblemInfo, ProblemPage};
use crate::llm::{LlmError, LlmGateway, ReplyStream};
use crate::problem_bank::{Problem, ProblemBank, ProblemRequest};
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::{MemoryStore, Store};

#[derive(Clone, Debug)]
pub struct RecordedCall {
  pub history: Vec<Message>,
  pub task_type: TaskType,
}

/// Replies are served from a queue, then `fallback` forever.
pub struct ScriptedLlm {
  queue: Mutex<VecDeque<String>>,
  fallback: String,
  calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLlm {
  pub fn new(fallback: &str) -> Self {
    Self { queue: Mutex::new(VecDeque::new()), fallback: fallback.to_string(), calls: Mutex::new(Vec::new()) }
  }

  pub fn with_replies(fallback: &str, replies: &[&str]) -> Self {
    let llm = Self::new(fallback);
    llm.queue.lock().unwrap().extend(replies.iter().map(|r| r.to_string()));
    llm
  }

  pub fn calls(&self) -> Vec<RecordedCall> {
    self.calls.lock().unwrap().clone()
  }

  pub fn last_call(&self) -> RecordedCall {
    self.calls().pop().expect("no model calls recorded")
  }

  fn next(&self, history: &[Message], task_type: TaskType) -> String {
    self.calls.lock().unwrap().push(RecordedCall { history: history.to_vec(), task_type });
    self.queue.lock().unwrap().pop_front().unwrap_or_else(|| self.fallback.clone())
  }
}

#[async_trait]
impl LlmGateway for ScriptedLlm {
  async fn generate_reply(&self, history: &[Message], task_type: TaskType) -> Result<String, LlmError> {
    Ok(self.next(history, task_type))
  }

  /// Streams the reply one whitespace-separated word at a time.
  fn generate_reply_streaming(&self, history: Vec<Message>, task_type: TaskType, cancel: CancellationToken) -> ReplyStream {
    let reply = self.next(&history, task_type);
    let chunks: Vec<String> = reply.split_inclusive(' ').map(str::to_string).collect();
    Box::pin(async_stream::stream! {
      for chunk in chunks {
        if cancel.is_cancelled() {
          break;
        }
        yield Ok(chunk);
        tokio::task::yield_now().await;
      }
    })
  }

  async fn solve(&self, problem: &str) -> Result<String, LlmError> {
    Ok(format!("solution of {problem}"))
  }

  async fn extract_answer(&self, _problem: &str, solution: &str) -> Result<String, LlmError> {
    Ok(solution.rsplit(' ').next().unwrap_or_default().to_string())
  }
}

/// Gateway whose every call fails.
pub struct FailingLlm;

#[async_trait]
impl LlmGateway for FailingLlm {
  async fn generate_reply(&self, _history: &[Message], _task_type: TaskType) -> Result<String, LlmError> {
    Err(LlmError::Api { status: 503, message: "model unavailable".into() })
  }

  fn generate_reply_streaming(&self, _history: Vec<Message>, _task_type: TaskType, _cancel: CancellationToken) -> ReplyStream {
    Box::pin(futures::stream::once(async { Err(LlmError::Api { status: 503, message: "model unavailable".into() }) }))
  }

  async fn solve(&self, _problem: &str) -> Result<String, LlmError> {
    Err(LlmError::Api { status: 503, message: "model unavailable".into() })
  }

  async fn extract_answer(&self, _problem: &str, _solution: &str) -> Result<String, LlmError> {
    Err(LlmError::Api { status: 503, message: "model unavailable".into() })
  }
}

/// Streams `first` and then waits until cancelled; the reply never completes.
pub struct StallingLlm {
  first: String,
  tokens: Mutex<Vec<CancellationToken>>,
}

impl StallingLlm {
  pub fn new(first: &str) -> Self {
    Self { first: first.to_string(), tokens: Mutex::new(Vec::new()) }
  }

  /// Whether every streamed reply so far saw its token cancelled.
  pub fn all_cancelled(&self) -> bool {
    let tokens = self.tokens.lock().unwrap();
    !tokens.is_empty() && tokens.iter().all(CancellationToken::is_cancelled)
  }
}

#[async_trait]
impl LlmGateway for StallingLlm {
  async fn generate_reply(&self, _history: &[Message], _task_type: TaskType) -> Result<String, LlmError> {
    Ok(self.first.clone())
  }

  fn generate_reply_streaming(&self, _history: Vec<Message>, _task_type: TaskType, cancel: CancellationToken) -> ReplyStream {
    self.tokens.lock().unwrap().push(cancel.clone());
    let first = self.first.clone();
    Box::pin(async_stream::stream! {
      yield Ok(first);
      cancel.cancelled().await;
    })
  }

  async fn solve(&self, problem: &str) -> Result<String, LlmError> {
    Ok(problem.to_string())
  }

  async fn extract_answer(&self, _problem: &str, solution: &str) -> Result<String, LlmError> {
    Ok(solution.to_string())
  }
}

#[derive(Default)]
pub struct MemoryBank {
  problems: Mutex<Vec<Problem>>,
  by_type: Mutex<HashMap<String, Vec<String>>>,
  by_name: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryBank {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&self, problem: Problem, type_name: &str) {
    self.by_type.lock().unwrap().entry(type_name.to_string()).or_default().push(problem.id.clone());
    self.problems.lock().unwrap().push(problem);
  }

  fn collect(&self, ids: Option<Vec<String>>) -> Vec<Problem> {
    let ids = ids.unwrap_or_default();
    self.problems.lock().unwrap().iter().filter(|p| ids.contains(&p.id)).cloned().collect()
  }
}

pub fn problem(id: &str, title: &str, statement: &str, solution: Option<&str>) -> Problem {
  Problem {
    id: id.to_string(),
    title: title.to_string(),
    statement: statement.to_string(),
    llm_solution: solution.map(|s| serde_json::Value::String(s.to_string())).unwrap_or_default(),
    ..Problem::default()
  }
}

#[async_trait]
impl ProblemBank for MemoryBank {
  async fn problems(&self) -> Result<Vec<Problem>, UpstreamError> {
    Ok(self.problems.lock().unwrap().clone())
  }

  async fn problem(&self, id: &str) -> Result<Option<Problem>, UpstreamError> {
    Ok(self.problems.lock().unwrap().iter().find(|p| p.id == id).cloned())
  }

  async fn problems_by_name(&self, name: &str) -> Result<Vec<Problem>, UpstreamError> {
    let ids = self.by_name.lock().unwrap().get(name).cloned();
    Ok(self.collect(ids))
  }

  async fn problems_by_type(&self, type_name: &str) -> Result<Vec<Problem>, UpstreamError> {
    let ids = self.by_type.lock().unwrap().get(type_name).cloned();
    Ok(self.collect(ids))
  }

  async fn types(&self) -> Result<Vec<String>, UpstreamError> {
    let mut types: Vec<String> = self.by_type.lock().unwrap().keys().cloned().collect();
    types.sort();
    Ok(types)
  }

  async fn create_problem(&self, request: ProblemRequest) -> Result<Problem, UpstreamError> {
    let mut problems = self.problems.lock().unwrap();
    let p = Problem {
      id: format!("gen-{}", problems.len() + 1),
      statement: request.statement,
      geolin_ans_key: request.geolin_ans_key,
      result: request.result,
      solution: request.solution,
      ..Problem::default()
    };
    problems.push(p.clone());
    Ok(p)
  }

  async fn name_problem(&self, name: &str, problem_id: &str) -> Result<(), UpstreamError> {
    self.by_name.lock().unwrap().entry(name.to_string()).or_default().push(problem_id.to_string());
    Ok(())
  }
}

/// Generator with one problem per name; verdict 1.0 only for the answer "42".
#[derive(Default)]
pub struct StubGenerator {
  problems: Vec<ProblemInfo>,
}

impl StubGenerator {
  pub fn with_problems(names: &[(&str, &str)]) -> Self {
    Self { problems: names.iter().map(|(name, hash)| ProblemInfo { name: name.to_string(), hash: hash.to_string() }).collect() }
  }
}

#[async_trait]
impl ProblemGenerator for StubGenerator {
  async fn problems_info(&self, _page: u32, _size: u32, prefix: &str) -> Result<ProblemPage, UpstreamError> {
    Ok(ProblemPage { problems: self.problems.iter().filter(|p| p.name.starts_with(prefix)).cloned().collect() })
  }

  async fn problem_condition(&self, hash: &str, seed: i64, _lang: &str) -> Result<ProblemCondition, UpstreamError> {
    Ok(ProblemCondition {
      condition: format!("condition of {hash} #{seed}"),
      problem_params: serde_json::Value::String(format!("{{\"seed\":{seed}}}")),
    })
  }

  async fn check_answer(&self, request: AnswerCheckRequest) -> Result<AnswerCheck, UpstreamError> {
    Ok(AnswerCheck { verdict: if request.answer_attempt.trim() == "42" { 1.0 } else { 0.0 } })
  }
}

/// Router over an in-memory store and fakes, plus helpers to sign users in.
pub struct TestApp {
  pub state: Arc<AppState>,
  pub store: Arc<MemoryStore>,
  pub router: Router,
}

impl TestApp {
  pub fn new(config: AppConfig, llm: Arc<dyn LlmGateway>, bank: Arc<dyn ProblemBank>, generator: Arc<dyn ProblemGenerator>) -> Self {
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(AppState::assemble(config, store.clone(), llm, bank, generator));
    let router = build_router(state.clone());
    Self { state, store, router }
  }

  pub fn basic() -> Self {
    let mut config = AppConfig::default();
    config.jwt.key = "test-signing-key".into();
    Self::new(config, Arc::new(ScriptedLlm::new("ok")), Arc::new(MemoryBank::new()), Arc::new(StubGenerator::default()))
  }

  /// Inserts a user directly and returns it with a valid token.
  pub async fn user(&self, email: &str, admin: bool) -> (User, String) {
    let mut user = User::new(email, "unused".into());
    if admin {
      user.roles.push(Role::Admin);
    }
    self.store.insert_user(user.clone()).await.unwrap();
    let token = self.state.accounts.issue_token(&user).unwrap();
    (user, token)
  }

  pub async fn call(&self, method: &str, uri: &str, token: Option<&str>, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
      req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let req = match body {
      Some(body) => req.header(header::CONTENT_TYPE, "application/json").body(Body::from(body.to_string())).unwrap(),
      None => req.body(Body::empty()).unwrap(),
    };
    let res = self.router.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() { serde_json::Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
  }
}
