//! LLM gateway: chat history -> chat.completions, blocking or streamed.
//!
//! Two model endpoints are used: the "chat" model for tutoring turns and the
//! "solver" model for one-shot solve/extract calls. No retries, no rate
//! limiting: every upstream failure is returned to the caller as `LlmError`.
//!
//! NOTE: We never log the API key; request/response bodies only go to the
//! interaction log (see `llm_log`).

use std::{pin::Pin, time::Duration};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::config::{LlmConfig, ModelConfig};
use crate::domain::{Message, MessageType, TaskType};
use crate::llm_log::InteractionLog;
use crate::prompts::PromptResolver;

#[derive(Debug, Error)]
pub enum LlmError {
  #[error("LLM request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("LLM HTTP {status}: {message}")]
  Api { status: u16, message: String },

  #[error("LLM returned an unexpected payload: {0}")]
  Payload(String),
}

/// Forward-only, single-consumer sequence of reply chunks.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

#[async_trait]
pub trait LlmGateway: Send + Sync {
  /// One blocking completion over the full history.
  async fn generate_reply(&self, history: &[Message], task_type: TaskType) -> Result<String, LlmError>;

  /// Streamed completion. `cancel` is checked once per received chunk; the
  /// accumulated text is logged when the stream ends, is cancelled, or is dropped.
  fn generate_reply_streaming(&self, history: Vec<Message>, task_type: TaskType, cancel: CancellationToken) -> ReplyStream;

  async fn solve(&self, problem: &str) -> Result<String, LlmError>;

  async fn extract_answer(&self, problem: &str, solution: &str) -> Result<String, LlmError>;
}

#[derive(Clone)]
pub struct OpenAiGateway {
  client: reqwest::Client,
  chat_model: ModelConfig,
  solver_model: ModelConfig,
  prompts: PromptResolver,
  log: InteractionLog,
}

impl OpenAiGateway {
  pub fn new(cfg: &LlmConfig, prompts: PromptResolver, log: InteractionLog) -> Result<Self, LlmError> {
    let client = reqwest::Client::builder()
      .connect_timeout(Duration::from_secs(10))
      .timeout(Duration::from_secs(cfg.timeout_secs))
      .build()?;
    if cfg.chat_model.token.is_empty() {
      error!(target: "llm", "Chat model token is empty; model calls will be rejected upstream");
    }
    Ok(Self {
      client,
      chat_model: cfg.chat_model.clone(),
      solver_model: cfg.solver_model.clone(),
      prompts,
      log,
    })
  }

  pub fn chat_model_name(&self) -> &str {
    &self.chat_model.model
  }

  pub fn solver_model_name(&self) -> &str {
    &self.solver_model.model
  }

  async fn send(&self, model: &ModelConfig, messages: Vec<ChatMessageReq>, stream: bool) -> Result<reqwest::Response, LlmError> {
    let url = format!("{}/chat/completions", model.url.trim_end_matches('/'));
    let req = ChatCompletionRequest { model: model.model.clone(), messages, temperature: None, stream };

    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, "math-tutor-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", model.token))
      .json(&req)
      .send()
      .await?;

    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      let message = extract_openai_error(&body).unwrap_or(body);
      return Err(LlmError::Api { status, message });
    }
    Ok(res)
  }

  /// Plain-text chat completion against `model`.
  #[instrument(level = "info", skip(self, model, messages), fields(model = %model.model, messages = messages.len()))]
  async fn chat_plain(&self, model: &ModelConfig, messages: Vec<ChatMessageReq>) -> Result<String, LlmError> {
    let start = std::time::Instant::now();
    let res = self.send(model, messages, false).await?;
    let body: ChatCompletionResponse = res.json().await?;
    if let Some(usage) = &body.usage {
      info!(target: "llm", prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, elapsed = ?start.elapsed(), "OpenAI usage");
    }
    let choice = body
      .choices
      .into_iter()
      .next()
      .ok_or_else(|| LlmError::Payload("response has no choices".into()))?;
    Ok(choice.message.content.unwrap_or_default())
  }
}

#[async_trait]
impl LlmGateway for OpenAiGateway {
  #[instrument(level = "info", skip(self, history), fields(%task_type, history_len = history.len()))]
  async fn generate_reply(&self, history: &[Message], task_type: TaskType) -> Result<String, LlmError> {
    let reply = self.chat_plain(&self.chat_model, to_wire(history)).await?;
    self.log.interaction(task_type, history, &reply, &self.chat_model.model).await;
    Ok(reply)
  }

  fn generate_reply_streaming(&self, history: Vec<Message>, task_type: TaskType, cancel: CancellationToken) -> ReplyStream {
    let this = self.clone();
    Box::pin(async_stream::stream! {
      let mut transcript = Transcript::new(this.log.clone(), task_type, history.clone(), this.chat_model.model.clone());
      match this.send(&this.chat_model, to_wire(&history), true).await {
        Err(e) => {
          transcript.discard();
          yield Err(e);
        }
        Ok(res) => {
          let mut body = res.bytes_stream();
          let mut decoder = SseDecoder::default();
          'chunks: while let Some(chunk) = body.next().await {
            if cancel.is_cancelled() {
              info!(target: "llm", %task_type, received = transcript.text.len(), "Streaming cancelled by caller");
              break;
            }
            let bytes = match chunk {
              Ok(b) => b,
              Err(e) => {
                yield Err(LlmError::Http(e));
                break;
              }
            };
            for event in decoder.push(&bytes) {
              match event {
                SseEvent::Done => break 'chunks,
                SseEvent::Data(data) => match serde_json::from_str::<StreamChunk>(&data) {
                  Ok(parsed) => {
                    let delta = parsed
                      .choices
                      .into_iter()
                      .next()
                      .and_then(|c| c.delta.content)
                      .unwrap_or_default();
                    if !delta.is_empty() {
                      transcript.text.push_str(&delta);
                      yield Ok(delta);
                    }
                  }
                  Err(e) => error!(target: "llm", error = %e, "Skipping malformed stream chunk"),
                },
              }
            }
          }
        }
      }
    })
  }

  #[instrument(level = "info", skip(self, problem), fields(problem_len = problem.len()))]
  async fn solve(&self, problem: &str) -> Result<String, LlmError> {
    let messages = vec![
      ChatMessageReq::new("system", self.prompts.solver_system()),
      ChatMessageReq::new("user", &self.prompts.solver_task(problem)),
    ];
    let solution = self.chat_plain(&self.solver_model, messages).await?;
    self.log.solution(problem, &solution, &self.solver_model.model).await;
    Ok(solution)
  }

  #[instrument(level = "info", skip(self, problem, solution), fields(problem_len = problem.len(), solution_len = solution.len()))]
  async fn extract_answer(&self, problem: &str, solution: &str) -> Result<String, LlmError> {
    let messages = vec![
      ChatMessageReq::new("system", self.prompts.extract_answer_system()),
      ChatMessageReq::new("user", &self.prompts.extract_answer(problem, solution)),
    ];
    let answer = self.chat_plain(&self.solver_model, messages).await?;
    info!(target: "llm", extracted = %crate::util::trunc_for_log(&answer, 200), "Extracted answer");
    Ok(answer)
  }
}

/// Accumulates streamed text and submits it to the interaction log on drop,
/// which covers completion, cancellation and the consumer dropping the stream.
struct Transcript {
  log: InteractionLog,
  task_type: TaskType,
  history: Vec<Message>,
  model: String,
  text: String,
  discarded: bool,
}

impl Transcript {
  fn new(log: InteractionLog, task_type: TaskType, history: Vec<Message>, model: String) -> Self {
    Self { log, task_type, history, model, text: String::new(), discarded: false }
  }

  fn discard(&mut self) {
    self.discarded = true;
  }
}

impl Drop for Transcript {
  fn drop(&mut self) {
    if self.discarded {
      return;
    }
    self.log.submit_interaction(
      self.task_type,
      std::mem::take(&mut self.history),
      std::mem::take(&mut self.text),
      std::mem::take(&mut self.model),
    );
  }
}

fn to_wire(history: &[Message]) -> Vec<ChatMessageReq> {
  history
    .iter()
    .map(|m| {
      let role = match m.message_type {
        MessageType::System => "system",
        MessageType::User => "user",
        MessageType::Assistant => "assistant",
      };
      ChatMessageReq::new(role, &m.text)
    })
    .collect()
}

#[derive(Debug, PartialEq)]
enum SseEvent {
  Data(String),
  Done,
}

/// Line-oriented server-sent-events decoder tolerant of arbitrary chunk splits.
#[derive(Default)]
struct SseDecoder {
  buf: Vec<u8>,
}

impl SseDecoder {
  fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
    self.buf.extend_from_slice(bytes);
    let mut events = Vec::new();
    while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
      let line: Vec<u8> = self.buf.drain(..=pos).collect();
      let line = String::from_utf8_lossy(&line);
      let line = line.trim_end_matches(['\n', '\r']);
      if let Some(data) = line.strip_prefix("data:") {
        let data = data.trim_start();
        if data == "[DONE]" {
          events.push(SseEvent::Done);
        } else if !data.is_empty() {
          events.push(SseEvent::Data(data.to_string()));
        }
      }
    }
    events
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  #[serde(skip_serializing_if = "Option::is_none")]
  temperature: Option<f32>,
  #[serde(skip_serializing_if = "std::ops::Not::not")]
  stream: bool,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }

impl ChatMessageReq {
  fn new(role: &str, content: &str) -> Self {
    Self { role: role.into(), content: content.into() }
  }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct StreamChunk { #[serde(default)] choices: Vec<StreamChoice> }
#[derive(Deserialize)]
struct StreamChoice { delta: StreamDelta }
#[derive(Deserialize)]
struct StreamDelta { #[serde(default)] content: Option<String> }

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}
