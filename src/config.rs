//! Loading application configuration (prompts, task categories, model endpoints,
//! upstream services, auth) from TOML.
//!
//! Every section has defaults, so the server starts without a file. See
//! `AppConfig` for the expected schema.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::TaskType;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub prompts: Prompts,
  /// Task type (name or numeric code) -> problem-bank category name.
  #[serde(default)]
  pub task_mode_titles: BTreeMap<String, String>,
  #[serde(default)]
  pub llm: LlmConfig,
  #[serde(default)]
  pub llm_logging: LlmLoggingConfig,
  #[serde(default)]
  pub geolin: UpstreamConfig,
  #[serde(default)]
  pub problems: UpstreamConfig,
  #[serde(default)]
  pub jwt: JwtConfig,
  #[serde(default)]
  pub admin: AdminConfig,
  #[serde(default)]
  pub cors: CorsConfig,
}

impl AppConfig {
  /// Category name for a task type. Keys may be the type name or its numeric code.
  pub fn category_for(&self, task_type: TaskType) -> Option<&str> {
    self
      .task_mode_titles
      .get(task_type.as_str())
      .or_else(|| self.task_mode_titles.get(&task_type.code().to_string()))
      .map(String::as_str)
  }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_port")]
  pub port: u16,
  /// Sizes the tokio worker pool; `None` keeps the runtime default.
  #[serde(default)]
  pub worker_threads: Option<usize>,
}

fn default_port() -> u16 { 3000 }

impl Default for ServerConfig {
  fn default() -> Self {
    Self { port: default_port(), worker_threads: None }
  }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ModelConfig {
  #[serde(default = "default_model_url")]
  pub url: String,
  #[serde(default)]
  pub token: String,
  #[serde(default = "default_model_name")]
  pub model: String,
}

fn default_model_url() -> String { "https://api.openai.com/v1".into() }
fn default_model_name() -> String { "gpt-4o-mini".into() }

#[derive(Clone, Debug, Deserialize)]
pub struct LlmConfig {
  #[serde(default = "default_model")]
  pub chat_model: ModelConfig,
  #[serde(default = "default_model")]
  pub solver_model: ModelConfig,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_model() -> ModelConfig {
  ModelConfig { url: default_model_url(), token: String::new(), model: default_model_name() }
}
fn default_timeout_secs() -> u64 { 120 }

impl Default for LlmConfig {
  fn default() -> Self {
    Self { chat_model: default_model(), solver_model: default_model(), timeout_secs: default_timeout_secs() }
  }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LlmLoggingConfig {
  #[serde(default)]
  pub enabled: bool,
  #[serde(default = "default_llm_log_path")]
  pub log_file_path: String,
}

fn default_llm_log_path() -> String { "logs/llm_interactions.log".into() }

impl Default for LlmLoggingConfig {
  fn default() -> Self {
    Self { enabled: false, log_file_path: default_llm_log_path() }
  }
}

#[derive(Clone, Debug, Deserialize)]
pub struct UpstreamConfig {
  #[serde(default = "default_upstream_url")]
  pub base_url: String,
  #[serde(default = "default_upstream_timeout")]
  pub timeout_secs: u64,
}

fn default_upstream_url() -> String { "http://localhost:8000".into() }
fn default_upstream_timeout() -> u64 { 20 }

impl Default for UpstreamConfig {
  fn default() -> Self {
    Self { base_url: default_upstream_url(), timeout_secs: default_upstream_timeout() }
  }
}

#[derive(Clone, Debug, Deserialize)]
pub struct JwtConfig {
  #[serde(default)]
  pub key: String,
  #[serde(default = "default_jwt_issuer")]
  pub issuer: String,
  #[serde(default = "default_jwt_audience")]
  pub audience: String,
  #[serde(default = "default_jwt_days")]
  pub expires_days: i64,
}

fn default_jwt_issuer() -> String { "math-tutor-backend".into() }
fn default_jwt_audience() -> String { "math-tutor-frontend".into() }
fn default_jwt_days() -> i64 { 7 }

impl Default for JwtConfig {
  fn default() -> Self {
    Self {
      key: String::new(),
      issuer: default_jwt_issuer(),
      audience: default_jwt_audience(),
      expires_days: default_jwt_days(),
    }
  }
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AdminConfig {
  #[serde(default)]
  pub email: String,
  #[serde(default)]
  pub password: String,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct CorsConfig {
  #[serde(default)]
  pub enabled: bool,
  /// `;`-separated list of allowed origins.
  #[serde(default)]
  pub origin: String,
}

/// Prompt templates. `{solution}`, `{problem}` are substituted where present.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub default_system_prompt: String,
  pub tutor_system_prompt: String,
  pub learning_system_prompt: String,
  pub guided_system_prompt: String,
  pub exam_system_prompt: String,
  pub tutor_initial_prompt: String,
  pub learning_initial_prompt: String,
  pub guided_initial_prompt: String,
  pub exam_initial_prompt: String,
  pub tutor_solution_prompt: String,
  /// Literal phrase carried by every injected solution message.
  pub solution_marker: String,
  pub solver_system_prompt: String,
  pub solver_task_prompt: String,
  pub extract_answer_system_prompt: String,
  pub extract_answer_prompt: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      default_system_prompt: "You are a friendly mathematics assistant. Answer clearly and use LaTeX for formulas.".into(),
      tutor_system_prompt: "You are a mathematics tutor. Help the student solve the problem step by step without giving away the final answer.".into(),
      learning_system_prompt: "You are a mathematics teacher. Explain the solution of the problem in full, as a worked example the student can learn from.".into(),
      guided_system_prompt: "You are a mathematics tutor. Guide the student with leading questions; reveal one step at a time only after the student tries.".into(),
      exam_system_prompt: "You are an examiner. Do not help with the solution. Only check the student's reasoning and answer.".into(),
      tutor_initial_prompt: "Greet the student and ask how they would start solving the problem.".into(),
      learning_initial_prompt: "Present a complete worked solution of the problem, explaining each step.".into(),
      guided_initial_prompt: "Ask the student a first leading question about the problem.".into(),
      exam_initial_prompt: "Tell the student the exam has started and ask for their solution.".into(),
      tutor_solution_prompt: "Here is the correct solution of the problem. Never show it to the student directly:\n{solution}".into(),
      solution_marker: "Here is the correct solution of the problem".into(),
      solver_system_prompt: "You are an expert mathematician. Solve problems rigorously and state the final answer explicitly.".into(),
      solver_task_prompt: "Solve the following problem:\n{problem}".into(),
      extract_answer_system_prompt: "You extract final answers from worked solutions. Output ONLY the answer.".into(),
      extract_answer_prompt: "Problem:\n{problem}\n\nSolution:\n{solution}\n\nWhat is the final answer?".into(),
    }
  }
}

/// Parse a TOML document into `AppConfig`.
pub fn parse_config(s: &str) -> Result<AppConfig, toml::de::Error> {
  toml::from_str::<AppConfig>(s)
}

/// Load `AppConfig` from TUTOR_CONFIG_PATH, then apply environment overrides.
/// On any parsing/IO error the defaults are used.
pub fn load_config_from_env() -> AppConfig {
  let mut cfg = match std::env::var("TUTOR_CONFIG_PATH") {
    Ok(path) => match std::fs::read_to_string(&path) {
      Ok(s) => match parse_config(&s) {
        Ok(cfg) => {
          info!(target: "tutor_backend", %path, "Loaded config (TOML)");
          cfg
        }
        Err(e) => {
          error!(target: "tutor_backend", %path, error = %e, "Failed to parse TOML config; using defaults");
          AppConfig::default()
        }
      },
      Err(e) => {
        error!(target: "tutor_backend", %path, error = %e, "Failed to read TOML config file; using defaults");
        AppConfig::default()
      }
    },
    Err(_) => {
      info!(target: "tutor_backend", "TUTOR_CONFIG_PATH not set; using default config");
      AppConfig::default()
    }
  };
  apply_env_overrides(&mut cfg, |k| std::env::var(k).ok());
  cfg
}

fn apply_env_overrides(cfg: &mut AppConfig, get: impl Fn(&str) -> Option<String>) {
  if let Some(port) = get("PORT").and_then(|p| p.parse::<u16>().ok()) {
    cfg.server.port = port;
  }
  if let Some(key) = get("OPENAI_API_KEY") {
    for model in [&mut cfg.llm.chat_model, &mut cfg.llm.solver_model] {
      if model.token.is_empty() {
        model.token = key.clone();
      }
    }
  }
  if let Some(key) = get("JWT_KEY") { cfg.jwt.key = key; }
  if let Some(email) = get("ADMIN_EMAIL") { cfg.admin.email = email; }
  if let Some(password) = get("ADMIN_PASSWORD") { cfg.admin.password = password; }
}
