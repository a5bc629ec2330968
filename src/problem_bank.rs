//! Problem bank: stored problem statements, optional model solutions, and the
//! category ("type") and name indices used to build task lists.
//!
//! Upstream routes (relative to `problems.base_url`):
//!   GET  /problems                 all problems
//!   GET  /problems/{id}            one problem (404 when absent)
//!   GET  /problems/name/{name}     problems attached to a name
//!   GET  /problems/type/{type}     problems of a category
//!   GET  /types                    category names
//!   POST /problems                 create, returns the stored problem
//!   POST /problems/name            attach a name to a problem id

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

use crate::config::UpstreamConfig;
use crate::error::UpstreamError;
use crate::geolin::ProblemGenerator;
use crate::upstream::JsonClient;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct GeolinKey {
  #[serde(default)]
  pub hash: String,
  #[serde(default)]
  pub seed: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ProblemStep {
  #[serde(default)]
  pub order: i32,
  #[serde(default)]
  pub prerequisites: Value,
  #[serde(default)]
  pub transition: Value,
  #[serde(default)]
  pub outcomes: Value,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Solution {
  #[serde(default)]
  pub steps: Vec<ProblemStep>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Problem {
  #[serde(rename = "_id", default)]
  pub id: String,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub statement: String,
  /// Free-form: usually a string, sometimes structured JSON.
  #[serde(default)]
  pub llm_solution: Value,
  #[serde(default)]
  pub geolin_ans_key: GeolinKey,
  #[serde(default)]
  pub result: String,
  #[serde(default)]
  pub solution: Solution,
}

impl Problem {
  /// Solution text for the tutor, if any. Non-string payloads are rendered as JSON.
  pub fn solution_text(&self) -> Option<String> {
    let text = match &self.llm_solution {
      Value::Null => return None,
      Value::String(s) => s.clone(),
      other => other.to_string(),
    };
    if text.trim().is_empty() { None } else { Some(text) }
  }

  /// Title, or the first 50 characters of the statement with an ellipsis.
  pub fn display_name(&self) -> String {
    if self.title.trim().is_empty() {
      crate::util::ellipsize(&self.statement, 50)
    } else {
      self.title.clone()
    }
  }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProblemRequest {
  pub statement: String,
  pub geolin_ans_key: GeolinKey,
  #[serde(default)]
  pub result: String,
  #[serde(default)]
  pub solution: Solution,
}

#[derive(Serialize)]
struct NameRequest<'a> {
  name: &'a str,
  problem_id: &'a str,
}

#[async_trait]
pub trait ProblemBank: Send + Sync {
  async fn problems(&self) -> Result<Vec<Problem>, UpstreamError>;
  /// `None` when the bank answers 404.
  async fn problem(&self, id: &str) -> Result<Option<Problem>, UpstreamError>;
  /// Empty when the bank answers 404.
  async fn problems_by_name(&self, name: &str) -> Result<Vec<Problem>, UpstreamError>;
  /// Empty when the bank answers 404.
  async fn problems_by_type(&self, type_name: &str) -> Result<Vec<Problem>, UpstreamError>;
  async fn types(&self) -> Result<Vec<String>, UpstreamError>;
  async fn create_problem(&self, request: ProblemRequest) -> Result<Problem, UpstreamError>;
  async fn name_problem(&self, name: &str, problem_id: &str) -> Result<(), UpstreamError>;
}

#[derive(Clone, Debug)]
pub struct HttpProblemBank {
  http: JsonClient,
}

impl HttpProblemBank {
  pub fn new(cfg: &UpstreamConfig) -> Result<Self, UpstreamError> {
    Ok(Self { http: JsonClient::new("problem_bank", cfg)? })
  }
}

fn empty_on_404<T: Default>(res: Result<T, UpstreamError>) -> Result<T, UpstreamError> {
  match res {
    Err(e) if e.is_not_found() => Ok(T::default()),
    other => other,
  }
}

#[async_trait]
impl ProblemBank for HttpProblemBank {
  async fn problems(&self) -> Result<Vec<Problem>, UpstreamError> {
    self.http.get(&["problems"], &[]).await
  }

  async fn problem(&self, id: &str) -> Result<Option<Problem>, UpstreamError> {
    empty_on_404(self.http.get(&["problems", id], &[]).await.map(Some))
  }

  async fn problems_by_name(&self, name: &str) -> Result<Vec<Problem>, UpstreamError> {
    empty_on_404(self.http.get(&["problems", "name", name], &[]).await)
  }

  async fn problems_by_type(&self, type_name: &str) -> Result<Vec<Problem>, UpstreamError> {
    empty_on_404(self.http.get(&["problems", "type", type_name], &[]).await)
  }

  async fn types(&self) -> Result<Vec<String>, UpstreamError> {
    self.http.get(&["types"], &[]).await
  }

  async fn create_problem(&self, request: ProblemRequest) -> Result<Problem, UpstreamError> {
    self.http.post(&["problems"], &request).await
  }

  async fn name_problem(&self, name: &str, problem_id: &str) -> Result<(), UpstreamError> {
    self.http.post_unit(&["problems", "name"], &NameRequest { name, problem_id }).await
  }
}

/// Draws `count` generator variations of `problem_hash`, stores each in the
/// bank and attaches `name` to it. Stops at the first upstream failure.
#[instrument(level = "info", skip(bank, generator))]
pub async fn generate_variations(
  bank: &dyn ProblemBank,
  generator: &dyn ProblemGenerator,
  name: &str,
  problem_hash: &str,
  count: usize,
) -> Result<Vec<Problem>, UpstreamError> {
  let mut created = Vec::with_capacity(count);
  for _ in 0..count {
    let seed: i64 = rand::thread_rng().gen_range(0..i64::from(i32::MAX));
    let condition = generator.problem_condition(problem_hash, seed, "ru").await?;
    let problem = bank
      .create_problem(ProblemRequest {
        statement: condition.condition,
        geolin_ans_key: GeolinKey { hash: problem_hash.to_string(), seed },
        ..ProblemRequest::default()
      })
      .await?;
    bank.name_problem(name, &problem.id).await?;
    created.push(problem);
  }
  info!(target: "upstream", %name, %problem_hash, created = created.len(), "Generated problem variations");
  Ok(created)
}
