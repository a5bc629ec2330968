//! Problem generator ("geolin") client and the two lookups built on it:
//! fetching a parameterised problem by name prefix, and checking an answer.
//!
//! Upstream routes (relative to `geolin.base_url`):
//!   GET  /api/problems?page=&size=&prefix_name=   paged problem index
//!   POST /api/problems/condition                  render a problem for a seed
//!   POST /api/problems/check                      grade an answer attempt

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::config::UpstreamConfig;
use crate::error::{LookupError, UpstreamError};
use crate::upstream::JsonClient;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProblemInfo {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub hash: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProblemPage {
  #[serde(default)]
  pub problems: Vec<ProblemInfo>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProblemCondition {
  #[serde(default)]
  pub condition: String,
  /// JSON document, delivered either as a string or inline.
  #[serde(default)]
  pub problem_params: Value,
}

impl ProblemCondition {
  pub fn params_text(&self) -> String {
    match &self.problem_params {
      Value::Null => String::new(),
      Value::String(s) => s.clone(),
      other => other.to_string(),
    }
  }
}

#[derive(Clone, Debug, Serialize)]
pub struct AnswerCheckRequest {
  pub hash: String,
  pub answer_attempt: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub seed: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub problem_params: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AnswerCheck {
  pub verdict: f64,
}

#[derive(Serialize)]
struct ConditionRequest<'a> {
  hash: &'a str,
  seed: i64,
  lang: &'a str,
}

#[async_trait]
pub trait ProblemGenerator: Send + Sync {
  async fn problems_info(&self, page: u32, size: u32, prefix_name: &str) -> Result<ProblemPage, UpstreamError>;
  async fn problem_condition(&self, hash: &str, seed: i64, lang: &str) -> Result<ProblemCondition, UpstreamError>;
  async fn check_answer(&self, request: AnswerCheckRequest) -> Result<AnswerCheck, UpstreamError>;
}

#[derive(Clone, Debug)]
pub struct GeolinClient {
  http: JsonClient,
}

impl GeolinClient {
  pub fn new(cfg: &UpstreamConfig) -> Result<Self, UpstreamError> {
    Ok(Self { http: JsonClient::new("geolin", cfg)? })
  }
}

#[async_trait]
impl ProblemGenerator for GeolinClient {
  async fn problems_info(&self, page: u32, size: u32, prefix_name: &str) -> Result<ProblemPage, UpstreamError> {
    let query = [("page", page.to_string()), ("size", size.to_string()), ("prefix_name", prefix_name.to_string())];
    self.http.get(&["api", "problems"], &query).await
  }

  async fn problem_condition(&self, hash: &str, seed: i64, lang: &str) -> Result<ProblemCondition, UpstreamError> {
    self.http.post(&["api", "problems", "condition"], &ConditionRequest { hash, seed, lang }).await
  }

  async fn check_answer(&self, request: AnswerCheckRequest) -> Result<AnswerCheck, UpstreamError> {
    self.http.post(&["api", "problems", "check"], &request).await
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProblemData {
  pub name: String,
  pub hash: String,
  pub condition: String,
  pub seed: i64,
  pub problem_params: String,
}

/// Resolve `prefix` to one generator problem and render it.
///
/// Takes the exact name match among the first page of results, else the
/// first result. Without a `seed` a random one in [1, 1e9) is drawn. The
/// returned seed is the one recorded in `problem_params` when present.
#[instrument(level = "info", skip(generator))]
pub async fn problem_data_by_prefix(
  generator: &dyn ProblemGenerator,
  prefix: &str,
  seed: Option<i64>,
) -> Result<ProblemData, LookupError> {
  let page = generator.problems_info(1, 10, prefix).await?;
  let info = match page.problems.iter().find(|p| p.name == prefix).or_else(|| page.problems.first()) {
    Some(info) => info.clone(),
    None => {
      warn!(target: "upstream", %prefix, "No generator problems for prefix");
      return Err(LookupError::NotFound(format!("No problem found for prefix '{prefix}'.")));
    }
  };
  if info.hash.trim().is_empty() {
    warn!(target: "upstream", %prefix, name = %info.name, "Generator returned an empty hash");
    return Err(LookupError::NotFound("Problem hash received from GeoLin is empty.".into()));
  }

  let requested = seed.unwrap_or_else(|| rand::thread_rng().gen_range(1..1_000_000_000));
  let condition = generator.problem_condition(&info.hash, requested, "ru").await?;
  let params = condition.params_text();
  let seed = seed_from_params(&params).unwrap_or(requested);
  if seed != requested {
    warn!(target: "upstream", requested, recorded = seed, "Seed in problem_params differs from the requested one; using the recorded seed");
  }

  info!(target: "upstream", %prefix, name = %info.name, hash = %info.hash, seed, "Prepared problem data");
  Ok(ProblemData { name: info.name, hash: info.hash, condition: condition.condition, seed, problem_params: params })
}

fn seed_from_params(params: &str) -> Option<i64> {
  if params.trim().is_empty() {
    return None;
  }
  match serde_json::from_str::<Value>(params) {
    Ok(doc) => doc.get("seed").and_then(Value::as_i64),
    Err(e) => {
      warn!(target: "upstream", error = %e, "problem_params is not valid JSON");
      None
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnswerVerdict {
  pub is_correct: bool,
  pub verdict: f64,
  pub message: String,
}

/// Grade an answer. Correct iff the upstream verdict is at least 1.0.
#[instrument(level = "info", skip(generator, request), fields(hash = %request.hash))]
pub async fn check_answer(generator: &dyn ProblemGenerator, request: AnswerCheckRequest) -> Result<AnswerVerdict, UpstreamError> {
  let check = generator.check_answer(request).await?;
  let is_correct = check.verdict >= 1.0;
  let message = if is_correct {
    format!("Answer is correct (verdict: {})", check.verdict)
  } else {
    format!("Answer is incorrect (verdict: {})", check.verdict)
  };
  info!(target: "upstream", is_correct, verdict = check.verdict, "Answer checked");
  Ok(AnswerVerdict { is_correct, verdict: check.verdict, message })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use wiremock::matchers::{body_partial_json, method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn client(server: &MockServer) -> GeolinClient {
    GeolinClient::new(&UpstreamConfig { base_url: server.uri(), timeout_secs: 5 }).unwrap()
  }

  async fn mount_index(server: &MockServer, problems: serde_json::Value) {
    Mock::given(method("GET"))
      .and(path("/api/problems"))
      .and(query_param("page", "1"))
      .and(query_param("size", "10"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "problems": problems })))
      .mount(server)
      .await;
  }

  #[tokio::test]
  async fn prefers_exact_name_and_takes_seed_from_params() {
    let server = MockServer::start().await;
    mount_index(&server, json!([{ "name": "quad_long", "hash": "h1" }, { "name": "quad", "hash": "h2" }])).await;
    Mock::given(method("POST"))
      .and(path("/api/problems/condition"))
      .and(body_partial_json(json!({ "hash": "h2", "seed": 42, "lang": "ru" })))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "condition": "Solve x^2 = 4", "problem_params": "{\"seed\": 43}"
      })))
      .mount(&server)
      .await;

    let data = problem_data_by_prefix(&client(&server), "quad", Some(42)).await.unwrap();
    assert_eq!(data.hash, "h2");
    assert_eq!(data.condition, "Solve x^2 = 4");
    assert_eq!(data.seed, 43);
  }

  #[tokio::test]
  async fn falls_back_to_first_result_and_requested_seed() {
    let server = MockServer::start().await;
    mount_index(&server, json!([{ "name": "geo_a", "hash": "ha" }, { "name": "geo_b", "hash": "hb" }])).await;
    Mock::given(method("POST"))
      .and(path("/api/problems/condition"))
      .and(body_partial_json(json!({ "hash": "ha" })))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "condition": "c", "problem_params": "not json" })))
      .mount(&server)
      .await;

    let data = problem_data_by_prefix(&client(&server), "geo", Some(5)).await.unwrap();
    assert_eq!(data.name, "geo_a");
    assert_eq!(data.seed, 5);
    assert_eq!(data.problem_params, "not json");
  }

  #[tokio::test]
  async fn empty_index_or_hash_is_not_found() {
    let server = MockServer::start().await;
    mount_index(&server, json!([])).await;
    let err = problem_data_by_prefix(&client(&server), "nothing", None).await.unwrap_err();
    assert!(matches!(err, LookupError::NotFound(_)));

    let server = MockServer::start().await;
    mount_index(&server, json!([{ "name": "x", "hash": "" }])).await;
    let err = problem_data_by_prefix(&client(&server), "x", None).await.unwrap_err();
    assert!(matches!(err, LookupError::NotFound(_)));
  }

  #[tokio::test]
  async fn verdict_threshold_decides_correctness() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/problems/check"))
      .and(body_partial_json(json!({ "answer_attempt": "4" })))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "verdict": 1.0 })))
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/api/problems/check"))
      .and(body_partial_json(json!({ "answer_attempt": "5" })))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "verdict": 0.5 })))
      .mount(&server)
      .await;

    let c = client(&server);
    let req = |answer: &str| AnswerCheckRequest { hash: "h".into(), answer_attempt: answer.into(), seed: Some(1), problem_params: None };
    let ok = check_answer(&c, req("4")).await.unwrap();
    assert!(ok.is_correct);
    assert_eq!(ok.message, "Answer is correct (verdict: 1)");
    let bad = check_answer(&c, req("5")).await.unwrap();
    assert!(!bad.is_correct);
    assert_eq!(bad.message, "Answer is incorrect (verdict: 0.5)");
  }
}
