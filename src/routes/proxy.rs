//! Thin proxies over the problem generator ("geolin") and the problem bank.

use std::sync::Arc;

use axum::{
  extract::{Path, Query, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use tracing::{error, info, instrument};

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::geolin::{self, AnswerCheckRequest};
use crate::problem_bank::{generate_variations, Problem};
use crate::protocol::*;
use crate::state::AppState;

//
// Problem generator
//

#[instrument(level = "info", skip(state, _user))]
pub async fn problem_data(
  State(state): State<Arc<AppState>>,
  _user: AuthUser,
  Query(q): Query<ProblemDataQuery>,
) -> Result<Json<ProblemDataOut>, AppError> {
  let prefix = q.prefix.trim();
  if prefix.is_empty() {
    return Err(AppError::Validation("Prefix is required.".into()));
  }
  let data = geolin::problem_data_by_prefix(state.generator.as_ref(), prefix, q.seed).await?;
  Ok(Json(ProblemDataOut {
    name: data.name,
    hash: data.hash,
    condition: data.condition,
    seed: data.seed,
    problem_params: data.problem_params,
  }))
}

/// Failures echo the request back next to the error.
#[instrument(level = "info", skip(state, _user, body), fields(hash = %body.hash))]
pub async fn check_answer(State(state): State<Arc<AppState>>, _user: AuthUser, Json(body): Json<CheckAnswerIn>) -> Response {
  let failure = |status: StatusCode, error: String, body: &CheckAnswerIn| {
    let out = CheckAnswerErrorOut { error, hash: body.hash.clone(), answer_attempt: body.answer_attempt.clone(), seed: body.seed };
    (status, Json(out)).into_response()
  };

  if body.hash.trim().is_empty() || body.answer_attempt.trim().is_empty() {
    return failure(StatusCode::BAD_REQUEST, "Hash and answer attempt are required.".into(), &body);
  }

  let request = AnswerCheckRequest {
    hash: body.hash.clone(),
    answer_attempt: body.answer_attempt.clone(),
    seed: body.seed,
    problem_params: body.problem_params.clone(),
  };
  match geolin::check_answer(state.generator.as_ref(), request).await {
    Ok(verdict) => Json(CheckAnswerOut {
      is_correct: verdict.is_correct,
      message: verdict.message,
      hash: body.hash,
      answer_attempt: body.answer_attempt,
      seed: body.seed,
    })
    .into_response(),
    Err(e) => {
      error!(target: "upstream", error = %e, "Answer check failed");
      failure(StatusCode::INTERNAL_SERVER_ERROR, format!("An error occurred: {e}"), &body)
    }
  }
}

//
// Problem bank
//

#[instrument(level = "info", skip(state, _user))]
pub async fn list_problems(State(state): State<Arc<AppState>>, _user: AuthUser) -> Result<Json<Vec<Problem>>, AppError> {
  Ok(Json(state.bank.problems().await?))
}

#[instrument(level = "info", skip(state, _user))]
pub async fn get_problem(State(state): State<Arc<AppState>>, _user: AuthUser, Path(id): Path<String>) -> Result<Json<Problem>, AppError> {
  let problem = state
    .bank
    .problem(&id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Problem with ID {id} not found.")))?;
  Ok(Json(problem))
}

#[instrument(level = "info", skip(state, _user, body))]
pub async fn create_problem(
  State(state): State<Arc<AppState>>,
  _user: AuthUser,
  Json(mut body): Json<CreateProblemIn>,
) -> Result<Json<Problem>, AppError> {
  let key = body.geolin_ans_key.take().unwrap_or_default();
  if body.statement.trim().is_empty() || key.hash.trim().is_empty() {
    return Err(AppError::Validation("Statement and geolinAnsKey.hash are required.".into()));
  }
  let problem = state.bank.create_problem(body.into_request(key)).await?;
  info!(target: "upstream", problem_id = %problem.id, "Problem created");
  Ok(Json(problem))
}

#[instrument(level = "info", skip(state, _user))]
pub async fn problem_types(State(state): State<Arc<AppState>>, _user: AuthUser) -> Result<Json<Vec<String>>, AppError> {
  Ok(Json(state.bank.types().await?))
}

#[instrument(level = "info", skip(state, _user, q), fields(name = %q.name))]
pub async fn problems_by_name(
  State(state): State<Arc<AppState>>,
  _user: AuthUser,
  Query(q): Query<ByNameQuery>,
) -> Result<Json<Vec<Problem>>, AppError> {
  if q.name.trim().is_empty() {
    return Err(AppError::Validation("Name is required.".into()));
  }
  Ok(Json(state.bank.problems_by_name(&q.name).await?))
}

#[instrument(level = "info", skip(state, _user, q), fields(type_name = %q.type_name))]
pub async fn problems_by_type(
  State(state): State<Arc<AppState>>,
  _user: AuthUser,
  Query(q): Query<ByTypeQuery>,
) -> Result<Json<Vec<Problem>>, AppError> {
  if q.type_name.trim().is_empty() {
    return Err(AppError::Validation("Type is required.".into()));
  }
  Ok(Json(state.bank.problems_by_type(&q.type_name).await?))
}

#[instrument(level = "info", skip(state, _user, body), fields(name = %body.name, hash = %body.problem_hash, count = body.count))]
pub async fn generate_problems(
  State(state): State<Arc<AppState>>,
  _user: AuthUser,
  Json(body): Json<GenerateIn>,
) -> Result<Json<Vec<Problem>>, AppError> {
  if body.name.trim().is_empty() || body.problem_hash.trim().is_empty() {
    return Err(AppError::Validation("Name and problemHash are required.".into()));
  }
  let count = usize::try_from(body.count)
    .ok()
    .filter(|c| *c > 0)
    .ok_or_else(|| AppError::Validation("Count must be greater than zero.".into()))?;
  let created = generate_variations(state.bank.as_ref(), state.generator.as_ref(), &body.name, &body.problem_hash, count).await?;
  Ok(Json(created))
}
