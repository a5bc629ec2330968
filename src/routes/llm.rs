//! One-shot solver-model endpoints.

use std::sync::Arc;

use axum::{extract::State, Json};
use tracing::{info, instrument};

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info", skip(state, _user, body), fields(len = body.problem_description.len()))]
pub async fn solve_problem(State(state): State<Arc<AppState>>, _user: AuthUser, Json(body): Json<SolveIn>) -> Result<Json<SolveOut>, AppError> {
  if body.problem_description.trim().is_empty() {
    return Err(AppError::Validation("Problem description is required.".into()));
  }
  let solution = state.llm.solve(&body.problem_description).await?;
  info!(target: "llm", solution_len = solution.len(), "Problem solved");
  Ok(Json(SolveOut { solution }))
}

#[instrument(level = "info", skip(state, _user, body))]
pub async fn extract_answer(
  State(state): State<Arc<AppState>>,
  _user: AuthUser,
  Json(body): Json<ExtractIn>,
) -> Result<Json<ExtractOut>, AppError> {
  if body.problem_statement.trim().is_empty() || body.solution.trim().is_empty() {
    return Err(AppError::Validation("Problem statement and solution are required.".into()));
  }
  let extracted_answer = state.llm.extract_answer(&body.problem_statement, &body.solution).await?;
  Ok(Json(ExtractOut { extracted_answer }))
}
