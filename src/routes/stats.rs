//! Reporting endpoints.

use std::{collections::BTreeMap, sync::Arc};

use axum::{
  extract::{Path, State},
  Json,
};
use tracing::instrument;

use crate::auth::{AdminUser, AuthUser};
use crate::error::AppError;
use crate::state::AppState;
use crate::stats::{UserDetail, UserStats};

/// Configured task type -> category name mapping.
pub async fn task_mode_titles(State(state): State<Arc<AppState>>, _user: AuthUser) -> Result<Json<BTreeMap<String, String>>, AppError> {
  if state.config.task_mode_titles.is_empty() {
    return Err(AppError::NotFound("Task mode titles are not configured.".into()));
  }
  Ok(Json(state.config.task_mode_titles.clone()))
}

#[instrument(level = "info", skip(state, admin), fields(admin_id = %admin.0.id))]
pub async fn user_stats(State(state): State<Arc<AppState>>, admin: AdminUser) -> Result<Json<Vec<UserStats>>, AppError> {
  Ok(Json(state.stats.user_stats().await?))
}

#[instrument(level = "info", skip(state, admin), fields(admin_id = %admin.0.id))]
pub async fn user_details(State(state): State<Arc<AppState>>, admin: AdminUser, Path(id): Path<String>) -> Result<Json<UserDetail>, AppError> {
  Ok(Json(state.stats.user_details(&id).await?))
}
