//! Error types shared by services and the HTTP boundary.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::llm::LlmError;

/// Failure talking to the problem bank or the problem generator.
#[derive(Debug, Error)]
pub enum UpstreamError {
  #[error("upstream request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("upstream HTTP {status}: {body}")]
  Status { status: u16, body: String },

  #[error("upstream returned an unexpected payload: {0}")]
  Payload(String),
}

impl UpstreamError {
  pub fn is_not_found(&self) -> bool {
    matches!(self, UpstreamError::Status { status: 404, .. })
  }
}

/// Upstream lookup that can legitimately come back empty.
#[derive(Debug, Error)]
pub enum LookupError {
  #[error("{0}")]
  NotFound(String),

  #[error(transparent)]
  Upstream(#[from] UpstreamError),
}

/// Repository failure. The in-memory store only reports conflicts; a
/// relational backend would surface its driver errors as `Backend`.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("conflict: {0}")]
  Conflict(String),

  #[allow(dead_code)]
  #[error("storage backend error: {0}")]
  Backend(String),
}

/// Chat and task workflow failure. Business-rule refusals are not errors;
/// they come back as `None`/empty values from the services.
#[derive(Debug, Error)]
pub enum ServiceError {
  #[error("{0}")]
  NotFound(String),

  #[error(transparent)]
  Upstream(#[from] UpstreamError),

  #[error(transparent)]
  Llm(#[from] LlmError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Boundary error: every handler returns `Result<_, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
  #[error("{0}")]
  NotFound(String),

  #[error("{0}")]
  Validation(String),

  #[error("validation failed")]
  ValidationList(Vec<String>),

  #[error("unauthorized")]
  Unauthorized,

  #[error("forbidden")]
  Forbidden,

  #[error("{0}")]
  Conflict(String),

  #[error("{0}")]
  Upstream(String),

  #[error("{0}")]
  Internal(String),
}

impl From<UpstreamError> for AppError {
  fn from(e: UpstreamError) -> Self {
    AppError::Upstream(format!("An error occurred: {e}"))
  }
}

impl From<LookupError> for AppError {
  fn from(e: LookupError) -> Self {
    match e {
      LookupError::NotFound(msg) => AppError::NotFound(msg),
      LookupError::Upstream(e) => e.into(),
    }
  }
}

impl From<ServiceError> for AppError {
  fn from(e: ServiceError) -> Self {
    match e {
      ServiceError::NotFound(msg) => AppError::NotFound(msg),
      ServiceError::Upstream(e) => e.into(),
      ServiceError::Llm(e) => e.into(),
      ServiceError::Store(e) => e.into(),
    }
  }
}

impl From<LlmError> for AppError {
  fn from(e: LlmError) -> Self {
    AppError::Upstream(e.to_string())
  }
}

impl From<StoreError> for AppError {
  fn from(e: StoreError) -> Self {
    match e {
      StoreError::Conflict(msg) => AppError::Conflict(msg),
      StoreError::Backend(msg) => AppError::Internal(msg),
    }
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let status = match &self {
      AppError::NotFound(_) => StatusCode::NOT_FOUND,
      AppError::Validation(_) | AppError::ValidationList(_) => StatusCode::BAD_REQUEST,
      AppError::Unauthorized => StatusCode::UNAUTHORIZED,
      AppError::Forbidden => StatusCode::FORBIDDEN,
      AppError::Conflict(_) => StatusCode::CONFLICT,
      AppError::Upstream(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
      error!(target: "tutor_backend", error = %self, "Request failed");
    }

    let body = match self {
      AppError::ValidationList(errors) => json!({ "error": "validation failed", "errors": errors }),
      other => json!({ "error": other.to_string() }),
    };
    (status, Json(body)).into_response()
  }
}
