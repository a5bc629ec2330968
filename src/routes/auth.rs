//! Account endpoints: registration, login (cookie or bearer token), logout, whoami.

use std::sync::Arc;

use axum::{
  extract::{Query, State},
  http::{header::SET_COOKIE, StatusCode},
  response::{IntoResponse, Response},
  Json,
};
use tracing::{info, instrument};

use crate::accounts::Registration;
use crate::auth::{clear_token_cookie, token_cookie, AuthUser};
use crate::error::AppError;
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info", skip(state, body), fields(email = %body.email))]
pub async fn register(State(state): State<Arc<AppState>>, Json(body): Json<Registration>) -> Result<Json<MeOut>, AppError> {
  let user = state.accounts.register(body).await?;
  Ok(Json(MeOut { id: user.id, email: user.email, roles: user.roles.iter().map(|r| r.as_str().to_string()).collect() }))
}

/// `?useToken=true` returns the token in the body; otherwise it is set as an
/// HttpOnly cookie and the body is empty.
#[instrument(level = "info", skip(state, body), fields(email = %body.email, use_token = q.use_token))]
pub async fn login(
  State(state): State<Arc<AppState>>,
  Query(q): Query<LoginQuery>,
  Json(body): Json<LoginIn>,
) -> Result<Response, AppError> {
  let user = state.accounts.login(&body.email, &body.password).await?;
  let token = state.accounts.issue_token(&user)?;
  if q.use_token {
    return Ok(Json(TokenOut { token, token_type: "Bearer".into() }).into_response());
  }
  let max_age = state.accounts.token_lifetime().num_seconds();
  info!(target: "auth", user_id = %user.id, "Token set as cookie");
  Ok((StatusCode::OK, [(SET_COOKIE, token_cookie(&token, max_age))]).into_response())
}

#[instrument(level = "info")]
pub async fn logout() -> Response {
  (StatusCode::OK, [(SET_COOKIE, clear_token_cookie())]).into_response()
}

pub async fn me(user: AuthUser) -> Json<MeOut> {
  Json(MeOut { id: user.id, email: user.email, roles: user.roles.iter().map(|r| r.as_str().to_string()).collect() })
}
