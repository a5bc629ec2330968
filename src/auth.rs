//! Request authentication: `AuthUser` (any signed-in user) and `AdminUser`.
//!
//! The token is taken from `Authorization: Bearer ...`, then from the
//! `access_token` cookie. Roles are read from the store, not the token, so a
//! promotion takes effect without signing in again.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
  extract::FromRequestParts,
  http::{
    header::{AUTHORIZATION, COOKIE},
    request::Parts,
    HeaderMap,
  },
};
use tracing::debug;

use crate::domain::Role;
use crate::error::AppError;
use crate::state::AppState;

pub const TOKEN_COOKIE: &str = "access_token";

#[derive(Clone, Debug)]
pub struct AuthUser {
  pub id: String,
  pub email: String,
  pub roles: Vec<Role>,
}

impl AuthUser {
  pub fn is_admin(&self) -> bool {
    self.roles.contains(&Role::Admin)
  }
}

#[derive(Clone, Debug)]
pub struct AdminUser(pub AuthUser);

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
  let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
  let (scheme, token) = value.split_once(' ')?;
  scheme.eq_ignore_ascii_case("bearer").then_some(token.trim()).filter(|t| !t.is_empty())
}

fn cookie_token(headers: &HeaderMap) -> Option<&str> {
  headers
    .get_all(COOKIE)
    .iter()
    .filter_map(|v| v.to_str().ok())
    .flat_map(|v| v.split(';'))
    .filter_map(|pair| pair.trim().split_once('='))
    .find(|(name, _)| *name == TOKEN_COOKIE)
    .map(|(_, value)| value)
    .filter(|t| !t.is_empty())
}

/// `Set-Cookie` value carrying a freshly issued token.
pub fn token_cookie(token: &str, max_age_secs: i64) -> String {
  format!("{TOKEN_COOKIE}={token}; HttpOnly; Path=/; SameSite=Lax; Max-Age={max_age_secs}")
}

/// `Set-Cookie` value that clears the token cookie.
pub fn clear_token_cookie() -> String {
  format!("{TOKEN_COOKIE}=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0")
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
  type Rejection = AppError;

  async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
    let token = bearer_token(&parts.headers).or_else(|| cookie_token(&parts.headers)).ok_or(AppError::Unauthorized)?;
    let claims = state.accounts.verify_token(token).ok_or(AppError::Unauthorized)?;
    let Some(user) = state.accounts.user(&claims.sub).await? else {
      debug!(target: "auth", user_id = %claims.sub, "Token for a deleted user");
      return Err(AppError::Unauthorized);
    };
    Ok(AuthUser { id: user.id, email: user.email, roles: user.roles })
  }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
  type Rejection = AppError;

  async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
    let user = AuthUser::from_request_parts(parts, state).await?;
    if !user.is_admin() {
      debug!(target: "auth", user_id = %user.id, "Admin route refused");
      return Err(AppError::Forbidden);
    }
    Ok(AdminUser(user))
  }
}
