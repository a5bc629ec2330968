//! Administration: users with their roles and invite code, invite code management.

use std::{collections::HashMap, sync::Arc};

use axum::{
  extract::{Path, Query, State},
  http::StatusCode,
  Json,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::AdminUser;
use crate::domain::{InviteCode, User};
use crate::error::AppError;
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info", skip(state, admin), fields(admin_id = %admin.0.id))]
pub async fn list_users(State(state): State<Arc<AppState>>, admin: AdminUser) -> Result<Json<Vec<AdminUserOut>>, AppError> {
  let users = state.accounts.users().await?;
  let invites: HashMap<Uuid, InviteCode> = state.invites.list().await?.into_iter().map(|ic| (ic.id, ic)).collect();
  let by_id: HashMap<&str, &User> = users.iter().map(|u| (u.id.as_str(), u)).collect();

  let out = users
    .iter()
    .map(|u| AdminUserOut {
      id: u.id.clone(),
      email: u.email.clone(),
      first_name: u.first_name.clone(),
      last_name: u.last_name.clone(),
      student_group: u.student_group.clone(),
      roles: u.roles.iter().map(|r| r.as_str().to_string()).collect(),
      used_invite_code: u.used_invite_code_id.and_then(|id| invites.get(&id)).map(|ic| UsedInviteOut {
        id: ic.id,
        code: ic.code.clone(),
        created_at: ic.created_at,
        created_by: by_id.get(ic.created_by_id.as_str()).map(|c| UserRef::from(*c)),
      }),
    })
    .collect();
  Ok(Json(out))
}

#[instrument(level = "info", skip(state, admin, q), fields(admin_id = %admin.0.id, user_id = %q.user_id))]
pub async fn promote_user(
  State(state): State<Arc<AppState>>,
  admin: AdminUser,
  Query(q): Query<PromoteQuery>,
) -> Result<StatusCode, AppError> {
  if q.user_id.trim().is_empty() {
    return Err(AppError::Validation("userId is required.".into()));
  }
  state.accounts.promote_to_admin(q.user_id.trim()).await?;
  Ok(StatusCode::OK)
}

#[instrument(level = "info", skip(state, admin), fields(admin_id = %admin.0.id))]
pub async fn list_invite_codes(State(state): State<Arc<AppState>>, admin: AdminUser) -> Result<Json<Vec<InviteListItem>>, AppError> {
  let users: HashMap<String, User> = state.accounts.users().await?.into_iter().map(|u| (u.id.clone(), u)).collect();
  let mut codes = state.invites.list().await?;
  codes.sort_by(|a, b| b.created_at.cmp(&a.created_at));

  let out = codes
    .iter()
    .map(|ic| InviteListItem {
      invite: InviteOut::from(ic),
      created_by: users.get(&ic.created_by_id).map(UserRef::from),
      used_by: ic.used_by.iter().filter_map(|id| users.get(id)).map(UserRef::from).collect(),
    })
    .collect();
  Ok(Json(out))
}

#[instrument(level = "info", skip(state, admin, body), fields(admin_id = %admin.0.id, code = %body.code))]
pub async fn create_invite_code(
  State(state): State<Arc<AppState>>,
  admin: AdminUser,
  Json(body): Json<CreateInviteIn>,
) -> Result<Json<InviteOut>, AppError> {
  let invite = state.invites.create(&body.code, body.max_usages, &admin.0.id).await?;
  Ok(Json(InviteOut::from(&invite)))
}

#[instrument(level = "info", skip(state, admin), fields(admin_id = %admin.0.id))]
pub async fn delete_invite_code(State(state): State<Arc<AppState>>, admin: AdminUser, Path(id): Path<Uuid>) -> Result<StatusCode, AppError> {
  state.invites.delete(id).await?;
  info!(target: "auth", invite_id = %id, "Invite code removal requested");
  Ok(StatusCode::NO_CONTENT)
}
