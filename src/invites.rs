//! Invite codes gate registration. Each code has a usage ceiling; each user
//! may consume one code ever.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{InviteCode, User};
use crate::error::{AppError, StoreError};
use crate::store::Store;

#[derive(Clone)]
pub struct InviteCodes {
  store: Arc<dyn Store>,
}

impl InviteCodes {
  pub fn new(store: Arc<dyn Store>) -> Self {
    Self { store }
  }

  #[instrument(level = "info", skip(self))]
  pub async fn create(&self, code: &str, max_usages: i64, created_by_id: &str) -> Result<InviteCode, AppError> {
    let code = code.trim();
    if code.is_empty() {
      return Err(AppError::Validation("Invite code cannot be empty.".into()));
    }
    let max_usages = u32::try_from(max_usages)
      .ok()
      .filter(|n| *n >= 1)
      .ok_or_else(|| AppError::Validation("Max usages must be at least 1.".into()))?;

    let invite = InviteCode::new(code, max_usages, created_by_id);
    self.store.insert_invite_code(invite.clone()).await?;
    info!(target: "auth", invite_id = %invite.id, %code, max_usages, "Invite code created");
    Ok(invite)
  }

  pub async fn get_by_code(&self, code: &str) -> Result<Option<InviteCode>, StoreError> {
    self.store.invite_code_by_code(code).await
  }

  pub async fn list(&self) -> Result<Vec<InviteCode>, StoreError> {
    self.store.invite_codes().await
  }

  /// Deleting an unknown id is a no-op; deleting a used code is a conflict.
  #[instrument(level = "info", skip(self))]
  pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
    let Some(invite) = self.store.invite_code(id).await? else { return Ok(()) };
    if !invite.used_by.is_empty() {
      warn!(target: "auth", invite_id = %id, usages = invite.current_usages, "Refusing to delete a used invite code");
      return Err(AppError::Conflict("Cannot delete invite code that has been used by users".into()));
    }
    self.store.delete_invite_code(id).await?;
    info!(target: "auth", invite_id = %id, "Invite code deleted");
    Ok(())
  }

  /// `false` when the code is unknown, exhausted, or the user already holds one.
  #[instrument(level = "info", skip(self, user), fields(user_id = %user.id))]
  pub async fn use_code(&self, code: &str, user: &User) -> Result<bool, StoreError> {
    match self.store.consume_invite_code(code, &user.id).await? {
      Some(invite) => {
        info!(target: "auth", invite_id = %invite.id, usages = invite.current_usages, max = invite.max_usages, "Invite code used");
        Ok(true)
      }
      None => {
        warn!(target: "auth", %code, "Invite code rejected");
        Ok(false)
      }
    }
  }
}
