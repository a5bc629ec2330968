//! Accounts: registration behind invite codes, password login, JWT issuance,
//! role management and admin seeding.
//!
//! Passwords are stored as Argon2 PHC strings. Tokens are HS256 JWTs carrying
//! the user id, email and roles; the same token is used as a Bearer token or
//! as the `access_token` cookie.

use std::sync::Arc;

use argon2::{
  password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
  Argon2,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::{AdminConfig, JwtConfig};
use crate::domain::{Role, User};
use crate::error::{AppError, StoreError};
use crate::invites::InviteCodes;
use crate::store::Store;

pub const INVALID_CREDENTIALS: &str = "Invalid email or password";
const INVALID_INVITE: &str = "Invalid or expired invite code";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
  pub email: String,
  pub password: String,
  pub invite_code: String,
  #[serde(default)]
  pub first_name: String,
  #[serde(default)]
  pub last_name: String,
  #[serde(default)]
  pub student_group: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
  pub sub: String,
  pub email: String,
  pub roles: Vec<String>,
  pub iss: String,
  pub aud: String,
  pub iat: i64,
  pub exp: i64,
}

#[derive(Clone)]
pub struct Accounts {
  store: Arc<dyn Store>,
  invites: InviteCodes,
  jwt: JwtConfig,
  secret: Vec<u8>,
}

impl Accounts {
  pub fn new(store: Arc<dyn Store>, invites: InviteCodes, jwt: JwtConfig) -> Self {
    let secret = if jwt.key.is_empty() {
      warn!(target: "auth", "jwt.key is not configured; using a random per-process key (tokens will not survive a restart)");
      let mut key = vec![0u8; 32];
      rand::thread_rng().fill_bytes(&mut key);
      key
    } else {
      jwt.key.as_bytes().to_vec()
    };
    Self { store, invites, jwt, secret }
  }

  pub fn token_lifetime(&self) -> Duration {
    Duration::days(self.jwt.expires_days)
  }

  /// Create the user, then consume the invite code. A rejected code rolls
  /// the user back.
  #[instrument(level = "info", skip(self, reg), fields(email = %reg.email))]
  pub async fn register(&self, reg: Registration) -> Result<User, AppError> {
    let mut errors = validate_email(&reg.email);
    errors.extend(validate_password(&reg.password));
    if !errors.is_empty() {
      return Err(AppError::ValidationList(errors));
    }
    // Checked again, atomically, when the code is consumed below.
    if !self.invites.get_by_code(reg.invite_code.trim()).await?.is_some_and(|ic| ic.can_be_used()) {
      return Err(AppError::Validation(INVALID_INVITE.into()));
    }

    let hash = hash_password(reg.password.clone()).await?;
    let mut user = User::new(reg.email.trim(), hash);
    user.first_name = reg.first_name;
    user.last_name = reg.last_name;
    user.student_group = reg.student_group;

    match self.store.insert_user(user.clone()).await {
      Ok(()) => {}
      Err(StoreError::Conflict(_)) => {
        return Err(AppError::ValidationList(vec![format!("Email '{}' is already taken.", user.email)]));
      }
      Err(e) => return Err(e.into()),
    }

    if !self.invites.use_code(reg.invite_code.trim(), &user).await? {
      self.store.delete_user(&user.id).await?;
      return Err(AppError::Validation(INVALID_INVITE.into()));
    }

    info!(target: "auth", user_id = %user.id, "User registered");
    Ok(user)
  }

  /// Verify credentials. Unknown email and wrong password are indistinguishable.
  #[instrument(level = "info", skip(self, password))]
  pub async fn login(&self, email: &str, password: &str) -> Result<User, AppError> {
    let Some(user) = self.store.user_by_email(email.trim()).await? else {
      debug!(target: "auth", "Login for unknown email");
      return Err(AppError::Validation(INVALID_CREDENTIALS.into()));
    };
    if !verify_password(password.to_string(), user.password_hash.clone()).await? {
      warn!(target: "auth", user_id = %user.id, "Login with wrong password");
      return Err(AppError::Validation(INVALID_CREDENTIALS.into()));
    }
    info!(target: "auth", user_id = %user.id, "User logged in");
    Ok(user)
  }

  pub fn issue_token(&self, user: &User) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = Claims {
      sub: user.id.clone(),
      email: user.email.clone(),
      roles: user.roles.iter().map(|r| r.as_str().to_string()).collect(),
      iss: self.jwt.issuer.clone(),
      aud: self.jwt.audience.clone(),
      iat: now.timestamp(),
      exp: (now + self.token_lifetime()).timestamp(),
    };
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(&self.secret))
      .map_err(|e| AppError::Internal(format!("failed to sign token: {e}")))
  }

  /// Claims of a valid, unexpired token issued by this server.
  pub fn verify_token(&self, token: &str) -> Option<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[self.jwt.issuer.as_str()]);
    validation.set_audience(&[self.jwt.audience.as_str()]);
    match decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation) {
      Ok(data) => Some(data.claims),
      Err(e) => {
        debug!(target: "auth", error = %e, "Rejected token");
        None
      }
    }
  }

  pub async fn user(&self, id: &str) -> Result<Option<User>, StoreError> {
    self.store.user(id).await
  }

  pub async fn users(&self) -> Result<Vec<User>, StoreError> {
    self.store.users().await
  }

  #[instrument(level = "info", skip(self))]
  pub async fn promote_to_admin(&self, user_id: &str) -> Result<(), AppError> {
    let Some(mut user) = self.store.user(user_id).await? else {
      return Err(AppError::Validation("User not found".into()));
    };
    if user.has_role(Role::Admin) {
      return Err(AppError::Validation("User is already an admin".into()));
    }
    user.roles.push(Role::Admin);
    self.store.update_user(user).await?;
    info!(target: "auth", %user_id, "User promoted to admin");
    Ok(())
  }

  /// Create the configured admin account, or grant the role to an existing one.
  #[instrument(level = "info", skip(self, admin), fields(email = %admin.email))]
  pub async fn seed_admin(&self, admin: &AdminConfig) -> Result<(), AppError> {
    if admin.email.trim().is_empty() {
      info!(target: "auth", "No admin account configured");
      return Ok(());
    }
    if let Some(mut user) = self.store.user_by_email(&admin.email).await? {
      if !user.has_role(Role::Admin) {
        user.roles.push(Role::Admin);
        self.store.update_user(user).await?;
        info!(target: "auth", "Existing account granted the admin role");
      }
      return Ok(());
    }

    let problems = validate_password(&admin.password);
    if !problems.is_empty() {
      warn!(target: "auth", ?problems, "Admin password does not satisfy the password policy; admin not created");
      return Ok(());
    }
    let mut user = User::new(admin.email.trim(), hash_password(admin.password.clone()).await?);
    user.roles.push(Role::Admin);
    self.store.insert_user(user).await?;
    info!(target: "auth", "Admin account created");
    Ok(())
  }
}

fn validate_email(email: &str) -> Vec<String> {
  let email = email.trim();
  let valid = match email.split_once('@') {
    Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@') && !email.contains(char::is_whitespace),
    None => false,
  };
  if valid { Vec::new() } else { vec![format!("Email '{email}' is invalid.")] }
}

/// Password policy: at least 6 characters with a digit, a lower-case and an
/// upper-case letter, and a non-alphanumeric character.
pub fn validate_password(password: &str) -> Vec<String> {
  let mut errors = Vec::new();
  if password.chars().count() < 6 {
    errors.push("Passwords must be at least 6 characters.".to_string());
  }
  if password.chars().all(char::is_alphanumeric) {
    errors.push("Passwords must have at least one non alphanumeric character.".to_string());
  }
  if !password.chars().any(|c| c.is_ascii_digit()) {
    errors.push("Passwords must have at least one digit ('0'-'9').".to_string());
  }
  if !password.chars().any(|c| c.is_ascii_lowercase()) {
    errors.push("Passwords must have at least one lowercase ('a'-'z').".to_string());
  }
  if !password.chars().any(|c| c.is_ascii_uppercase()) {
    errors.push("Passwords must have at least one uppercase ('A'-'Z').".to_string());
  }
  errors
}

async fn hash_password(password: String) -> Result<String, AppError> {
  tokio::task::spawn_blocking(move || {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = SaltString::encode_b64(&salt).map_err(|e| AppError::Internal(format!("salt encoding failed: {e}")))?;
    Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .map(|h| h.to_string())
      .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
  })
  .await
  .map_err(|e| AppError::Internal(format!("password hashing task failed: {e}")))?
}

async fn verify_password(password: String, hash: String) -> Result<bool, AppError> {
  tokio::task::spawn_blocking(move || match PasswordHash::new(&hash) {
    Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
    Err(e) => {
      warn!(target: "auth", error = %e, "Stored password hash is malformed");
      false
    }
  })
  .await
  .map_err(|e| AppError::Internal(format!("password verification task failed: {e}")))
}
