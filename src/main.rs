//! Math Tutor Backend
//!
//! - Axum HTTP + WebSocket API for tutoring chats over a problem bank
//! - OpenAI-compatible chat/solver models, problem generator and problem bank upstreams
//! - Invite-only accounts with JWT (bearer header or HttpOnly cookie)
//!
//! Important env variables:
//!   TUTOR_CONFIG_PATH : path to the TOML config (prompts, task categories, upstreams, auth)
//!   PORT              : overrides `server.port` (default 3000)
//!   OPENAI_API_KEY    : fills model tokens left empty in the config
//!   JWT_KEY           : token signing key
//!   ADMIN_EMAIL       : admin account seeded at startup
//!   ADMIN_PASSWORD    : its password
//!   LOG_LEVEL         : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT        : "pretty" (default) or "json"

mod accounts;
mod auth;
mod chat;
mod config;
mod domain;
mod error;
mod geolin;
mod invites;
mod llm;
mod llm_log;
mod problem_bank;
mod prompts;
mod protocol;
mod routes;
mod state;
mod stats;
mod store;
mod tasks;
mod telemetry;
mod upstream;
mod util;

#[cfg(test)]
mod testing;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::load_config_from_env;
use crate::routes::build_router;
use crate::state::AppState;

fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();
  let config = load_config_from_env();

  let mut runtime = tokio::runtime::Builder::new_multi_thread();
  runtime.enable_all();
  if let Some(threads) = config.server.worker_threads.filter(|n| *n > 0) {
    info!(target: "tutor_backend", threads, "Sizing the worker pool from config");
    runtime.worker_threads(threads);
  }
  runtime.build()?.block_on(serve(config))
}

async fn serve(config: config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
  let port = config.server.port;
  let admin = config.admin.clone();

  // Shared application state (repository, model gateway, upstream clients, services).
  let state = Arc::new(AppState::from_config(config)?);
  if let Err(e) = state.accounts.seed_admin(&admin).await {
    warn!(target: "tutor_backend", error = %e, "Admin seeding failed; continuing without it");
  }

  let app = build_router(state);

  let addr = SocketAddr::from(([0, 0, 0, 0], port));
  let listener = TcpListener::bind(addr).await?;
  info!(target: "tutor_backend", %addr, "HTTP server listening");
  axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
  info!(target: "tutor_backend", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(target: "tutor_backend", error = %e, "Failed to listen for Ctrl-C");
    std::future::pending::<()>().await;
  }
  info!(target: "tutor_backend", "Shutdown signal received");
}
