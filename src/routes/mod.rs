//! Router assembly: HTTP endpoints, chat WebSocket, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    routing::{delete, get, post},
    Json, Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{info, instrument, warn, Level};

use crate::config::CorsConfig;
use crate::protocol::HealthOut;
use crate::state::AppState;

pub mod admin;
pub mod auth;
pub mod chats;
pub mod llm;
pub mod proxy;
pub mod stats;
pub mod tasks;
pub mod ws;

/// Build the application router with:
/// - auth under `/api/auth/...`, admin under `/api/admin/...`
/// - chats, tasks, upstream proxies and one-shot model calls under `/api/v1/...`
/// - the streaming chat WebSocket at `/api/v1/chat/ws`
/// - reporting under `/api/stats/...`
/// - CORS from `[cors]` (no layer at all when disabled)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors);

    let router = Router::new()
        .route("/api/v1/health", get(http_health))
        // Accounts
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        // Chats
        .route("/api/v1/chat", get(chats::list_chats).post(chats::create_chat))
        .route("/api/v1/chat/problem", post(chats::create_problem_chat))
        .route("/api/v1/chat/ws", get(ws::ws_upgrade))
        .route("/api/v1/chat/:id", get(chats::get_chat).delete(chats::delete_chat))
        .route("/api/v1/chat/:id/messages", get(chats::list_messages).post(chats::post_message))
        // Tasks
        .route("/api/v1/tasks", get(tasks::list_tasks))
        .route("/api/v1/tasks/:id", get(tasks::get_task))
        .route("/api/v1/tasks/:id/start", post(tasks::start_task))
        .route("/api/v1/tasks/:id/complete", post(tasks::complete_task))
        // Problem generator proxy
        .route("/api/v1/geolin-proxy/problem-data", get(proxy::problem_data))
        .route("/api/v1/geolin-proxy/check-answer", post(proxy::check_answer))
        // Problem bank proxy
        .route("/api/v1/problems-proxy", get(proxy::list_problems).post(proxy::create_problem))
        .route("/api/v1/problems-proxy/types", get(proxy::problem_types))
        .route("/api/v1/problems-proxy/by-name", get(proxy::problems_by_name))
        .route("/api/v1/problems-proxy/by-type", get(proxy::problems_by_type))
        .route("/api/v1/problems-proxy/generate", post(proxy::generate_problems))
        .route("/api/v1/problems-proxy/:id", get(proxy::get_problem))
        // One-shot model calls
        .route("/api/v1/llm/solve-problem", post(llm::solve_problem))
        .route("/api/v1/llm/extract-answer", post(llm::extract_answer))
        // Reporting
        .route("/api/stats/task-mode-titles", get(stats::task_mode_titles))
        .route("/api/stats/user-stats", get(stats::user_stats))
        .route("/api/stats/user-details/:id", get(stats::user_details))
        // Administration
        .route("/api/admin/users", get(admin::list_users))
        .route("/api/admin/users/promote", post(admin::promote_user))
        .route("/api/admin/invite-codes", get(admin::list_invite_codes).post(admin::create_invite_code))
        .route("/api/admin/invite-codes/:id", delete(admin::delete_invite_code))
        .with_state(state);

    let router = match cors {
        Some(layer) => router.layer(layer),
        None => router,
    };

    router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

#[instrument(level = "info")]
async fn http_health() -> Json<HealthOut> {
    Json(HealthOut { ok: true })
}

/// Explicit origins with credentials. Nothing is installed when CORS is off
/// or no origin parses.
fn cors_layer(cfg: &CorsConfig) -> Option<CorsLayer> {
    if !cfg.enabled {
        return None;
    }
    let origins: Vec<HeaderValue> = cfg
        .origin
        .split(';')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(target: "tutor_backend", origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        warn!(target: "tutor_backend", "CORS enabled but no valid origin configured; CORS layer not installed");
        return None;
    }
    info!(target: "tutor_backend", origins = origins.len(), "CORS enabled");
    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT])
            .allow_credentials(true),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use crate::testing::TestApp;

    #[tokio::test]
    async fn health_is_public() {
        let app = TestApp::basic();
        let (status, body) = app.call("GET", "/api/v1/health", None, None).await;
        assert_eq!(status, 200);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn protected_routes_need_a_token() {
        let app = TestApp::basic();
        for (method, uri) in [("GET", "/api/v1/chat"), ("GET", "/api/v1/tasks"), ("GET", "/api/auth/me"), ("GET", "/api/admin/users")] {
            let (status, _) = app.call(method, uri, None, None).await;
            assert_eq!(status, 401, "{method} {uri}");
        }
        let (status, _) = app.call("GET", "/api/v1/chat", Some("not-a-jwt"), None).await;
        assert_eq!(status, 401);
    }

    #[test]
    fn cors_disabled_or_empty_installs_nothing() {
        assert!(cors_layer(&CorsConfig { enabled: false, origin: "https://a.example".into() }).is_none());
        assert!(cors_layer(&CorsConfig { enabled: true, origin: " ; ".into() }).is_none());
        assert!(cors_layer(&CorsConfig { enabled: true, origin: "https://a.example;https://b.example".into() }).is_some());
    }

    #[tokio::test]
    async fn cors_echoes_only_configured_origins() {
        let mut app = TestApp::basic();
        let mut config = (*app.state.config).clone();
        config.cors = CorsConfig { enabled: true, origin: "https://a.example; https://b.example".into() };
        app = TestApp::new(config, app.state.llm.clone(), app.state.bank.clone(), app.state.generator.clone());

        let preflight = |origin: &'static str| {
            Request::builder()
                .method("OPTIONS")
                .uri("/api/v1/health")
                .header("origin", origin)
                .header("access-control-request-method", "GET")
                .body(Body::empty())
                .unwrap()
        };

        let res = app.router.clone().oneshot(preflight("https://b.example")).await.unwrap();
        assert_eq!(res.headers()["access-control-allow-origin"], "https://b.example");
        assert_eq!(res.headers()["access-control-allow-credentials"], "true");

        let res = app.router.clone().oneshot(preflight("https://evil.example")).await.unwrap();
        assert!(res.headers().get("access-control-allow-origin").is_none());
    }
}
