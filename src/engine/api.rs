use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::{
    config::AppConfig,
    engine::{
        adapter::LanguageSpec,
        error::EngineError,
        metrics::MetricsRegistry,
        models::{ExecutionReport, ExecutionRequest, Language},
        session::RunSupervisor,
    },
};

#[derive(Clone)]
pub struct AppState {
    mode: String,
    max_code_bytes: usize,
    max_stdin_bytes: usize,
    supervisor: Arc<RunSupervisor>,
    metrics: Arc<MetricsRegistry>,
}

#[derive(Debug, Deserialize)]
struct ExecuteBody {
    language: Language,
    #[serde(alias = "code")]
    source_code: String,
    #[serde(default)]
    stdin: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct LanguageEntry {
    id: &'static str,
    name: &'static str,
    fast_path: bool,
    template: &'static str,
}

pub fn routes(
    config: &AppConfig,
    supervisor: Arc<RunSupervisor>,
    metrics_registry: Arc<MetricsRegistry>,
) -> Router {
    let state = AppState {
        mode: config.app_env.clone(),
        max_code_bytes: config.max_code_bytes,
        max_stdin_bytes: config.max_stdin_bytes,
        supervisor,
        metrics: metrics_registry,
    };
    Router::new()
        .route("/api/health", get(health))
        .route("/api/languages", get(languages))
        .route("/api/execute", post(execute))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "mode": state.mode }))
}

async fn languages(State(state): State<AppState>) -> Json<Vec<LanguageEntry>> {
    let fast_path_enabled = state.supervisor.dispatcher().fast_path_enabled();
    let entries = Language::ALL
        .into_iter()
        .map(|language| {
            let spec = LanguageSpec::for_language(language);
            LanguageEntry {
                id: language.id(),
                name: spec.display_name,
                fast_path: fast_path_enabled && language.is_fast_path(),
                template: spec.template,
            }
        })
        .collect();
    Json(entries)
}

async fn metrics(State(state): State<AppState>) -> (StatusCode, String) {
    (StatusCode::OK, state.metrics.render_prometheus())
}

async fn execute(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteBody>, JsonRejection>,
) -> Result<Json<ExecutionReport>, EngineError> {
    let Json(body) = payload.map_err(|rejection| EngineError::InvalidRequest(rejection.body_text()))?;
    let request = ExecutionRequest::new(body.language, body.source_code, body.stdin);
    validate_request(&state, &request)?;

    let session = body
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|session| !session.is_empty());
    let report = state.supervisor.run(session, &request).await?;
    Ok(Json(report))
}

fn validate_request(state: &AppState, request: &ExecutionRequest) -> Result<(), EngineError> {
    if request.source_code.trim().is_empty() {
        return Err(EngineError::InvalidRequest("code is empty".to_string()));
    }
    if request.source_code.len() > state.max_code_bytes {
        return Err(EngineError::InvalidRequest("code too large".to_string()));
    }
    if request.stdin.len() > state.max_stdin_bytes {
        return Err(EngineError::InvalidRequest("stdin too large".to_string()));
    }
    Ok(())
}
