//! HTTP/WebSocket façade — command and observation endpoints only. All
//! mutation goes through the Store/Registry; this module is a thin axum
//! Router translating the wire contract of §6 into calls against them.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::broadcast::Broadcast;
use crate::config::Settings;
use crate::llm::{extract_json, role_instructions, LlmBackend, Role};
use crate::models::{Plan, Project};
use crate::registry::Registry;
use crate::store::Store;
use crate::vcs::VcsGate;
use crate::workspace::Workspace;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub registry: Arc<Registry>,
    pub broadcast: Broadcast,
    pub llm: Arc<dyn LlmBackend>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/:id/start", post(start_project))
        .route("/api/projects/:id/stop", post(stop_project))
        .route("/api/projects/:id/init", post(init_project))
        .route("/api/projects/:id/generate-prd", post(generate_prd))
        .route("/api/projects/:id/update-prd", post(update_prd))
        .route("/api/projects/:id/update-settings", post(update_project_settings))
        .route("/api/lessons", get(list_lessons))
        .route("/api/lessons/:timestamp", delete(delete_lesson))
        .route("/api/settings", get(get_settings).post(replace_settings))
        .route("/", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn not_found(id: &str) -> Response {
    (axum::http::StatusCode::NOT_FOUND, format!("no such project: {id}")).into_response()
}

async fn list_projects(State(state): State<AppState>) -> Json<Vec<Project>> {
    Json(state.store.get_projects().await)
}

#[derive(Debug, Deserialize)]
struct CreateProjectRequest {
    name: String,
    path: Option<String>,
    prd: Option<Plan>,
}

async fn create_project(State(state): State<AppState>, Json(body): Json<CreateProjectRequest>) -> Response {
    let root_path = body
        .path
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default().join("Projects").join(&body.name));

    let project = Project::new(body.name.clone(), root_path, body.prd.unwrap_or_default(), true);
    match state.store.save_project(project.clone()).await {
        Ok(()) => Json(project).into_response(),
        Err(e) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn start_project(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(mut project) = state.store.get_project(&id).await else {
        return not_found(&id);
    };
    project.status = crate::models::ProjectStatus::Running;
    if let Err(e) = state.store.save_project(project.clone()).await {
        return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    let settings = state.store.get_settings().await;
    state.registry.start(&project, &settings).await;
    axum::http::StatusCode::ACCEPTED.into_response()
}

async fn stop_project(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    state.registry.stop(&id).await;
    if let Some(mut project) = state.store.get_project(&id).await {
        project.status = crate::models::ProjectStatus::Paused;
        let _ = state.store.save_project(project).await;
    }
    axum::http::StatusCode::ACCEPTED.into_response()
}

async fn init_project(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(mut project) = state.store.get_project(&id).await else {
        return not_found(&id);
    };
    let workspace = Workspace::new(project.root_path.clone());
    if let Err(e) = workspace.init() {
        return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    let vcs = VcsGate::new(project.root_path.clone());
    if let Err(e) = vcs.init() {
        return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    project.status = crate::models::ProjectStatus::Initialized;
    match state.store.save_project(project).await {
        Ok(()) => axum::http::StatusCode::OK.into_response(),
        Err(e) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct GeneratePrdRequest {
    prompt: String,
}

/// Synchronously invoke the LLM in the PRD role and parse its response into
/// a Plan. Surfaces a 500 on transport or extraction failure per §7's
/// disposition for LLM-format errors in this call path.
async fn generate_prd(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<GeneratePrdRequest>,
) -> Response {
    let Some(project) = state.store.get_project(&id).await else {
        return not_found(&id);
    };
    let suffix = role_instructions(Role::Prd, &project.root_path);
    let prompt = format!("## Role\nPRD\n\n{}\n\n{suffix}", body.prompt);

    let response = match state.llm.complete(Role::Prd, prompt).await {
        Ok(r) => r,
        Err(e) => return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };
    let value = match extract_json(&response) {
        Ok(v) => v,
        Err(e) => return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };
    match serde_json::from_value::<Plan>(value.clone()) {
        Ok(_) => Json(value).into_response(),
        Err(e) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct UpdatePrdRequest {
    prd: Plan,
}

async fn update_prd(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<UpdatePrdRequest>) -> Response {
    let Some(project) = state.store.get_project(&id).await else {
        return not_found(&id);
    };
    let workspace = Workspace::new(project.root_path.clone());
    let json = match serde_json::to_string_pretty(&body.prd) {
        Ok(j) => j,
        Err(e) => return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };
    if let Err(e) = workspace.write("plans/prd.json", &json) {
        return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    match state.store.update_plan(&id, body.prd).await {
        Ok(()) => axum::http::StatusCode::OK.into_response(),
        Err(e) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct UpdateProjectSettingsRequest {
    updates: Value,
}

/// Patches the per-project fields the wire contract exposes: currently
/// only `useHumanReview`. The override set is closed — any other key in
/// `updates` is rejected rather than silently dropped.
const PROJECT_SETTINGS_ALLOWED_KEYS: &[&str] = &["useHumanReview"];

async fn update_project_settings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateProjectSettingsRequest>,
) -> Response {
    let Some(object) = body.updates.as_object() else {
        return (axum::http::StatusCode::BAD_REQUEST, "updates must be a JSON object").into_response();
    };
    if let Some(unknown) = object.keys().find(|k| !PROJECT_SETTINGS_ALLOWED_KEYS.contains(&k.as_str())) {
        return (axum::http::StatusCode::BAD_REQUEST, format!("unknown setting key: {unknown}")).into_response();
    }

    let Some(mut project) = state.store.get_project(&id).await else {
        return not_found(&id);
    };
    if let Some(use_human_review) = object.get("useHumanReview").and_then(Value::as_bool) {
        project.use_human_review = use_human_review;
    }
    match state.store.save_project(project).await {
        Ok(()) => axum::http::StatusCode::OK.into_response(),
        Err(e) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn list_lessons(State(state): State<AppState>) -> Json<Vec<crate::models::Lesson>> {
    Json(state.store.get_lessons().await)
}

async fn delete_lesson(State(state): State<AppState>, Path(timestamp): Path<String>) -> Response {
    match state.store.delete_lesson(&timestamp).await {
        Ok(true) => axum::http::StatusCode::OK.into_response(),
        Ok(false) => axum::http::StatusCode::NOT_FOUND.into_response(),
        Err(e) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.store.get_settings().await)
}

async fn replace_settings(State(state): State<AppState>, Json(settings): Json<Settings>) -> Response {
    match state.store.update_settings(settings).await {
        Ok(()) => axum::http::StatusCode::OK.into_response(),
        Err(e) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.broadcast))
}

async fn handle_socket(mut socket: WebSocket, broadcast: Broadcast) {
    let info = json!({"type": "info", "timestamp": Utc::now().to_rfc3339()});
    if socket.send(Message::Text(info.to_string())).await.is_err() {
        return;
    }

    let mut receiver = broadcast.subscribe();
    loop {
        tokio::select! {
            envelope = receiver.recv() => {
                match envelope {
                    Ok(envelope) => {
                        let Ok(text) = serde_json::to_string(&envelope) else { continue };
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WS observer lagged by {n} envelopes, continuing");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                if incoming.is_none() {
                    break;
                }
            }
        }
    }
}
