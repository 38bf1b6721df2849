use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;
use validator::Validate;

use crate::error::ApiError;
use crate::health::HealthChecker;
use crate::notification::{NotificationMessage, Notifier};
use crate::rate_limiter::RateLimiter;
use crate::response::HealthResponse;
use crate::todo::{CreateTodoRequest, RepositoryError, TodoRepository, UpdateTodoRequest};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub todos: Arc<dyn TodoRepository>,
    pub notifier: Arc<dyn Notifier>,
    pub health: HealthChecker,
    pub trust_proxy_headers: bool,
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => ApiError::NotFound("Todo not found".to_string()),
        }
    }
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest("Invalid todo Id".to_string()))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|_| ApiError::BadRequest("Invalid request body".to_string()))
}

/// Liveness endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse::ok())
}

/// Readiness endpoint; reports counter store reachability
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.health.check_health().await)
}

pub async fn create_todo(
    State(state): State<AppState>,
    payload: Result<Json<CreateTodoRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body(payload)?;
    request.validate()?;

    let todo = state
        .todos
        .create(request.title, request.description)
        .await?;

    Ok(Json(json!({
        "message": "Todo created successfully",
        "todo": todo
    })))
}

pub async fn list_todos(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let todos = state.todos.list().await?;
    Ok(Json(json!({ "todos": todos })))
}

pub async fn get_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let todo = state.todos.get(parse_id(&id)?).await?;
    Ok(Json(json!({ "todo": todo })))
}

pub async fn update_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateTodoRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let changes = body(payload)?;
    changes.validate()?;

    let was_completed = state.todos.get(id).await?.completed;
    let todo = state.todos.update(id, changes).await?;

    if todo.completed && !was_completed {
        if let Err(e) = state
            .notifier
            .send(NotificationMessage::todo_completed(&todo))
            .await
        {
            warn!(todo_id = todo.id, error = %e, "Completion notification failed");
        }
    }

    Ok(Json(json!({
        "message": "Todo updated successfully",
        "todo": todo
    })))
}

pub async fn delete_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.todos.delete(parse_id(&id)?).await?;
    Ok(Json(json!({ "message": "Todo deleted successfully" })))
}
