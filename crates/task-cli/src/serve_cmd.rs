//! `task-cli serve`: a read-mostly HTTP dashboard over the control surface.
//!
//! Exposes `query`/`get`/`retry`/`cancel` over HTTP; it adds no new engine
//! semantics, it's a thin transport over [`task_engine::Engine`].

use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use task_engine::{Engine, EngineError, QueryOptions};
use task_store::models::TaskStatus;

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NamespaceMismatch(_) => StatusCode::BAD_REQUEST,
            EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub task_type: Option<String>,
    pub status: Option<String>,
    pub cursor: Option<String>,
    #[serde(rename = "pageSize")]
    pub page_size: Option<i64>,
}

pub fn build_router(engine: Engine) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/retry", post(retry_task))
        .route("/api/tasks/{id}/cancel", post(cancel_task))
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

pub async fn run_serve(engine: Engine, bind: &str, port: u16) -> Result<()> {
    let app = build_router(engine);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!(%addr, "task-cli serve listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("task-cli serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

async fn index() -> impl IntoResponse {
    Html(
        "<!DOCTYPE html><html><head><title>task-engine</title></head><body>\
         <h1>task-engine</h1>\
         <p><a href=\"/api/tasks\">/api/tasks</a></p>\
         </body></html>",
    )
}

async fn list_tasks(
    State(engine): State<Engine>,
    Query(q): Query<ListQuery>,
) -> Result<axum::response::Response, AppError> {
    let status = match q.status.as_deref() {
        Some(s) => vec![s.parse::<TaskStatus>().map_err(|_| {
            AppError::not_found(format!("unknown status `{s}`"))
        })?],
        None => Vec::new(),
    };

    let opts = QueryOptions {
        task_type: q.task_type,
        status,
        cursor: q.cursor,
        page_size: q.page_size.unwrap_or(0),
        ..Default::default()
    };

    let (tasks, cursor) = engine.query(opts).await?;
    Ok(Json(serde_json::json!({ "entities": tasks, "cursor": cursor })).into_response())
}

async fn get_task(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let urn = task_urn(&id);
    let task = engine
        .get(&urn)
        .await?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;
    Ok(Json(task).into_response())
}

async fn retry_task(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let urn = task_urn(&id);
    engine.retry(&urn).await?;
    Ok(Json(serde_json::json!({ "ok": true })).into_response())
}

async fn cancel_task(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let urn = task_urn(&id);
    engine.cancel(&urn).await?;
    Ok(Json(serde_json::json!({ "ok": true })).into_response())
}

/// Accept either a bare hex id or a full URN in the path segment.
fn task_urn(id: &str) -> String {
    if id.contains(':') {
        id.to_string()
    } else {
        format!("{}:{id}", task_engine::id::NAMESPACE)
    }
}
