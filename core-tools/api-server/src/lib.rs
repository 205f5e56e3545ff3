//! API Server
//!
//! HTTP front end of the Appforge engine.
//!
//! # Endpoints
//!
//! - POST /api/app/add - Create an application from an initial prompt
//! - GET /api/app/chat/gen/code - Stream a chat turn as server-sent events
//! - POST /api/app/deploy - Build and publish an application
//! - GET /api/app/download/:app_id - Download generated code as zip
//! - GET /api/app/chat/history/:app_id - Page through conversation history
//! - GET /api/app/my/list - List the caller's applications
//! - POST /api/app/delete - Delete an application
//! - GET /api/health - Liveness
//! - GET /deploy/* - Published applications
//!
//! Identity comes from the `x-user-id` header set by the authentication
//! layer in front of this server.

use appforge_engine::db::HistoryCursor;
use appforge_engine::Engine;
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use sdk::{AppId, EngineError, EngineErrorExt, UserId};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

/// Header carrying the authenticated user id
pub const USER_HEADER: &str = "x-user-id";

/// Default history page size
const DEFAULT_PAGE_SIZE: i64 = 10;

/// API server state shared across handlers
#[derive(Clone)]
struct ServerState {
    engine: Arc<Engine>,
}

/// Error body: `{ "code": "NOT_FOUND", "message": "..." }`
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Engine(EngineError),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

/// HTTP status for an engine error
pub fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Validation(_) | EngineError::UnsupportedStrategy(_) => StatusCode::BAD_REQUEST,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Forbidden(_)
        | EngineError::PathDenied(_)
        | EngineError::PathOutsideWorkspace(_) => StatusCode::FORBIDDEN,
        EngineError::Routing(_) | EngineError::BuildFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Generation(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "code": "UNAUTHORIZED", "message": "login required" })),
            )
                .into_response(),
            ApiError::Engine(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    tracing::error!(code = err.code(), "Request failed: {}", err);
                }
                (
                    status,
                    Json(json!({ "code": err.code(), "message": err.public_message() })),
                )
                    .into_response()
            }
        }
    }
}

/// Caller identity taken from `x-user-id`
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub UserId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(|id| CurrentUser(UserId(id)))
            .ok_or(ApiError::Unauthorized)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddAppRequest {
    init_prompt: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppIdRequest {
    app_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatQuery {
    app_id: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    page_size: Option<i64>,
    before: Option<i64>,
    before_id: Option<i64>,
}

/// Build the router for `engine`
pub fn router(engine: Arc<Engine>) -> Router {
    let deploy_dir = engine.config().storage.deploy_dir.clone();
    let state = ServerState { engine };

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/app/add", post(add_app_handler))
        .route("/api/app/delete", post(delete_app_handler))
        .route("/api/app/my/list", get(list_apps_handler))
        .route("/api/app/chat/gen/code", get(chat_handler))
        .route("/api/app/chat/history/:app_id", get(history_handler))
        .route("/api/app/deploy", post(deploy_handler))
        .route("/api/app/download/:app_id", get(download_handler))
        .nest_service("/deploy", ServeDir::new(deploy_dir))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    engine: Arc<Engine>,
    listener: tokio::net::TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!("API server listening on http://{}", addr);

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("API server shutting down gracefully");
        })
        .await
}

fn ok<T: serde::Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({ "code": 0, "data": data }))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn add_app_handler(
    State(state): State<ServerState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<AddAppRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let app = state.engine.apps().create_app(user, &req.init_prompt).await?;
    Ok(ok(app.id))
}

async fn delete_app_handler(
    State(state): State<ServerState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<AppIdRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.engine.apps().delete_app(AppId(req.app_id), user).await?;
    Ok(ok(true))
}

async fn list_apps_handler(
    State(state): State<ServerState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let apps = state.engine.apps().list_apps(user).await?;
    Ok(ok(apps))
}

/// Chat as server-sent events.
///
/// Data events carry `{"d": fragment}`. A generation failure is sent as a
/// `business-error` event. Every stream ends with a `done` event. Closing the
/// connection cancels the generation.
async fn chat_handler(
    State(state): State<ServerState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ChatQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let chat = state
        .engine
        .pipeline()
        .execute(AppId(query.app_id), &query.message, user)
        .await?;

    let events = chat
        .map(|fragment| {
            let event = match fragment {
                Ok(text) => Event::default().data(json!({ "d": text }).to_string()),
                Err(err) => Event::default().event("business-error").data(
                    json!({ "error": true, "code": err.code(), "message": err.public_message() })
                        .to_string(),
                ),
            };
            Ok::<_, Infallible>(event)
        })
        .chain(stream::once(async {
            Ok(Event::default().event("done").data(""))
        }));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn history_handler(
    State(state): State<ServerState>,
    CurrentUser(user): CurrentUser,
    Path(app_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let turns = state
        .engine
        .apps()
        .list_history(
            AppId(app_id),
            user,
            query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            HistoryCursor::from_parts(query.before, query.before_id),
        )
        .await?;
    Ok(ok(turns))
}

async fn deploy_handler(
    State(state): State<ServerState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<AppIdRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let url = state.engine.deployer().deploy(AppId(req.app_id), user).await?;
    Ok(ok(url))
}

async fn download_handler(
    State(state): State<ServerState>,
    CurrentUser(user): CurrentUser,
    Path(app_id): Path<i64>,
) -> Result<Response, ApiError> {
    let (file_name, bytes) = state
        .engine
        .apps()
        .download_archive(AppId(app_id), user)
        .await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&EngineError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&EngineError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&EngineError::Forbidden("x".into())), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(&EngineError::Routing("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&EngineError::BuildFailed("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_for(&EngineError::Generation("x".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(&EngineError::Publish("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
