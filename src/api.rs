//! HTTP endpoints for the session lifecycle.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, Query, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::service::SessionService;

/// Build the router for the session API.
pub fn session_routes(service: Arc<SessionService>) -> Router {
    let body_limit = service.config().max_upload_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/session/create", post(create_session))
        .route("/session/upload/{session_id}", post(upload_file))
        .route("/session/execute/{session_id}", post(execute_job))
        .route("/session/status/{session_id}", get(session_status))
        .route("/download/{session_id}/{file_name}", get(download_artifact))
        .with_state(service)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .layer(DefaultBodyLimit::max(body_limit))
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            debug!(error = %self, status = status.as_u16(), "Request rejected");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Parse a session id from the path. Malformed ids cannot name a session.
fn parse_session_id(raw: &str) -> Result<Uuid, Error> {
    Uuid::parse_str(raw).map_err(|_| Error::NotFound {
        entity: "Session",
        id: raw.to_string(),
    })
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(service): State<Arc<SessionService>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "pdf-sessions",
        "sessions": service.session_count().await,
        "runningJobs": service.running_jobs(),
    }))
}

// ── Sessions ────────────────────────────────────────────────────────────

async fn create_session(State(service): State<Arc<SessionService>>) -> Result<Response, Error> {
    let id = service.create().await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "sessionId": id })),
    )
        .into_response())
}

#[derive(Deserialize)]
struct UploadParams {
    filename: Option<String>,
}

async fn upload_file(
    State(service): State<Arc<SessionService>>,
    Path(session_id): Path<String>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<Response, Error> {
    let id = parse_session_id(&session_id)?;
    let file_id = service
        .upload(id, params.filename.as_deref(), &body)
        .await?;
    Ok((StatusCode::OK, Json(serde_json::json!({ "fileId": file_id }))).into_response())
}

#[derive(Deserialize)]
struct ExecuteRequest {
    tool: String,
    #[serde(default)]
    files: Vec<String>,
}

async fn execute_job(
    State(service): State<Arc<SessionService>>,
    Path(session_id): Path<String>,
    body: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Response, Error> {
    let id = parse_session_id(&session_id)?;
    let Json(request) = body.map_err(|e| {
        warn!(session_id = %id, error = %e, "Malformed execute request");
        Error::InvalidInput(e.body_text())
    })?;

    // Fire and forget; the job reports through the session status.
    let _job = service.execute(id, &request.tool, &request.files).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "message": "Processing started" })),
    )
        .into_response())
}

async fn session_status(
    State(service): State<Arc<SessionService>>,
    Path(session_id): Path<String>,
) -> Result<Response, Error> {
    let id = parse_session_id(&session_id)?;
    let snapshot = service.status(id).await?;
    Ok(Json(snapshot).into_response())
}

// ── Download ────────────────────────────────────────────────────────────

async fn download_artifact(
    State(service): State<Arc<SessionService>>,
    Path((session_id, file_name)): Path<(String, String)>,
) -> Result<Response, Error> {
    let id = parse_session_id(&session_id)?;
    let download = service.download(id, &file_name).await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        download.name.replace(['"', '\\'], "_")
    );

    let headers = [
        (header::CONTENT_TYPE, download.content_type.to_string()),
        (header::CONTENT_LENGTH, download.size.to_string()),
        (header::CONTENT_DISPOSITION, disposition),
    ];
    Ok((StatusCode::OK, headers, Body::from_stream(download.body)).into_response())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::config::ServiceConfig;
    use crate::tools::CommandTransformer;

    async fn app() -> (TempDir, Router) {
        let tmp = TempDir::new().unwrap();
        let config = ServiceConfig {
            storage_root: tmp.path().to_path_buf(),
            session_ttl: Duration::from_secs(60),
            ..Default::default()
        };
        let service = SessionService::start(config, Arc::new(CommandTransformer::default()))
            .await
            .unwrap();
        (tmp, session_routes(service))
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn create_returns_201_with_session_id() {
        let (_tmp, app) = app().await;
        let resp = app
            .oneshot(Request::post("/session/create").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = json_body(resp).await;
        assert!(Uuid::parse_str(body["sessionId"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn status_of_malformed_id_is_404() {
        let (_tmp, app) = app().await;
        let resp = app
            .oneshot(
                Request::get("/session/status/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = json_body(resp).await;
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn execute_with_malformed_body_is_400() {
        let (_tmp, app) = app().await;
        let id = Uuid::new_v4();
        let resp = app
            .oneshot(
                Request::post(format!("/session/execute/{id}"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn download_unknown_session_is_404() {
        let (_tmp, app) = app().await;
        let id = Uuid::new_v4();
        let resp = app
            .oneshot(
                Request::get(format!("/download/{id}/merged_{id}.pdf"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (_tmp, app) = app().await;
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 0);
    }
}
