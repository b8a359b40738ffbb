//! Capture control endpoints.
//!
//! Provides HTTP endpoints for:
//! - Starting a recording attempt (POST /start)
//! - Stopping it early (POST /stop)
//! - Uploading the finished clip (POST /upload)
//! - Reading the session status (GET /status)

use crate::capture::{Session, SessionHandle};
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{error, info};

/// Commands forwarded to the service loop driving the capture machine.
#[derive(Debug, Clone)]
pub enum ApiCommand {
    /// Begin a new attempt for a gesture, given by display name or label.
    StartCapture { gesture: String },
    /// Stop the current recording early.
    StopCapture,
    /// Upload the ready clip.
    UploadClip,
}

/// Request body for the start endpoint.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct StartRequest {
    pub gesture: String,
}

#[derive(Clone)]
pub struct CaptureState {
    pub tx: mpsc::Sender<ApiCommand>,
    pub session: SessionHandle,
}

pub fn router(state: CaptureState) -> Router {
    Router::new()
        .route("/start", post(start_capture))
        .route("/stop", post(stop_capture))
        .route("/upload", post(upload_clip))
        .route("/status", get(capture_status))
        .with_state(state)
}

async fn start_capture(
    State(state): State<CaptureState>,
    Json(request): Json<StartRequest>,
) -> Result<Json<Value>, StatusCode> {
    info!("Start capture requested via API: {}", request.gesture);
    dispatch(
        &state,
        ApiCommand::StartCapture {
            gesture: request.gesture,
        },
    )
    .await
}

async fn stop_capture(State(state): State<CaptureState>) -> Result<Json<Value>, StatusCode> {
    info!("Stop capture requested via API");
    dispatch(&state, ApiCommand::StopCapture).await
}

async fn upload_clip(State(state): State<CaptureState>) -> Result<Json<Value>, StatusCode> {
    info!("Upload requested via API");
    dispatch(&state, ApiCommand::UploadClip).await
}

async fn capture_status(State(state): State<CaptureState>) -> Json<Value> {
    let session = state.session.get().await;
    Json(session_json(&session))
}

/// Forward a command to the service loop, give it a moment to act, then
/// return the resulting session snapshot.
async fn dispatch(state: &CaptureState, command: ApiCommand) -> Result<Json<Value>, StatusCode> {
    match state.tx.send(command).await {
        Ok(_) => {
            // Small delay to allow the machine to process the command
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

            let session = state.session.get().await;
            Ok(Json(session_json(&session)))
        }
        Err(e) => {
            error!("Failed to send capture command: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn session_json(session: &Session) -> Value {
    json!({
        "state": session.state.as_str(),
        "attempt": session.attempt,
        "gesture": session.gesture,
        "countdown_remaining": session.countdown_remaining,
        "output_path": session.output_path,
        "started_at": session.started_at.map(|t| t.to_rfc3339()),
        "last_error": session.last_error,
        "server_response": session.server_response,
        "message": session.message,
    })
}
