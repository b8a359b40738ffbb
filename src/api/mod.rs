//! REST API server for Gestura.
//!
//! Provides HTTP endpoints for:
//! - Capture control (start, stop, upload, status)
//! - The gesture catalog and reference clips
//! - Attempt history for this service run

pub mod error;
pub mod routes;

use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::path::PathBuf;
use tower::ServiceBuilder;
use tracing::info;

use crate::capture::{History, SessionHandle};

pub use routes::capture::{ApiCommand, CaptureState, StartRequest};

pub struct ApiServer {
    port: u16,
    capture_state: CaptureState,
    history: History,
    reference_dir: PathBuf,
}

impl ApiServer {
    pub fn new(
        tx: tokio::sync::mpsc::Sender<ApiCommand>,
        session: SessionHandle,
        history: History,
        reference_dir: PathBuf,
        port: u16,
    ) -> Self {
        Self {
            port,
            capture_state: CaptureState { tx, session },
            history,
            reference_dir,
        }
    }

    pub async fn start(self) -> Result<()> {
        let app = Router::new()
            // Root and version endpoints
            .route("/", get(status))
            .route("/version", get(version))
            // Capture control and catalog routes
            .nest("/capture", routes::capture::router(self.capture_state))
            .nest(
                "/gestures",
                routes::gestures::router(routes::gestures::GesturesState {
                    reference_dir: self.reference_dir,
                }),
            )
            .nest("/history", routes::history::router(self.history))
            .layer(ServiceBuilder::new());

        let listener = tokio::net::TcpListener::bind(&format!("127.0.0.1:{}", self.port)).await?;

        info!("API server listening on http://127.0.0.1:{}", self.port);
        info!("Endpoints:");
        info!("  GET  /                - Service info");
        info!("  GET  /version         - Version info");
        info!("  POST /capture/start   - Begin a recording attempt");
        info!("  POST /capture/stop    - Stop the recording early");
        info!("  POST /capture/upload  - Upload the finished clip");
        info!("  GET  /capture/status  - Session status");
        info!("  GET  /gestures        - List gestures");
        info!("  GET  /gestures/:name  - Gesture with reference clip");
        info!("  GET  /history         - Attempts this run");

        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn status() -> Json<Value> {
    Json(json!({
        "service": "gestura",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": "gestura"
    }))
}
