use crate::api::{ApiCommand, ApiServer};
use crate::capture::{
    CaptureMachine, CaptureOptions, CommandRecorder, History, Recorder, SessionHandle,
};
use crate::config::{Config, DEFAULT_RECORDER_COMMAND};
use crate::gesture::Gesture;
use crate::upload::{MultipartUploader, Uploader};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub async fn run_service() -> Result<()> {
    info!("Starting Gestura service");

    let config = Config::load()?;

    let (tx, mut rx) = mpsc::channel::<ApiCommand>(10);
    let session = SessionHandle::new(config.capture.countdown_seconds);
    let history = History::default();

    let recorder_command = config
        .capture
        .recorder_command
        .clone()
        .unwrap_or_else(|| DEFAULT_RECORDER_COMMAND.to_string());
    let recorder: Arc<dyn Recorder> = Arc::new(CommandRecorder::new(recorder_command));
    let uploader: Arc<dyn Uploader> =
        Arc::new(MultipartUploader::new(config.upload.endpoint.as_str()));

    let machine = CaptureMachine::new(
        session.clone(),
        recorder,
        uploader,
        history.clone(),
        CaptureOptions {
            clips_dir: config.clips_dir()?,
            user_id: config.user.id.clone(),
            tick_interval: Duration::from_secs(1),
            upload_timeout: config.upload.timeout_seconds.map(Duration::from_secs),
        },
    );

    let api_server = ApiServer::new(
        tx,
        session.clone(),
        history.clone(),
        config.reference_dir()?,
        config.api.port,
    );
    let port = config.api.port;
    tokio::spawn(async move {
        if let Err(e) = api_server.start().await {
            error!("API server failed: {}", e);
        }
    });

    info!("Gestura is ready!");
    info!(
        "Start a practice attempt: curl -X POST http://127.0.0.1:{}/capture/start -H 'content-type: application/json' -d '{{\"gesture\": \"Turn on lights\"}}'",
        port
    );

    while let Some(command) = rx.recv().await {
        match command {
            ApiCommand::StartCapture { gesture } => match Gesture::find(&gesture) {
                Some(gesture) => match machine.start_recording(gesture).await {
                    Ok(session) => info!(
                        "Recording attempt {} started for {}",
                        session.attempt, gesture.label
                    ),
                    Err(e) => warn!("Failed to start recording: {}", e),
                },
                None => warn!("Unknown gesture requested: {}", gesture),
            },
            ApiCommand::StopCapture => {
                let session = machine.stop_recording().await;
                info!("Capture session is now {}", session.state.as_str());
            }
            ApiCommand::UploadClip => match machine.request_upload().await {
                Ok(session) => info!("Upload dispatched for attempt {}", session.attempt),
                Err(e) => warn!("Upload rejected: {}", e),
            },
        }
    }

    Ok(())
}
