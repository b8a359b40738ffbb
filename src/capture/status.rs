//! Capture session state and the shared session handle.
//!
//! All session mutation goes through the operations on [`SessionHandle`];
//! timer ticks and collaborator completions are serialized by its lock, so
//! no two transitions ever interleave.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// State of a single recording attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Recording,
    Finalizing,
    Ready,
    Uploading,
    UploadComplete,
    UploadFailed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Finalizing => "finalizing",
            Self::Ready => "ready",
            Self::Uploading => "uploading",
            Self::UploadComplete => "upload_complete",
            Self::UploadFailed => "upload_failed",
        }
    }

    /// An active session blocks a new attempt from starting.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Recording | Self::Finalizing | Self::Uploading)
    }

    /// States from which an upload may be dispatched. `UploadFailed` keeps
    /// the clip on disk, so a manual retry is permitted.
    pub fn can_upload(&self) -> bool {
        matches!(self, Self::Ready | Self::UploadFailed)
    }
}

/// Outcome of delivering one countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The tick belonged to a superseded attempt or the session already left
    /// `Recording`; nothing changed.
    Stale,
    /// Countdown decremented, seconds remaining.
    Counting(u32),
    /// Countdown hit zero; the session moved to `Finalizing` and the
    /// recorder should be stopped.
    Expired,
}

/// Snapshot of one recording attempt.
#[derive(Debug, Clone)]
pub struct Session {
    pub state: SessionState,
    pub countdown_remaining: u32,
    pub attempt: u64,
    pub gesture: Option<String>,
    pub output_path: Option<PathBuf>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub server_response: Option<String>,
    /// Human-readable outcome of the most recent terminal transition.
    pub message: Option<String>,
    countdown_start: u32,
}

impl Session {
    fn new(countdown_start: u32) -> Self {
        Self {
            state: SessionState::Idle,
            countdown_remaining: countdown_start,
            attempt: 0,
            gesture: None,
            output_path: None,
            started_at: None,
            last_error: None,
            server_response: None,
            message: None,
            countdown_start,
        }
    }
}

/// Thread-safe handle for sharing the session between the capture machine,
/// its spawned tasks, and API handlers.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<Session>>,
}

impl SessionHandle {
    pub fn new(countdown_start: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Session::new(countdown_start))),
        }
    }

    pub async fn get(&self) -> Session {
        self.inner.lock().await.clone()
    }

    /// Reserve a new attempt: `Idle`/`Ready`/terminal → `Recording`.
    ///
    /// The output path is computed under the lock from the freshly assigned
    /// attempt number, so the (gesture, attempt, user) triple in the file
    /// name is unique per attempt.
    pub async fn begin_attempt(
        &self,
        gesture: &str,
        make_output: impl FnOnce(u64) -> PathBuf,
    ) -> Result<(u64, PathBuf)> {
        let mut session = self.inner.lock().await;
        if session.state.is_active() {
            bail!(
                "A capture attempt is already {}; wait for it to finish",
                session.state.as_str()
            );
        }

        session.attempt += 1;
        let output = make_output(session.attempt);

        session.state = SessionState::Recording;
        session.countdown_remaining = session.countdown_start;
        session.gesture = Some(gesture.to_string());
        session.output_path = Some(output.clone());
        session.started_at = Some(Utc::now());
        session.last_error = None;
        session.server_response = None;
        session.message = None;

        Ok((session.attempt, output))
    }

    /// Roll back a reserved attempt whose recorder never started.
    pub async fn abort_start(&self, attempt: u64, error: &str) {
        let mut session = self.inner.lock().await;
        if session.attempt != attempt || session.state != SessionState::Recording {
            return;
        }
        session.state = SessionState::Idle;
        session.countdown_remaining = session.countdown_start;
        session.output_path = None;
        session.last_error = Some(error.to_string());
        session.message = Some(format!("Recording failed to start: {error}"));
    }

    /// Deliver one countdown tick for the given attempt.
    ///
    /// Only decrements while that attempt is still `Recording`; the counter
    /// never goes below zero, and reaching zero transitions to `Finalizing`
    /// exactly once.
    pub async fn tick(&self, attempt: u64) -> TickOutcome {
        let mut session = self.inner.lock().await;
        if session.attempt != attempt || session.state != SessionState::Recording {
            debug!("Ignoring stale countdown tick for attempt {attempt}");
            return TickOutcome::Stale;
        }

        session.countdown_remaining = session.countdown_remaining.saturating_sub(1);
        if session.countdown_remaining == 0 {
            session.state = SessionState::Finalizing;
            TickOutcome::Expired
        } else {
            TickOutcome::Counting(session.countdown_remaining)
        }
    }

    /// Manual stop: `Recording` → `Finalizing`. Returns the attempt whose
    /// countdown should be cancelled, or None if the session was not
    /// recording (a no-op, also covering the race with the automatic stop).
    pub async fn request_stop(&self) -> Option<u64> {
        let mut session = self.inner.lock().await;
        if session.state != SessionState::Recording {
            return None;
        }
        session.state = SessionState::Finalizing;
        Some(session.attempt)
    }

    /// Apply the recorder's finalize event. Returns false when the event was
    /// late or duplicated and had no effect.
    ///
    /// A finalize that arrives while still `Recording` (the recorder died
    /// without a stop request) is accepted for the current attempt.
    pub async fn finalized(&self, attempt: u64, success: bool, error: Option<String>) -> bool {
        let mut session = self.inner.lock().await;
        let applies = session.attempt == attempt
            && matches!(
                session.state,
                SessionState::Recording | SessionState::Finalizing
            );
        if !applies {
            warn!("Ignoring finalize event for superseded attempt {attempt}");
            return false;
        }

        session.countdown_remaining = session.countdown_start;
        if success {
            session.state = SessionState::Ready;
            session.last_error = None;
            let path = session
                .output_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            session.message = Some(format!("Video capture succeeded: {path}"));
        } else {
            let reason = error.unwrap_or_else(|| "unknown recorder error".to_string());
            session.state = SessionState::Idle;
            session.output_path = None;
            session.message = Some(format!("Video capture ended with error: {reason}"));
            session.last_error = Some(reason);
        }
        true
    }

    /// Dispatch precondition for an upload: `Ready` (or `UploadFailed` for a
    /// retry) with the clip still on disk. On success the session moves to
    /// `Uploading` and the attempt/path to send are returned. On a missing
    /// file the state is left untouched and no network call should be made.
    pub async fn begin_upload(&self) -> Result<(u64, PathBuf)> {
        let mut session = self.inner.lock().await;
        if !session.state.can_upload() {
            bail!(
                "No clip ready to upload (session is {})",
                session.state.as_str()
            );
        }

        let path = match &session.output_path {
            Some(path) if path.exists() => path.clone(),
            Some(path) => bail!("Can't find video file {}", path.display()),
            None => bail!("No clip recorded yet"),
        };

        session.state = SessionState::Uploading;
        session.message = None;
        Ok((session.attempt, path))
    }

    /// Apply the uploader's result. Returns false when the result was late
    /// or duplicated and had no effect. The clip is kept on failure so the
    /// upload can be retried.
    pub async fn upload_finished(&self, attempt: u64, result: Result<String, String>) -> bool {
        let mut session = self.inner.lock().await;
        if session.attempt != attempt || session.state != SessionState::Uploading {
            warn!("Ignoring upload result for superseded attempt {attempt}");
            return false;
        }

        match result {
            Ok(body) => {
                session.state = SessionState::UploadComplete;
                session.message = Some(format!("Upload response: {body}"));
                session.server_response = Some(body);
                session.last_error = None;
            }
            Err(error) => {
                session.state = SessionState::UploadFailed;
                session.message = Some(format!("Upload failed: {error}"));
                session.last_error = Some(error);
            }
        }
        true
    }
}
