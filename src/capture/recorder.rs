//! Recorder collaborator abstraction and shell-command implementation.
//!
//! The capture machine never touches a camera directly: it arms a
//! [`Recorder`] and consumes the single finalize event the recorder reports
//! when the capture file is closed.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

/// The recorder's confirmation that a capture has stopped and the file is
/// closed, successfully or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeEvent {
    pub success: bool,
    pub error: Option<String>,
}

impl FinalizeEvent {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// A video capture device.
///
/// `begin` arms the recorder toward an output path and returns the channel
/// carrying its one finalize event. `end` requests a stop and is idempotent
/// when nothing is capturing.
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn begin(&self, output: &Path) -> Result<oneshot::Receiver<FinalizeEvent>>;

    async fn end(&self) -> Result<()>;
}

/// How long `end` waits for a graceful exit before killing the capture
/// process outright.
const STOP_GRACE: Duration = Duration::from_secs(3);

struct ActiveCapture {
    id: u64,
    stop_tx: oneshot::Sender<()>,
}

/// Records by shelling out to a configured capture command (an ffmpeg
/// invocation by default), with `{output}` substituted for the clip path.
///
/// On `end`, the command first gets a `q` on stdin (ffmpeg's quit key) and
/// is killed if it lingers past [`STOP_GRACE`]. The child's exit status
/// becomes the finalize event.
pub struct CommandRecorder {
    command: String,
    active: Arc<Mutex<Option<ActiveCapture>>>,
    next_id: AtomicU64,
}

impl CommandRecorder {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl Recorder for CommandRecorder {
    async fn begin(&self, output: &Path) -> Result<oneshot::Receiver<FinalizeEvent>> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            bail!("A capture is already in progress");
        }

        let command = self
            .command
            .replace("{output}", &output.to_string_lossy());
        info!("Starting capture command: {}", command);

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn capture command")?;

        let mut stdin = child.stdin.take();
        let (finalize_tx, finalize_rx) = oneshot::channel();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        active.replace(ActiveCapture { id, stop_tx });

        let slot = Arc::clone(&self.active);
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = &mut stop_rx => {
                    if let Some(mut stdin) = stdin.take() {
                        let _ = stdin.write_all(b"q\n").await;
                        // Dropping stdin signals EOF to commands that read it
                    }
                    match tokio::time::timeout(STOP_GRACE, child.wait()).await {
                        Ok(status) => status,
                        Err(_) => {
                            warn!("Capture command ignored stop request, killing it");
                            let _ = child.start_kill();
                            child.wait().await
                        }
                    }
                }
            };

            let event = match status {
                Ok(status) if status.success() => FinalizeEvent::success(),
                Ok(status) => {
                    FinalizeEvent::failure(format!("capture command exited with {status}"))
                }
                Err(e) => FinalizeEvent::failure(format!("capture command failed: {e}")),
            };

            // Free the slot unless a newer capture already took it, so a
            // command that exited on its own doesn't block the next begin.
            {
                let mut guard = slot.lock().await;
                if guard.as_ref().map(|c| c.id) == Some(id) {
                    guard.take();
                }
            }

            let _ = finalize_tx.send(event);
        });

        Ok(finalize_rx)
    }

    async fn end(&self) -> Result<()> {
        match self.active.lock().await.take() {
            Some(capture) => {
                // Send may fail if the command already exited on its own;
                // the finalize event covers that case.
                let _ = capture.stop_tx.send(());
                Ok(())
            }
            None => Ok(()),
        }
    }
}
