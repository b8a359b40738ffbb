//! Capture attempt orchestrator.
//!
//! Owns the lifecycle of one recording attempt:
//! start → countdown → stop (manual or automatic) → finalize → upload.
//!
//! Collaborators are injected via constructor. State changes flow through
//! the [`SessionHandle`] operations; the machine adds the side effects
//! (recorder control, the countdown task, upload dispatch) around them.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::gesture::Gesture;
use crate::upload::Uploader;

use super::history::History;
use super::recorder::{FinalizeEvent, Recorder};
use super::status::{Session, SessionHandle, TickOutcome};

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Directory practice clips are written to.
    pub clips_dir: PathBuf,
    /// Identifier baked into clip file names.
    pub user_id: String,
    /// Countdown tick period. One second in production.
    pub tick_interval: Duration,
    /// Optional cap on how long an upload may stay in flight.
    pub upload_timeout: Option<Duration>,
}

struct CountdownGuard {
    attempt: u64,
    handle: JoinHandle<()>,
}

impl Drop for CountdownGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct CaptureMachine {
    session: SessionHandle,
    recorder: Arc<dyn Recorder>,
    uploader: Arc<dyn Uploader>,
    history: History,
    countdown: Mutex<Option<CountdownGuard>>,
    clips_dir: PathBuf,
    user_id: String,
    tick_interval: Duration,
    upload_timeout: Option<Duration>,
}

impl CaptureMachine {
    pub fn new(
        session: SessionHandle,
        recorder: Arc<dyn Recorder>,
        uploader: Arc<dyn Uploader>,
        history: History,
        options: CaptureOptions,
    ) -> Self {
        Self {
            session,
            recorder,
            uploader,
            history,
            countdown: Mutex::new(None),
            clips_dir: options.clips_dir,
            user_id: options.user_id,
            tick_interval: options.tick_interval,
            upload_timeout: options.upload_timeout,
        }
    }

    /// Current session snapshot.
    pub async fn status(&self) -> Session {
        self.session.get().await
    }

    /// Begin a new recording attempt for the given gesture.
    ///
    /// Refused while a prior attempt is still recording, finalizing, or
    /// uploading. On success the recorder is armed, the countdown task is
    /// running, and the returned snapshot is `Recording`.
    pub async fn start_recording(&self, gesture: &Gesture) -> Result<Session> {
        std::fs::create_dir_all(&self.clips_dir).context("Failed to create clips directory")?;

        let (attempt, output) = self
            .session
            .begin_attempt(gesture.label, |attempt| {
                self.clips_dir
                    .join(gesture.clip_file_name(attempt, &self.user_id))
            })
            .await?;

        info!(
            "Attempt {}: recording {} to {:?}",
            attempt, gesture.label, output
        );

        match self.recorder.begin(&output).await {
            Ok(finalize_rx) => {
                self.spawn_countdown(attempt).await;
                self.spawn_finalize_watcher(attempt, finalize_rx);
                Ok(self.session.get().await)
            }
            Err(e) => {
                error!("Attempt {}: recorder failed to start: {}", attempt, e);
                self.session.abort_start(attempt, &e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Manual stop. A no-op when nothing is recording, which also covers
    /// the race with the automatic stop on the final countdown second.
    pub async fn stop_recording(&self) -> Session {
        match self.session.request_stop().await {
            Some(attempt) => {
                info!("Attempt {}: manual stop requested", attempt);
                self.cancel_countdown(attempt).await;
                if let Err(e) = self.recorder.end().await {
                    warn!("Failed to stop recorder: {}", e);
                }
            }
            None => warn!("Stop requested while not recording, ignoring"),
        }
        self.session.get().await
    }

    /// Deliver one countdown tick to the current attempt. The scheduled
    /// countdown task calls this once per tick interval; it is harmless to
    /// call when the session is not recording.
    pub async fn tick(&self) -> TickOutcome {
        let attempt = self.session.get().await.attempt;
        Self::drive_tick(&self.session, &self.recorder, attempt).await
    }

    /// Entry point for the recorder's finalize event.
    pub async fn on_recorder_finalized(&self, attempt: u64, event: FinalizeEvent) {
        Self::apply_finalized(&self.session, &self.history, attempt, event).await;
    }

    /// Dispatch an upload of the ready clip.
    ///
    /// Requires a `Ready` session (or `UploadFailed`, for a retry) whose
    /// clip still exists; otherwise fails without changing state or touching
    /// the network. The upload itself runs on a worker task and reports back
    /// through [`Self::on_upload_result`] semantics.
    pub async fn request_upload(&self) -> Result<Session> {
        let (attempt, path) = self.session.begin_upload().await?;
        info!("Attempt {}: uploading {:?}", attempt, path);

        let session = self.session.clone();
        let history = self.history.clone();
        let uploader = Arc::clone(&self.uploader);
        let timeout = self.upload_timeout;
        tokio::spawn(async move {
            let result = Self::run_upload(uploader, &path, timeout).await;
            Self::apply_upload_result(&session, &history, attempt, result).await;
        });

        Ok(self.session.get().await)
    }

    /// Entry point for the uploader's result.
    pub async fn on_upload_result(&self, attempt: u64, result: Result<String, String>) {
        Self::apply_upload_result(&self.session, &self.history, attempt, result).await;
    }

    async fn spawn_countdown(&self, attempt: u64) {
        let session = self.session.clone();
        let recorder = Arc::clone(&self.recorder);
        let interval = self.tick_interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match Self::drive_tick(&session, &recorder, attempt).await {
                    TickOutcome::Counting(_) => {}
                    TickOutcome::Expired | TickOutcome::Stale => break,
                }
            }
        });

        // Replacing the guard aborts any straggler from a prior attempt.
        self.countdown
            .lock()
            .await
            .replace(CountdownGuard { attempt, handle });
    }

    /// Cancel the countdown task owned by the given attempt only.
    async fn cancel_countdown(&self, attempt: u64) {
        let mut guard = self.countdown.lock().await;
        if guard.as_ref().is_some_and(|c| c.attempt == attempt) {
            guard.take();
        }
    }

    async fn drive_tick(
        session: &SessionHandle,
        recorder: &Arc<dyn Recorder>,
        attempt: u64,
    ) -> TickOutcome {
        let outcome = session.tick(attempt).await;
        match outcome {
            TickOutcome::Counting(remaining) => {
                debug!("Attempt {}: {}s remaining", attempt, remaining);
            }
            TickOutcome::Expired => {
                info!("Attempt {}: countdown elapsed, stopping recorder", attempt);
                if let Err(e) = recorder.end().await {
                    warn!("Failed to stop recorder after countdown: {}", e);
                }
            }
            TickOutcome::Stale => {}
        }
        outcome
    }

    fn spawn_finalize_watcher(
        &self,
        attempt: u64,
        finalize_rx: oneshot::Receiver<FinalizeEvent>,
    ) {
        let session = self.session.clone();
        let history = self.history.clone();
        tokio::spawn(async move {
            let event = finalize_rx
                .await
                .unwrap_or_else(|_| FinalizeEvent::failure("recorder closed without reporting"));
            Self::apply_finalized(&session, &history, attempt, event).await;
        });
    }

    async fn apply_finalized(
        session: &SessionHandle,
        history: &History,
        attempt: u64,
        event: FinalizeEvent,
    ) {
        let applied = session
            .finalized(attempt, event.success, event.error.clone())
            .await;
        if !applied {
            return;
        }

        if event.success {
            let snapshot = session.get().await;
            if let (Some(gesture), Some(clip)) = (snapshot.gesture, snapshot.output_path) {
                history.record_clip(attempt, gesture, clip).await;
            }
            if let Some(message) = snapshot.message {
                info!("{}", message);
            }
        } else {
            error!(
                "Attempt {}: finalize failed: {}",
                attempt,
                event.error.as_deref().unwrap_or("unknown recorder error")
            );
        }
    }

    async fn run_upload(
        uploader: Arc<dyn Uploader>,
        path: &Path,
        limit: Option<Duration>,
    ) -> Result<String, String> {
        let outcome = match limit {
            Some(limit) => match tokio::time::timeout(limit, uploader.upload(path)).await {
                Ok(result) => result,
                Err(_) => Err(anyhow!("upload timed out after {}s", limit.as_secs())),
            },
            None => uploader.upload(path).await,
        };
        outcome.map_err(|e| e.to_string())
    }

    async fn apply_upload_result(
        session: &SessionHandle,
        history: &History,
        attempt: u64,
        result: Result<String, String>,
    ) {
        let applied = session.upload_finished(attempt, result.clone()).await;
        if !applied {
            return;
        }

        history.record_upload(attempt, &result).await;
        match result {
            Ok(body) => info!("Attempt {}: upload complete: {}", attempt, body),
            Err(e) => error!("Attempt {}: upload failed: {}", attempt, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::status::SessionState;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Recorder double. Optionally writes the clip file on begin and emits
    /// a canned finalize event when end() is called; tests can also fire
    /// the event by hand.
    struct MockRecorder {
        write_file: bool,
        on_end: Option<FinalizeEvent>,
        tx: Mutex<Option<oneshot::Sender<FinalizeEvent>>>,
        end_calls: AtomicUsize,
    }

    impl MockRecorder {
        fn finishing_with(event: FinalizeEvent) -> Arc<Self> {
            Arc::new(Self {
                write_file: true,
                on_end: Some(event),
                tx: Mutex::new(None),
                end_calls: AtomicUsize::new(0),
            })
        }

        fn without_file(event: FinalizeEvent) -> Arc<Self> {
            Arc::new(Self {
                write_file: false,
                on_end: Some(event),
                tx: Mutex::new(None),
                end_calls: AtomicUsize::new(0),
            })
        }

        async fn fire(&self, event: FinalizeEvent) {
            if let Some(tx) = self.tx.lock().await.take() {
                let _ = tx.send(event);
            }
        }

        fn end_calls(&self) -> usize {
            self.end_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Recorder for MockRecorder {
        async fn begin(&self, output: &Path) -> Result<oneshot::Receiver<FinalizeEvent>> {
            if self.write_file {
                std::fs::write(output, b"clip")?;
            }
            let (tx, rx) = oneshot::channel();
            self.tx.lock().await.replace(tx);
            Ok(rx)
        }

        async fn end(&self) -> Result<()> {
            self.end_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(event) = &self.on_end {
                if let Some(tx) = self.tx.lock().await.take() {
                    let _ = tx.send(event.clone());
                }
            }
            Ok(())
        }
    }

    /// Uploader double returning queued results, then "OK".
    struct MockUploader {
        results: Mutex<VecDeque<Result<String, String>>>,
        calls: AtomicUsize,
    }

    impl MockUploader {
        fn returning(results: Vec<Result<String, String>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Uploader for MockUploader {
        async fn upload(&self, _file: &Path) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.results.lock().await.pop_front() {
                Some(Ok(body)) => Ok(body),
                Some(Err(e)) => Err(anyhow!(e)),
                None => Ok("OK".to_string()),
            }
        }
    }

    /// Uploader double that never returns within a test's patience.
    struct StalledUploader;

    #[async_trait]
    impl Uploader for StalledUploader {
        async fn upload(&self, _file: &Path) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("too late".to_string())
        }
    }

    struct Fixture {
        machine: CaptureMachine,
        recorder: Arc<MockRecorder>,
        uploader: Arc<MockUploader>,
        _dir: tempfile::TempDir,
    }

    fn fixture(recorder: Arc<MockRecorder>, uploader: Arc<MockUploader>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let machine = CaptureMachine::new(
            SessionHandle::new(5),
            recorder.clone() as Arc<dyn Recorder>,
            uploader.clone() as Arc<dyn Uploader>,
            History::default(),
            CaptureOptions {
                clips_dir: dir.path().to_path_buf(),
                user_id: "tester".to_string(),
                // Long enough that only explicit tick() calls drive tests.
                tick_interval: Duration::from_secs(3600),
                upload_timeout: None,
            },
        );
        Fixture {
            machine,
            recorder,
            uploader,
            _dir: dir,
        }
    }

    async fn wait_for_state(machine: &CaptureMachine, state: SessionState) -> Session {
        for _ in 0..200 {
            let session = machine.status().await;
            if session.state == state {
                return session;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {:?}", state);
    }

    fn gesture(query: &str) -> &'static Gesture {
        Gesture::find(query).unwrap()
    }

    #[tokio::test]
    async fn test_full_countdown_finalizes_and_readies() {
        let f = fixture(
            MockRecorder::finishing_with(FinalizeEvent::success()),
            MockUploader::returning(vec![]),
        );

        let session = f.machine.start_recording(gesture("LightOn")).await.unwrap();
        assert_eq!(session.state, SessionState::Recording);
        assert_eq!(session.countdown_remaining, 5);
        assert_eq!(session.attempt, 1);

        for expected in [4, 3, 2, 1] {
            assert_eq!(f.machine.tick().await, TickOutcome::Counting(expected));
        }
        assert_eq!(f.machine.tick().await, TickOutcome::Expired);
        assert_eq!(f.recorder.end_calls(), 1);

        let session = wait_for_state(&f.machine, SessionState::Ready).await;
        assert_eq!(session.countdown_remaining, 5);
        assert!(session.last_error.is_none());
        let clip = session.output_path.unwrap();
        assert!(clip.exists());
        assert_eq!(
            clip.file_name().unwrap().to_str().unwrap(),
            "LightOn_PRACTICE_1_tester.mp4"
        );
    }

    #[tokio::test]
    async fn test_manual_stop_midway() {
        let f = fixture(
            MockRecorder::finishing_with(FinalizeEvent::success()),
            MockUploader::returning(vec![]),
        );

        f.machine.start_recording(gesture("FanOn")).await.unwrap();
        f.machine.tick().await;
        f.machine.tick().await;
        assert_eq!(f.machine.status().await.countdown_remaining, 3);

        let session = f.machine.stop_recording().await;
        assert_eq!(session.state, SessionState::Finalizing);
        assert_eq!(f.recorder.end_calls(), 1);

        wait_for_state(&f.machine, SessionState::Ready).await;

        // Ticks after the stop have no effect.
        assert_eq!(f.machine.tick().await, TickOutcome::Stale);
        assert_eq!(f.machine.status().await.countdown_remaining, 5);
    }

    #[tokio::test]
    async fn test_stop_without_recording_is_noop() {
        let f = fixture(
            MockRecorder::finishing_with(FinalizeEvent::success()),
            MockUploader::returning(vec![]),
        );

        let session = f.machine.stop_recording().await;
        assert_eq!(session.state, SessionState::Idle);
        assert_eq!(f.recorder.end_calls(), 0);
    }

    #[tokio::test]
    async fn test_finalize_failure_lands_in_idle() {
        let f = fixture(
            MockRecorder::finishing_with(FinalizeEvent::failure("muxer crashed")),
            MockUploader::returning(vec![]),
        );

        f.machine.start_recording(gesture("FanOff")).await.unwrap();
        f.machine.stop_recording().await;

        let session = wait_for_state(&f.machine, SessionState::Idle).await;
        assert_eq!(session.last_error.as_deref(), Some("muxer crashed"));
        assert!(session.output_path.is_none());
    }

    #[tokio::test]
    async fn test_start_refused_while_active() {
        let f = fixture(
            MockRecorder::finishing_with(FinalizeEvent::success()),
            MockUploader::returning(vec![]),
        );

        f.machine.start_recording(gesture("LightOn")).await.unwrap();
        assert!(f.machine.start_recording(gesture("FanOn")).await.is_err());
        assert_eq!(f.machine.status().await.attempt, 1);
    }

    #[tokio::test]
    async fn test_attempts_get_distinct_clip_names() {
        let f = fixture(
            MockRecorder::finishing_with(FinalizeEvent::success()),
            MockUploader::returning(vec![]),
        );

        f.machine.start_recording(gesture("Num3")).await.unwrap();
        f.machine.stop_recording().await;
        let first = wait_for_state(&f.machine, SessionState::Ready).await;

        f.machine.start_recording(gesture("Num3")).await.unwrap();
        f.machine.stop_recording().await;
        let second = wait_for_state(&f.machine, SessionState::Ready).await;

        assert_eq!(second.attempt, 2);
        assert_ne!(first.output_path, second.output_path);
        // Earlier take is still on disk.
        assert!(first.output_path.unwrap().exists());
    }

    #[tokio::test]
    async fn test_stale_finalize_for_superseded_attempt_ignored() {
        let f = fixture(
            MockRecorder::finishing_with(FinalizeEvent::success()),
            MockUploader::returning(vec![]),
        );

        f.machine.start_recording(gesture("LightOn")).await.unwrap();
        f.machine.stop_recording().await;
        wait_for_state(&f.machine, SessionState::Ready).await;

        f.machine.start_recording(gesture("FanOn")).await.unwrap();

        // A late event from attempt 1 must not disturb attempt 2.
        f.machine
            .on_recorder_finalized(1, FinalizeEvent::failure("late event"))
            .await;
        let session = f.machine.status().await;
        assert_eq!(session.state, SessionState::Recording);
        assert_eq!(session.attempt, 2);
        assert!(session.last_error.is_none());
    }

    #[tokio::test]
    async fn test_upload_success_stores_response() {
        let f = fixture(
            MockRecorder::finishing_with(FinalizeEvent::success()),
            MockUploader::returning(vec![Ok("processed 42 frames".to_string())]),
        );

        f.machine.start_recording(gesture("SetThermo")).await.unwrap();
        f.machine.stop_recording().await;
        wait_for_state(&f.machine, SessionState::Ready).await;

        let session = f.machine.request_upload().await.unwrap();
        assert_eq!(session.state, SessionState::Uploading);

        let session = wait_for_state(&f.machine, SessionState::UploadComplete).await;
        assert_eq!(
            session.server_response.as_deref(),
            Some("processed 42 frames")
        );
        assert_eq!(f.uploader.calls(), 1);
    }

    #[tokio::test]
    async fn test_upload_rejected_when_file_missing() {
        let f = fixture(
            MockRecorder::without_file(FinalizeEvent::success()),
            MockUploader::returning(vec![]),
        );

        f.machine.start_recording(gesture("LightOn")).await.unwrap();
        f.machine.stop_recording().await;
        wait_for_state(&f.machine, SessionState::Ready).await;

        let err = f.machine.request_upload().await.unwrap_err();
        assert!(err.to_string().contains("Can't find video file"));
        assert_eq!(f.machine.status().await.state, SessionState::Ready);
        assert_eq!(f.uploader.calls(), 0);
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_clip_and_allows_retry() {
        let f = fixture(
            MockRecorder::finishing_with(FinalizeEvent::success()),
            MockUploader::returning(vec![
                Err("connection refused".to_string()),
                Ok("OK".to_string()),
            ]),
        );

        f.machine.start_recording(gesture("Num7")).await.unwrap();
        f.machine.stop_recording().await;
        let ready = wait_for_state(&f.machine, SessionState::Ready).await;
        let clip = ready.output_path.clone().unwrap();

        f.machine.request_upload().await.unwrap();
        let failed = wait_for_state(&f.machine, SessionState::UploadFailed).await;
        assert_eq!(failed.last_error.as_deref(), Some("connection refused"));
        assert!(clip.exists());

        f.machine.request_upload().await.unwrap();
        let session = wait_for_state(&f.machine, SessionState::UploadComplete).await;
        assert_eq!(session.server_response.as_deref(), Some("OK"));
        assert_eq!(f.uploader.calls(), 2);
    }

    #[tokio::test]
    async fn test_upload_timeout_becomes_failure() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = MockRecorder::finishing_with(FinalizeEvent::success());
        let machine = CaptureMachine::new(
            SessionHandle::new(5),
            recorder.clone() as Arc<dyn Recorder>,
            Arc::new(StalledUploader),
            History::default(),
            CaptureOptions {
                clips_dir: dir.path().to_path_buf(),
                user_id: "tester".to_string(),
                tick_interval: Duration::from_secs(3600),
                upload_timeout: Some(Duration::from_millis(50)),
            },
        );

        machine.start_recording(gesture("LightOn")).await.unwrap();
        machine.stop_recording().await;
        wait_for_state(&machine, SessionState::Ready).await;

        machine.request_upload().await.unwrap();
        let session = wait_for_state(&machine, SessionState::UploadFailed).await;
        assert!(session.last_error.unwrap().contains("timed out"));
        // Clip preserved for a retry.
        assert!(session.output_path.unwrap().exists());
    }

    #[tokio::test]
    async fn test_scheduled_countdown_drives_automatic_stop() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = MockRecorder::finishing_with(FinalizeEvent::success());
        let machine = CaptureMachine::new(
            SessionHandle::new(5),
            recorder.clone() as Arc<dyn Recorder>,
            MockUploader::returning(vec![]) as Arc<dyn Uploader>,
            History::default(),
            CaptureOptions {
                clips_dir: dir.path().to_path_buf(),
                user_id: "tester".to_string(),
                tick_interval: Duration::from_millis(10),
                upload_timeout: None,
            },
        );

        machine.start_recording(gesture("Num0")).await.unwrap();
        let session = wait_for_state(&machine, SessionState::Ready).await;
        assert_eq!(session.countdown_remaining, 5);
        assert_eq!(recorder.end_calls(), 1);
    }

    #[tokio::test]
    async fn test_recorder_death_mid_recording_reports_failure() {
        let f = fixture(
            MockRecorder::finishing_with(FinalizeEvent::success()),
            MockUploader::returning(vec![]),
        );

        f.machine.start_recording(gesture("LightOn")).await.unwrap();

        // The capture process dies without any stop being requested.
        f.recorder
            .fire(FinalizeEvent::failure("device disconnected"))
            .await;

        let session = wait_for_state(&f.machine, SessionState::Idle).await;
        assert_eq!(session.last_error.as_deref(), Some("device disconnected"));
    }
}
