//! In-memory record of completed attempts for this service run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One finished record-to-upload cycle, as surfaced by `GET /history`.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub attempt: u64,
    pub gesture: String,
    pub clip: PathBuf,
    pub recorded_at: DateTime<Utc>,
    pub server_response: Option<String>,
    pub upload_error: Option<String>,
}

#[derive(Clone, Default)]
pub struct History {
    inner: Arc<Mutex<Vec<AttemptRecord>>>,
}

impl History {
    pub async fn list(&self) -> Vec<AttemptRecord> {
        self.inner.lock().await.clone()
    }

    pub async fn record_clip(&self, attempt: u64, gesture: String, clip: PathBuf) {
        let mut records = self.inner.lock().await;
        records.push(AttemptRecord {
            attempt,
            gesture,
            clip,
            recorded_at: Utc::now(),
            server_response: None,
            upload_error: None,
        });
    }

    pub async fn record_upload(&self, attempt: u64, result: &Result<String, String>) {
        let mut records = self.inner.lock().await;
        if let Some(record) = records.iter_mut().rev().find(|r| r.attempt == attempt) {
            match result {
                Ok(body) => {
                    record.server_response = Some(body.clone());
                    record.upload_error = None;
                }
                Err(error) => record.upload_error = Some(error.clone()),
            }
        }
    }
}
