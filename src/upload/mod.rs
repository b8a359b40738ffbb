//! Upload transport for finished practice clips.
//!
//! The capture machine only sees the [`Uploader`] trait: one attempt per
//! call, no automatic retry, the server's response body text on success.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::multipart;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to read clip {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("upload request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server rejected upload with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Sends a completed clip to the processing server.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, file: &Path) -> Result<String>;
}

/// Uploads the clip as one multipart form part named `file`, declared as
/// `video/mp4` under its original file name. Any 2xx response is success
/// and its body text is surfaced verbatim.
pub struct MultipartUploader {
    client: reqwest::Client,
    endpoint: String,
}

impl MultipartUploader {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        info!("Initialized uploader with endpoint: {}", endpoint);
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl Uploader for MultipartUploader {
    async fn upload(&self, file: &Path) -> Result<String> {
        let file_name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clip.mp4".to_string());

        let bytes = tokio::fs::read(file)
            .await
            .map_err(|source| UploadError::Read {
                path: file.to_path_buf(),
                source,
            })?;

        debug!(
            "Uploading {} ({} bytes) to {}",
            file_name,
            bytes.len(),
            self.endpoint
        );

        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("video/mp4")
            .map_err(UploadError::Transport)?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(UploadError::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(UploadError::Transport)?;

        if !status.is_success() {
            error!("Upload rejected with status {}: {}", status, body);
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        info!("Upload accepted ({}): {} chars of response", status, body.len());
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_clip_is_a_read_error() {
        let uploader = MultipartUploader::new("http://127.0.0.1:1/upload");
        let err = uploader
            .upload(Path::new("/tmp/gestura-does-not-exist.mp4"))
            .await
            .unwrap_err();

        let err = err.downcast::<UploadError>().unwrap();
        assert!(matches!(err, UploadError::Read { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.mp4");
        std::fs::write(&clip, b"mp4").unwrap();

        // Port 1 is never listening.
        let uploader = MultipartUploader::new("http://127.0.0.1:1/upload");
        let err = uploader.upload(&clip).await.unwrap_err();
        let err = err.downcast::<UploadError>().unwrap();
        assert!(matches!(err, UploadError::Transport(_)));
    }

    #[test]
    fn test_rejected_error_message() {
        let err = UploadError::Rejected {
            status: 500,
            body: "no model loaded".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "server rejected upload with status 500: no model loaded"
        );
    }
}
