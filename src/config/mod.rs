use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Countdown length bounding a single recording attempt, in seconds.
pub const DEFAULT_COUNTDOWN_SECONDS: u32 = 5;

/// Capture command used when none is configured. `{output}` is replaced with
/// the clip path.
pub const DEFAULT_RECORDER_COMMAND: &str =
    "ffmpeg -hide_banner -loglevel error -y -f v4l2 -i /dev/video0 {output}";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub user: UserConfig,
    pub capture: CaptureConfig,
    pub upload: UploadConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Identifier baked into clip file names so successive users don't
    /// overwrite each other's practice clips.
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub countdown_seconds: u32,
    /// Where practice clips are written. Defaults to the platform data dir.
    pub clips_dir: Option<PathBuf>,
    /// Where reference clips for each gesture live.
    pub reference_dir: Option<PathBuf>,
    /// Shell command that records to `{output}` until stopped.
    pub recorder_command: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub endpoint: String,
    /// Abort an upload that takes longer than this. None = no limit.
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            id: "anonymous".to_string(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            countdown_seconds: DEFAULT_COUNTDOWN_SECONDS,
            clips_dir: None,
            reference_dir: None,
            recorder_command: None,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:5000/upload".to_string(),
            timeout_seconds: None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 4750 }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    pub fn clips_dir(&self) -> Result<PathBuf> {
        match &self.capture.clips_dir {
            Some(dir) => Ok(dir.clone()),
            None => global::clips_dir(),
        }
    }

    pub fn reference_dir(&self) -> Result<PathBuf> {
        match &self.capture.reference_dir {
            Some(dir) => Ok(dir.clone()),
            None => global::reference_dir(),
        }
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}
