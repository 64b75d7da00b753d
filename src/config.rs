//! Configuration types for media-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Download behavior configuration (directories, concurrency, collisions)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// User-visible directory completed downloads are copied into (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Directory for in-progress temporary files (default: "./temp")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Maximum concurrently running pipelines (default: 3, 0 = unbounded)
    ///
    /// Accepted links beyond the limit stay `Queued` until a slot frees up.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// File collision handling when relocating into `download_dir`
    #[serde(default)]
    pub file_collision: FileCollisionAction,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            temp_dir: default_temp_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            file_collision: FileCollisionAction::default(),
        }
    }
}

/// Event pacing configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventConfig {
    /// Minimum gap between two non-terminal updates for the same link (default: 201ms)
    ///
    /// Presentation layers commonly rate-limit notification updates somewhere
    /// between 100ms and 200ms, so updates closer together than that are lost.
    #[serde(default = "default_update_interval", with = "duration_millis_serde")]
    pub update_interval: Duration,

    /// Minimum gap between two accepted links entering the queue (default: 201ms)
    #[serde(default = "default_update_interval", with = "duration_millis_serde")]
    pub intake_interval: Duration,

    /// Broadcast buffer size for subscribers (default: 1000)
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            update_interval: default_update_interval(),
            intake_interval: default_update_interval(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// HTTP client configuration for the built-in fetchers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Connection timeout (default: 30s)
    #[serde(default = "default_connect_timeout", with = "duration_millis_serde")]
    pub connect_timeout: Duration,

    /// Per-read timeout for response bodies (None = no timeout)
    #[serde(default, with = "optional_duration_millis_serde")]
    pub read_timeout: Option<Duration>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout: default_connect_timeout(),
            read_timeout: None,
        }
    }
}

impl HttpConfig {
    /// Build a reqwest client from these settings
    pub fn build_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .connect_timeout(self.connect_timeout);
        if let Some(timeout) = self.read_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder.build()?)
    }
}

/// Main configuration for MediaDownloader
///
/// Sub-configs are flattened, so the serialized form is a single flat object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Directories, concurrency and collision settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Event pacing settings
    #[serde(flatten)]
    pub events: EventConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,
}

impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Temporary directory
    pub fn temp_dir(&self) -> &PathBuf {
        &self.download.temp_dir
    }

    /// Check settings that would make the downloader misbehave
    pub fn validate(&self) -> Result<()> {
        if self.events.update_interval.is_zero() {
            return Err(config_error(
                "update_interval must be greater than zero",
                "update_interval",
            ));
        }
        if self.events.intake_interval.is_zero() {
            return Err(config_error(
                "intake_interval must be greater than zero",
                "intake_interval",
            ));
        }
        if self.events.channel_capacity == 0 {
            return Err(config_error(
                "channel_capacity must be greater than zero",
                "channel_capacity",
            ));
        }
        if self.http.user_agent.trim().is_empty() {
            return Err(config_error("user_agent must not be empty", "user_agent"));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

/// File collision handling strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCollisionAction {
    /// Append (1), (2), etc. to filename (default)
    #[default]
    Rename,
    /// Overwrite existing file
    Overwrite,
    /// Fail the job, keep the existing file
    Skip,
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_update_interval() -> Duration {
    Duration::from_millis(201)
}

fn default_channel_capacity() -> usize {
    1000
}

fn default_user_agent() -> String {
    concat!("media-dl/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

// Duration serialization helper (milliseconds)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// Optional Duration serialization helper (milliseconds)
mod optional_duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
