use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::StoreOptions;
use crate::sync::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub media: MediaConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Close a tenant database after this many idle seconds.
    #[serde(default = "default_idle_close_secs")]
    pub idle_close_secs: u64,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_idle_close_secs() -> u64 {
    60
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            idle_close_secs: default_idle_close_secs(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,

    /// Run ffprobe on uploaded videos.
    #[serde(default = "default_probe_video")]
    pub probe_video: bool,

    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
}

fn default_max_page_size() -> u32 {
    100
}

fn default_probe_video() -> bool {
    true
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_page_size: default_max_page_size(),
            probe_video: default_probe_video(),
            ffprobe_path: default_ffprobe_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_upload_backoff_ms")]
    pub upload_backoff_ms: u64,

    #[serde(default = "default_delete_backoff_ms")]
    pub delete_backoff_ms: u64,

    #[serde(default = "default_commit_attempts")]
    pub commit_attempts: u32,

    /// Upper bound for a single call to a remote destination.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Queue a sync for every active account at startup.
    #[serde(default = "default_schedule_on_startup")]
    pub schedule_on_startup: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_upload_backoff_ms() -> u64 {
    1000
}

fn default_delete_backoff_ms() -> u64 {
    60_000
}

fn default_commit_attempts() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_schedule_on_startup() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            upload_backoff_ms: default_upload_backoff_ms(),
            delete_backoff_ms: default_delete_backoff_ms(),
            commit_attempts: default_commit_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
            schedule_on_startup: default_schedule_on_startup(),
        }
    }
}

fn default_data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dmedia")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            store: StoreConfig::default(),
            media: MediaConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path`, or the default location. A missing file is created
    /// with defaults. `DMEDIA_DATA` overrides the data root.
    ///
    /// Also returns notices about the load (a default file written, zero
    /// values replaced). Logging usually depends on the loaded config, so the
    /// caller logs them once a subscriber is installed.
    pub fn load(path: Option<&Path>) -> Result<(Self, Vec<String>)> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);
        let mut notices = Vec::new();

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file {:?}", config_path))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse config file {:?}", config_path))?
        } else {
            let config = Config::default();
            config.save(&config_path)?;
            notices.push(format!("Wrote default config to {:?}", config_path));
            config
        };

        if let Ok(root) = std::env::var("DMEDIA_DATA") {
            if !root.is_empty() {
                config.data_root = PathBuf::from(root);
            }
        }
        notices.extend(config.sanitize());
        Ok((config, notices))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// `DMEDIA_CONFIG`, else `<config dir>/dmedia/config.toml`.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("DMEDIA_CONFIG") {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dmedia")
            .join("config.toml")
    }

    /// Replace zero intervals and counts, which would spin or never run.
    fn sanitize(&mut self) -> Vec<String> {
        let mut notices = Vec::new();
        if self.store.idle_close_secs == 0 {
            notices.push(format!("store.idle_close_secs is 0, using {}", default_idle_close_secs()));
            self.store.idle_close_secs = default_idle_close_secs();
        }
        if self.media.max_page_size == 0 {
            notices.push(format!("media.max_page_size is 0, using {}", default_max_page_size()));
            self.media.max_page_size = default_max_page_size();
        }
        if self.sync.max_attempts == 0 {
            notices.push(format!("sync.max_attempts is 0, using {}", default_max_attempts()));
            self.sync.max_attempts = default_max_attempts();
        }
        if self.sync.commit_attempts == 0 {
            notices.push(format!("sync.commit_attempts is 0, using {}", default_commit_attempts()));
            self.sync.commit_attempts = default_commit_attempts();
        }
        if self.sync.request_timeout_secs == 0 {
            notices.push(format!(
                "sync.request_timeout_secs is 0, using {}",
                default_request_timeout_secs()
            ));
            self.sync.request_timeout_secs = default_request_timeout_secs();
        }
        notices
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_root.join("logs")
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            data_root: self.data_root.clone(),
            idle_interval: Duration::from_secs(self.store.idle_close_secs),
            busy_timeout: Duration::from_millis(self.store.busy_timeout_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.sync.max_attempts,
            upload_backoff: Duration::from_millis(self.sync.upload_backoff_ms),
            delete_backoff: Duration::from_millis(self.sync.delete_backoff_ms),
            commit_attempts: self.sync.commit_attempts,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.request_timeout_secs)
    }

    /// ffprobe binary, or `None` when video probing is off.
    pub fn ffprobe(&self) -> Option<PathBuf> {
        self.media.probe_video.then(|| self.media.ffprobe_path.clone())
    }
}
