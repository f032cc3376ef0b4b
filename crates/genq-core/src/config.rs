use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::job::JobKind;

/// Queue tuning (optional `[queue]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum image jobs in Submitting/Processing at once.
    pub image_concurrency: usize,
    /// Maximum video jobs in Submitting/Processing at once.
    pub video_concurrency: usize,
    /// Time budget per job in seconds, counted from enqueue (or manual retry).
    pub timeout_secs: u64,
    /// Leader heartbeat interval in milliseconds.
    pub heartbeat_ms: u64,
    /// A lease older than this (milliseconds) may be taken over.
    pub lease_ttl_ms: u64,
    /// Per-job poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Progress shown right after a successful submission.
    pub submit_progress_floor: u8,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            image_concurrency: 6,
            video_concurrency: 6,
            timeout_secs: 10 * 60,
            heartbeat_ms: 3_000,
            lease_ttl_ms: 10_000,
            poll_interval_ms: 5_000,
            submit_progress_floor: 10,
        }
    }
}

impl QueueConfig {
    /// Capacity for one job kind. Zero is treated as one so a kind can never stall.
    pub fn concurrency(&self, kind: JobKind) -> usize {
        let cap = match kind {
            JobKind::Image => self.image_concurrency,
            JobKind::Video => self.video_concurrency,
        };
        cap.max(1)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms.max(1))
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// One configured generation provider (base URL + credentials).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

/// Endpoint handed to provider adapters: where to send requests and with which key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub api_key: String,
}

/// Provider credentials as seen by the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvidersConfig {
    pub providers: Vec<ProviderEntry>,
    pub selected: Option<String>,
}

impl ProvidersConfig {
    fn usable(&self, id: &str) -> Option<&ProviderEntry> {
        self.providers
            .iter()
            .find(|p| p.id == id && !p.api_key.is_empty())
    }

    /// Resolve the endpoint for a job's provider id.
    ///
    /// Falls back to the currently selected provider when the job's provider no
    /// longer has credentials. Returns None when neither is usable.
    pub fn resolve(&self, provider_id: Option<&str>) -> Option<ProviderEndpoint> {
        let entry = provider_id
            .and_then(|id| self.usable(id))
            .or_else(|| self.selected.as_deref().and_then(|id| self.usable(id)))?;
        Some(ProviderEndpoint {
            base_url: entry.base_url.trim_end_matches('/').to_string(),
            api_key: entry.api_key.clone(),
        })
    }
}

/// Global configuration loaded from `~/.config/genq/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenqConfig {
    /// Optional queue tuning; if missing, built-in defaults are used.
    #[serde(default)]
    pub queue: Option<QueueConfig>,
    /// Provider used for new jobs when none is given explicitly.
    #[serde(default)]
    pub selected_provider: Option<String>,
    /// Where finished artifacts are written (None = XDG data dir).
    #[serde(default)]
    pub artifacts_dir: Option<PathBuf>,
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
}

impl GenqConfig {
    pub fn queue_settings(&self) -> QueueConfig {
        self.queue.clone().unwrap_or_default()
    }

    pub fn providers_config(&self) -> ProvidersConfig {
        ProvidersConfig {
            providers: self.providers.clone(),
            selected: self.selected_provider.clone(),
        }
    }

    /// Artifact root: configured dir, else `~/.local/share/genq/artifacts`.
    pub fn artifacts_root(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.artifacts_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("genq")?;
        Ok(xdg_dirs.get_data_home().join("artifacts"))
    }

    fn with_known_providers() -> Self {
        let providers = [
            ("tuzi", "Tuzi API", "https://api.tu-zi.com"),
            ("bltcy", "Bltcy AI", "https://api.bltcy.ai"),
        ]
        .into_iter()
        .map(|(id, name, base_url)| ProviderEntry {
            id: id.to_string(),
            name: name.to_string(),
            base_url: base_url.to_string(),
            api_key: String::new(),
        })
        .collect();
        Self {
            queue: Some(QueueConfig::default()),
            selected_provider: None,
            artifacts_dir: None,
            providers,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("genq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<GenqConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = GenqConfig::with_known_providers();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: GenqConfig = toml::from_str(&data)?;
    Ok(cfg)
}
