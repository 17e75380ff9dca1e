use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::agent::AgentSettings;
use crate::fetch::OriginPolicy;
use crate::push::NotificationStyle;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Cache version tag; bump it to force a new cache generation
  pub version: String,
  /// Application origin, e.g. https://itam.example.com
  pub origin: Url,
  #[serde(default = "default_offline_url")]
  pub offline_url: String,
  /// Assets cached unconditionally at install (relative to `origin` or absolute)
  #[serde(default)]
  pub manifest: Vec<String>,
  /// External hosts whose responses may be cached at runtime (CDNs)
  #[serde(default, deserialize_with = "deserialize_lowercase_list")]
  pub allowed_origins: Vec<String>,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub notification: NotificationStyle,
  /// Database file (defaults to the user data directory)
  pub database: Option<PathBuf>,
  /// Connect timeout for network fetches; unset leaves the transport default
  pub connect_timeout_secs: Option<u64>,
}

fn default_offline_url() -> String {
  "/offline.html".to_string()
}

fn deserialize_lowercase_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Tag of the one-off background sync that drains the action queue
  pub tag: String,
  /// Tag of the periodic sync that refreshes asset data
  pub periodic_tag: String,
  /// Endpoint receiving queued actions (defaults to `<origin>/api/sync`)
  pub endpoint: Option<Url>,
  /// Seconds between scheduler ticks in `run`
  pub interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "background-sync".to_string(),
      periodic_tag: "asset-updates".to_string(),
      endpoint: None,
      interval_secs: 300,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-agent.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-agent/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offline-agent/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-agent.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-agent").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    if config.version.trim().is_empty() {
      return Err(eyre!("version must not be empty"));
    }
    Ok(config)
  }

  pub fn origin_policy(&self) -> OriginPolicy {
    OriginPolicy::new(self.origin.clone(), self.allowed_origins.iter().cloned())
  }

  /// Settings for an agent instance of the configured version.
  ///
  /// The offline page is always part of the manifest, since navigations
  /// fall back to it when the network is gone.
  pub fn agent_settings(&self) -> Result<AgentSettings> {
    let origins = self.origin_policy();
    let offline_url = origins
      .resolve(&self.offline_url)
      .map_err(|e| eyre!("Invalid offline_url {}: {}", self.offline_url, e))?;

    let mut manifest = self.manifest.clone();
    let listed = manifest
      .iter()
      .any(|path| origins.resolve(path).ok().as_ref() == Some(&offline_url));
    if !listed {
      manifest.push(self.offline_url.clone());
    }

    Ok(AgentSettings {
      version: self.version.clone(),
      origins,
      offline_url,
      manifest,
      sync_tag: self.sync.tag.clone(),
      periodic_tag: self.sync.periodic_tag.clone(),
      notification: self.notification.clone(),
    })
  }

  pub fn sync_endpoint(&self) -> Result<Url> {
    match &self.sync.endpoint {
      Some(url) => Ok(url.clone()),
      None => self
        .origin
        .join("/api/sync")
        .map_err(|e| eyre!("Invalid sync endpoint: {}", e)),
    }
  }

  pub fn connect_timeout(&self) -> Option<Duration> {
    self.connect_timeout_secs.map(Duration::from_secs)
  }

  pub fn sync_interval(&self) -> Duration {
    Duration::from_secs(self.sync.interval_secs.max(1))
  }

  /// Get the sync endpoint bearer token from the environment, if set.
  ///
  /// Checks OFFLINE_AGENT_SYNC_TOKEN.
  pub fn get_sync_token() -> Option<String> {
    std::env::var("OFFLINE_AGENT_SYNC_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}
