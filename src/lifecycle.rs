//! Install/activate lifecycle of one agent instance.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info};

use crate::cache::{CacheStore, RequestKey};
use crate::clients::Clients;
use crate::error::AgentError;
use crate::fetch::{Network, OriginPolicy, Request};

/// Lifecycle states of an agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Created, install not started
  Uninitialized,
  /// Pre-warming the cache generation
  Installing,
  /// Generation populated, waiting to activate
  Installed,
  /// Removing stale generations and claiming clients
  Activating,
  /// Intercepting requests
  Active,
  /// Install failed; this instance never serves
  Redundant,
}

impl LifecycleState {
  /// Only an active instance may intercept requests.
  pub fn can_intercept(&self) -> bool {
    matches!(self, LifecycleState::Active)
  }
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      LifecycleState::Uninitialized => "uninitialized",
      LifecycleState::Installing => "installing",
      LifecycleState::Installed => "installed",
      LifecycleState::Activating => "activating",
      LifecycleState::Active => "active",
      LifecycleState::Redundant => "redundant",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub version: String,
  pub entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
  /// Stale generations that were deleted
  pub deleted: Vec<String>,
  /// Open pages now controlled by this instance
  pub claimed: usize,
}

/// Drives one instance through install and activate.
pub struct LifecycleController<S: CacheStore, N: Network> {
  store: Arc<S>,
  network: Arc<N>,
  clients: Arc<Clients>,
  origins: OriginPolicy,
  version: String,
  manifest: Vec<String>,
  state: Mutex<LifecycleState>,
}

impl<S: CacheStore, N: Network> LifecycleController<S, N> {
  pub fn new(
    store: Arc<S>,
    network: Arc<N>,
    clients: Arc<Clients>,
    origins: OriginPolicy,
    version: impl Into<String>,
    manifest: Vec<String>,
  ) -> Self {
    Self {
      store,
      network,
      clients,
      origins,
      version: version.into(),
      manifest,
      state: Mutex::new(LifecycleState::Uninitialized),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn state(&self) -> LifecycleState {
    *self.lock_state()
  }

  pub fn is_active(&self) -> bool {
    self.state().can_intercept()
  }

  fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn set_state(&self, state: LifecycleState) {
    *self.lock_state() = state;
  }

  /// Move `from` → `to`, failing if the instance is elsewhere.
  fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<(), AgentError> {
    let mut state = self.lock_state();
    if *state != from {
      return Err(AgentError::InvalidState {
        expected: from,
        actual: *state,
      });
    }
    *state = to;
    Ok(())
  }

  /// Pre-warm the cache with every manifest entry.
  ///
  /// All-or-nothing: the generation and its entries are written in one step
  /// only after every fetch succeeded. On failure the instance becomes
  /// redundant and the store is left as it was.
  pub async fn install(&self) -> Result<InstallReport, AgentError> {
    self.transition(LifecycleState::Uninitialized, LifecycleState::Installing)?;
    info!(version = %self.version, "Installing");

    match self.populate().await {
      Ok(entries) => {
        self.set_state(LifecycleState::Installed);
        info!(version = %self.version, entries, "Assets cached, skipping wait");
        Ok(InstallReport {
          version: self.version.clone(),
          entries,
        })
      }
      Err(e) => {
        error!("Cache install failed: {}", e);
        self.set_state(LifecycleState::Redundant);
        Err(e)
      }
    }
  }

  async fn populate(&self) -> Result<usize, AgentError> {
    let fail = |url: &str, reason: String| AgentError::Install {
      version: self.version.clone(),
      url: url.to_string(),
      reason,
    };

    let urls = self
      .manifest
      .iter()
      .map(|path| self.origins.resolve(path).map_err(|e| fail(path, e.to_string())))
      .collect::<Result<Vec<_>, _>>()?;

    let entries = try_join_all(urls.into_iter().map(|url| async move {
      let response = self
        .network
        .fetch(&Request::get(url.clone()))
        .await
        .map_err(|e| fail(url.as_str(), e.to_string()))?;
      if !response.is_ok() {
        return Err(fail(url.as_str(), format!("status {}", response.status)));
      }
      Ok((RequestKey::get(&url), response))
    }))
    .await?;

    self
      .store
      .install_generation(&self.version, &entries)
      .map_err(|e| fail("<store>", e.to_string()))?;

    Ok(entries.len())
  }

  /// Delete every generation but the current one, then claim open pages.
  pub async fn activate(&self) -> Result<ActivateReport> {
    self.transition(LifecycleState::Installed, LifecycleState::Activating)?;
    info!(version = %self.version, "Activating");

    match self.collect_garbage() {
      Ok(deleted) => {
        let claimed = self.clients.claim(&self.version);
        self.set_state(LifecycleState::Active);
        info!(version = %self.version, claimed, "Activated");
        Ok(ActivateReport { deleted, claimed })
      }
      Err(e) => {
        // Installed generation is intact; activation can be retried
        self.set_state(LifecycleState::Installed);
        Err(e)
      }
    }
  }

  /// Resume a version installed by an earlier process. The manifest is not
  /// fetched again; the instance activates straight from its stored generation.
  pub async fn restore(&self) -> Result<ActivateReport> {
    self.transition(LifecycleState::Uninitialized, LifecycleState::Installing)?;

    let installed = match self.is_installed() {
      Ok(installed) => installed,
      Err(e) => {
        self.set_state(LifecycleState::Uninitialized);
        return Err(e);
      }
    };
    if !installed {
      self.set_state(LifecycleState::Uninitialized);
      return Err(eyre!("Version {} is not installed", self.version));
    }

    self.set_state(LifecycleState::Installed);
    self.activate().await
  }

  /// Whether this version's generation is already in the store.
  pub fn is_installed(&self) -> Result<bool> {
    Ok(
      self
        .store
        .list_generation_tags()?
        .iter()
        .any(|tag| *tag == self.version),
    )
  }

  fn collect_garbage(&self) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for tag in self.store.list_generation_tags()? {
      if tag != self.version {
        info!(generation = %tag, "Deleting old cache");
        self.store.delete(&tag)?;
        deleted.push(tag);
      }
    }
    Ok(deleted)
  }
}
