//! Replays queued offline actions against the remote endpoint.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::clients::{ClientMessage, Clients};
use crate::error::AgentError;
use crate::queue::{ActionQueue, PendingAction};

/// Remote collaborator that applies one action.
pub trait SyncEndpoint: Send + Sync {
  fn sync_action(&self, action: &PendingAction)
    -> impl Future<Output = Result<(), AgentError>> + Send;
}

/// Posts each action's payload as JSON to a fixed endpoint.
#[derive(Clone)]
pub struct HttpSyncEndpoint {
  client: reqwest::Client,
  endpoint: Url,
  token: Option<String>,
}

impl HttpSyncEndpoint {
  pub fn new(endpoint: Url, token: Option<String>) -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self {
      client,
      endpoint,
      token,
    })
  }
}

impl SyncEndpoint for HttpSyncEndpoint {
  async fn sync_action(&self, action: &PendingAction) -> Result<(), AgentError> {
    let fail = |reason: String| AgentError::SyncAction {
      id: action.id,
      reason,
    };

    let body = serde_json::to_vec(&action.payload).map_err(|e| fail(e.to_string()))?;
    let mut req = self
      .client
      .post(self.endpoint.clone())
      .header("Content-Type", "application/json")
      .header("X-Action-Id", action.id.to_string())
      .body(body);
    if let Some(token) = &self.token {
      req = req.bearer_auth(token);
    }

    let resp = req.send().await.map_err(|e| fail(e.to_string()))?;
    if !resp.status().is_success() {
      return Err(fail(format!("endpoint returned {}", resp.status())));
    }
    Ok(())
  }
}

/// Whether a drain cycle is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
  Idle,
  Draining,
}

/// How a finished drain cycle went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
  Success,
  PartiallyFailed,
}

/// Payload of the `SYNC_COMPLETE` client message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
  pub synced: usize,
  pub failed: usize,
  pub message: String,
}

/// Result of one pass over the queue.
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
  pub synced: Vec<i64>,
  /// Action id and failure reason, in queue order
  pub failed: Vec<(i64, String)>,
}

impl DrainReport {
  pub fn outcome(&self) -> DrainOutcome {
    if self.failed.is_empty() {
      DrainOutcome::Success
    } else {
      DrainOutcome::PartiallyFailed
    }
  }

  pub fn summary(&self) -> SyncSummary {
    let message = match self.outcome() {
      DrainOutcome::Success => "Offline data synchronized successfully".to_string(),
      DrainOutcome::PartiallyFailed => format!(
        "{} of {} offline actions failed to synchronize",
        self.failed.len(),
        self.failed.len() + self.synced.len()
      ),
    };
    SyncSummary {
      synced: self.synced.len(),
      failed: self.failed.len(),
      message,
    }
  }
}

/// Drains the action queue, one action at a time, oldest first.
///
/// A failed action never blocks the rest of the pass; it stays queued with
/// its retry count bumped and is tried again on the next trigger.
pub struct SyncCoordinator<Q: ActionQueue, E: SyncEndpoint> {
  queue: Arc<Q>,
  endpoint: E,
  clients: Arc<Clients>,
  state: Mutex<SyncState>,
}

/// Returns the coordinator to `Idle` even if the drain future is dropped.
struct DrainGuard<'a> {
  state: &'a Mutex<SyncState>,
}

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    *self.state.lock().unwrap_or_else(|e| e.into_inner()) = SyncState::Idle;
  }
}

impl<Q: ActionQueue, E: SyncEndpoint> SyncCoordinator<Q, E> {
  pub fn new(queue: Arc<Q>, endpoint: E, clients: Arc<Clients>) -> Self {
    Self {
      queue,
      endpoint,
      clients,
      state: Mutex::new(SyncState::Idle),
    }
  }

  fn lock_state(&self) -> MutexGuard<'_, SyncState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn state(&self) -> SyncState {
    *self.lock_state()
  }

  /// Run one drain cycle. Returns `None` when a cycle is already running.
  pub async fn drain(&self) -> Result<Option<DrainReport>> {
    {
      let mut state = self.lock_state();
      if *state == SyncState::Draining {
        debug!("Drain already in progress, skipping");
        return Ok(None);
      }
      *state = SyncState::Draining;
    }
    let _guard = DrainGuard { state: &self.state };

    let actions = self.queue.list()?;
    info!(pending = actions.len(), "Background sync started");

    let mut report = DrainReport::default();
    for action in actions {
      match self.endpoint.sync_action(&action).await {
        Ok(()) => match self.queue.remove(action.id) {
          Ok(()) => {
            info!(id = action.id, "Synced offline action");
            report.synced.push(action.id);
          }
          Err(e) => {
            // Applied remotely but still queued; it will be replayed
            error!(id = action.id, "Failed to remove synced action: {}", e);
            report.failed.push((action.id, e.to_string()));
          }
        },
        Err(e) => {
          error!(id = action.id, retries = action.retry_count, "Failed to sync action: {}", e);
          if let Err(e) = self.queue.record_failure(action.id) {
            warn!(id = action.id, "Failed to record sync failure: {}", e);
          }
          report.failed.push((action.id, e.to_string()));
        }
      }
    }

    let summary = report.summary();
    let notified = self.clients.post_all(ClientMessage::SyncComplete {
      summary: summary.clone(),
    });
    info!(
      synced = summary.synced,
      failed = summary.failed,
      notified,
      "Background sync finished"
    );

    Ok(Some(report))
  }
}
