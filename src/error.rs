//! Error taxonomy for the agent's policy paths.
//!
//! Storage and wiring code returns `color_eyre::Result`; the variants here are
//! the failures the policy engine, lifecycle and sync code reason about.

use thiserror::Error;

use crate::lifecycle::LifecycleState;

/// Reasons a network fetch did not produce a response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
  #[error("no network connectivity")]
  Offline,
  #[error("dns lookup failed: {0}")]
  Dns(String),
  #[error("request timed out")]
  Timeout,
  #[error("request aborted")]
  Aborted,
  #[error("transport error: {0}")]
  Transport(String),
}

impl From<reqwest::Error> for NetworkError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      NetworkError::Timeout
    } else if e.is_connect() {
      // reqwest folds resolver failures into connect errors
      let mut source = std::error::Error::source(&e);
      while let Some(inner) = source {
        let msg = inner.to_string();
        if msg.contains("dns error") {
          return NetworkError::Dns(msg);
        }
        source = std::error::Error::source(inner);
      }
      NetworkError::Offline
    } else {
      NetworkError::Transport(e.to_string())
    }
  }
}

#[derive(Debug, Error)]
pub enum AgentError {
  /// A manifest entry could not be fetched; the install attempt is abandoned.
  #[error("install of {version} failed on {url}: {reason}")]
  Install {
    version: String,
    url: String,
    reason: String,
  },

  #[error("cache write failed for {url}: {reason}")]
  CacheWrite { url: String, reason: String },

  /// Navigation failed with no network and no cached offline page.
  #[error("{url} is unavailable offline")]
  OfflineUnavailable { url: String },

  #[error("sync of action {id} failed: {reason}")]
  SyncAction { id: i64, reason: String },

  #[error("malformed push payload: {0}")]
  MalformedPushPayload(String),

  #[error("invalid lifecycle state: expected {expected}, got {actual}")]
  InvalidState {
    expected: LifecycleState,
    actual: LifecycleState,
  },
}
