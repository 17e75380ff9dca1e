//! Open pages (clients) and the broadcast channel used to notify them.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::sync::SyncSummary;

/// Messages posted to every open page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  SyncComplete { summary: SyncSummary },
  DataUpdated { message: String },
}

/// An open page routed through some agent instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
  pub id: u64,
  pub url: String,
  /// Version tag of the instance controlling this page, if any
  pub controller: Option<String>,
}

/// Registry of open pages shared by every agent instance in a host.
pub struct Clients {
  pages: Mutex<BTreeMap<u64, Client>>,
  next_id: AtomicU64,
  tx: broadcast::Sender<ClientMessage>,
}

impl Clients {
  pub fn new() -> Self {
    let (tx, _rx) = broadcast::channel(64);
    Self {
      pages: Mutex::new(BTreeMap::new()),
      next_id: AtomicU64::new(1),
      tx,
    }
  }

  fn pages(&self) -> MutexGuard<'_, BTreeMap<u64, Client>> {
    // The map is always left consistent, so a poisoned lock is still usable
    self.pages.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Register an open page. It starts uncontrolled until an instance claims it.
  pub fn register(&self, url: impl Into<String>) -> u64 {
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
    let url = url.into();
    debug!(id, %url, "Client registered");
    self.pages().insert(
      id,
      Client {
        id,
        url,
        controller: None,
      },
    );
    id
  }

  pub fn unregister(&self, id: u64) -> bool {
    self.pages().remove(&id).is_some()
  }

  /// Open a new page at `url`, as a notification click would.
  pub fn open_window(&self, url: &str) -> u64 {
    info!(%url, "Opening client window");
    self.register(url)
  }

  /// Subscribe to broadcast messages.
  pub fn subscribe(&self) -> broadcast::Receiver<ClientMessage> {
    self.tx.subscribe()
  }

  pub fn match_all(&self) -> Vec<Client> {
    self.pages().values().cloned().collect()
  }

  /// Make `version` the controller of every open page. Returns the number of
  /// pages claimed.
  pub fn claim(&self, version: &str) -> usize {
    let mut pages = self.pages();
    for page in pages.values_mut() {
      page.controller = Some(version.to_string());
    }
    pages.len()
  }

  /// Post a message to every open page. Returns how many pages it went to.
  pub fn post_all(&self, message: ClientMessage) -> usize {
    let count = self.pages().len();
    if count == 0 {
      return 0;
    }
    // No live subscribers just means nobody is listening right now
    let _ = self.tx.send(message);
    count
  }
}

impl Default for Clients {
  fn default() -> Self {
    Self::new()
  }
}
