//! Test doubles for the agent's external collaborators.

use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

use crate::cache::{CacheStore, RequestKey, SqliteCacheStore};
use crate::db;
use crate::error::{AgentError, NetworkError};
use crate::fetch::{Network, Request, Response};
use crate::push::{Notification, Notifier};
use crate::queue::PendingAction;
use crate::sync::SyncEndpoint;

#[derive(Default)]
struct NetworkState {
  responses: HashMap<String, Response>,
  failing: HashSet<String>,
  offline: bool,
  hang: bool,
  hanging: HashSet<String>,
  calls: Vec<String>,
}

/// Scripted network: canned responses per URL, 404 for anything else.
#[derive(Clone, Default)]
pub struct MockNetwork {
  state: Arc<Mutex<NetworkState>>,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_response(self, url: &str, response: Response) -> Self {
    self
      .state
      .lock()
      .unwrap()
      .responses
      .insert(url.to_string(), response);
    self
  }

  pub fn set_offline(&self, offline: bool) {
    self.state.lock().unwrap().offline = offline;
  }

  /// Make fetches of `url` fail with a transport error.
  pub fn fail_on(&self, url: &str) {
    self.state.lock().unwrap().failing.insert(url.to_string());
  }

  /// Make every fetch pend forever.
  pub fn hang(&self) {
    self.state.lock().unwrap().hang = true;
  }

  /// Make fetches of `url` pend forever.
  pub fn hang_on(&self, url: &str) {
    self.state.lock().unwrap().hanging.insert(url.to_string());
  }

  pub fn calls(&self) -> Vec<String> {
    self.state.lock().unwrap().calls.clone()
  }
}

impl Network for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let url = request.url.to_string();
    let (result, hang) = {
      let mut state = self.state.lock().unwrap();
      state.calls.push(url.clone());
      let result = if state.offline {
        Err(NetworkError::Offline)
      } else if state.failing.contains(&url) {
        Err(NetworkError::Transport(format!("connection reset: {}", url)))
      } else {
        Ok(
          state
            .responses
            .get(&url)
            .cloned()
            .unwrap_or_else(|| Response::new(404, "Not Found")),
        )
      };
      (result, state.hang || state.hanging.contains(&url))
    };

    if hang {
      std::future::pending::<()>().await;
    }
    result
  }
}

#[derive(Default)]
struct SyncState {
  failing: HashSet<i64>,
  attempted: Vec<i64>,
  delay: Option<Duration>,
}

/// Sync endpoint that accepts everything except actions marked as failing.
#[derive(Clone, Default)]
pub struct MockSyncEndpoint {
  state: Arc<Mutex<SyncState>>,
}

impl MockSyncEndpoint {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_delay(self, delay: Duration) -> Self {
    self.state.lock().unwrap().delay = Some(delay);
    self
  }

  pub fn fail_on(&self, id: i64) {
    self.state.lock().unwrap().failing.insert(id);
  }

  pub fn recover(&self, id: i64) {
    self.state.lock().unwrap().failing.remove(&id);
  }

  pub fn attempted(&self) -> Vec<i64> {
    self.state.lock().unwrap().attempted.clone()
  }
}

impl SyncEndpoint for MockSyncEndpoint {
  async fn sync_action(&self, action: &PendingAction) -> Result<(), AgentError> {
    let (fails, delay) = {
      let mut state = self.state.lock().unwrap();
      state.attempted.push(action.id);
      (state.failing.contains(&action.id), state.delay)
    };

    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    if fails {
      return Err(AgentError::SyncAction {
        id: action.id,
        reason: "endpoint rejected action".to_string(),
      });
    }
    Ok(())
  }
}

/// Notifier that keeps every notification it is asked to show.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
  shown: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
  pub fn shown(&self) -> Vec<Notification> {
    self.shown.lock().unwrap().clone()
  }
}

impl Notifier for RecordingNotifier {
  fn show(&self, notification: Notification) -> Result<()> {
    self.shown.lock().unwrap().push(notification);
    Ok(())
  }
}

/// In-memory SQLite store that counts every call and can be told to reject writes.
#[derive(Default)]
pub struct InstrumentedStore {
  inner: Option<SqliteCacheStore>,
  calls: AtomicUsize,
  fail_writes: AtomicBool,
  fail_reads: AtomicBool,
}

impl InstrumentedStore {
  pub fn new() -> Self {
    Self {
      inner: Some(SqliteCacheStore::new(db::open_in_memory().unwrap())),
      ..Self::default()
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn fail_writes(&self) {
    self.fail_writes.store(true, Ordering::SeqCst);
  }

  pub fn fail_reads(&self) {
    self.fail_reads.store(true, Ordering::SeqCst);
  }

  fn inner(&self) -> &SqliteCacheStore {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.inner.as_ref().unwrap()
  }

  fn check_write(&self) -> Result<()> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(eyre!("disk full"));
    }
    Ok(())
  }
}

impl CacheStore for InstrumentedStore {
  fn open_generation(&self, tag: &str) -> Result<()> {
    self.check_write()?;
    self.inner().open_generation(tag)
  }

  fn get(&self, tag: &str, key: &RequestKey) -> Result<Option<Response>> {
    if self.fail_reads.load(Ordering::SeqCst) {
      self.calls.fetch_add(1, Ordering::SeqCst);
      return Err(eyre!("database is locked"));
    }
    self.inner().get(tag, key)
  }

  fn put(&self, tag: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.check_write()?;
    self.inner.as_ref().unwrap().put(tag, key, response)
  }

  fn put_existing(&self, tag: &str, key: &RequestKey, response: &Response) -> Result<bool> {
    self.check_write()?;
    self.inner().put_existing(tag, key, response)
  }

  fn install_generation(&self, tag: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    self.check_write()?;
    self.inner().install_generation(tag, entries)
  }

  fn list_generation_tags(&self) -> Result<Vec<String>> {
    self.inner().list_generation_tags()
  }

  fn delete(&self, tag: &str) -> Result<bool> {
    self.check_write()?;
    self.inner().delete(tag)
  }
}

/// Answer one HTTP request on a local port with `status_line` and an empty
/// body. The task resolves to the raw request text it received.
pub async fn serve_once(status_line: &'static str) -> (Url, JoinHandle<String>) {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let url = Url::parse(&format!("http://{}/api/sync", listener.local_addr().unwrap())).unwrap();

  let task = tokio::spawn(async move {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut raw = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
      let n = socket.read(&mut buf).await.unwrap();
      if n == 0 {
        break;
      }
      raw.extend_from_slice(&buf[..n]);
      let text = String::from_utf8_lossy(&raw).to_string();
      if let Some(end) = text.find("\r\n\r\n") {
        let length = text[..end]
          .lines()
          .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name
              .eq_ignore_ascii_case("content-length")
              .then(|| value.trim().parse::<usize>().ok())?
          })
          .unwrap_or(0);
        if raw.len() >= end + 4 + length {
          break;
        }
      }
    }
    let reply = format!("HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status_line);
    socket.write_all(reply.as_bytes()).await.unwrap();
    socket.shutdown().await.unwrap();
    String::from_utf8_lossy(&raw).to_string()
  });

  (url, task)
}
