//! Request and response snapshots passed between the policy engine, the
//! network and the cache store.

use chrono::{DateTime, Utc};
use reqwest::Method;
use std::fmt;
use std::str::FromStr;
use tokio::sync::watch;
use url::Url;

/// How the request was initiated by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  /// Top-level page navigation
  Navigate,
  /// Subresource load (script, stylesheet, XHR, ...)
  #[default]
  Subresource,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
  /// Aborts the underlying network task when fired
  pub signal: Option<AbortSignal>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      mode: RequestMode::Subresource,
      headers: Vec::new(),
      body: None,
      signal: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// A GET issued by a top-level page navigation.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_body(mut self, body: Vec<u8>) -> Self {
    self.body = Some(body);
    self
  }

  pub fn with_signal(mut self, signal: AbortSignal) -> Self {
    self.signal = Some(signal);
    self
  }

  /// Only GET requests are eligible for caching.
  pub fn is_read_only(&self) -> bool {
    self.method == Method::GET
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }
}

/// Response type as seen by the page, mirroring the fetch response types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
  /// Same-origin, fully readable
  Basic,
  /// Cross-origin, readable because the origin is allow-listed
  Cors,
  /// Cross-origin, unreadable
  Opaque,
  /// Redirect captured without being followed
  OpaqueRedirect,
  /// Synthesized by the agent
  Error,
}

impl ResponseKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseKind::Basic => "basic",
      ResponseKind::Cors => "cors",
      ResponseKind::Opaque => "opaque",
      ResponseKind::OpaqueRedirect => "opaqueredirect",
      ResponseKind::Error => "error",
    }
  }
}

impl fmt::Display for ResponseKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ResponseKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "basic" => Ok(ResponseKind::Basic),
      "cors" => Ok(ResponseKind::Cors),
      "opaque" => Ok(ResponseKind::Opaque),
      "opaqueredirect" => Ok(ResponseKind::OpaqueRedirect),
      "error" => Ok(ResponseKind::Error),
      other => Err(format!("unknown response kind: {}", other)),
    }
  }
}

/// A complete response snapshot. Bodies are fully buffered so the same
/// response can be returned to the caller and written to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub kind: ResponseKind,
  pub captured_at: DateTime<Utc>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: reason_phrase(status).to_string(),
      headers: Vec::new(),
      body: body.into(),
      kind: ResponseKind::Basic,
      captured_at: Utc::now(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_kind(mut self, kind: ResponseKind) -> Self {
    self.kind = kind;
    self
  }

  /// The response served when a subresource is unavailable offline.
  pub fn service_unavailable() -> Self {
    Self::new(503, "Offline")
      .with_header("Content-Type", "text/plain")
      .with_kind(ResponseKind::Error)
  }

  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

pub(crate) fn reason_phrase(status: u16) -> &'static str {
  reqwest::StatusCode::from_u16(status)
    .ok()
    .and_then(|s| s.canonical_reason())
    .unwrap_or("")
}

/// Fires an abort on every [`AbortSignal`] handed out.
#[derive(Debug)]
pub struct AbortController {
  tx: watch::Sender<bool>,
}

impl AbortController {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(false);
    Self { tx }
  }

  pub fn signal(&self) -> AbortSignal {
    AbortSignal {
      rx: self.tx.subscribe(),
    }
  }

  pub fn abort(&self) {
    self.tx.send_replace(true);
  }
}

impl Default for AbortController {
  fn default() -> Self {
    Self::new()
  }
}

#[derive(Debug, Clone)]
pub struct AbortSignal {
  rx: watch::Receiver<bool>,
}

impl AbortSignal {
  pub fn is_aborted(&self) -> bool {
    *self.rx.borrow()
  }

  /// Resolves once the controller aborts. Never resolves if the controller
  /// is dropped without aborting.
  pub async fn aborted(&self) {
    let mut rx = self.rx.clone();
    if rx.wait_for(|aborted| *aborted).await.is_err() {
      std::future::pending::<()>().await;
    }
  }
}
