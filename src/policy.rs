//! Request interception policy: cache-first with network write-through and
//! offline fallbacks.

use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStore, RequestKey};
use crate::error::{AgentError, NetworkError};
use crate::fetch::{Network, OriginPolicy, Request, Response, ResponseKind};

/// What the agent decided to do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  /// Not intercepted; the page talks to the network directly
  PassThrough,
  /// Answered by the agent
  Respond(Response),
}

impl FetchOutcome {
  pub fn response(&self) -> Option<&Response> {
    match self {
      FetchOutcome::Respond(resp) => Some(resp),
      FetchOutcome::PassThrough => None,
    }
  }
}

/// Decides how each request is answered for one cache generation.
pub struct InterceptionPolicy<S: CacheStore, N: Network> {
  store: Arc<S>,
  network: Arc<N>,
  origins: OriginPolicy,
  version: String,
  offline_url: Url,
}

impl<S: CacheStore, N: Network> InterceptionPolicy<S, N> {
  pub fn new(
    store: Arc<S>,
    network: Arc<N>,
    origins: OriginPolicy,
    version: impl Into<String>,
    offline_url: Url,
  ) -> Self {
    Self {
      store,
      network,
      origins,
      version: version.into(),
      offline_url,
    }
  }

  /// Handle one intercepted request.
  ///
  /// 1. Non-GET and foreign-origin requests pass through untouched
  /// 2. Cache hits are served without touching the network
  /// 3. Misses go to the network; cacheable successes are written through
  /// 4. Network failures fall back to the offline page (navigations) or a 503
  pub async fn handle(&self, request: &Request) -> Result<FetchOutcome, AgentError> {
    let Some(key) = RequestKey::for_request(request) else {
      return Ok(FetchOutcome::PassThrough);
    };
    if !self.origins.is_interceptable(&request.url) {
      return Ok(FetchOutcome::PassThrough);
    }

    match self.store.get(&self.version, &key) {
      Ok(Some(cached)) => {
        debug!(url = %request.url, "Serving from cache");
        return Ok(FetchOutcome::Respond(cached));
      }
      Ok(None) => {}
      Err(e) => warn!(url = %request.url, "Cache lookup failed, treating as miss: {}", e),
    }

    match self.fetch_network(request).await {
      Ok(response) => {
        if self.is_cacheable(request, &response) {
          self.write_through(&key, &response);
        }
        Ok(FetchOutcome::Respond(response))
      }
      Err(e) => {
        info!(url = %request.url, "Network fetch failed ({}), serving offline content", e);
        self.offline_fallback(request).map(FetchOutcome::Respond)
      }
    }
  }

  /// Fetch from the network, giving up as soon as the request's abort
  /// signal fires.
  async fn fetch_network(&self, request: &Request) -> Result<Response, NetworkError> {
    let Some(signal) = &request.signal else {
      return self.network.fetch(request).await;
    };
    if signal.is_aborted() {
      return Err(NetworkError::Aborted);
    }
    tokio::select! {
      result = self.network.fetch(request) => result,
      _ = signal.aborted() => Err(NetworkError::Aborted),
    }
  }

  fn is_cacheable(&self, request: &Request, response: &Response) -> bool {
    if response.status != 200 {
      return false;
    }
    match response.kind {
      ResponseKind::Basic => true,
      ResponseKind::Cors => self.origins.is_allow_listed(&request.url),
      ResponseKind::Opaque | ResponseKind::OpaqueRedirect | ResponseKind::Error => false,
    }
  }

  /// Best-effort: a failed write is logged and the response still returned.
  /// A generation deleted by a newer version's activation stays deleted.
  fn write_through(&self, key: &RequestKey, response: &Response) {
    match self.store.put_existing(&self.version, key, response) {
      Ok(true) => debug!(url = %key.url(), "Caching new asset"),
      Ok(false) => debug!(url = %key.url(), version = %self.version, "Generation retired, not caching"),
      Err(e) => {
        let err = AgentError::CacheWrite {
          url: key.url().to_string(),
          reason: e.to_string(),
        };
        warn!("{}", err);
      }
    }
  }

  fn offline_fallback(&self, request: &Request) -> Result<Response, AgentError> {
    if !request.is_navigation() {
      return Ok(Response::service_unavailable());
    }

    match self
      .store
      .get(&self.version, &RequestKey::get(&self.offline_url))
    {
      Ok(Some(page)) => Ok(page),
      Ok(None) => Err(AgentError::OfflineUnavailable {
        url: request.url.to_string(),
      }),
      Err(e) => {
        warn!("Offline page lookup failed: {}", e);
        Err(AgentError::OfflineUnavailable {
          url: request.url.to_string(),
        })
      }
    }
  }
}
