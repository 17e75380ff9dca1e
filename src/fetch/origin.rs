//! Which origins the agent is allowed to intercept and cache.

use url::{Origin, Url};

use super::types::ResponseKind;

/// The application origin plus the allow-listed external hosts (CDNs).
#[derive(Debug, Clone)]
pub struct OriginPolicy {
  origin: Origin,
  base: Url,
  allowed_hosts: Vec<String>,
}

impl OriginPolicy {
  pub fn new(base: Url, allowed_hosts: impl IntoIterator<Item = String>) -> Self {
    Self {
      origin: base.origin(),
      base,
      allowed_hosts: allowed_hosts
        .into_iter()
        .map(|h| h.trim().trim_end_matches('.').to_lowercase())
        .filter(|h| !h.is_empty())
        .collect(),
    }
  }

  pub fn is_same_origin(&self, url: &Url) -> bool {
    url.origin() == self.origin
  }

  /// Host equals an allow-listed entry or is a subdomain of one.
  pub fn is_allow_listed(&self, url: &Url) -> bool {
    let Some(host) = url.host_str() else {
      return false;
    };
    let host = host.to_lowercase();
    self.allowed_hosts.iter().any(|allowed| {
      host == *allowed
        || host
          .strip_suffix(allowed.as_str())
          .is_some_and(|prefix| prefix.ends_with('.'))
    })
  }

  /// Whether requests to this URL are routed through the agent at all.
  pub fn is_interceptable(&self, url: &Url) -> bool {
    self.is_same_origin(url) || self.is_allow_listed(url)
  }

  /// The response kind a page would observe for a response served from `url`.
  pub fn classify(&self, url: &Url) -> ResponseKind {
    if self.is_same_origin(url) {
      ResponseKind::Basic
    } else if self.is_allow_listed(url) {
      ResponseKind::Cors
    } else {
      ResponseKind::Opaque
    }
  }

  /// Resolve a manifest path (relative or absolute) against the app origin.
  pub fn resolve(&self, path: &str) -> Result<Url, url::ParseError> {
    self.base.join(path)
  }
}
