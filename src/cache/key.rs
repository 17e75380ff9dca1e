//! Request keys for cache entries.

use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

use crate::fetch::Request;

/// Identity of a cacheable request: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: Method,
  url: Url,
}

impl RequestKey {
  /// Key for a GET of `url`.
  pub fn get(url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: Method::GET,
      url,
    }
  }

  /// Key for an intercepted request. Only read-only requests have one.
  pub fn for_request(request: &Request) -> Option<Self> {
    request.is_read_only().then(|| Self::get(&request.url))
  }

  pub fn method(&self) -> &Method {
    &self.method
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  /// SHA256 of the key for stable, fixed-length storage keys.
  pub fn cache_hash(&self) -> String {
    let input = format!("{} {}", self.method, self.url);
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fragment_ignored() {
    let a = RequestKey::get(&Url::parse("https://app.example/page#top").unwrap());
    let b = RequestKey::get(&Url::parse("https://app.example/page").unwrap());
    assert_eq!(a, b);
    assert_eq!(a.cache_hash(), b.cache_hash());
  }

  #[test]
  fn test_query_distinguishes_keys() {
    let a = RequestKey::get(&Url::parse("https://app.example/page?a=1").unwrap());
    let b = RequestKey::get(&Url::parse("https://app.example/page?a=2").unwrap());
    assert_ne!(a.cache_hash(), b.cache_hash());
    assert_eq!(a.cache_hash().len(), 64);
  }

  #[test]
  fn test_non_get_has_no_key() {
    let url = Url::parse("https://app.example/api").unwrap();
    assert!(RequestKey::for_request(&Request::new(Method::POST, url.clone())).is_none());
    assert!(RequestKey::for_request(&Request::get(url)).is_some());
  }
}
