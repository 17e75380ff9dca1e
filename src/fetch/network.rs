//! Network transport used on cache misses and during install.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::time::Duration;

use super::origin::OriginPolicy;
use super::types::{Request, Response};
use crate::error::NetworkError;

/// Something that can turn a request into a live response.
pub trait Network: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response, NetworkError>> + Send;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origins: OriginPolicy,
}

impl HttpNetwork {
  pub fn new(origins: OriginPolicy, connect_timeout: Option<Duration>) -> Result<Self> {
    let mut builder = reqwest::Client::builder().user_agent(concat!(
      env!("CARGO_PKG_NAME"),
      "/",
      env!("CARGO_PKG_VERSION")
    ));
    if let Some(timeout) = connect_timeout {
      builder = builder.connect_timeout(timeout);
    }
    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origins })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let resp = builder.send().await?;
    let status = resp.status();
    // Redirects are followed; the kind reflects where the body came from
    let kind = self.origins.classify(resp.url());
    let headers = resp
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = resp.bytes().await?.to_vec();

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or("").to_string(),
      headers,
      body,
      kind,
      captured_at: Utc::now(),
    })
  }
}
