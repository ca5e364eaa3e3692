use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::Fetcher;
use crate::cache::{Request, ResponseSnapshot, ResponseType};
use crate::error::{CacheError, Result};

/// reqwest-backed fetcher for one site origin
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  origin: Url,
}

impl HttpFetcher {
  pub fn new(origin: Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("offcache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| CacheError::NetworkUnavailable {
        url: origin.to_string(),
        reason: format!("Failed to create HTTP client: {}", e),
      })?;

    Ok(Self { client, origin })
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }
}

/// Same-origin responses are `Basic`; anything else is `Cors`.
///
/// A plain HTTP client sees every body, so there is no opaque class here.
pub fn classify_response(origin: &Url, final_url: &Url) -> ResponseType {
  if origin.origin() == final_url.origin() {
    ResponseType::Basic
  } else {
    ResponseType::Cors
  }
}

fn without_fragment(url: &Url) -> Url {
  let mut url = url.clone();
  url.set_fragment(None);
  url
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<ResponseSnapshot> {
    let network_error = |e: reqwest::Error| CacheError::NetworkUnavailable {
      url: request.url.to_string(),
      reason: e.to_string(),
    };

    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .send()
      .await
      .map_err(network_error)?;

    let final_url = response.url().clone();
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    // Read the full body before handing anything back
    let body = response.bytes().await.map_err(network_error)?.to_vec();

    debug!(url = %request.url, status, bytes = body.len(), "fetched");

    Ok(ResponseSnapshot {
      url: final_url.to_string(),
      status,
      headers,
      body,
      response_type: classify_response(&self.origin, &final_url),
      redirected: without_fragment(&final_url) != without_fragment(&request.url),
    })
  }
}
