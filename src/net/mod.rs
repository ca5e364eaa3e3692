//! Network side of the controller.

mod client;

pub use client::{classify_response, HttpFetcher};

use async_trait::async_trait;

use crate::cache::{Request, ResponseSnapshot};
use crate::error::Result;

/// Performs live fetches on behalf of the controller.
///
/// Implementations return only once the whole body has been read, so a
/// fetch that is dropped mid-download never yields a partial snapshot.
/// Transport failures are reported as `CacheError::NetworkUnavailable`.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<ResponseSnapshot>;
}
