//! Error types for offcache.
//!
//! Library code returns `Result<T>`; the binary wraps these in `color_eyre`.

use thiserror::Error;

use crate::lifecycle::Phase;

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
  /// A precache entry could not be fetched; the generation being installed is discarded.
  #[error("Install failed, resource unavailable: {url}: {reason}")]
  InstallResourceUnavailable { url: String, reason: String },

  /// A live fetch failed at the transport level.
  #[error("Network unavailable for {url}: {reason}")]
  NetworkUnavailable { url: String, reason: String },

  /// Deleting a superseded generation's bucket failed during activation.
  #[error("Failed to delete stale generation {generation}: {reason}")]
  StaleGenerationCleanup { generation: String, reason: String },

  #[error("Invalid lifecycle state: expected {expected}, got {actual}")]
  InvalidState { expected: &'static str, actual: Phase },

  #[error("Invalid precache manifest: {0}")]
  InvalidManifest(String),

  #[error("Invalid generation id: {0:?}")]
  InvalidGeneration(String),

  #[error("Invalid URL {url}: {reason}")]
  InvalidUrl { url: String, reason: String },

  #[error("Generation {0} is not installed")]
  NotInstalled(String),

  #[error("Cache storage error: {0}")]
  Storage(String),

  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl CacheError {
  /// Only a failed precache is fatal to a generation; everything else is
  /// either recovered locally or handed back to the caller.
  pub fn is_generation_fatal(&self) -> bool {
    matches!(self, CacheError::InstallResourceUnavailable { .. })
  }

  pub fn is_network(&self) -> bool {
    matches!(self, CacheError::NetworkUnavailable { .. })
  }

  pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
    CacheError::Storage(format!("{}: {}", context, err))
  }
}
