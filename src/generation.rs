//! Cache generations and their precache manifests.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use url::Url;

use crate::error::{CacheError, Result};

/// Version tag of one precached snapshot, e.g. `"v2"`.
///
/// The tag is also the name of the generation's cache bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GenerationId(String);

impl GenerationId {
  pub fn new(tag: impl Into<String>) -> Result<Self> {
    let tag = tag.into();
    if tag.trim().is_empty() {
      return Err(CacheError::InvalidGeneration(tag));
    }
    Ok(Self(tag))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for GenerationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl TryFrom<String> for GenerationId {
  type Error = CacheError;

  fn try_from(tag: String) -> Result<Self> {
    Self::new(tag)
  }
}

impl From<GenerationId> for String {
  fn from(id: GenerationId) -> Self {
    id.0
  }
}

/// Ordered list of resources that must be present right after install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrecacheManifest {
  entries: Vec<String>,
}

impl PrecacheManifest {
  /// Build a manifest. Empty and duplicate entries are rejected, matching
  /// the platform's bulk-add contract.
  pub fn new<I, S>(entries: I) -> Result<Self>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let entries: Vec<String> = entries.into_iter().map(Into::into).collect();
    let mut seen = HashSet::new();

    for entry in &entries {
      if entry.trim().is_empty() {
        return Err(CacheError::InvalidManifest("empty entry".into()));
      }
      if !seen.insert(entry.as_str()) {
        return Err(CacheError::InvalidManifest(format!(
          "duplicate entry '{}'",
          entry
        )));
      }
    }

    Ok(Self { entries })
  }

  pub fn entries(&self) -> &[String] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Resolve every entry against the site origin, keeping manifest order.
  pub fn resolve(&self, origin: &Url) -> Result<Vec<Url>> {
    self
      .entries
      .iter()
      .map(|entry| {
        origin.join(entry).map_err(|e| CacheError::InvalidUrl {
          url: entry.clone(),
          reason: e.to_string(),
        })
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_generation_rejects_blank() {
    assert!(GenerationId::new("").is_err());
    assert!(GenerationId::new("   ").is_err());
    assert_eq!(GenerationId::new("v1").unwrap().to_string(), "v1");
  }

  #[test]
  fn test_generation_deserializes_with_validation() {
    let id: GenerationId = serde_yaml::from_str("robotics-fun-club-v1").unwrap();
    assert_eq!(id.as_str(), "robotics-fun-club-v1");
    assert!(serde_yaml::from_str::<GenerationId>("''").is_err());
  }

  #[test]
  fn test_manifest_rejects_duplicates() {
    let err = PrecacheManifest::new(["/home.html", "/home.css", "/home.html"]).unwrap_err();
    assert!(err.to_string().contains("duplicate entry '/home.html'"));
  }

  #[test]
  fn test_manifest_rejects_empty_entry() {
    assert!(PrecacheManifest::new(["/", ""]).is_err());
  }

  #[test]
  fn test_resolve_keeps_order() {
    let origin = Url::parse("https://robotics.example").unwrap();
    let manifest = PrecacheManifest::new(["/", "/home.html", "styles.css"]).unwrap();
    let urls: Vec<String> = manifest
      .resolve(&origin)
      .unwrap()
      .into_iter()
      .map(String::from)
      .collect();
    assert_eq!(
      urls,
      vec![
        "https://robotics.example/",
        "https://robotics.example/home.html",
        "https://robotics.example/styles.css",
      ]
    );
  }
}
