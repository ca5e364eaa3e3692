//! Generation lifecycle phases and the shared registration.

use std::fmt;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::cache::CacheStorage;
use crate::error::Result;
use crate::generation::GenerationId;

/// Lifecycle phase of one generation's controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  /// Constructed, install not started
  New,
  Installing,
  /// Installed and waiting for activation
  Installed,
  /// Precache failed; this generation will never activate
  InstallFailed,
  Activating,
  /// Serving fetches
  Active,
  /// Superseded by a newer generation
  Redundant,
}

impl Phase {
  pub fn is_terminal(&self) -> bool {
    matches!(self, Phase::InstallFailed | Phase::Redundant)
  }
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Phase::New => "new",
      Phase::Installing => "installing",
      Phase::Installed => "installed",
      Phase::InstallFailed => "install-failed",
      Phase::Activating => "activating",
      Phase::Active => "active",
      Phase::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

/// Pointer to the generation currently serving fetches.
///
/// Shared by every controller over the same store. Fetches read through the
/// read lock; activation swaps under the write lock, so no fetch ever sees a
/// half-finished swap.
#[derive(Clone, Default)]
pub struct Registration {
  active: Arc<RwLock<Option<GenerationId>>>,
}

impl Registration {
  pub fn new() -> Self {
    Self::default()
  }

  /// Restore the active generation persisted in storage.
  pub fn load<S: CacheStorage + ?Sized>(storage: &S) -> Result<Self> {
    let active = storage
      .active_generation()?
      .map(GenerationId::new)
      .transpose()?;
    Ok(Self {
      active: Arc::new(RwLock::new(active)),
    })
  }

  pub async fn active(&self) -> Option<GenerationId> {
    self.active.read().await.clone()
  }

  pub(crate) async fn read(&self) -> RwLockReadGuard<'_, Option<GenerationId>> {
    self.active.read().await
  }

  pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, Option<GenerationId>> {
    self.active.write().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;

  #[test]
  fn test_terminal_phases() {
    assert!(Phase::InstallFailed.is_terminal());
    assert!(Phase::Redundant.is_terminal());
    assert!(!Phase::Installed.is_terminal());
    assert!(!Phase::Active.is_terminal());
  }

  #[tokio::test]
  async fn test_load_restores_persisted_generation() {
    let storage = MemoryStorage::new();
    assert_eq!(Registration::load(&storage).unwrap().active().await, None);

    storage.set_active_generation(Some("v3")).unwrap();
    let registration = Registration::load(&storage).unwrap();
    assert_eq!(
      registration.active().await,
      Some(GenerationId::new("v3").unwrap())
    );
  }

  #[tokio::test]
  async fn test_clones_share_state() {
    let a = Registration::new();
    let b = a.clone();
    *a.write().await = Some(GenerationId::new("v1").unwrap());
    assert_eq!(b.active().await.map(String::from).as_deref(), Some("v1"));
  }
}
