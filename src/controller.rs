//! Offline cache controller: install, fetch interception, activation and
//! client messages for one cache generation.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheResult, CacheStorage, Request, RequestKey, ResponseSnapshot, ResponseType};
use crate::error::{CacheError, Result};
use crate::generation::{GenerationId, PrecacheManifest};
use crate::lifecycle::{Phase, Registration};
use crate::net::Fetcher;

/// Sync tag that triggers the background sync task.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

/// Path served in place of a failed navigation.
pub const DEFAULT_OFFLINE_FALLBACK: &str = "/home.html";

/// Notification body when a push arrives without a payload.
pub const DEFAULT_PUSH_BODY: &str = "New content available!";

pub const EXPLORE_ACTION: &str = "explore";
pub const CLOSE_ACTION: &str = "close";

/// Page opened by the explore action; every other click opens the site root.
pub const EXPLORE_PATH: &str = "/projects.html";

/// Construction parameters for one generation's controller.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
  pub generation: GenerationId,
  /// Site origin; manifest entries and the fallback path resolve against it
  pub origin: Url,
  pub offline_fallback: String,
  /// Title used for push notifications
  pub site_name: String,
}

impl ControllerOptions {
  pub fn new(generation: GenerationId, origin: Url) -> Self {
    let site_name = origin
      .host_str()
      .map(String::from)
      .unwrap_or_else(|| origin.to_string());
    Self {
      generation,
      origin,
      offline_fallback: DEFAULT_OFFLINE_FALLBACK.to_string(),
      site_name,
    }
  }

  pub fn with_offline_fallback(mut self, path: impl Into<String>) -> Self {
    self.offline_fallback = path.into();
    self
  }

  pub fn with_site_name(mut self, name: impl Into<String>) -> Self {
    self.site_name = name.into();
    self
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: &'static str,
  pub title: &'static str,
}

/// Notification to show for an incoming push.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  /// Vibration pattern in milliseconds
  pub vibrate: Vec<u32>,
  pub actions: Vec<NotificationAction>,
  pub arrived_at: DateTime<Utc>,
}

/// Outcome of a successful install.
#[derive(Debug)]
pub struct InstallReport {
  pub generation: GenerationId,
  pub entries: usize,
  /// Present when a skip-waiting request arrived during install
  pub activation: Option<Result<ActivationReport>>,
}

/// Outcome of an activation. Cleanup failures are collected, not raised.
#[derive(Debug)]
pub struct ActivationReport {
  pub generation: GenerationId,
  pub deleted: Vec<String>,
  pub failed: Vec<CacheError>,
}

/// Messages a page can post to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
  /// Activate without waiting
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
  #[serde(other)]
  Unknown,
}

impl ClientMessage {
  /// Parse a JSON message. Anything that is not a recognised command is `Unknown`.
  pub fn parse(raw: &str) -> Self {
    serde_json::from_str(raw).unwrap_or(ClientMessage::Unknown)
  }
}

#[derive(Debug)]
pub enum MessageOutcome {
  Activated(ActivationReport),
  /// Skip-waiting remembered until install completes
  Deferred,
  Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  Handled,
  Ignored,
}

/// Why a fetched response was not written to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  NotGet,
  Status(u16),
  NotSameOrigin(ResponseType),
  Redirected,
  /// The generation swapped while the fetch was in flight
  GenerationSuperseded,
}

impl fmt::Display for SkipReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SkipReason::NotGet => write!(f, "non-GET request"),
      SkipReason::Status(status) => write!(f, "status {}", status),
      SkipReason::NotSameOrigin(ty) => write!(f, "{} response", ty.as_str()),
      SkipReason::Redirected => write!(f, "redirected response"),
      SkipReason::GenerationSuperseded => write!(f, "generation superseded"),
    }
  }
}

/// Decide whether a fetched response may be stored.
///
/// Only complete, same-origin, non-redirected 200 responses to GET requests
/// qualify; everything else is passed through untouched.
pub fn cache_eligibility(
  request: &Request,
  response: &ResponseSnapshot,
) -> std::result::Result<(), SkipReason> {
  if request.method != reqwest::Method::GET {
    return Err(SkipReason::NotGet);
  }
  if response.status != 200 {
    return Err(SkipReason::Status(response.status));
  }
  if response.response_type != ResponseType::Basic {
    return Err(SkipReason::NotSameOrigin(response.response_type));
  }
  if response.redirected {
    return Err(SkipReason::Redirected);
  }
  Ok(())
}

struct ControllerState {
  phase: Phase,
  skip_waiting: bool,
}

/// Cache-first controller for one generation.
///
/// Several controllers (one per generation) may share a store and a
/// `Registration`; fetches are always served from whichever generation the
/// registration currently marks active.
pub struct OfflineCacheController<S: CacheStorage, F: Fetcher> {
  storage: Arc<S>,
  fetcher: Arc<F>,
  registration: Registration,
  generation: GenerationId,
  origin: Url,
  offline_fallback: Url,
  site_name: String,
  state: Mutex<ControllerState>,
}

impl<S: CacheStorage, F: Fetcher> OfflineCacheController<S, F> {
  pub fn new(
    storage: Arc<S>,
    fetcher: Arc<F>,
    registration: Registration,
    options: ControllerOptions,
  ) -> Result<Self> {
    Self::with_phase(storage, fetcher, registration, options, Phase::New)
  }

  /// Controller for a generation installed by an earlier process.
  ///
  /// Buckets are only ever created by the commit that completes an install,
  /// so an existing bucket means a complete install.
  pub async fn attach_installed(
    storage: Arc<S>,
    fetcher: Arc<F>,
    registration: Registration,
    options: ControllerOptions,
  ) -> Result<Self> {
    if !storage.has_bucket(options.generation.as_str())? {
      return Err(CacheError::NotInstalled(options.generation.to_string()));
    }
    let phase = if registration.active().await.as_ref() == Some(&options.generation) {
      Phase::Active
    } else {
      Phase::Installed
    };
    Self::with_phase(storage, fetcher, registration, options, phase)
  }

  fn with_phase(
    storage: Arc<S>,
    fetcher: Arc<F>,
    registration: Registration,
    options: ControllerOptions,
    phase: Phase,
  ) -> Result<Self> {
    let offline_fallback =
      options
        .origin
        .join(&options.offline_fallback)
        .map_err(|e| CacheError::InvalidUrl {
          url: options.offline_fallback.clone(),
          reason: e.to_string(),
        })?;

    Ok(Self {
      storage,
      fetcher,
      registration,
      generation: options.generation,
      origin: options.origin,
      offline_fallback,
      site_name: options.site_name,
      state: Mutex::new(ControllerState {
        phase,
        skip_waiting: false,
      }),
    })
  }

  pub fn generation(&self) -> &GenerationId {
    &self.generation
  }

  pub fn registration(&self) -> &Registration {
    &self.registration
  }

  pub fn phase(&self) -> Phase {
    self.state().phase
  }

  fn state(&self) -> MutexGuard<'_, ControllerState> {
    // The state is plain data, a panic elsewhere cannot leave it inconsistent
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn set_phase(&self, phase: Phase) {
    self.state().phase = phase;
  }

  /// Precache the manifest into this generation's bucket.
  ///
  /// All-or-nothing: the bucket is created by the same atomic write that
  /// stores the entries, after every fetch has completed. A failed or
  /// cancelled install leaves no bucket, and the generation can never
  /// activate. The active generation keeps serving either way.
  ///
  /// A deferred skip-waiting activates right after a successful install; if
  /// that activation fails, the install still reports success and the error
  /// is carried in `InstallReport::activation`.
  pub async fn handle_install(&self, manifest: &PrecacheManifest) -> Result<InstallReport> {
    {
      let mut state = self.state();
      if state.phase != Phase::New {
        return Err(CacheError::InvalidState {
          expected: "new",
          actual: state.phase,
        });
      }
      state.phase = Phase::Installing;
    }

    info!(generation = %self.generation, entries = manifest.len(), "installing generation");

    match self.precache(manifest).await {
      Ok(entries) => {
        let skip_waiting = {
          let mut state = self.state();
          state.phase = Phase::Installed;
          std::mem::take(&mut state.skip_waiting)
        };
        info!(generation = %self.generation, entries, "generation installed");

        let activation = if skip_waiting {
          let result = self.handle_activate().await;
          if let Err(e) = &result {
            warn!(generation = %self.generation, error = %e, "activation after install failed");
          }
          Some(result)
        } else {
          None
        };

        Ok(InstallReport {
          generation: self.generation.clone(),
          entries,
          activation,
        })
      }
      Err(e) => {
        self.set_phase(Phase::InstallFailed);
        warn!(generation = %self.generation, error = %e, "install failed");
        Err(e)
      }
    }
  }

  async fn precache(&self, manifest: &PrecacheManifest) -> Result<usize> {
    let urls = manifest.resolve(&self.origin)?;
    let fetches = urls.into_iter().map(|url| async move {
      let request = Request::get(url);
      let unavailable = |reason: String| CacheError::InstallResourceUnavailable {
        url: request.url.to_string(),
        reason,
      };

      let response = self
        .fetcher
        .fetch(&request)
        .await
        .map_err(|e| unavailable(e.to_string()))?;
      if !response.is_ok() {
        return Err(unavailable(format!("HTTP {}", response.status)));
      }
      Ok((request.key(), response))
    });

    let entries = try_join_all(fetches).await?;
    // Creates the bucket and its entries in one commit
    self.storage.put_all(self.generation.as_str(), &entries)?;
    Ok(entries.len())
  }

  /// Serve a request cache-first.
  ///
  /// 1. Hit in the active generation: return it, no network.
  /// 2. Miss: fetch, store eligible responses, return.
  /// 3. Network failure on a navigation: serve the offline fallback.
  /// 4. Any other network failure propagates unchanged.
  pub async fn handle_fetch(&self, request: &Request) -> Result<CacheResult<ResponseSnapshot>> {
    let key = request.key();

    let serving = {
      let active = self.registration.read().await;
      match active.as_ref() {
        Some(generation) => {
          match self.storage.match_entry(generation.as_str(), &key) {
            Ok(Some(entry)) => {
              debug!(%key, generation = %generation, "cache hit");
              return Ok(CacheResult::from_cache(entry.response, entry.cached_at));
            }
            Ok(None) => {}
            Err(e) => warn!(%key, error = %e, "cache lookup failed, going to network"),
          }
          Some(generation.clone())
        }
        None => None,
      }
    };

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if let Some(generation) = serving {
          self.store_response(&generation, request, &key, &response).await;
        }
        Ok(CacheResult::from_network(response))
      }
      Err(err) => {
        if request.is_navigation() {
          if let Some(fallback) = self.offline_document().await {
            info!(url = %request.url, "network unavailable, serving offline fallback");
            return Ok(CacheResult::offline(fallback.response, fallback.cached_at));
          }
        }
        Err(err)
      }
    }
  }

  async fn store_response(
    &self,
    generation: &GenerationId,
    request: &Request,
    key: &RequestKey,
    response: &ResponseSnapshot,
  ) {
    if let Err(reason) = cache_eligibility(request, response) {
      debug!(%key, %reason, "cache write skipped");
      return;
    }

    // Hold the read lock across the write so activation cannot delete the
    // bucket underneath it.
    let active = self.registration.read().await;
    if active.as_ref() != Some(generation) {
      debug!(%key, reason = %SkipReason::GenerationSuperseded, "cache write skipped");
      return;
    }

    match self.storage.put(generation.as_str(), key, response) {
      Ok(()) => debug!(%key, generation = %generation, "cached response"),
      Err(e) => warn!(%key, error = %e, "failed to cache response"),
    }
  }

  async fn offline_document(&self) -> Option<crate::cache::CachedEntry> {
    let active = self.registration.read().await;
    let generation = active.as_ref()?;
    let key = Request::navigate(self.offline_fallback.clone()).key();
    match self.storage.match_entry(generation.as_str(), &key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(error = %e, "failed to read offline fallback");
        None
      }
    }
  }

  /// Make this generation the active one and delete every other bucket.
  ///
  /// Deletion failures are logged and reported but never stop activation.
  pub async fn handle_activate(&self) -> Result<ActivationReport> {
    {
      let mut state = self.state();
      match state.phase {
        Phase::Installed | Phase::Active => state.phase = Phase::Activating,
        other => {
          return Err(CacheError::InvalidState {
            expected: "installed",
            actual: other,
          })
        }
      }
    }

    info!(generation = %self.generation, "activating generation");

    let mut active = self.registration.write().await;
    match self.swap_generation(&mut active) {
      Ok(report) => {
        self.set_phase(Phase::Active);
        info!(
          generation = %self.generation,
          deleted = report.deleted.len(),
          failed = report.failed.len(),
          "generation active"
        );
        Ok(report)
      }
      Err(e @ CacheError::NotInstalled(_)) => {
        self.set_phase(Phase::Redundant);
        Err(e)
      }
      Err(e) => {
        self.set_phase(Phase::Installed);
        Err(e)
      }
    }
  }

  fn swap_generation(&self, active: &mut Option<GenerationId>) -> Result<ActivationReport> {
    let current = self.generation.as_str();
    if !self.storage.has_bucket(current)? {
      return Err(CacheError::NotInstalled(current.to_string()));
    }

    let mut report = ActivationReport {
      generation: self.generation.clone(),
      deleted: Vec::new(),
      failed: Vec::new(),
    };

    for name in self.storage.bucket_names()? {
      if name == current {
        continue;
      }
      match self.storage.delete_bucket(&name) {
        Ok(_) => {
          info!(generation = %name, "deleted stale generation");
          report.deleted.push(name);
        }
        Err(e) => {
          let err = CacheError::StaleGenerationCleanup {
            generation: name,
            reason: e.to_string(),
          };
          warn!(error = %err, "stale generation cleanup failed");
          report.failed.push(err);
        }
      }
    }

    self.storage.set_active_generation(Some(current))?;
    *active = Some(self.generation.clone());
    Ok(report)
  }

  /// Handle a message posted by a page. Unknown commands are ignored.
  pub async fn handle_message(&self, message: &ClientMessage) -> Result<MessageOutcome> {
    match message {
      ClientMessage::Unknown => {
        debug!("ignoring unknown client message");
        Ok(MessageOutcome::Ignored)
      }
      ClientMessage::SkipWaiting => {
        let phase = {
          let mut state = self.state();
          match state.phase {
            Phase::New | Phase::Installing => {
              state.skip_waiting = true;
              return Ok(MessageOutcome::Deferred);
            }
            phase => phase,
          }
        };

        if phase == Phase::Installed {
          Ok(MessageOutcome::Activated(self.handle_activate().await?))
        } else {
          debug!(%phase, "skip-waiting has no effect");
          Ok(MessageOutcome::Ignored)
        }
      }
    }
  }

  /// Handle a background sync event.
  pub async fn handle_sync(&self, tag: &str) -> SyncOutcome {
    if tag == BACKGROUND_SYNC_TAG {
      info!(generation = %self.generation, "background sync triggered");
      SyncOutcome::Handled
    } else {
      debug!(tag, "ignoring sync tag");
      SyncOutcome::Ignored
    }
  }

  /// Build the notification for a push message.
  pub fn handle_push(&self, payload: Option<&str>) -> Notification {
    debug!(has_payload = payload.is_some(), "push received");
    Notification {
      title: self.site_name.clone(),
      body: payload.unwrap_or(DEFAULT_PUSH_BODY).to_string(),
      vibrate: vec![100, 50, 100],
      actions: vec![
        NotificationAction {
          action: EXPLORE_ACTION,
          title: "View Projects",
        },
        NotificationAction {
          action: CLOSE_ACTION,
          title: "Close",
        },
      ],
      arrived_at: Utc::now(),
    }
  }

  /// Page to open when a notification is clicked.
  pub fn handle_notification_click(&self, action: Option<&str>) -> Result<Url> {
    let path = match action {
      Some(EXPLORE_ACTION) => EXPLORE_PATH,
      _ => "/",
    };
    self.origin.join(path).map_err(|e| CacheError::InvalidUrl {
      url: path.to_string(),
      reason: e.to_string(),
    })
  }
}
