//! End-to-end generation lifecycle against SQLite storage.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

use offcache::cache::{CacheSource, CacheStorage, Request, ResponseSnapshot, SqliteStorage};
use offcache::generation::{GenerationId, PrecacheManifest};
use offcache::lifecycle::{Phase, Registration};
use offcache::net::Fetcher;
use offcache::{CacheError, ControllerOptions, OfflineCacheController};

const ORIGIN: &str = "https://robotics.example";

/// Serves every path with its own name as the body, except `missing`.
struct Site {
  online: AtomicBool,
  missing: Mutex<HashSet<String>>,
}

impl Site {
  fn new() -> Arc<Self> {
    Arc::new(Self {
      online: AtomicBool::new(true),
      missing: Mutex::new(HashSet::new()),
    })
  }
}

#[async_trait]
impl Fetcher for Site {
  async fn fetch(&self, request: &Request) -> offcache::Result<ResponseSnapshot> {
    if !self.online.load(Ordering::SeqCst) {
      return Err(CacheError::NetworkUnavailable {
        url: request.url.to_string(),
        reason: "offline".into(),
      });
    }
    let path = request.url.path().to_string();
    let status = if self.missing.lock().unwrap().contains(&path) {
      404
    } else {
      200
    };
    Ok(ResponseSnapshot::basic(&request.url, status, path))
  }
}

fn controller(
  storage: &Arc<SqliteStorage>,
  site: &Arc<Site>,
  registration: &Registration,
  generation: &str,
) -> OfflineCacheController<SqliteStorage, Site> {
  OfflineCacheController::new(
    Arc::clone(storage),
    Arc::clone(site),
    registration.clone(),
    ControllerOptions::new(
      GenerationId::new(generation).unwrap(),
      Url::parse(ORIGIN).unwrap(),
    ),
  )
  .unwrap()
}

fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

fn paths(storage: &SqliteStorage, bucket: &str) -> Vec<String> {
  storage
    .entry_keys(bucket)
    .unwrap()
    .iter()
    .map(|k| {
      let raw = k.as_str().trim_start_matches("GET ");
      Url::parse(raw).unwrap().path().to_string()
    })
    .collect()
}

#[tokio::test]
async fn test_v1_to_v2_deploy() {
  let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
  let site = Site::new();
  let registration = Registration::new();

  let v1 = controller(&storage, &site, &registration, "v1");
  v1.handle_install(&PrecacheManifest::new(["/home.html", "/home.css"]).unwrap())
    .await
    .unwrap();
  v1.handle_activate().await.unwrap();
  assert_eq!(paths(&storage, "v1"), vec!["/home.html", "/home.css"]);

  let v2 = controller(&storage, &site, &registration, "v2");
  v2.handle_install(
    &PrecacheManifest::new(["/home.html", "/home.css", "/gallery.html"]).unwrap(),
  )
  .await
  .unwrap();
  assert_eq!(v2.phase(), Phase::Installed);

  v2.handle_activate().await.unwrap();

  assert_eq!(storage.bucket_names().unwrap(), vec!["v2"]);
  assert_eq!(
    paths(&storage, "v2"),
    vec!["/home.html", "/home.css", "/gallery.html"]
  );
}

#[tokio::test]
async fn test_failed_install_keeps_previous_generation_serving() {
  let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
  let site = Site::new();
  let registration = Registration::new();

  let v1 = controller(&storage, &site, &registration, "v1");
  v1.handle_install(&PrecacheManifest::new(["/home.html"]).unwrap())
    .await
    .unwrap();
  v1.handle_activate().await.unwrap();

  site
    .missing
    .lock()
    .unwrap()
    .insert("/gallery.html".to_string());
  let v2 = controller(&storage, &site, &registration, "v2");
  let err = v2
    .handle_install(&PrecacheManifest::new(["/home.html", "/gallery.html"]).unwrap())
    .await
    .unwrap_err();
  assert!(err.is_generation_fatal());
  assert_eq!(storage.bucket_names().unwrap(), vec!["v1"]);

  site.online.store(false, Ordering::SeqCst);
  let served = v2
    .handle_fetch(&Request::navigate(url("/unknown.html")))
    .await
    .unwrap();
  assert_eq!(served.source, CacheSource::OfflineFallback);
  assert_eq!(served.data.body, b"/home.html".to_vec());
}

#[tokio::test]
async fn test_registration_survives_restart() {
  let dir = tempfile::tempdir().unwrap();
  let db = dir.path().join("cache.db");
  let site = Site::new();

  {
    let storage = Arc::new(SqliteStorage::open(&db).unwrap());
    let registration = Registration::load(storage.as_ref()).unwrap();
    let v1 = controller(&storage, &site, &registration, "v1");
    v1.handle_install(&PrecacheManifest::new(["/home.html"]).unwrap())
      .await
      .unwrap();
    v1.handle_activate().await.unwrap();
  }

  let storage = Arc::new(SqliteStorage::open(&db).unwrap());
  let registration = Registration::load(storage.as_ref()).unwrap();
  assert_eq!(registration.active().await.unwrap().as_str(), "v1");

  let attached = OfflineCacheController::attach_installed(
    Arc::clone(&storage),
    Arc::clone(&site),
    registration.clone(),
    ControllerOptions::new(GenerationId::new("v1").unwrap(), Url::parse(ORIGIN).unwrap()),
  )
  .await
  .unwrap();
  assert_eq!(attached.phase(), Phase::Active);

  site.online.store(false, Ordering::SeqCst);
  let served = attached
    .handle_fetch(&Request::get(url("/home.html")))
    .await
    .unwrap();
  assert_eq!(served.source, CacheSource::Cache);
}

#[tokio::test]
async fn test_attach_requires_installed_bucket() {
  let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
  let result = OfflineCacheController::attach_installed(
    storage,
    Site::new(),
    Registration::new(),
    ControllerOptions::new(GenerationId::new("v9").unwrap(), Url::parse(ORIGIN).unwrap()),
  )
  .await;

  assert!(matches!(result, Err(CacheError::NotInstalled(tag)) if tag == "v9"));
}
