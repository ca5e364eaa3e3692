//! Subcommand implementations for the `offcache` binary.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::debug;

use offcache::cache::{CacheStorage, Request, SqliteStorage};
use offcache::config::Config;
use offcache::controller::{ClientMessage, MessageOutcome, OfflineCacheController};
use offcache::lifecycle::Registration;
use offcache::net::HttpFetcher;

type Controller = OfflineCacheController<SqliteStorage, HttpFetcher>;

/// Shared handles for one CLI invocation.
pub struct Context {
  storage: Arc<SqliteStorage>,
  fetcher: Arc<HttpFetcher>,
  registration: Registration,
}

impl Context {
  pub fn open(config: &Config) -> Result<Self> {
    let storage = match &config.storage.path {
      Some(path) => SqliteStorage::open(path)?,
      None => SqliteStorage::open_default()?,
    };
    let registration = Registration::load(&storage)?;
    let fetcher = HttpFetcher::new(config.origin.clone())?;

    Ok(Self {
      storage: Arc::new(storage),
      fetcher: Arc::new(fetcher),
      registration,
    })
  }

  fn controller(&self, config: &Config) -> Result<Controller> {
    Ok(OfflineCacheController::new(
      Arc::clone(&self.storage),
      Arc::clone(&self.fetcher),
      self.registration.clone(),
      config.controller_options(),
    )?)
  }

  async fn installed_controller(&self, config: &Config) -> Result<Controller> {
    Ok(
      OfflineCacheController::attach_installed(
        Arc::clone(&self.storage),
        Arc::clone(&self.fetcher),
        self.registration.clone(),
        config.controller_options(),
      )
      .await?,
    )
  }
}

pub async fn install(ctx: &Context, config: &Config) -> Result<()> {
  let controller = ctx.controller(config)?;
  let report = controller.handle_install(&config.manifest()?).await?;
  println!(
    "Installed {} ({} entries), waiting for activation",
    report.generation, report.entries
  );
  Ok(())
}

pub async fn activate(ctx: &Context, config: &Config) -> Result<()> {
  let controller = ctx.installed_controller(config).await?;
  let report = controller.handle_activate().await?;
  println!("Activated {}", report.generation);
  for name in &report.deleted {
    println!("  deleted {}", name);
  }
  for err in &report.failed {
    println!("  {}", err);
  }
  Ok(())
}

pub async fn deploy(ctx: &Context, config: &Config) -> Result<()> {
  let controller = ctx.controller(config)?;
  let outcome = controller.handle_message(&ClientMessage::SkipWaiting).await?;
  debug!(outcome = describe(&outcome), "skip-waiting sent before install");
  let report = controller.handle_install(&config.manifest()?).await?;
  let activation = match report.activation {
    Some(Ok(activation)) => activation,
    Some(Err(err)) => {
      return Err(eyre!(err).wrap_err(format!(
        "{} installed but activation failed",
        report.generation
      )))
    }
    None => return Err(eyre!("{} installed but did not activate", report.generation)),
  };

  println!(
    "Deployed {} ({} entries), removed {} stale generation(s)",
    report.generation,
    report.entries,
    activation.deleted.len()
  );
  Ok(())
}

pub async fn fetch(ctx: &Context, config: &Config, path: &str, navigate: bool) -> Result<()> {
  let url = config
    .origin
    .join(path)
    .map_err(|e| eyre!("Invalid path {}: {}", path, e))?;
  let request = if navigate {
    Request::navigate(url)
  } else {
    Request::get(url)
  };

  let controller = ctx.controller(config)?;
  let served = controller.handle_fetch(&request).await?;
  println!(
    "{} {} {} ({} bytes)",
    served.source,
    served.data.status,
    served.data.url,
    served.data.body.len()
  );
  Ok(())
}

pub fn push(ctx: &Context, config: &Config, payload: Option<&str>) -> Result<()> {
  let controller = ctx.controller(config)?;
  let notification = controller.handle_push(payload);
  println!("{}", serde_json::to_string_pretty(&notification)?);
  Ok(())
}

pub fn click(ctx: &Context, config: &Config, action: Option<&str>) -> Result<()> {
  let controller = ctx.controller(config)?;
  println!("{}", controller.handle_notification_click(action)?);
  Ok(())
}

pub async fn status(ctx: &Context, config: &Config) -> Result<()> {
  match ctx.registration.active().await {
    Some(generation) => println!("Active generation: {}", generation),
    None => println!("Active generation: none"),
  }
  for name in ctx.storage.bucket_names()? {
    let entries = ctx.storage.entry_keys(&name)?.len();
    println!("  {} ({} entries)", name, entries);
  }
  let nav = &config.navigation;
  println!(
    "Navigation: mobile menu at {}px and below, focus trap {}, outside click closes {}",
    nav.breakpoint,
    on_off(nav.focus_trap),
    on_off(nav.close_on_outside_click)
  );
  Ok(())
}

fn on_off(flag: bool) -> &'static str {
  if flag {
    "on"
  } else {
    "off"
  }
}

fn describe(outcome: &MessageOutcome) -> &'static str {
  match outcome {
    MessageOutcome::Activated(_) => "activated",
    MessageOutcome::Deferred => "deferred",
    MessageOutcome::Ignored => "ignored",
  }
}
