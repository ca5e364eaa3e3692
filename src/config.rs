use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::controller::{ControllerOptions, DEFAULT_OFFLINE_FALLBACK};
use crate::generation::{GenerationId, PrecacheManifest};
use crate::nav::MenuConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Site origin, e.g. https://robotics.example
  pub origin: Url,
  pub generation: GenerationId,
  #[serde(default)]
  pub manifest: Vec<String>,
  /// Document served for navigations while offline
  #[serde(default = "default_offline_fallback")]
  pub offline_fallback: String,
  /// Push notification title (default: the origin's host)
  #[serde(default)]
  pub site_name: Option<String>,
  #[serde(default)]
  pub storage: StorageConfig,
  /// Settings for the page's menu controller; only reported by the CLI
  #[serde(default)]
  pub navigation: MenuConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

fn default_offline_fallback() -> String {
  DEFAULT_OFFLINE_FALLBACK.to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite database path (defaults to $XDG_DATA_HOME/offcache/cache.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Append logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      file: None,
    }
  }
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offcache/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  /// Check everything the controller would otherwise reject later.
  pub fn validate(&self) -> Result<()> {
    if self.origin.cannot_be_a_base() {
      return Err(eyre!("origin {} cannot be used as a base URL", self.origin));
    }
    let manifest = self.manifest()?;
    manifest.resolve(&self.origin)?;
    self
      .origin
      .join(&self.offline_fallback)
      .map_err(|e| eyre!("Invalid offline_fallback {}: {}", self.offline_fallback, e))?;
    Ok(())
  }

  pub fn manifest(&self) -> Result<PrecacheManifest> {
    Ok(PrecacheManifest::new(self.manifest.iter().cloned())?)
  }

  pub fn controller_options(&self) -> ControllerOptions {
    let options = ControllerOptions::new(self.generation.clone(), self.origin.clone())
      .with_offline_fallback(self.offline_fallback.clone());
    match &self.site_name {
      Some(name) => options.with_site_name(name.clone()),
      None => options,
    }
  }
}
