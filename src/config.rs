use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  /// App origin; static manifest paths resolve against this.
  pub origin: String,
  /// Path fragment identifying backend API routes (network-first).
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  /// Host of the data backend; requests to it are network-first.
  pub data_host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Entry bound for the dynamic partition.
  #[serde(default = "default_dynamic_limit")]
  pub dynamic_limit: usize,
  /// Partition name for the current static generation.
  #[serde(default = "default_static_partition")]
  pub static_partition: String,
  /// Partition name for the current dynamic generation.
  #[serde(default = "default_dynamic_partition")]
  pub dynamic_partition: String,
  /// Paths pre-cached into the static partition at install time.
  #[serde(default = "default_static_manifest")]
  pub static_manifest: Vec<String>,
  /// Fallback document served for navigations while offline.
  #[serde(default = "default_offline_page")]
  pub offline_page: String,
  /// Placeholder served for image requests while offline.
  #[serde(default = "default_placeholder_icon")]
  pub placeholder_icon: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      dynamic_limit: default_dynamic_limit(),
      static_partition: default_static_partition(),
      dynamic_partition: default_dynamic_partition(),
      static_manifest: default_static_manifest(),
      offline_page: default_offline_page(),
      placeholder_icon: default_placeholder_icon(),
    }
  }
}

fn default_api_prefix() -> String {
  "/api/".to_string()
}

fn default_dynamic_limit() -> usize {
  50
}

fn default_static_partition() -> String {
  "trainloop-static-v1".to_string()
}

fn default_dynamic_partition() -> String {
  "trainloop-dynamic-v1".to_string()
}

fn default_offline_page() -> String {
  "/offline.html".to_string()
}

fn default_placeholder_icon() -> String {
  "/icons/icon-192x192.png".to_string()
}

/// App shell, entry routes, offline fallback, icons, and the audio cues
/// played during a training session.
fn default_static_manifest() -> Vec<String> {
  [
    "/",
    "/login",
    "/register",
    "/dashboard",
    "/offline.html",
    "/manifest.json",
    "/icons/icon-192x192.png",
    "/icons/icon-512x512.png",
    "/apple-touch-icon.png",
    "/sounds/rest-complete.mp3",
    "/sounds/set-complete.mp3",
    "/sounds/exercise-complete.mp3",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./trainloop.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/trainloop/config.yaml
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
        "No configuration file found. Create one at ~/.config/trainloop/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("trainloop.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("trainloop").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }
}
