use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the learning platform, e.g. https://school.instructure.com
  pub url: String,
  /// Page size requested from paginated listings
  #[serde(default = "default_per_page")]
  pub per_page: u32,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Retries after a rate-limited response
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// How long fetched data counts as fresh
  #[serde(default = "default_ttl_minutes")]
  pub ttl_minutes: i64,
  /// Database file (defaults to $XDG_DATA_HOME/coursesync/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_minutes: default_ttl_minutes(),
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Filter directive used when RUST_LOG is not set
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Directory for the daily log file (defaults to the cache directory)
  pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      dir: None,
    }
  }
}

fn default_per_page() -> u32 {
  50
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_max_retries() -> u32 {
  3
}

fn default_ttl_minutes() -> i64 {
  coursesync::cache::DEFAULT_TTL_MINUTES
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./coursesync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/coursesync/config.yaml
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
        "No configuration file found. Create one at ~/.config/coursesync/config.yaml\n\
         with at least:\n\n  api:\n    url: https://your.school.example"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("coursesync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("coursesync").join("config.yaml");
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
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.cache.ttl_minutes <= 0 {
      return Err(eyre!("cache.ttl_minutes must be positive"));
    }
    Ok(config)
  }

  /// Get the API token from environment variables.
  ///
  /// Checks COURSESYNC_API_TOKEN first, then LMS_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("COURSESYNC_API_TOKEN")
      .or_else(|_| std::env::var("LMS_API_TOKEN"))
      .map_err(|_| {
        eyre!(
          "API token not found. Set COURSESYNC_API_TOKEN or LMS_API_TOKEN environment variable."
        )
      })
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.api.timeout_secs)
  }

  pub fn ttl(&self) -> chrono::Duration {
    chrono::Duration::minutes(self.cache.ttl_minutes)
  }

  pub fn cache_path(&self) -> Result<PathBuf> {
    self
      .cache
      .path
      .clone()
      .or_else(coursesync::cache::Store::default_path)
      .ok_or_else(|| eyre!("Could not determine a cache location; set cache.path"))
  }

  pub fn log_dir(&self) -> Result<PathBuf> {
    match &self.log.dir {
      Some(dir) => Ok(dir.clone()),
      None => Ok(
        self
          .cache_path()?
          .parent()
          .map(Path::to_path_buf)
          .unwrap_or_else(|| PathBuf::from(".")),
      ),
    }
  }
}
