use chrono::NaiveDate;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::content::ResumePolicy;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Root directory for the caches and the seed domain list
  pub data_dir: PathBuf,
  /// CSV file with a `Domain` column, relative to `data_dir` unless absolute
  pub domains_file: PathBuf,
  /// How many domains to take from the top of the list
  pub num_domains: usize,
  pub start_date: NaiveDate,
  pub end_date: NaiveDate,
  /// Seed for target date assignment
  pub seed: u64,
  pub batch: BatchConfig,
  pub fetch: FetchConfig,
  pub archive: ArchiveConfig,
  pub content: ContentConfig,
  pub logging: LoggingConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      data_dir: PathBuf::from("data"),
      domains_file: PathBuf::from("majestic_million.csv"),
      num_domains: 1000,
      start_date: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default(),
      end_date: NaiveDate::from_ymd_opt(2022, 1, 1).unwrap_or_default(),
      seed: 7,
      batch: BatchConfig::default(),
      fetch: FetchConfig::default(),
      archive: ArchiveConfig::default(),
      content: ContentConfig::default(),
      logging: LoggingConfig::default(),
    }
  }
}

/// Batch scheduling shared by both remote stages.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
  /// Items fetched concurrently per batch
  pub size: usize,
  /// Minimum seconds between the starts of consecutive batches
  pub interval_secs: u64,
}

impl Default for BatchConfig {
  fn default() -> Self {
    Self {
      size: 15,
      interval_secs: 60,
    }
  }
}

impl BatchConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
  /// Per-request timeout
  pub timeout_secs: u64,
  pub user_agent: String,
}

impl Default for FetchConfig {
  fn default() -> Self {
    Self {
      timeout_secs: 120,
      user_agent: format!("wayback-harvest/{}", env!("CARGO_PKG_VERSION")),
    }
  }
}

impl FetchConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
  /// CDX index endpoint used for timestamp lookups
  pub cdx_url: String,
  /// Prefix of raw snapshot URLs
  pub snapshot_url: String,
}

impl Default for ArchiveConfig {
  fn default() -> Self {
    Self {
      cdx_url: "http://web.archive.org/cdx/search/cdx".to_string(),
      snapshot_url: "https://web.archive.org/web".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
  pub resume: ResumePolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter when RUST_LOG is unset
  pub level: String,
  /// Directory for daily rolling log files; stderr only when unset
  pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./wayback-harvest.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/wayback-harvest/config.yaml
  ///
  /// Falls back to defaults when no file is found. The result is not validated
  /// here; callers validate once command line overrides are applied.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("wayback-harvest.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("wayback-harvest").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    // An empty document deserializes to unit, not an empty mapping
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Reject settings no run can work with.
  pub fn validate(&self) -> Result<()> {
    if self.batch.size == 0 {
      return Err(eyre!("batch.size must be at least 1"));
    }
    if self.fetch.timeout_secs == 0 {
      return Err(eyre!("fetch.timeout_secs must be at least 1"));
    }
    if self.start_date >= self.end_date {
      return Err(eyre!(
        "start_date {} must be before end_date {}",
        self.start_date,
        self.end_date
      ));
    }
    Url::parse(&self.archive.cdx_url)
      .map_err(|e| eyre!("Invalid archive.cdx_url {}: {}", self.archive.cdx_url, e))?;
    Url::parse(&self.archive.snapshot_url).map_err(|e| {
      eyre!(
        "Invalid archive.snapshot_url {}: {}",
        self.archive.snapshot_url,
        e
      )
    })?;
    Ok(())
  }

  pub fn domains_path(&self) -> PathBuf {
    self.data_dir.join(&self.domains_file)
  }

  pub fn timestamp_cache_path(&self) -> PathBuf {
    self.data_dir.join("archive_dates.json")
  }

  pub fn content_cache_dir(&self) -> PathBuf {
    self.data_dir.join("html")
  }
}
