//! Domain/date -> snapshot timestamp memo.

use color_eyre::Result;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use tracing::{debug, warn};

use super::write_atomic;

type DateMap = BTreeMap<String, String>;

/// Resolved timestamps keyed by domain, then target date (`YYYYMMDD`).
///
/// A value is either a 14-digit archive timestamp or `""` for "the archive has
/// no capture". Entries are only ever added: once a key is present its value is
/// kept for good, so the cache grows monotonically across runs.
#[derive(Debug, Clone)]
pub struct TimestampCache {
  path: PathBuf,
  entries: BTreeMap<String, DateMap>,
}

impl TimestampCache {
  /// Load the cache at `path`. A missing, unreadable or corrupt file starts empty.
  pub fn load(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    let entries = match std::fs::read(&path) {
      Ok(data) => match serde_json::from_slice(&data) {
        Ok(entries) => entries,
        Err(e) => {
          warn!(path = %path.display(), error = %e, "Timestamp cache is corrupt, starting empty");
          BTreeMap::new()
        }
      },
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "No timestamp cache yet");
        BTreeMap::new()
      }
      Err(e) => {
        warn!(path = %path.display(), error = %e, "Timestamp cache is unreadable, starting empty");
        BTreeMap::new()
      }
    };

    Self { path, entries }
  }

  pub fn get(&self, domain: &str, date: &str) -> Option<&str> {
    self
      .entries
      .get(domain)
      .and_then(|dates| dates.get(date))
      .map(String::as_str)
  }

  pub fn contains(&self, domain: &str, date: &str) -> bool {
    self.get(domain, date).is_some()
  }

  /// Record a lookup outcome. Returns false (and changes nothing) when the key
  /// already has a value.
  pub fn insert(&mut self, domain: &str, date: &str, timestamp: &str) -> bool {
    let dates = self.entries.entry(domain.to_string()).or_default();
    if dates.contains_key(date) {
      return false;
    }
    dates.insert(date.to_string(), timestamp.to_string());
    true
  }

  /// Number of (domain, date) entries.
  pub fn len(&self) -> usize {
    self.entries.values().map(BTreeMap::len).sum()
  }

  /// Rewrite the whole map to disk.
  ///
  /// The map is serialized when this is called; the returned future only owns
  /// the bytes, so the cache can keep changing while the write is in flight.
  pub fn save(&self) -> impl Future<Output = Result<()>> + 'static {
    let path = self.path.clone();
    let data = serde_json::to_vec_pretty(&self.entries);
    async move {
      let data = data?;
      write_atomic(&path, &path.with_extension("json.tmp"), &data).await
    }
  }
}
