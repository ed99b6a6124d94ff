//! Snapshot URL -> page body, one file per URL.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing::warn;

use super::write_atomic;

/// Upper bound on an encoded file name, in bytes.
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Filesystem-safe name for `url`: path separators and colons become `_`, and the
/// result is cut to `MAX_FILE_NAME_LEN` bytes on a char boundary.
pub fn cache_key(url: &str) -> String {
  let encoded: String = url
    .chars()
    .map(|c| match c {
      '/' | ':' => '_',
      c => c,
    })
    .collect();

  truncate_to(encoded, MAX_FILE_NAME_LEN)
}

fn truncate_to(mut s: String, max: usize) -> String {
  if s.len() > max {
    let mut end = max;
    while !s.is_char_boundary(end) {
      end -= 1;
    }
    s.truncate(end);
  }
  s
}

#[derive(Debug, Clone)]
pub struct ContentCache {
  dir: PathBuf,
}

impl ContentCache {
  /// Cache rooted at `dir` without touching the filesystem. A missing directory
  /// reads as empty and is created by the first `store`.
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  /// Open the cache directory, creating it if needed.
  pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
    let cache = Self::new(dir);
    std::fs::create_dir_all(&cache.dir)
      .map_err(|e| eyre!("Failed to create content cache {}: {}", cache.dir.display(), e))?;
    Ok(cache)
  }

  pub fn path_for(&self, url: &str) -> PathBuf {
    self.dir.join(cache_key(url))
  }

  /// Cached body for `url`. Missing, empty and unreadable files are all misses.
  pub fn load(&self, url: &str) -> Option<String> {
    let path = self.path_for(url);
    match std::fs::read_to_string(&path) {
      Ok(content) if !content.is_empty() => Some(content),
      Ok(_) => None,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "Unreadable content cache entry");
        None
      }
    }
  }

  /// Persist the body for `url`. Empty bodies are not written, so the URL stays a
  /// miss and is fetched again next run.
  pub async fn store(&self, url: &str, content: &str) -> Result<()> {
    if content.is_empty() {
      return Ok(());
    }
    let key = cache_key(url);
    let tmp_name = format!("{}.tmp", truncate_to(key.clone(), MAX_FILE_NAME_LEN - 4));
    write_atomic(
      &self.dir.join(&key),
      &self.dir.join(tmp_name),
      content.as_bytes(),
    )
    .await
  }
}
