//! Persistent memoization for the two remote stages.
//!
//! Both caches are plain files under the data directory and are the only state
//! that survives a restart:
//! - `TimestampCache`: one JSON document mapping domain -> target date -> timestamp,
//!   rewritten wholesale after every batch
//! - `ContentCache`: one file per snapshot URL, named by a filesystem-safe encoding
//!   of the URL
//!
//! Unreadable cache state is treated as a miss, never as a fatal error.

mod content;
mod timestamps;

pub use content::ContentCache;
pub use timestamps::TimestampCache;

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Write `data` next to `path` and rename it into place, so a crash mid-write
/// leaves either the old file or the new one.
async fn write_atomic(path: &Path, tmp_path: &Path, data: &[u8]) -> Result<()> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent)
      .await
      .map_err(|e| eyre!("Failed to create cache directory {}: {}", parent.display(), e))?;
  }

  let mut file = fs::File::create(tmp_path)
    .await
    .map_err(|e| eyre!("Failed to create {}: {}", tmp_path.display(), e))?;
  file
    .write_all(data)
    .await
    .map_err(|e| eyre!("Failed to write {}: {}", tmp_path.display(), e))?;
  file
    .sync_all()
    .await
    .map_err(|e| eyre!("Failed to sync {}: {}", tmp_path.display(), e))?;

  fs::rename(tmp_path, path)
    .await
    .map_err(|e| eyre!("Failed to move {} into place: {}", path.display(), e))?;

  Ok(())
}
