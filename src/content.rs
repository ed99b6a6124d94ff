//! Fetches snapshot bodies for resolved rows, resuming from the content cache.

use color_eyre::{eyre::WrapErr, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::archive::ArchiveUrls;
use crate::cache::ContentCache;
use crate::dataset::DatasetRow;
use crate::executor::BatchExecutor;
use crate::fetch::FetchPort;

/// Which unpopulated rows a run goes back for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
  /// Skip everything before the last row that already has content. Holes left
  /// earlier in the sequence by a previous run are not revisited.
  #[default]
  LastPopulated,
  /// Fetch every row that has a timestamp but no content.
  ScanAll,
}

impl FromStr for ResumePolicy {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s {
      "last_populated" | "last-populated" => Ok(Self::LastPopulated),
      "scan_all" | "scan-all" => Ok(Self::ScanAll),
      other => Err(format!(
        "unknown resume policy {} (expected last_populated or scan_all)",
        other
      )),
    }
  }
}

impl fmt::Display for ResumePolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::LastPopulated => write!(f, "last_populated"),
      Self::ScanAll => write!(f, "scan_all"),
    }
  }
}

pub struct ContentFetcher {
  fetcher: Arc<dyn FetchPort>,
  executor: BatchExecutor,
  urls: ArchiveUrls,
  timeout: Duration,
  cache: ContentCache,
  resume: ResumePolicy,
}

impl ContentFetcher {
  pub fn new(
    fetcher: Arc<dyn FetchPort>,
    executor: BatchExecutor,
    urls: ArchiveUrls,
    timeout: Duration,
    cache: ContentCache,
  ) -> Self {
    Self {
      fetcher,
      executor,
      urls,
      timeout,
      cache,
      resume: ResumePolicy::default(),
    }
  }

  pub fn with_resume(mut self, resume: ResumePolicy) -> Self {
    self.resume = resume;
    self
  }

  /// Fill in each row's snapshot URL and any content already on disk.
  pub fn prepare(&self, rows: Vec<DatasetRow>) -> Vec<DatasetRow> {
    rows
      .into_iter()
      .map(|mut row| {
        if row.has_timestamp() {
          row.url = self.urls.snapshot_url(&row.domain, &row.timestamp);
          if !row.has_content() {
            row.content = self.cache.load(&row.url).unwrap_or_default();
          }
        }
        row
      })
      .collect()
  }

  /// Indices of prepared rows that still need a remote fetch.
  pub fn pending(&self, rows: &[DatasetRow]) -> Vec<usize> {
    let start = match self.resume {
      ResumePolicy::LastPopulated => rows.iter().rposition(DatasetRow::has_content).unwrap_or(0),
      ResumePolicy::ScanAll => 0,
    };

    (start..rows.len())
      .filter(|&i| rows[i].has_timestamp() && !rows[i].has_content())
      .collect()
  }

  /// Return `rows` with content populated wherever it is cached or fetchable.
  ///
  /// Row order is preserved. Each fetched body is written to its own cache file
  /// as soon as its batch completes; rows still empty afterwards are left for a
  /// later run.
  pub async fn fetch(&self, rows: Vec<DatasetRow>) -> Result<Vec<DatasetRow>> {
    let mut rows = self.prepare(rows);
    let cached = rows.iter().filter(|r| r.has_content()).count();
    let pending = self.pending(&rows);

    info!(
      rows = rows.len(),
      cached,
      pending = pending.len(),
      batches = self.executor.batch_count(pending.len()),
      resume = %self.resume,
      "Fetching snapshot content"
    );

    if pending.is_empty() {
      return Ok(rows);
    }

    let work: Vec<DatasetRow> = pending.iter().map(|&i| rows[i].clone()).collect();
    let contents = self
      .executor
      .run(
        &work,
        |row| self.download(row),
        |batch, contents| {
          let cache = self.cache.clone();
          let fetched: Vec<(String, String)> = batch
            .iter()
            .zip(contents)
            .filter(|(_, content)| !content.is_empty())
            .map(|(row, content)| (row.url.clone(), content.clone()))
            .collect();
          async move {
            for (url, content) in fetched {
              cache.store(&url, &content).await?;
            }
            Ok::<_, color_eyre::Report>(())
          }
        },
      )
      .await?;

    for (index, content) in pending.into_iter().zip(contents) {
      rows[index].content = content;
    }

    let missing = rows
      .iter()
      .filter(|r| r.has_timestamp() && !r.has_content())
      .count();
    info!(missing, "Content fetch finished");

    Ok(rows)
  }

  async fn download(&self, row: &DatasetRow) -> Result<String> {
    self
      .fetcher
      .fetch(&row.url, self.timeout)
      .await
      .wrap_err_with(|| format!("Snapshot fetch for {} failed", row.domain))
  }
}
