//! Maps (domain, target date) to the nearest archived capture timestamp.

use color_eyre::{eyre::WrapErr, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::archive::{extract_timestamp, ArchiveUrls};
use crate::cache::TimestampCache;
use crate::dataset::DomainDate;
use crate::executor::BatchExecutor;
use crate::fetch::FetchPort;

/// Outcome of one remote lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Lookup {
  /// The archive returned a valid capture timestamp
  Resolved(String),
  /// The archive answered, but with no usable timestamp
  NotFound,
  /// The request itself failed; nothing is cached so a later run retries it
  #[default]
  Failed,
}

pub struct TimestampResolver {
  fetcher: Arc<dyn FetchPort>,
  executor: BatchExecutor,
  urls: ArchiveUrls,
  timeout: Duration,
  cache_path: PathBuf,
}

impl TimestampResolver {
  pub fn new(
    fetcher: Arc<dyn FetchPort>,
    executor: BatchExecutor,
    urls: ArchiveUrls,
    timeout: Duration,
    cache_path: impl Into<PathBuf>,
  ) -> Self {
    Self {
      fetcher,
      executor,
      urls,
      timeout,
      cache_path: cache_path.into(),
    }
  }

  /// Requests with no cache entry at all, deduplicated, in first-seen order.
  ///
  /// Cached empty entries count as answered and are not returned.
  pub fn pending(&self, cache: &TimestampCache, requests: &[DomainDate]) -> Vec<DomainDate> {
    let mut seen = HashSet::new();
    requests
      .iter()
      .filter(|r| !cache.contains(&r.domain, &r.date))
      .filter(|r| seen.insert((r.domain.as_str(), r.date.as_str())))
      .cloned()
      .collect()
  }

  pub fn load_cache(&self) -> TimestampCache {
    TimestampCache::load(&self.cache_path)
  }

  /// Resolve every request to a timestamp, or `""` when none is known.
  ///
  /// Output is aligned with `requests`. Only uncached requests go to the network,
  /// and the cache file is rewritten after every batch, before the next starts.
  pub async fn resolve(&self, requests: &[DomainDate]) -> Result<Vec<String>> {
    let mut cache = self.load_cache();
    let pending = self.pending(&cache, requests);

    info!(
      requests = requests.len(),
      cache_entries = cache.len(),
      cached = requests.len() - pending.len(),
      pending = pending.len(),
      batches = self.executor.batch_count(pending.len()),
      "Resolving snapshot timestamps"
    );

    if !pending.is_empty() {
      self
        .executor
        .run(
          &pending,
          |request| self.lookup(request),
          |batch, lookups| {
            for (request, lookup) in batch.iter().zip(lookups) {
              match lookup {
                Lookup::Resolved(timestamp) => {
                  cache.insert(&request.domain, &request.date, timestamp);
                }
                Lookup::NotFound => {
                  cache.insert(&request.domain, &request.date, "");
                }
                Lookup::Failed => {}
              }
            }
            cache.save()
          },
        )
        .await?;
    }

    Ok(
      requests
        .iter()
        .map(|r| cache.get(&r.domain, &r.date).unwrap_or_default().to_string())
        .collect(),
    )
  }

  async fn lookup(&self, request: &DomainDate) -> Result<Lookup> {
    let url = self.urls.lookup_url(&request.domain, &request.date);
    let raw = self
      .fetcher
      .fetch(&url, self.timeout)
      .await
      .wrap_err_with(|| format!("Timestamp lookup {} failed", url))?;

    match extract_timestamp(&raw) {
      Some(timestamp) => Ok(Lookup::Resolved(timestamp)),
      None => {
        warn!(url = %url, "No valid timestamp in lookup response");
        Ok(Lookup::NotFound)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::testing::StubFetcher;
  use async_trait::async_trait;
  use std::sync::Mutex;
  use tempfile::TempDir;

  /// Port that records how many cache entries are on disk at each lookup.
  struct CacheWatcher {
    cache_path: PathBuf,
    entries_seen: Mutex<Vec<usize>>,
  }

  #[async_trait]
  impl FetchPort for CacheWatcher {
    async fn fetch(&self, _url: &str, _timeout: Duration) -> Result<String> {
      let entries = TimestampCache::load(&self.cache_path).len();
      self.entries_seen.lock().unwrap().push(entries);
      Ok("txt 20100103000000".to_string())
    }
  }

  fn resolver(fetcher: Arc<StubFetcher>, dir: &TempDir) -> TimestampResolver {
    TimestampResolver::new(
      fetcher,
      BatchExecutor::new(1, Duration::ZERO),
      ArchiveUrls::default(),
      Duration::from_secs(5),
      dir.path().join("archive_dates.json"),
    )
  }

  fn requests() -> Vec<DomainDate> {
    vec![
      DomainDate::new("a.example", "20100101"),
      DomainDate::new("b.example", "20100601"),
    ]
  }

  #[tokio::test]
  async fn test_resolves_and_persists_only_answers() {
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(
      StubFetcher::new()
        .respond("a.example", "txt 20100103000000")
        .fail("b.example", "navigation timeout"),
    );

    let resolved = resolver(fetcher.clone(), &dir)
      .resolve(&requests())
      .await
      .unwrap();

    assert_eq!(resolved, vec!["20100103000000", ""]);
    assert_eq!(fetcher.requests().len(), 2);

    let cache = TimestampCache::load(dir.path().join("archive_dates.json"));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("a.example", "20100101"), Some("20100103000000"));
    assert!(!cache.contains("b.example", "20100601"));
  }

  #[tokio::test]
  async fn test_lookup_url_is_sent_to_port() {
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(StubFetcher::new().respond("a.example", "txt 20100103000000"));

    resolver(fetcher.clone(), &dir)
      .resolve(&requests()[..1])
      .await
      .unwrap();

    assert_eq!(
      fetcher.requests(),
      vec!["http://web.archive.org/cdx/search/cdx?url=a.example*&output=txt&limit=1&from=20100101"]
    );
  }

  #[tokio::test]
  async fn test_not_found_is_cached_and_not_retried() {
    let dir = TempDir::new().unwrap();
    let first = Arc::new(StubFetcher::new().respond("example", "<html><body></body></html>"));
    let resolved = resolver(first, &dir).resolve(&requests()).await.unwrap();
    assert_eq!(resolved, vec!["", ""]);

    let second = Arc::new(StubFetcher::new().respond("example", "txt 20100103000000"));
    let resolved = resolver(second.clone(), &dir)
      .resolve(&requests())
      .await
      .unwrap();

    assert_eq!(resolved, vec!["", ""]);
    assert!(second.requests().is_empty());
  }

  #[tokio::test]
  async fn test_failed_lookup_is_retried_next_run() {
    let dir = TempDir::new().unwrap();
    let first = Arc::new(StubFetcher::new().fail("example", "connection reset"));
    resolver(first, &dir).resolve(&requests()).await.unwrap();

    let second = Arc::new(StubFetcher::new().respond("example", "txt 20100103000000"));
    let resolved = resolver(second.clone(), &dir)
      .resolve(&requests())
      .await
      .unwrap();

    assert_eq!(resolved, vec!["20100103000000", "20100103000000"]);
    assert_eq!(second.requests().len(), 2);
  }

  #[tokio::test]
  async fn test_cached_entries_are_stable_across_runs() {
    let dir = TempDir::new().unwrap();
    let first = Arc::new(StubFetcher::new().respond("example", "txt 20100103000000"));
    resolver(first, &dir).resolve(&requests()).await.unwrap();

    // Different answers and a different ordering on the second run
    let second = Arc::new(StubFetcher::new().respond("example", "txt 20200101000000"));
    let mut reordered = requests();
    reordered.reverse();
    reordered.push(DomainDate::new("c.example", "20150101"));

    let resolved = resolver(second.clone(), &dir)
      .resolve(&reordered)
      .await
      .unwrap();

    assert_eq!(
      resolved,
      vec!["20100103000000", "20100103000000", "20200101000000"]
    );
    assert_eq!(second.requests().len(), 1);
    assert!(second.requests()[0].contains("c.example"));
  }

  #[tokio::test]
  async fn test_duplicate_requests_are_looked_up_once() {
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(StubFetcher::new().respond("a.example", "txt 20100103000000"));
    let duplicated = vec![
      DomainDate::new("a.example", "20100101"),
      DomainDate::new("a.example", "20100101"),
    ];

    let resolved = resolver(fetcher.clone(), &dir)
      .resolve(&duplicated)
      .await
      .unwrap();

    assert_eq!(resolved, vec!["20100103000000", "20100103000000"]);
    assert_eq!(fetcher.requests().len(), 1);
  }

  #[tokio::test]
  async fn test_cache_is_saved_before_next_batch() {
    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("archive_dates.json");
    let watcher = Arc::new(CacheWatcher {
      cache_path: cache_path.clone(),
      entries_seen: Mutex::new(Vec::new()),
    });
    let resolver = TimestampResolver::new(
      watcher.clone(),
      BatchExecutor::new(1, Duration::ZERO),
      ArchiveUrls::default(),
      Duration::from_secs(5),
      cache_path,
    );
    let mut three = requests();
    three.push(DomainDate::new("c.example", "20150101"));

    resolver.resolve(&three).await.unwrap();

    assert_eq!(*watcher.entries_seen.lock().unwrap(), vec![0, 1, 2]);
  }

  #[tokio::test]
  async fn test_corrupt_cache_is_a_cold_start() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("archive_dates.json"), b"[1, 2").unwrap();
    let fetcher = Arc::new(StubFetcher::new().respond("example", "txt 20100103000000"));

    let resolved = resolver(fetcher.clone(), &dir)
      .resolve(&requests())
      .await
      .unwrap();

    assert_eq!(resolved, vec!["20100103000000", "20100103000000"]);
    assert_eq!(fetcher.requests().len(), 2);
  }
}
