//! Sequences the stages: domain list -> dated requests -> timestamps -> content.

use color_eyre::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::archive::ArchiveUrls;
use crate::cache::ContentCache;
use crate::config::Config;
use crate::content::ContentFetcher;
use crate::dataset::{self, DatasetRow, DomainDate};
use crate::executor::BatchExecutor;
use crate::fetch::FetchPort;
use crate::resolver::TimestampResolver;

/// Coverage of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
  pub domains: usize,
  pub resolved: usize,
  pub unresolved: usize,
  pub with_content: usize,
  pub missing_content: usize,
}

/// What a run would do, computed from the caches alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
  pub requests: usize,
  pub cached_lookups: usize,
  pub pending_lookups: usize,
  pub lookup_batches: usize,
  /// Rows whose timestamp is already cached
  pub resolved_rows: usize,
  pub cached_content: usize,
  pub pending_content: usize,
  /// Lower bound on the lookup stage's wall-clock time
  pub min_lookup_time: Duration,
}

impl fmt::Display for RunPlan {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "requests:          {}", self.requests)?;
    writeln!(f, "cached lookups:    {}", self.cached_lookups)?;
    writeln!(
      f,
      "pending lookups:   {} in {} batches (at least {}s)",
      self.pending_lookups,
      self.lookup_batches,
      self.min_lookup_time.as_secs()
    )?;
    writeln!(f, "resolved rows:     {}", self.resolved_rows)?;
    writeln!(f, "cached content:    {}", self.cached_content)?;
    write!(
      f,
      "pending content:   {} (more once lookups finish)",
      self.pending_content
    )
  }
}

pub struct Pipeline {
  config: Config,
  fetcher: Arc<dyn FetchPort>,
}

impl Pipeline {
  pub fn new(config: Config, fetcher: Arc<dyn FetchPort>) -> Self {
    Self { config, fetcher }
  }

  fn executor(&self) -> BatchExecutor {
    BatchExecutor::from_config(&self.config.batch)
  }

  pub fn resolver(&self) -> TimestampResolver {
    TimestampResolver::new(
      Arc::clone(&self.fetcher),
      self.executor(),
      ArchiveUrls::new(&self.config.archive),
      self.config.fetch.timeout(),
      self.config.timestamp_cache_path(),
    )
  }

  pub fn content_fetcher(&self) -> Result<ContentFetcher> {
    let cache = ContentCache::open(self.config.content_cache_dir())?;
    Ok(self.content_fetcher_with(cache))
  }

  fn content_fetcher_with(&self, cache: ContentCache) -> ContentFetcher {
    ContentFetcher::new(
      Arc::clone(&self.fetcher),
      self.executor(),
      ArchiveUrls::new(&self.config.archive),
      self.config.fetch.timeout(),
      cache,
    )
    .with_resume(self.config.content.resume)
  }

  /// Load the seed list and give each domain its target date.
  pub fn requests(&self) -> Result<Vec<DomainDate>> {
    let domains = dataset::load_domains(&self.config.domains_path(), self.config.num_domains)?;
    info!(domains = domains.len(), "Loaded domain list");

    Ok(dataset::assign_dates(
      domains,
      self.config.start_date,
      self.config.end_date,
      self.config.seed,
    ))
  }

  pub async fn run(&self) -> Result<(Vec<DatasetRow>, RunSummary)> {
    let requests = self.requests()?;
    self.run_requests(requests).await
  }

  /// Resolve timestamps for `requests`, drop the unresolved ones, then fetch content.
  pub async fn run_requests(
    &self,
    requests: Vec<DomainDate>,
  ) -> Result<(Vec<DatasetRow>, RunSummary)> {
    let domains = requests.len();
    let timestamps = self.resolver().resolve(&requests).await?;

    let rows: Vec<DatasetRow> = requests
      .into_iter()
      .zip(timestamps)
      .map(|(request, timestamp)| DatasetRow::new(request, timestamp))
      .filter(DatasetRow::has_timestamp)
      .collect();
    let resolved = rows.len();
    info!(resolved, unresolved = domains - resolved, "Timestamps resolved");

    let rows = self.content_fetcher()?.fetch(rows).await?;
    let with_content = rows.iter().filter(|r| r.has_content()).count();

    let summary = RunSummary {
      domains,
      resolved,
      unresolved: domains - resolved,
      with_content,
      missing_content: resolved - with_content,
    };
    info!(
      domains = summary.domains,
      resolved = summary.resolved,
      with_content = summary.with_content,
      missing_content = summary.missing_content,
      "Run complete"
    );

    Ok((rows, summary))
  }

  /// Work a run over `requests` would do, without touching the network or
  /// creating anything under `data_dir`.
  pub fn plan(&self, requests: &[DomainDate]) -> RunPlan {
    let resolver = self.resolver();
    let cache = resolver.load_cache();
    let pending = resolver.pending(&cache, requests);

    let rows: Vec<DatasetRow> = requests
      .iter()
      .filter_map(|r| {
        cache
          .get(&r.domain, &r.date)
          .filter(|ts| !ts.is_empty())
          .map(|ts| DatasetRow::new(r.clone(), ts.to_string()))
      })
      .collect();

    let fetcher = self.content_fetcher_with(ContentCache::new(self.config.content_cache_dir()));
    let rows = fetcher.prepare(rows);

    let executor = self.executor();
    let lookup_batches = executor.batch_count(pending.len());
    let waits = lookup_batches.saturating_sub(1) as u32;

    RunPlan {
      requests: requests.len(),
      cached_lookups: requests.len() - pending.len(),
      pending_lookups: pending.len(),
      lookup_batches,
      resolved_rows: rows.len(),
      cached_content: rows.iter().filter(|r| r.has_content()).count(),
      pending_content: fetcher.pending(&rows).len(),
      min_lookup_time: executor.min_interval() * waits,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::TimestampCache;
  use crate::fetch::testing::StubFetcher;
  use tempfile::TempDir;

  fn config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.data_dir = dir.path().to_path_buf();
    config.batch.size = 1;
    config.batch.interval_secs = 0;
    config
  }

  fn write_domains(dir: &TempDir) {
    std::fs::write(
      dir.path().join("majestic_million.csv"),
      "GlobalRank,TldRank,Domain,TLD\n1,1,a.example,example\n2,2,b.example,example\n",
    )
    .unwrap();
  }

  #[tokio::test]
  async fn test_end_to_end_with_one_unreachable_domain() {
    let dir = TempDir::new().unwrap();
    let stub = Arc::new(
      StubFetcher::new()
        .fail("b.example", "navigation timeout")
        .respond("cdx/search", "txt 20100103000000")
        .respond("id_/a.example", "<html>a</html>"),
    );
    let pipeline = Pipeline::new(config(&dir), stub.clone());

    let requests = vec![
      DomainDate::new("a.example", "20100101"),
      DomainDate::new("b.example", "20100601"),
    ];
    let (rows, summary) = pipeline.run_requests(requests).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].domain, "a.example");
    assert_eq!(rows[0].timestamp, "20100103000000");
    assert_eq!(
      rows[0].url,
      "https://web.archive.org/web/20100103000000id_/a.example"
    );
    assert_eq!(rows[0].content, "<html>a</html>");
    assert_eq!(
      summary,
      RunSummary {
        domains: 2,
        resolved: 1,
        unresolved: 1,
        with_content: 1,
        missing_content: 0,
      }
    );

    let cache = TimestampCache::load(dir.path().join("archive_dates.json"));
    assert_eq!(cache.len(), 1);
    assert_eq!(stub.requests().len(), 3);
  }

  #[tokio::test]
  async fn test_run_reads_domain_list() {
    let dir = TempDir::new().unwrap();
    write_domains(&dir);
    let stub = Arc::new(
      StubFetcher::new()
        .respond("cdx/search", "txt 20100103000000")
        .respond("id_/", "<html></html>"),
    );
    let pipeline = Pipeline::new(config(&dir), stub);

    let (rows, summary) = pipeline.run().await.unwrap();

    assert_eq!(summary.domains, 2);
    assert_eq!(summary.with_content, 2);
    assert_eq!(rows[0].domain, "a.example");
    assert_eq!(rows[1].domain, "b.example");
  }

  #[tokio::test]
  async fn test_plan_reflects_caches() {
    let dir = TempDir::new().unwrap();
    write_domains(&dir);
    let stub = Arc::new(
      StubFetcher::new()
        .respond("url=a.example", "txt 20100103000000")
        .fail("cdx/search", "offline")
        .respond("id_/", "<html></html>"),
    );
    let mut cfg = config(&dir);
    cfg.batch.interval_secs = 60;
    let pipeline = Pipeline::new(cfg, stub.clone());

    let requests = pipeline.requests().unwrap();
    let before = pipeline.plan(&requests);
    assert_eq!(before.pending_lookups, 2);
    assert_eq!(before.lookup_batches, 2);
    assert_eq!(before.min_lookup_time, Duration::from_secs(60));
    assert_eq!(before.resolved_rows, 0);
    assert!(stub.requests().is_empty());

    tokio::time::pause();
    pipeline.run_requests(requests.clone()).await.unwrap();

    let after = pipeline.plan(&requests);
    assert_eq!(after.cached_lookups, 1);
    assert_eq!(after.pending_lookups, 1);
    assert_eq!(after.resolved_rows, 1);
    assert_eq!(after.cached_content, 1);
    assert_eq!(after.pending_content, 0);
  }

  #[test]
  fn test_plan_creates_no_cache_directory() {
    let dir = TempDir::new().unwrap();
    write_domains(&dir);
    let pipeline = Pipeline::new(config(&dir), Arc::new(StubFetcher::new()));

    let requests = pipeline.requests().unwrap();
    let plan = pipeline.plan(&requests);

    assert_eq!(plan.pending_lookups, 2);
    assert_eq!(plan.cached_content, 0);
    assert!(!dir.path().join("html").exists());
    assert!(!dir.path().join("archive_dates.json").exists());
  }

  #[tokio::test]
  async fn test_missing_domain_list_is_fatal() {
    let dir = TempDir::new().unwrap();
    let pipeline = Pipeline::new(config(&dir), Arc::new(StubFetcher::new()));
    assert!(pipeline.run().await.is_err());
  }
}
