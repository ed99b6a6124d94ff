//! Dataset rows and the inputs they are built from.

use chrono::{Duration, NaiveDate, NaiveTime};
use color_eyre::{eyre::eyre, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::executor::WorkItem;

/// Date format of target dates, as sent to the CDX `from` parameter.
pub const DATE_FORMAT: &str = "%Y%m%d";

/// Name of the domain column in the seed list.
const DOMAIN_COLUMN: &str = "Domain";

/// A request for the nearest capture of `domain` around `date` (`YYYYMMDD`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainDate {
  pub domain: String,
  pub date: String,
}

impl DomainDate {
  pub fn new(domain: impl Into<String>, date: impl Into<String>) -> Self {
    Self {
      domain: domain.into(),
      date: date.into(),
    }
  }
}

impl WorkItem for DomainDate {
  fn key(&self) -> String {
    format!("{} @ {}", self.domain, self.date)
  }
}

/// One dataset entry, filled in stage by stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetRow {
  pub domain: String,
  pub date: String,
  /// 14-digit capture timestamp, empty when unresolved
  pub timestamp: String,
  /// Snapshot URL, derived from domain and timestamp
  pub url: String,
  /// Page body, empty until fetched
  pub content: String,
}

impl DatasetRow {
  pub fn new(request: DomainDate, timestamp: String) -> Self {
    Self {
      domain: request.domain,
      date: request.date,
      timestamp,
      ..Default::default()
    }
  }

  pub fn has_timestamp(&self) -> bool {
    !self.timestamp.is_empty()
  }

  pub fn has_content(&self) -> bool {
    !self.content.is_empty()
  }
}

impl WorkItem for DatasetRow {
  fn key(&self) -> String {
    self.url.clone()
  }
}

/// Read the first `limit` domains from a CSV file with a `Domain` header column.
pub fn load_domains(path: &Path, limit: usize) -> Result<Vec<String>> {
  let file = File::open(path)
    .map_err(|e| eyre!("Failed to open domain list {}: {}", path.display(), e))?;
  parse_domains(BufReader::new(file), limit)
    .map_err(|e| eyre!("Failed to read domain list {}: {}", path.display(), e))
}

fn parse_domains(reader: impl BufRead, limit: usize) -> Result<Vec<String>> {
  let mut lines = reader.lines();

  let header = lines.next().ok_or_else(|| eyre!("file is empty"))??;
  let column = header
    .split(',')
    .position(|name| name.trim().trim_matches('"') == DOMAIN_COLUMN)
    .ok_or_else(|| eyre!("no {} column in header", DOMAIN_COLUMN))?;

  let mut domains = Vec::new();
  for line in lines {
    if domains.len() >= limit {
      break;
    }
    let line = line?;
    if line.trim().is_empty() {
      continue;
    }
    let domain = line
      .split(',')
      .nth(column)
      .map(|field| field.trim().trim_matches('"'))
      .filter(|field| !field.is_empty())
      .ok_or_else(|| eyre!("row without a domain: {}", line))?;
    domains.push(domain.to_string());
  }

  Ok(domains)
}

/// Give every domain a uniformly random target date in `[start, end)`.
///
/// The generator is seeded from `seed` alone, so the same inputs always produce
/// the same dates.
pub fn assign_dates(
  domains: Vec<String>,
  start: NaiveDate,
  end: NaiveDate,
  seed: u64,
) -> Vec<DomainDate> {
  let mut rng = StdRng::seed_from_u64(seed);
  let start = start.and_time(NaiveTime::MIN);
  let span = (end.and_time(NaiveTime::MIN) - start).num_seconds().max(0);

  domains
    .into_iter()
    .map(|domain| {
      let offset = (span as f64 * rng.gen::<f64>()) as i64;
      let date = start + Duration::seconds(offset);
      DomainDate::new(domain, date.format(DATE_FORMAT).to_string())
    })
    .collect()
}
