//! Wayback Machine request templates and response parsing.

use chrono::NaiveDateTime;
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

use crate::config::ArchiveConfig;

/// Archive timestamp layout: year, month, day, hour, minute, second.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<.*?>").expect("valid regex"));

/// Builds the two kinds of remote URL the pipeline requests.
#[derive(Debug, Clone)]
pub struct ArchiveUrls {
  cdx_url: String,
  snapshot_url: String,
}

impl ArchiveUrls {
  pub fn new(config: &ArchiveConfig) -> Self {
    Self {
      cdx_url: config.cdx_url.clone(),
      snapshot_url: config.snapshot_url.trim_end_matches('/').to_string(),
    }
  }

  /// CDX query for the first capture of `domain` on or after `date` (`YYYYMMDD`).
  pub fn lookup_url(&self, domain: &str, date: &str) -> String {
    format!(
      "{}?url={}*&output=txt&limit=1&from={}",
      self.cdx_url, domain, date
    )
  }

  /// Raw (`id_`) capture of `domain` at `timestamp`.
  pub fn snapshot_url(&self, domain: &str, timestamp: &str) -> String {
    format!("{}/{}id_/{}", self.snapshot_url, timestamp, domain)
  }
}

impl Default for ArchiveUrls {
  fn default() -> Self {
    Self::new(&ArchiveConfig::default())
  }
}

pub fn strip_html_tags(text: &str) -> Cow<'_, str> {
  HTML_TAG.replace_all(text, "")
}

/// Pull the capture timestamp out of a CDX text line.
///
/// The timestamp is the second space-separated field. Returns `None` unless it is
/// exactly 14 digits forming a real date and time.
pub fn extract_timestamp(raw: &str) -> Option<String> {
  let text = strip_html_tags(raw);
  let token = text.split(' ').nth(1)?.trim();

  if token.len() != 14 || !token.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  NaiveDateTime::parse_from_str(token, TIMESTAMP_FORMAT).ok()?;

  Some(token.to_string())
}
