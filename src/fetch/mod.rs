//! The narrow capability the harvest stages need from the network.
//!
//! Both remote stages only ever ask for "the text behind this URL, within this
//! timeout". Anything that can answer that (a plain HTTP client, a headless
//! browser, a test stub) can drive the pipeline.

mod http;

pub use http::HttpFetcher;

use async_trait::async_trait;
use color_eyre::Result;
use std::time::Duration;

/// Retrieve raw text for a request URL.
///
/// Implementations must be safe to call many times concurrently and must report
/// failure through the returned `Result` rather than panicking, so one bad item
/// never takes down its batch siblings.
#[async_trait]
pub trait FetchPort: Send + Sync {
  async fn fetch(&self, url: &str, timeout: Duration) -> Result<String>;
}
