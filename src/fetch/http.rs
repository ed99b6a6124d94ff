use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;

use super::FetchPort;
use crate::config::FetchConfig;

/// Fetch port backed by a single shared `reqwest` client.
///
/// The client pools connections, so cloning the fetcher or calling it from many
/// tasks at once reuses sockets instead of opening a session per item.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(config: &FetchConfig) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(config.user_agent.as_str())
      .gzip(true)
      .deflate(true)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl FetchPort for HttpFetcher {
  async fn fetch(&self, url: &str, timeout: Duration) -> Result<String> {
    let response = self
      .client
      .get(url)
      .timeout(timeout)
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;

    let status = response.status();
    if !status.is_success() {
      return Err(eyre!("Request to {} returned {}", url, status));
    }

    response
      .text()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))
  }
}
