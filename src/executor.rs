//! Throttled batch executor shared by the timestamp and content stages.
//!
//! Items are split into consecutive batches. Every item of a batch runs
//! concurrently and the batch finishes when all of them have. Consecutive batch
//! starts are at least `min_interval` apart, which keeps the request rate under
//! the archive's informal limit no matter how fast individual responses come back.

use color_eyre::Result;
use futures::future::{join_all, FutureExt};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BatchConfig;

/// Something the executor can schedule. The key only identifies the item in logs.
pub trait WorkItem {
  fn key(&self) -> String;
}

#[derive(Debug, Clone, Copy)]
pub struct BatchExecutor {
  batch_size: usize,
  min_interval: Duration,
}

impl BatchExecutor {
  pub fn new(batch_size: usize, min_interval: Duration) -> Self {
    Self {
      batch_size: batch_size.max(1),
      min_interval,
    }
  }

  pub fn from_config(config: &BatchConfig) -> Self {
    Self::new(config.size, config.interval())
  }

  pub fn min_interval(&self) -> Duration {
    self.min_interval
  }

  pub fn batch_count(&self, items: usize) -> usize {
    items.div_ceil(self.batch_size)
  }

  /// Run `op` over `items` and return one result per item, in input order.
  ///
  /// A per-item error or panic is logged and replaced by `T::default()`; it never
  /// fails the batch. After each batch `on_batch` receives that batch's items and
  /// results and returns the checkpoint write, which is awaited before the next
  /// batch starts. An error from the write aborts the run, since progress can no
  /// longer be saved.
  pub async fn run<'a, I, T, F, Fut, C, W>(
    &self,
    items: &'a [I],
    op: F,
    mut on_batch: C,
  ) -> Result<Vec<T>>
  where
    I: WorkItem,
    T: Default,
    F: Fn(&'a I) -> Fut,
    Fut: Future<Output = Result<T>>,
    C: FnMut(&'a [I], &[T]) -> W,
    W: Future<Output = Result<()>>,
  {
    let batches = self.batch_count(items.len());
    let mut results = Vec::with_capacity(items.len());

    for (index, batch) in items.chunks(self.batch_size).enumerate() {
      let started = Instant::now();
      info!(
        batch = index + 1,
        batches,
        items = batch.len(),
        "Starting batch"
      );

      let outcomes = join_all(batch.iter().map(|item| {
        let fut = op(item);
        async move {
          match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(value)) => (value, false),
            Ok(Err(e)) => {
              warn!(item = %item.key(), error = %format!("{:#}", e), "Item failed");
              (T::default(), true)
            }
            Err(_) => {
              warn!(item = %item.key(), "Item panicked");
              (T::default(), true)
            }
          }
        }
      }))
      .await;

      let failed = outcomes.iter().filter(|(_, failed)| *failed).count();
      let batch_results: Vec<T> = outcomes.into_iter().map(|(value, _)| value).collect();

      on_batch(batch, &batch_results).await?;
      results.extend(batch_results);

      let elapsed = started.elapsed();
      info!(
        batch = index + 1,
        batches,
        failed,
        elapsed_ms = elapsed.as_millis() as u64,
        "Finished batch"
      );

      if index + 1 < batches && elapsed < self.min_interval {
        let wait = self.min_interval - elapsed;
        debug!(wait_ms = wait.as_millis() as u64, "Waiting before next batch");
        tokio::time::sleep(wait).await;
      }
    }

    Ok(results)
  }
}
