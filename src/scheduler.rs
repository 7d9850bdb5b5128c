//! Batch scheduler.
//! A process-wide semaphore caps concurrent OCR submissions across all
//! requests; within a request, images run with bounded concurrency and
//! results come back in upload order.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{self, StreamExt};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::PipelineError;
use crate::metrics::{metric_names, MetricsRegistry};

pub struct BatchScheduler {
    ocr_permits: Semaphore,
    max_concurrency: usize,
    metrics: Arc<MetricsRegistry>,
}

impl BatchScheduler {
    pub fn new(max_concurrency: usize, metrics: Arc<MetricsRegistry>) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            ocr_permits: Semaphore::new(max_concurrency),
            max_concurrency,
            metrics,
        }
    }

    /// Wait for an OCR slot. Queue time is recorded as `queue_wait_ocr`.
    pub async fn acquire_ocr(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SemaphorePermit<'_>, PipelineError> {
        let enqueued_at = Instant::now();
        let permit = tokio::select! {
            permit = self.ocr_permits.acquire() => {
                permit.map_err(|_| {
                    PipelineError::ProviderUnavailable("OCR scheduler closed".into())
                })?
            }
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        };
        let wait_us = enqueued_at.elapsed().as_micros() as f64;
        self.metrics.record(metric_names::QUEUE_WAIT_OCR, wait_us);
        debug!(wait_us, available = self.ocr_permits.available_permits(), "ocr_slot_acquired");
        Ok(permit)
    }

    /// Run `job` over `items` with at most `max_concurrency` in flight;
    /// outputs are in input order.
    pub async fn run_ordered<T, F, Fut>(&self, items: Vec<T>, job: F) -> Vec<Fut::Output>
    where
        F: FnMut((usize, T)) -> Fut,
        Fut: Future,
    {
        stream::iter(items.into_iter().enumerate())
            .map(job)
            .buffered(self.max_concurrency)
            .collect()
            .await
    }

    pub fn available_slots(&self) -> usize {
        self.ocr_permits.available_permits()
    }
}
