//! Buffered, asynchronous request logging.
//!
//! Request handlers enqueue log entries into an in-memory buffer and move
//! on; a single background flusher inserts batches every flush interval or
//! as soon as the buffer reaches the batch size. Logging never back-pressures
//! a request, and insert failures are logged, not propagated.
//!
//! The buffer lock is held only to push or to swap the buffer out; the
//! database insert happens after the lock is released.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{Ledger, RequestLogEntry};

/// Hard cap on buffered entries; beyond this, entries are dropped with a
/// warning rather than growing without bound while the database is down.
const MAX_BUFFERED: usize = 10_000;

/// Shared handle to the request-log buffer.
#[derive(Clone)]
pub struct RequestLogQueue {
    buffer: Arc<Mutex<Vec<RequestLogEntry>>>,
    batch_size: usize,
    batch_ready: Arc<Notify>,
}

impl RequestLogQueue {
    pub fn new(batch_size: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
            batch_size,
            batch_ready: Arc::new(Notify::new()),
        }
    }

    /// Enqueues an entry. Non-blocking and infallible from the caller's
    /// point of view.
    pub fn enqueue(&self, entry: RequestLogEntry) {
        let len = {
            let mut buffer = self.buffer.lock().expect("log buffer lock poisoned");
            if buffer.len() >= MAX_BUFFERED {
                drop(buffer);
                tracing::warn!("request-log buffer full; dropping entry");
                return;
            }
            buffer.push(entry);
            buffer.len()
        };
        if len >= self.batch_size {
            self.batch_ready.notify_one();
        }
    }

    /// Swaps the buffer out, returning everything accumulated so far.
    fn take_all(&self) -> Vec<RequestLogEntry> {
        let mut buffer = self.buffer.lock().expect("log buffer lock poisoned");
        std::mem::take(&mut *buffer)
    }

    /// Number of entries currently buffered.
    pub fn pending(&self) -> usize {
        self.buffer.lock().expect("log buffer lock poisoned").len()
    }

    /// Runs the flush loop until cancellation, then drains the buffer.
    ///
    /// Wakes on whichever comes first: the flush interval, or the buffer
    /// reaching the batch size.
    pub async fn run_flusher(
        self,
        ledger: Ledger,
        flush_interval: Duration,
        cancel: CancellationToken,
    ) {
        tracing::info!(
            interval_ms = flush_interval.as_millis() as u64,
            batch_size = self.batch_size,
            "request-log flusher started"
        );
        let mut ticker = tokio::time::interval(flush_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.batch_ready.notified() => {}
            }
            self.flush(&ledger).await;
        }

        // Shutdown: drain whatever is left before the pool closes.
        self.flush(&ledger).await;
        tracing::info!("request-log flusher drained and stopped");
    }

    async fn flush(&self, ledger: &Ledger) {
        let batch = self.take_all();
        if batch.is_empty() {
            return;
        }
        let count = batch.len();
        if let Err(e) = ledger.insert_request_batch(&batch).await {
            // Observability concern, not correctness: swallow the failure.
            tracing::warn!(error = %e, count, "request-log batch insert failed");
        } else {
            tracing::debug!(count, "flushed request-log batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(service: &str) -> RequestLogEntry {
        RequestLogEntry::new(service, "/api/test")
    }

    #[test]
    fn test_enqueue_and_take() {
        let queue = RequestLogQueue::new(50);
        queue.enqueue(entry("a"));
        queue.enqueue(entry("b"));
        assert_eq!(queue.pending(), 2);

        let batch = queue.take_all();
        assert_eq!(batch.len(), 2);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_take_all_empties_buffer() {
        let queue = RequestLogQueue::new(50);
        for _ in 0..10 {
            queue.enqueue(entry("s"));
        }
        assert_eq!(queue.take_all().len(), 10);
        assert!(queue.take_all().is_empty());
    }

    #[test]
    fn test_overflow_drops() {
        let queue = RequestLogQueue::new(50);
        for _ in 0..MAX_BUFFERED + 5 {
            queue.enqueue(entry("s"));
        }
        assert_eq!(queue.pending(), MAX_BUFFERED);
    }

    #[tokio::test]
    async fn test_batch_ready_notification() {
        let queue = RequestLogQueue::new(3);
        queue.enqueue(entry("a"));
        queue.enqueue(entry("b"));
        queue.enqueue(entry("c"));
        // The third enqueue reached the batch size and must have notified.
        tokio::time::timeout(Duration::from_millis(100), queue.batch_ready.notified())
            .await
            .expect("batch-ready notification not raised");
    }
}
