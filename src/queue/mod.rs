//! Discovery job queue
//!
//! A FIFO of [`JobMessage`] payloads shared by the scheduler (producer) and
//! discovery dispatch (consumer). Two interchangeable backends:
//!
//! - [`MemoryJobQueue`]: bounded in-process list, for tests and single-process runs
//! - [`RedisJobQueue`]: Redis list (`RPUSH` / `LPOP` / `LLEN`), shared by every
//!   coordinator process
//!
//! Each popped item is handed to exactly one caller. Batch pushes are split
//! into chunks of [`BATCH_LIMIT`] and every chunk succeeds or fails as a unit.

pub mod memory;
pub mod redis_list;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::JobMessage;

pub use memory::MemoryJobQueue;
pub use redis_list::RedisJobQueue;

/// Maximum number of messages submitted in one backend call
pub const BATCH_LIMIT: usize = 10;

/// Item of a batch that could not be enqueued
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPush {
    /// Index of the item in the submitted batch, as a decimal string
    pub id: String,
    pub error: String,
}

/// Per-item outcome of [`JobQueue::push_batch`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPushResult {
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedPush>,
}

impl BatchPushResult {
    /// True when no item failed
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// FIFO queue of discovery work items
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue one chunk of at most [`BATCH_LIMIT`] items atomically
    async fn push_chunk(&self, items: &[JobMessage]) -> Result<()>;

    /// Remove and return the oldest item
    async fn pop(&self) -> Result<Option<JobMessage>>;

    /// Number of items waiting
    async fn depth(&self) -> Result<usize>;

    /// Backend label for logs and status output
    fn backend_name(&self) -> &'static str;

    /// Enqueue a single item
    async fn push(&self, item: JobMessage) -> Result<()> {
        self.push_chunk(std::slice::from_ref(&item)).await
    }

    /// Enqueue any number of items in sequential chunks
    ///
    /// A failed chunk marks each of its items failed and does not stop the
    /// remaining chunks. Nothing is retried.
    async fn push_batch(&self, items: &[JobMessage]) -> BatchPushResult {
        let mut result = BatchPushResult::default();

        for (chunk_no, chunk) in items.chunks(BATCH_LIMIT).enumerate() {
            let base = chunk_no * BATCH_LIMIT;
            let ids = (base..base + chunk.len()).map(|i| i.to_string());

            match self.push_chunk(chunk).await {
                Ok(()) => result.succeeded.extend(ids),
                Err(e) => {
                    tracing::warn!(
                        backend = self.backend_name(),
                        chunk = chunk_no,
                        size = chunk.len(),
                        error = %e,
                        "Failed to enqueue job chunk"
                    );
                    let error = e.to_string();
                    result.failed.extend(ids.map(|id| FailedPush {
                        id,
                        error: error.clone(),
                    }));
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Queue that rejects one specific chunk call
    struct FlakyQueue {
        inner: MemoryJobQueue,
        calls: AtomicUsize,
        fail_call: usize,
        chunk_sizes: std::sync::Mutex<Vec<usize>>,
    }

    impl FlakyQueue {
        fn failing_on(fail_call: usize) -> Self {
            Self {
                inner: MemoryJobQueue::new(1000),
                calls: AtomicUsize::new(0),
                fail_call,
                chunk_sizes: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JobQueue for FlakyQueue {
        async fn push_chunk(&self, items: &[JobMessage]) -> Result<()> {
            self.chunk_sizes.lock().unwrap().push(items.len());
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.fail_call {
                return Err(Error::queue("throttled"));
            }
            self.inner.push_chunk(items).await
        }

        async fn pop(&self) -> Result<Option<JobMessage>> {
            self.inner.pop().await
        }

        async fn depth(&self) -> Result<usize> {
            self.inner.depth().await
        }

        fn backend_name(&self) -> &'static str {
            "flaky"
        }
    }

    fn messages(n: u32) -> Vec<JobMessage> {
        (0..n).map(|i| JobMessage::discovery(i * 10, i * 10 + 9, 1)).collect()
    }

    #[tokio::test]
    async fn test_push_batch_chunks_of_ten() {
        let queue = FlakyQueue::failing_on(0);
        let result = queue.push_batch(&messages(25)).await;

        assert_eq!(*queue.chunk_sizes.lock().unwrap(), vec![10, 10, 5]);
        assert_eq!(result.succeeded.len(), 25);
        assert!(result.is_complete());
        assert_eq!(queue.depth().await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_failed_chunk_does_not_block_others() {
        let queue = FlakyQueue::failing_on(2);
        let result = queue.push_batch(&messages(25)).await;

        assert_eq!(result.total(), 25);
        assert_eq!(result.succeeded.len(), 15);
        assert_eq!(result.failed.len(), 10);

        let failed_ids: Vec<&str> = result.failed.iter().map(|f| f.id.as_str()).collect();
        let expected: Vec<String> = (10..20).map(|i| i.to_string()).collect();
        assert_eq!(failed_ids, expected);
        assert!(result.failed.iter().all(|f| f.error.contains("throttled")));

        assert!(result.succeeded.contains(&"0".to_string()));
        assert!(result.succeeded.contains(&"24".to_string()));
        assert_eq!(queue.depth().await.unwrap(), 15);
    }

    #[tokio::test]
    async fn test_push_batch_empty() {
        let queue = MemoryJobQueue::new(10);
        let result = queue.push_batch(&[]).await;
        assert_eq!(result, BatchPushResult::default());
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryJobQueue::new(100);
        queue.push_batch(&messages(3)).await;

        for expected in messages(3) {
            assert_eq!(queue.pop().await.unwrap(), Some(expected));
        }
        assert_eq!(queue.pop().await.unwrap(), None);
    }
}
