//! Bounded in-process job queue

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::JobMessage;

use super::JobQueue;

/// Default capacity when none is configured
pub const DEFAULT_CAPACITY: usize = 10_000;

/// `VecDeque` guarded by a mutex; a chunk that would overflow is rejected whole
pub struct MemoryJobQueue {
    items: Mutex<VecDeque<JobMessage>>,
    capacity: usize,
}

impl MemoryJobQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<JobMessage>>> {
        self.items
            .lock()
            .map_err(|_| Error::queue("memory queue mutex poisoned"))
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn push_chunk(&self, items: &[JobMessage]) -> Result<()> {
        let mut queue = self.lock()?;
        if queue.len() + items.len() > self.capacity {
            return Err(Error::queue(format!(
                "queue full: {} queued, {} incoming, capacity {}",
                queue.len(),
                items.len(),
                self.capacity
            )));
        }
        queue.extend(items.iter().copied());
        Ok(())
    }

    async fn pop(&self) -> Result<Option<JobMessage>> {
        Ok(self.lock()?.pop_front())
    }

    async fn depth(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_overflowing_chunk_rejected_whole() {
        let queue = MemoryJobQueue::new(5);
        let items: Vec<JobMessage> = (0..4).map(|i| JobMessage::discovery(i, i, 1)).collect();

        queue.push_chunk(&items).await.unwrap();
        let err = queue.push_chunk(&items[..2]).await.unwrap_err();
        assert!(err.to_string().contains("queue full"));
        assert_eq!(queue.depth().await.unwrap(), 4);

        queue.push(JobMessage::discovery(9, 9, 1)).await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_pops_hand_out_each_item_once() {
        let queue = Arc::new(MemoryJobQueue::new(100));
        let items: Vec<JobMessage> = (0..50).map(|i| JobMessage::discovery(i, i, 1)).collect();
        queue.push_batch(&items).await;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                let mut taken = Vec::new();
                while let Some(item) = queue.pop().await.unwrap() {
                    taken.push(item);
                }
                taken
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort_by_key(|m| match m {
            JobMessage::Discovery { start_ip, .. } => *start_ip,
        });
        assert_eq!(all, items);
    }
}
