//! In-process work queue shared by the pool's workers.
//!
//! The queue is filled once up front and then only drained. Each task is
//! handed to exactly one worker.

use std::collections::VecDeque;

use tokio::sync::Mutex;

use crate::tasks::Task;

/// Pull-only FIFO of pending tasks.
#[derive(Debug, Default)]
pub struct WorkQueue {
    pending: Mutex<VecDeque<Task>>,
}

impl WorkQueue {
    /// Creates a queue holding `tasks` in order.
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            pending: Mutex::new(tasks.into()),
        }
    }

    /// Takes the next task, or `None` once the queue is empty.
    pub async fn dequeue(&self) -> Option<Task> {
        self.pending.lock().await.pop_front()
    }

    /// Number of tasks not yet handed out.
    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Returns true if every task has been handed out.
    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }
}
