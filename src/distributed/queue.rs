// src/distributed/queue.rs

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// Unbounded FIFO that workers pull from.
///
/// `pop` waits until an item is available; several workers may wait at
/// once and each pushed item wakes one of them.
#[derive(Debug)]
pub struct TaskQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Notify,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        self.lock().push_back(item);
        self.available.notify_one();
    }

    /// Put an item back at the head, e.g. when the worker that took it
    /// turned out to be unreachable.
    pub fn push_front(&self, item: T) {
        self.lock().push_front(item);
        self.available.notify_one();
    }

    pub async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.available.notified().await;
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    pub fn drain(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
