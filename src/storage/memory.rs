//! Bounded in-memory FIFO of ready items.

use std::collections::VecDeque;

use tokio::sync::Mutex;

use crate::models::Item;

/// Memory cache consumed by the request path and filled by workers.
#[derive(Debug)]
pub struct MemoryCache {
    capacity: usize,
    items: Mutex<VecDeque<Item>>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append an item. A full cache hands the item back untouched.
    pub async fn push(&self, item: Item) -> Result<(), Item> {
        let mut items = self.items.lock().await;
        if items.len() >= self.capacity {
            return Err(item);
        }
        items.push_back(item);
        Ok(())
    }

    /// Remove and return the oldest item.
    pub async fn pop(&self) -> Option<Item> {
        self.items.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    pub async fn is_full(&self) -> bool {
        self.items.lock().await.len() >= self.capacity
    }
}
