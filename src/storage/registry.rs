//! Disk files handed to the transport layer but not yet deleted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Where a claimed file lives and how to label it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServingEntry {
    pub path: PathBuf,
    pub content_type: String,
}

/// Mapping from data file name to its in-flight entry and claim time.
#[derive(Debug, Default)]
pub struct ServingRegistry {
    entries: Mutex<HashMap<String, (ServingEntry, Instant)>>,
}

impl ServingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, file_name: &str, entry: ServingEntry) {
        self.entries
            .lock()
            .await
            .insert(file_name.to_string(), (entry, Instant::now()));
    }

    /// Remove and return the entry; only one caller can ever take a given file.
    pub async fn take(&self, file_name: &str) -> Option<ServingEntry> {
        self.entries
            .lock()
            .await
            .remove(file_name)
            .map(|(entry, _)| entry)
    }

    /// Remove every entry claimed at least `max_age` ago and return their names.
    pub async fn take_older_than(&self, max_age: Duration) -> Vec<String> {
        let mut entries = self.entries.lock().await;
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, (_, claimed_at))| claimed_at.elapsed() >= max_age)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &stale {
            entries.remove(name);
        }
        stale
    }

    pub async fn contains(&self, file_name: &str) -> bool {
        self.entries.lock().await.contains_key(file_name)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
