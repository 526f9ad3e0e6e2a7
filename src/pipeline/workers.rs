// src/pipeline/workers.rs

//! Producer pool keeping the memory and disk caches stocked.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::models::{CacheConfig, Config, Item};
use crate::pipeline::Acquire;
use crate::storage::{DiskCache, MemoryCache};

/// Result of one worker iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Both caches at capacity, nothing fetched
    Saturated,
    /// Memory full but disk has room, nothing fetched
    MemoryFull,
    /// New item pushed to memory
    StoredInMemory,
    /// Memory filled up meanwhile, item persisted to disk
    StoredOnDisk,
    /// Item fetched but neither cache took it
    Dropped,
    /// Acquisition failed (or the iteration panicked)
    Failed,
}

/// Shared state of every worker.
pub struct WorkerPool {
    acquire: Arc<dyn Acquire>,
    memory: Arc<MemoryCache>,
    disk: Arc<DiskCache>,
    cache: CacheConfig,
    idle_sleep: Duration,
    claim_ttl: Duration,
}

impl WorkerPool {
    pub fn new(
        config: &Config,
        acquire: Arc<dyn Acquire>,
        memory: Arc<MemoryCache>,
        disk: Arc<DiskCache>,
    ) -> Self {
        Self {
            acquire,
            memory,
            disk,
            cache: config.cache.clone(),
            idle_sleep: config.disk.idle_sleep(),
            claim_ttl: config.disk.claim_ttl(),
        }
    }

    /// Whether both tiers are full. Checked without holding both locks, so a
    /// concurrent worker may overshoot by one item.
    pub async fn should_idle(&self) -> bool {
        self.memory.is_full().await && self.disk.is_full().await
    }

    /// Fill memory (spilling to disk) up to the prefill target before serving.
    ///
    /// Stops at the first acquisition failure or when no cache accepts the
    /// item. Returns how many items were stored.
    pub async fn prefill(&self) -> usize {
        let target = self.cache.prefill_target.min(self.cache.max_size);
        log::info!("[prefill] filling memory cache to {} items", target);

        let mut stored = 0;
        while self.memory.len().await < target {
            let item = match self.acquire.fetch_one_valid().await {
                Ok(item) => item,
                Err(e) => {
                    log::warn!("[prefill] stopping early: {}", e);
                    break;
                }
            };
            match self.store(item).await {
                Step::StoredInMemory | Step::StoredOnDisk => stored += 1,
                _ => break,
            }
        }

        log::info!(
            "[prefill] done, memory_size={}, disk_size={}",
            self.memory.len().await,
            self.disk.len().await
        );
        stored
    }

    /// Start the configured number of workers. They run for the life of the
    /// process.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.cache.worker_count)
            .map(|worker| {
                let pool = Arc::clone(self);
                tokio::spawn(async move { pool.run_worker(worker).await })
            })
            .collect()
    }

    /// Worker loop. Never returns.
    pub async fn run_worker(&self, worker: usize) {
        log::info!("[cache] worker {} started", worker);
        loop {
            let step = match AssertUnwindSafe(self.step()).catch_unwind().await {
                Ok(step) => step,
                Err(_) => {
                    log::error!("[cache] worker {} iteration panicked", worker);
                    Step::Failed
                }
            };
            sleep(self.backoff(step)).await;
        }
    }

    /// One iteration: idle check, fetch, store.
    ///
    /// A full disk first gives back claims that were never downloaded.
    pub async fn step(&self) -> Step {
        if self.disk.is_full().await {
            self.disk.release_stale(self.claim_ttl).await;
        }
        if self.should_idle().await {
            return Step::Saturated;
        }
        if self.memory.is_full().await {
            return Step::MemoryFull;
        }

        match self.acquire.fetch_one_valid().await {
            Ok(item) => self.store(item).await,
            Err(e) => {
                log::debug!("[cache] worker fetch failed: {}", e);
                Step::Failed
            }
        }
    }

    /// Route an item to memory, or to disk when memory is full.
    pub async fn store(&self, item: Item) -> Step {
        let item = match self.memory.push(item).await {
            Ok(()) => {
                log::info!("[cache] added to memory, size={}", self.memory.len().await);
                return Step::StoredInMemory;
            }
            Err(item) => item,
        };

        if self.disk.save(&item).await {
            Step::StoredOnDisk
        } else {
            log::debug!("[cache] no room for id={}, dropped", item.id);
            Step::Dropped
        }
    }

    /// Sleep before the next iteration.
    pub fn backoff(&self, step: Step) -> Duration {
        match step {
            Step::Saturated => self.idle_sleep,
            Step::MemoryFull | Step::StoredInMemory | Step::StoredOnDisk => self.cache.delay_ok(),
            Step::Dropped | Step::Failed => self.cache.delay_fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::error::AcquireError;
    use crate::utils::testing::{ScriptedAcquire, sample_item};

    fn config(max_size: usize, prefill_target: usize) -> Config {
        let mut config = Config::default();
        config.cache.max_size = max_size;
        config.cache.prefill_target = prefill_target;
        config.cache.worker_count = 2;
        config
    }

    /// A disk tier that never accepts anything and never touches the filesystem.
    fn no_disk() -> Arc<DiskCache> {
        Arc::new(DiskCache::new("unused", 0))
    }

    fn pool(config: &Config, acquire: Arc<ScriptedAcquire>, disk: Arc<DiskCache>) -> WorkerPool {
        WorkerPool::new(
            config,
            acquire,
            Arc::new(MemoryCache::new(config.cache.max_size)),
            disk,
        )
    }

    #[tokio::test]
    async fn test_step_pushes_to_memory() {
        let config = config(2, 2);
        let acquire = Arc::new(ScriptedAcquire::always(sample_item("abc123")));
        let pool = pool(&config, acquire.clone(), no_disk());

        assert_eq!(pool.step().await, Step::StoredInMemory);
        assert_eq!(pool.memory.len().await, 1);
        assert_eq!(acquire.calls(), 1);
    }

    #[tokio::test]
    async fn test_saturated_caches_generate_no_traffic() {
        let config = config(1, 1);
        let acquire = Arc::new(ScriptedAcquire::always(sample_item("abc123")));
        let pool = pool(&config, acquire.clone(), no_disk());
        pool.memory.push(sample_item("filled")).await.unwrap();

        assert!(pool.should_idle().await);
        assert_eq!(pool.step().await, Step::Saturated);
        assert_eq!(acquire.calls(), 0);
    }

    #[tokio::test]
    async fn test_memory_full_waits_without_fetching() {
        let tmp = TempDir::new().unwrap();
        let disk = Arc::new(DiskCache::new(tmp.path(), 5));
        disk.init().await.unwrap();
        let config = config(1, 1);
        let acquire = Arc::new(ScriptedAcquire::always(sample_item("abc123")));
        let pool = pool(&config, acquire.clone(), disk);
        pool.memory.push(sample_item("filled")).await.unwrap();

        assert!(!pool.should_idle().await);
        assert_eq!(pool.step().await, Step::MemoryFull);
        assert_eq!(acquire.calls(), 0);
    }

    #[tokio::test]
    async fn test_full_disk_releases_unfetched_claims() {
        let tmp = TempDir::new().unwrap();
        let disk = Arc::new(DiskCache::new(tmp.path(), 1));
        disk.init().await.unwrap();
        assert!(disk.save(&sample_item("pinned")).await);
        disk.load_oldest().await.unwrap();

        let mut config = config(1, 1);
        config.disk.claim_ttl_secs = 0;
        let acquire = Arc::new(ScriptedAcquire::always(sample_item("abc123")));
        let pool = pool(&config, acquire.clone(), disk.clone());
        pool.memory.push(sample_item("filled")).await.unwrap();

        assert_eq!(pool.step().await, Step::MemoryFull);
        assert_eq!(disk.len().await, 0);
        assert!(!tmp.path().join("pinned.png").exists());
        assert_eq!(acquire.calls(), 0);
    }

    #[tokio::test]
    async fn test_store_spills_to_disk_when_memory_full() {
        let tmp = TempDir::new().unwrap();
        let disk = Arc::new(DiskCache::new(tmp.path(), 5));
        disk.init().await.unwrap();
        let config = config(1, 1);
        let pool = pool(&config, Arc::new(ScriptedAcquire::failing()), disk.clone());
        pool.memory.push(sample_item("filled")).await.unwrap();

        assert_eq!(pool.store(sample_item("late01")).await, Step::StoredOnDisk);
        assert_eq!(disk.len().await, 1);
        assert!(tmp.path().join("late01.json").exists());

        // Same id again is a duplicate on disk
        assert_eq!(pool.store(sample_item("late01")).await, Step::Dropped);
    }

    #[tokio::test]
    async fn test_failed_fetch_backs_off_longer() {
        let config = config(2, 2);
        let pool = pool(&config, Arc::new(ScriptedAcquire::failing()), no_disk());

        let step = pool.step().await;
        assert_eq!(step, Step::Failed);
        assert_eq!(pool.backoff(step), config.cache.delay_fail());
        assert_eq!(pool.backoff(Step::StoredInMemory), config.cache.delay_ok());
        assert_eq!(pool.backoff(Step::Saturated), config.disk.idle_sleep());
        assert!(config.cache.delay_fail() > config.cache.delay_ok());
    }

    #[tokio::test]
    async fn test_prefill_reaches_target() {
        let config = config(5, 3);
        let acquire = Arc::new(ScriptedAcquire::always(sample_item("abc123")));
        let pool = pool(&config, acquire.clone(), no_disk());

        assert_eq!(pool.prefill().await, 3);
        assert_eq!(pool.memory.len().await, 3);
        assert_eq!(acquire.calls(), 3);
    }

    #[tokio::test]
    async fn test_prefill_target_capped_by_memory_size() {
        let config = config(2, 10);
        let acquire = Arc::new(ScriptedAcquire::always(sample_item("abc123")));
        let pool = pool(&config, acquire.clone(), no_disk());

        assert_eq!(pool.prefill().await, 2);
        assert_eq!(acquire.calls(), 2);
    }

    #[tokio::test]
    async fn test_prefill_stops_at_first_failure() {
        let config = config(5, 5);
        let acquire = Arc::new(ScriptedAcquire::sequence(vec![
            Ok(sample_item("first1")),
            Ok(sample_item("second")),
            Err(AcquireError::Exhausted { attempts: 5 }),
            Ok(sample_item("never1")),
        ]));
        let pool = pool(&config, acquire.clone(), no_disk());

        assert_eq!(pool.prefill().await, 2);
        assert_eq!(pool.memory.len().await, 2);
        assert_eq!(acquire.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_workers_stop_fetching_once_memory_full() {
        let config = config(3, 3);
        let acquire = Arc::new(ScriptedAcquire::always(sample_item("abc123")));
        let pool = Arc::new(pool(&config, acquire.clone(), no_disk()));

        let handles = pool.spawn();
        assert_eq!(handles.len(), 2);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(pool.memory.len().await, 3);
        let calls = acquire.calls();
        assert!((3..=4).contains(&calls), "calls = {calls}");

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(acquire.calls(), calls);

        // Draining memory wakes the workers up again
        pool.memory.pop().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(pool.memory.len().await, 3);

        for handle in handles {
            handle.abort();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_survives_failures() {
        let config = config(2, 2);
        let acquire = Arc::new(ScriptedAcquire::sequence(vec![
            Err(AcquireError::transient("status 404")),
            Err(AcquireError::banned("status 429")),
            Err(AcquireError::Exhausted { attempts: 5 }),
            Ok(sample_item("finally")),
        ]));
        let pool = Arc::new(pool(&config, acquire.clone(), no_disk()));

        let worker = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.run_worker(0).await })
        };
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(pool.memory.pop().await.unwrap().id, "finally");
        assert!(!worker.is_finished());
        worker.abort();
    }
}
