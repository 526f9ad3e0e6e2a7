//! Local filesystem overflow cache.
//!
//! Items that do not fit in memory are persisted as a data file plus a JSON
//! metadata file. The metadata is the "ready to serve" marker: it exists only
//! while the data file exists and has not been claimed.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── abc123.png            # Image bytes, extension from content type
//! ├── abc123.json           # DiskMeta for abc123.png
//! ├── k9x0qa.jpg
//! └── k9x0qa.json
//! ```
//!
//! Both files are written through a temp file and a rename, data first, so a
//! crash leaves at most an orphan that `init` removes on the next start.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{DiskItem, DiskMeta, Item};
use crate::storage::{ServingEntry, ServingRegistry};

const META_SUFFIX: &str = ".json";
const TMP_SUFFIX: &str = ".tmp";

/// Disk-backed FIFO of overflowed items.
#[derive(Debug)]
pub struct DiskCache {
    root_dir: PathBuf,
    max_items: usize,
    /// Live pair count; the lock also serializes every directory mutation
    count: Mutex<usize>,
    registry: ServingRegistry,
}

impl DiskCache {
    /// Create a disk cache rooted at the given directory. Call `init` before use.
    pub fn new(root_dir: impl Into<PathBuf>, max_items: usize) -> Self {
        Self {
            root_dir: root_dir.into(),
            max_items,
            count: Mutex::new(0),
            registry: ServingRegistry::new(),
        }
    }

    pub fn registry(&self) -> &ServingRegistry {
        &self.registry
    }

    /// Get the full path for a file name inside the cache directory.
    pub fn path(&self, file_name: &str) -> PathBuf {
        self.root_dir.join(file_name)
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.path(&format!("{id}{META_SUFFIX}"))
    }

    /// Create the directory and reconcile whatever a previous run left behind.
    ///
    /// Unparsable metadata and metadata without its data file are deleted,
    /// then every data file without valid metadata. Returns the live count.
    pub async fn init(&self) -> Result<usize> {
        tokio::fs::create_dir_all(&self.root_dir).await?;
        let mut count = self.count.lock().await;

        let mut valid_files = HashSet::new();
        for meta_path in self.list_files(|name| name.ends_with(META_SUFFIX)).await? {
            let meta = match read_meta(&meta_path).await {
                Ok(meta) => meta,
                Err(e) => {
                    log::warn!("[disk] dropping unreadable {:?}: {}", meta_path, e);
                    remove_if_exists(&meta_path).await?;
                    continue;
                }
            };
            let file_name = meta.data_file_name();
            if tokio::fs::try_exists(self.path(&file_name)).await? {
                valid_files.insert(file_name);
            } else {
                log::warn!("[disk] dropping {:?}: data file missing", meta_path);
                remove_if_exists(&meta_path).await?;
            }
        }

        let orphans = self
            .list_files(|name| !name.ends_with(META_SUFFIX) && !valid_files.contains(name))
            .await?;
        for orphan in &orphans {
            remove_if_exists(orphan).await?;
        }

        *count = valid_files.len();
        log::info!(
            "[disk] ready at {:?}: {} items, {} orphans removed",
            self.root_dir,
            *count,
            orphans.len()
        );
        Ok(*count)
    }

    /// Live item count, including claimed files not yet marked served.
    pub async fn len(&self) -> usize {
        *self.count.lock().await
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_full(&self) -> bool {
        self.len().await >= self.max_items
    }

    /// Persist an item. Returns `false` when the cache is full, files for the id
    /// already exist, or the write failed (partial files are removed).
    pub async fn save(&self, item: &Item) -> bool {
        let mut count = self.count.lock().await;
        if *count >= self.max_items {
            return false;
        }

        let file_name = item.disk_file_name();
        let data_path = self.path(&file_name);
        let meta_path = self.meta_path(&item.id);
        match (
            tokio::fs::try_exists(&data_path).await,
            tokio::fs::try_exists(&meta_path).await,
        ) {
            (Ok(false), Ok(false)) => {}
            (Ok(_), Ok(_)) => {
                log::debug!("[disk] duplicate id={}, skipping", item.id);
                return false;
            }
            (Err(e), _) | (_, Err(e)) => {
                log::warn!("[disk] cannot check files for id={}: {}", item.id, e);
                return false;
            }
        }

        let written = async {
            write_atomic(&data_path, &item.image_bytes).await?;
            write_json(&meta_path, &DiskMeta::for_item(item)).await
        }
        .await;

        match written {
            Ok(()) => {
                *count += 1;
                log::info!("[disk] stored id={}, disk_size={}", item.id, *count);
                true
            }
            Err(e) => {
                log::error!("[disk] failed to store id={}: {}", item.id, e);
                let _ = remove_if_exists(&data_path).await;
                let _ = remove_if_exists(&meta_path).await;
                false
            }
        }
    }

    /// Claim the least recently saved item for serving.
    ///
    /// The metadata is deleted before returning, so no two callers get the same
    /// entry, and the data file is registered in the serving registry. Order
    /// follows file modification time and is only approximately FIFO.
    pub async fn load_oldest(&self) -> Option<DiskItem> {
        let mut count = self.count.lock().await;

        let candidates = match self.metas_by_age().await {
            Ok(candidates) => candidates,
            Err(e) => {
                log::error!("[disk] failed to list {:?}: {}", self.root_dir, e);
                return None;
            }
        };

        for meta_path in candidates {
            let meta = match read_meta(&meta_path).await {
                Ok(meta) => meta,
                Err(e) => {
                    log::warn!("[disk] failed to parse {:?}: {}", meta_path, e);
                    let _ = remove_if_exists(&meta_path).await;
                    self.remove_unclaimed_data(&meta_path).await;
                    *count = count.saturating_sub(1);
                    continue;
                }
            };

            let file_name = meta.data_file_name();
            let data_path = self.path(&file_name);
            if !matches!(tokio::fs::try_exists(&data_path).await, Ok(true)) {
                log::warn!("[disk] missing file for id={}, removing meta", meta.id);
                let _ = remove_if_exists(&meta_path).await;
                *count = count.saturating_sub(1);
                continue;
            }

            if let Err(e) = remove_if_exists(&meta_path).await {
                log::error!("[disk] cannot claim id={}: {}", meta.id, e);
                continue;
            }

            self.registry
                .register(
                    &file_name,
                    ServingEntry {
                        path: data_path,
                        content_type: meta.content_type.clone(),
                    },
                )
                .await;
            log::info!(
                "[disk] queued for serving id={}, disk_size={}",
                meta.id,
                *count
            );
            return Some(meta.into_disk_item());
        }

        None
    }

    /// Finish a claimed file: forget it, delete it, and free its slot.
    ///
    /// Must be called exactly once per claimed file, after transmission ended
    /// for any reason.
    pub async fn mark_served(&self, file_name: &str) {
        self.registry.take(file_name).await;
        self.release(file_name).await;
        log::debug!("[disk] served {}", file_name);
    }

    /// Release claims nobody came to download within `max_age`.
    ///
    /// Entries already taken by the transport are out of the registry, so a
    /// file being streamed is never released here. Returns how many were freed.
    pub async fn release_stale(&self, max_age: Duration) -> usize {
        let stale = self.registry.take_older_than(max_age).await;
        for file_name in &stale {
            self.release(file_name).await;
        }
        if !stale.is_empty() {
            log::info!("[disk] released {} unfetched claims", stale.len());
        }
        stale.len()
    }

    async fn release(&self, file_name: &str) {
        let mut count = self.count.lock().await;
        if let Err(e) = remove_if_exists(&self.path(file_name)).await {
            log::error!("[disk] failed to delete served {}: {}", file_name, e);
        }
        *count = count.saturating_sub(1);
    }

    /// Delete the data files sharing a stem with an unreadable metadata file.
    /// Files claimed for serving are left to `mark_served`.
    async fn remove_unclaimed_data(&self, meta_path: &Path) {
        let Some(stem) = meta_path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            return;
        };
        let prefix = format!("{stem}.");
        let siblings = match self
            .list_files(|name| name.starts_with(&prefix) && !name.ends_with(META_SUFFIX))
            .await
        {
            Ok(siblings) => siblings,
            Err(e) => {
                log::error!("[disk] failed to list data for {}: {}", stem, e);
                return;
            }
        };
        for path in siblings {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if self.registry.contains(&name).await {
                continue;
            }
            if let Err(e) = remove_if_exists(&path).await {
                log::error!("[disk] failed to delete {:?}: {}", path, e);
            }
        }
    }

    /// Metadata files sorted oldest first.
    async fn metas_by_age(&self) -> Result<Vec<PathBuf>> {
        let mut aged = Vec::new();
        for path in self.list_files(|name| name.ends_with(META_SUFFIX)).await? {
            let modified = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(AppError::Io(e)),
            };
            aged.push((modified, path));
        }
        aged.sort();
        Ok(aged.into_iter().map(|(_, path)| path).collect())
    }

    /// Regular files in the cache directory whose names pass `keep`.
    async fn list_files(&self, keep: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if keep(&name.to_string_lossy()) {
                files.push(entry.path());
            }
        }
        Ok(files)
    }
}

/// Write bytes atomically (write to temp, then rename).
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TMP_SUFFIX);
    let tmp = PathBuf::from(tmp);

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = remove_if_exists(&tmp).await;
        return Err(AppError::Io(e));
    }
    Ok(())
}

/// Write JSON data.
async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    write_atomic(path, &bytes).await
}

async fn read_meta(path: &Path) -> Result<DiskMeta> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AppError::storage(path.display().to_string(), e)),
    }
}
