//! Persistence adapter for the queue snapshot.
//!
//! The delivery queue only ever needs to read and write one opaque string
//! blob by key. [`SnapshotStore`] abstracts that so production code can keep
//! the blob on disk while tests use an in-memory store with injectable
//! failures.

use std::{
    future::Future,
    path::{Path, PathBuf},
    pin::Pin,
};

use crate::error::{DeliveryError, Result};

/// Durable key to string store used for the queue snapshot.
///
/// `read` returns the last value written under the key, or `None` when the
/// key was never written. A `write` must be complete when its future
/// resolves.
pub trait SnapshotStore: Send + Sync + std::fmt::Debug + 'static {
    /// Reads the blob stored under `key`.
    fn read(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + '_>>;

    /// Replaces the blob stored under `key`.
    fn write(
        &self,
        key: &str,
        blob: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Snapshot store keeping one file per key inside a directory.
///
/// Writes go to a temporary sibling file which is then renamed over the
/// target, so a crash mid-write leaves the previous snapshot readable.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    /// Creates a store rooted at `dir`. The directory is created on first
    /// write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the snapshot files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `key`.
    ///
    /// Characters outside `[A-Za-z0-9._-]` are replaced so a key can never
    /// escape the store directory.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let file_name = if file_name.trim_matches('.').is_empty() {
            format!("_{file_name}")
        } else {
            file_name
        };
        self.dir.join(format!("{file_name}.json"))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn read(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + '_>> {
        let path = self.path_for(key);
        Box::pin(async move {
            match tokio::fs::read_to_string(&path).await {
                Ok(blob) => Ok(Some(blob)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(DeliveryError::persistence(format!(
                    "failed to read {}: {e}",
                    path.display()
                ))),
            }
        })
    }

    fn write(
        &self,
        key: &str,
        blob: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let path = self.path_for(key);
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
                DeliveryError::persistence(format!(
                    "failed to create {}: {e}",
                    self.dir.display()
                ))
            })?;

            let tmp = path.with_extension("json.tmp");
            tokio::fs::write(&tmp, blob.as_bytes()).await.map_err(|e| {
                DeliveryError::persistence(format!("failed to write {}: {e}", tmp.display()))
            })?;
            tokio::fs::rename(&tmp, &path).await.map_err(|e| {
                DeliveryError::persistence(format!("failed to replace {}: {e}", path.display()))
            })?;

            tracing::trace!(path = %path.display(), bytes = blob.len(), "snapshot written");
            Ok(())
        })
    }
}

/// In-memory snapshot store for tests.
pub mod mock {
    use std::{
        collections::HashMap,
        future::Future,
        pin::Pin,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use parking_lot::Mutex;

    use super::SnapshotStore;
    use crate::error::{DeliveryError, Result};

    /// Snapshot store holding blobs in memory.
    ///
    /// Clones share the same contents, so a test can hand one clone to a
    /// queue, drop the queue, and restore a fresh queue from another clone
    /// to simulate a process restart.
    #[derive(Debug, Clone, Default)]
    pub struct MemorySnapshotStore {
        blobs: Arc<Mutex<HashMap<String, String>>>,
        fail_reads: Arc<Mutex<Option<String>>>,
        fail_writes: Arc<Mutex<Option<String>>>,
        write_count: Arc<AtomicUsize>,
    }

    impl MemorySnapshotStore {
        /// Creates an empty store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Seeds a blob as if it had been written by an earlier process.
        pub fn insert(&self, key: impl Into<String>, blob: impl Into<String>) {
            self.blobs.lock().insert(key.into(), blob.into());
        }

        /// Current blob under `key`.
        pub fn get(&self, key: &str) -> Option<String> {
            self.blobs.lock().get(key).cloned()
        }

        /// Makes every read fail with `message` until cleared.
        pub fn fail_reads(&self, message: impl Into<String>) {
            *self.fail_reads.lock() = Some(message.into());
        }

        /// Makes every write fail with `message` until cleared.
        pub fn fail_writes(&self, message: impl Into<String>) {
            *self.fail_writes.lock() = Some(message.into());
        }

        /// Clears injected read and write failures.
        pub fn heal(&self) {
            *self.fail_reads.lock() = None;
            *self.fail_writes.lock() = None;
        }

        /// Number of successful writes so far.
        pub fn write_count(&self) -> usize {
            self.write_count.load(Ordering::SeqCst)
        }
    }

    impl SnapshotStore for MemorySnapshotStore {
        fn read(
            &self,
            key: &str,
        ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + '_>> {
            let result = match self.fail_reads.lock().clone() {
                Some(message) => Err(DeliveryError::persistence(message)),
                None => Ok(self.blobs.lock().get(key).cloned()),
            };
            Box::pin(async move { result })
        }

        fn write(
            &self,
            key: &str,
            blob: String,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let result = match self.fail_writes.lock().clone() {
                Some(message) => Err(DeliveryError::persistence(message)),
                None => {
                    self.blobs.lock().insert(key.to_string(), blob);
                    self.write_count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            };
            Box::pin(async move { result })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{mock::MemorySnapshotStore, *};

    #[tokio::test]
    async fn file_store_reads_back_what_it_wrote() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("nested"));

        assert_eq!(store.read("beacon.queue").await.unwrap(), None);

        store.write("beacon.queue", "first".to_string()).await.unwrap();
        store.write("beacon.queue", "second".to_string()).await.unwrap();

        assert_eq!(store.read("beacon.queue").await.unwrap().as_deref(), Some("second"));
        assert!(!store.path_for("beacon.queue").with_extension("json.tmp").exists());
    }

    #[test]
    fn file_store_keys_cannot_escape_directory() {
        let store = FileSnapshotStore::new("/var/lib/beacon");

        let path = store.path_for("../../etc/passwd");
        assert_eq!(path.parent(), Some(Path::new("/var/lib/beacon")));

        let path = store.path_for("..");
        assert_eq!(path.parent(), Some(Path::new("/var/lib/beacon")));
    }

    #[tokio::test]
    async fn memory_store_clones_share_contents() {
        let store = MemorySnapshotStore::new();
        let other = store.clone();

        store.write("k", "v".to_string()).await.unwrap();

        assert_eq!(other.read("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(other.write_count(), 1);
    }

    #[tokio::test]
    async fn memory_store_injects_failures() {
        let store = MemorySnapshotStore::new();
        store.fail_writes("disk full");
        store.fail_reads("corrupt");

        assert!(matches!(
            store.write("k", "v".to_string()).await,
            Err(DeliveryError::PersistenceError { .. })
        ));
        assert!(store.read("k").await.is_err());
        assert_eq!(store.write_count(), 0);

        store.heal();
        store.write("k", "v".to_string()).await.unwrap();
        assert_eq!(store.get("k").as_deref(), Some("v"));
    }
}
