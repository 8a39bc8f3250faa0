//! Durable JSON state files (installation record, setup config).
//!
//! Goals:
//! - Readers never observe a half-written file (write to temp + rename)
//! - Read-modify-write is atomic across tasks (async mutex) and processes (lock file)
//! - Stale lock files left by a crashed process are broken after `STALE_LOCK_AFTER`, and a
//!   waiter keeps trying until past that point
//! - Never fail silently (log with context)

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::utils::path_resolver::lock_path_for;

const STALE_LOCK_AFTER: Duration = Duration::from_secs(30);
/// Extra time a waiter allows beyond `STALE_LOCK_AFTER` before giving up on the lock.
const LOCK_WAIT_GRACE: Duration = Duration::from_secs(15);

/// Result of an `update` closure: whether the mutated value must be written back.
#[derive(Debug)]
pub enum Outcome<R> {
    Commit(R),
    Skip(R),
}

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    stale_after: Duration,
    guard: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = lock_path_for(&path);
        Self {
            path,
            lock_path,
            stale_after: STALE_LOCK_AFTER,
            guard: Mutex::new(()),
        }
    }

    #[cfg(test)]
    fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw JSON contents, `None` when the file does not exist.
    pub async fn read_value(&self) -> Result<Option<Value>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("Failed to read state file: {:?}", self.path))
            }
        };
        let value = serde_json::from_str(&text)
            .with_context(|| format!("State file is not valid JSON: {:?}", self.path))?;
        Ok(Some(value))
    }

    pub async fn read<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.read_value().await? {
            Some(v) => Ok(Some(serde_json::from_value(v).with_context(|| {
                format!("State file has an unexpected shape: {:?}", self.path)
            })?)),
            None => Ok(None),
        }
    }

    /// Replace the file wholesale (no merge).
    pub async fn write<T: Serialize>(&self, value: &T) -> Result<()> {
        let _local = self.guard.lock().await;
        let _lock = FileLock::acquire(&self.lock_path, self.stale_after).await?;
        write_atomic(&self.path, value).await
    }

    /// Atomic read-modify-write.
    ///
    /// A missing or unparseable file starts from `T::default()`; the closure decides whether
    /// the result is committed.
    pub async fn update<T, R, F>(&self, f: F) -> Result<R>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T) -> Outcome<R>,
    {
        let started = Instant::now();
        let _local = self.guard.lock().await;
        let _lock = FileLock::acquire(&self.lock_path, self.stale_after).await?;

        let mut current: T = match self.read::<T>().await {
            Ok(Some(v)) => v,
            Ok(None) => T::default(),
            Err(e) => {
                warn!(
                    "[PHASE: state] [STEP: update] Discarding unreadable state file {:?}: {:#}",
                    self.path, e
                );
                T::default()
            }
        };

        let result = match f(&mut current) {
            Outcome::Commit(r) => {
                write_atomic(&self.path, &current).await?;
                r
            }
            Outcome::Skip(r) => r,
        };

        debug!(
            "[PHASE: state] [STEP: update] update finished (file={:?}, duration_ms={})",
            self.path,
            started.elapsed().as_millis()
        );
        Ok(result)
    }
}

async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).context("Failed to serialize state")?;
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<()> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)
            .with_context(|| format!("Failed to create state directory: {:?}", parent))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)
            .with_context(|| format!("Failed to create temp file in {:?}", parent))?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .map_err(|e| anyhow::Error::new(e.error))
            .with_context(|| format!("Failed to replace state file: {:?}", path))?;
        Ok(())
    })
    .await
    .context("State write task failed")?
}

/// Cross-process advisory lock: a sibling file created with create-new semantics. The file holds
/// an owner tag (`pid:nonce`) so a lock is only ever removed by the waiter that judged it stale
/// or by its owner.
#[derive(Debug)]
struct FileLock {
    path: PathBuf,
    owner: String,
}

impl FileLock {
    /// Waits past `stale_after`, so a lock abandoned by a crashed process is always broken
    /// before this gives up.
    async fn acquire(path: &Path, stale_after: Duration) -> Result<Self> {
        let retry_strategy = ExponentialBackoff::from_millis(10)
            .factor(2)
            .max_delay(Duration::from_millis(200))
            .map(jitter);

        let owner = format!("{}:{}", std::process::id(), uuid::Uuid::new_v4().simple());
        let owned = path.to_path_buf();
        let attempt = RetryIf::spawn(
            retry_strategy,
            || try_create_lock(owned.clone(), owner.clone(), stale_after),
            |e: &std::io::Error| e.kind() == ErrorKind::AlreadyExists,
        );

        match timeout(stale_after + LOCK_WAIT_GRACE, attempt).await {
            Ok(created) => {
                created.with_context(|| format!("Failed to create state lock: {:?}", path))?
            }
            Err(_) => anyhow::bail!("Timed out waiting for state lock: {:?}", path),
        }

        Ok(Self {
            path: path.to_path_buf(),
            owner,
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        match std::fs::read_to_string(&self.path) {
            Ok(tag) if tag == self.owner => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    warn!(
                        "[PHASE: state] [STEP: unlock] Failed to remove lock file {:?}: {}",
                        self.path, e
                    );
                }
            }
            Ok(_) => warn!(
                "[PHASE: state] [STEP: unlock] Lock file {:?} was taken over while held",
                self.path
            ),
            Err(e) => warn!(
                "[PHASE: state] [STEP: unlock] Lock file {:?} missing on release: {}",
                self.path, e
            ),
        }
    }
}

async fn try_create_lock(path: PathBuf, owner: String, stale_after: Duration) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut opts = tokio::fs::OpenOptions::new();
    opts.write(true).create_new(true);
    match opts.open(&path).await {
        Ok(mut file) => {
            use tokio::io::AsyncWriteExt;
            file.write_all(owner.as_bytes()).await?;
            file.flush().await?;
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            if let Some(stale_owner) = stale_lock_owner(&path, stale_after).await {
                warn!(
                    "[PHASE: state] [STEP: lock] Breaking stale lock file {:?} (owner {})",
                    path, stale_owner
                );
                if let Err(err) = break_stale_lock(&path, &stale_owner).await {
                    debug!(
                        "[PHASE: state] [STEP: lock] Stale lock {:?} already handled: {}",
                        path, err
                    );
                }
            }
            Err(e)
        }
        Err(e) => Err(e),
    }
}

/// Owner tag of the lock at `path` if it is older than `stale_after`.
async fn stale_lock_owner(path: &Path, stale_after: Duration) -> Option<String> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    let age = SystemTime::now().duration_since(meta.modified().ok()?).ok()?;
    if age <= stale_after {
        return None;
    }
    tokio::fs::read_to_string(path).await.ok()
}

/// Move the lock aside, then confirm it is still the one judged stale. The rename is atomic,
/// so two waiters cannot both claim the same file; a lock re-created in between is put back.
async fn break_stale_lock(path: &Path, stale_owner: &str) -> std::io::Result<()> {
    let mut aside = path.as_os_str().to_owned();
    aside.push(format!(".stale-{}", uuid::Uuid::new_v4().simple()));
    let aside = PathBuf::from(aside);

    tokio::fs::rename(path, &aside).await?;
    let claimed = tokio::fs::read_to_string(&aside).await.unwrap_or_default();
    if claimed != stale_owner {
        warn!(
            "[PHASE: state] [STEP: lock] Lock {:?} changed owner before it was broken, restoring",
            path
        );
        if let Err(e) = tokio::fs::hard_link(&aside, path).await {
            warn!(
                "[PHASE: state] [STEP: lock] Could not restore lock {:?}: {}",
                path, e
            );
        }
    }
    tokio::fs::remove_file(&aside).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Counter {
        value: u32,
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path().join("absent.json"));
        assert!(store.read_value().await.expect("read").is_none());
    }

    #[tokio::test]
    async fn write_replaces_and_releases_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state").join("counter.json");
        let store = JsonFileStore::new(&path);

        store.write(&Counter { value: 7 }).await.expect("write");
        let back: Counter = store.read().await.expect("read").expect("present");
        assert_eq!(back, Counter { value: 7 });
        assert!(!lock_path_for(&path).exists(), "lock file must be released");
    }

    #[tokio::test]
    async fn update_skip_does_not_create_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path().join("counter.json"));

        let seen = store
            .update(|c: &mut Counter| Outcome::Skip(c.value))
            .await
            .expect("update");
        assert_eq!(seen, 0);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn update_treats_corrupt_file_as_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("counter.json");
        std::fs::write(&path, "{not json").expect("seed");
        let store = JsonFileStore::new(&path);

        assert!(store.read_value().await.is_err());
        store
            .update(|c: &mut Counter| {
                c.value += 1;
                Outcome::Commit(())
            })
            .await
            .expect("update");
        let back: Counter = store.read().await.expect("read").expect("present");
        assert_eq!(back.value, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_are_serialized_across_store_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("counter.json");

        // Separate instances share only the lock file, like separate processes would.
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::new(JsonFileStore::new(&path));
            handles.push(tokio::spawn(async move {
                for _ in 0..5 {
                    store
                        .update(|c: &mut Counter| {
                            c.value += 1;
                            Outcome::Commit(())
                        })
                        .await
                        .expect("update");
                }
            }));
        }
        for h in handles {
            h.await.expect("join");
        }

        let store = JsonFileStore::new(&path);
        let back: Counter = store.read().await.expect("read").expect("present");
        assert_eq!(back.value, 40);
    }

    #[tokio::test]
    async fn stale_lock_is_broken() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("counter.json");
        let lock = lock_path_for(&path);
        std::fs::write(&lock, "99999").expect("seed lock");
        let old = SystemTime::now() - Duration::from_secs(120);
        std::fs::File::options()
            .write(true)
            .open(&lock)
            .and_then(|f| f.set_modified(old))
            .expect("age lock");

        let store = JsonFileStore::new(&path);
        store.write(&Counter { value: 1 }).await.expect("write");
        assert!(!lock.exists());
    }

    #[tokio::test]
    async fn waiter_outlasts_a_fresh_abandoned_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("counter.json");
        let lock = lock_path_for(&path);
        std::fs::write(&lock, "99999:crashed").expect("seed lock");

        let store = JsonFileStore::new(&path).with_stale_after(Duration::from_millis(400));
        let started = Instant::now();
        store.write(&Counter { value: 3 }).await.expect("write after lock goes stale");

        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(!lock.exists());
        let back: Counter = store.read().await.expect("read").expect("present");
        assert_eq!(back.value, 3);
    }

    #[tokio::test]
    async fn breaking_restores_a_lock_recreated_in_between() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = dir.path().join("counter.json.lock");
        std::fs::write(&lock, "4242:fresh-owner").expect("seed lock");

        break_stale_lock(&lock, "99999:crashed")
            .await
            .expect("break attempt");

        assert_eq!(
            std::fs::read_to_string(&lock).expect("lock restored"),
            "4242:fresh-owner"
        );
        let leftovers = std::fs::read_dir(dir.path()).expect("dir").count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn release_leaves_a_lock_owned_by_someone_else() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock_path = dir.path().join("counter.json.lock");

        let lock = FileLock::acquire(&lock_path, STALE_LOCK_AFTER)
            .await
            .expect("acquire");
        std::fs::write(&lock_path, "4242:new-owner").expect("take over");
        drop(lock);

        assert!(lock_path.exists());
    }
}
