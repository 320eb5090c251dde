//! On-disk metadata store shared by several processes.
//!
//! The whole state is one bincode file. Each operation takes an exclusive
//! `flock` on a lock file next to it, reloads the state, and on a successful
//! write replaces the file through a temporary file and rename, so readers
//! never observe a torn write.
//!
//! The lock lives on the open descriptor: the kernel drops it when the
//! holder closes the file or dies, so a crashed process never leaves the
//! store locked. The lock file itself stays on disk.
//!
//! All of this is blocking I/O. Async callers go through
//! `tokio::task::spawn_blocking`.

use crate::core::error::{PlaneError, PlaneResult};
use crate::store::state::StoreState;
use crate::store::StateBackend;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(5);
const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// File-backed metadata store.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
    tmp_path: PathBuf,
    /// Serializes operations within this process.
    local: Mutex<()>,
}

impl FileStore {
    /// Open (or create) a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> PlaneResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PlaneError::unavailable(format!(
                        "failed to create store directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        let store = Self {
            lock_path: with_suffix(&path, "lock"),
            tmp_path: with_suffix(&path, "tmp"),
            path,
            local: Mutex::new(()),
        };
        // Materialize the file so that concurrent openers agree on the seed state.
        store.with_write(|_| Ok(()))?;
        tracing::debug!(path = %store.path.display(), "opened file store");
        Ok(store)
    }

    /// Path of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> PlaneResult<StoreState> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StoreState::new()),
            Err(e) => return Err(io_error("open", &self.path, e)),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| io_error("read", &self.path, e))?;
        if bytes.is_empty() {
            return Ok(StoreState::new());
        }
        bincode::deserialize(&bytes).map_err(|e| {
            PlaneError::unavailable(format!(
                "failed to decode store file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn save(&self, state: &StoreState) -> PlaneResult<()> {
        let bytes = bincode::serialize(state)
            .map_err(|e| PlaneError::internal(format!("failed to encode store state: {}", e)))?;
        let mut file = File::create(&self.tmp_path)
            .map_err(|e| io_error("create", &self.tmp_path, e))?;
        file.write_all(&bytes)
            .map_err(|e| io_error("write", &self.tmp_path, e))?;
        file.sync_all()
            .map_err(|e| io_error("sync", &self.tmp_path, e))?;
        std::fs::rename(&self.tmp_path, &self.path)
            .map_err(|e| io_error("rename", &self.path, e))
    }

    fn lock(&self) -> PlaneResult<StoreLock> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| io_error("open", &self.lock_path, e))?;

        let started = Instant::now();
        loop {
            match try_flock_exclusive(&file) {
                Ok(true) => return Ok(StoreLock { _file: file }),
                Ok(false) if started.elapsed() < LOCK_ACQUIRE_TIMEOUT => {
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Ok(false) => {
                    return Err(PlaneError::unavailable(format!(
                        "timed out waiting for store lock {}",
                        self.lock_path.display()
                    )))
                }
                Err(e) => return Err(io_error("lock", &self.lock_path, e)),
            }
        }
    }
}

impl StateBackend for FileStore {
    fn with_read<R>(&self, f: impl FnOnce(&StoreState) -> PlaneResult<R>) -> PlaneResult<R> {
        let _local = self.local.lock();
        let _lock = self.lock()?;
        let state = self.load()?;
        f(&state)
    }

    fn with_write<R>(&self, f: impl FnOnce(&mut StoreState) -> PlaneResult<R>) -> PlaneResult<R> {
        let _local = self.local.lock();
        let _lock = self.lock()?;
        let mut state = self.load()?;
        let result = f(&mut state)?;
        self.save(&state)?;
        Ok(result)
    }
}

/// Exclusive hold on the store. Closing the descriptor releases the lock.
struct StoreLock {
    _file: File,
}

/// Try to take an exclusive `flock` without blocking.
///
/// Returns `Ok(false)` if another descriptor holds the lock.
#[cfg(unix)]
fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the descriptor is owned by `file` and open for the duration
    // of the call.
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Ok(false);
    }
    Err(err)
}

#[cfg(not(unix))]
fn try_flock_exclusive(_file: &File) -> io::Result<bool> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "file store locking requires flock",
    ))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn io_error(op: &str, path: &Path, e: io::Error) -> PlaneError {
    PlaneError::unavailable(format!("failed to {} {}: {}", op, path.display(), e))
}
