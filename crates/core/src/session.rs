//! Per-job resources: pool slots and workspace directories.
//!
//! A job holds a [`PoolSlot`] and a [`Workspace`] for its whole life. Both are
//! released on drop, so every exit path (success, error, cancellation,
//! panic) gives the slot back and removes the job's files.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::SubmitError;
use crate::job::JobId;

/// Bounded set of concurrent job slots. Admission never waits.
#[derive(Debug, Clone)]
pub struct JobPool {
    slots: Arc<Semaphore>,
    capacity: usize,
}

/// A claimed slot; dropping it frees the slot.
#[derive(Debug)]
pub struct PoolSlot {
    _permit: OwnedSemaphorePermit,
}

impl JobPool {
    /// Pool with `capacity` slots, at least one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Claim a slot or fail immediately.
    pub fn try_admit(&self) -> Result<PoolSlot, SubmitError> {
        match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => Ok(PoolSlot { _permit: permit }),
            Err(_) => Err(SubmitError::PoolFull {
                capacity: self.capacity,
            }),
        }
    }
}

/// A job's private directory, `<root>/<job id>`.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    removed: bool,
}

impl Workspace {
    /// Create the directory. Fails if it already exists.
    pub async fn create(root: &Path, id: &JobId) -> io::Result<Self> {
        fs::create_dir_all(root).await?;
        let path = root.join(id.to_string());
        fs::create_dir(&path).await?;
        debug!("created workspace {}", path.display());
        Ok(Self {
            path,
            removed: false,
        })
    }

    /// The workspace directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of an artifact inside the workspace.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Delete the directory and everything in it.
    pub async fn close(mut self) -> io::Result<()> {
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        self.removed = true;
        debug!("removed workspace {}", self.path.display());
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove workspace {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Move a file, copying across filesystems when a rename is not possible.
pub async fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }
    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            debug!(
                "cross-device rename, copying instead: {} -> {}",
                src.display(),
                dst.display()
            );
            let tmp = dst.with_extension("part");
            fs::copy(src, &tmp).await?;
            fs::rename(&tmp, dst).await?;
            fs::remove_file(src).await
        }
        Err(e) => Err(e),
    }
}

/// True for a rename across filesystems.
fn is_cross_device(e: &io::Error) -> bool {
    // EXDEV on Linux and macOS
    e.raw_os_error() == Some(18)
}
