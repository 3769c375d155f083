//! Per-job scratch directories.
//!
//! Every job gets `<root>/job_<id>`, owned by exactly one [`Workspace`]
//! handle. The directory is removed when the handle is released or dropped,
//! so early returns, cancellation and panics all clean up.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

use vfactory_models::JobId;

const DIR_PREFIX: &str = "job_";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Job id cannot be used as a directory name: {0}")]
    InvalidJobId(JobId),

    #[error("Workspace for job {0} is already acquired")]
    AlreadyAcquired(JobId),

    #[error("Workspace IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl WorkspaceError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

type ActiveSet = Arc<Mutex<HashSet<String>>>;

/// Hands out per-job workspaces below one root directory.
///
/// Collision detection is per manager: clones share the active set, but two
/// managers created separately over the same root do not see each other's
/// workspaces. A process should build one manager per root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    active: ActiveSet,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create an empty directory owned by `job_id`.
    ///
    /// Fails if another handle for the same id is alive. A directory left
    /// behind by a crashed run is wiped, never reused.
    pub async fn acquire(&self, job_id: &JobId) -> Result<Workspace, WorkspaceError> {
        if !job_id.is_path_safe() {
            return Err(WorkspaceError::InvalidJobId(job_id.clone()));
        }
        if !register(&self.active, job_id.as_str()) {
            return Err(WorkspaceError::AlreadyAcquired(job_id.clone()));
        }

        // From here on the handle owns the id; dropping it on an error path
        // unregisters the id and removes whatever was created.
        let mut workspace = Workspace {
            path: self.root.join(format!("{}{}", DIR_PREFIX, job_id)),
            job_id: job_id.clone(),
            active: Arc::clone(&self.active),
            released: false,
        };

        match fs::remove_dir_all(&workspace.path).await {
            Ok(()) => warn!(
                job_id = %job_id,
                path = %workspace.path.display(),
                "Removed stale workspace left by an earlier run"
            ),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(WorkspaceError::io(&workspace.path, e)),
        }

        if let Err(e) = fs::create_dir_all(&workspace.path).await {
            let err = WorkspaceError::io(&workspace.path, e);
            workspace.release().await;
            return Err(err);
        }

        debug!(job_id = %job_id, path = %workspace.path.display(), "Workspace acquired");
        Ok(workspace)
    }

    /// Remove the workspace and its contents.
    pub async fn release(&self, mut workspace: Workspace) {
        workspace.release().await;
    }

    /// Remove `job_*` directories that no live handle owns.
    ///
    /// Returns the number of directories removed.
    pub async fn sweep_stale(&self) -> Result<usize, WorkspaceError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(WorkspaceError::io(&self.root, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| WorkspaceError::io(&self.root, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(id) = name.strip_prefix(DIR_PREFIX) else {
                continue;
            };
            if is_active(&self.active, id) {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }

            match fs::remove_dir_all(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %entry.path().display(), "Failed to remove stale workspace: {}", e),
            }
        }

        if removed > 0 {
            warn!(removed, root = %self.root.display(), "Swept stale workspaces");
        }
        Ok(removed)
    }
}

/// Exclusive scratch directory of one job.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    job_id: JobId,
    active: ActiveSet,
    released: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Path of a file inside the workspace.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Remove the directory. Safe to call more than once.
    pub async fn release(&mut self) {
        if self.released {
            return;
        }
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!(job_id = %self.job_id, "Workspace released"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                job_id = %self.job_id,
                path = %self.path.display(),
                "Failed to remove workspace: {}",
                e
            ),
        }
        unregister(&self.active, self.job_id.as_str());
        self.released = true;
    }
}

impl Drop for Workspace {
    /// Removal must not block a runtime worker thread: inside a runtime the
    /// directory is renamed aside (so the job path is free at once) and
    /// deleted on the blocking pool. A crash before that finishes leaves a
    /// `job_<id>.dropped` directory for [`WorkspaceManager::sweep_stale`].
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let trash = self
                    .path
                    .with_file_name(format!("{}{}.dropped", DIR_PREFIX, self.job_id));
                match std::fs::rename(&self.path, &trash) {
                    Ok(()) => {
                        let job_id = self.job_id.clone();
                        handle.spawn_blocking(move || remove_on_drop(&trash, &job_id));
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(_) => remove_on_drop(&self.path, &self.job_id),
                }
            }
            Err(_) => remove_on_drop(&self.path, &self.job_id),
        }
        unregister(&self.active, self.job_id.as_str());
    }
}

fn remove_on_drop(path: &Path, job_id: &JobId) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => debug!(job_id = %job_id, "Workspace removed on drop"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            job_id = %job_id,
            path = %path.display(),
            "Failed to remove workspace on drop: {}",
            e
        ),
    }
}

fn register(active: &ActiveSet, id: &str) -> bool {
    let mut set = active.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    set.insert(id.to_string())
}

fn unregister(active: &ActiveSet, id: &str) {
    let mut set = active.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    set.remove(id);
}

fn is_active(active: &ActiveSet, id: &str) -> bool {
    let set = active.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    set.contains(id)
}
