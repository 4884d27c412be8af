//! Removal of temporary paths, on drop or on interruption.

use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::runtime::Runtime;

/// Paths that must be removed if the process is interrupted.
#[derive(Default)]
pub struct CleanupContext {
    paths: Vec<PathBuf>,
}

impl CleanupContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    pub fn remove(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Remove every registered path, ignoring failures.
    pub fn cleanup(&self) {
        for path in &self.paths {
            debug!("Cleaning up: {:?}", path);
            if path.is_dir() {
                let _ = std::fs::remove_dir_all(path);
            } else {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

pub type SharedCleanupContext = Arc<Mutex<CleanupContext>>;

pub fn new_shared() -> SharedCleanupContext {
    Arc::new(Mutex::new(CleanupContext::new()))
}

/// A scratch directory that exists for the lifetime of the guard.
///
/// Creating the guard wipes and recreates the directory; dropping it removes
/// the directory whether the operation succeeded or not.
pub struct TempWorkspace<R: Runtime> {
    runtime: Arc<R>,
    path: PathBuf,
    ctx: Option<SharedCleanupContext>,
}

impl<R: Runtime> TempWorkspace<R> {
    pub fn create(
        runtime: Arc<R>,
        path: PathBuf,
        ctx: Option<SharedCleanupContext>,
    ) -> Result<Self> {
        if runtime.exists(&path) {
            runtime.remove_dir_all(&path)?;
        }
        runtime.create_dir_all(&path)?;

        if let Some(ctx) = &ctx
            && let Ok(mut guard) = ctx.lock()
        {
            guard.add(path.clone());
        }

        debug!("Created temp workspace {:?}", path);
        Ok(Self { runtime, path, ctx })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, child: impl AsRef<Path>) -> PathBuf {
        self.path.join(child)
    }
}

impl<R: Runtime> Drop for TempWorkspace<R> {
    fn drop(&mut self) {
        if self.runtime.exists(&self.path)
            && let Err(e) = self.runtime.remove_dir_all(&self.path)
        {
            warn!("Failed to remove temp workspace {:?}: {:#}", self.path, e);
        }
        if let Some(ctx) = &self.ctx
            && let Ok(mut guard) = ctx.lock()
        {
            guard.remove(&self.path);
        }
    }
}
