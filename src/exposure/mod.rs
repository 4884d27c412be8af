//! Shared directory of exposed executables.
//!
//! Every installed package makes its commands reachable through one flat
//! directory, either as a relative symlink to the real binary or as a wrapper
//! script that prepares the runtime environment first. Ownership of an entry
//! is never stored; it is derived from where the entry points, so removing one
//! package can never delete another package's entries.

pub mod wrapper;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::archive::EXECUTABLE_MODE;
use crate::runtime::{Runtime, is_path_under, relative_symlink_path};

/// Bytes read from a regular file when looking for a wrapper marker.
const WRAPPER_HEADER_LEN: u64 = 1024;

/// One exposure directory entry and the target it resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposedEntry {
    pub name: String,
    pub path: PathBuf,
    pub target: PathBuf,
}

pub struct ExposureManager<R: Runtime> {
    runtime: Arc<R>,
    bin_dir: PathBuf,
}

impl<R: Runtime> ExposureManager<R> {
    pub fn new(runtime: Arc<R>, bin_dir: PathBuf) -> Self {
        Self { runtime, bin_dir }
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    /// Expose `target` as `name`.
    ///
    /// With an empty `env` a relative symlink is created; otherwise a wrapper
    /// script exporting `env` is written. An existing entry is replaced.
    #[tracing::instrument(skip(self, env))]
    pub fn expose(
        &self,
        name: &str,
        target: &Path,
        owner_dir: &Path,
        env: &[(String, String)],
    ) -> Result<()> {
        self.runtime
            .create_dir_all(&self.bin_dir)
            .with_context(|| format!("Failed to create exposure directory {:?}", self.bin_dir))?;

        let link = self.bin_dir.join(name);
        self.clear_entry(&link, owner_dir);

        if env.is_empty() {
            let link_target =
                relative_symlink_path(&link, target).unwrap_or_else(|| target.to_path_buf());
            self.runtime
                .symlink(&link_target, &link)
                .with_context(|| format!("Failed to link {:?} -> {:?}", link, link_target))?;
        } else {
            let script = wrapper::render(target, env);
            self.runtime
                .write(&link, script.as_bytes())
                .with_context(|| format!("Failed to write wrapper {:?}", link))?;
        }

        self.runtime
            .set_permissions(&link, EXECUTABLE_MODE)
            .with_context(|| format!("Failed to mark {:?} executable", link))?;

        debug!("Exposed {} -> {:?}", name, target);
        Ok(())
    }

    /// Remove `name` if it belongs to `install_dir`. A missing entry, or one
    /// owned by another package, is left alone. Returns whether anything was
    /// removed.
    #[tracing::instrument(skip(self))]
    pub fn unexpose(&self, name: &str, install_dir: &Path) -> Result<bool> {
        let link = self.bin_dir.join(name);
        match self.owner_target(&link) {
            Some(target) if is_path_under(&target, install_dir) => {
                self.remove_entry(&link)?;
                Ok(true)
            }
            Some(target) => {
                debug!("Keeping {:?}: it points to {:?}", link, target);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Remove every entry that resolves under `install_dir`. Returns the
    /// removed names.
    #[tracing::instrument(skip(self))]
    pub fn unexpose_all_under(&self, install_dir: &Path) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for entry in self.entries_under(install_dir)? {
            self.remove_entry(&entry.path)?;
            removed.push(entry.name);
        }
        Ok(removed)
    }

    /// Remove entries under `root` whose target no longer exists.
    #[tracing::instrument(skip(self))]
    pub fn remove_dangling_under(&self, root: &Path) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for entry in self.entries_under(root)? {
            if !self.runtime.exists(&entry.target) {
                self.remove_entry(&entry.path)?;
                removed.push(entry.name);
            }
        }
        Ok(removed)
    }

    /// Entries whose target lies under `dir`.
    pub fn entries_under(&self, dir: &Path) -> Result<Vec<ExposedEntry>> {
        if !self.runtime.is_dir(&self.bin_dir) {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for path in self.runtime.read_dir(&self.bin_dir)? {
            let Some(target) = self.owner_target(&path) else {
                continue;
            };
            if !is_path_under(&target, dir) {
                continue;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            entries.push(ExposedEntry { name, path, target });
        }
        Ok(entries)
    }

    /// Whether `name` currently resolves to `target`.
    pub fn is_exposed(&self, name: &str, target: &Path) -> bool {
        self.owner_target(&self.bin_dir.join(name))
            .is_some_and(|t| t == crate::runtime::normalize_path(target))
    }

    /// Target of a symlink, or of one of our wrapper scripts.
    fn owner_target(&self, entry: &Path) -> Option<PathBuf> {
        if self.runtime.is_symlink(entry) {
            return self.runtime.resolve_link(entry).ok();
        }
        if !self.runtime.is_file(entry) {
            return None;
        }

        let mut header = Vec::new();
        self.runtime
            .open(entry)
            .ok()?
            .take(WRAPPER_HEADER_LEN)
            .read_to_end(&mut header)
            .ok()?;
        let text = String::from_utf8_lossy(&header);
        wrapper::parse_target(&text).map(|t| crate::runtime::normalize_path(&t))
    }

    /// Best-effort removal of whatever sits at `link` before a new expose.
    fn clear_entry(&self, link: &Path, owner_dir: &Path) {
        let present = self.runtime.is_symlink(link) || self.runtime.exists(link);
        if !present {
            return;
        }

        if let Some(previous) = self.owner_target(link)
            && !is_path_under(&previous, owner_dir)
        {
            warn!(
                "Replacing {:?}, which pointed to {:?} outside {:?}",
                link, previous, owner_dir
            );
        }

        if let Err(e) = self.remove_entry(link) {
            warn!("Failed to remove existing entry {:?}: {:#}", link, e);
        }
    }

    fn remove_entry(&self, path: &Path) -> Result<()> {
        if self.runtime.is_symlink(path) {
            self.runtime.remove_symlink(path)
        } else {
            self.runtime.remove_file(path)
        }
    }
}
