//! Unpacking downloaded release artifacts.
//!
//! Archives are extracted as-is into the target directory; registry bin
//! templates address files relative to the archive root, so no top-level
//! directory is stripped.

mod gzip;
mod tar_gz;
mod zip;

use crate::runtime::Runtime;
use anyhow::{Context, Result, anyhow};
use log::debug;
use std::path::{Component, Path, PathBuf};

pub use gzip::GzipExtractor;
pub use tar_gz::TarGzExtractor;
pub use zip::ZipExtractor;

/// Mode applied to files that are meant to be run.
pub const EXECUTABLE_MODE: u32 = 0o755;

/// A format-specific extractor.
pub trait ArchiveExtractor: Send + Sync {
    fn can_handle(&self, archive_path: &Path) -> bool;

    fn extract<R: Runtime + 'static>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<()>;
}

/// Selects an extractor by file extension.
pub struct ArchiveExtractorImpl {
    tar_gz: TarGzExtractor,
    zip: ZipExtractor,
    gzip: GzipExtractor,
}

impl Default for ArchiveExtractorImpl {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveExtractorImpl {
    pub fn new() -> Self {
        Self {
            tar_gz: TarGzExtractor,
            zip: ZipExtractor,
            gzip: GzipExtractor,
        }
    }

    /// Extract a recognized archive, or place an unrecognized artifact into
    /// `extract_to` unchanged as a single executable file.
    #[tracing::instrument(skip(self, runtime))]
    pub fn unpack<R: Runtime + 'static>(
        &self,
        runtime: &R,
        artifact: &Path,
        extract_to: &Path,
    ) -> Result<()> {
        if self.can_handle(artifact) {
            return self.extract(runtime, artifact, extract_to);
        }

        let file_name = artifact
            .file_name()
            .ok_or_else(|| anyhow!("Artifact path has no file name: {:?}", artifact))?;
        let dest = extract_to.join(file_name);
        debug!("Treating {:?} as a single executable", artifact);

        runtime.create_dir_all(extract_to)?;
        runtime
            .copy(artifact, &dest)
            .with_context(|| format!("Failed to place {:?}", artifact))?;
        runtime.set_permissions(&dest, EXECUTABLE_MODE)?;
        Ok(())
    }
}

impl ArchiveExtractor for ArchiveExtractorImpl {
    fn can_handle(&self, archive_path: &Path) -> bool {
        self.tar_gz.can_handle(archive_path)
            || self.zip.can_handle(archive_path)
            || self.gzip.can_handle(archive_path)
    }

    #[tracing::instrument(skip(self, runtime))]
    fn extract<R: Runtime + 'static>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<()> {
        // .tar.gz must be tried before plain .gz
        if self.tar_gz.can_handle(archive_path) {
            return self.tar_gz.extract(runtime, archive_path, extract_to);
        }
        if self.zip.can_handle(archive_path) {
            return self.zip.extract(runtime, archive_path, extract_to);
        }
        if self.gzip.can_handle(archive_path) {
            return self.gzip.extract(runtime, archive_path, extract_to);
        }
        Err(anyhow!(
            "Unsupported archive format: {}",
            archive_path.display()
        ))
    }
}

/// Lower-cased file name, for extension checks.
fn lower_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Join an archive entry path onto `root`, refusing absolute paths and `..`.
fn safe_join(root: &Path, entry: &Path) -> Option<PathBuf> {
    let mut out = root.to_path_buf();
    for component in entry.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (out != root).then_some(out)
}
