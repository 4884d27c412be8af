use crate::runtime::Runtime;
use anyhow::{Context, Result, anyhow};
use flate2::read::GzDecoder;
use log::{debug, info};
use std::path::Path;

use super::{ArchiveExtractor, EXECUTABLE_MODE, lower_name};

/// Extractor for a single gzip-compressed file (`tool-linux-x64.gz`).
///
/// The output keeps the artifact name without `.gz` and is marked executable.
pub struct GzipExtractor;

impl ArchiveExtractor for GzipExtractor {
    fn can_handle(&self, archive_path: &Path) -> bool {
        let name = lower_name(archive_path);
        name.ends_with(".gz") && !name.ends_with(".tar.gz")
    }

    fn extract<R: Runtime + 'static>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<()> {
        let stem = archive_path
            .file_stem()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("Cannot derive output name from {:?}", archive_path))?;
        let dest = extract_to.join(stem);
        debug!("Decompressing {:?} to {:?}...", archive_path, dest);

        let file = runtime
            .open(archive_path)
            .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;
        runtime.create_dir_all(extract_to)?;

        let mut decoder = GzDecoder::new(file);
        let mut out = runtime.create_file(&dest)?;
        std::io::copy(&mut decoder, &mut out)
            .with_context(|| format!("Failed to decompress {:?}", archive_path))?;
        drop(out);

        runtime.set_permissions(&dest, EXECUTABLE_MODE)?;
        info!("Extraction complete.");
        Ok(())
    }
}
