use crate::runtime::Runtime;
use anyhow::{Context, Result, anyhow};
use flate2::read::GzDecoder;
use log::{debug, info};
use std::path::Path;
use tar::{Archive, EntryType};

use super::{ArchiveExtractor, lower_name, safe_join};

/// Extractor for .tar.gz / .tgz archives
pub struct TarGzExtractor;

impl ArchiveExtractor for TarGzExtractor {
    fn can_handle(&self, archive_path: &Path) -> bool {
        let name = lower_name(archive_path);
        name.ends_with(".tar.gz") || name.ends_with(".tgz")
    }

    fn extract<R: Runtime + 'static>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<()> {
        debug!("Extracting tar.gz archive to {:?}...", extract_to);
        let file = runtime
            .open(archive_path)
            .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;
        runtime.create_dir_all(extract_to)?;

        let mut archive = Archive::new(GzDecoder::new(file));
        let mut count = 0usize;

        for entry in archive
            .entries()
            .with_context(|| format!("Failed to read archive {:?}", archive_path))?
        {
            let mut entry = entry.context("Failed to read tar entry")?;
            let entry_path = entry.path().context("Invalid tar entry path")?.into_owned();

            let Some(full_path) = safe_join(extract_to, &entry_path) else {
                debug!("Skipping entry with unsafe path {:?}", entry_path);
                continue;
            };

            let entry_type = entry.header().entry_type();
            match entry_type {
                EntryType::Directory => {
                    runtime.create_dir_all(&full_path)?;
                }
                EntryType::Regular | EntryType::Continuous => {
                    if let Some(parent) = full_path.parent() {
                        runtime.create_dir_all(parent)?;
                    }
                    let mut dest_file = runtime.create_file(&full_path)?;
                    std::io::copy(&mut entry, &mut dest_file)
                        .with_context(|| format!("Failed to extract file {:?}", full_path))?;
                    drop(dest_file);

                    if let Ok(mode) = entry.header().mode()
                        && let Err(e) = runtime.set_permissions(&full_path, mode & 0o7777)
                    {
                        debug!("Failed to set permissions on {:?}: {}", full_path, e);
                    }
                }
                EntryType::Symlink => {
                    let target = entry
                        .link_name()
                        .context("Invalid symlink target")?
                        .map(|t| t.into_owned());
                    match target {
                        Some(target) if target.is_relative() => {
                            if let Some(parent) = full_path.parent() {
                                runtime.create_dir_all(parent)?;
                            }
                            runtime.symlink(&target, &full_path)?;
                        }
                        _ => debug!("Skipping absolute symlink {:?}", entry_path),
                    }
                }
                other => {
                    debug!("Skipping {:?} entry {:?}", other, entry_path);
                    continue;
                }
            }
            count += 1;
        }

        if count == 0 {
            return Err(anyhow!("Archive appears to be empty."));
        }

        info!("Extraction complete.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::fs::{self, File};
    use tar::{Builder, Header};
    use tempfile::tempdir;

    fn create_test_archive(path: &Path, files: &[(&str, &str, u32)]) -> Result<()> {
        let enc = GzEncoder::new(File::create(path)?, Compression::default());
        let mut tar = Builder::new(enc);

        for (name, content, mode) in files {
            let mut header = Header::new_gnu();
            header.set_path(name)?;
            header.set_size(content.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            tar.append(&header, content.as_bytes())?;
        }

        tar.into_inner()?.finish()?;
        Ok(())
    }

    #[test]
    fn test_can_handle_tar_gz() {
        let extractor = TarGzExtractor;
        assert!(extractor.can_handle(Path::new("file.tar.gz")));
        assert!(extractor.can_handle(Path::new("FILE.TGZ")));
        assert!(!extractor.can_handle(Path::new("file.gz")));
        assert!(!extractor.can_handle(Path::new("file.zip")));
    }

    #[test]
    fn test_extract_keeps_top_level_dir() -> Result<()> {
        let dir = tempdir()?;
        let archive_path = dir.path().join("rg.tar.gz");
        let extract_path = dir.path().join("extracted");

        create_test_archive(
            &archive_path,
            &[
                ("ripgrep-14.1.0/rg", "rg", 0o755),
                ("ripgrep-14.1.0/doc/rg.1", "man", 0o644),
            ],
        )?;

        TarGzExtractor.extract(&RealRuntime, &archive_path, &extract_path)?;

        assert_eq!(fs::read_to_string(extract_path.join("ripgrep-14.1.0/rg"))?, "rg");
        assert!(extract_path.join("ripgrep-14.1.0/doc/rg.1").exists());
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_extract_preserves_file_permissions() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir()?;
        let archive_path = dir.path().join("tool.tgz");
        let extract_path = dir.path().join("extracted");

        create_test_archive(
            &archive_path,
            &[("tool", "#!/bin/sh", 0o755), ("README", "docs", 0o644)],
        )?;

        TarGzExtractor.extract(&RealRuntime, &archive_path, &extract_path)?;

        let tool_mode = fs::metadata(extract_path.join("tool"))?.permissions().mode();
        assert!(tool_mode & 0o111 != 0, "mode was {:o}", tool_mode);
        let readme_mode = fs::metadata(extract_path.join("README"))?
            .permissions()
            .mode();
        assert!(readme_mode & 0o111 == 0, "mode was {:o}", readme_mode);
        Ok(())
    }

    #[test]
    fn test_extract_empty_archive() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("empty.tar.gz");
        create_test_archive(&archive_path, &[]).unwrap();

        let result = TarGzExtractor.extract(&RealRuntime, &archive_path, &dir.path().join("out"));
        assert!(result.is_err());
    }

    #[test]
    fn test_extract_corrupted_archive() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("bad.tar.gz");
        fs::write(&archive_path, "corrupted data").unwrap();

        let result = TarGzExtractor.extract(&RealRuntime, &archive_path, &dir.path().join("out"));
        assert!(result.is_err());
    }

    #[test]
    fn test_extract_nonexistent_archive() {
        let dir = tempdir().unwrap();
        let result = TarGzExtractor.extract(
            &RealRuntime,
            &dir.path().join("missing.tar.gz"),
            &dir.path().join("out"),
        );
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to open archive")
        );
    }
}
