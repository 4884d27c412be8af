use crate::runtime::Runtime;
use anyhow::{Context, Result, anyhow};
use log::{debug, info};
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;

use super::{ArchiveExtractor, lower_name, safe_join};

/// Extractor for .zip archives
pub struct ZipExtractor;

impl ArchiveExtractor for ZipExtractor {
    fn can_handle(&self, archive_path: &Path) -> bool {
        lower_name(archive_path).ends_with(".zip")
    }

    fn extract<R: Runtime + 'static>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<()> {
        debug!("Extracting zip archive to {:?}...", extract_to);
        let mut file = runtime
            .open(archive_path)
            .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;

        // ZipArchive needs Read + Seek; the runtime hands out a plain reader
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .with_context(|| format!("Failed to read archive {:?}", archive_path))?;

        let mut archive = ZipArchive::new(std::io::Cursor::new(buffer))
            .context("Failed to parse ZIP archive")?;
        if archive.is_empty() {
            return Err(anyhow!("Archive appears to be empty."));
        }

        runtime.create_dir_all(extract_to)?;

        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .with_context(|| format!("Failed to read ZIP entry {}", i))?;

            let Some(full_path) = entry
                .enclosed_name()
                .and_then(|p| safe_join(extract_to, &p))
            else {
                debug!("Skipping entry with invalid path");
                continue;
            };

            if entry.is_dir() {
                runtime.create_dir_all(&full_path)?;
                continue;
            }

            if let Some(parent) = full_path.parent() {
                runtime.create_dir_all(parent)?;
            }
            let mut dest_file = runtime.create_file(&full_path)?;
            std::io::copy(&mut entry, &mut dest_file)
                .with_context(|| format!("Failed to extract file {:?}", full_path))?;
            drop(dest_file);

            if let Some(mode) = entry.unix_mode()
                && let Err(e) = runtime.set_permissions(&full_path, mode & 0o7777)
            {
                debug!("Failed to set permissions on {:?}: {}", full_path, e);
            }
        }

        info!("Extraction complete.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;
    use zip::CompressionMethod;
    use zip::ZipWriter;
    use zip::write::FileOptions;

    fn create_test_archive(path: &Path, files: &[(&str, &str, u32)]) -> Result<()> {
        let mut zip = ZipWriter::new(File::create(path)?);

        for (name, content, mode) in files {
            let options: FileOptions<()> = FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .unix_permissions(*mode);
            zip.start_file(*name, options)?;
            zip.write_all(content.as_bytes())?;
        }

        zip.finish()?;
        Ok(())
    }

    #[test]
    fn test_can_handle_zip() {
        let extractor = ZipExtractor;
        assert!(extractor.can_handle(Path::new("file.zip")));
        assert!(extractor.can_handle(Path::new("FILE.ZIP")));
        assert!(!extractor.can_handle(Path::new("file.tar.gz")));
    }

    #[test]
    fn test_extract_multiple_toplevel_dirs() -> Result<()> {
        let dir = tempdir()?;
        let archive_path = dir.path().join("test.zip");
        let extract_path = dir.path().join("extracted");

        create_test_archive(
            &archive_path,
            &[("foo/file1.txt", "foo1", 0o644), ("bar/file2.txt", "bar2", 0o644)],
        )?;

        ZipExtractor.extract(&RealRuntime, &archive_path, &extract_path)?;

        assert_eq!(fs::read_to_string(extract_path.join("foo/file1.txt"))?, "foo1");
        assert_eq!(fs::read_to_string(extract_path.join("bar/file2.txt"))?, "bar2");
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_extract_preserves_file_permissions() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir()?;
        let archive_path = dir.path().join("test.zip");
        let extract_path = dir.path().join("extracted");

        create_test_archive(
            &archive_path,
            &[
                ("lua-ls/bin/lua-language-server", "#!/bin/sh", 0o755),
                ("lua-ls/config.txt", "some config", 0o644),
            ],
        )?;

        ZipExtractor.extract(&RealRuntime, &archive_path, &extract_path)?;

        let script_mode = fs::metadata(extract_path.join("lua-ls/bin/lua-language-server"))?
            .permissions()
            .mode();
        assert!(script_mode & 0o111 != 0, "mode was {:o}", script_mode);

        let config_mode = fs::metadata(extract_path.join("lua-ls/config.txt"))?
            .permissions()
            .mode();
        assert!(config_mode & 0o111 == 0, "mode was {:o}", config_mode);
        Ok(())
    }

    #[test]
    fn test_extract_directory_entries() -> Result<()> {
        let dir = tempdir()?;
        let archive_path = dir.path().join("test.zip");
        let extract_path = dir.path().join("extracted");

        {
            let mut zip = ZipWriter::new(File::create(&archive_path)?);
            let options: FileOptions<()> =
                FileOptions::default().compression_method(CompressionMethod::Stored);
            zip.add_directory("pkg/subdir/", options)?;
            zip.start_file("pkg/subdir/file.txt", options)?;
            zip.write_all(b"nested file")?;
            zip.finish()?;
        }

        ZipExtractor.extract(&RealRuntime, &archive_path, &extract_path)?;

        assert!(extract_path.join("pkg/subdir").is_dir());
        assert_eq!(
            fs::read_to_string(extract_path.join("pkg/subdir/file.txt"))?,
            "nested file"
        );
        Ok(())
    }

    #[test]
    fn test_extract_empty_archive() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("test.zip");
        create_test_archive(&archive_path, &[]).unwrap();

        let result = ZipExtractor.extract(&RealRuntime, &archive_path, &dir.path().join("out"));
        assert!(result.is_err());
    }

    #[test]
    fn test_extract_corrupted_archive() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("test.zip");
        fs::write(&archive_path, "corrupted data").unwrap();

        let result = ZipExtractor.extract(&RealRuntime, &archive_path, &dir.path().join("out"));
        assert!(result.is_err());
    }
}
