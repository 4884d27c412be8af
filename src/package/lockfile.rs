use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::provider::ProviderKind;
use crate::runtime::Runtime;
use crate::source::{normalize, split};

/// One desired package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPackage {
    pub source_id: String,
    /// Requested version; may be empty or `latest` until first resolved.
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LockfileData {
    #[serde(default)]
    packages: Vec<LockedPackage>,
}

/// The desired-state list, persisted as JSON.
///
/// Every call reads the file afresh, so the lockfile can be edited by hand
/// between operations. Writes go to a sibling temp file that is renamed over
/// the original.
pub struct Lockfile<R: Runtime> {
    runtime: Arc<R>,
    path: PathBuf,
}

impl<R: Runtime> Lockfile<R> {
    pub fn new(runtime: Arc<R>, path: PathBuf) -> Self {
        Self { runtime, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries, with legacy ids rewritten to the current form. A missing
    /// file is an empty list. Later duplicates win.
    #[tracing::instrument(skip(self))]
    pub fn packages(&self) -> Result<Vec<LockedPackage>> {
        if !self.runtime.exists(&self.path) {
            return Ok(Vec::new());
        }
        let content = self.runtime.read_to_string(&self.path)?;
        let data: LockfileData = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse lockfile {:?}", self.path))?;

        let mut packages: Vec<LockedPackage> = Vec::with_capacity(data.packages.len());
        for mut package in data.packages {
            package.source_id = normalize(&package.source_id);
            match packages.iter_mut().find(|p| p.source_id == package.source_id) {
                Some(existing) => *existing = package,
                None => packages.push(package),
            }
        }
        Ok(packages)
    }

    pub fn get(&self, source_id: &str) -> Result<Option<LockedPackage>> {
        let source_id = normalize(source_id);
        Ok(self
            .packages()?
            .into_iter()
            .find(|p| p.source_id == source_id))
    }

    /// Entries whose provider is `provider`.
    pub fn packages_for_provider(&self, provider: ProviderKind) -> Result<Vec<LockedPackage>> {
        Ok(self
            .packages()?
            .into_iter()
            .filter(|p| {
                let (name, _) = split(&p.source_id);
                name.eq_ignore_ascii_case(provider.as_str())
            })
            .collect())
    }

    /// Insert or replace the entry for `source_id`.
    #[tracing::instrument(skip(self))]
    pub fn add(&self, source_id: &str, version: &str) -> Result<()> {
        let source_id = normalize(source_id);
        let mut packages = self.packages()?;
        match packages.iter_mut().find(|p| p.source_id == source_id) {
            Some(existing) => existing.version = version.to_string(),
            None => packages.push(LockedPackage {
                source_id: source_id.clone(),
                version: version.to_string(),
            }),
        }
        self.save(packages)?;
        debug!("Locked {} at {:?}", source_id, version);
        Ok(())
    }

    /// Drop the entry for `source_id`. Returns whether one existed.
    #[tracing::instrument(skip(self))]
    pub fn remove(&self, source_id: &str) -> Result<bool> {
        let source_id = normalize(source_id);
        let mut packages = self.packages()?;
        let before = packages.len();
        packages.retain(|p| p.source_id != source_id);
        if packages.len() == before {
            return Ok(false);
        }
        self.save(packages)?;
        Ok(true)
    }

    fn save(&self, mut packages: Vec<LockedPackage>) -> Result<()> {
        packages.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        let json = serde_json::to_string_pretty(&LockfileData { packages })?;

        if let Some(parent) = self.path.parent() {
            self.runtime.create_dir_all(parent)?;
        }
        let staging = self.path.with_extension("json.tmp");
        self.runtime
            .write(&staging, json.as_bytes())
            .with_context(|| format!("Failed to write lockfile {:?}", staging))?;
        self.runtime.rename(&staging, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockRuntime, RealRuntime};
    use tempfile::tempdir;

    fn lockfile_in(dir: &Path) -> Lockfile<RealRuntime> {
        Lockfile::new(Arc::new(RealRuntime), dir.join("lock.json"))
    }

    #[test]
    fn test_missing_lockfile_is_empty() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| false);

        let lockfile = Lockfile::new(Arc::new(runtime), PathBuf::from("/data/lock.json"));
        assert!(lockfile.packages().unwrap().is_empty());
    }

    #[test]
    fn test_add_replace_and_remove() {
        let dir = tempdir().unwrap();
        let lockfile = lockfile_in(dir.path());

        lockfile.add("cargo:ripgrep", "14.1.0").unwrap();
        lockfile.add("pkg:npm/typescript", "latest").unwrap();
        lockfile.add("npm:typescript", "5.4.5").unwrap();

        let packages = lockfile.packages().unwrap();
        assert_eq!(
            packages,
            vec![
                LockedPackage {
                    source_id: "cargo:ripgrep".into(),
                    version: "14.1.0".into()
                },
                LockedPackage {
                    source_id: "npm:typescript".into(),
                    version: "5.4.5".into()
                },
            ]
        );

        assert!(lockfile.remove("pkg:cargo/ripgrep").unwrap());
        assert!(!lockfile.remove("cargo:ripgrep").unwrap());
        assert_eq!(lockfile.packages().unwrap().len(), 1);
        assert!(!dir.path().join("lock.json.tmp").exists());
    }

    #[test]
    fn test_legacy_ids_in_file_are_normalized() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("lock.json"),
            r#"{"packages":[
                {"source_id":"pkg:github/o/r","version":"v1"},
                {"source_id":"github:o/r","version":"v2"},
                {"source_id":"gem:rubocop"}
            ]}"#,
        )
        .unwrap();

        let lockfile = lockfile_in(dir.path());
        let github = lockfile.packages_for_provider(ProviderKind::GitHub).unwrap();
        assert_eq!(github.len(), 1);
        assert_eq!(github[0].version, "v2");

        let gem = lockfile.get("pkg:gem/rubocop").unwrap().unwrap();
        assert_eq!(gem.version, "");
    }

    #[test]
    fn test_malformed_lockfile_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("lock.json"), "[oops").unwrap();

        let err = lockfile_in(dir.path()).packages().unwrap_err();
        assert!(err.to_string().contains("Failed to parse lockfile"));
    }
}
