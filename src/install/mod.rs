//! Install strategies.
//!
//! An [`Installer`] drives one package through the fixed stage sequence:
//! version resolving, fetching, placing, exposing and recording. The three
//! strategies only differ in how they resolve, fetch and place, and in where
//! they look for executables; exposing and recording are shared.

mod git;
mod native;
mod release;
mod strategy;
mod version;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use log::{debug, info, warn};

use crate::archive::ArchiveExtractorImpl;
use crate::asset::{detect_target, resolve_bin_path, resolve_template};
use crate::backend::{Backend, GitClient};
use crate::cleanup::SharedCleanupContext;
use crate::download::Downloader;
use crate::error::{InstallError, reason};
use crate::exposure::ExposureManager;
use crate::package::{Layout, Lockfile, Receipt, ReceiptStore};
use crate::provider::ProviderKind;
use crate::registry::{AssetDescriptor, RegistryEntry};
use crate::runtime::{Runtime, is_path_under, normalize_path};
use crate::source::PackageRef;

pub use release::release_url;
pub use strategy::{Pipeline, Stage, StageOutcome, StrategyKind, select_strategy};
pub use version::{pinned, resolve_with};

/// Everything needed to install one package.
pub struct Plan {
    pub package: PackageRef,
    pub entry: Option<Arc<RegistryEntry>>,
    pub backend: Arc<dyn Backend>,
    pub strategy: StrategyKind,
    pub install_dir: PathBuf,
}

impl Plan {
    pub fn new(
        package: PackageRef,
        entry: Option<Arc<RegistryEntry>>,
        backend: Arc<dyn Backend>,
        install_dir: PathBuf,
    ) -> Self {
        let strategy = select_strategy(entry.as_deref(), package.provider());
        Self {
            package,
            entry,
            backend,
            strategy,
            install_dir,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVersion {
    pub version: String,
    /// The repository was already fetched while resolving.
    pub prefetched: bool,
}

impl ResolvedVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            prefetched: false,
        }
    }
}

/// A command to expose and the file it runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Executable {
    pub name: String,
    pub target: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstallReport {
    pub version: String,
    pub strategy: StrategyKind,
    pub executables: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct Installer<R: Runtime + 'static> {
    runtime: Arc<R>,
    layout: Layout,
    downloader: Arc<dyn Downloader>,
    extractor: ArchiveExtractorImpl,
    git: GitClient,
    exposure: ExposureManager<R>,
    receipts: ReceiptStore<R>,
    lockfile: Lockfile<R>,
    cleanup: Option<SharedCleanupContext>,
    target: String,
}

impl<R: Runtime + 'static> Installer<R> {
    pub fn new(
        runtime: Arc<R>,
        layout: Layout,
        downloader: Arc<dyn Downloader>,
        git: GitClient,
        cleanup: Option<SharedCleanupContext>,
    ) -> Self {
        let exposure = ExposureManager::new(runtime.clone(), layout.bin_dir().to_path_buf());
        let receipts = ReceiptStore::new(runtime.clone());
        let lockfile = Lockfile::new(runtime.clone(), layout.lockfile_path());
        Self {
            runtime,
            layout,
            downloader,
            extractor: ArchiveExtractorImpl::new(),
            git,
            exposure,
            receipts,
            lockfile,
            cleanup,
            target: detect_target(),
        }
    }

    /// Match release assets against `target` instead of the running platform.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn lockfile(&self) -> &Lockfile<R> {
        &self.lockfile
    }

    pub fn receipts(&self) -> &ReceiptStore<R> {
        &self.receipts
    }

    pub fn exposure(&self) -> &ExposureManager<R> {
        &self.exposure
    }

    /// Turn `requested` into a concrete version the way the plan's strategy
    /// does it.
    #[tracing::instrument(skip(self, plan), fields(package = %plan.package))]
    pub async fn resolve(&self, plan: &Plan, requested: &str) -> Result<ResolvedVersion, InstallError> {
        match plan.strategy {
            StrategyKind::ReleaseAsset => self.resolve_release(plan, requested).await,
            StrategyKind::Git => self.resolve_git(plan, requested).await,
            StrategyKind::Native => self.resolve_native(plan, requested).await,
        }
    }

    /// Run every stage, starting with version resolving.
    pub async fn install(&self, plan: &Plan, requested: &str) -> Result<InstallReport, InstallError> {
        let mut pipeline = Pipeline::new(plan.package.to_string());
        let resolved = pipeline.step(self.resolve(plan, requested).await)?;
        self.run_stages(plan, resolved, pipeline).await
    }

    /// Run the stages after version resolving, for a version resolved
    /// beforehand.
    pub async fn install_resolved(
        &self,
        plan: &Plan,
        resolved: ResolvedVersion,
    ) -> Result<InstallReport, InstallError> {
        let mut pipeline = Pipeline::new(plan.package.to_string());
        pipeline.step(Ok(()))?;
        self.run_stages(plan, resolved, pipeline).await
    }

    async fn run_stages(
        &self,
        plan: &Plan,
        resolved: ResolvedVersion,
        mut pipeline: Pipeline,
    ) -> Result<InstallReport, InstallError> {
        info!(
            "Installing {} {} ({} strategy)",
            plan.package, resolved.version, plan.strategy
        );

        match plan.strategy {
            StrategyKind::ReleaseAsset => {
                self.release_fetch_and_place(plan, &resolved.version, &mut pipeline)
                    .await?
            }
            StrategyKind::Git => self.git_fetch_and_place(plan, &resolved, &mut pipeline).await?,
            StrategyKind::Native => {
                self.native_fetch_and_place(plan, &resolved.version, &mut pipeline)
                    .await?
            }
        }

        let (executables, outcome) = self.expose(plan, &resolved.version);
        pipeline.advance(Ok(outcome))?;
        pipeline.advance(self.record(plan, &resolved.version, &executables))?;

        Ok(InstallReport {
            version: resolved.version,
            strategy: plan.strategy,
            executables,
            warnings: pipeline.into_warnings(),
        })
    }

    /// Link the package's executables into the exposure directory, dropping
    /// links this package no longer provides. Never fails; problems come
    /// back as warnings.
    pub fn expose(&self, plan: &Plan, version: &str) -> (Vec<String>, StageOutcome) {
        let executables = match self.executables(plan, version) {
            Ok(executables) => executables,
            Err(e) => {
                let error = InstallError::ExposureFailed {
                    name: plan.package.to_string(),
                    reason: reason(&e),
                };
                warn!("{}", error);
                return (Vec::new(), StageOutcome::Degraded(vec![error.to_string()]));
            }
        };
        if executables.is_empty() {
            debug!("{} has no executables to expose", plan.package);
        }

        let env = match plan.strategy {
            StrategyKind::Native => plan.backend.runtime_env(&plan.install_dir),
            _ => Vec::new(),
        };

        let mut exposed = Vec::new();
        let mut warnings = Vec::new();
        for executable in executables {
            match self
                .exposure
                .expose(&executable.name, &executable.target, &plan.install_dir, &env)
            {
                Ok(()) => exposed.push(executable.name),
                Err(e) => {
                    let error = InstallError::ExposureFailed {
                        name: executable.name,
                        reason: reason(&e),
                    };
                    warn!("{}", error);
                    warnings.push(error.to_string());
                }
            }
        }

        match self.exposure.entries_under(&plan.install_dir) {
            Ok(entries) => {
                for stale in entries.iter().filter(|e| !exposed.contains(&e.name)) {
                    if let Err(e) = self.exposure.unexpose(&stale.name, &plan.install_dir) {
                        warn!("Failed to remove stale link {}: {:#}", stale.name, e);
                    }
                }
            }
            Err(e) => warn!("Failed to scan {:?}: {:#}", self.exposure.bin_dir(), e),
        }

        (exposed, StageOutcome::from_warnings(warnings))
    }

    /// Persist the installed version: the receipt first, then the lockfile.
    pub fn record(
        &self,
        plan: &Plan,
        version: &str,
        executables: &[String],
    ) -> Result<StageOutcome, InstallError> {
        let failed = |e: anyhow::Error| InstallError::StateWriteFailed {
            package: plan.package.to_string(),
            reason: reason(&e),
        };

        let receipt = Receipt {
            source_id: plan.package.source_id(),
            provider: plan.package.provider(),
            version: version.to_string(),
            strategy: plan.strategy,
            executables: executables.to_vec(),
        };
        self.receipts
            .write(&plan.install_dir, &receipt)
            .map_err(failed)?;
        self.lockfile
            .add(&plan.package.source_id(), version)
            .map_err(failed)?;
        Ok(StageOutcome::Completed)
    }

    fn executables(&self, plan: &Plan, version: &str) -> Result<Vec<Executable>> {
        match plan.strategy {
            StrategyKind::ReleaseAsset => self.release_executables(plan, version),
            StrategyKind::Git => self.git_executables(plan, version),
            StrategyKind::Native => self.native_executables(plan, version),
        }
    }

    /// Executables named by the registry entry's `bin` map, if it has one.
    fn declared_executables(
        &self,
        plan: &Plan,
        asset: Option<&AssetDescriptor>,
        version: &str,
    ) -> Result<Option<Vec<Executable>>> {
        let Some(entry) = plan.entry.as_deref().filter(|e| !e.bin.is_empty()) else {
            return Ok(None);
        };
        let mut executables = Vec::with_capacity(entry.bin.len());
        for (name, template) in &entry.bin {
            let target = self.bin_target(plan, template, asset, name, version)?;
            executables.push(Executable {
                name: name.clone(),
                target,
            });
        }
        Ok(Some(executables))
    }

    /// Where a `bin` template points. `<ecosystem>:<name>` means `name` in
    /// the backend's bin dir; anything else is relative to the install dir.
    fn bin_target(
        &self,
        plan: &Plan,
        template: &str,
        asset: Option<&AssetDescriptor>,
        name: &str,
        version: &str,
    ) -> Result<PathBuf> {
        if let Some((ecosystem, command)) = template.split_once(':')
            && ecosystem.parse::<ProviderKind>().is_ok()
            && !command.is_empty()
        {
            return Ok(plan.backend.bin_dir(&plan.install_dir).join(command));
        }

        let relative = match asset {
            Some(asset) => resolve_bin_path(template, asset, name, version),
            None => resolve_template(template, version),
        };
        contained_path(&plan.install_dir, &relative)
    }
}

/// `relative` joined onto `dir`, refusing anything that escapes it.
fn contained_path(dir: &Path, relative: &str) -> Result<PathBuf> {
    let path = normalize_path(&dir.join(relative));
    if Path::new(relative).is_absolute() || !is_path_under(&path, dir) || path == normalize_path(dir) {
        return Err(anyhow!(
            "Executable path {:?} is outside {:?}",
            relative,
            dir
        ));
    }
    Ok(path)
}

/// Executable-looking, non-hidden files in `dir`, in name order.
fn scan_executables<R: Runtime>(
    runtime: &R,
    dir: &Path,
    accept: impl Fn(&str) -> bool,
) -> Result<Vec<Executable>> {
    if !runtime.is_dir(dir) {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for path in runtime.read_dir(dir)? {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if name.starts_with('.') || !accept(&name) || !runtime.is_executable(&path) {
            continue;
        }
        found.push(Executable { name, target: path });
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::backend::executor::MockExecutor;
    use crate::download::MockDownloader;
    use crate::registry::{AssetBin, RegistrySource, Target};
    use crate::runtime::RealRuntime;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    fn tar_gz(path: &str, contents: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, contents).unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn release_entry() -> Arc<RegistryEntry> {
        Arc::new(RegistryEntry {
            name: "tool".into(),
            version: "1.0.0".into(),
            description: None,
            homepage: None,
            licenses: vec![],
            languages: vec![],
            categories: vec![],
            source: RegistrySource {
                id: "github:o/tool".into(),
                assets: vec![AssetDescriptor {
                    target: Target::Single("linux_x64".into()),
                    file: "tool-{{version}}.tar.gz".into(),
                    bin: Some(AssetBin::Single("tool-{{version}}/tool".into())),
                }],
            },
            bin: BTreeMap::from([("tool".to_string(), "{{source.asset.bin}}".to_string())]),
        })
    }

    fn installer(dir: &TempDir, downloader: MockDownloader) -> Installer<RealRuntime> {
        let root = dir.path().join("root");
        let layout = Layout::new(root.clone(), root.join("bin"));
        Installer::new(
            Arc::new(RealRuntime),
            layout,
            Arc::new(downloader),
            GitClient::new(Arc::new(MockExecutor::new())),
            None,
        )
        .with_target("linux_x64")
    }

    fn plan_for(installer: &Installer<RealRuntime>, raw: &str, entry: Option<Arc<RegistryEntry>>, backend: MockBackend) -> Plan {
        let package = PackageRef::parse(raw).unwrap();
        let install_dir = installer.layout().install_dir(&package);
        Plan::new(package, entry, Arc::new(backend), install_dir)
    }

    #[tokio::test]
    async fn test_release_install_places_exposes_and_records() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let archive = tar_gz("tool-1.0.0/tool", b"#!/bin/sh\necho tool\n");
        let mut downloader = MockDownloader::new();
        downloader
            .expect_download()
            .withf(|url, _| url == "https://github.com/o/tool/releases/download/1.0.0/tool-1.0.0.tar.gz")
            .times(1)
            .returning(move |_, dest| {
                fs::write(dest, &archive).unwrap();
                Ok(archive.len() as u64)
            });
        let installer = installer(&dir, downloader);
        let plan = plan_for(&installer, "pkg:github/o/tool", Some(release_entry()), MockBackend::new());
        assert_eq!(plan.strategy, StrategyKind::ReleaseAsset);

        // --- Install ---
        let report = installer.install(&plan, "latest").await.unwrap();

        // --- Verify ---
        assert_eq!(report.version, "1.0.0");
        assert_eq!(report.executables, vec!["tool"]);
        let binary = plan.install_dir.join("tool-1.0.0/tool");
        assert!(RealRuntime.is_executable(&binary));
        assert!(installer.exposure().is_exposed("tool", &binary));
        assert_eq!(
            installer.lockfile().get("github:o/tool").unwrap().unwrap().version,
            "1.0.0"
        );
        let receipt = installer.receipts().read(&plan.install_dir).unwrap().unwrap();
        assert_eq!(receipt.strategy, StrategyKind::ReleaseAsset);
        assert!(!installer.layout().temp_dir(&plan.package).exists());
    }

    #[tokio::test]
    async fn test_release_without_matching_asset_records_nothing() {
        let dir = tempdir().unwrap();
        let installer = installer(&dir, MockDownloader::new()).with_target("win_arm64");
        let plan = plan_for(&installer, "github:o/tool", Some(release_entry()), MockBackend::new());

        let err = installer.install(&plan, "").await.unwrap_err();

        assert!(matches!(err, InstallError::NoMatchingAsset { ref target, .. } if target == "win_arm64"));
        assert!(installer.lockfile().packages().unwrap().is_empty());
        assert!(!plan.install_dir.exists());
    }

    #[tokio::test]
    async fn test_release_missing_binary_is_a_placement_failure() {
        let dir = tempdir().unwrap();
        let archive = tar_gz("other/file", b"x");
        let mut downloader = MockDownloader::new();
        downloader.expect_download().returning(move |_, dest| {
            fs::write(dest, &archive).unwrap();
            Ok(archive.len() as u64)
        });
        let installer = installer(&dir, downloader);
        let plan = plan_for(&installer, "github:o/tool", Some(release_entry()), MockBackend::new());

        let err = installer.install(&plan, "1.0.0").await.unwrap_err();

        assert!(matches!(err, InstallError::PlacementFailed { .. }));
        assert!(installer.lockfile().packages().unwrap().is_empty());
        assert!(!plan.install_dir.exists());
        assert!(!installer.layout().temp_dir(&plan.package).exists());
    }

    #[tokio::test]
    async fn test_failed_reinstall_restores_previous_install() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let good = tar_gz("tool-1.0.0/tool", b"#!/bin/sh\necho 1.0.0\n");
        let broken = tar_gz("tool-1.1.0/README", b"no binary");
        let mut downloader = MockDownloader::new();
        downloader
            .expect_download()
            .withf(|url, _| url.ends_with("/1.0.0/tool-1.0.0.tar.gz"))
            .returning(move |_, dest| {
                fs::write(dest, &good).unwrap();
                Ok(good.len() as u64)
            });
        downloader
            .expect_download()
            .withf(|url, _| url.ends_with("/1.1.0/tool-1.1.0.tar.gz"))
            .returning(move |_, dest| {
                fs::write(dest, &broken).unwrap();
                Ok(broken.len() as u64)
            });
        let installer = installer(&dir, downloader);
        let plan = plan_for(&installer, "github:o/tool", Some(release_entry()), MockBackend::new());
        installer.install(&plan, "1.0.0").await.unwrap();

        // --- Reinstall a release without the binary ---
        let err = installer.install(&plan, "1.1.0").await.unwrap_err();

        // --- Verify ---
        assert!(matches!(err, InstallError::PlacementFailed { .. }));
        let binary = plan.install_dir.join("tool-1.0.0/tool");
        assert!(RealRuntime.is_executable(&binary));
        assert!(!plan.install_dir.join("tool-1.1.0").exists());
        assert!(installer.exposure().is_exposed("tool", &binary));
        assert_eq!(
            installer.receipts().read(&plan.install_dir).unwrap().unwrap().version,
            "1.0.0"
        );
        assert_eq!(
            installer.lockfile().get("github:o/tool").unwrap().unwrap().version,
            "1.0.0"
        );
        assert!(!installer.layout().temp_dir(&plan.package).exists());
    }

    #[tokio::test]
    async fn test_native_install_pins_resolved_version() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let installer = installer(&dir, MockDownloader::new());

        let mut backend = MockBackend::new();
        backend
            .expect_resolve_latest()
            .times(1)
            .returning(|_| Ok("2.3.4".to_string()));
        backend
            .expect_install()
            .withf(|_, version, _| version == "2.3.4")
            .returning(|_, _, install_dir| {
                let bin = install_dir.join("bin");
                fs::create_dir_all(&bin).unwrap();
                fs::write(bin.join("rg"), "#!/bin/sh\n").unwrap();
                RealRuntime.set_permissions(&bin.join("rg"), 0o755).unwrap();
                Ok(())
            });
        backend
            .expect_bin_dir()
            .returning(|install_dir| install_dir.join("bin"));
        backend.expect_should_expose().returning(|_| true);
        backend.expect_runtime_env().returning(|_| Vec::new());
        let plan = plan_for(&installer, "cargo:ripgrep", None, backend);

        // --- Install ---
        let report = installer.install(&plan, "latest").await.unwrap();

        // --- Verify ---
        assert_eq!(report.version, "2.3.4");
        assert_eq!(report.executables, vec!["rg"]);
        let locked = installer.lockfile().get("cargo:ripgrep").unwrap().unwrap();
        assert_eq!(locked.version, "2.3.4");
    }

    #[tokio::test]
    async fn test_native_install_failure_keeps_lockfile_untouched() {
        let dir = tempdir().unwrap();
        let installer = installer(&dir, MockDownloader::new());
        installer.lockfile().add("npm:typescript", "latest").unwrap();

        let mut backend = MockBackend::new();
        backend
            .expect_install()
            .returning(|_, _, _| Err(anyhow!("npm ERR! 404")));
        let plan = plan_for(&installer, "npm:typescript", None, backend);

        let err = installer.install(&plan, "5.4.5").await.unwrap_err();

        assert!(matches!(err, InstallError::PlacementFailed { ref reason, .. } if reason.contains("404")));
        assert_eq!(
            installer.lockfile().get("npm:typescript").unwrap().unwrap().version,
            "latest"
        );
    }

    #[test]
    fn test_contained_path() {
        let dir = Path::new("/data/packages/github/o/r");
        assert_eq!(
            contained_path(dir, "tool-1.0/bin/tool").unwrap(),
            PathBuf::from("/data/packages/github/o/r/tool-1.0/bin/tool")
        );
        assert!(contained_path(dir, "../../x/tool").is_err());
        assert!(contained_path(dir, "/usr/bin/tool").is_err());
        assert!(contained_path(dir, "").is_err());
    }
}
