//! Release-asset strategy: download the platform's asset, unpack it and move
//! the result into the install dir.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};

use super::{Executable, Installer, Pipeline, Plan, ResolvedVersion, StageOutcome, resolve_with};
use crate::archive::{ArchiveExtractor, EXECUTABLE_MODE};
use crate::asset::{match_asset, resolve_bin_path, resolve_template};
use crate::cleanup::TempWorkspace;
use crate::error::{InstallError, reason};
use crate::provider::ProviderKind;
use crate::registry::{AssetBin, AssetDescriptor, RegistryEntry};
use crate::runtime::Runtime;

/// Download URL of a release file.
///
/// An absolute `http(s)` file is used as-is; otherwise the URL is derived
/// from the git host. Other providers have no release URL scheme.
pub fn release_url(provider: ProviderKind, package_id: &str, version: &str, file: &str) -> Option<String> {
    if file.starts_with("https://") || file.starts_with("http://") {
        return Some(file.to_string());
    }
    match provider {
        ProviderKind::GitHub => Some(format!(
            "https://github.com/{}/releases/download/{}/{}",
            package_id, version, file
        )),
        ProviderKind::GitLab => Some(format!(
            "https://gitlab.com/{}/-/releases/{}/downloads/{}",
            package_id, version, file
        )),
        ProviderKind::Codeberg => Some(format!(
            "https://codeberg.org/{}/releases/download/{}/{}",
            package_id, version, file
        )),
        _ => None,
    }
}

/// File name a download is saved under: the last URL path segment.
fn artifact_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("artifact")
        .to_string()
}

impl<R: Runtime + 'static> Installer<R> {
    /// An explicit request wins, then the registry's declared version, then
    /// the backend's newest release.
    pub(super) async fn resolve_release(
        &self,
        plan: &Plan,
        requested: &str,
    ) -> Result<ResolvedVersion, InstallError> {
        let declared = plan
            .entry
            .as_deref()
            .map(|e| e.version.trim().to_string())
            .filter(|v| !v.is_empty());

        let version = resolve_with(&plan.package, requested, move || async move {
            match declared {
                Some(version) => Ok(version),
                None => plan.backend.resolve_latest(&plan.package).await,
            }
        })
        .await?;
        Ok(ResolvedVersion::new(version))
    }

    pub(super) async fn release_fetch_and_place(
        &self,
        plan: &Plan,
        version: &str,
        pipeline: &mut Pipeline,
    ) -> Result<(), InstallError> {
        let package = plan.package.to_string();
        let fetch_failed = |reason: String| InstallError::FetchFailed {
            package: package.clone(),
            reason,
        };

        let entry = self.release_entry(plan).map_err(|e| fetch_failed(reason(&e)))?;
        let asset = self.select_asset(plan, entry)?;
        let file = resolve_template(&asset.file, version);
        let url = release_url(plan.package.provider(), plan.package.package_id(), version, &file)
            .ok_or_else(|| {
                fetch_failed(format!("{} releases need an absolute asset URL", plan.package.provider()))
            })?;

        let workspace = TempWorkspace::create(
            self.runtime.clone(),
            self.layout.temp_dir(&plan.package),
            self.cleanup.clone(),
        )
        .map_err(|e| fetch_failed(reason(&e)))?;
        let artifact = workspace.join("download").join(artifact_name(&url));

        let fetched = self
            .fetch_artifact(&url, &artifact)
            .await
            .map(|_| StageOutcome::Completed)
            .map_err(|e| fetch_failed(reason(&e)));
        pipeline.advance(fetched)?;

        let extract_dir = workspace.join("extract");
        let previous = workspace.join("previous");
        let placed = self.place_release(plan, asset, version, &artifact, &extract_dir, &previous);
        pipeline.advance(placed)?;
        Ok(())
    }

    async fn fetch_artifact(&self, url: &str, artifact: &Path) -> Result<u64> {
        if let Some(parent) = artifact.parent() {
            self.runtime.create_dir_all(parent)?;
        }
        let bytes = self.downloader.download(url, artifact).await?;
        debug!("Downloaded {} bytes to {:?}", bytes, artifact);
        Ok(bytes)
    }

    /// Unpack the artifact, move the tree into the install dir and mark every
    /// declared executable runnable. An existing install is parked at
    /// `previous` meanwhile and put back if anything fails.
    fn place_release(
        &self,
        plan: &Plan,
        asset: &AssetDescriptor,
        version: &str,
        artifact: &Path,
        extract_dir: &Path,
        previous: &Path,
    ) -> Result<StageOutcome, InstallError> {
        let package = plan.package.to_string();

        self.extractor
            .unpack(self.runtime.as_ref(), artifact, extract_dir)
            .map_err(|e| InstallError::ExtractFailed {
                package: package.clone(),
                reason: reason(&e),
            })?;

        let placement_failed = |e: anyhow::Error| InstallError::PlacementFailed {
            package: package.clone(),
            reason: reason(&e),
        };

        let parked = self
            .park_install_dir(&plan.install_dir, previous)
            .map_err(placement_failed)?;

        if let Err(e) = self.move_into_place(plan, asset, version, extract_dir) {
            self.roll_back(&plan.install_dir, parked.then_some(previous));
            return Err(placement_failed(e));
        }

        info!("Placed {} into {:?}", plan.package, plan.install_dir);
        Ok(StageOutcome::Completed)
    }

    fn move_into_place(
        &self,
        plan: &Plan,
        asset: &AssetDescriptor,
        version: &str,
        extract_dir: &Path,
    ) -> Result<()> {
        if let Some(parent) = plan.install_dir.parent() {
            self.runtime.create_dir_all(parent)?;
        }
        self.runtime.rename(extract_dir, &plan.install_dir)?;

        for executable in self.release_executables_for(plan, asset, version)? {
            if !self.runtime.is_file(&executable.target) {
                return Err(anyhow!(
                    "Executable {} not found at {:?}",
                    executable.name,
                    executable.target
                ));
            }
            self.runtime
                .set_permissions(&executable.target, EXECUTABLE_MODE)?;
        }
        Ok(())
    }

    /// Move an existing install out of the way. Returns whether there was one.
    fn park_install_dir(&self, install_dir: &Path, previous: &Path) -> Result<bool> {
        if !self.runtime.exists(install_dir) {
            return Ok(false);
        }
        self.runtime
            .rename(install_dir, previous)
            .with_context(|| format!("Failed to move previous install {:?} aside", install_dir))?;
        Ok(true)
    }

    /// Drop a half-placed tree and put the parked install back, if any.
    fn roll_back(&self, install_dir: &Path, previous: Option<&Path>) {
        if self.runtime.exists(install_dir)
            && let Err(e) = self.runtime.remove_dir_all(install_dir)
        {
            warn!("Failed to clear {:?}: {:#}", install_dir, e);
            return;
        }
        let Some(previous) = previous else {
            return;
        };
        match self.runtime.rename(previous, install_dir) {
            Ok(()) => debug!("Restored previous install at {:?}", install_dir),
            Err(e) => warn!("Failed to restore previous install {:?}: {:#}", install_dir, e),
        }
    }

    pub(super) fn release_executables(&self, plan: &Plan, version: &str) -> Result<Vec<Executable>> {
        let entry = self.release_entry(plan)?;
        let asset = match_asset(&entry.source.assets, &self.target)
            .ok_or_else(|| anyhow!("No asset matches target {}", self.target))?;
        self.release_executables_for(plan, asset, version)
    }

    /// The entry's `bin` map when present, else the binaries the asset
    /// declares, else the downloaded file itself when it is not an archive.
    fn release_executables_for(
        &self,
        plan: &Plan,
        asset: &AssetDescriptor,
        version: &str,
    ) -> Result<Vec<Executable>> {
        if let Some(declared) = self.declared_executables(plan, Some(asset), version)? {
            return Ok(declared);
        }

        let mut executables = Vec::new();
        match &asset.bin {
            Some(AssetBin::Single(_)) => {
                let relative = resolve_bin_path("{{source.asset.bin}}", asset, "", version);
                let target = super::contained_path(&plan.install_dir, &relative)?;
                let name = file_name_of(&target).unwrap_or_else(|| plan.package.short_name().to_string());
                executables.push(Executable { name, target });
            }
            Some(AssetBin::Named(bins)) => {
                for name in bins.keys() {
                    let template = format!("{{{{source.asset.bin.{}}}}}", name);
                    let relative = resolve_bin_path(&template, asset, name, version);
                    let target = super::contained_path(&plan.install_dir, &relative)?;
                    executables.push(Executable {
                        name: name.clone(),
                        target,
                    });
                }
            }
            None => {
                let file = resolve_template(&asset.file, version);
                let artifact = artifact_name(&file);
                if !self.extractor.can_handle(Path::new(&artifact)) {
                    let name = plan
                        .entry
                        .as_deref()
                        .map(|e| e.name.clone())
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| plan.package.short_name().to_string());
                    executables.push(Executable {
                        name,
                        target: plan.install_dir.join(artifact),
                    });
                }
            }
        }
        Ok(executables)
    }

    fn release_entry<'a>(&self, plan: &'a Plan) -> Result<&'a RegistryEntry> {
        plan.entry
            .as_deref()
            .ok_or_else(|| anyhow!("{} has no registry entry", plan.package))
    }

    fn select_asset<'a>(
        &self,
        plan: &Plan,
        entry: &'a RegistryEntry,
    ) -> Result<&'a AssetDescriptor, InstallError> {
        match_asset(&entry.source.assets, &self.target).ok_or_else(|| InstallError::NoMatchingAsset {
            package: plan.package.to_string(),
            target: self.target.clone(),
        })
    }
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}
