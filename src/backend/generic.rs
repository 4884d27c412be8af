use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use async_trait::async_trait;

use super::Backend;
use crate::provider::ProviderKind;
use crate::source::PackageRef;

/// Backend for packages that only exist as registry release assets.
///
/// There is no tool to ask for the newest version, so a version must come
/// from the registry entry or from the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericBackend;

#[async_trait]
impl Backend for GenericBackend {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Generic
    }

    fn required_tool(&self) -> Option<String> {
        None
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn resolve_latest(&self, package: &PackageRef) -> Result<String> {
        bail!(
            "{} has no version source; pin a version or declare one in the registry",
            package
        )
    }

    async fn install(&self, package: &PackageRef, _version: &str, _install_dir: &Path) -> Result<()> {
        bail!("{} can only be installed from registry release assets", package)
    }

    async fn installed_version(
        &self,
        _package: &PackageRef,
        _install_dir: &Path,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    fn bin_dir(&self, install_dir: &Path) -> PathBuf {
        install_dir.to_path_buf()
    }

    fn runtime_env(&self, _install_dir: &Path) -> Vec<(String, String)> {
        Vec::new()
    }

    fn should_expose(&self, _file_name: &str) -> bool {
        true
    }
}
