//! Ecosystem backends.
//!
//! A backend is the small capability set the engine needs from one
//! ecosystem: detect its tool, resolve the newest version, fetch and place a
//! package, and describe where the package's executables end up. All
//! reconciliation logic lives in the engine; backends only translate those
//! requests into tool invocations.

pub mod executor;
mod generic;
mod git;
mod native;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::provider::ProviderKind;
use crate::source::PackageRef;

pub use executor::{CapturedOutput, CommandSpec, Executor, SystemExecutor, run_checked};
pub use generic::GenericBackend;
pub use git::{GitBackend, GitClient, repository_url};
pub use native::NativeBackend;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    fn provider(&self) -> ProviderKind;

    /// Name of the external tool this backend drives, if any.
    fn required_tool(&self) -> Option<String>;

    /// Whether the required tool can be run.
    async fn is_available(&self) -> bool;

    /// Newest published version of `package`.
    async fn resolve_latest(&self, package: &PackageRef) -> Result<String>;

    /// Fetch `package` at `version` and place it in `install_dir`. An empty
    /// version lets the tool pick its default.
    async fn install(&self, package: &PackageRef, version: &str, install_dir: &Path) -> Result<()>;

    /// Version the tool reports as installed in `install_dir`; `None` when
    /// the tool cannot tell.
    async fn installed_version(
        &self,
        package: &PackageRef,
        install_dir: &Path,
    ) -> Result<Option<String>>;

    /// Directory the tool places executables in.
    fn bin_dir(&self, install_dir: &Path) -> PathBuf;

    /// Environment an executable needs at run time. Non-empty means it is
    /// exposed through a wrapper script.
    fn runtime_env(&self, install_dir: &Path) -> Vec<(String, String)>;

    /// Whether a file found in the bin dir is one of the package's commands.
    fn should_expose(&self, file_name: &str) -> bool;
}

/// Build the default backend for every provider.
pub fn default_backends(executor: Arc<dyn Executor>) -> Vec<Arc<dyn Backend>> {
    ProviderKind::ALL
        .into_iter()
        .map(|kind| -> Arc<dyn Backend> {
            if kind.is_native() {
                Arc::new(NativeBackend::new(kind, executor.clone()))
            } else if kind.is_git_host() {
                Arc::new(GitBackend::new(kind, GitClient::new(executor.clone())))
            } else {
                Arc::new(GenericBackend)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backends_cover_every_provider() {
        let executor: Arc<dyn Executor> = Arc::new(SystemExecutor);
        let backends = default_backends(executor);

        let kinds: Vec<_> = backends.iter().map(|b| b.provider()).collect();
        assert_eq!(kinds, ProviderKind::ALL.to_vec());

        let generic = backends.last().unwrap();
        assert_eq!(generic.required_tool(), None);
    }
}
