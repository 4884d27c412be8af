//! Provider abstraction.
//!
//! A provider is one upstream ecosystem (a language package manager, a git
//! host, or a generic release source). Callers only ever see the uniform
//! [`PackageProvider`] surface; [`ProviderRegistry`] maps a provider name or a
//! source id to the instance that serves it.

mod managed;
mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::InstallError;
use crate::source::PackageRef;

pub use managed::ManagedProvider;
pub use registry::ProviderRegistry;

/// The fixed set of supported providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Cargo,
    Npm,
    Pypi,
    Golang,
    Gem,
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "gitlab")]
    GitLab,
    Codeberg,
    Generic,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 9] = [
        ProviderKind::Cargo,
        ProviderKind::Npm,
        ProviderKind::Pypi,
        ProviderKind::Golang,
        ProviderKind::Gem,
        ProviderKind::GitHub,
        ProviderKind::GitLab,
        ProviderKind::Codeberg,
        ProviderKind::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Cargo => "cargo",
            ProviderKind::Npm => "npm",
            ProviderKind::Pypi => "pypi",
            ProviderKind::Golang => "golang",
            ProviderKind::Gem => "gem",
            ProviderKind::GitHub => "github",
            ProviderKind::GitLab => "gitlab",
            ProviderKind::Codeberg => "codeberg",
            ProviderKind::Generic => "generic",
        }
    }

    /// Providers whose package id is a repository path on a git host.
    pub fn is_git_host(&self) -> bool {
        matches!(
            self,
            ProviderKind::GitHub | ProviderKind::GitLab | ProviderKind::Codeberg
        )
    }

    /// Providers installed through the ecosystem's own package manager.
    pub fn is_native(&self) -> bool {
        matches!(
            self,
            ProviderKind::Cargo
                | ProviderKind::Npm
                | ProviderKind::Pypi
                | ProviderKind::Golang
                | ProviderKind::Gem
        )
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = InstallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lower)
            .ok_or_else(|| InstallError::UnknownProvider(s.to_string()))
    }
}

/// The uniform surface exposed to calling tools. Every call reports plain
/// success or failure; details go to the log.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PackageProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Install `package` at `version` (empty or `latest` resolves the newest)
    /// and record the concrete version in the lockfile.
    async fn install(&self, package: &PackageRef, version: &str) -> bool;

    /// Remove the package, its exposed executables and its lockfile entry.
    async fn remove(&self, package: &PackageRef) -> bool;

    /// Move the package to its newest version.
    async fn update(&self, package: &PackageRef) -> bool;

    /// Reconcile every desired package of this provider.
    async fn sync(&self) -> bool;

    /// Remove installed packages that are no longer desired.
    async fn clean(&self) -> bool;
}
