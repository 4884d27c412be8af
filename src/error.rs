//! Error taxonomy for package operations.
//!
//! Plumbing code returns `anyhow::Result`; the install pipeline converts those
//! failures into an [`InstallError`] at each stage boundary so the engine can
//! decide structurally whether to abort a package, a provider, or nothing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("invalid source identifier '{raw}': {reason}")]
    InvalidIdentifier { raw: String, reason: String },

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("required tool '{tool}' for provider {provider} is not available")]
    BackendUnavailable { provider: String, tool: String },

    #[error("failed to create install root {path}: {reason}")]
    InstallRootUnavailable { path: String, reason: String },

    #[error("failed to resolve version of {package}: {reason}")]
    VersionResolutionFailed { package: String, reason: String },

    #[error("no asset of {package} matches target {target}")]
    NoMatchingAsset { package: String, target: String },

    #[error("failed to fetch {package}: {reason}")]
    FetchFailed { package: String, reason: String },

    #[error("failed to extract {package}: {reason}")]
    ExtractFailed { package: String, reason: String },

    #[error("failed to place {package}: {reason}")]
    PlacementFailed { package: String, reason: String },

    #[error("failed to expose {name}: {reason}")]
    ExposureFailed { name: String, reason: String },

    #[error("failed to record state of {package}: {reason}")]
    StateWriteFailed { package: String, reason: String },

    #[error("failed to read state of {scope}: {reason}")]
    StateReadFailed { scope: String, reason: String },
}

impl InstallError {
    /// Errors that stop every package of a provider, not just the current one.
    pub fn is_fatal_for_provider(&self) -> bool {
        matches!(
            self,
            InstallError::BackendUnavailable { .. } | InstallError::InstallRootUnavailable { .. }
        )
    }
}

/// Render an `anyhow` chain on one line for embedding in an [`InstallError`].
pub(crate) fn reason(error: &anyhow::Error) -> String {
    format!("{:#}", error)
}
