//! Turning a requested version into a concrete one.

use std::future::Future;

use crate::error::{InstallError, reason};
use crate::source::{PackageRef, is_unresolved};

/// The requested version itself, unless it still needs resolving.
pub fn pinned(requested: &str) -> Option<String> {
    (!is_unresolved(requested)).then(|| requested.trim().to_string())
}

/// Resolve `requested` for `package`.
///
/// A concrete request is returned unchanged without calling `lookup`.
/// Otherwise `lookup` must yield exactly one non-empty version.
pub async fn resolve_with<F, Fut>(
    package: &PackageRef,
    requested: &str,
    lookup: F,
) -> Result<String, InstallError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<String>>,
{
    if let Some(version) = pinned(requested) {
        return Ok(version);
    }

    let failed = |reason: String| InstallError::VersionResolutionFailed {
        package: package.to_string(),
        reason,
    };
    let version = lookup().await.map_err(|e| failed(reason(&e)))?;
    let version = version.trim();
    if version.is_empty() || version == crate::source::LATEST {
        return Err(failed("no usable version reported".to_string()));
    }
    Ok(version.to_string())
}
