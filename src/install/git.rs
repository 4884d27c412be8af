//! Git strategy: clone or fetch, check out the resolved ref, expose whatever
//! the repository ships in its usual output folders.

use anyhow::{Result, anyhow};
use log::debug;

use super::{Executable, Installer, Pipeline, Plan, ResolvedVersion, StageOutcome, pinned, resolve_with};
use crate::backend::repository_url;
use crate::error::{InstallError, reason};
use crate::runtime::Runtime;

/// Folders searched for an executable, relative to the repository root.
const EXPOSE_LOCATIONS: [&str; 5] = ["bin", "target/release", "dist", "build", ""];

impl<R: Runtime + 'static> Installer<R> {
    /// A concrete request is used as-is. Otherwise the repository is brought
    /// up to date and the newest tag is used, or the default branch when
    /// there are no tags.
    pub(super) async fn resolve_git(
        &self,
        plan: &Plan,
        requested: &str,
    ) -> Result<ResolvedVersion, InstallError> {
        if let Some(version) = pinned(requested) {
            return Ok(ResolvedVersion::new(version));
        }

        self.git_sync(plan).await?;
        let dir = plan.install_dir.as_path();
        let version = resolve_with(&plan.package, requested, || async {
            match self.git.latest_tag(dir).await {
                Ok(Some(tag)) => Ok(tag),
                Ok(None) => {
                    debug!("{} has no tags, using the default branch", plan.package);
                    self.git.default_branch(dir).await
                }
                Err(e) => Err(e),
            }
        })
        .await?;

        Ok(ResolvedVersion {
            version,
            prefetched: true,
        })
    }

    pub(super) async fn git_fetch_and_place(
        &self,
        plan: &Plan,
        resolved: &ResolvedVersion,
        pipeline: &mut Pipeline,
    ) -> Result<(), InstallError> {
        let fetched = if resolved.prefetched {
            Ok(StageOutcome::Completed)
        } else {
            self.git_sync(plan).await.map(|_| StageOutcome::Completed)
        };
        pipeline.advance(fetched)?;

        let placed = plan
            .backend
            .install(&plan.package, &resolved.version, &plan.install_dir)
            .await
            .map(|_| StageOutcome::Completed)
            .map_err(|e| InstallError::PlacementFailed {
                package: plan.package.to_string(),
                reason: reason(&e),
            });
        pipeline.advance(placed)
    }

    /// Clone when the install dir is new, fetch otherwise.
    async fn git_sync(&self, plan: &Plan) -> Result<(), InstallError> {
        let fetch_failed = |reason: String| InstallError::FetchFailed {
            package: plan.package.to_string(),
            reason,
        };
        let url = repository_url(plan.package.provider(), plan.package.package_id())
            .ok_or_else(|| fetch_failed("not hosted on a git forge".to_string()))?;
        self.git
            .clone_or_fetch(&url, &plan.install_dir)
            .await
            .map_err(|e| fetch_failed(reason(&e)))
    }

    /// The entry's `bin` map when present; otherwise the first executable in
    /// each conventional output folder.
    pub(super) fn git_executables(&self, plan: &Plan, version: &str) -> Result<Vec<Executable>> {
        if let Some(declared) = self.declared_executables(plan, None, version)? {
            return Ok(declared);
        }

        let mut executables: Vec<Executable> = Vec::new();
        for location in EXPOSE_LOCATIONS {
            let dir = plan.install_dir.join(location);
            let found = super::scan_executables(self.runtime.as_ref(), &dir, |_| true)
                .map_err(|e| anyhow!("Failed to scan {:?}: {:#}", dir, e))?;
            if let Some(first) = found.into_iter().next()
                && !executables.iter().any(|e| e.name == first.name)
            {
                executables.push(first);
            }
        }
        Ok(executables)
    }
}
