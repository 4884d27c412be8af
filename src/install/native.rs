//! Native strategy: the ecosystem's own installer does the fetching and
//! placing.

use anyhow::Result;
use log::warn;

use super::{Executable, Installer, Pipeline, Plan, ResolvedVersion, StageOutcome, resolve_with};
use crate::error::{InstallError, reason};
use crate::runtime::Runtime;

impl<R: Runtime + 'static> Installer<R> {
    pub(super) async fn resolve_native(
        &self,
        plan: &Plan,
        requested: &str,
    ) -> Result<ResolvedVersion, InstallError> {
        let version = resolve_with(&plan.package, requested, || {
            plan.backend.resolve_latest(&plan.package)
        })
        .await?;
        Ok(ResolvedVersion::new(version))
    }

    pub(super) async fn native_fetch_and_place(
        &self,
        plan: &Plan,
        version: &str,
        pipeline: &mut Pipeline,
    ) -> Result<(), InstallError> {
        let placement_failed = |e: anyhow::Error| InstallError::PlacementFailed {
            package: plan.package.to_string(),
            reason: reason(&e),
        };

        self.runtime
            .create_dir_all(&plan.install_dir)
            .map_err(placement_failed)?;
        let installed = plan
            .backend
            .install(&plan.package, version, &plan.install_dir)
            .await
            .map(|_| StageOutcome::Completed)
            .map_err(placement_failed);
        pipeline.advance(installed)?;

        let bin_dir = plan.backend.bin_dir(&plan.install_dir);
        let placed = if self.runtime.is_dir(&bin_dir) {
            StageOutcome::Completed
        } else {
            let warning = format!("{} produced no bin directory at {:?}", plan.package, bin_dir);
            warn!("{}", warning);
            StageOutcome::Degraded(vec![warning])
        };
        pipeline.advance(Ok(placed))
    }

    /// The entry's `bin` map when present; otherwise every command the
    /// backend placed in its bin dir.
    pub(super) fn native_executables(&self, plan: &Plan, version: &str) -> Result<Vec<Executable>> {
        if let Some(declared) = self.declared_executables(plan, None, version)? {
            return Ok(declared);
        }
        let bin_dir = plan.backend.bin_dir(&plan.install_dir);
        super::scan_executables(self.runtime.as_ref(), &bin_dir, |name| {
            plan.backend.should_expose(name)
        })
    }
}
