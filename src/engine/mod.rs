//! Reconciliation of desired packages against what is installed.
//!
//! The engine owns no ecosystem knowledge. It picks a plan per package,
//! checks preconditions, compares the resolved version with the installed
//! one and hands real work to the [`Installer`]. Packages are processed one
//! after another; one package failing never stops the others.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::backend::Backend;
use crate::error::{InstallError, reason};
use crate::install::{InstallReport, Installer, Plan, StrategyKind};
use crate::package::LockedPackage;
use crate::provider::ProviderKind;
use crate::registry::{RegistryEntry, RegistryIndex};
use crate::runtime::Runtime;
use crate::source::{LATEST, PackageRef, normalize};

/// Result of reconciling one package.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    Installed(InstallReport),
    /// Already at the resolved version; links were repaired.
    UpToDate { version: String },
}

impl Reconciled {
    pub fn version(&self) -> &str {
        match self {
            Reconciled::Installed(report) => &report.version,
            Reconciled::UpToDate { version } => version,
        }
    }
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub installed: Vec<String>,
    pub up_to_date: Vec<String>,
    /// Source id and rendered error of every package that failed.
    pub failed: Vec<(String, String)>,
}

impl SyncReport {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct CleanReport {
    pub removed: Vec<String>,
    pub unlinked: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl CleanReport {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Engine<R: Runtime + 'static> {
    runtime: Arc<R>,
    registry: Arc<RegistryIndex<R>>,
    backends: HashMap<ProviderKind, Arc<dyn Backend>>,
    installer: Installer<R>,
}

impl<R: Runtime + 'static> Engine<R> {
    pub fn new(
        runtime: Arc<R>,
        registry: Arc<RegistryIndex<R>>,
        backends: Vec<Arc<dyn Backend>>,
        installer: Installer<R>,
    ) -> Self {
        let backends = backends
            .into_iter()
            .map(|backend| (backend.provider(), backend))
            .collect();
        Self {
            runtime,
            registry,
            backends,
            installer,
        }
    }

    pub fn installer(&self) -> &Installer<R> {
        &self.installer
    }

    pub fn registry(&self) -> &RegistryIndex<R> {
        &self.registry
    }

    /// Install `package` and pin the concrete version in the lockfile.
    #[tracing::instrument(skip(self), fields(package = %package))]
    pub async fn install(&self, package: &PackageRef, requested: &str) -> Result<InstallReport, InstallError> {
        let plan = self.plan(package)?;
        self.ensure_available(&plan).await?;
        self.ensure_root(package.provider())?;
        self.installer.install(&plan, requested).await
    }

    /// Unlink, delete and forget `package`. Unlinking is best-effort.
    #[tracing::instrument(skip(self), fields(package = %package))]
    pub async fn remove(&self, package: &PackageRef) -> Result<(), InstallError> {
        let install_dir = self.installer.layout().install_dir(package);

        match self.installer.exposure().unexpose_all_under(&install_dir) {
            Ok(removed) if !removed.is_empty() => debug!("Unlinked {}", removed.join(", ")),
            Ok(_) => {}
            Err(e) => warn!("Failed to unlink executables of {}: {:#}", package, e),
        }

        if self.runtime.exists(&install_dir) {
            self.runtime
                .remove_dir_all(&install_dir)
                .map_err(|e| InstallError::PlacementFailed {
                    package: package.to_string(),
                    reason: reason(&e),
                })?;
        }

        let removed = self
            .installer
            .lockfile()
            .remove(&package.source_id())
            .map_err(|e| InstallError::StateWriteFailed {
                package: package.to_string(),
                reason: reason(&e),
            })?;
        if !removed {
            debug!("{} was not in the lockfile", package);
        }
        info!("Removed {}", package);
        Ok(())
    }

    /// Move `package` to its newest version, or repair it if already there.
    #[tracing::instrument(skip(self), fields(package = %package))]
    pub async fn update(&self, package: &PackageRef) -> Result<Reconciled, InstallError> {
        let plan = self.plan(package)?;
        self.ensure_available(&plan).await?;
        self.ensure_root(package.provider())?;

        let installed = self.installed_version(&plan).await;
        let stored = self.stored_version(package)?;
        self.reconcile(&plan, LATEST, installed.as_deref(), stored.as_deref())
            .await
    }

    /// Bring every desired package of `provider` to its requested version.
    ///
    /// Only a precondition failure (no install root, missing tool) is an
    /// `Err`; per-package failures are collected in the report.
    #[tracing::instrument(skip(self))]
    pub async fn sync(&self, provider: ProviderKind) -> Result<SyncReport, InstallError> {
        self.ensure_root(provider)?;
        let backend = self.backend(provider)?;
        if provider.is_native() {
            self.check_tool(backend.as_ref()).await?;
        }

        let desired = self.desired(provider)?;
        let installed = self.installed_state(provider, &backend).await;
        debug!(
            "{}: {} desired, {} installed",
            provider,
            desired.len(),
            installed.len()
        );

        let planned: Vec<(String, String, Result<Plan, InstallError>)> = desired
            .into_iter()
            .map(|LockedPackage { source_id, version }| {
                let plan = PackageRef::parse(&source_id)
                    .map(|package| self.plan_with(&package, backend.clone()));
                (source_id, version, plan)
            })
            .collect();
        let needs_tool = planned
            .iter()
            .any(|(_, _, plan)| plan.as_ref().is_ok_and(|p| p.strategy.requires_tool()));
        if needs_tool && !provider.is_native() {
            self.check_tool(backend.as_ref()).await?;
        }

        let mut report = SyncReport::default();
        for (source_id, version, plan) in planned {
            let outcome = match plan {
                Ok(plan) => {
                    self.reconcile(
                        &plan,
                        &version,
                        installed.get(&source_id).map(String::as_str),
                        Some(&version),
                    )
                    .await
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(Reconciled::Installed(_)) => report.installed.push(source_id),
                Ok(Reconciled::UpToDate { .. }) => report.up_to_date.push(source_id),
                Err(e) if e.is_fatal_for_provider() => return Err(e),
                Err(e) => {
                    warn!("{}: {}", source_id, e);
                    report.failed.push((source_id, e.to_string()));
                }
            }
        }

        info!(
            "{}: {} installed, {} up to date, {} failed",
            provider,
            report.installed.len(),
            report.up_to_date.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Delete installs of `provider` that are no longer desired, then drop
    /// links into the provider root whose targets are gone.
    #[tracing::instrument(skip(self))]
    pub async fn clean(&self, provider: ProviderKind) -> Result<CleanReport, InstallError> {
        let desired: HashSet<String> = self
            .desired(provider)?
            .into_iter()
            .map(|p| p.source_id)
            .collect();
        let provider_root = self.installer.layout().provider_root(provider);
        let receipts = self
            .installer
            .receipts()
            .discover(&provider_root)
            .map_err(|e| InstallError::StateReadFailed {
                scope: provider.to_string(),
                reason: reason(&e),
            })?;

        let mut report = CleanReport::default();
        for (install_dir, receipt) in receipts {
            let source_id = normalize(&receipt.source_id);
            if desired.contains(&source_id) {
                continue;
            }
            if let Err(e) = self.installer.exposure().unexpose_all_under(&install_dir) {
                warn!("Failed to unlink executables of {}: {:#}", source_id, e);
            }
            match self.runtime.remove_dir_all(&install_dir) {
                Ok(()) => {
                    info!("Removed undesired {}", source_id);
                    report.removed.push(source_id);
                }
                Err(e) => report.failed.push((source_id, format!("{:#}", e))),
            }
        }

        match self.installer.exposure().remove_dangling_under(&provider_root) {
            Ok(unlinked) => report.unlinked = unlinked,
            Err(e) => report
                .failed
                .push((provider.to_string(), format!("{:#}", e))),
        }
        Ok(report)
    }

    /// Resolve, then either install or, when the installed version already
    /// matches, repair links and pin the stored version.
    async fn reconcile(
        &self,
        plan: &Plan,
        requested: &str,
        installed: Option<&str>,
        stored: Option<&str>,
    ) -> Result<Reconciled, InstallError> {
        let resolved = self.installer.resolve(plan, requested).await?;

        if installed == Some(resolved.version.as_str()) {
            debug!("{} is already at {}", plan.package, resolved.version);
            let (executables, _) = self.installer.expose(plan, &resolved.version);
            if stored != Some(resolved.version.as_str()) {
                self.installer
                    .lockfile()
                    .add(&plan.package.source_id(), &resolved.version)
                    .map_err(|e| InstallError::StateWriteFailed {
                        package: plan.package.to_string(),
                        reason: reason(&e),
                    })?;
            }
            debug!("{} exposes {:?}", plan.package, executables);
            return Ok(Reconciled::UpToDate {
                version: resolved.version,
            });
        }

        let report = self.installer.install_resolved(plan, resolved).await?;
        Ok(Reconciled::Installed(report))
    }

    fn backend(&self, provider: ProviderKind) -> Result<Arc<dyn Backend>, InstallError> {
        self.backends
            .get(&provider)
            .cloned()
            .ok_or_else(|| InstallError::UnknownProvider(provider.to_string()))
    }

    fn plan(&self, package: &PackageRef) -> Result<Plan, InstallError> {
        let backend = self.backend(package.provider())?;
        Ok(self.plan_with(package, backend))
    }

    fn plan_with(&self, package: &PackageRef, backend: Arc<dyn Backend>) -> Plan {
        let install_dir = self.installer.layout().install_dir(package);
        Plan::new(package.clone(), self.registry_entry(package), backend, install_dir)
    }

    /// A registry that cannot be read degrades to "no entry".
    fn registry_entry(&self, package: &PackageRef) -> Option<Arc<RegistryEntry>> {
        match self.registry.get(&package.source_id()) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Ignoring registry for {}: {:#}", package, e);
                None
            }
        }
    }

    async fn ensure_available(&self, plan: &Plan) -> Result<(), InstallError> {
        if plan.strategy.requires_tool() {
            self.check_tool(plan.backend.as_ref()).await?;
        }
        Ok(())
    }

    async fn check_tool(&self, backend: &dyn Backend) -> Result<(), InstallError> {
        if backend.is_available().await {
            return Ok(());
        }
        Err(InstallError::BackendUnavailable {
            provider: backend.provider().to_string(),
            tool: backend.required_tool().unwrap_or_default(),
        })
    }

    fn ensure_root(&self, provider: ProviderKind) -> Result<(), InstallError> {
        let root = self.installer.layout().provider_root(provider);
        self.runtime
            .create_dir_all(&root)
            .map_err(|e| InstallError::InstallRootUnavailable {
                path: root.display().to_string(),
                reason: reason(&e),
            })
    }

    fn desired(&self, provider: ProviderKind) -> Result<Vec<LockedPackage>, InstallError> {
        self.installer
            .lockfile()
            .packages_for_provider(provider)
            .map_err(|e| InstallError::StateReadFailed {
                scope: provider.to_string(),
                reason: reason(&e),
            })
    }

    fn stored_version(&self, package: &PackageRef) -> Result<Option<String>, InstallError> {
        self.installer
            .lockfile()
            .get(&package.source_id())
            .map(|locked| locked.map(|l| l.version))
            .map_err(|e| InstallError::StateReadFailed {
                scope: package.to_string(),
                reason: reason(&e),
            })
    }

    /// Receipt versions, overridden by what the backend reports. Failures
    /// only cost accuracy, never the sync.
    async fn installed_state(
        &self,
        provider: ProviderKind,
        backend: &Arc<dyn Backend>,
    ) -> HashMap<String, String> {
        let provider_root = self.installer.layout().provider_root(provider);
        let receipts = match self.installer.receipts().discover(&provider_root) {
            Ok(receipts) => receipts,
            Err(e) => {
                warn!("Failed to read installed state of {}: {:#}", provider, e);
                return HashMap::new();
            }
        };

        let mut installed = HashMap::new();
        for (install_dir, receipt) in receipts {
            let source_id = normalize(&receipt.source_id);
            let mut version = receipt.version;
            if receipt.strategy != StrategyKind::ReleaseAsset
                && let Ok(package) = PackageRef::parse(&source_id)
            {
                match backend.installed_version(&package, &install_dir).await {
                    Ok(Some(reported)) => version = reported,
                    Ok(None) => {}
                    Err(e) => warn!("Failed to query installed {}: {:#}", source_id, e),
                }
            }
            installed.insert(source_id, version);
        }
        installed
    }

    async fn installed_version(&self, plan: &Plan) -> Option<String> {
        let receipt = match self.installer.receipts().read(&plan.install_dir) {
            Ok(receipt) => receipt?,
            Err(e) => {
                warn!("Failed to read receipt of {}: {:#}", plan.package, e);
                return None;
            }
        };
        if receipt.strategy == StrategyKind::ReleaseAsset {
            return Some(receipt.version);
        }
        match plan
            .backend
            .installed_version(&plan.package, &plan.install_dir)
            .await
        {
            Ok(Some(reported)) => Some(reported),
            Ok(None) => Some(receipt.version),
            Err(e) => {
                warn!("Failed to query installed {}: {:#}", plan.package, e);
                Some(receipt.version)
            }
        }
    }
}
