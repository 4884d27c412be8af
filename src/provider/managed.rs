//! [`PackageProvider`] backed by the shared reconciliation engine.

use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info, warn};

use super::{PackageProvider, ProviderKind, ProviderRegistry};
use crate::engine::Engine;
use crate::runtime::Runtime;
use crate::source::PackageRef;

/// One provider kind served by an [`Engine`]. Errors are logged and folded
/// into `false`.
pub struct ManagedProvider<R: Runtime + 'static> {
    kind: ProviderKind,
    engine: Arc<Engine<R>>,
}

impl<R: Runtime + 'static> ManagedProvider<R> {
    pub fn new(kind: ProviderKind, engine: Arc<Engine<R>>) -> Self {
        Self { kind, engine }
    }

    /// A registry holding a managed provider for every kind.
    pub fn registry(engine: Arc<Engine<R>>) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for kind in ProviderKind::ALL {
            registry.register(Arc::new(Self::new(kind, engine.clone())));
        }
        registry
    }

    fn accepts(&self, package: &PackageRef) -> bool {
        if package.provider() == self.kind {
            return true;
        }
        error!(
            "{} provider cannot handle {}",
            self.kind,
            package.source_id()
        );
        false
    }
}

#[async_trait]
impl<R: Runtime + 'static> PackageProvider for ManagedProvider<R> {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn install(&self, package: &PackageRef, version: &str) -> bool {
        if !self.accepts(package) {
            return false;
        }
        match self.engine.install(package, version).await {
            Ok(report) => {
                for warning in &report.warnings {
                    warn!("{}: {}", package, warning);
                }
                true
            }
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }

    async fn remove(&self, package: &PackageRef) -> bool {
        if !self.accepts(package) {
            return false;
        }
        match self.engine.remove(package).await {
            Ok(()) => true,
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }

    async fn update(&self, package: &PackageRef) -> bool {
        if !self.accepts(package) {
            return false;
        }
        match self.engine.update(package).await {
            Ok(outcome) => {
                info!("{} is at {}", package, outcome.version());
                true
            }
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }

    async fn sync(&self) -> bool {
        match self.engine.sync(self.kind).await {
            Ok(report) => {
                for (source_id, reason) in &report.failed {
                    error!("{}: {}", source_id, reason);
                }
                report.success()
            }
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }

    async fn clean(&self) -> bool {
        match self.engine.clean(self.kind).await {
            Ok(report) => {
                for (source_id, reason) in &report.failed {
                    error!("{}: {}", source_id, reason);
                }
                report.success()
            }
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }
}
