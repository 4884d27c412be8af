//! Provider registry: maps provider names and source ids to provider instances.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};

use super::{PackageProvider, ProviderKind};
use crate::source::PackageRef;

/// Registry of the providers available to the calling layer.
///
/// The registry allows:
/// - Registering providers by kind
/// - Resolving the provider for a raw source id in either identifier form
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn PackageProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Register a provider. A provider already registered for the same kind
    /// is replaced.
    pub fn register(&mut self, provider: Arc<dyn PackageProvider>) {
        let kind = provider.kind();
        self.providers.insert(kind, provider);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&Arc<dyn PackageProvider>> {
        self.providers.get(&kind)
    }

    /// Look up a provider by name (`"cargo"`, `"GitHub"`, ...).
    pub fn by_name(&self, name: &str) -> Result<&Arc<dyn PackageProvider>> {
        let kind: ProviderKind = name.parse()?;
        self.get(kind)
            .with_context(|| format!("No provider registered for kind: {}", kind))
    }

    /// Parse a raw source id and return the provider serving it together with
    /// the parsed reference. Invalid identifiers are rejected here, before any
    /// provider sees them.
    pub fn dispatch(&self, raw: &str) -> Result<(&Arc<dyn PackageProvider>, PackageRef)> {
        let package = PackageRef::parse(raw)?;
        let provider = self.get(package.provider()).with_context(|| {
            format!("No provider registered for kind: {}", package.provider())
        })?;
        Ok((provider, package))
    }

    /// Registered kinds in a stable order.
    pub fn registered_kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.providers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
