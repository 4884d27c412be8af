use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::install::StrategyKind;
use crate::provider::ProviderKind;
use crate::runtime::Runtime;

pub const RECEIPT_FILE: &str = ".provi-receipt.json";

/// What a successful install left behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub source_id: String,
    pub provider: ProviderKind,
    pub version: String,
    pub strategy: StrategyKind,
    #[serde(default)]
    pub executables: Vec<String>,
}

/// Reads and writes receipts inside install directories.
pub struct ReceiptStore<R: Runtime> {
    runtime: Arc<R>,
}

impl<R: Runtime> ReceiptStore<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self { runtime }
    }

    pub fn path(install_dir: &Path) -> PathBuf {
        install_dir.join(RECEIPT_FILE)
    }

    pub fn read(&self, install_dir: &Path) -> Result<Option<Receipt>> {
        let path = Self::path(install_dir);
        if !self.runtime.exists(&path) {
            return Ok(None);
        }
        let content = self.runtime.read_to_string(&path)?;
        let receipt = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse receipt {:?}", path))?;
        Ok(Some(receipt))
    }

    #[tracing::instrument(skip(self, receipt))]
    pub fn write(&self, install_dir: &Path, receipt: &Receipt) -> Result<()> {
        let path = Self::path(install_dir);
        let json = serde_json::to_string_pretty(receipt)?;
        self.runtime
            .write(&path, json.as_bytes())
            .with_context(|| format!("Failed to write receipt {:?}", path))
    }

    /// Every receipt directly below `provider_root`, with its install dir.
    /// Unreadable receipts are skipped with a warning.
    #[tracing::instrument(skip(self))]
    pub fn discover(&self, provider_root: &Path) -> Result<Vec<(PathBuf, Receipt)>> {
        let mut found = Vec::new();
        if !self.runtime.is_dir(provider_root) {
            return Ok(found);
        }

        for dir in self.runtime.read_dir(provider_root)? {
            let hidden = dir
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with('.'));
            if hidden || self.runtime.is_symlink(&dir) || !self.runtime.is_dir(&dir) {
                continue;
            }
            match self.read(&dir) {
                Ok(Some(receipt)) => found.push((dir, receipt)),
                Ok(None) => {}
                Err(e) => warn!("Skipping {:?}: {:#}", dir, e),
            }
        }
        Ok(found)
    }
}
