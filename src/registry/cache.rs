//! Read-through cache over the registry file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};

use super::RegistryEntry;
use crate::http::HttpClient;
use crate::runtime::Runtime;
use crate::source::normalize;

type Snapshot = Arc<HashMap<String, Arc<RegistryEntry>>>;

/// Registry entries keyed by current-form source id.
///
/// The file is parsed on first access. Readers share one immutable snapshot;
/// a refresh builds a new snapshot and swaps it in.
pub struct RegistryIndex<R: Runtime> {
    runtime: Arc<R>,
    path: PathBuf,
    snapshot: RwLock<Option<Snapshot>>,
}

impl<R: Runtime> RegistryIndex<R> {
    pub fn new(runtime: Arc<R>, path: PathBuf) -> Self {
        Self {
            runtime,
            path,
            snapshot: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up the entry for a source id given in either identifier form.
    pub fn get(&self, source_id: &str) -> Result<Option<Arc<RegistryEntry>>> {
        let entries = self.entries()?;
        Ok(entries.get(&normalize(source_id)).cloned())
    }

    /// The current snapshot, loading it from disk on first use.
    pub fn entries(&self) -> Result<Snapshot> {
        {
            let guard = self
                .snapshot
                .read()
                .map_err(|_| anyhow!("Registry cache lock poisoned"))?;
            if let Some(snapshot) = guard.as_ref() {
                return Ok(Arc::clone(snapshot));
            }
        }
        self.refresh()
    }

    /// Re-read the registry file and replace the snapshot.
    #[tracing::instrument(skip(self))]
    pub fn refresh(&self) -> Result<Snapshot> {
        let entries = if self.runtime.exists(&self.path) {
            let content = self
                .runtime
                .read_to_string(&self.path)
                .with_context(|| format!("Failed to read registry {:?}", self.path))?;
            serde_json::from_str::<Vec<RegistryEntry>>(&content)
                .with_context(|| format!("Failed to parse registry {:?}", self.path))?
        } else {
            debug!("No registry file at {:?}, using an empty index", self.path);
            Vec::new()
        };
        self.install_snapshot(entries)
    }

    /// Download the registry from `url`, persist it and replace the snapshot.
    /// Returns the number of indexed entries.
    #[tracing::instrument(skip(self, http))]
    pub async fn refresh_from(&self, http: &HttpClient, url: &str) -> Result<usize> {
        info!("Refreshing registry from {}...", url);
        let entries: Vec<RegistryEntry> = http
            .get_json(url)
            .await
            .with_context(|| format!("Failed to download registry from {}", url))?;

        if let Some(parent) = self.path.parent() {
            self.runtime.create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&entries)?;
        self.runtime
            .write(&self.path, json.as_bytes())
            .with_context(|| format!("Failed to write registry {:?}", self.path))?;

        let snapshot = self.install_snapshot(entries)?;
        info!("Registry now has {} entries.", snapshot.len());
        Ok(snapshot.len())
    }

    fn install_snapshot(&self, entries: Vec<RegistryEntry>) -> Result<Snapshot> {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            let key = normalize(&entry.source.id);
            if let Some(previous) = map.insert(key.clone(), Arc::new(entry)) {
                warn!(
                    "Registry lists {} more than once, keeping the later entry (dropped '{}')",
                    key, previous.name
                );
            }
        }

        let snapshot: Snapshot = Arc::new(map);
        let mut guard = self
            .snapshot
            .write()
            .map_err(|_| anyhow!("Registry cache lock poisoned"))?;
        *guard = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }
}
