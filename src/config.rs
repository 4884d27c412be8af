//! Paths and service wiring.
//!
//! `Config` only holds resolved paths and URLs. The services the engine
//! needs (HTTP client, downloader, backends) are built from it but are not
//! part of it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use log::debug;
use reqwest::Client;

use crate::backend::{Executor, GitClient, SystemExecutor, default_backends};
use crate::cleanup::SharedCleanupContext;
use crate::download::HttpDownloader;
use crate::engine::Engine;
use crate::http::HttpClient;
use crate::install::Installer;
use crate::package::Layout;
use crate::provider::{ManagedProvider, ProviderRegistry};
use crate::registry::RegistryIndex;
use crate::runtime::Runtime;

const APP_DIR: &str = "provi";
const HOME_APP_DIR: &str = ".provi";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub root: PathBuf,
    pub bin_dir: PathBuf,
    pub registry_path: PathBuf,
    pub registry_url: Option<String>,
}

impl Config {
    /// Fill every field not given explicitly from its default.
    pub fn resolve<R: Runtime>(
        runtime: &R,
        root: Option<PathBuf>,
        bin_dir: Option<PathBuf>,
        registry_path: Option<PathBuf>,
        registry_url: Option<String>,
    ) -> Result<Self> {
        let root = match root {
            Some(root) => root,
            None => default_root(runtime)?,
        };
        let bin_dir = bin_dir.unwrap_or_else(|| root.join("bin"));
        let registry_path = registry_path.unwrap_or_else(|| root.join("registry.json"));
        debug!("Using root {:?}, bin dir {:?}", root, bin_dir);
        Ok(Self {
            root,
            bin_dir,
            registry_path,
            registry_url: registry_url.filter(|url| !url.trim().is_empty()),
        })
    }

    pub fn layout(&self) -> Layout {
        Layout::new(self.root.clone(), self.bin_dir.clone())
    }
}

fn default_root<R: Runtime>(runtime: &R) -> Result<PathBuf> {
    if let Some(data) = runtime.data_dir() {
        return Ok(data.join(APP_DIR));
    }
    runtime
        .home_dir()
        .map(|home| home.join(HOME_APP_DIR))
        .ok_or_else(|| anyhow!("Cannot determine a data directory; pass --root"))
}

pub fn build_http_client() -> Result<HttpClient> {
    let client = Client::builder()
        .user_agent(concat!("provi/", env!("PROVI_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    Ok(HttpClient::new(client))
}

/// Everything a command needs, built once per process.
pub struct Services<R: Runtime + 'static> {
    pub engine: Arc<Engine<R>>,
    pub registry: Arc<RegistryIndex<R>>,
    pub providers: ProviderRegistry,
    pub http: HttpClient,
}

impl<R: Runtime + 'static> Services<R> {
    pub fn build(config: &Config, runtime: Arc<R>, cleanup: SharedCleanupContext) -> Result<Self> {
        let http = build_http_client()?;
        let executor: Arc<dyn Executor> = Arc::new(SystemExecutor);
        let registry = Arc::new(RegistryIndex::new(
            runtime.clone(),
            config.registry_path.clone(),
        ));
        let installer = Installer::new(
            runtime.clone(),
            config.layout(),
            Arc::new(HttpDownloader::new(runtime.clone(), http.clone())),
            GitClient::new(executor.clone()),
            Some(cleanup),
        );
        let engine = Arc::new(Engine::new(
            runtime,
            registry.clone(),
            default_backends(executor),
            installer,
        ));
        Ok(Self {
            providers: ManagedProvider::registry(engine.clone()),
            engine,
            registry,
            http,
        })
    }
}
