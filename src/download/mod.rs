//! Fetching remote artifacts to a local path.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;

use crate::http::HttpClient;
use crate::runtime::Runtime;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url` to `dest`, returning the number of bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Downloads over HTTP, writing through the runtime.
pub struct HttpDownloader<R: Runtime> {
    runtime: Arc<R>,
    http: HttpClient,
}

impl<R: Runtime> HttpDownloader<R> {
    pub fn new(runtime: Arc<R>, http: HttpClient) -> Self {
        Self { runtime, http }
    }
}

#[async_trait]
impl<R: Runtime + 'static> Downloader for HttpDownloader<R> {
    #[tracing::instrument(skip(self))]
    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        info!("Downloading {}...", url);

        let bytes = self
            .http
            .download_file(url, || {
                self.runtime
                    .create_file(dest)
                    .with_context(|| format!("Failed to create file at {:?}", dest))
            })
            .await?;

        info!("Download complete.");
        Ok(bytes)
    }
}
