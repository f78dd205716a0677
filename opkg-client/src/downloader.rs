// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Retrieval of remote feed metadata and package archives. */

use {
    crate::{
        error::{OpkgError, Result},
        io::write_atomic,
    },
    async_trait::async_trait,
    log::debug,
    reqwest::{Client, ClientBuilder},
    std::{path::Path, time::Duration},
    url::Url,
};

/// Default HTTP user agent string.
pub const USER_AGENT: &str = "opkg-client Rust crate (https://crates.io/crates/opkg-client)";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport abstraction consumed by feed acquisition and downloads.
///
/// Implementations only need [Self::get_bytes]; [Self::download_to_file]
/// has a default implementation with the atomic-write discipline the cache
/// directory relies on.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch a URL and return the whole response body.
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>>;

    /// Fetch a URL into a file.
    ///
    /// Content is staged at `<path>.tmp` and renamed into place; parent
    /// directories are created.
    async fn download_to_file(&self, url: &str, path: &Path) -> Result<()> {
        debug!("downloader: downloading {} to {}", url, path.display());
        let data = self.get_bytes(url).await?;
        write_atomic(path, &data)?;
        debug!("downloader: download completed for {}", path.display());

        Ok(())
    }
}

#[async_trait]
impl<D: Downloader + ?Sized> Downloader for std::sync::Arc<D> {
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        (**self).get_bytes(url).await
    }

    async fn download_to_file(&self, url: &str, path: &Path) -> Result<()> {
        (**self).download_to_file(url, path).await
    }
}

/// [Downloader] backed by an HTTP client.
#[derive(Debug)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    /// Construct an instance with the default request timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Construct an instance with an explicit per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = ClientBuilder::new()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!("downloader: fetching {}", url);
        let url = Url::parse(url)?;

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OpkgError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }

        let body = response.bytes().await?;
        debug!("downloader: received {} bytes from {}", body.len(), url);

        Ok(body.to_vec())
    }
}
