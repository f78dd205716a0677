// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The package manager façade.

[PackageManager] wires configuration, the status database, feed indexes
and the downloader together. Construction loads the configuration and the
status database and ensures the cache directory, but never touches the
network; queries that need feed metadata fail with
[OpkgError::IndexesNotLoaded] until [PackageManager::update] succeeds.
*/

use {
    crate::{
        config::Config,
        downloader::{Downloader, HttpDownloader},
        error::{OpkgError, Result},
        repository::{update_feeds, IndexSet, Package},
        status::StatusDatabase,
    },
    log::debug,
    std::path::{Path, PathBuf},
};

/// Coordinates package operations.
pub struct PackageManager {
    config: Config,
    downloader: Box<dyn Downloader>,
    status: StatusDatabase,
    indexes: Option<IndexSet>,
    cache_dir: PathBuf,
}

impl PackageManager {
    /// Create a package manager from a configuration file, using the HTTP
    /// downloader for retrieval.
    pub fn new(config_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_downloader(config_path, Box::new(HttpDownloader::new()?))
    }

    /// Create a package manager with an injected transport.
    pub fn with_downloader(
        config_path: impl AsRef<Path>,
        downloader: Box<dyn Downloader>,
    ) -> Result<Self> {
        let config = Config::load(config_path)?;
        let cache_dir = config.ensure_cache_dir()?;

        let status = match config.status_path() {
            Err(_) => StatusDatabase::empty(),
            Ok(path) => match StatusDatabase::load(&path) {
                Ok(status) => status,
                // A system that never installed anything has no status
                // file; anything else is a real error.
                Err(OpkgError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("manager: no status file at {}", path.display());
                    StatusDatabase::empty()
                }
                Err(e) => return Err(e),
            },
        };

        Ok(Self {
            config,
            downloader,
            status,
            indexes: None,
            cache_dir,
        })
    }

    /// Refresh the remote package metadata.
    ///
    /// Idempotent and repeatable. If any feed fails, the previously loaded
    /// indexes (if any) remain in effect.
    pub async fn update(&mut self) -> Result<()> {
        let indexes =
            update_feeds(&self.config, &self.cache_dir, self.downloader.as_ref()).await?;
        self.indexes = Some(IndexSet::new(indexes));

        Ok(())
    }

    /// The loaded index set, or [OpkgError::IndexesNotLoaded] before the
    /// first successful [Self::update].
    pub(crate) fn index_set(&self) -> Result<&IndexSet> {
        self.indexes.as_ref().ok_or(OpkgError::IndexesNotLoaded)
    }

    /// The status database.
    pub fn status(&self) -> &StatusDatabase {
        &self.status
    }

    /// The configuration this manager was constructed from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The cache directory downloads and indexes land in.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub(crate) fn find_indexed(&self, name: &str) -> Result<&Package> {
        self.index_set()?
            .find(name)
            .ok_or_else(|| OpkgError::PackageNotAvailable(name.to_string()))
    }

    /// Download the package archive into the cache directory and return
    /// the destination path.
    ///
    /// This client stops at the download: nothing is unpacked, no
    /// maintainer scripts run, and the status database is untouched.
    pub async fn install(&self, name: &str) -> Result<PathBuf> {
        let package = self.find_indexed(name)?;
        if package.filename.is_empty() {
            return Err(OpkgError::ControlRequiredFieldMissing {
                package: name.to_string(),
                field: "Filename",
            });
        }

        let url = format!(
            "{}/{}",
            package.feed.uri.trim_end_matches('/'),
            package.filename.trim_start_matches('/')
        );
        let basename = Path::new(&package.filename)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&package.filename));
        let destination = self.cache_dir.join(basename);

        self.downloader.download_to_file(&url, &destination).await?;

        Ok(destination)
    }

    /// Identical to [Self::install]: retrieve the archive without applying
    /// anything.
    pub async fn download(&self, name: &str) -> Result<PathBuf> {
        self.install(name).await
    }

    /// Remove cached archives and indexes from the cache directory.
    pub fn clean(&self) -> Result<()> {
        let entries = match std::fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(OpkgError::IoPath(self.cache_dir.display().to_string(), e)),
        };

        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            std::fs::remove_file(entry.path())
                .map_err(|e| OpkgError::IoPath(entry.path().display().to_string(), e))?;
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use {
        super::*,
        async_trait::async_trait,
        std::collections::HashMap,
        std::io::Write,
        std::sync::Mutex,
        tempfile::TempDir,
    };

    /// In-memory transport: URL to body, everything else is a 404.
    pub(crate) struct StaticDownloader {
        pub(crate) responses: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl StaticDownloader {
        pub(crate) fn new(responses: HashMap<String, Vec<u8>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl Downloader for StaticDownloader {
        async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
            self.responses
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or(OpkgError::HttpStatus {
                    url: url.to_string(),
                    status: reqwest::StatusCode::NOT_FOUND,
                })
        }
    }

    pub(crate) const FEED_INDEX: &str = "\
Package: alpha
Version: 1.1-2
Architecture: armv7
Filename: pool/alpha_1.1-2.ipk
Size: 1024
Depends: beta, libc
Description: first test package
 with a second line

Package: beta
Version: 2.0
Architecture: armv7
Filename: pool/beta_2.0.ipk
Size: 2048
Depends: gamma (>= 1.0) | delta
Description: second test package

Package: gamma
Version: 0.9
Architecture: armv7
Filename: pool/gamma_0.9.ipk
Description: third test package
";

    pub(crate) const STATUS_FILE: &str = "\
Package: alpha
Version: 1.0
Architecture: armv7
Status: install ok installed
Depends: beta, libc
Description: first test package

Package: gamma
Version: 0.9
Architecture: armv7
Status: install ok installed
Depends: alpha
Description: third test package

Package: orphan
Version: 0.1
Architecture: armv7
Status: install ok installed
Depends: alpha
Description: installed but absent from feeds
";

    /// A workspace with one configured feed, a populated status database,
    /// and the static transport serving `FEED_INDEX`. The transport is
    /// returned so tests can add or remove responses mid-flight.
    pub(crate) fn fixture() -> (TempDir, PackageManager, std::sync::Arc<StaticDownloader>) {
        fixture_with(FEED_INDEX, STATUS_FILE)
    }

    /// Like [fixture], with explicit feed index and status file contents.
    pub(crate) fn fixture_with(
        index: &str,
        status: &str,
    ) -> (TempDir, PackageManager, std::sync::Arc<StaticDownloader>) {
        let dir = tempfile::tempdir().unwrap();

        let status_path = dir.path().join("status");
        let mut f = std::fs::File::create(&status_path).unwrap();
        f.write_all(status.as_bytes()).unwrap();

        let conf_path = dir.path().join("opkg.conf");
        let mut f = std::fs::File::create(&conf_path).unwrap();
        write!(
            f,
            "src/gz base http://feeds.invalid/base\n\
             dest root /\n\
             arch all 1\n\
             arch armv7 10\n\
             option status {}\n\
             option cache_dir {}\n",
            status_path.display(),
            dir.path().join("cache").display()
        )
        .unwrap();

        let downloader = std::sync::Arc::new(StaticDownloader::new(
            [(
                "http://feeds.invalid/base/Packages".to_string(),
                index.as_bytes().to_vec(),
            )]
            .into_iter()
            .collect(),
        ));

        let manager =
            PackageManager::with_downloader(&conf_path, Box::new(downloader.clone())).unwrap();

        (dir, manager, downloader)
    }
}
