// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Feed index acquisition.

Every configured feed publishes a `Packages` control file (optionally gzip
compressed as `Packages.gz`) describing the packages it serves. Updating
fetches all feeds concurrently, parses each index into memory, and caches
the decompressed bytes under the cache directory.
*/

use {
    crate::{
        config::{Config, Feed},
        control::{ControlFile, ControlParagraph},
        downloader::Downloader,
        error::{OpkgError, Result},
        io::{maybe_decompress, write_atomic},
    },
    log::debug,
    std::{collections::BTreeMap, path::Path, time::SystemTime},
};

/// Metadata for a single package entry in a feed index.
#[derive(Clone, Debug)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub architecture: String,
    pub description: String,
    pub filename: String,
    pub size: String,
    pub feed: Feed,
    pub raw: ControlParagraph,
}

/// The parsed index of one feed.
#[derive(Clone, Debug)]
pub struct FeedIndex {
    pub feed: Feed,
    pub packages: BTreeMap<String, Package>,
    pub updated: SystemTime,
}

/// Fetch and parse the indexes for all configured feeds.
///
/// All feeds are fetched concurrently. If any feed fails, the first
/// failure in feed-declaration order is returned and no partial result is
/// exposed. On success the indexes come back in declaration order, which
/// keeps [IndexSet] lookups deterministic.
pub async fn update_feeds(
    config: &Config,
    cache_dir: &Path,
    downloader: &dyn Downloader,
) -> Result<Vec<FeedIndex>> {
    debug!("repo: updating {} feeds", config.feeds.len());

    let fetches = config
        .feeds
        .iter()
        .map(|feed| fetch_feed(feed, cache_dir, downloader));

    futures::future::join_all(fetches)
        .await
        .into_iter()
        .collect()
}

async fn fetch_feed(
    feed: &Feed,
    cache_dir: &Path,
    downloader: &dyn Downloader,
) -> Result<FeedIndex> {
    if feed.uri.is_empty() {
        return Err(OpkgError::FeedEmptyUri(feed.name.clone()));
    }

    fetch_feed_inner(feed, cache_dir, downloader)
        .await
        .map_err(|e| OpkgError::Feed {
            name: feed.name.clone(),
            source: Box::new(e),
        })
}

async fn fetch_feed_inner(
    feed: &Feed,
    cache_dir: &Path,
    downloader: &dyn Downloader,
) -> Result<FeedIndex> {
    let base = feed.uri.trim_end_matches('/');

    // Prefer the compressed index; fall back to the plain one.
    let gz_url = format!("{}/Packages.gz", base);
    let plain_url = format!("{}/Packages", base);

    debug!("repo: attempting {}", gz_url);
    let data = match downloader.get_bytes(&gz_url).await {
        Ok(bytes) => bytes,
        Err(_) => {
            debug!("repo: attempting {}", plain_url);
            downloader.get_bytes(&plain_url).await?
        }
    };

    // Compression is sniffed from content rather than trusted from the
    // URL that happened to answer.
    let data = maybe_decompress(data).await?;

    debug!("repo: parsing feed {}", feed.name);
    let control = ControlFile::parse_str(&String::from_utf8_lossy(&data))?;

    let mut packages = BTreeMap::new();
    for paragraph in control.into_paragraphs() {
        let name = match paragraph.field_str("Package") {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => continue,
        };

        // A name repeated within one feed keeps the last occurrence.
        packages.insert(
            name.clone(),
            Package {
                version: paragraph.field_str("Version").unwrap_or_default().to_string(),
                architecture: paragraph
                    .field_str("Architecture")
                    .unwrap_or_default()
                    .to_string(),
                description: paragraph
                    .field_str("Description")
                    .unwrap_or_default()
                    .to_string(),
                filename: paragraph
                    .field_str("Filename")
                    .unwrap_or_default()
                    .to_string(),
                size: paragraph.field_str("Size").unwrap_or_default().to_string(),
                feed: feed.clone(),
                raw: paragraph,
                name,
            },
        );
    }

    let cache_path = cache_dir.join(format!("{}.Packages", feed.name));
    write_atomic(&cache_path, &data)?;
    debug!(
        "repo: feed {} loaded with {} packages, cached at {}",
        feed.name,
        packages.len(),
        cache_path.display()
    );

    Ok(FeedIndex {
        feed: feed.clone(),
        packages,
        updated: SystemTime::now(),
    })
}

/// Aggregates the indexes of all feeds, in feed-declaration order.
#[derive(Clone, Debug, Default)]
pub struct IndexSet {
    indexes: Vec<FeedIndex>,
}

impl IndexSet {
    /// Wrap indexes into a set. Order is significant: lookups are
    /// first-wins across feeds.
    pub fn new(indexes: Vec<FeedIndex>) -> Self {
        Self { indexes }
    }

    /// Find a package by name across all feeds, first feed wins.
    pub fn find(&self, name: &str) -> Option<&Package> {
        self.indexes.iter().find_map(|idx| idx.packages.get(name))
    }

    /// All packages, flattened in feed order then name order.
    ///
    /// The same name may appear once per feed; there is no cross-feed
    /// de-duplication.
    pub fn all(&self) -> impl Iterator<Item = &Package> {
        self.indexes.iter().flat_map(|idx| idx.packages.values())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{config::FeedKind, manager::test_support::StaticDownloader},
        async_trait::async_trait,
        std::collections::HashMap,
        std::sync::Arc,
        tokio::sync::Barrier,
    };

    fn feed(name: &str) -> Feed {
        Feed {
            name: name.to_string(),
            uri: format!("http://feeds.invalid/{}", name),
            kind: FeedKind::Gzip,
        }
    }

    fn config_with_feeds(feeds: Vec<Feed>) -> Config {
        Config {
            feeds,
            ..Config::default()
        }
    }

    async fn gzip(data: &[u8]) -> Vec<u8> {
        use futures::AsyncReadExt;

        let mut encoder = async_compression::futures::bufread::GzipEncoder::new(data);
        let mut compressed = Vec::new();
        encoder.read_to_end(&mut compressed).await.unwrap();
        compressed
    }

    const BASE_INDEX: &str = "\
Package: alpha
Version: 1.0
Filename: pool/alpha_1.0.ipk

Package: beta
Version: 2.0
Filename: pool/beta_2.0.ipk
";

    #[tokio::test]
    async fn fetches_gz_then_falls_back_to_plain() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let downloader = StaticDownloader::new(
            [(
                "http://feeds.invalid/base/Packages".to_string(),
                BASE_INDEX.as_bytes().to_vec(),
            )]
            .into_iter()
            .collect(),
        );

        let config = config_with_feeds(vec![feed("base")]);
        let indexes = update_feeds(&config, dir.path(), &downloader).await?;

        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].packages.len(), 2);
        assert_eq!(indexes[0].packages["alpha"].version, "1.0");

        // The raw decompressed bytes are cached under <feed>.Packages.
        let cached = std::fs::read(dir.path().join("base.Packages"))?;
        assert_eq!(cached, BASE_INDEX.as_bytes());

        Ok(())
    }

    #[tokio::test]
    async fn gzip_body_is_detected_and_decompressed() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let downloader = StaticDownloader::new(
            [(
                "http://feeds.invalid/base/Packages.gz".to_string(),
                gzip(BASE_INDEX.as_bytes()).await,
            )]
            .into_iter()
            .collect(),
        );

        let config = config_with_feeds(vec![feed("base")]);
        let indexes = update_feeds(&config, dir.path(), &downloader).await?;

        assert_eq!(indexes[0].packages.len(), 2);
        assert_eq!(
            std::fs::read(dir.path().join("base.Packages"))?,
            BASE_INDEX.as_bytes()
        );

        Ok(())
    }

    #[tokio::test]
    async fn duplicate_name_within_feed_keeps_last() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let index = "Package: alpha\nVersion: 1.0\n\nPackage: alpha\nVersion: 1.1\n";
        let downloader = StaticDownloader::new(
            [(
                "http://feeds.invalid/base/Packages".to_string(),
                index.as_bytes().to_vec(),
            )]
            .into_iter()
            .collect(),
        );

        let config = config_with_feeds(vec![feed("base")]);
        let indexes = update_feeds(&config, dir.path(), &downloader).await?;

        assert_eq!(indexes[0].packages.len(), 1);
        assert_eq!(indexes[0].packages["alpha"].version, "1.1");

        Ok(())
    }

    #[tokio::test]
    async fn failing_feed_fails_the_update() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let downloader = StaticDownloader::new(
            [(
                "http://feeds.invalid/good/Packages".to_string(),
                BASE_INDEX.as_bytes().to_vec(),
            )]
            .into_iter()
            .collect(),
        );

        let config = config_with_feeds(vec![feed("bad"), feed("good")]);
        let err = update_feeds(&config, dir.path(), &downloader)
            .await
            .unwrap_err();

        match err {
            OpkgError::Feed { name, .. } => assert_eq!(name, "bad"),
            other => panic!("expected feed error, got {:?}", other),
        }

        Ok(())
    }

    #[tokio::test]
    async fn empty_feed_uri_is_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let downloader = StaticDownloader::new(HashMap::new());

        let mut bad = feed("base");
        bad.uri = String::new();
        let config = config_with_feeds(vec![bad]);

        assert!(matches!(
            update_feeds(&config, dir.path(), &downloader).await,
            Err(OpkgError::FeedEmptyUri(_))
        ));
    }

    /// A downloader whose responses are gated behind a barrier sized to
    /// the feed count: the update only completes if every feed's fetch
    /// starts before any of them finishes.
    struct BarrierDownloader {
        barrier: Arc<Barrier>,
        index: Vec<u8>,
    }

    #[async_trait]
    impl Downloader for BarrierDownloader {
        async fn get_bytes(&self, _url: &str) -> Result<Vec<u8>> {
            self.barrier.wait().await;
            Ok(self.index.clone())
        }
    }

    #[tokio::test]
    async fn all_feeds_fetch_concurrently() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let feeds = vec![feed("one"), feed("two"), feed("three")];
        let downloader = BarrierDownloader {
            barrier: Arc::new(Barrier::new(feeds.len())),
            index: BASE_INDEX.as_bytes().to_vec(),
        };
        let config = config_with_feeds(feeds);

        let indexes = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            update_feeds(&config, dir.path(), &downloader),
        )
        .await
        .expect("feeds must be fetched in parallel")?;

        assert_eq!(indexes.len(), 3);

        Ok(())
    }

    #[test]
    fn index_set_lookup_is_first_wins() {
        let mk = |name: &str, version: &str, feed: &Feed| Package {
            name: name.to_string(),
            version: version.to_string(),
            architecture: String::new(),
            description: String::new(),
            filename: String::new(),
            size: String::new(),
            feed: feed.clone(),
            raw: ControlParagraph::default(),
        };

        let first_feed = feed("first");
        let second_feed = feed("second");

        let mut first_packages = BTreeMap::new();
        first_packages.insert("alpha".to_string(), mk("alpha", "1.0", &first_feed));

        let mut second_packages = BTreeMap::new();
        second_packages.insert("alpha".to_string(), mk("alpha", "9.0", &second_feed));
        second_packages.insert("beta".to_string(), mk("beta", "2.0", &second_feed));

        let set = IndexSet::new(vec![
            FeedIndex {
                feed: first_feed,
                packages: first_packages,
                updated: SystemTime::UNIX_EPOCH,
            },
            FeedIndex {
                feed: second_feed,
                packages: second_packages,
                updated: SystemTime::UNIX_EPOCH,
            },
        ]);

        assert_eq!(set.find("alpha").unwrap().version, "1.0");
        assert_eq!(set.find("beta").unwrap().version, "2.0");
        assert!(set.find("gamma").is_none());

        // all() keeps both alphas, first feed's entry first.
        let versions = set
            .all()
            .filter(|p| p.name == "alpha")
            .map(|p| p.version.as_str())
            .collect::<Vec<_>>();
        assert_eq!(versions, vec!["1.0", "9.0"]);
    }
}
