// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! opkg configuration files.

The configuration grammar is directive oriented: one directive per line,
tokens split on whitespace with double-quoted runs kept intact, `#` and
`//` comments, and `include` directives that glob-expand and load further
files recursively.
*/

use {
    crate::error::{OpkgError, Result},
    log::debug,
    std::{
        collections::{HashMap, HashSet},
        io::BufRead,
        path::{Path, PathBuf},
    },
};

/// How a feed's index is published.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FeedKind {
    /// Declared with `src`; a plain `Packages` index.
    Plain,
    /// Declared with `src/gz`; a gzip compressed index.
    Gzip,
    /// Declared with `src/sig`; accepted for compatibility, signatures are
    /// not verified by this client.
    Signed,
}

/// A remote package feed declared with `src`, `src/gz` or `src/sig`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Feed {
    pub name: String,
    pub uri: String,
    pub kind: FeedKind,
}

/// A named filesystem destination.
///
/// The destination named `root` doubles as the fallback location of the
/// status database.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Destination {
    pub name: String,
    pub path: PathBuf,
}

/// An architecture entry declared with `arch`.
///
/// Lower priority numbers indicate higher preference; 0 means unspecified.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Architecture {
    pub name: String,
    pub priority: i64,
}

/// Parsed opkg configuration.
///
/// The structure is intentionally forgiving: unknown directives and
/// `key=value` lines degrade into [Self::options] so existing
/// configuration files keep loading.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub options: HashMap<String, String>,
    pub feeds: Vec<Feed>,
    pub destinations: Vec<Destination>,
    pub includes: Vec<String>,
    pub architectures: Vec<Architecture>,
}

impl Config {
    /// Parse the configuration file at `path` and everything it includes.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        let mut visited = HashSet::new();
        config.load_file(path.as_ref(), &mut visited)?;

        debug!(
            "config: loaded {} options, {} feeds, {} destinations, {} architectures",
            config.options.len(),
            config.feeds.len(),
            config.destinations.len(),
            config.architectures.len()
        );

        Ok(config)
    }

    fn load_file(&mut self, path: &Path, visited: &mut HashSet<PathBuf>) -> Result<()> {
        // Canonicalize before the cycle check so two spellings of the same
        // file are not loaded twice.
        let canonical = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());
        if !visited.insert(canonical) {
            return Ok(());
        }

        debug!("config: loading file {}", path.display());

        let file = std::fs::File::open(path).map_err(|e| {
            OpkgError::IoPath(path.display().to_string(), e)
        })?;
        let reader = std::io::BufReader::new(file);

        for (index, line) in reader.lines().enumerate() {
            let line_no = index + 1;
            let line = line?;
            let raw = line.trim();
            if raw.is_empty() || raw.starts_with('#') || raw.starts_with("//") {
                continue;
            }

            let tokens = tokenize(raw);
            if tokens.is_empty() {
                continue;
            }

            let bad_config = |message: String| OpkgError::Config {
                path: path.display().to_string(),
                line: line_no,
                message,
            };

            match tokens[0].as_str() {
                "option" => {
                    if tokens.len() < 3 {
                        return Err(bad_config("option expects key and value".to_string()));
                    }
                    self.options
                        .insert(tokens[1].clone(), tokens[2..].join(" "));
                }
                "dest" => {
                    if tokens.len() < 3 {
                        return Err(bad_config("dest expects name and path".to_string()));
                    }
                    self.destinations.push(Destination {
                        name: tokens[1].clone(),
                        path: PathBuf::from(&tokens[2]),
                    });
                }
                directive @ ("src" | "src/gz" | "src/sig") => {
                    if tokens.len() < 3 {
                        return Err(bad_config(format!(
                            "{} expects name and URI",
                            directive
                        )));
                    }
                    let kind = match directive {
                        "src" => FeedKind::Plain,
                        "src/gz" => FeedKind::Gzip,
                        _ => FeedKind::Signed,
                    };
                    self.feeds.push(Feed {
                        name: tokens[1].clone(),
                        uri: tokens[2].clone(),
                        kind,
                    });
                }
                "arch" => {
                    if tokens.len() < 2 {
                        return Err(bad_config(
                            "arch expects name and optional priority".to_string(),
                        ));
                    }
                    let priority = if tokens.len() >= 3 {
                        tokens[2].parse::<i64>().map_err(|_| {
                            bad_config(format!(
                                "invalid architecture priority {:?}",
                                tokens[2]
                            ))
                        })?
                    } else {
                        0
                    };
                    self.architectures.push(Architecture {
                        name: tokens[1].clone(),
                        priority,
                    });
                }
                "include" => {
                    if tokens.len() < 2 {
                        return Err(bad_config("include expects a glob".to_string()));
                    }
                    let pattern = &tokens[1];
                    self.includes.push(pattern.clone());
                    debug!(
                        "config: discovered include {} from {}",
                        pattern,
                        path.display()
                    );

                    let matches = glob::glob(pattern)
                        .map_err(|e| bad_config(format!("invalid glob: {}", e)))?
                        .collect::<std::result::Result<Vec<_>, _>>()
                        .map_err(|e| OpkgError::IoPath(pattern.clone(), e.into_error()))?;

                    if matches.is_empty() {
                        debug!(
                            "config: include pattern {} from {} matched no files",
                            pattern,
                            path.display()
                        );
                        continue;
                    }
                    for matched in matches {
                        debug!("config: including {}", matched.display());
                        self.load_file(&matched, visited)?;
                    }
                }
                unknown => {
                    // Unknown directives are kept so higher layers can
                    // decide how to handle them.
                    if tokens.len() >= 2 {
                        self.options
                            .insert(unknown.to_string(), tokens[1..].join(" "));
                    } else if let Some((key, value)) = unknown.split_once('=') {
                        self.options
                            .insert(key.trim().to_string(), value.trim().to_string());
                    } else {
                        return Err(bad_config(format!(
                            "unsupported directive {:?}",
                            unknown
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Look up a configuration option by case-sensitive key.
    pub fn find_option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(|v| v.as_str())
    }

    /// Look up a destination by name.
    pub fn destination(&self, name: &str) -> Option<&Destination> {
        self.destinations.iter().find(|d| d.name == name)
    }

    /// The filesystem path of the package status database.
    ///
    /// Resolution order: the `status` option, the `status_file` option,
    /// `<status_dir>/status`, then `<root destination>/usr/lib/opkg/status`.
    pub fn status_path(&self) -> Result<PathBuf> {
        if let Some(path) = self.find_option("status") {
            return Ok(PathBuf::from(path));
        }
        if let Some(path) = self.find_option("status_file") {
            return Ok(PathBuf::from(path));
        }
        if let Some(dir) = self.find_option("status_dir") {
            return Ok(Path::new(dir).join("status"));
        }
        if let Some(dest) = self.destination("root") {
            return Ok(dest.path.join("usr/lib/opkg/status"));
        }

        Err(OpkgError::StatusPathNotConfigured)
    }

    /// The directory used to cache downloaded indexes and archives.
    pub fn cache_dir(&self) -> PathBuf {
        if let Some(cache) = self.find_option("cache_dir") {
            return PathBuf::from(cache);
        }
        if let Some(tmp) = self.find_option("tmp_dir") {
            return PathBuf::from(tmp);
        }

        PathBuf::from("/tmp")
    }

    /// Create the cache directory if needed and return its path.
    pub fn ensure_cache_dir(&self) -> Result<PathBuf> {
        let cache = self.cache_dir();
        std::fs::create_dir_all(&cache)
            .map_err(|e| OpkgError::IoPath(cache.display().to_string(), e))?;
        debug!("config: ensured cache directory {}", cache.display());

        Ok(cache)
    }
}

/// Split a directive line into tokens.
///
/// Double-quoted runs keep their whitespace; the quotes themselves are
/// stripped and no escape sequences are recognized.
fn tokenize(line: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;

    for ch in line.chars() {
        match ch {
            '"' => in_quote = !in_quote,
            ' ' | '\t' if !in_quote => {
                if !current.is_empty() {
                    result.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        result.push(current);
    }

    result
}

#[cfg(test)]
mod tests {
    use {super::*, std::io::Write};

    fn write_file(path: &Path, contents: &str) {
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn tokenize_honors_quotes() {
        assert_eq!(
            tokenize(r#"dest root "/opt/my root""#),
            vec!["dest", "root", "/opt/my root"]
        );
        assert_eq!(tokenize("option  a\t b"), vec!["option", "a", "b"]);
    }

    #[test]
    fn parse_directives() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("opkg.conf");
        write_file(
            &path,
            "# comment\n\
             // other comment\n\
             option cache_dir /var/cache/opkg\n\
             dest root /\n\
             src base http://example.invalid/base\n\
             src/gz extra http://example.invalid/extra\n\
             src/sig signed http://example.invalid/signed\n\
             arch all 1\n\
             arch armv7 10\n\
             mystery directive payload\n\
             lists_dir=/var/lists\n",
        );

        let config = Config::load(&path)?;

        assert_eq!(config.find_option("cache_dir"), Some("/var/cache/opkg"));
        assert_eq!(config.feeds.len(), 3);
        assert_eq!(config.feeds[0].kind, FeedKind::Plain);
        assert_eq!(config.feeds[1].kind, FeedKind::Gzip);
        assert_eq!(config.feeds[2].kind, FeedKind::Signed);
        assert_eq!(config.destinations[0].name, "root");
        assert_eq!(
            config.architectures,
            vec![
                Architecture {
                    name: "all".to_string(),
                    priority: 1
                },
                Architecture {
                    name: "armv7".to_string(),
                    priority: 10
                },
            ]
        );
        assert_eq!(config.find_option("mystery"), Some("directive payload"));
        assert_eq!(config.find_option("lists_dir"), Some("/var/lists"));

        Ok(())
    }

    #[test]
    fn bad_directive_reports_file_and_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opkg.conf");
        write_file(&path, "option ok value\nbogus\n");

        match Config::load(&path) {
            Err(OpkgError::Config { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn non_integer_arch_priority_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opkg.conf");
        write_file(&path, "arch all soon\n");

        assert!(matches!(
            Config::load(&path),
            Err(OpkgError::Config { line: 1, .. })
        ));
    }

    #[test]
    fn include_glob_loads_feeds() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let feeds_dir = dir.path().join("feeds");
        std::fs::create_dir(&feeds_dir)?;

        write_file(
            &feeds_dir.join("base.conf"),
            "src/gz base http://example.invalid/base\n",
        );

        let main = dir.path().join("opkg.conf");
        write_file(
            &main,
            &format!("include {}/feeds/*.conf\n", dir.path().display()),
        );

        let config = Config::load(&main)?;

        assert_eq!(config.feeds.len(), 1);
        assert_eq!(config.feeds[0].name, "base");
        assert_eq!(config.feeds[0].uri, "http://example.invalid/base");
        assert_eq!(config.includes.len(), 1);

        Ok(())
    }

    #[test]
    fn cyclic_includes_terminate() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let first = dir.path().join("first.conf");
        let second = dir.path().join("second.conf");

        write_file(
            &first,
            &format!("src a http://example.invalid/a\ninclude {}\n", second.display()),
        );
        write_file(
            &second,
            &format!("src b http://example.invalid/b\ninclude {}\n", first.display()),
        );

        let config = Config::load(&first)?;

        assert_eq!(config.feeds.len(), 2);

        Ok(())
    }

    #[test]
    fn status_path_resolution_order() -> Result<()> {
        let mut config = Config::default();
        config.destinations.push(Destination {
            name: "root".to_string(),
            path: PathBuf::from("/"),
        });
        config
            .options
            .insert("status_dir".to_string(), "/usr/lib/opkg".to_string());
        config
            .options
            .insert("status_file".to_string(), "/var/lib/opkg/status".to_string());
        config
            .options
            .insert("status".to_string(), "/data/status".to_string());

        assert_eq!(config.status_path()?, PathBuf::from("/data/status"));

        config.options.remove("status");
        assert_eq!(config.status_path()?, PathBuf::from("/var/lib/opkg/status"));

        config.options.remove("status_file");
        assert_eq!(config.status_path()?, PathBuf::from("/usr/lib/opkg/status"));

        config.options.remove("status_dir");
        assert_eq!(
            config.status_path()?,
            PathBuf::from("/usr/lib/opkg/status")
        );

        config.destinations.clear();
        assert!(matches!(
            config.status_path(),
            Err(OpkgError::StatusPathNotConfigured)
        ));

        Ok(())
    }

    #[test]
    fn cache_dir_fallbacks() {
        let mut config = Config::default();
        assert_eq!(config.cache_dir(), PathBuf::from("/tmp"));

        config
            .options
            .insert("tmp_dir".to_string(), "/var/tmp".to_string());
        assert_eq!(config.cache_dir(), PathBuf::from("/var/tmp"));

        config
            .options
            .insert("cache_dir".to_string(), "/var/cache/opkg".to_string());
        assert_eq!(config.cache_dir(), PathBuf::from("/var/cache/opkg"));
    }
}
