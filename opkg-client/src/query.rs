// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Query operations over feed indexes and the status database.

All name filters use shell-style globbing (`*`, `?`, `[…]`). A malformed
pattern matches nothing and an empty pattern list matches everything.
Reverse-dependency lookups tokenize relation fields (`Depends` and
friends) and glob-match the bare package tokens; version constraints
inside the field are not interpreted.
*/

use {
    crate::{
        config::Architecture,
        control::ControlParagraph,
        error::{OpkgError, Result},
        manager::PackageManager,
        package_version,
        repository::Package,
        status::StatusEntry,
    },
    std::{
        cmp::Ordering,
        collections::{BTreeMap, BTreeSet, HashSet, VecDeque},
        path::PathBuf,
    },
};

/// Fields that declare relationships between packages.
pub const RELATION_FIELDS: [&str; 7] = [
    "Depends",
    "Pre-Depends",
    "Recommends",
    "Suggests",
    "Provides",
    "Conflicts",
    "Replaces",
];

/// Controls the behaviour of [PackageManager::list_packages].
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    /// List the status database instead of the feed indexes.
    pub installed_only: bool,
    /// Name globs; empty means all.
    pub patterns: Vec<String>,
    /// Only show the first line of descriptions.
    pub short_description: bool,
    /// Append the package size when known.
    pub include_size: bool,
}

/// An installed package with a newer version available in the feeds.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpgradeCandidate {
    pub name: String,
    pub installed: String,
    pub available: String,
    pub description: String,
}

/// One completed upgrade download.
#[derive(Clone, Debug)]
pub struct UpgradeOutcome {
    pub candidate: UpgradeCandidate,
    pub destination: PathBuf,
}

/// Outcome of an upgrade run.
///
/// The first download failure aborts the run; upgrades completed before
/// that point are retained alongside the failure.
#[derive(Debug, Default)]
pub struct UpgradeReport {
    pub completed: Vec<UpgradeOutcome>,
    pub failure: Option<OpkgError>,
}

/// Describes a reverse-relationship lookup such as `whatdepends`.
#[derive(Clone, Debug)]
pub struct ReverseDependencyQuery {
    /// The relation field to inspect, e.g. `Depends` or `Recommends`.
    pub field: String,
    /// Target name globs. At least one is required.
    pub patterns: Vec<String>,
    /// Search all known packages rather than only installed ones.
    pub include_all: bool,
    /// Also search for packages depending on the matches, transitively.
    pub recursive: bool,
}

impl PackageManager {
    /// Render packages matching the filters as `NAME - DESCRIPTION` lines.
    pub fn list_packages(&self, options: &ListOptions) -> Result<Vec<String>> {
        if options.installed_only {
            return Ok(self.list_installed(options));
        }

        let set = self.index_set()?;
        let mut packages = set.all().collect::<Vec<_>>();
        packages.sort_by(|a, b| a.name.cmp(&b.name));

        let mut lines = Vec::new();
        for package in packages {
            if !matches_any(&package.name, &options.patterns) {
                continue;
            }

            let description = render_description(&package.description, options.short_description);
            let suffix = if self.status().installed(&package.name) {
                " [installed]"
            } else {
                ""
            };

            if options.include_size && !package.size.is_empty() {
                lines.push(format!(
                    "{} - {}{} ({})",
                    package.name, description, suffix, package.size
                ));
            } else {
                lines.push(format!("{} - {}{}", package.name, description, suffix));
            }
        }

        Ok(lines)
    }

    fn list_installed(&self, options: &ListOptions) -> Vec<String> {
        let mut lines = Vec::new();
        for entry in self.status().entries() {
            if !matches_any(&entry.name, &options.patterns) {
                continue;
            }

            let description = render_description(
                entry.raw.field_str("Description").unwrap_or_default(),
                options.short_description,
            );

            if options.include_size {
                if let Some(size) = entry.raw.field_str("Installed-Size") {
                    if !size.is_empty() {
                        lines.push(format!("{} - {} ({})", entry.name, description, size));
                        continue;
                    }
                }
            }
            lines.push(format!("{} - {}", entry.name, description));
        }

        lines
    }

    /// Installed packages with a newer version available, name ordered.
    pub fn list_upgradable(&self, patterns: &[String]) -> Result<Vec<UpgradeCandidate>> {
        let set = self.index_set()?;

        let mut candidates = Vec::new();
        for entry in self.status().entries() {
            if !matches_any(&entry.name, patterns) {
                continue;
            }
            let package = match set.find(&entry.name) {
                Some(package) => package,
                None => continue,
            };
            if package_version::compare(&entry.version, &package.version) != Ordering::Less {
                continue;
            }

            candidates.push(UpgradeCandidate {
                name: entry.name.clone(),
                installed: entry.version.clone(),
                available: package.version.clone(),
                description: first_line(&package.description).to_string(),
            });
        }

        Ok(candidates)
    }

    /// Download newer archives for all upgrade candidates matching the
    /// patterns.
    ///
    /// Upgrading never applies anything to the system: each candidate's
    /// archive is fetched into the cache exactly like
    /// [PackageManager::download].
    pub async fn upgrade(&self, patterns: &[String]) -> Result<UpgradeReport> {
        let candidates = self.list_upgradable(patterns)?;

        let mut report = UpgradeReport::default();
        for candidate in candidates {
            match self.install(&candidate.name).await {
                Ok(destination) => report.completed.push(UpgradeOutcome {
                    candidate,
                    destination,
                }),
                Err(e) => {
                    report.failure = Some(e);
                    break;
                }
            }
        }

        Ok(report)
    }

    /// Raw paragraphs for all packages matching the patterns.
    ///
    /// Status entries missing from the current feeds are appended, so
    /// locally installed packages that disappeared from their feed still
    /// show up.
    pub fn info_paragraphs(&self, patterns: &[String]) -> Result<Vec<&ControlParagraph>> {
        let set = self.index_set()?;

        let mut paragraphs = Vec::new();
        let mut seen = HashSet::new();
        for package in set.all() {
            if !matches_any(&package.name, patterns) {
                continue;
            }
            paragraphs.push(&package.raw);
            seen.insert(package.name.as_str());
        }

        for entry in self.status().entries() {
            if seen.contains(entry.name.as_str()) {
                continue;
            }
            if matches_any(&entry.name, patterns) {
                paragraphs.push(&entry.raw);
            }
        }

        Ok(paragraphs)
    }

    /// Status entries matching the patterns, name ordered. All entries
    /// when no patterns are given.
    pub fn status_entries(&self, patterns: &[String]) -> Vec<&StatusEntry> {
        self.status()
            .entries()
            .filter(|entry| matches_any(&entry.name, patterns))
            .collect()
    }

    /// Raw status paragraphs matching the patterns.
    pub fn glob_status(&self, patterns: &[String]) -> Vec<&ControlParagraph> {
        self.status_entries(patterns)
            .into_iter()
            .map(|entry| &entry.raw)
            .collect()
    }

    /// Case-insensitive substring search over package names and
    /// descriptions across all feeds.
    pub fn find_packages(&self, needle: &str) -> Result<Vec<&Package>> {
        let set = self.index_set()?;
        let needle = needle.to_lowercase();

        let mut matches = set
            .all()
            .filter(|package| {
                package.name.to_lowercase().contains(&needle)
                    || package.description.to_lowercase().contains(&needle)
            })
            .collect::<Vec<_>>();
        matches.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(matches)
    }

    /// Names of packages whose relation field matches the query targets.
    ///
    /// Recursion expands the target side: packages that match become
    /// targets themselves, yielding the transitive closure of
    /// "who depends on this".
    pub fn reverse_dependencies(&self, query: &ReverseDependencyQuery) -> Result<Vec<String>> {
        if query.patterns.is_empty() {
            return Err(OpkgError::NoQueryPatterns);
        }

        let universe = self.reverse_universe(query.include_all)?;

        let mut queue = query.patterns.iter().cloned().collect::<VecDeque<_>>();
        let mut seen_targets = HashSet::new();
        let mut matched = BTreeSet::new();

        while let Some(target) = queue.pop_front() {
            if !seen_targets.insert(target.clone()) {
                continue;
            }
            let pattern = glob::Pattern::new(&target).ok();

            for (name, raw) in &universe {
                if matched.contains(*name) {
                    continue;
                }
                let value = raw.field_str(&query.field).unwrap_or_default();
                if relation_matches(value, pattern.as_ref()) {
                    matched.insert((*name).to_string());
                    if query.recursive {
                        queue.push_back((*name).to_string());
                    }
                }
            }
        }

        Ok(matched.into_iter().collect())
    }

    /// The universe a reverse lookup searches: indexed packages (installed
    /// only unless `include_all`) plus status entries absent from the
    /// indexes.
    fn reverse_universe(&self, include_all: bool) -> Result<Vec<(&str, &ControlParagraph)>> {
        let set = self.index_set()?;

        let mut universe = Vec::new();
        let mut seen = HashSet::new();
        for package in set.all() {
            if !include_all && !self.status().installed(&package.name) {
                continue;
            }
            universe.push((package.name.as_str(), &package.raw));
            seen.insert(package.name.as_str());
        }

        for entry in self.status().entries() {
            if !seen.contains(entry.name.as_str()) {
                universe.push((entry.name.as_str(), &entry.raw));
            }
        }

        Ok(universe)
    }

    /// The relationships declared by a package, keyed by relation field.
    ///
    /// The package is looked up in the indexes first and the status
    /// database second.
    pub fn dependencies(&self, name: &str) -> Result<BTreeMap<&'static str, Vec<String>>> {
        let raw = match self.index_set()?.find(name) {
            Some(package) => &package.raw,
            None => &self.status().lookup(name)?.raw,
        };

        let mut result = BTreeMap::new();
        for field in RELATION_FIELDS {
            if let Some(value) = raw.field_str(field) {
                if !value.is_empty() {
                    result.insert(
                        field,
                        relation_tokens(value)
                            .into_iter()
                            .map(String::from)
                            .collect(),
                    );
                }
            }
        }

        Ok(result)
    }

    /// The architectures declared in the configuration, in declaration
    /// order.
    pub fn architectures(&self) -> Vec<Architecture> {
        self.config().architectures.clone()
    }
}

fn matches_any(name: &str, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return true;
    }
    patterns.iter().any(|p| {
        glob::Pattern::new(p)
            .map(|pattern| pattern.matches(name))
            .unwrap_or(false)
    })
}

fn first_line(text: &str) -> &str {
    match text.find('\n') {
        Some(idx) => &text[..idx],
        None => text,
    }
}

fn render_description(description: &str, short: bool) -> String {
    let rendered = if short {
        first_line(description).to_string()
    } else {
        description.replace('\n', " ")
    };

    if rendered.is_empty() {
        "(no description)".to_string()
    } else {
        rendered
    }
}

/// Extract bare package names from a relation field value.
///
/// Clauses split on `,`, alternatives on `|`; each token is the part
/// before any of space, `(`, `<`, `>` or `=`.
pub(crate) fn relation_tokens(value: &str) -> Vec<&str> {
    let mut result = Vec::new();
    for clause in value.split(',') {
        for alternative in clause.split('|') {
            let alternative = alternative.trim();
            let token = match alternative.find(|c: char| matches!(c, ' ' | '(' | '<' | '>' | '=')) {
                Some(idx) => alternative[..idx].trim(),
                None => alternative,
            };
            if !token.is_empty() {
                result.push(token);
            }
        }
    }

    result
}

fn relation_matches(value: &str, pattern: Option<&glob::Pattern>) -> bool {
    let pattern = match pattern {
        Some(pattern) => pattern,
        None => return false,
    };
    if value.is_empty() {
        return false;
    }

    relation_tokens(value)
        .into_iter()
        .any(|token| pattern.matches(token))
}
