// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The installed-package status database.

The status file is a control file listing one paragraph per package known
to the system. This client only ever reads it: the database is an
in-memory projection that is immutable after load, so shared references
support concurrent readers without locking.
*/

use {
    crate::{
        control::{ControlFile, ControlParagraph},
        error::{OpkgError, Result},
    },
    std::{collections::BTreeMap, path::Path},
};

/// A package recorded in the status database.
#[derive(Clone, Debug)]
pub struct StatusEntry {
    pub name: String,
    pub version: String,
    pub architecture: String,
    pub status: String,
    pub raw: ControlParagraph,
}

/// Parsed status database, keyed by package name.
#[derive(Clone, Debug, Default)]
pub struct StatusDatabase {
    by_name: BTreeMap<String, StatusEntry>,
}

impl StatusDatabase {
    /// Read the status database from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let mut reader = std::io::BufReader::new(file);
        let control = ControlFile::parse_reader(&mut reader)?;

        let mut by_name = BTreeMap::new();
        for paragraph in control.into_paragraphs() {
            let name = match paragraph.field_str("Package") {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => continue,
            };

            let entry = StatusEntry {
                version: paragraph.field_str("Version").unwrap_or_default().to_string(),
                architecture: paragraph
                    .field_str("Architecture")
                    .unwrap_or_default()
                    .to_string(),
                status: paragraph.field_str("Status").unwrap_or_default().to_string(),
                raw: paragraph,
                name: name.clone(),
            };
            by_name.insert(name, entry);
        }

        Ok(Self { by_name })
    }

    /// An empty database, for systems with no packages installed yet.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the named package is installed.
    ///
    /// A package counts as installed when its `Status` field contains the
    /// substring `installed`.
    pub fn installed(&self, name: &str) -> bool {
        self.by_name
            .get(name)
            .map(|entry| entry.status.contains("installed"))
            .unwrap_or(false)
    }

    /// Iterate entries in ascending name order.
    pub fn entries(&self) -> impl Iterator<Item = &StatusEntry> {
        self.by_name.values()
    }

    /// Retrieve a package entry by name.
    pub fn lookup(&self, name: &str) -> Result<&StatusEntry> {
        self.by_name
            .get(name)
            .ok_or_else(|| OpkgError::PackageNotFound(name.to_string()))
    }
}
