// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! opkg package feeds and local package state, as a library.

This crate reimplements the client side of the opkg package manager used
on embedded Linux systems: it reads a legacy `opkg.conf`, discovers what
packages the configured feeds serve, compares them against the installed
package database, and retrieves package archives into a cache directory.
It never unpacks archives, runs maintainer scripts, or writes to the
status database.

# A Tour of Functionality

Remote feeds and the local status database share the Debian-style control
stanza format. The [control] module implements it:
[control::ControlParagraph] is one stanza with case-insensitive field
lookup, [control::ControlFile] an ordered sequence of them.

[config::Config] loads `opkg.conf`, including recursive `include` glob
expansion, and derives the status database path and cache directory from
it.

The [package_version] module implements the Debian version ordering used
for upgrade decisions, including the `~` pre-release sigil, and the
operator predicate behind `compare-versions`.

Retrieval is abstracted behind [downloader::Downloader] so transports can
be swapped in tests; [downloader::HttpDownloader] is the production
implementation. The [repository] module fetches all feed indexes
concurrently and aggregates them into a [repository::IndexSet] with
first-wins lookup across feeds. [status::StatusDatabase] is the read-only
projection of the installed-package database.

[manager::PackageManager] ties everything together: construct it from a
configuration path, call [manager::PackageManager::update], then use the
query surface defined across [manager] and [query] — listing, search,
upgrade candidates, reverse-dependency closures, and downloads.
*/

pub mod config;
pub mod control;
pub mod downloader;
pub mod error;
pub mod io;
pub mod manager;
pub mod package_version;
pub mod query;
pub mod repository;
pub mod status;
