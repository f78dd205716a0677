// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum OpkgError {
    #[error("config {path}:{line}: {message}")]
    Config {
        path: String,
        line: usize,
        message: String,
    },

    #[error("malformed control line: {0:?}")]
    ControlParse(String),

    #[error("unsupported version operator: {0:?}")]
    UnsupportedOperator(String),

    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[error("HTTP error: {0:?}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} for {url}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on path {0}: {1:?}")]
    IoPath(String, #[source] std::io::Error),

    #[error("feed {name}: {source}")]
    Feed {
        name: String,
        #[source]
        source: Box<OpkgError>,
    },

    #[error("feed {0} has empty URI")]
    FeedEmptyUri(String),

    #[error("package {0} not available in any feed")]
    PackageNotAvailable(String),

    #[error("package {0} not found")]
    PackageNotFound(String),

    #[error("package {package} does not declare a {field} field")]
    ControlRequiredFieldMissing {
        package: String,
        field: &'static str,
    },

    #[error("package indexes not loaded; run 'opkg update' first")]
    IndexesNotLoaded,

    #[error("operation cancelled")]
    Cancelled,

    #[error("status path not configured")]
    StatusPathNotConfigured,

    #[error("at least one package name or glob is required")]
    NoQueryPatterns,
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, OpkgError>;
