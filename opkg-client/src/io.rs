// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers. */

use {
    crate::error::{OpkgError, Result},
    async_compression::futures::bufread::GzipDecoder,
    futures::AsyncReadExt,
    std::path::Path,
};

/// Compression format of retrieved feed index bytes.
///
/// Feeds may publish `Packages` or `Packages.gz`; the format is detected
/// from content, not from the URL, since servers occasionally serve
/// pre-decompressed bodies under the `.gz` path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Compression {
    /// No compression.
    None,
    /// Gzip compression (`1F 8B` magic).
    Gzip,
}

impl Compression {
    /// Detect the compression format from leading magic bytes.
    pub fn detect(data: &[u8]) -> Self {
        if data.starts_with(&[0x1f, 0x8b]) {
            Self::Gzip
        } else {
            Self::None
        }
    }
}

/// Decompress a retrieved body if it is gzip compressed.
pub async fn maybe_decompress(data: Vec<u8>) -> Result<Vec<u8>> {
    match Compression::detect(&data) {
        Compression::None => Ok(data),
        Compression::Gzip => {
            let mut decoder = GzipDecoder::new(data.as_slice());
            let mut decompressed = Vec::with_capacity(data.len() * 4);
            decoder.read_to_end(&mut decompressed).await?;

            Ok(decompressed)
        }
    }
}

/// Write a file atomically.
///
/// Content lands in `<path>.tmp` and is renamed into place, so concurrent
/// readers only ever observe complete bytes. Parent directories are
/// created.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| OpkgError::IoPath(parent.display().to_string(), e))?;
    }

    let tmp = path.with_file_name(format!(
        "{}.tmp",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    ));
    std::fs::write(&tmp, data).map_err(|e| OpkgError::IoPath(tmp.display().to_string(), e))?;
    std::fs::rename(&tmp, path).map_err(|e| OpkgError::IoPath(path.display().to_string(), e))?;

    Ok(())
}
