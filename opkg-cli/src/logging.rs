// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use log::{LevelFilter, Log, Metadata, Record};

/// A `log` backend that writes to stderr.
struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

/// Install the stderr logger.
///
/// Debug output is enabled by setting the `OPKG_DEBUG` environment
/// variable; otherwise only warnings and errors are emitted.
pub fn init_from_env() {
    let level = if std::env::var_os("OPKG_DEBUG").is_some() {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
