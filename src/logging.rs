//! Logging setup for bidstage.
//!
//! Library modules log through the `log` facade only; the binary installs an
//! `env_logger` backend here. Filtering, highest priority first:
//!
//! 1. `RUST_LOG`, when set, replaces everything below
//! 2. `--quiet` (errors only) or `-v`/`-vv` (debug/trace) for bidstage's own modules
//! 3. Info for bidstage, warnings for dependencies
//!
//! Debug builds prefix each line with a timestamp, and with the bidstage
//! module (`[engine::runner]`) when verbose.
//!
//! ```rust,no_run
//! use bidstage::logging::init_logging;
//!
//! init_logging(1, false);
//! log::debug!("cache loaded");
//! ```

use std::io::Write;

use env_logger::Builder;
use log::LevelFilter;

const CRATE_TARGET: &str = env!("CARGO_CRATE_NAME");

/// Level applied to every crate other than bidstage.
const DEPENDENCY_LEVEL: LevelFilter = LevelFilter::Warn;

/// Install the global logger from CLI verbosity flags.
///
/// A logger that is already installed is left in place, so `run_app` may be
/// called more than once per process.
pub fn init_logging(verbose: u8, quiet: bool) {
    let mut builder = Builder::new();
    let rust_log = std::env::var("RUST_LOG").ok().filter(|v| !v.trim().is_empty());
    let level = crate_level(verbose, quiet);

    match &rust_log {
        Some(spec) => {
            builder.parse_filters(spec);
        }
        None => {
            builder
                .filter_level(DEPENDENCY_LEVEL.min(level))
                .filter_module(CRATE_TARGET, level);
        }
    }
    install_format(&mut builder, verbose);

    if builder.try_init().is_ok() {
        match rust_log {
            Some(spec) => log::debug!("Log filter from RUST_LOG: {spec}"),
            None => log::debug!("Log level {level} (dependencies at {DEPENDENCY_LEVEL})"),
        }
    }
}

/// Level for bidstage's own modules; `quiet` wins over any `-v`.
fn crate_level(verbose: u8, quiet: bool) -> LevelFilter {
    match (quiet, verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    }
}

/// `bidstage::engine::runner` -> `engine::runner`; foreign modules unchanged.
#[cfg_attr(not(debug_assertions), allow(dead_code))]
fn short_module(path: &str) -> &str {
    path.strip_prefix(CRATE_TARGET)
        .and_then(|rest| rest.strip_prefix("::"))
        .unwrap_or(path)
}

#[cfg(debug_assertions)]
fn install_format(builder: &mut Builder, verbose: u8) {
    builder.format(move |buf, record| {
        let style = buf.default_level_style(record.level());
        let stamp = buf.timestamp_seconds();
        match record.module_path().filter(|_| verbose > 0) {
            Some(module) => writeln!(
                buf,
                "{stamp} {style}{:<5}{style:#} [{}] {}",
                record.level(),
                short_module(module),
                record.args()
            ),
            None => writeln!(buf, "{stamp} {style}{:<5}{style:#} {}", record.level(), record.args()),
        }
    });
}

#[cfg(not(debug_assertions))]
fn install_format(builder: &mut Builder, _verbose: u8) {
    builder.format(|buf, record| {
        let style = buf.default_level_style(record.level());
        writeln!(buf, "{style}{:<5}{style:#} {}", record.level(), record.args())
    });
}
