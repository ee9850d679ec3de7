//! Library half of the `trace-recorder` CLI.
//!
//! Keeps the command implementations callable from tests; `main.rs` only
//! parses arguments and dispatches.

pub mod commands;
pub mod signals;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracer_core::sink::SinkKind;
use tracing_subscriber::EnvFilter;

/// Environment variable consulted when neither the CLI nor the config names an output.
pub const OUTPUT_ENV: &str = "TRACER_OUTPUT";

/// Install the stderr log subscriber.
///
/// `RUST_LOG` selects the filter (default `warn`); `verbose` adds a `debug`
/// directive on top of it.
pub fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    // A subscriber may already be installed when commands run inside tests.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

/// Pick the output path: CLI flag, then config file, then `TRACER_OUTPUT`,
/// then the sink default.
///
/// The SQLite sink defaults to `<program file name>.sqlite` in the current
/// directory; the text sink defaults to standard output (`None`).
pub fn resolve_output(
    cli: Option<PathBuf>,
    configured: Option<PathBuf>,
    env: Option<OsString>,
    sink: SinkKind,
    program: Option<&str>,
) -> Option<PathBuf> {
    cli.or(configured)
        .or_else(|| env.filter(|value| !value.is_empty()).map(PathBuf::from))
        .or_else(|| match sink {
            SinkKind::Sqlite => Some(default_store_path(program)),
            SinkKind::Text => None,
        })
}

/// `<program file name>.sqlite`, or `trace.sqlite` when the program is unknown.
pub fn default_store_path(program: Option<&str>) -> PathBuf {
    let stem = program
        .and_then(|program| Path::new(program).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("trace");
    PathBuf::from(format!("{stem}.sqlite"))
}
