use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tracer_core::config::{load_config, TracerConfig};
use tracer_core::dispatcher::{DispatchStats, EventReader};
use tracer_core::model::{MemoryRegion, TraceSummary};
use tracer_core::process::{process_info, MemoryRegionSource, ProcMaps, StaticRegions};
use tracer_core::session::TraceSession;
use tracer_core::sink::SinkKind;

use crate::{resolve_output, signals, OUTPUT_ENV};

/// Inputs of the `record` command.
#[derive(Debug, Clone, Default)]
pub struct RecordOptions {
    /// JSON or YAML tracer configuration. Defaults apply when absent.
    pub config: Option<PathBuf>,
    /// JSON-lines engine event stream; `-` reads standard input.
    pub events: PathBuf,
    pub output: Option<PathBuf>,
    /// Sink name overriding the configuration.
    pub sink: Option<String>,
    /// `/proc/<pid>/maps` style region snapshot.
    pub maps: Option<PathBuf>,
    pub full_path_maps: bool,
    pub program: Option<String>,
    pub arch: Option<String>,
    pub all_instructions: bool,
    pub suppress_instructions: bool,
    /// Arguments of the traced program.
    pub args: Vec<String>,
}

/// What a `record` run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome {
    pub sink: String,
    /// `None` when the text sink streamed to standard output.
    pub output: Option<PathBuf>,
    pub events: u64,
    pub interrupted: bool,
    pub summary: TraceSummary,
    #[serde(skip)]
    pub stats: DispatchStats,
}

/// Parse a sink name as accepted on the command line.
pub fn parse_sink(name: &str) -> Result<SinkKind> {
    match name {
        "sqlite" | "relational" => Ok(SinkKind::Sqlite),
        "text" => Ok(SinkKind::Text),
        other => Err(anyhow!("Invalid sink '{}'. Allowed: sqlite, relational, text", other)),
    }
}

/// Build the effective configuration: file (or defaults), then CLI overrides.
pub fn build_config(options: &RecordOptions) -> Result<TracerConfig> {
    let mut config = match &options.config {
        Some(path) => load_config(path)?,
        None => TracerConfig::default(),
    };

    if let Some(sink) = &options.sink {
        config.sink = parse_sink(sink)?;
    }
    if options.all_instructions {
        config.recording.record_all_instructions = true;
    }
    if options.suppress_instructions {
        config.recording.suppress_instructions = true;
    }
    if options.program.is_some() {
        config.process.program = options.program.clone();
    }
    if options.arch.is_some() {
        config.process.arch = options.arch.clone();
    }
    if !options.args.is_empty() {
        config.process.args = Some(options.args.clone());
    }
    config.output = resolve_output(
        options.output.clone(),
        config.output.take(),
        std::env::var_os(OUTPUT_ENV),
        config.sink,
        config.process.program.as_deref(),
    );

    config.validate().context("Invalid tracer configuration")?;
    Ok(config)
}

/// Region snapshot: the maps file when given, else the configured list.
pub fn load_regions(options: &RecordOptions, config: &TracerConfig) -> Result<Vec<MemoryRegion>> {
    match &options.maps {
        Some(path) => ProcMaps::from_file(path)
            .with_full_path(options.full_path_maps)
            .regions()
            .with_context(|| format!("Failed to read memory maps at {}", path.display())),
        None => Ok(StaticRegions(config.regions.clone()).regions()?),
    }
}

fn open_events(path: &Path) -> Result<Box<dyn BufRead>> {
    if path == Path::new("-") {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file = File::open(path)
        .with_context(|| format!("Failed to open event stream at {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Replay an engine event stream into the configured sink.
pub fn record_command(options: &RecordOptions) -> Result<RecordOutcome> {
    let config = build_config(options)?;
    let regions = load_regions(options, &config)?;
    let process = process_info(&config.process);
    signals::install_stop_handlers()?;
    let events = open_events(&options.events)?;

    let mut session = TraceSession::from_config(&config, process, regions)
        .context("Failed to start trace session")?;
    // On error the session is dropped here and finalizes the partial trace.
    let handled = session
        .replay(EventReader::new(events), signals::stop_requested)
        .context("Failed to replay engine events")?;
    let finished = session.finish().context("Failed to finalize trace")?;

    let outcome = RecordOutcome {
        sink: config.sink.as_str().to_string(),
        output: config.output.clone(),
        events: handled,
        interrupted: signals::stop_requested(),
        summary: finished.summary,
        stats: finished.stats,
    };

    // Keep stdout clean when the trace itself went there.
    if outcome.output.is_none() {
        print_outcome(&mut io::stderr().lock(), &outcome)?;
    } else {
        print_outcome(&mut io::stdout().lock(), &outcome)?;
    }
    Ok(outcome)
}

/// Human-readable run report.
pub fn print_outcome(out: &mut dyn Write, outcome: &RecordOutcome) -> io::Result<()> {
    writeln!(out, "Recorded trace:")?;
    writeln!(out, "  Sink: {}", outcome.sink)?;
    match &outcome.output {
        Some(path) => writeln!(out, "  Output: {}", path.display())?,
        None => writeln!(out, "  Output: <stdout>")?,
    }
    writeln!(out, "  Events: {}", outcome.events)?;
    writeln!(out, "  Basic blocks: {}", outcome.summary.blocks)?;
    writeln!(out, "  Instructions: {}", outcome.summary.instructions)?;
    writeln!(out, "  Memory accesses: {}", outcome.summary.accesses)?;
    let dropped = outcome.stats.outside_window
        + outcome.stats.blocks_filtered
        + outcome.stats.instructions_filtered
        + outcome.stats.accesses_filtered;
    if dropped > 0 {
        writeln!(out, "  Dropped by filters/window: {dropped}")?;
    }
    if outcome.interrupted {
        writeln!(out, "  Stopped early by signal")?;
    }
    Ok(())
}
