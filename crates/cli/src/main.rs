use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use trace_recorder::commands::{check_config_command, record_command, RecordOptions};
use trace_recorder::init_tracing;

/// Instruction-level trace recorder.
///
/// This CLI is a thin wrapper around `tracer-core` (exposed in code as
/// `tracer_core`). It replays engine events recorded as JSON lines and writes
/// the resulting trace with the configured sink.
#[derive(Parser, Debug)]
#[command(
    name = "trace-recorder",
    version,
    about = "Record instruction-level execution traces",
    long_about = None
)]
struct Cli {
    /// Log debug output to stderr (on top of RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay an engine event stream and write the trace.
    ///
    /// Events are JSON lines, one engine callback per line. The output path
    /// comes from --output, then the config file, then TRACER_OUTPUT, then
    /// `<program>.sqlite` (sqlite sink) or stdout (text sink).
    Record {
        /// Tracer config file (JSON, or YAML with a .yaml/.yml extension).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Event stream to replay; `-` reads stdin.
        #[arg(long, default_value = "-")]
        events: PathBuf,

        /// Output file.
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Sink to write: sqlite (alias relational) or text.
        #[arg(long)]
        sink: Option<String>,

        /// Region snapshot in /proc/<pid>/maps format.
        #[arg(long)]
        maps: Option<PathBuf>,

        /// Keep full module paths from --maps instead of file names.
        #[arg(long, default_value_t = false)]
        full_path_maps: bool,

        /// Traced program name written to the trace metadata.
        #[arg(long)]
        program: Option<String>,

        /// Architecture written to the trace metadata (e.g. AMD64, ARM64).
        #[arg(long)]
        arch: Option<String>,

        /// Record every in-scope instruction, not only those touching memory.
        #[arg(long, default_value_t = false)]
        all_instructions: bool,

        /// Do not record instructions (text sink only).
        #[arg(long, default_value_t = false)]
        suppress_instructions: bool,

        /// Arguments of the traced program.
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Validate a tracer config file and describe its effective settings.
    CheckConfig {
        /// Tracer config file.
        config: PathBuf,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Record {
            config,
            events,
            output,
            sink,
            maps,
            full_path_maps,
            program,
            arch,
            all_instructions,
            suppress_instructions,
            args,
        } => {
            let options = RecordOptions {
                config,
                events,
                output,
                sink,
                maps,
                full_path_maps,
                program,
                arch,
                all_instructions,
                suppress_instructions,
                args,
            };
            record_command(&options)?;
        }
        Command::CheckConfig { config, json } => {
            check_config_command(&config, json)?;
        }
    }

    Ok(())
}
