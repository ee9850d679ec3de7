use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracer_core::config::{load_config, InstructionMode, RecordingPolicy, TracerConfig};

/// Normalized view of a configuration, as `check-config --json` prints it.
#[derive(Debug, Serialize)]
pub struct ConfigReport {
    pub sink: String,
    pub instruction_mode: String,
    /// Policy after adjustment for the sink.
    pub recording: RecordingPolicy,
    pub relocations: Vec<String>,
    pub default_base: String,
    pub instruction_filter: Option<usize>,
    pub memory_filter: Option<usize>,
    pub window: bool,
    pub regions: usize,
}

impl ConfigReport {
    pub fn new(config: &TracerConfig) -> Result<Self> {
        let table = config.relocation_table().context("Invalid relocation ranges")?;
        let recording = config.effective_policy();
        let instruction_mode = match recording.instruction_mode() {
            InstructionMode::Eager => "eager",
            InstructionMode::Lazy => "lazy",
            InstructionMode::Suppressed => "suppressed",
        };
        Ok(Self {
            sink: config.sink.as_str().to_string(),
            instruction_mode: instruction_mode.to_string(),
            recording,
            relocations: table.ranges().iter().map(ToString::to_string).collect(),
            default_base: format!("{:#x}", table.default_base()),
            instruction_filter: config.instruction_filter.as_ref().map(Vec::len),
            memory_filter: config.memory_filter.as_ref().map(Vec::len),
            window: config.window.is_some(),
            regions: config.regions.len(),
        })
    }
}

/// Load and validate a configuration file, then describe it.
pub fn check_config_command(path: &Path, json: bool) -> Result<ConfigReport> {
    let config = load_config(path)?;
    let report = ConfigReport::new(&config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(report);
    }

    println!("Tracer config: {}", path.display());
    println!("  Sink: {}", report.sink);
    println!("  Instruction mode: {}", report.instruction_mode);
    println!("  Record reads: {}", report.recording.record_reads);
    println!("  Record writes: {}", report.recording.record_writes);
    println!("  Record blocks: {}", report.recording.record_blocks);
    println!("  Default base: {}", report.default_base);
    if report.relocations.is_empty() {
        println!("  Relocations: none (identity)");
    } else {
        println!("  Relocations:");
        for range in &report.relocations {
            println!("    - {range}");
        }
    }
    println!("  Instruction filter: {}", describe_filter(report.instruction_filter));
    println!("  Memory filter: {}", describe_filter(report.memory_filter));
    println!("  Window: {}", if report.window { "configured" } else { "always open" });
    println!("  Regions: {}", report.regions);
    Ok(report)
}

fn describe_filter(spans: Option<usize>) -> String {
    match spans {
        None => "off".to_string(),
        Some(count) => format!("{count} span(s)"),
    }
}
