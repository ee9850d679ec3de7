//! Tracer configuration.
//!
//! The configuration is parsed elsewhere (environment, CLI, a file) and handed
//! to the core as a plain [`TracerConfig`]. [`TracerConfig::validate`] rejects
//! impossible setups before any event is processed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::filter::{AddressSpan, FilterError, RangeFilter, WindowConfig};
use crate::model::{addr, MemoryRegion};
use crate::relocation::{AddressRelocationTable, RelocationError, RelocationRange, DEFAULT_BASE_ADDR};
use crate::sink::SinkKind;

/// Error type for configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid relocation configuration: {0}")]
    Relocation(#[from] RelocationError),

    #[error("Invalid {which} filter: {source}")]
    Filter { which: &'static str, source: FilterError },

    #[error("Invalid window: start and stop are both {addr:#x}")]
    DegenerateWindow { addr: u64 },

    #[error("Invalid region '{name}': start {start:#x} is above end {end:#x}")]
    InvalidRegion { name: String, start: u64, end: u64 },
}

/// Convenience result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// How instructions are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionMode {
    /// Every in-scope instruction is recorded before its accesses are seen.
    Eager,
    /// An instruction is recorded when its first qualifying access is seen.
    Lazy,
    /// Instructions are never recorded.
    Suppressed,
}

/// Which events end up in the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingPolicy {
    pub record_all_instructions: bool,
    pub suppress_instructions: bool,
    pub record_reads: bool,
    pub record_writes: bool,
    pub record_blocks: bool,
}

impl Default for RecordingPolicy {
    fn default() -> Self {
        Self {
            record_all_instructions: false,
            suppress_instructions: false,
            record_reads: true,
            record_writes: true,
            record_blocks: true,
        }
    }
}

impl RecordingPolicy {
    /// Eager recording wins over suppression when both are requested.
    pub fn instruction_mode(&self) -> InstructionMode {
        if self.record_all_instructions {
            InstructionMode::Eager
        } else if !self.suppress_instructions {
            InstructionMode::Lazy
        } else {
            InstructionMode::Suppressed
        }
    }

    /// Adjust the policy to what `sink` can persist.
    ///
    /// The relational store references blocks from instructions and
    /// instructions from accesses, so it always records both.
    pub fn normalized_for(mut self, sink: SinkKind) -> Self {
        if sink == SinkKind::Sqlite {
            if self.suppress_instructions {
                tracing::warn!("sqlite sink records instructions; ignoring suppress_instructions");
                self.suppress_instructions = false;
            }
            if !self.record_blocks {
                tracing::warn!("sqlite sink records basic blocks; ignoring record_blocks = false");
                self.record_blocks = true;
            }
        }
        self
    }
}

fn default_base() -> u64 {
    DEFAULT_BASE_ADDR
}

/// Process metadata overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
}

/// Complete tracer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracerConfig {
    #[serde(default)]
    pub sink: SinkKind,
    /// Output file; `None` means standard output for the text sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub recording: RecordingPolicy,
    /// Spans gating blocks, instructions and the accesses they cause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction_filter: Option<Vec<AddressSpan>>,
    /// Spans gating individual accesses by accessed address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_filter: Option<Vec<AddressSpan>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relocations: Vec<RelocationRange>,
    /// Offset for addresses outside every relocation range.
    #[serde(default = "default_base", with = "addr")]
    pub default_base: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<WindowConfig>,
    #[serde(default)]
    pub process: ProcessConfig,
    /// Region snapshot used when the host supplies no region source.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<MemoryRegion>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::default(),
            output: None,
            recording: RecordingPolicy::default(),
            instruction_filter: None,
            memory_filter: None,
            relocations: Vec::new(),
            default_base: DEFAULT_BASE_ADDR,
            window: None,
            process: ProcessConfig::default(),
            regions: Vec::new(),
        }
    }
}

impl TracerConfig {
    /// Check every part of the configuration without opening any output.
    pub fn validate(&self) -> ConfigResult<()> {
        self.relocation_table()?;
        self.instruction_filter()?;
        self.memory_filter()?;
        if let Some(window) = &self.window {
            if window.start == window.stop {
                return Err(ConfigError::DegenerateWindow { addr: window.start });
            }
        }
        if let Some(region) = self.regions.iter().find(|region| region.start > region.end) {
            return Err(ConfigError::InvalidRegion {
                name: region.name.clone(),
                start: region.start,
                end: region.end,
            });
        }
        Ok(())
    }

    /// Recording policy adjusted for the configured sink.
    pub fn effective_policy(&self) -> RecordingPolicy {
        self.recording.normalized_for(self.sink)
    }

    /// Register the configured ranges in order.
    pub fn relocation_table(&self) -> ConfigResult<AddressRelocationTable> {
        Ok(AddressRelocationTable::from_ranges(self.relocations.iter().cloned(), self.default_base)?)
    }

    pub fn instruction_filter(&self) -> ConfigResult<RangeFilter> {
        RangeFilter::from_config(self.instruction_filter.as_deref())
            .map_err(|source| ConfigError::Filter { which: "instruction", source })
    }

    pub fn memory_filter(&self) -> ConfigResult<RangeFilter> {
        RangeFilter::from_config(self.memory_filter.as_deref())
            .map_err(|source| ConfigError::Filter { which: "memory", source })
    }
}

/// Load a configuration file; `.yaml`/`.yml` files are parsed as YAML,
/// anything else as JSON.
pub fn load_config(path: &Path) -> Result<TracerConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tracer config at {}", path.display()))?;
    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    );
    let config: TracerConfig = if is_yaml {
        serde_yaml::from_str(&text).context("Failed to parse tracer config YAML")?
    } else {
        serde_json::from_str(&text).context("Failed to parse tracer config JSON")?
    };
    config
        .validate()
        .with_context(|| format!("Invalid tracer config at {}", path.display()))?;
    Ok(config)
}
