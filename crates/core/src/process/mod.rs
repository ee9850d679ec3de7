//! Process metadata and memory-region snapshots.
//!
//! Region enumeration belongs to the host: anything implementing
//! [`MemoryRegionSource`] can supply the snapshot taken at trace start.
//! [`ProcMaps`] reads the Linux `/proc/<pid>/maps` format.

use std::path::{Path, PathBuf};

use crate::config::ProcessConfig;
use crate::model::{MemoryRegion, ProcessInfo};

/// Source of the named memory regions of the traced process.
pub trait MemoryRegionSource {
    fn regions(&self) -> std::io::Result<Vec<MemoryRegion>>;
}

/// Fixed list of regions (configuration, tests, engines that push their own map).
#[derive(Debug, Clone, Default)]
pub struct StaticRegions(pub Vec<MemoryRegion>);

impl MemoryRegionSource for StaticRegions {
    fn regions(&self) -> std::io::Result<Vec<MemoryRegion>> {
        Ok(self.0.clone())
    }
}

/// Regions parsed from a `/proc/<pid>/maps` style file.
#[derive(Debug, Clone)]
pub struct ProcMaps {
    path: PathBuf,
    full_path: bool,
}

impl ProcMaps {
    /// Maps of the current process.
    pub fn current() -> Self {
        Self::from_file("/proc/self/maps")
    }

    pub fn for_pid(pid: u32) -> Self {
        Self::from_file(format!("/proc/{pid}/maps"))
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), full_path: false }
    }

    /// Keep full module paths instead of file names.
    pub fn with_full_path(mut self, full_path: bool) -> Self {
        self.full_path = full_path;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MemoryRegionSource for ProcMaps {
    fn regions(&self) -> std::io::Result<Vec<MemoryRegion>> {
        let text = std::fs::read_to_string(&self.path)?;
        Ok(parse_maps(&text, self.full_path))
    }
}

/// Parse `start-end perms offset dev inode [pathname]` lines.
///
/// Anonymous mappings get an empty name; malformed lines are skipped.
pub fn parse_maps(text: &str, full_path: bool) -> Vec<MemoryRegion> {
    let mut regions = Vec::new();
    for line in text.lines() {
        let line = line.trim_start();
        let (range, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let parsed = range.split_once('-').and_then(|(start, end)| {
            Some((u64::from_str_radix(start, 16).ok()?, u64::from_str_radix(end, 16).ok()?))
        });
        let Some((start, end)) = parsed else {
            tracing::debug!(line, "skipping malformed maps line");
            continue;
        };

        let pathname = skip_fields(rest, 4);
        let name = if full_path || pathname.starts_with('[') {
            pathname
        } else {
            pathname.rsplit('/').next().unwrap_or_default()
        };
        regions.push(MemoryRegion::new(name, start, end));
    }
    regions
}

/// Drop `count` whitespace-separated fields; the remainder may contain spaces.
fn skip_fields(mut rest: &str, count: usize) -> &str {
    for _ in 0..count {
        rest = rest.trim_start();
        match rest.find(char::is_whitespace) {
            Some(idx) => rest = &rest[idx..],
            None => return "",
        }
    }
    rest.trim()
}

/// Architecture name as expected by trace viewers.
pub fn arch_name(arch: &str) -> String {
    match arch {
        "x86_64" => "AMD64".to_string(),
        "x86" => "X86".to_string(),
        "aarch64" => "ARM64".to_string(),
        "arm" => "ARM".to_string(),
        other => other.to_ascii_uppercase(),
    }
}

/// Build the process metadata for a trace.
///
/// Values from `overrides` win; otherwise the current executable, its
/// arguments and the compile-time architecture are used.
pub fn process_info(overrides: &ProcessConfig) -> ProcessInfo {
    let mut argv = std::env::args();
    let current_program = argv.next().unwrap_or_default();
    ProcessInfo {
        tracer_version: format!("tracer-core {}", crate::version()),
        arch: overrides.arch.clone().unwrap_or_else(|| arch_name(std::env::consts::ARCH)),
        program: overrides.program.clone().unwrap_or(current_program),
        args: overrides.args.clone().unwrap_or_else(|| argv.collect()),
    }
}

/// Join arguments into one shell-safe string.
///
/// Arguments made only of safe characters are kept as-is; others are wrapped
/// in single quotes, with embedded quotes written as `'"'"'`.
pub fn shell_join<S: AsRef<str>>(args: &[S]) -> String {
    args.iter().map(|arg| shell_quote(arg.as_ref())).collect::<Vec<_>>().join(" ")
}

fn shell_quote(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    let safe = arg.chars().all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r#"'"'"'"#))
    }
}
