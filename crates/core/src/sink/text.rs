use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::model::{Trace, TraceRecord};
use crate::sink::format::{access_value_hex, hex_bytes};
use crate::sink::{SinkError, SinkRequirements, SinkResult, TraceSink};

/// Text sink: one line per event, written as the events arrive.
///
/// Each line is handed to the underlying stream in a single write; the sink
/// adds no buffering of its own.
///
/// Line formats:
/// ```text
/// Map [0x{start:x}, 0x{end:x}]: {name}
/// BB address: 0x{addr:x}, size: {size}
/// Inst address: 0x{addr:x}, raw: {hex}, disas: {text}
/// Read instAddress: 0x{addr:x}, accessAddress: 0x{addr:x}, size: {n}, value: {hex}
/// Write instAddress: 0x{addr:x}, accessAddress: 0x{addr:x}, size: {n}, value: {hex}
/// ```
pub struct TextSink {
    out: Option<Box<dyn Write>>,
    target: String,
}

impl std::fmt::Debug for TextSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextSink")
            .field("target", &self.target)
            .field("open", &self.out.is_some())
            .finish()
    }
}

impl TextSink {
    /// Create (or truncate) `path` and write the trace into it.
    pub fn create(path: &Path) -> SinkResult<Self> {
        let file = File::create(path).map_err(|err| SinkError::io(path, err))?;
        Ok(Self::from_writer(file, path.display().to_string()))
    }

    /// Write the trace to standard output.
    pub fn stdout() -> Self {
        Self::from_writer(io::stdout(), "<stdout>")
    }

    /// Write the trace to an arbitrary writer.
    pub fn from_writer(out: impl Write + 'static, target: impl Into<String>) -> Self {
        Self { out: Some(Box::new(out)), target: target.into() }
    }

    fn line(&mut self, line: std::fmt::Arguments<'_>) -> SinkResult<()> {
        let out = self.out.as_mut().ok_or(SinkError::AlreadyFinalized { sink: "text" })?;
        out.write_all(format!("{line}\n").as_bytes())
            .map_err(|err| SinkError::io(&self.target, err))
    }
}

impl TraceSink for TextSink {
    fn name(&self) -> &'static str {
        "text"
    }

    fn requirements(&self) -> SinkRequirements {
        SinkRequirements { retain_records: false, strict_correlation: false }
    }

    fn begin(&mut self, trace: &Trace) -> SinkResult<()> {
        for region in &trace.regions {
            self.line(format_args!("Map [0x{:x}, 0x{:x}]: {}", region.start, region.end, region.name))?;
        }
        Ok(())
    }

    fn record(&mut self, record: TraceRecord<'_>) -> SinkResult<()> {
        match record {
            TraceRecord::Block(block) => {
                self.line(format_args!("BB address: 0x{:x}, size: {}", block.start, block.size))
            }
            TraceRecord::Instruction(ins) => self.line(format_args!(
                "Inst address: 0x{:x}, raw: {}, disas: {}",
                ins.address,
                hex_bytes(&ins.bytes),
                ins.disassembly
            )),
            TraceRecord::Access(access) => self.line(format_args!(
                "{} instAddress: 0x{:x}, accessAddress: 0x{:x}, size: {}, value: {}",
                access.direction.label(),
                access.instruction_address,
                access.address,
                access.size,
                access_value_hex(access)
            )),
        }
    }

    fn finalize(&mut self, _trace: &Trace) -> SinkResult<()> {
        let mut out = self.out.take().ok_or(SinkError::AlreadyFinalized { sink: "text" })?;
        out.flush().map_err(|err| SinkError::io(&self.target, err))?;
        tracing::debug!(target_stream = %self.target, "closed text trace");
        Ok(())
    }
}
