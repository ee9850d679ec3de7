//! Events emitted by the instrumentation engine.
//!
//! Addresses are raw engine addresses; the dispatcher relocates them. Recorded
//! streams are JSON lines, one externally tagged [`EngineEvent`] per line:
//!
//! ```text
//! {"basic_block_entry":{"start":"0x401000","end":"0x401010"}}
//! {"memory_access":{"instruction":{"address":"0x401004","disassembly":"mov eax, [rbx]","bytes":"8b03"},
//!   "accesses":[{"address":"0x7000","size":4,"flags":"R","value":{"int":3735928559}}]}}
//! ```

use std::io::{self, BufRead, ErrorKind};

use serde::{Deserialize, Serialize};

use crate::error::{TraceError, TraceResult};
use crate::model::{addr, AccessDirection, AccessFlags, AccessValue};

/// Static description of an executed instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionInfo {
    #[serde(with = "addr")]
    pub address: u64,
    #[serde(default)]
    pub disassembly: String,
    #[serde(default, with = "hex::serde")]
    pub bytes: Vec<u8>,
}

impl InstructionInfo {
    /// Exclusive end of the instruction bytes (at least one byte wide).
    pub fn end(&self) -> u64 {
        self.address.saturating_add((self.bytes.len() as u64).max(1))
    }
}

/// One access performed by an instruction execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAccess {
    #[serde(with = "addr")]
    pub address: u64,
    pub size: u64,
    pub flags: AccessFlags,
    pub value: AccessValue,
}

/// A callback from the instrumentation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineEvent {
    /// A basic block `[start, end)` is about to run.
    BasicBlockEntry {
        #[serde(with = "addr")]
        start: u64,
        #[serde(with = "addr")]
        end: u64,
    },
    /// An instruction is about to run.
    PreInstruction(InstructionInfo),
    /// One execution of `instruction` performed `accesses`.
    MemoryAccess { instruction: InstructionInfo, accesses: Vec<RawAccess> },
    /// The program entered opaque library code.
    LibraryCall { name: String },
    /// Opaque library code accessed memory.
    LibraryAccess {
        #[serde(with = "addr")]
        address: u64,
        size: u64,
        direction: AccessDirection,
        value: AccessValue,
    },
}

/// Reader for a JSON-lines event stream. Blank lines are skipped.
pub struct EventReader<R> {
    reader: R,
    line: usize,
    buf: Vec<u8>,
}

impl<R: BufRead> EventReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, line: 0, buf: Vec::new() }
    }

    /// Number of lines consumed so far.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Read the next event, giving up when a read is interrupted and
    /// `should_stop` returns true.
    ///
    /// Interrupted reads are retried otherwise, so a reader blocked on an idle
    /// pipe still notices a stop request delivered by a signal. Returns `None`
    /// at end of stream or when stopped.
    pub fn next_until(
        &mut self,
        should_stop: &mut dyn FnMut() -> bool,
    ) -> Option<TraceResult<EngineEvent>> {
        loop {
            match self.read_line(should_stop) {
                Ok(true) => {}
                Ok(false) => return None,
                Err(err) => return Some(Err(TraceError::Io(err))),
            }
            self.line += 1;
            let text = match std::str::from_utf8(&self.buf) {
                Ok(text) => text.trim(),
                Err(err) => {
                    return Some(Err(TraceError::Io(io::Error::new(ErrorKind::InvalidData, err))))
                }
            };
            if text.is_empty() {
                continue;
            }
            return Some(
                serde_json::from_str(text)
                    .map_err(|source| TraceError::Event { line: self.line, source }),
            );
        }
    }

    /// Fill `buf` with the next line. `Ok(false)` means end of stream or stop.
    fn read_line(&mut self, should_stop: &mut dyn FnMut() -> bool) -> io::Result<bool> {
        self.buf.clear();
        loop {
            let available = match self.reader.fill_buf() {
                Ok(available) => available,
                Err(err) if err.kind() == ErrorKind::Interrupted => {
                    if should_stop() {
                        return Ok(false);
                    }
                    continue;
                }
                Err(err) => return Err(err),
            };
            if available.is_empty() {
                return Ok(!self.buf.is_empty());
            }
            match available.iter().position(|&byte| byte == b'\n') {
                Some(pos) => {
                    self.buf.extend_from_slice(&available[..=pos]);
                    self.reader.consume(pos + 1);
                    return Ok(true);
                }
                None => {
                    let len = available.len();
                    self.buf.extend_from_slice(available);
                    self.reader.consume(len);
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for EventReader<R> {
    type Item = TraceResult<EngineEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_until(&mut || false)
    }
}
