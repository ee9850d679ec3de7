//! Core data model for a recorded execution trace.
//!
//! A [`Trace`] is three append-only sequences:
//! - [`BasicBlock`]s in execution order,
//! - [`Instruction`]s, each pointing at the block that was current when it ran,
//! - [`MemoryAccess`]es, each pointing at the instruction that caused it.
//!
//! Parents are referenced by explicit ids handed out at append time rather than
//! by position. Ids start at 1 so they line up with SQLite rowids in the
//! relational store; "no parent yet" is modelled as `None` and persisted as `0`.

pub mod addr;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a recorded basic block (1-based, monotonically increasing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u64);

/// Identifier of a recorded instruction (1-based, monotonically increasing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstructionId(pub u64);

impl BlockId {
    /// Value stored for a parent reference; `0` when absent.
    pub fn column(id: Option<Self>) -> i64 {
        id.map_or(0, |id| id.0 as i64)
    }
}

impl InstructionId {
    /// Value stored for a parent reference; `0` when absent.
    pub fn column(id: Option<Self>) -> i64 {
        id.map_or(0, |id| id.0 as i64)
    }
}

/// A basic block entered by the traced program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: BlockId,
    /// Relocated start address.
    pub start: u64,
    pub size: u64,
}

impl BasicBlock {
    /// Address of the last byte of the block (`start + size - 1`).
    pub fn last_addr(&self) -> u64 {
        self.start.wrapping_add(self.size).wrapping_sub(1)
    }
}

/// An executed instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: InstructionId,
    /// Block that was current when the instruction was recorded. This is a
    /// positional relationship: the block does not necessarily contain `address`.
    pub block: Option<BlockId>,
    /// Relocated instruction address.
    pub address: u64,
    pub disassembly: String,
    #[serde(with = "hex::serde")]
    pub bytes: Vec<u8>,
}

/// Direction of a single memory access record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessDirection {
    Read,
    Write,
}

impl AccessDirection {
    /// Short code used in the relational `mem.type` column.
    pub fn code(self) -> &'static str {
        match self {
            AccessDirection::Read => "R",
            AccessDirection::Write => "W",
        }
    }

    /// Label used as the first word of a text-sink line.
    pub fn label(self) -> &'static str {
        match self {
            AccessDirection::Read => "Read",
            AccessDirection::Write => "Write",
        }
    }
}

/// Direction bits of an engine-reported access.
///
/// One engine access may carry both bits; it then yields a read record
/// followed by a write record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessFlags(u8);

impl AccessFlags {
    pub const NONE: AccessFlags = AccessFlags(0);
    pub const READ: AccessFlags = AccessFlags(0b01);
    pub const WRITE: AccessFlags = AccessFlags(0b10);
    pub const READ_WRITE: AccessFlags = AccessFlags(0b11);

    pub fn from_bits(bits: u8) -> Self {
        AccessFlags(bits & Self::READ_WRITE.0)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, direction: AccessDirection) -> bool {
        self.0 & AccessFlags::from(direction).0 != 0
    }

    pub fn intersection(self, other: AccessFlags) -> AccessFlags {
        AccessFlags(self.0 & other.0)
    }

    /// Directions set in these flags, reads first.
    pub fn directions(self) -> impl Iterator<Item = AccessDirection> {
        [AccessDirection::Read, AccessDirection::Write]
            .into_iter()
            .filter(move |direction| self.contains(*direction))
    }
}

impl From<AccessDirection> for AccessFlags {
    fn from(direction: AccessDirection) -> Self {
        match direction {
            AccessDirection::Read => AccessFlags::READ,
            AccessDirection::Write => AccessFlags::WRITE,
        }
    }
}

impl TryFrom<String> for AccessFlags {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let mut flags = AccessFlags::NONE;
        for c in value.chars() {
            flags = match c.to_ascii_uppercase() {
                'R' => AccessFlags(flags.0 | AccessFlags::READ.0),
                'W' => AccessFlags(flags.0 | AccessFlags::WRITE.0),
                _ => return Err(format!("invalid access flags '{value}'; expected R, W or RW")),
            };
        }
        Ok(flags)
    }
}

impl From<AccessFlags> for String {
    fn from(flags: AccessFlags) -> Self {
        flags.directions().map(AccessDirection::code).collect()
    }
}

/// Value moved by a memory access.
///
/// Scalar accesses carry an integer of `size` bytes; wider accesses (vector
/// registers, `rep movs` chunks, library buffers) carry the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessValue {
    Int(u64),
    Bytes(#[serde(with = "hex::serde")] Vec<u8>),
}

impl AccessValue {
    /// Little-endian bytes of the value.
    ///
    /// Integers are truncated to `size` bytes, at most the eight bytes of a
    /// `u64`; wider sizes would only add zero bytes. Blobs are returned
    /// unchanged.
    pub fn to_le_bytes(&self, size: u64) -> Vec<u8> {
        match self {
            AccessValue::Int(value) => {
                let len = size.min(8) as usize;
                value.to_le_bytes()[..len].to_vec()
            }
            AccessValue::Bytes(bytes) => bytes.clone(),
        }
    }
}

/// A single memory read or write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryAccess {
    /// Instruction that was current when the access was recorded. Only absent
    /// when instruction recording is suppressed.
    pub instruction: Option<InstructionId>,
    /// Relocated address of the causing instruction.
    pub instruction_address: u64,
    pub direction: AccessDirection,
    /// Relocated accessed address.
    pub address: u64,
    pub size: u64,
    pub value: AccessValue,
}

impl MemoryAccess {
    /// Address of the last accessed byte (`address + size - 1`).
    pub fn last_addr(&self) -> u64 {
        self.address.wrapping_add(self.size).wrapping_sub(1)
    }
}

/// A named `[start, end)` region of the traced process address space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub name: String,
    #[serde(with = "addr")]
    pub start: u64,
    #[serde(with = "addr")]
    pub end: u64,
}

impl MemoryRegion {
    pub fn new(name: impl Into<String>, start: u64, end: u64) -> Self {
        Self { name: name.into(), start, end }
    }
}

/// Metadata describing the traced process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Tracer identification written as `TRACERGRIND_VERSION`.
    pub tracer_version: String,
    pub arch: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Borrowed view of one freshly appended record, handed to streaming sinks.
#[derive(Debug, Clone, Copy)]
pub enum TraceRecord<'a> {
    Block(&'a BasicBlock),
    Instruction(&'a Instruction),
    Access(&'a MemoryAccess),
}

/// Record counts of a trace run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub blocks: u64,
    pub instructions: u64,
    pub accesses: u64,
}

impl fmt::Display for TraceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} basic blocks, {} instructions, {} memory accesses",
            self.blocks, self.instructions, self.accesses
        )
    }
}

/// An execution trace plus the process context captured when it started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub process: ProcessInfo,
    pub regions: Vec<MemoryRegion>,
    pub blocks: Vec<BasicBlock>,
    pub instructions: Vec<Instruction>,
    pub accesses: Vec<MemoryAccess>,
}

impl Trace {
    /// Create an empty trace for the given process and region snapshot.
    pub fn new(process: ProcessInfo, regions: Vec<MemoryRegion>) -> Self {
        Self { process, regions, blocks: Vec::new(), instructions: Vec::new(), accesses: Vec::new() }
    }

    /// Look up an instruction by id.
    pub fn instruction(&self, id: InstructionId) -> Option<&Instruction> {
        let index = usize::try_from(id.0).ok()?.checked_sub(1)?;
        self.instructions.get(index).filter(|ins| ins.id == id)
    }

    /// Id of the last block, if any was recorded.
    pub fn last_block_id(&self) -> Option<BlockId> {
        self.blocks.last().map(|block| block.id)
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary {
            blocks: self.blocks.len() as u64,
            instructions: self.instructions.len() as u64,
            accesses: self.accesses.len() as u64,
        }
    }
}
