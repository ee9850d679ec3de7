//! Trace correlation.
//!
//! [`TraceRecorder`] turns a strictly ordered stream of normalized events into
//! a parent/child structure:
//! - each instruction is attached to the block that was last appended,
//! - each memory access is attached to the instruction that was last appended.
//!
//! Records are handed to the sink as they are appended and, when the sink asks
//! for it, retained in memory until [`TraceRecorder::finish`].

use thiserror::Error;

use crate::model::{
    AccessDirection, AccessFlags, AccessValue, BasicBlock, BlockId, Instruction, InstructionId,
    MemoryAccess, MemoryRegion, ProcessInfo, Trace, TraceRecord, TraceSummary,
};
use crate::sink::{SinkError, SinkRequirements, TraceSink};

/// Error type for recorder operations.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// An access arrived before any instruction was recorded.
    #[error("Memory access from instruction {instruction_address:#x} has no recorded instruction")]
    MissingInstruction { instruction_address: u64 },

    /// An access names another instruction than the one last recorded.
    #[error(
        "Memory access from instruction {instruction_address:#x} but the current instruction is {current_address:#x}"
    )]
    InstructionMismatch { instruction_address: u64, current_address: u64 },

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Convenience result type for recorder operations.
pub type RecorderResult<T> = Result<T, RecorderError>;

/// The most recently appended instruction.
#[derive(Debug, Clone, Copy)]
struct CurrentInstruction {
    id: InstructionId,
    address: u64,
}

/// Correlation state machine between engine events and the trace.
pub struct TraceRecorder {
    trace: Trace,
    sink: Box<dyn TraceSink>,
    requirements: SinkRequirements,
    current_block: Option<BlockId>,
    current_instruction: Option<CurrentInstruction>,
    summary: TraceSummary,
}

impl std::fmt::Debug for TraceRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceRecorder")
            .field("sink", &self.sink.name())
            .field("requirements", &self.requirements)
            .field("current_block", &self.current_block)
            .field("current_instruction", &self.current_instruction)
            .field("summary", &self.summary)
            .finish()
    }
}

impl TraceRecorder {
    /// Start a trace and announce it to the sink.
    pub fn new(
        process: ProcessInfo,
        regions: Vec<MemoryRegion>,
        mut sink: Box<dyn TraceSink>,
    ) -> RecorderResult<Self> {
        let trace = Trace::new(process, regions);
        sink.begin(&trace)?;
        let requirements = sink.requirements();
        Ok(Self {
            trace,
            sink,
            requirements,
            current_block: None,
            current_instruction: None,
            summary: TraceSummary::default(),
        })
    }

    /// Records retained so far (empty for streaming sinks).
    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn summary(&self) -> TraceSummary {
        self.summary
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.current_block
    }

    pub fn current_instruction(&self) -> Option<InstructionId> {
        self.current_instruction.map(|current| current.id)
    }

    /// Append a basic block; later instructions attach to it.
    pub fn on_basic_block_entry(&mut self, start: u64, size: u64) -> RecorderResult<BlockId> {
        self.summary.blocks += 1;
        let id = BlockId(self.summary.blocks);
        let block = BasicBlock { id, start, size };
        self.current_block = Some(id);

        self.sink.record(TraceRecord::Block(&block))?;
        if self.requirements.retain_records {
            self.trace.blocks.push(block);
        }
        Ok(id)
    }

    /// Append an instruction attached to the current block.
    pub fn on_instruction(
        &mut self,
        address: u64,
        disassembly: impl Into<String>,
        bytes: Vec<u8>,
    ) -> RecorderResult<InstructionId> {
        self.summary.instructions += 1;
        let id = InstructionId(self.summary.instructions);
        let ins = Instruction {
            id,
            block: self.current_block,
            address,
            disassembly: disassembly.into(),
            bytes,
        };
        self.current_instruction = Some(CurrentInstruction { id, address });

        self.sink.record(TraceRecord::Instruction(&ins))?;
        if self.requirements.retain_records {
            self.trace.instructions.push(ins);
        }
        Ok(id)
    }

    /// Append one access record per direction set in `flags`, reads first,
    /// attached to the current instruction.
    ///
    /// With a strict sink the current instruction must exist and sit at
    /// `instruction_address`; anything else is a dispatcher bug.
    pub fn on_memory_access(
        &mut self,
        instruction_address: u64,
        address: u64,
        size: u64,
        flags: AccessFlags,
        value: AccessValue,
    ) -> RecorderResult<()> {
        let parent = self.check_parent(instruction_address)?;
        for direction in flags.directions() {
            self.push_access(MemoryAccess {
                instruction: parent,
                instruction_address,
                direction,
                address,
                size,
                value: value.clone(),
            })?;
        }
        Ok(())
    }

    /// Inject a pseudo block and pseudo instruction standing for a call into
    /// opaque library code.
    ///
    /// The block is `(0, 1)`; the instruction sits at address 0 with `name` as
    /// its text and no opcode bytes.
    pub fn on_synthetic_library_call(&mut self, name: &str) -> RecorderResult<InstructionId> {
        self.on_basic_block_entry(0, 1)?;
        self.on_instruction(0, name, Vec::new())
    }

    /// Append an access performed inside opaque library code, attached to the
    /// pseudo instruction injected by [`Self::on_synthetic_library_call`].
    pub fn on_synthetic_library_access(
        &mut self,
        address: u64,
        size: u64,
        direction: AccessDirection,
        value: AccessValue,
    ) -> RecorderResult<()> {
        self.on_memory_access(0, address, size, AccessFlags::from(direction), value)
    }

    /// Hand the trace to the sink. Consumes the recorder, so this happens once.
    pub fn finish(mut self) -> RecorderResult<(Trace, TraceSummary)> {
        self.sink.finalize(&self.trace)?;
        tracing::debug!(sink = self.sink.name(), summary = %self.summary, "trace finalized");
        Ok((self.trace, self.summary))
    }

    fn check_parent(&self, instruction_address: u64) -> RecorderResult<Option<InstructionId>> {
        match self.current_instruction {
            Some(current) if current.address == instruction_address => Ok(Some(current.id)),
            Some(current) if self.requirements.strict_correlation => {
                Err(RecorderError::InstructionMismatch {
                    instruction_address,
                    current_address: current.address,
                })
            }
            None if self.requirements.strict_correlation => {
                Err(RecorderError::MissingInstruction { instruction_address })
            }
            // Without strict correlation an access only has a parent when it
            // matches the last recorded instruction.
            _ => Ok(None),
        }
    }

    fn push_access(&mut self, access: MemoryAccess) -> RecorderResult<()> {
        self.summary.accesses += 1;
        self.sink.record(TraceRecord::Access(&access))?;
        if self.requirements.retain_records {
            self.trace.accesses.push(access);
        }
        Ok(())
    }
}
