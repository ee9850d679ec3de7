//! Event dispatch and recording policy.
//!
//! The engine calls [`EventHandler::handle_event`] synchronously for every
//! callback. [`Dispatcher`] applies, in order: the live window, the recording
//! policy, the address filters (on raw engine addresses) and relocation, then
//! forwards what is left to the [`TraceRecorder`].

pub mod events;

use crate::config::{InstructionMode, RecordingPolicy};
use crate::error::TraceResult;
use crate::filter::{LiveWindow, RangeFilter};
use crate::model::{AccessDirection, AccessFlags, AccessValue};
use crate::recorder::TraceRecorder;
use crate::relocation::AddressRelocationTable;

pub use events::{EngineEvent, EventReader, InstructionInfo, RawAccess};

/// Receiver of engine callbacks.
pub trait EventHandler {
    fn handle_event(&mut self, event: EngineEvent) -> TraceResult<()>;
}

/// Counters of what the dispatcher saw and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub events: u64,
    /// Events dropped because the live window was closed.
    pub outside_window: u64,
    pub blocks_filtered: u64,
    pub instructions_filtered: u64,
    pub accesses_filtered: u64,
}

/// Applies filters, policy and relocation to engine events.
#[derive(Debug)]
pub struct Dispatcher {
    recorder: TraceRecorder,
    relocation: AddressRelocationTable,
    policy: RecordingPolicy,
    instruction_filter: RangeFilter,
    memory_filter: RangeFilter,
    window: Option<LiveWindow>,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(recorder: TraceRecorder, relocation: AddressRelocationTable, policy: RecordingPolicy) -> Self {
        Self {
            recorder,
            relocation,
            policy,
            instruction_filter: RangeFilter::allow_all(),
            memory_filter: RangeFilter::allow_all(),
            window: None,
            stats: DispatchStats::default(),
        }
    }

    pub fn with_instruction_filter(mut self, filter: RangeFilter) -> Self {
        self.instruction_filter = filter;
        self
    }

    pub fn with_memory_filter(mut self, filter: RangeFilter) -> Self {
        self.memory_filter = filter;
        self
    }

    pub fn with_window(mut self, window: Option<LiveWindow>) -> Self {
        self.window = window;
        self
    }

    pub fn recorder(&self) -> &TraceRecorder {
        &self.recorder
    }

    pub fn policy(&self) -> &RecordingPolicy {
        &self.policy
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn into_recorder(self) -> TraceRecorder {
        self.recorder
    }

    /// Direction bits the policy lets through.
    fn allowed_flags(&self) -> AccessFlags {
        let mut bits = 0;
        if self.policy.record_reads {
            bits |= AccessFlags::READ.bits();
        }
        if self.policy.record_writes {
            bits |= AccessFlags::WRITE.bits();
        }
        AccessFlags::from_bits(bits)
    }

    /// Feed the live window and report whether recording is on.
    ///
    /// When every instruction is reported the window follows instructions;
    /// otherwise it follows block starts. `None` leaves the window untouched.
    fn window_open(&mut self, observed: Option<u64>) -> bool {
        let open = match (&mut self.window, observed) {
            (None, _) => true,
            (Some(window), Some(addr)) => window.observe(addr),
            (Some(window), None) => window.is_open(),
        };
        if !open {
            self.stats.outside_window += 1;
        }
        open
    }

    /// Window check for a block entry.
    ///
    /// In eager mode the block's first instruction drives the window, so the
    /// block looks ahead at the state that instruction will produce.
    fn block_in_window(&mut self, start: u64) -> bool {
        if self.policy.instruction_mode() != InstructionMode::Eager {
            return self.window_open(Some(start));
        }
        let open = self.window.as_ref().map_or(true, |window| window.peek(start));
        if !open {
            self.stats.outside_window += 1;
        }
        open
    }

    fn on_basic_block(&mut self, start: u64, end: u64) -> TraceResult<()> {
        if !self.block_in_window(start) || !self.policy.record_blocks {
            return Ok(());
        }
        if !self.instruction_filter.overlaps(start, end) {
            self.stats.blocks_filtered += 1;
            return Ok(());
        }
        let size = end.saturating_sub(start);
        self.recorder.on_basic_block_entry(self.relocation.convert(start), size)?;
        Ok(())
    }

    fn on_pre_instruction(&mut self, ins: InstructionInfo) -> TraceResult<()> {
        // Only eager recording consumes pre-instruction callbacks.
        if self.policy.instruction_mode() != InstructionMode::Eager {
            return Ok(());
        }
        if !self.window_open(Some(ins.address)) {
            return Ok(());
        }
        if !self.instruction_filter.overlaps(ins.address, ins.end()) {
            self.stats.instructions_filtered += 1;
            return Ok(());
        }
        self.recorder.on_instruction(self.relocation.convert(ins.address), ins.disassembly, ins.bytes)?;
        Ok(())
    }

    fn on_memory_access(&mut self, ins: InstructionInfo, accesses: Vec<RawAccess>) -> TraceResult<()> {
        if !self.window_open(None) {
            return Ok(());
        }
        if !self.instruction_filter.overlaps(ins.address, ins.end()) {
            self.stats.accesses_filtered += accesses.len() as u64;
            return Ok(());
        }

        let allowed = self.allowed_flags();
        let qualifying: Vec<(RawAccess, AccessFlags)> = accesses
            .into_iter()
            .filter_map(|access| {
                let flags = access.flags.intersection(allowed);
                let keep =
                    !flags.is_empty() && self.memory_filter.overlaps_sized(access.address, access.size);
                if !keep {
                    self.stats.accesses_filtered += 1;
                }
                keep.then_some((access, flags))
            })
            .collect();
        if qualifying.is_empty() {
            return Ok(());
        }

        let ins_address = self.relocation.convert(ins.address);
        if self.policy.instruction_mode() == InstructionMode::Lazy {
            self.recorder.on_instruction(ins_address, ins.disassembly, ins.bytes)?;
        }
        for (access, flags) in qualifying {
            self.recorder.on_memory_access(
                ins_address,
                self.relocation.convert(access.address),
                access.size,
                flags,
                access.value,
            )?;
        }
        Ok(())
    }

    fn on_library_call(&mut self, name: &str) -> TraceResult<()> {
        if !self.window_open(None) {
            return Ok(());
        }
        self.recorder.on_synthetic_library_call(name)?;
        Ok(())
    }

    fn on_library_access(
        &mut self,
        address: u64,
        size: u64,
        direction: AccessDirection,
        value: AccessValue,
    ) -> TraceResult<()> {
        if !self.window_open(None) {
            return Ok(());
        }
        let allowed = self.allowed_flags().contains(direction);
        if !allowed || !self.memory_filter.overlaps_sized(address, size) {
            self.stats.accesses_filtered += 1;
            return Ok(());
        }
        self.recorder.on_synthetic_library_access(
            self.relocation.convert(address),
            size,
            direction,
            value,
        )?;
        Ok(())
    }
}

impl EventHandler for Dispatcher {
    fn handle_event(&mut self, event: EngineEvent) -> TraceResult<()> {
        self.stats.events += 1;
        match event {
            EngineEvent::BasicBlockEntry { start, end } => self.on_basic_block(start, end),
            EngineEvent::PreInstruction(ins) => self.on_pre_instruction(ins),
            EngineEvent::MemoryAccess { instruction, accesses } => {
                self.on_memory_access(instruction, accesses)
            }
            EngineEvent::LibraryCall { name } => self.on_library_call(&name),
            EngineEvent::LibraryAccess { address, size, direction, value } => {
                self.on_library_access(address, size, direction, value)
            }
        }
    }
}
