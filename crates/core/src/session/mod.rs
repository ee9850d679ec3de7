//! Scoped trace runs.
//!
//! A [`TraceSession`] owns everything a run needs and guarantees that the sink
//! is finalized exactly once:
//! - [`TraceSession::finish`] finalizes explicitly and disarms the guard;
//! - dropping an unfinished session (early return, `?`, panic unwind)
//!   finalizes from `Drop`.
//!
//! Signals are the host's business: it should stop feeding events and let the
//! session finish or drop normally. [`TraceSession::replay`] takes a stop
//! predicate for that and also checks it when a blocked read is interrupted.

use std::io::BufRead;

use crate::config::{InstructionMode, TracerConfig};
use crate::dispatcher::{DispatchStats, Dispatcher, EngineEvent, EventHandler, EventReader};
use crate::error::{TraceError, TraceResult};
use crate::filter::LiveWindow;
use crate::model::{MemoryRegion, ProcessInfo, Trace, TraceSummary};
use crate::recorder::TraceRecorder;
use crate::sink::{open_sink, SinkError, TraceSink};

/// Outcome of a finished run.
#[derive(Debug)]
pub struct FinishedTrace {
    /// Retained records (empty sequences for streaming sinks).
    pub trace: Trace,
    pub summary: TraceSummary,
    pub stats: DispatchStats,
}

/// A trace run with a guaranteed, single finalize.
#[derive(Debug)]
pub struct TraceSession {
    dispatcher: Option<Dispatcher>,
}

impl TraceSession {
    /// Validate `config`, open its sink and start recording.
    pub fn from_config(
        config: &TracerConfig,
        process: ProcessInfo,
        regions: Vec<MemoryRegion>,
    ) -> TraceResult<Self> {
        config.validate()?;
        let policy = config.effective_policy();
        let sink = open_sink(config.sink, config.output.as_deref(), &policy)?;
        Self::with_sink(config, process, regions, sink)
    }

    /// Start recording into an already opened sink.
    pub fn with_sink(
        config: &TracerConfig,
        process: ProcessInfo,
        regions: Vec<MemoryRegion>,
        sink: Box<dyn TraceSink>,
    ) -> TraceResult<Self> {
        let relocation = config.relocation_table()?;
        let instruction_filter = config.instruction_filter()?;
        let memory_filter = config.memory_filter()?;
        let policy = config.effective_policy();
        if sink.requirements().strict_correlation
            && policy.instruction_mode() == InstructionMode::Suppressed
        {
            return Err(SinkError::IncompatiblePolicy {
                sink: sink.name(),
                reason: "memory accesses need instruction rows; suppress_instructions must be false",
            }
            .into());
        }

        tracing::debug!(
            sink = sink.name(),
            relocations = relocation.ranges().len(),
            regions = regions.len(),
            ?policy,
            "starting trace session"
        );
        let recorder = TraceRecorder::new(process, regions, sink)?;
        let dispatcher = Dispatcher::new(recorder, relocation, policy)
            .with_instruction_filter(instruction_filter)
            .with_memory_filter(memory_filter)
            .with_window(config.window.map(LiveWindow::new));
        Ok(Self { dispatcher: Some(dispatcher) })
    }

    /// True until the session has been finalized.
    pub fn is_active(&self) -> bool {
        self.dispatcher.is_some()
    }

    pub fn dispatcher(&self) -> Option<&Dispatcher> {
        self.dispatcher.as_ref()
    }

    /// Feed every event of a JSON-lines stream, stopping early when
    /// `should_stop` returns true. It is polled before handling each event and whenever
    /// a blocked read is interrupted. Returns the number of events handled.
    pub fn replay<R: BufRead>(
        &mut self,
        mut reader: EventReader<R>,
        mut should_stop: impl FnMut() -> bool,
    ) -> TraceResult<u64> {
        let mut handled = 0;
        while let Some(event) = reader.next_until(&mut should_stop) {
            if should_stop() {
                break;
            }
            self.handle_event(event?)?;
            handled += 1;
        }
        if should_stop() {
            tracing::warn!(handled, "stop requested; ending trace early");
        }
        Ok(handled)
    }

    /// Finalize the sink now. The drop guard will not finalize again.
    pub fn finish(mut self) -> TraceResult<FinishedTrace> {
        self.finalize()
    }

    fn finalize(&mut self) -> TraceResult<FinishedTrace> {
        let dispatcher = self.dispatcher.take().ok_or(TraceError::Finalized)?;
        let stats = dispatcher.stats();
        let (trace, summary) = dispatcher.into_recorder().finish()?;
        tracing::info!(%summary, events = stats.events, "trace session finished");
        Ok(FinishedTrace { trace, summary, stats })
    }
}

impl EventHandler for TraceSession {
    fn handle_event(&mut self, event: EngineEvent) -> TraceResult<()> {
        self.dispatcher.as_mut().ok_or(TraceError::Finalized)?.handle_event(event)
    }
}

impl Drop for TraceSession {
    fn drop(&mut self) {
        if self.dispatcher.is_none() {
            return;
        }
        if std::thread::panicking() {
            tracing::warn!("trace session unwinding; finalizing partial trace");
        }
        if let Err(err) = self.finalize() {
            tracing::error!(error = %err, "failed to finalize trace session");
        }
    }
}
