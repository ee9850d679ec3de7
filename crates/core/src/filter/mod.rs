//! Address filtering.
//!
//! Filters decide what gets *recorded*; they never change what the engine
//! executes. Two kinds exist:
//! - [`RangeFilter`]: a static allow-list of half-open spans;
//! - [`LiveWindow`]: a start/stop pair that opens and closes recording as the
//!   traced program runs through given addresses.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::addr;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("Invalid filter span: start {start:#x} is after end {end:#x}")]
    InvalidSpan { start: u64, end: u64 },
}

/// A half-open address interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSpan {
    #[serde(with = "addr")]
    pub start: u64,
    #[serde(with = "addr")]
    pub end: u64,
}

impl AddressSpan {
    pub fn new(start: u64, end: u64) -> Result<Self, FilterError> {
        let span = Self { start, end };
        span.validate()?;
        Ok(span)
    }

    /// The whole 64-bit address space.
    pub fn everything() -> Self {
        Self { start: 0, end: u64::MAX }
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        if self.start > self.end {
            return Err(FilterError::InvalidSpan { start: self.start, end: self.end });
        }
        Ok(())
    }

    /// Half-open intersection test against `[start, end)`.
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        !(end <= self.start || self.end <= start)
    }
}

/// Allow-list of address spans. A filter without spans lets everything through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeFilter {
    spans: Option<Vec<AddressSpan>>,
}

impl RangeFilter {
    /// A filter that accepts every address.
    pub fn allow_all() -> Self {
        Self { spans: None }
    }

    pub fn from_spans(spans: Vec<AddressSpan>) -> Result<Self, FilterError> {
        for span in &spans {
            span.validate()?;
        }
        Ok(Self { spans: Some(spans) })
    }

    /// Build from an optional configured span list; `None` disables filtering.
    pub fn from_config(spans: Option<&[AddressSpan]>) -> Result<Self, FilterError> {
        match spans {
            Some(spans) => Self::from_spans(spans.to_vec()),
            None => Ok(Self::allow_all()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.spans.is_some()
    }

    /// True when `[start, end)` intersects any configured span, or when no
    /// spans are configured.
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        match &self.spans {
            None => true,
            Some(spans) => spans.iter().any(|span| span.overlaps(start, end)),
        }
    }

    /// Span test for an object of `size` bytes at `start`.
    ///
    /// Zero-sized objects are tested as a single byte.
    pub fn overlaps_sized(&self, start: u64, size: u64) -> bool {
        self.overlaps(start, start.saturating_add(size.max(1)))
    }
}

/// Window configuration: record between `start` and `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(with = "addr")]
    pub start: u64,
    #[serde(with = "addr")]
    pub stop: u64,
    /// Which pass through `start` opens the window; `0` opens it on every pass.
    #[serde(default)]
    pub occurrence: u32,
}

/// Recording window driven by the execution itself.
///
/// Executing `start` opens the window (on the configured occurrence, or on
/// every occurrence when it is `0`); executing `stop` closes it. The opening
/// address is recorded, the closing one is not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveWindow {
    config: WindowConfig,
    hits: u32,
    open: bool,
}

impl LiveWindow {
    pub fn new(config: WindowConfig) -> Self {
        Self { config, hits: 0, open: false }
    }

    /// Feed an executed address; returns whether it is inside the window.
    pub fn observe(&mut self, addr: u64) -> bool {
        if addr == self.config.start {
            self.hits = self.hits.saturating_add(1);
            if self.config.occurrence == 0 || self.hits == self.config.occurrence {
                self.open = true;
            }
        }
        if addr == self.config.stop {
            self.open = false;
        }
        self.open
    }

    /// What [`LiveWindow::observe`] would return for `addr`, without
    /// counting the pass.
    pub fn peek(&self, addr: u64) -> bool {
        self.clone().observe(addr)
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Number of times `start` has been executed so far.
    pub fn hits(&self) -> u32 {
        self.hits
    }
}
