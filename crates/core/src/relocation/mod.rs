//! Address relocation.
//!
//! Addresses reported by the engine come from several uncorrelated spaces (the
//! traced binary, a synthetic stack allocated by the tracer, shared
//! libraries). An [`AddressRelocationTable`] maps them into one logical
//! space so that two runs of the same program produce comparable traces.
//!
//! Conversion rules:
//! - no range registered: every address passes through unchanged;
//! - an address inside a range's input domain is moved to
//!   `addr - begin + new_base`;
//! - any other address is offset by the table's default base, which parks
//!   unmapped addresses in a region of their own.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::addr;

/// Offset applied to addresses matching no registered range.
pub const DEFAULT_BASE_ADDR: u64 = 0x8000_0000_0000_0000;

/// Errors raised while registering relocation ranges.
///
/// These are configuration errors: they are reported before instrumentation
/// starts and abort the run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelocationError {
    #[error("Invalid relocation range: begin {begin:#x} is after end {end:#x}")]
    InvalidRange { begin: u64, end: u64 },

    #[error("Relocation range {range} does not fit in the 64-bit address space")]
    OutputOverflow { range: String },

    #[error("Relocation range {range} conflicts with registered range {existing}")]
    Conflict { range: String, existing: String },
}

/// Mapping of the input interval `[begin, end)` onto `[new_base, new_base + len)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelocationRange {
    #[serde(with = "addr")]
    pub begin: u64,
    #[serde(with = "addr")]
    pub end: u64,
    #[serde(with = "addr")]
    pub new_base: u64,
    /// Free-form description (e.g. `[Stack]`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Caller-defined tag carried along with the range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl RelocationRange {
    /// Create a range, validating `begin <= end` and that the output domain
    /// does not wrap around.
    pub fn new(begin: u64, end: u64, new_base: u64) -> Result<Self, RelocationError> {
        let range = Self { begin, end, new_base, comment: None, tag: None };
        range.validate()?;
        Ok(range)
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn validate(&self) -> Result<(), RelocationError> {
        if self.begin > self.end {
            return Err(RelocationError::InvalidRange { begin: self.begin, end: self.end });
        }
        if self.new_base.checked_add(self.len()).is_none() {
            return Err(RelocationError::OutputOverflow { range: self.to_string() });
        }
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// Exclusive end of the output domain.
    pub fn new_end(&self) -> u64 {
        self.new_base + self.len()
    }

    /// Two ranges conflict when their input domains overlap or their output
    /// domains overlap.
    pub fn conflicts_with(&self, other: &RelocationRange) -> bool {
        let input = self.begin < other.end && other.begin < self.end;
        let output = self.new_base < other.new_end() && other.new_base < self.new_end();
        input || output
    }

    /// Relocate `addr` if it lies inside the input domain.
    pub fn convert(&self, addr: u64) -> Option<u64> {
        (self.begin <= addr && addr < self.end).then(|| addr - self.begin + self.new_base)
    }
}

impl fmt::Display for RelocationRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x}) -> {:#x}", self.begin, self.end, self.new_base)?;
        if let Some(comment) = &self.comment {
            write!(f, " ({comment})")?;
        }
        Ok(())
    }
}

/// Ordered set of non-conflicting relocation ranges.
#[derive(Debug, Clone)]
pub struct AddressRelocationTable {
    ranges: Vec<RelocationRange>,
    /// Non-empty ranges keyed by `begin`; their input domains are disjoint, so
    /// the greatest `begin <= addr` is the only candidate for a match.
    by_begin: BTreeMap<u64, usize>,
    default_base: u64,
}

impl Default for AddressRelocationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressRelocationTable {
    /// Empty table using [`DEFAULT_BASE_ADDR`] for unmatched addresses.
    pub fn new() -> Self {
        Self::with_default_base(DEFAULT_BASE_ADDR)
    }

    pub fn with_default_base(default_base: u64) -> Self {
        Self { ranges: Vec::new(), by_begin: BTreeMap::new(), default_base }
    }

    /// Build a table from ranges, registering them in order.
    pub fn from_ranges(
        ranges: impl IntoIterator<Item = RelocationRange>,
        default_base: u64,
    ) -> Result<Self, RelocationError> {
        let mut table = Self::with_default_base(default_base);
        for range in ranges {
            table.register(range)?;
        }
        Ok(table)
    }

    /// Register a range after checking it against every registered range.
    ///
    /// Ranges are never merged or reordered; a conflicting range is rejected.
    pub fn register(&mut self, range: RelocationRange) -> Result<(), RelocationError> {
        range.validate()?;
        if let Some(existing) = self.ranges.iter().find(|r| r.conflicts_with(&range)) {
            return Err(RelocationError::Conflict {
                range: range.to_string(),
                existing: existing.to_string(),
            });
        }

        tracing::debug!(range = %range, "registered relocation range");
        if !range.is_empty() {
            self.by_begin.insert(range.begin, self.ranges.len());
        }
        self.ranges.push(range);
        Ok(())
    }

    pub fn ranges(&self) -> &[RelocationRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn default_base(&self) -> u64 {
        self.default_base
    }

    /// Convert a raw engine address into the logical address space.
    pub fn convert(&self, addr: u64) -> u64 {
        if self.ranges.is_empty() {
            return addr;
        }
        self.by_begin
            .range(..=addr)
            .next_back()
            .and_then(|(_, &index)| self.ranges[index].convert(addr))
            .unwrap_or_else(|| addr.wrapping_add(self.default_base))
    }
}
