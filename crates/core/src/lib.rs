//! tracer-core
//!
//! Core library for recording instruction-level execution traces.
//!
//! An external instrumentation engine reports basic-block entries, executed
//! instructions and memory accesses. This crate relocates their addresses into
//! one logical address space, correlates them into a parent/child trace
//! (blocks -> instructions -> accesses) and persists the result either as a
//! SQLite store or as a line-oriented text stream.
//!
//! The engine itself is out of scope: anything able to produce
//! [`dispatcher::EngineEvent`] values can drive a [`session::TraceSession`].

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod model;
pub mod process;
pub mod recorder;
pub mod relocation;
pub mod session;
pub mod sink;

pub use error::{TraceError, TraceResult};

/// Returns the library version as encoded at compile time.
///
/// Written into the `info` table of every relational store.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
