//! Thread introspection and deadlock-risk diagnostics for a running process.
//!
//! A [`DiagnosticEngine`] answers two questions on demand:
//!
//! - [`get_thread_info`](DiagnosticEngine::get_thread_info): which threads
//!   exist and what state they are in;
//! - [`get_thread_stack_info`](DiagnosticEngine::get_thread_stack_info): the
//!   same plus every thread's stack, who waits on whom, and which waits form
//!   cycles.
//!
//! Each answer comes from a fresh sampling pass: enumerate, sample stacks in
//! parallel, build the wait graph, analyze it, assemble an immutable report.
//! The engine only knows the process through the capabilities in [`host`];
//! [`Host::live`] wires them to the current Rust process. [`tools`] wraps the
//! operations in a transport-neutral tool envelope.

pub mod assemble;
pub mod config;
pub mod engine;
pub mod enumerate;
mod error;
pub mod host;
pub mod live;
pub mod render;
pub mod sample;
pub mod tools;

#[cfg(test)]
mod testing;

pub use config::{ConcurrencyPolicy, ConfigError, EngineConfig};
pub use engine::DiagnosticEngine;
pub use error::DiagnosticError;
pub use host::Host;
pub use threadlens_types as types;
