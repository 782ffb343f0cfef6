//! Capabilities the engine needs from the process it inspects.
//!
//! Each is a separate trait so a host can expose only what it has; the
//! [`Host`] bundle is what the engine is built from. [`crate::live`] provides
//! an implementation for the current Rust process.

use std::sync::Arc;
use std::time::Duration;

use threadlens_types::{CurrentThread, RawFrame, StackFrame, ThreadRecord, WaitSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("not supported by this host: {0}")]
    Unsupported(String),
    #[error("permission denied: {0}")]
    Denied(String),
    #[error("{0}")]
    Failed(String),
}

pub trait ThreadSource: Send + Sync {
    /// All live threads. `enumerated_at_unix_ms` is overwritten by the caller.
    fn threads(&self) -> Result<Vec<ThreadRecord>, HostError>;

    /// The thread making the current call, when the host can tell.
    fn current_thread(&self) -> Option<CurrentThread> {
        None
    }
}

pub trait StackSource: Send + Sync {
    /// Capture one thread's frames, innermost first. Called from a blocking
    /// worker; may take up to `timeout`.
    fn capture(&self, thread: &ThreadRecord, timeout: Duration) -> Result<Vec<RawFrame>, HostError>;
}

pub trait WaitSource: Send + Sync {
    fn waits(&self) -> WaitSnapshot;
}

/// Process-level figures for the report header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessStats {
    pub pid: u32,
    pub process_name: String,
    pub memory_bytes: u64,
    pub cpu_percent: f32,
}

pub trait ProcessProbe: Send + Sync {
    fn probe(&self) -> ProcessStats;
}

pub trait SymbolResolver: Send + Sync {
    fn resolve(&self, frame: &RawFrame) -> StackFrame;
}

/// Raw symbol text as-is, or the instruction pointer when there is none.
pub(crate) fn unresolved_frame(frame: &RawFrame) -> StackFrame {
    let function_symbol = match (&frame.symbol, frame.ip) {
        (Some(symbol), _) => symbol.clone(),
        (None, Some(ip)) => format!("{ip:#x}"),
        (None, None) => String::new(),
    };
    StackFrame {
        function_symbol,
        location: frame.location.clone(),
    }
}

#[derive(Clone)]
pub struct Host {
    pub threads: Arc<dyn ThreadSource>,
    pub stacks: Arc<dyn StackSource>,
    pub waits: Arc<dyn WaitSource>,
    pub process: Arc<dyn ProcessProbe>,
    pub symbols: Option<Arc<dyn SymbolResolver>>,
}

impl Host {
    pub fn new(
        threads: Arc<dyn ThreadSource>,
        stacks: Arc<dyn StackSource>,
        waits: Arc<dyn WaitSource>,
        process: Arc<dyn ProcessProbe>,
    ) -> Self {
        Self {
            threads,
            stacks,
            waits,
            process,
            symbols: None,
        }
    }

    pub fn with_symbols(mut self, symbols: Arc<dyn SymbolResolver>) -> Self {
        self.symbols = Some(symbols);
        self
    }

    /// One value providing every capability.
    pub fn from_single<H>(host: Arc<H>) -> Self
    where
        H: ThreadSource + StackSource + WaitSource + ProcessProbe + 'static,
    {
        Self::new(host.clone(), host.clone(), host.clone(), host)
    }

    pub(crate) fn resolve(&self, frame: &RawFrame) -> StackFrame {
        match &self.symbols {
            Some(resolver) => resolver.resolve(frame),
            None => unresolved_frame(frame),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_frames_fall_back_to_ip() {
        let named = RawFrame {
            ip: Some(0x10),
            symbol: Some("app::run".to_string()),
            location: Some("src/app.rs:3:1".to_string()),
        };
        assert_eq!(unresolved_frame(&named).function_symbol, "app::run");
        assert_eq!(
            unresolved_frame(&named).location.as_deref(),
            Some("src/app.rs:3:1")
        );

        let bare = RawFrame {
            ip: Some(0xdead),
            ..RawFrame::default()
        };
        assert_eq!(unresolved_frame(&bare).function_symbol, "0xdead");
        assert_eq!(unresolved_frame(&RawFrame::default()).function_symbol, "");
    }
}
