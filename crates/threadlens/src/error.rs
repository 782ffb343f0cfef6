/// Failures surfaced to callers of the diagnostic operations.
///
/// Degraded samples and dropped inconsistent data are recovered inside the
/// pass and show up as report flags instead. An expired pass deadline only
/// fails the pass when the thread list itself is missing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiagnosticError {
    #[error("thread enumeration unavailable: {0}")]
    EnumerationUnavailable(String),
    #[error("a diagnostic pass is already running")]
    Busy,
    #[error("diagnostic engine has shut down")]
    ShutDown,
    /// The pass deadline expired before the thread list was available.
    #[error("pass deadline exceeded: {0}")]
    DeadlineExceeded(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DiagnosticError {
    /// Stable machine-readable name.
    pub fn kind(&self) -> &'static str {
        match self {
            DiagnosticError::EnumerationUnavailable(_) => "enumeration_unavailable",
            DiagnosticError::Busy => "busy",
            DiagnosticError::ShutDown => "shut_down",
            DiagnosticError::DeadlineExceeded(_) => "deadline_exceeded",
            DiagnosticError::Internal(_) => "internal",
        }
    }
}
