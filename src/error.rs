use thiserror::Error;

/// Errors returned by callback operations
///
/// Argument errors are detected synchronously at the call site.
/// Failures inside a registered function are not represented here:
/// the function signals those through its own return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// A required argument was missing or is not acceptable for this
    /// handle, e.g. a notify handle supplied to a coalesced callback
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The wake primitive refused the signal because the loop side
    /// of it has been closed or the loop dropped.  For a queued
    /// callback the call record is **not** withdrawn: it may be
    /// delivered on a later wake or discarded at teardown, so treat
    /// the work as at-risk.
    #[error("wake signal failed: target loop is closed")]
    WakeSignalFailure,

    /// The callback handle was closed before this fire
    #[error("callback handle is closed")]
    Closed,

    /// Synchronous call: the timer expired before the result arrived
    #[error("synchronous call timed out")]
    TimedOut,

    /// Synchronous call: the private loop stopped without either a
    /// result or a timeout.  Indicates a logic error somewhere.
    #[error("synchronous call ended without a result")]
    Unknown,
}

/// Result type used throughout this crate
pub type Result<T, E = Error> = std::result::Result<T, E>;
