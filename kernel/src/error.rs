//! Kernel error types

use thiserror::Error;

/// Errors surfaced by kernel operations that can fail recoverably.
///
/// Invariant violations (self-resume, resuming a halted context, releasing
/// a lock that is not held) are not represented here: those are caller
/// contract bugs and terminate the process through [`crate::fatal::die`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KernelError {
    /// The backing thread for a context could not be created
    #[error("Failed to spawn context thread: {0}")]
    SpawnFailed(String),

    /// A bounded wait expired before the awaited condition held
    #[error("Operation timed out")]
    Timeout,
}
