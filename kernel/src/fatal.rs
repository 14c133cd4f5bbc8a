//! Fatal diagnostics for invariant violations.
//!
//! The runtime distinguishes expected dynamic conditions (timeouts,
//! contention, cancellation), which are ordinary return values, from caller
//! contract violations (resuming a halted context, releasing a lock that is
//! not held), which are unrecoverable. The latter all funnel through
//! [`die`]: one diagnostic line, then process abort.

use std::fmt;
use std::io::Write;
use std::process;
use std::sync::Mutex;

/// Serializes diagnostic emission so concurrent aborts cannot interleave.
static DIAGNOSTIC: Mutex<()> = Mutex::new(());

/// Emits a single diagnostic line and aborts the process. Never returns.
pub fn die(args: fmt::Arguments<'_>) -> ! {
    let _guard = DIAGNOSTIC.lock().unwrap_or_else(|e| e.into_inner());
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "weft fatal: {}", args);
    let _ = err.flush();
    process::abort()
}

/// Formats and reports an unrecoverable invariant violation.
#[macro_export]
macro_rules! die {
    ($($arg:tt)*) => {
        $crate::fatal::die(format_args!($($arg)*))
    };
}
