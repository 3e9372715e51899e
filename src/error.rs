//! Out-of-memory reporting.
//!
//! Allocation failures never unwind across the FFI boundary: they are
//! recorded in a per-thread last-error slot (the runtime's statement
//! dispatch reads it after each call) and logged through `tracing`.

use derive_more::{Display, Error};

use crate::tls::thread_state;

/// Embedded-SQL error code reported for an allocation failure.
pub const OUT_OF_MEMORY_CODE: i32 = -12;

/// SQLSTATE reported together with [`OUT_OF_MEMORY_CODE`].
pub const OUT_OF_MEMORY_SQLSTATE: &str = "YE001";

/// Structured out-of-memory condition, tagged with the source line of the
/// embedded statement whose allocation failed.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
#[display("out of memory on line {lineno}")]
pub struct OutOfMemory {
    /// Line number emitted by the preprocessor (0 when unknown).
    pub lineno: i32,
}

/// Record an out-of-memory condition in the calling thread's error slot.
pub(crate) fn raise_out_of_memory(lineno: i32) -> OutOfMemory {
    let err = OutOfMemory { lineno };
    tracing::error!(
        lineno,
        code = OUT_OF_MEMORY_CODE,
        sqlstate = OUT_OF_MEMORY_SQLSTATE,
        "allocation failed"
    );
    thread_state().last_error.set(Some(err));
    err
}

/// The last error recorded on the calling thread, if any.
pub fn last_error() -> Option<OutOfMemory> {
    thread_state().last_error.get()
}

/// Reset the calling thread's error slot.
pub fn clear_last_error() {
    thread_state().last_error.set(None);
}
