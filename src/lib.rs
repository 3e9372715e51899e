//! Runtime support library for embedded-SQL programs.
//!
//! The preprocessor translates embedded statements into C calls against
//! this library; this crate provides the memory side of that runtime:
//!
//! - Allocation primitives (`__esql_alloc`, `__esql_realloc`,
//!   `__esql_strdup`, `__esql_free`) that convert allocator failure into a
//!   structured out-of-memory condition instead of unwinding.
//! - A per-thread auto-memory registry that tracks result buffers for one
//!   statement execution and releases them en masse afterwards, with an
//!   overridable auto-clear policy for handing long-lived results (e.g. a
//!   descriptor or result set) to the application.
//! - OS-level TLS plumbing whose thread-exit destructor is the guaranteed
//!   backstop against leaks.

mod tls;

pub mod alloc;
pub mod auto_mem;
pub mod error;
pub mod memory;

pub use auto_mem::{AutoMemRegistry, with_thread_registry};
pub use error::{OutOfMemory, clear_last_error, last_error};

/// Initialize the runtime: creates the TLS key backing per-thread state.
///
/// Idempotent and race-safe. Threads that skip it still work — first
/// access initializes lazily — but generated entrypoints call it once up
/// front before spawning connection threads.
#[unsafe(no_mangle)]
pub extern "C" fn __esql_init() {
    tls::tls_init();
}
