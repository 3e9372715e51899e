//! C ABI for preprocessor-generated programs.
//!
//! Generated statement code calls these functions directly. Every entry
//! point is `extern "C"`, reports failure by returning null/false, and
//! records the structured condition in the calling thread's error slot —
//! nothing here unwinds across the FFI boundary.

use core::ffi::{c_char, c_void};

use crate::auto_mem::with_thread_registry;
use crate::error::{self, OUT_OF_MEMORY_CODE};
use crate::alloc;

/// Convert a C size to `usize`, raising out-of-memory on overflow so the
/// caller sees the same failure shape as an allocator refusal.
fn checked_size(size: u64, lineno: i32) -> Option<usize> {
    match usize::try_from(size) {
        Ok(size) => Some(size),
        Err(_) => {
            error::raise_out_of_memory(lineno);
            None
        }
    }
}

// =============================================================================
// Allocation primitives
// =============================================================================

/// Allocate `size` zero-filled bytes; null on failure.
#[unsafe(no_mangle)]
pub extern "C" fn __esql_alloc(size: u64, lineno: i32) -> *mut c_void {
    let Some(size) = checked_size(size, lineno) else {
        return core::ptr::null_mut();
    };
    match alloc::alloc_zeroed(size, lineno) {
        Ok(block) => block.as_ptr(),
        Err(_) => core::ptr::null_mut(),
    }
}

/// Resize a block; null on failure (the original block stays live).
///
/// # Safety
///
/// `ptr` must be null or a live block from this runtime's allocation
/// entry points.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __esql_realloc(ptr: *mut c_void, size: u64, lineno: i32) -> *mut c_void {
    let Some(size) = checked_size(size, lineno) else {
        return core::ptr::null_mut();
    };
    match unsafe { alloc::reallocate(ptr, size, lineno) } {
        Ok(block) => block.as_ptr(),
        Err(_) => core::ptr::null_mut(),
    }
}

/// Duplicate a NUL-terminated string; null in, null out (no error).
///
/// # Safety
///
/// `s` must be null or point to a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __esql_strdup(s: *const c_char, lineno: i32) -> *mut c_char {
    unsafe { alloc::duplicate(s, lineno) }.unwrap_or(core::ptr::null_mut())
}

/// Free one block; no-op on null.
///
/// # Safety
///
/// `ptr` must be null or a live, untracked block from this runtime's
/// allocation entry points.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __esql_free(ptr: *mut c_void) {
    unsafe { alloc::release(ptr) };
}

// =============================================================================
// Auto-memory registry
// =============================================================================

/// Allocate `size` zero-filled bytes owned by the calling thread's
/// registry; null on failure (nothing is tracked in that case).
#[unsafe(no_mangle)]
pub extern "C" fn __esql_auto_alloc(size: u64, lineno: i32) -> *mut c_void {
    let Some(size) = checked_size(size, lineno) else {
        return core::ptr::null_mut();
    };
    with_thread_registry(|registry| match registry.register_new(size, lineno) {
        Ok(block) => block.as_ptr(),
        Err(_) => core::ptr::null_mut(),
    })
}

/// Hand ownership of an existing block to the calling thread's registry.
///
/// `lineno` is accepted for call-site parity with the other registration
/// entry point; registration bookkeeping itself cannot fail separately
/// from allocation. Null `ptr` is accepted and ignored.
///
/// # Safety
///
/// A non-null `ptr` must be a live block from this runtime's allocation
/// entry points, not already tracked, and never freed directly afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __esql_auto_register(ptr: *mut c_void, _lineno: i32) -> bool {
    with_thread_registry(|registry| unsafe { registry.register_existing(ptr) }.is_ok())
}

/// Release every tracked block on the calling thread, cancelling any
/// auto-clear suppression first.
#[unsafe(no_mangle)]
pub extern "C" fn __esql_free_auto_mem() {
    with_thread_registry(|registry| registry.release_all());
}

/// Suppress auto-clear on the calling thread until `__esql_free_auto_mem`.
#[unsafe(no_mangle)]
pub extern "C" fn __esql_disable_auto_clear() {
    with_thread_registry(|registry| registry.disable_auto_clear());
}

/// End-of-statement clear: drop the registry's bookkeeping without freeing
/// the tracked blocks, unless auto-clear is suppressed (then do nothing).
#[unsafe(no_mangle)]
pub extern "C" fn __esql_clear_auto_mem() {
    with_thread_registry(|registry| registry.clear_if_not_suppressed());
}

// =============================================================================
// Error and accounting surface
// =============================================================================

/// Error code of the calling thread's pending condition, 0 when none.
#[unsafe(no_mangle)]
pub extern "C" fn __esql_last_error_code() -> i32 {
    error::last_error().map_or(0, |_| OUT_OF_MEMORY_CODE)
}

/// Source line of the calling thread's pending condition, 0 when none.
#[unsafe(no_mangle)]
pub extern "C" fn __esql_last_error_line() -> i32 {
    error::last_error().map_or(0, |err| err.lineno)
}

/// Reset the calling thread's error slot.
#[unsafe(no_mangle)]
pub extern "C" fn __esql_clear_error() {
    error::clear_last_error();
}

/// Process-wide count of live blocks handed out by the primitives.
#[unsafe(no_mangle)]
pub extern "C" fn __esql_live_blocks() -> i64 {
    alloc::live_blocks()
}
