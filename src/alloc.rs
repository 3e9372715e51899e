//! Allocation primitives.
//!
//! Thin wrappers over the platform allocator that turn allocation failure
//! into a structured out-of-memory signal instead of a panic. Blocks from
//! these functions cross into preprocessor-generated C code and come back
//! for release without a size, so they are carved out with libc
//! `calloc`/`realloc`/`free` directly rather than the Rust global allocator
//! (which would require the original layout at free time).

use core::ffi::{CStr, c_char, c_void};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::error::{OutOfMemory, raise_out_of_memory};

unsafe extern "C" {
    fn calloc(nmemb: usize, size: usize) -> *mut c_void;
    fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void;
    fn free(ptr: *mut c_void);
}

// Block accounting. Observational: tests use the live counter to prove the
// exactly-once release properties of the auto-memory registry.
static LIVE_BLOCKS: AtomicI64 = AtomicI64::new(0);
static TOTAL_BLOCKS: AtomicU64 = AtomicU64::new(0);

fn note_block_allocated() {
    LIVE_BLOCKS.fetch_add(1, Ordering::Relaxed);
    TOTAL_BLOCKS.fetch_add(1, Ordering::Relaxed);
}

/// Number of primitive-allocated blocks not yet released.
pub fn live_blocks() -> i64 {
    LIVE_BLOCKS.load(Ordering::Relaxed)
}

/// Number of blocks handed out since process start.
pub fn total_blocks() -> u64 {
    TOTAL_BLOCKS.load(Ordering::Relaxed)
}

/// Allocate a zero-filled block of `size` bytes.
///
/// A zero `size` counts as a failure: the preprocessor never emits
/// zero-sized buffers, so such a request means the surrounding statement
/// computed a bogus length.
pub fn alloc_zeroed(size: usize, lineno: i32) -> Result<NonNull<c_void>, OutOfMemory> {
    if size == 0 {
        return Err(raise_out_of_memory(lineno));
    }
    let ptr = unsafe { calloc(1, size) };
    match NonNull::new(ptr) {
        Some(block) => {
            note_block_allocated();
            Ok(block)
        }
        None => Err(raise_out_of_memory(lineno)),
    }
}

/// Grow or shrink a block previously returned by these primitives.
///
/// On failure the original block is left where the allocator left it (still
/// live, still the caller's to release); this layer does not free it.
///
/// # Safety
///
/// `ptr` must be null or a live block from [`alloc_zeroed`],
/// [`reallocate`], or [`duplicate`]. On success the old pointer is invalid.
pub unsafe fn reallocate(
    ptr: *mut c_void,
    size: usize,
    lineno: i32,
) -> Result<NonNull<c_void>, OutOfMemory> {
    if size == 0 {
        return Err(raise_out_of_memory(lineno));
    }
    let grew_from_null = ptr.is_null();
    let new = unsafe { realloc(ptr, size) };
    match NonNull::new(new) {
        Some(block) => {
            if grew_from_null {
                note_block_allocated();
            }
            Ok(block)
        }
        None => Err(raise_out_of_memory(lineno)),
    }
}

/// Duplicate a NUL-terminated string.
///
/// Null input passes through as null without raising an error; generated
/// code forwards optional strings here unconditionally.
///
/// # Safety
///
/// `string` must be null or point to a valid NUL-terminated string.
pub unsafe fn duplicate(string: *const c_char, lineno: i32) -> Result<*mut c_char, OutOfMemory> {
    if string.is_null() {
        return Ok(core::ptr::null_mut());
    }
    let len = unsafe { CStr::from_ptr(string) }.to_bytes().len();
    // Zero fill supplies the NUL terminator.
    let copy = alloc_zeroed(len + 1, lineno)?;
    unsafe { core::ptr::copy_nonoverlapping(string, copy.as_ptr() as *mut c_char, len) };
    Ok(copy.as_ptr() as *mut c_char)
}

/// Release one block. No-op on null.
///
/// # Safety
///
/// `ptr` must be null or a live block from these primitives that nothing
/// else (including the auto-memory registry) still owns.
pub unsafe fn release(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    LIVE_BLOCKS.fetch_sub(1, Ordering::Relaxed);
    unsafe { free(ptr) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_alloc_zeroed_returns_zero_filled_block() {
        let block = alloc_zeroed(64, 0).unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(block.as_ptr() as *const u8, 64) };
        assert!(bytes.iter().all(|&b| b == 0));
        unsafe { release(block.as_ptr()) };
    }

    #[test]
    #[serial]
    fn test_alloc_zero_size_raises() {
        crate::error::clear_last_error();
        let err = alloc_zeroed(0, 42).unwrap_err();
        assert_eq!(err.lineno, 42);
        assert_eq!(crate::error::last_error(), Some(err));
        crate::error::clear_last_error();
    }

    #[test]
    #[serial]
    fn test_reallocate_preserves_prefix() {
        let block = alloc_zeroed(8, 0).unwrap();
        unsafe {
            core::ptr::write_bytes(block.as_ptr() as *mut u8, 0xA5, 8);
            let grown = reallocate(block.as_ptr(), 256, 0).unwrap();
            let bytes = core::slice::from_raw_parts(grown.as_ptr() as *const u8, 8);
            assert!(bytes.iter().all(|&b| b == 0xA5));
            release(grown.as_ptr());
        }
    }

    #[test]
    #[serial]
    fn test_duplicate_roundtrip() {
        let original = c"select * from t1";
        unsafe {
            let copy = duplicate(original.as_ptr(), 0).unwrap();
            assert!(!copy.is_null());
            assert_eq!(CStr::from_ptr(copy), original);
            release(copy as *mut c_void);
        }
    }

    #[test]
    fn test_duplicate_null_passes_through() {
        crate::error::clear_last_error();
        let copy = unsafe { duplicate(core::ptr::null(), 0) }.unwrap();
        assert!(copy.is_null());
        // Null input is a pass-through, not a failure.
        assert_eq!(crate::error::last_error(), None);
    }

    #[test]
    fn test_release_null_is_noop() {
        unsafe { release(core::ptr::null_mut()) };
    }

    #[test]
    #[serial]
    fn test_block_accounting_balances() {
        let live_before = live_blocks();
        let total_before = total_blocks();

        let a = alloc_zeroed(16, 0).unwrap();
        let b = unsafe { duplicate(c"abc".as_ptr(), 0) }.unwrap();
        assert_eq!(live_blocks(), live_before + 2);
        assert_eq!(total_blocks(), total_before + 2);

        unsafe {
            release(a.as_ptr());
            release(b as *mut c_void);
        }
        assert_eq!(live_blocks(), live_before);
    }
}
