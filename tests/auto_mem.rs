//! Integration tests driving the runtime the way preprocessor-generated
//! code does: through the `__esql_*` C ABI, with per-thread registries and
//! the block accounting as the observer.

use core::ffi::c_void;

use esql_runtime::memory::{
    __esql_alloc, __esql_auto_alloc, __esql_auto_register, __esql_clear_auto_mem,
    __esql_clear_error, __esql_disable_auto_clear, __esql_free, __esql_free_auto_mem,
    __esql_last_error_code, __esql_last_error_line, __esql_live_blocks, __esql_strdup,
};
use esql_runtime::{__esql_init, with_thread_registry};
use serial_test::serial;

#[test]
#[serial]
fn auto_alloc_then_free_auto_mem_releases_everything() {
    __esql_init();
    let live_before = __esql_live_blocks();

    let mut ptrs = Vec::new();
    for i in 0..5u8 {
        let p = __esql_auto_alloc(128, 10 + i as i32);
        assert!(!p.is_null());
        // Returned blocks are zero-filled and writable.
        unsafe {
            assert_eq!((p as *const u8).read(), 0);
            core::ptr::write_bytes(p as *mut u8, i + 1, 128);
        }
        ptrs.push(p);
    }
    assert_eq!(__esql_live_blocks(), live_before + 5);
    assert_eq!(with_thread_registry(|r| r.tracked()), 5);

    __esql_free_auto_mem();
    assert_eq!(__esql_live_blocks(), live_before);
    assert!(with_thread_registry(|r| r.is_empty()));
}

#[test]
#[serial]
fn clear_auto_mem_leaves_blocks_to_the_caller() {
    __esql_init();
    let live_before = __esql_live_blocks();

    let p = __esql_auto_alloc(64, 1);
    assert!(!p.is_null());
    unsafe { core::ptr::write_bytes(p as *mut u8, 0x7E, 64) };

    // End-of-statement clear without suppression: bookkeeping goes away,
    // the block itself survives and becomes ours to free.
    __esql_clear_auto_mem();
    assert!(with_thread_registry(|r| r.is_empty()));
    assert_eq!(__esql_live_blocks(), live_before + 1);
    unsafe {
        assert!((0..64).all(|i| (p as *const u8).add(i).read() == 0x7E));
        __esql_free(p);
    }
    assert_eq!(__esql_live_blocks(), live_before);
}

#[test]
#[serial]
fn suppression_defers_release_until_free_auto_mem() {
    __esql_init();
    let live_before = __esql_live_blocks();

    __esql_disable_auto_clear();
    let a = __esql_auto_alloc(32, 1);
    let b = __esql_auto_alloc(32, 2);
    assert!(!a.is_null() && !b.is_null());
    unsafe {
        core::ptr::write_bytes(a as *mut u8, 0xAA, 32);
        core::ptr::write_bytes(b as *mut u8, 0xBB, 32);
    }

    // The statement-end clear is a no-op while suppressed.
    __esql_clear_auto_mem();
    assert_eq!(with_thread_registry(|r| r.tracked()), 2);
    unsafe {
        assert_eq!((a as *const u8).read(), 0xAA);
        assert_eq!((b as *const u8).read(), 0xBB);
    }

    // The explicit full release frees both blocks exactly once.
    __esql_free_auto_mem();
    assert_eq!(__esql_live_blocks(), live_before);
    assert!(with_thread_registry(|r| r.is_empty()));
    assert!(!with_thread_registry(|r| r.auto_clear_disabled()));
}

#[test]
#[serial]
fn auto_register_adopts_primitive_blocks() {
    __esql_init();
    let live_before = __esql_live_blocks();

    let raw = __esql_alloc(256, 3);
    assert!(!raw.is_null());
    assert!(unsafe { __esql_auto_register(raw, 3) });
    assert_eq!(with_thread_registry(|r| r.tracked()), 1);

    // Null registration is an accepted no-op.
    assert!(unsafe { __esql_auto_register(core::ptr::null_mut(), 4) });
    assert_eq!(with_thread_registry(|r| r.tracked()), 1);

    __esql_free_auto_mem();
    assert_eq!(__esql_live_blocks(), live_before);
}

#[test]
#[serial]
fn thread_exit_is_the_release_backstop() {
    __esql_init();
    let live_before = __esql_live_blocks();

    std::thread::spawn(|| {
        for i in 0..8 {
            let p = __esql_auto_alloc(512, i);
            assert!(!p.is_null());
        }
        // No clear call of any kind: the TLS destructor must clean up.
    })
    .join()
    .unwrap();

    assert_eq!(__esql_live_blocks(), live_before);
}

#[test]
#[serial]
fn registries_are_independent_per_thread() {
    __esql_init();

    __esql_disable_auto_clear();
    let p = __esql_auto_alloc(16, 1);
    assert!(!p.is_null());

    std::thread::spawn(|| {
        // A fresh thread sees an empty, unsuppressed registry.
        assert!(with_thread_registry(|r| r.is_empty()));
        assert!(!with_thread_registry(|r| r.auto_clear_disabled()));
        let q = __esql_auto_alloc(16, 2);
        assert!(!q.is_null());
        __esql_free_auto_mem();
    })
    .join()
    .unwrap();

    // This thread's suppression and tracked block were untouched.
    assert!(with_thread_registry(|r| r.auto_clear_disabled()));
    assert_eq!(with_thread_registry(|r| r.tracked()), 1);
    __esql_free_auto_mem();
}

#[test]
#[serial]
fn failed_allocation_reports_code_and_line() {
    __esql_init();
    __esql_clear_error();

    let p = __esql_auto_alloc(0, 217);
    assert!(p.is_null());
    assert_eq!(__esql_last_error_code(), -12);
    assert_eq!(__esql_last_error_line(), 217);

    __esql_clear_error();
    assert_eq!(__esql_last_error_code(), 0);
    assert_eq!(__esql_last_error_line(), 0);
}

#[test]
#[serial]
fn strdup_null_passes_through_without_error() {
    __esql_init();
    __esql_clear_error();

    let copy = unsafe { __esql_strdup(core::ptr::null(), 5) };
    assert!(copy.is_null());
    assert_eq!(__esql_last_error_code(), 0);

    let copy = unsafe { __esql_strdup(c"fetch next".as_ptr(), 5) };
    assert!(!copy.is_null());
    unsafe {
        assert_eq!(core::ffi::CStr::from_ptr(copy), c"fetch next");
        __esql_free(copy as *mut c_void);
    }
}
