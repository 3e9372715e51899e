//! Platform thread-local storage backend.
//!
//! Each execution thread owns one [`ThreadState`], reached through OS-level
//! TLS (`pthread_key_*` on POSIX, fiber-local storage on Windows). The OS
//! destructor callback tears the state down on thread exit, which is what
//! guarantees the auto-memory registry's release-everything backstop even
//! for foreign threads created by the embedding application —
//! `std::thread_local!` destructors would not cover those.

use core::cell::{Cell, RefCell};
use core::ffi::c_void;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

use crate::auto_mem::AutoMemRegistry;
use crate::error::OutOfMemory;

/// All per-thread runtime state, lazily boxed on first access.
pub(crate) struct ThreadState {
    /// The thread's auto-memory registry.
    pub(crate) auto_mem: RefCell<AutoMemRegistry>,
    /// Last out-of-memory condition raised on this thread.
    pub(crate) last_error: Cell<Option<OutOfMemory>>,
}

impl ThreadState {
    fn new() -> Self {
        Self {
            auto_mem: RefCell::new(AutoMemRegistry::new()),
            last_error: Cell::new(None),
        }
    }
}

/// Process-wide TLS slot identifier, created exactly once no matter how
/// many threads race to first use.
static KEY_INIT: Once = Once::new();
static KEY: AtomicUsize = AtomicUsize::new(0);

/// Create the TLS slot. Idempotent; every accessor funnels through here.
pub(crate) fn tls_init() {
    KEY_INIT.call_once(|| {
        KEY.store(sys::create_key(), Ordering::Release);
    });
}

/// The calling thread's state, allocated on first access.
///
/// The returned reference is `'static` from the caller's point of view:
/// the boxed state lives until the OS runs the slot's destructor at thread
/// exit, and the registry is never handed across threads.
pub(crate) fn thread_state() -> &'static ThreadState {
    tls_init();
    let key = KEY.load(Ordering::Acquire);

    let ptr = sys::get(key);
    if ptr.is_null() {
        let raw = Box::into_raw(Box::new(ThreadState::new()));
        sys::set(key, raw as *mut c_void);
        unsafe { &*raw }
    } else {
        unsafe { &*(ptr as *const ThreadState) }
    }
}

/// Destructor handed to the OS: reconstituting the box drops the
/// `ThreadState`, and dropping the registry inside it releases every
/// still-tracked allocation.
fn drop_thread_state(ptr: *mut c_void) {
    if !ptr.is_null() {
        drop(unsafe { Box::from_raw(ptr as *mut ThreadState) });
    }
}

#[cfg(unix)]
mod sys {
    use super::*;

    // pthread_key_t is unsigned long on Darwin, unsigned int elsewhere.
    #[cfg(target_vendor = "apple")]
    type PthreadKey = core::ffi::c_ulong;
    #[cfg(not(target_vendor = "apple"))]
    type PthreadKey = core::ffi::c_uint;

    unsafe extern "C" {
        fn pthread_key_create(
            key: *mut PthreadKey,
            dtor: Option<unsafe extern "C" fn(*mut c_void)>,
        ) -> core::ffi::c_int;
        fn pthread_getspecific(key: PthreadKey) -> *mut c_void;
        fn pthread_setspecific(key: PthreadKey, value: *const c_void) -> core::ffi::c_int;
    }

    unsafe extern "C" fn dtor(ptr: *mut c_void) {
        drop_thread_state(ptr);
    }

    pub(super) fn create_key() -> usize {
        let mut key: PthreadKey = 0;
        let ret = unsafe { pthread_key_create(&mut key, Some(dtor)) };
        assert!(ret == 0, "pthread_key_create failed");
        key as usize
    }

    pub(super) fn get(key: usize) -> *mut c_void {
        unsafe { pthread_getspecific(key as PthreadKey) }
    }

    pub(super) fn set(key: usize, value: *mut c_void) {
        let ret = unsafe { pthread_setspecific(key as PthreadKey, value) };
        assert!(ret == 0, "pthread_setspecific failed");
    }
}

#[cfg(windows)]
mod sys {
    use super::*;

    const FLS_OUT_OF_INDEXES: u32 = 0xFFFF_FFFF;

    unsafe extern "system" {
        fn FlsAlloc(callback: Option<unsafe extern "system" fn(*mut c_void)>) -> u32;
        fn FlsGetValue(index: u32) -> *mut c_void;
        fn FlsSetValue(index: u32, value: *mut c_void) -> i32;
    }

    unsafe extern "system" fn dtor(ptr: *mut c_void) {
        drop_thread_state(ptr);
    }

    pub(super) fn create_key() -> usize {
        let index = unsafe { FlsAlloc(Some(dtor)) };
        assert!(index != FLS_OUT_OF_INDEXES, "FlsAlloc failed");
        index as usize
    }

    pub(super) fn get(key: usize) -> *mut c_void {
        unsafe { FlsGetValue(key as u32) }
    }

    pub(super) fn set(key: usize, value: *mut c_void) {
        let ret = unsafe { FlsSetValue(key as u32, value) };
        assert!(ret != 0, "FlsSetValue failed");
    }
}
