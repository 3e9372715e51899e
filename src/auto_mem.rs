//! The per-thread automatic memory registry.
//!
//! Every result buffer allocated on behalf of one embedded statement
//! execution is tracked here so the runtime can release the whole batch at
//! the natural end of the statement, without the generated code keeping
//! track of each buffer.
//!
//! The registry is an owning singly linked list, newest node first. The
//! head node may additionally carry the thread's "auto-clear disabled"
//! flag; prepending a node migrates the flag to the new head so it always
//! describes the current registry state rather than any one allocation.

use core::ffi::c_void;
use core::ptr::NonNull;

use crate::alloc;
use crate::error::OutOfMemory;
use crate::tls::thread_state;

/// What a tracking node holds: one heap block, or nothing at all when the
/// node exists only to carry the suppression flag for an otherwise empty
/// registry.
#[derive(Debug)]
enum Payload {
    Owned(NonNull<c_void>),
    FlagOnly,
}

/// One tracked allocation (or a flag-only placeholder) plus the link to
/// the rest of the list.
///
/// `Node` has no `Drop` of its own: whether the owned block is freed along
/// with the bookkeeping depends on which clear operation is running.
#[derive(Debug)]
struct Node {
    payload: Payload,
    /// Only ever true on the head node.
    suppress_auto_clear: bool,
    next: Option<Box<Node>>,
}

/// A thread's registry of automatically managed allocations.
///
/// The per-thread instance lives in the runtime's thread state and is
/// reached through [`with_thread_registry`]; tests construct standalone
/// registries for explicit lifetime control.
#[derive(Debug, Default)]
pub struct AutoMemRegistry {
    head: Option<Box<Node>>,
}

impl AutoMemRegistry {
    /// An empty registry: nothing tracked, auto-clear enabled.
    pub const fn new() -> Self {
        AutoMemRegistry { head: None }
    }

    /// True when nothing is tracked and no suppression placeholder exists.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Number of tracked pointers (a flag-only placeholder does not count).
    pub fn tracked(&self) -> usize {
        let mut count = 0;
        let mut cur = self.head.as_deref();
        while let Some(node) = cur {
            if matches!(node.payload, Payload::Owned(_)) {
                count += 1;
            }
            cur = node.next.as_deref();
        }
        count
    }

    /// Whether auto-clear is currently suppressed.
    pub fn auto_clear_disabled(&self) -> bool {
        self.head
            .as_deref()
            .is_some_and(|head| head.suppress_auto_clear)
    }

    /// Prepend a node, migrating the suppression flag from the old head so
    /// at most the head ever carries it.
    fn push_front(&mut self, payload: Payload) {
        let mut node = Box::new(Node {
            payload,
            suppress_auto_clear: false,
            next: self.head.take(),
        });
        if let Some(old_head) = node.next.as_deref_mut() {
            node.suppress_auto_clear = old_head.suppress_auto_clear;
            old_head.suppress_auto_clear = false;
        }
        self.head = Some(node);
    }

    /// Allocate `size` zero-filled bytes and take ownership of the result.
    ///
    /// On allocation failure nothing is tracked and the structured
    /// out-of-memory condition is propagated; the registry is unchanged.
    pub fn register_new(
        &mut self,
        size: usize,
        lineno: i32,
    ) -> Result<NonNull<c_void>, OutOfMemory> {
        let ptr = alloc::alloc_zeroed(size, lineno)?;
        self.push_front(Payload::Owned(ptr));
        Ok(ptr)
    }

    /// Take ownership of a block allocated elsewhere in the runtime.
    ///
    /// A null pointer is accepted and ignored; generated code forwards
    /// optional buffers here without checking. On failure the caller keeps
    /// ownership of `ptr`.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must be a live block from the allocation
    /// primitives, not tracked by any registry, and never freed directly by
    /// the caller after a successful return.
    pub unsafe fn register_existing(&mut self, ptr: *mut c_void) -> Result<(), OutOfMemory> {
        let Some(ptr) = NonNull::new(ptr) else {
            return Ok(());
        };
        self.push_front(Payload::Owned(ptr));
        Ok(())
    }

    /// Release every tracked pointer and all bookkeeping, leaving the
    /// registry empty.
    ///
    /// Any suppression still in force is cancelled first: an explicit full
    /// release always wins, whether it comes from the application or from
    /// the error path.
    pub fn release_all(&mut self) {
        if let Some(head) = self.head.as_deref_mut() {
            if head.suppress_auto_clear {
                tracing::debug!("full release re-enabled auto-clear on exec");
                head.suppress_auto_clear = false;
            }
        }
        let mut cur = self.head.take();
        while let Some(mut node) = cur {
            cur = node.next.take();
            if let Payload::Owned(ptr) = node.payload {
                // SAFETY: the registry exclusively owns every tracked block.
                unsafe { alloc::release(ptr.as_ptr()) };
            }
        }
    }

    /// Suppress auto-clear until the next [`Self::release_all`].
    ///
    /// With an empty registry a flag-only placeholder node is created to
    /// carry the flag. Redundant calls are diagnosed but idempotent.
    pub fn disable_auto_clear(&mut self) {
        tracing::trace!("disabling auto-clear on exec");
        match self.head.as_deref_mut() {
            Some(head) if head.suppress_auto_clear => {
                tracing::warn!("auto-clear on exec already disabled for this thread");
            }
            Some(head) => head.suppress_auto_clear = true,
            None => {
                self.head = Some(Box::new(Node {
                    payload: Payload::FlagOnly,
                    suppress_auto_clear: true,
                    next: None,
                }));
            }
        }
    }

    /// Drop all bookkeeping without touching the tracked pointers, unless
    /// auto-clear is suppressed (then nothing happens at all).
    ///
    /// This is the implicit clear at the natural end of a statement. While
    /// suppressed, the tracked pointers must stay alive for the caller, so
    /// the walk is skipped entirely. Otherwise only the nodes are freed;
    /// ownership of the blocks reverts to whoever will call
    /// [`Self::release_all`] or release them individually.
    pub fn clear_if_not_suppressed(&mut self) {
        let Some(head) = self.head.as_deref() else {
            return;
        };
        if head.suppress_auto_clear {
            tracing::debug!("auto-clear suppressed; tracked allocations await explicit release");
            return;
        }
        let mut cur = self.head.take();
        while let Some(mut node) = cur {
            cur = node.next.take();
            // The node drops here; Payload::Owned deliberately does not
            // free its block.
        }
    }

    /// Suppression flags of all nodes, head first.
    #[cfg(test)]
    fn suppress_flags(&self) -> Vec<bool> {
        let mut flags = Vec::new();
        let mut cur = self.head.as_deref();
        while let Some(node) = cur {
            flags.push(node.suppress_auto_clear);
            cur = node.next.as_deref();
        }
        flags
    }
}

/// Thread-exit backstop: a registry torn down while it still tracks blocks
/// releases everything.
impl Drop for AutoMemRegistry {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Run `f` against the calling thread's registry.
pub fn with_thread_registry<R>(f: impl FnOnce(&mut AutoMemRegistry) -> R) -> R {
    f(&mut thread_state().auto_mem.borrow_mut())
}
