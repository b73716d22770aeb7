//! Memory ceiling shared by the V8 heap and ArrayBuffer backing stores.
//!
//! V8 heap limits only bound the managed heap. Typed array and ArrayBuffer
//! storage comes from the embedder's allocator, so the isolate is created
//! with [`new_allocator`], which refuses to grow past the budget and trips
//! the same [`MemoryGuard`] the near-heap-limit callback uses.

// V8 allocator vtable and heap callback plumbing.
#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use deno_core::v8;
use tracing::warn;

/// Matches the alignment `malloc` guarantees on 64-bit hosts.
const BACKING_STORE_ALIGN: usize = 16;

/// Trips once when either the heap or the ArrayBuffer arena runs out, and
/// terminates the isolate it is attached to.
pub(crate) struct MemoryGuard {
    handle: OnceLock<v8::IsolateHandle>,
    triggered: AtomicBool,
    arena_limit: usize,
    arena_used: AtomicUsize,
}

impl MemoryGuard {
    pub(crate) fn new(arena_limit: usize) -> Self {
        Self {
            handle: OnceLock::new(),
            triggered: AtomicBool::new(false),
            arena_limit,
            arena_used: AtomicUsize::new(0),
        }
    }

    /// Bind the isolate to terminate. The allocator exists before the
    /// isolate does, so this happens right after creation.
    pub(crate) fn attach(&self, handle: v8::IsolateHandle) {
        let _ = self.handle.set(handle);
    }

    pub(crate) fn trip(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            if let Some(handle) = self.handle.get() {
                handle.terminate_execution();
            }
        }
    }

    pub(crate) fn triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub(crate) fn arena_used(&self) -> usize {
        self.arena_used.load(Ordering::SeqCst)
    }

    fn reserve(&self, bytes: usize) -> bool {
        let reserved = self
            .arena_used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(bytes)
                    .filter(|total| *total <= self.arena_limit)
            });
        if reserved.is_err() {
            warn!(
                requested = bytes,
                limit = self.arena_limit,
                "array buffer allocation refused"
            );
            self.trip();
            return false;
        }
        true
    }

    fn release(&self, bytes: usize) {
        self.arena_used.fetch_sub(bytes, Ordering::SeqCst);
    }
}

/// An ArrayBuffer allocator charging every backing store against `guard`.
pub(crate) fn new_allocator(guard: &Arc<MemoryGuard>) -> v8::UniqueRef<v8::Allocator> {
    // SAFETY: the handle is an owned `Arc` reference matching `VTABLE`, and
    // V8 releases it through `drop_guard` when the allocator is destroyed.
    unsafe { v8::new_rust_allocator(Arc::into_raw(Arc::clone(guard)), &VTABLE) }
}

static VTABLE: v8::RustAllocatorVtable<MemoryGuard> = v8::RustAllocatorVtable {
    allocate,
    allocate_uninitialized,
    free,
    reallocate,
    drop: drop_guard,
};

fn layout(len: usize) -> Option<Layout> {
    Layout::from_size_align(len.max(1), BACKING_STORE_ALIGN).ok()
}

fn allocate_with(guard: &MemoryGuard, len: usize, zeroed: bool) -> *mut c_void {
    let Some(layout) = layout(len) else {
        return ptr::null_mut();
    };
    if !guard.reserve(len) {
        return ptr::null_mut();
    }
    // SAFETY: `layout` has a non-zero size.
    let data = unsafe {
        if zeroed {
            alloc::alloc_zeroed(layout)
        } else {
            alloc::alloc(layout)
        }
    };
    if data.is_null() {
        guard.release(len);
    }
    data.cast()
}

unsafe extern "C" fn allocate(guard: &MemoryGuard, len: usize) -> *mut c_void {
    allocate_with(guard, len, true)
}

unsafe extern "C" fn allocate_uninitialized(guard: &MemoryGuard, len: usize) -> *mut c_void {
    allocate_with(guard, len, false)
}

unsafe extern "C" fn free(guard: &MemoryGuard, data: *mut c_void, len: usize) {
    if data.is_null() {
        return;
    }
    if let Some(layout) = layout(len) {
        // SAFETY: `data` was allocated by this vtable with the same length.
        unsafe { alloc::dealloc(data.cast(), layout) };
        guard.release(len);
    }
}

unsafe extern "C" fn reallocate(
    guard: &MemoryGuard,
    data: *mut c_void,
    old_length: usize,
    new_length: usize,
) -> *mut c_void {
    let Some(old_layout) = layout(old_length) else {
        return ptr::null_mut();
    };
    if layout(new_length).is_none() {
        return ptr::null_mut();
    }
    let growth = new_length.saturating_sub(old_length);
    if growth > 0 && !guard.reserve(growth) {
        return ptr::null_mut();
    }

    // SAFETY: `data` was allocated by this vtable with `old_layout`, and the
    // new size is non-zero and was validated as a layout above.
    let resized = unsafe { alloc::realloc(data.cast(), old_layout, new_length.max(1)) };
    if resized.is_null() {
        guard.release(growth);
        return ptr::null_mut();
    }
    if growth > 0 {
        // SAFETY: `old_length..new_length` lies inside the resized block.
        unsafe { ptr::write_bytes(resized.add(old_length), 0, growth) };
    } else {
        guard.release(old_length - new_length);
    }
    resized.cast()
}

unsafe extern "C" fn drop_guard(guard: *const MemoryGuard) {
    // SAFETY: `guard` is the pointer produced by `Arc::into_raw` in
    // `new_allocator`, released exactly once here.
    drop(unsafe { Arc::from_raw(guard) });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_allocations_past_the_budget() {
        let guard = MemoryGuard::new(1024);

        let first = allocate_with(&guard, 512, true);
        assert!(!first.is_null());
        assert_eq!(guard.arena_used(), 512);

        let refused = allocate_with(&guard, 1024, true);
        assert!(refused.is_null());
        assert!(guard.triggered());
        assert_eq!(guard.arena_used(), 512);

        unsafe { free(&guard, first, 512) };
        assert_eq!(guard.arena_used(), 0);
    }

    #[test]
    fn reallocation_is_charged_by_difference() {
        let guard = MemoryGuard::new(4096);

        let data = allocate_with(&guard, 1000, false);
        let grown = unsafe { reallocate(&guard, data, 1000, 3000) };
        assert!(!grown.is_null());
        assert_eq!(guard.arena_used(), 3000);
        let tail = unsafe { std::slice::from_raw_parts(grown.cast::<u8>().add(1000), 2000) };
        assert!(tail.iter().all(|byte| *byte == 0));

        let shrunk = unsafe { reallocate(&guard, grown, 3000, 100) };
        assert_eq!(guard.arena_used(), 100);

        let refused = unsafe { reallocate(&guard, shrunk, 100, 8192) };
        assert!(refused.is_null());
        assert!(guard.triggered());
        assert_eq!(guard.arena_used(), 100);

        unsafe { free(&guard, shrunk, 100) };
        assert_eq!(guard.arena_used(), 0);
    }

    #[test]
    fn allocator_releases_its_guard_reference() {
        let guard = Arc::new(MemoryGuard::new(64));
        let allocator = new_allocator(&guard);
        assert_eq!(Arc::strong_count(&guard), 2);
        drop(allocator);
        assert_eq!(Arc::strong_count(&guard), 1);
    }
}
