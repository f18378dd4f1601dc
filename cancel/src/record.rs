//! Type-erased heap records for installed handlers.
//!
//! A record owns one handler together with the pointer and [`Layout`] of the
//! allocation it lives in. Destroying a record hands that allocation back to
//! the caller as a [`Block`], so an immediate re-install can place the next
//! record in the same storage instead of round-tripping the allocator. An
//! operation that rebinds a similarly-shaped handler on every retry never
//! reallocates.

use alloc::alloc::{alloc, dealloc, handle_alloc_error};
use core::alloc::Layout;
use core::mem::ManuallyDrop;
use core::ptr::NonNull;

use crate::handler::Handler;

/// A heap block with no live record in it.
///
/// `layout` is what the block was allocated with: it caps what a reusing
/// record may need and is what [`release`](Block::release) passes back to
/// the allocator.
pub(crate) struct Block {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl Block {
    fn allocate(layout: Layout) -> Self {
        // Records embed at least a Layout field, so `layout` is never
        // zero-sized.
        let Some(ptr) = NonNull::new(unsafe { alloc(layout) }) else {
            handle_alloc_error(layout)
        };
        Self { ptr, layout }
    }

    /// Whether a record needing `layout` can be built in this block.
    ///
    /// Size may shrink freely. Alignment must not grow, because the block is
    /// eventually released with the layout it was allocated with.
    fn fits(&self, layout: Layout) -> bool {
        layout.size() <= self.layout.size() && layout.align() <= self.layout.align()
    }

    pub(crate) fn release(self) {
        // SAFETY: `ptr` was allocated with exactly `layout`, and a Block only
        // exists while no record lives in the storage.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// One installed handler, behind a vtable so the cell can hold any handler
/// type.
pub(crate) trait ErasedHandler {
    /// Runs the handler. May be called repeatedly.
    fn invoke(&mut self);

    /// Drops the handler in place and returns the backing block.
    ///
    /// # Safety
    ///
    /// Callable at most once per record. Afterwards the record is dead
    /// storage that must only be touched through the returned [`Block`].
    unsafe fn reclaim(&mut self) -> Block;
}

struct HandlerRecord<H> {
    handler: ManuallyDrop<H>,
    /// Start of the allocation this record sits in. Kept as the allocator's
    /// own pointer: after a shrinking reuse a reference to the record spans
    /// fewer bytes than the block, so reclaiming must hand back this pointer
    /// and not one re-derived from `&mut self`.
    ptr: NonNull<u8>,
    /// Layout of that allocation. At least `Layout::new::<Self>()`, and
    /// larger after a shrinking reuse.
    layout: Layout,
}

impl<H: Handler> ErasedHandler for HandlerRecord<H> {
    fn invoke(&mut self) {
        self.handler.on_cancel();
    }

    unsafe fn reclaim(&mut self) -> Block {
        let block = Block {
            ptr: self.ptr,
            layout: self.layout,
        };
        // SAFETY: the handler is still live, per the at-most-once contract on
        // this method, and is never used again.
        unsafe { ManuallyDrop::drop(&mut self.handler) };
        block
    }
}

/// Builds a record around the handler produced by `init`, reusing `reclaimed`
/// when it is big enough, and returns the erased record.
///
/// If `init` panics, whatever block was in hand is released and the panic
/// propagates; no record is published.
pub(crate) fn write<H, F>(reclaimed: Option<Block>, init: F) -> NonNull<dyn ErasedHandler>
where
    H: Handler,
    F: FnOnce() -> H,
{
    let needed = Layout::new::<HandlerRecord<H>>();
    let block = match reclaimed {
        Some(block) if block.fits(needed) => block,
        Some(block) => {
            block.release();
            Block::allocate(needed)
        }
        None => Block::allocate(needed),
    };

    let guard = ReleaseOnPanic {
        ptr: block.ptr,
        layout: block.layout,
    };
    let handler = init();
    let record = block.ptr.cast::<HandlerRecord<H>>();
    // SAFETY: the block is unused storage that satisfies `needed`, either by
    // the `fits` check or because it was allocated for it, so the write is in
    // bounds and aligned.
    unsafe {
        record.as_ptr().write(HandlerRecord {
            handler: ManuallyDrop::new(handler),
            ptr: block.ptr,
            layout: block.layout,
        });
    }
    core::mem::forget(guard);
    record
}

/// Drops the record's handler and releases its storage.
///
/// # Safety
///
/// `record` must point at a live record that nothing will use again.
pub(crate) unsafe fn destroy(mut record: NonNull<dyn ErasedHandler>) {
    // SAFETY: per the caller contract the record is live and unaliased.
    unsafe { record.as_mut().reclaim() }.release();
}

struct ReleaseOnPanic {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl Drop for ReleaseOnPanic {
    fn drop(&mut self) {
        // SAFETY: only reachable while the block holds no record, when `init`
        // panicked before the record was written.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}
