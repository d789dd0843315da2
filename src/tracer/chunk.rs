//! Fixed-capacity word buffers backing per-thread trace arenas.

use crate::tracer::alloc::ChunkAllocator;
use std::ptr;
use std::sync::{Arc, Weak};

/// An owning handle to a fixed-capacity buffer of 32-bit words, plus a
/// non-owning back-reference to the allocator that produced it.
///
/// Unique ownership: movable, not copyable. On drop the buffer returns
/// to its allocator's pool if the allocator is still alive; otherwise
/// it is released to the heap and the outstanding-memory counter drops.
pub(crate) struct Chunk {
    data: *mut u32,
    capacity: usize,
    /// Words written so far. Only the recorder sync updates this; the
    /// hot path advances its cursor without touching the chunk.
    size: usize,
    owner: Weak<ChunkAllocator>,
}

// SAFETY: the buffer is uniquely owned by this handle and only ever
// written by the thread that currently owns it; handing the handle to
// another thread hands over that exclusive access.
unsafe impl Send for Chunk {}

impl Chunk {
    /// Draw a fresh chunk from `allocator`.
    pub(crate) fn allocate(allocator: &Arc<ChunkAllocator>) -> Chunk {
        let (data, capacity) = allocator.alloc_buffer();
        Chunk {
            data,
            capacity,
            size: 0,
            owner: Arc::downgrade(allocator),
        }
    }

    #[inline]
    pub(crate) fn data(&self) -> *mut u32 {
        self.data
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub(crate) fn capacity_bytes(&self) -> u64 {
        (self.capacity * 4) as u64
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn set_size(&mut self, size: usize) {
        debug_assert!(size <= self.capacity, "chunk size exceeds capacity");
        self.size = size;
    }

    /// The live prefix `data[0..size]`.
    pub(crate) fn words(&self) -> &[u32] {
        // SAFETY: `data` points to `capacity` initialised words owned by
        // this handle and `size <= capacity`; the owning thread is not
        // writing while this borrow is alive.
        unsafe { std::slice::from_raw_parts(self.data, self.size) }
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        if self.data.is_null() {
            return;
        }
        match self.owner.upgrade() {
            Some(allocator) => allocator.recycle(self.data, self.capacity),
            None => {
                crate::tracer::alloc::note_released(self.capacity);
                // SAFETY: `data`/`capacity` came out of `Box::into_raw`
                // in `ChunkAllocator::alloc_buffer` and were never freed.
                unsafe {
                    drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                        self.data,
                        self.capacity,
                    )))
                };
            }
        }
        self.data = ptr::null_mut();
    }
}
