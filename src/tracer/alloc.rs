//! Pooled, thread-safe allocation of trace chunks.

#[cfg(test)]
use crate::tracer::chunk::Chunk;
use crate::tracer::format::MAX_RECORD_WORDS;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// Default chunk size of the process-wide allocator, in 32-bit words.
pub const DEFAULT_CHUNK_WORDS: usize = 64 * 1024;

/// Smallest usable chunk: room for a healthy run of records plus the
/// end-of-chunk margin the recorder reserves.
const MIN_CHUNK_WORDS: usize = 128;

/// Bytes currently allocated for trace chunks across the process.
/// Grows on true allocation only; pool reuse does not touch it.
static TOTAL_MEMORY: AtomicUsize = AtomicUsize::new(0);

/// Total memory consumption of all trace chunks, in bytes.
pub fn total_memory_consumption() -> usize {
    TOTAL_MEMORY.load(Ordering::Relaxed)
}

pub(crate) fn note_released(capacity_words: usize) {
    TOTAL_MEMORY.fetch_sub(capacity_words * 4, Ordering::Relaxed);
}

/// A pooled allocator for trace chunks.
///
/// Thread-safe: the free list is mutex-guarded and the mutex is held
/// only to pop or push a buffer, never while actually allocating.
/// Buffers recycled into the pool keep counting against
/// [`total_memory_consumption`]; the counter only drops when a chunk
/// outlives its allocator and releases its buffer to the heap.
pub struct ChunkAllocator {
    chunk_size: usize,
    free_list: Mutex<Vec<Box<[u32]>>>,
}

impl ChunkAllocator {
    /// Create an allocator handing out chunks of `chunk_size_words`
    /// 32-bit words. The size is fixed for the allocator's lifetime.
    pub fn new(chunk_size_words: usize) -> Arc<ChunkAllocator> {
        assert!(
            chunk_size_words >= MIN_CHUNK_WORDS,
            "chunk size must be at least {MIN_CHUNK_WORDS} words"
        );
        Arc::new(ChunkAllocator {
            chunk_size: chunk_size_words,
            free_list: Mutex::new(Vec::new()),
        })
    }

    /// The lazily-created process-wide default allocator.
    pub fn global() -> Arc<ChunkAllocator> {
        static GLOBAL: OnceLock<Arc<ChunkAllocator>> = OnceLock::new();
        GLOBAL.get_or_init(|| ChunkAllocator::new(DEFAULT_CHUNK_WORDS)).clone()
    }

    /// Chunk size in words.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Pop a pooled buffer, or truly allocate outside the lock. Chunks
    /// are drawn through [`Chunk::allocate`], which records the weak
    /// back-reference.
    pub(crate) fn alloc_buffer(&self) -> (*mut u32, usize) {
        let recycled = {
            let mut free = self.free_list.lock().unwrap_or_else(|e| e.into_inner());
            free.pop()
        };
        let buf = match recycled {
            Some(buf) => buf,
            None => {
                TOTAL_MEMORY.fetch_add(self.chunk_size * 4, Ordering::Relaxed);
                vec![0u32; self.chunk_size].into_boxed_slice()
            }
        };
        debug_assert_eq!(buf.len(), self.chunk_size);
        debug_assert!(buf.len() > MAX_RECORD_WORDS + 100, "chunk too small to record into");
        let capacity = buf.len();
        (Box::into_raw(buf) as *mut u32, capacity)
    }

    /// Return a buffer to the pool. Called from a chunk's drop.
    pub(crate) fn recycle(&self, data: *mut u32, capacity: usize) {
        debug_assert_eq!(capacity, self.chunk_size);
        // SAFETY: `data`/`capacity` were produced by `alloc_buffer`'s
        // `Box::into_raw` and ownership is being handed back here.
        let buf = unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(data, capacity)) };
        self.free_list
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(buf);
    }
}

impl Drop for ChunkAllocator {
    fn drop(&mut self) {
        // Pooled buffers die with the allocator; account for them here
        // so every buffer is decremented exactly once.
        let free = self.free_list.get_mut().unwrap_or_else(|e| e.into_inner());
        for buf in free.drain(..) {
            note_released(buf.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recycled_buffer_is_handed_out_again() {
        let alloc = ChunkAllocator::new(256);
        let chunk = Chunk::allocate(&alloc);
        let ptr = chunk.data();
        drop(chunk);
        let next = Chunk::allocate(&alloc);
        assert_eq!(next.data(), ptr);
    }

    #[test]
    fn global_allocator_is_shared() {
        let a = ChunkAllocator::global();
        let b = ChunkAllocator::global();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.chunk_size(), DEFAULT_CHUNK_WORDS);
    }

    #[test]
    #[should_panic(expected = "at least")]
    fn tiny_chunk_size_is_rejected() {
        let _ = ChunkAllocator::new(8);
    }
}
