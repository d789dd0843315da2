//! Per-thread trace arenas.
//!
//! A [`Scope`] collects every event recorded on its thread between
//! construction and destruction. Scopes nest; the innermost scope
//! receives the events. Scope lifetimes must be strictly nested, which
//! the RAII guard enforces for anything short of `mem::forget`.

use crate::tracer::alloc::ChunkAllocator;
use crate::tracer::chunk::Chunk;
use crate::tracer::cycles;
use crate::tracer::registry;
use crate::tracer::trace::Trace;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

/// Warn once per chunk when a scope holds more than this many bytes.
pub const DEFAULT_ALLOC_WARN_BYTES: u64 = 1 << 30;

/// The arena state behind a [`Scope`] guard. Owned by the thread-local
/// registry while the thread lives, and by the global finished list
/// after the thread exits.
pub(crate) struct ScopeData {
    name: String,
    allocator: Arc<ChunkAllocator>,
    chunks: Vec<Chunk>,
    time_start: Instant,
    cycles_start: u64,
    allocated_bytes: u64,
    warn_bytes: u64,
    is_null: bool,
}

impl ScopeData {
    pub(crate) fn new(name: String, allocator: Arc<ChunkAllocator>, is_null: bool) -> ScopeData {
        ScopeData {
            name,
            allocator,
            chunks: Vec::new(),
            time_start: Instant::now(),
            cycles_start: cycles::counter(),
            allocated_bytes: 0,
            warn_bytes: DEFAULT_ALLOC_WARN_BYTES,
            is_null,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub(crate) fn set_allocator(&mut self, allocator: Arc<ChunkAllocator>) {
        self.allocator = allocator;
    }

    pub(crate) fn set_warn_bytes(&mut self, bytes: u64) {
        self.warn_bytes = bytes;
    }

    pub(crate) fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    pub(crate) fn current_chunk_mut(&mut self) -> Option<&mut Chunk> {
        self.chunks.last_mut()
    }

    /// Hand the recorder a buffer for the next records.
    ///
    /// A null scope keeps overwriting its single scratch chunk; every
    /// other scope appends a chunk from its allocator, accounting the
    /// bytes and warning on stderr for each chunk acquired beyond the
    /// configured threshold.
    pub(crate) fn acquire_chunk(&mut self) -> (*mut u32, usize) {
        if self.is_null {
            if let Some(chunk) = self.chunks.last_mut() {
                chunk.set_size(0);
                return (chunk.data(), chunk.capacity());
            }
        }
        let chunk = Chunk::allocate(&self.allocator);
        self.allocated_bytes += chunk.capacity_bytes();
        if self.allocated_bytes > self.warn_bytes {
            eprintln!(
                "[cycletrace] scope \"{}\" allocates more than {} bytes",
                self.name, self.warn_bytes
            );
        }
        self.chunks.push(chunk);
        let chunk = self.chunks.last().expect("chunk just pushed");
        (chunk.data(), chunk.capacity())
    }

    /// Copy the live prefix of every chunk, in order, into an immutable
    /// trace. Chunk sizes must have been synced by the caller.
    pub(crate) fn snapshot(&self) -> Trace {
        let time_end = Instant::now();
        let cycles_end = cycles::counter();
        let total: usize = self.chunks.iter().map(|c| c.size()).sum();
        let mut data = Vec::with_capacity(total);
        for chunk in &self.chunks {
            data.extend_from_slice(chunk.words());
        }
        Trace::from_parts(
            self.name.clone(),
            data,
            self.time_start,
            time_end,
            self.cycles_start,
            cycles_end,
        )
    }
}

/// RAII arena guard. Events recorded while this scope is innermost land
/// in its chunks and are dropped (returned to the pool) when the scope
/// is.
///
/// Thread-bound: a scope must be destroyed on the thread that created
/// it, in strict nesting order.
pub struct Scope {
    index: usize,
    _not_send: PhantomData<*const ()>,
}

impl Scope {
    /// Open a named scope drawing chunks from the built-in global
    /// allocator.
    pub fn new(name: impl Into<String>) -> Scope {
        Scope::create(name.into(), ChunkAllocator::global(), false)
    }

    /// Open a named scope drawing chunks from `allocator`.
    pub fn with_allocator(name: impl Into<String>, allocator: Arc<ChunkAllocator>) -> Scope {
        Scope::create(name.into(), allocator, false)
    }

    /// Open a scope that swallows everything recorded inside it by
    /// endlessly overwriting one scratch chunk. Use it to mask a block
    /// whose annotations should not be measured.
    pub fn null() -> Scope {
        Scope::create(String::new(), ChunkAllocator::global(), true)
    }

    fn create(name: String, allocator: Arc<ChunkAllocator>, is_null: bool) -> Scope {
        let index = registry::with_thread(|state| {
            state.push_scope(ScopeData::new(name, allocator, is_null))
        });
        Scope {
            index,
            _not_send: PhantomData,
        }
    }

    /// The scope's name.
    pub fn name(&self) -> String {
        registry::with_thread(|state| state.scope(self.index).name().to_owned())
    }

    /// Bytes of chunk storage this scope has acquired so far, excluding
    /// nested scopes.
    pub fn allocated_bytes(&self) -> u64 {
        registry::with_thread(|state| state.scope(self.index).allocated_bytes())
    }

    /// Number of bytes after which further chunk acquisitions warn on
    /// stderr.
    pub fn set_alloc_warn_threshold(&self, bytes: u64) {
        registry::with_thread(|state| state.scope_mut(self.index).set_warn_bytes(bytes));
    }

    /// Snapshot the events recorded so far into an immutable [`Trace`].
    /// Non-destructive; the scope keeps recording. Copies the chunk
    /// data.
    pub fn snapshot(&self) -> Trace {
        registry::with_thread(|state| {
            state.sync_current_chunk();
            state.scope(self.index).snapshot()
        })
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        registry::with_thread(|state| {
            if state.depth() != self.index + 1 {
                // Out-of-order destruction is a programming error; leave
                // the stack alone rather than corrupt sibling scopes.
                eprintln!("[cycletrace] scope dropped out of nesting order");
                return;
            }
            state.pop_scope();
        });
    }
}
