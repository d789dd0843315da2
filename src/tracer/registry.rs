//! Thread lifetime management and process-wide configuration.
//!
//! Every thread gets a root scope on first use of the recorder. When
//! the thread exits, its root scope is moved into a global finished
//! list so the recorded events outlive the thread; the buffers are
//! reclaimed by [`clear_finished_thread_traces`].

use crate::tracer::alloc::ChunkAllocator;
use crate::tracer::recorder;
use crate::tracer::scope::ScopeData;
use crate::tracer::trace::Trace;
use arc_swap::ArcSwapOption;
use std::cell::RefCell;
use std::sync::{Arc, Mutex, OnceLock};

/// Allocator used for root scopes of threads initialised from now on.
static DEFAULT_ALLOCATOR: ArcSwapOption<ChunkAllocator> = ArcSwapOption::const_empty();

/// Root scopes adopted from exited threads.
static FINISHED: OnceLock<Mutex<Vec<ScopeData>>> = OnceLock::new();

fn finished() -> &'static Mutex<Vec<ScopeData>> {
    FINISHED.get_or_init(|| Mutex::new(Vec::new()))
}

fn default_allocator() -> Arc<ChunkAllocator> {
    DEFAULT_ALLOCATOR
        .load_full()
        .unwrap_or_else(ChunkAllocator::global)
}

/// Per-thread scope stack. `scopes` and `saved` move in lockstep: the
/// cursor saved at index `i` is the recorder state to restore when the
/// scope at index `i` pops.
pub(crate) struct ThreadState {
    scopes: Vec<ScopeData>,
    saved: Vec<recorder::SavedCursor>,
}

impl ThreadState {
    fn ensure_init(&mut self) {
        if !self.scopes.is_empty() {
            return;
        }
        self.saved.push(recorder::take_cursor());
        self.scopes
            .push(ScopeData::new(thread_label(), default_allocator(), false));
    }

    /// Seal the size of the chunk the recorder is currently writing,
    /// so snapshots and chunk switches see a consistent prefix.
    pub(crate) fn sync_current_chunk(&mut self) {
        let Some(scope) = self.scopes.last_mut() else {
            return;
        };
        let Some(chunk) = scope.current_chunk_mut() else {
            return;
        };
        let curr = recorder::current_ptr();
        if curr.is_null() {
            return;
        }
        // SAFETY: `curr` points into this chunk's buffer; the recorder
        // only ever advances it between `data` and `data + capacity`.
        let words = unsafe { curr.offset_from(chunk.data()) };
        debug_assert!(words >= 0 && words as usize <= chunk.capacity());
        chunk.set_size(words as usize);
    }

    pub(crate) fn innermost_mut(&mut self) -> &mut ScopeData {
        self.scopes.last_mut().expect("scope stack is never empty after init")
    }

    pub(crate) fn scope(&self, index: usize) -> &ScopeData {
        &self.scopes[index]
    }

    pub(crate) fn scope_mut(&mut self, index: usize) -> &mut ScopeData {
        &mut self.scopes[index]
    }

    pub(crate) fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub(crate) fn push_scope(&mut self, data: ScopeData) -> usize {
        self.sync_current_chunk();
        self.saved.push(recorder::take_cursor());
        self.scopes.push(data);
        self.scopes.len() - 1
    }

    pub(crate) fn pop_scope(&mut self) {
        debug_assert!(self.scopes.len() >= 2, "the root scope never pops");
        let saved = self.saved.pop().expect("saved cursors track scopes");
        recorder::restore_cursor(saved);
        self.scopes.pop();
    }
}

struct ThreadSlot {
    state: RefCell<ThreadState>,
}

impl Drop for ThreadSlot {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        if state.scopes.is_empty() {
            return;
        }
        state.sync_current_chunk();
        // Scopes leaked past their thread (mem::forget'd guards) are
        // unrecoverable; release their chunks and keep the root.
        while state.scopes.len() > 1 {
            state.scopes.pop();
            state.saved.pop();
        }
        recorder::take_cursor();
        let root = state.scopes.pop().expect("root scope present");
        finished()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(root);
    }
}

thread_local! {
    static THREAD: ThreadSlot = ThreadSlot {
        state: RefCell::new(ThreadState {
            scopes: Vec::new(),
            saved: Vec::new(),
        }),
    };
}

/// Run `f` against this thread's initialised scope stack.
pub(crate) fn with_thread<R>(f: impl FnOnce(&mut ThreadState) -> R) -> R {
    THREAD.with(|slot| {
        let mut state = slot.state.borrow_mut();
        state.ensure_init();
        f(&mut state)
    })
}

#[cfg(target_os = "linux")]
fn thread_label() -> String {
    if let Some(name) = std::thread::current().name() {
        if !name.is_empty() {
            return name.to_owned();
        }
    }
    // SAFETY: gettid takes no arguments and cannot fail.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    format!("thread-{tid}")
}

#[cfg(not(target_os = "linux"))]
fn thread_label() -> String {
    if let Some(name) = std::thread::current().name() {
        if !name.is_empty() {
            return name.to_owned();
        }
    }
    format!("{:?}", std::thread::current().id())
}

/// Set the allocator used by root scopes of threads initialised from
/// now on. `None` resets to the built-in global allocator.
pub fn set_default_allocator(allocator: Option<Arc<ChunkAllocator>>) {
    DEFAULT_ALLOCATOR.store(allocator);
}

/// Replace the current thread's root-scope allocator. Takes effect at
/// the next chunk boundary; the chunk currently being written stays
/// with its original allocator. `None` resets to the built-in global
/// allocator.
pub fn set_thread_allocator(allocator: Option<Arc<ChunkAllocator>>) {
    let allocator = allocator.unwrap_or_else(ChunkAllocator::global);
    with_thread(|state| state.scope_mut(0).set_allocator(allocator));
}

/// Name the current thread's root trace.
pub fn set_thread_name(name: impl Into<String>) {
    let name = name.into();
    with_thread(|state| state.scope_mut(0).set_name(name));
}

/// Set the byte threshold past which the current thread's root scope
/// warns on stderr for every further chunk it acquires.
pub fn set_thread_alloc_warn_threshold(bytes: u64) {
    with_thread(|state| state.scope_mut(0).set_warn_bytes(bytes));
}

/// Snapshot the current thread's root scope. Non-destructive.
pub fn current_thread_trace() -> Trace {
    with_thread(|state| {
        state.sync_current_chunk();
        state.scope(0).snapshot()
    })
}

/// Snapshot the root scopes of every finished thread.
pub fn finished_thread_traces() -> Vec<Trace> {
    finished()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .map(ScopeData::snapshot)
        .collect()
}

/// Drop the adopted root scopes of finished threads, returning their
/// chunks to their allocators.
pub fn clear_finished_thread_traces() {
    finished()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clear();
}
