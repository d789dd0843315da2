//! The hot path: per-thread cursors and the entry/exit recorders.
//!
//! Each thread owns a pair of raw cursors into the current chunk of its
//! innermost scope. Recording an event is two thread-local reads, one
//! predicted-not-taken bounds check, the timestamping instruction and
//! the word stores. Refilling the chunk is the only cold step and the
//! only place a lock can be taken.
//!
//! The recorder is not re-entrant on one thread: calling it from a
//! signal handler that interrupted another record is not supported.

use crate::tracer::cycles;
use crate::tracer::format::{END_SENTINEL, ENTER_WORDS, EXIT_WORDS, MAX_RECORD_WORDS};
use crate::tracer::registry;
use crate::tracer::site::Site;
use std::cell::Cell;
use std::marker::PhantomData;
use std::ptr;

struct Cursor {
    curr: Cell<*mut u32>,
    end: Cell<*mut u32>,
}

thread_local! {
    // Const-initialised and without drop glue, so access compiles to a
    // plain TLS load with no lazy-init branch and stays usable from
    // other thread-locals' destructors. `end` leaves MAX_RECORD_WORDS
    // of slack before the chunk's true capacity, so the bounds check
    // below is the only one a record needs. Both cursors start null;
    // null >= null routes the very first record into the cold path.
    static CURSOR: Cursor = const {
        Cursor {
            curr: Cell::new(ptr::null_mut()),
            end: Cell::new(ptr::null_mut()),
        }
    };
}

/// A saved `{curr, end}` pair, held per scope so destruction can route
/// the recorder back into the parent scope's chunk.
#[derive(Clone, Copy)]
pub(crate) struct SavedCursor {
    curr: *mut u32,
    end: *mut u32,
}

/// Swap the current cursors for null ones and return them.
pub(crate) fn take_cursor() -> SavedCursor {
    CURSOR.with(|c| {
        let saved = SavedCursor {
            curr: c.curr.get(),
            end: c.end.get(),
        };
        c.curr.set(ptr::null_mut());
        c.end.set(ptr::null_mut());
        saved
    })
}

pub(crate) fn restore_cursor(saved: SavedCursor) {
    CURSOR.with(|c| {
        c.curr.set(saved.curr);
        c.end.set(saved.end);
    });
}

/// Current write position; null before the first chunk of the innermost
/// scope exists.
pub(crate) fn current_ptr() -> *mut u32 {
    CURSOR.with(|c| c.curr.get())
}

/// Point the cursors into a fresh chunk buffer.
pub(crate) fn set_cursor(data: *mut u32, capacity: usize) {
    debug_assert!(capacity > MAX_RECORD_WORDS);
    CURSOR.with(|c| {
        c.curr.set(data);
        // SAFETY: `capacity - MAX_RECORD_WORDS` stays inside the buffer.
        c.end.set(unsafe { data.add(capacity - MAX_RECORD_WORDS) });
    });
}

/// Record entry into `site` on the current thread.
///
/// Callers that use `enter`/[`exit`] directly (instead of
/// [`SpanGuard`] or [`trace_scope!`](crate::trace_scope)) must keep
/// them strictly nested.
#[inline(always)]
pub fn enter(site: &'static Site) {
    CURSOR.with(|c| {
        let mut pd = c.curr.get();
        if pd >= c.end.get() {
            pd = alloc_chunk();
        }
        c.curr.set(unsafe { pd.add(ENTER_WORDS) });
        let addr = site.addr();
        // SAFETY: `pd` has at least MAX_RECORD_WORDS of headroom, by the
        // bounds check against the slack-adjusted `end`.
        unsafe {
            pd.write(addr as u32);
            pd.add(1).write((addr >> 32) as u32);
        }
        let (cycles, cpu) = cycles::timestamp();
        unsafe {
            pd.add(2).write(cycles as u32);
            pd.add(3).write((cycles >> 32) as u32);
            pd.add(4).write(cpu);
        }
    });
}

/// Record exit from the innermost entered site on the current thread.
#[inline(always)]
pub fn exit() {
    CURSOR.with(|c| {
        let mut pd = c.curr.get();
        if pd >= c.end.get() {
            pd = alloc_chunk();
        }
        c.curr.set(unsafe { pd.add(EXIT_WORDS) });
        let (cycles, cpu) = cycles::timestamp();
        // SAFETY: same headroom argument as in `enter`.
        unsafe {
            pd.write(END_SENTINEL);
            pd.add(1).write(cycles as u32);
            pd.add(2).write((cycles >> 32) as u32);
            pd.add(3).write(cpu);
        }
    });
}

/// Chunk refill. Initialises the thread on first use, seals the size of
/// the outgoing chunk and acquires the next one from the innermost
/// scope.
#[cold]
#[inline(never)]
fn alloc_chunk() -> *mut u32 {
    registry::with_thread(|state| {
        state.sync_current_chunk();
        let scope = state.innermost_mut();
        let (data, capacity) = scope.acquire_chunk();
        set_cursor(data, capacity);
        data
    })
}

/// RAII guard around an [`enter`]/[`exit`] pair.
///
/// Thread-bound: the exit must be recorded on the thread that recorded
/// the entry.
#[must_use = "dropping the guard immediately records the exit; bind it with `let _span = ...`"]
pub struct SpanGuard {
    _not_send: PhantomData<*const ()>,
}

impl SpanGuard {
    #[inline(always)]
    pub fn new(site: &'static Site) -> SpanGuard {
        enter(site);
        SpanGuard {
            _not_send: PhantomData,
        }
    }
}

impl Drop for SpanGuard {
    #[inline(always)]
    fn drop(&mut self) {
        exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::scope::Scope;

    static SITE: Site = Site::new("src/recorder.rs", "recorder::tests::span", "span", 1);

    #[test]
    fn guard_records_a_matched_pair() {
        let scope = Scope::new("guard");
        {
            let _span = SpanGuard::new(&SITE);
        }
        let events = scope.snapshot().compute_events();
        assert_eq!(events.len(), 2);
        assert!(events[0].enter && !events[1].enter);
        assert!(Site::same(events[0].site, &SITE));
        assert!(events[1].cycles >= events[0].cycles);
    }

    #[test]
    fn manual_enter_exit_pair() {
        let scope = Scope::new("manual");
        enter(&SITE);
        exit();
        let events = scope.snapshot().compute_events();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn records_span_chunk_boundaries() {
        use crate::tracer::alloc::ChunkAllocator;
        // 128-word chunks force a refill every few records.
        let alloc = ChunkAllocator::new(128);
        let scope = Scope::with_allocator("tiny-chunks", alloc);
        for _ in 0..100 {
            let _span = SpanGuard::new(&SITE);
        }
        let trace = scope.snapshot();
        let stats = trace.compute_site_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].samples, 100);
    }
}
