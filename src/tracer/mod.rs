pub mod alloc;
pub(crate) mod chunk;
pub mod cycles;
pub mod export;
pub mod format;
pub mod recorder;
pub mod registry;
pub mod scope;
pub mod site;
pub mod trace;

pub use alloc::{total_memory_consumption, ChunkAllocator, DEFAULT_CHUNK_WORDS};
pub use format::{TraceVisitor, END_SENTINEL, ENTER_WORDS, EXIT_WORDS, MAX_RECORD_WORDS};
pub use recorder::{enter, exit, SpanGuard};
pub use registry::{
    clear_finished_thread_traces, current_thread_trace, finished_thread_traces,
    set_default_allocator, set_thread_alloc_warn_threshold, set_thread_allocator,
    set_thread_name,
};
pub use scope::{Scope, DEFAULT_ALLOC_WARN_BYTES};
pub use site::Site;
pub use trace::{Event, EventScope, SiteStats, Trace, TraceBuilder};
