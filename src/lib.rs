#![doc = include_str!("../README.md")]

pub mod bench;
pub mod tracer;

pub use tracer::export;
pub use tracer::{
    clear_finished_thread_traces, current_thread_trace, enter, exit, finished_thread_traces,
    set_default_allocator, set_thread_alloc_warn_threshold, set_thread_allocator, set_thread_name,
    total_memory_consumption, ChunkAllocator, Event, EventScope, Scope, Site, SiteStats,
    SpanGuard, Trace, TraceBuilder, TraceVisitor,
};

/// The fully-qualified path of the enclosing function, as a `&'static
/// str`. Implementation detail of [`trace_scope!`].
#[doc(hidden)]
#[macro_export]
macro_rules! __function_path {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            ::core::any::type_name::<T>()
        }
        let name = type_name_of(f);
        // drop the "::f" the probe fn appends
        &name[..name.len() - 3]
    }};
}

/// Trace the enclosing block.
///
/// Expands to a per-call-site static [`Site`] and an RAII guard that
/// records entry now and exit when the surrounding scope ends. The
/// optional argument is a label shown by the exporters; without one,
/// viewers fall back to the function name.
///
/// ```
/// fn parse(input: &str) -> usize {
///     cycletrace::trace_scope!("parse");
///     input.len()
/// }
/// ```
///
/// Two annotations in one block nest in declaration order. The guard
/// must stay on the thread that created it.
#[macro_export]
macro_rules! trace_scope {
    () => {
        $crate::trace_scope!("")
    };
    ($label:expr) => {
        let _cycletrace_span = {
            static SITE: ::std::sync::OnceLock<$crate::Site> = ::std::sync::OnceLock::new();
            // resolved outside the init closure so the probe fn sits
            // directly in the annotated function
            let function = $crate::__function_path!();
            $crate::SpanGuard::new(SITE.get_or_init(|| {
                $crate::Site::new(::core::file!(), function, $label, ::core::line!())
            }))
        };
    };
}
