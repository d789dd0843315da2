//! Serializers over decoded event streams: Speedscope JSON, Chrome
//! Tracing JSON and a per-site CSV summary.
//!
//! Each exporter has a `write_*` function taking any [`std::io::Write`]
//! and a `write_*_file` convenience that silently returns when the
//! output file cannot be created.

mod chrome;
mod csv;
mod speedscope;

pub use chrome::{write_chrome_trace, write_chrome_trace_file};
pub use csv::{write_summary_csv, write_summary_csv_file};
pub use speedscope::{write_speedscope, write_speedscope_file, SpeedscopeOptions};

use crate::tracer::site::Site;
use std::borrow::Cow;

/// The name shown in viewers for `site`: its label, or its beautified
/// function path when the label is empty.
pub fn site_display_name(site: &Site) -> Cow<'_, str> {
    if site.name.is_empty() {
        Cow::Owned(beautify_function_name(site.function))
    } else {
        Cow::Borrowed(site.name)
    }
}

/// Compress a fully-qualified function path to something readable in a
/// profile: generic arguments go, and of the module path only the last
/// two segments stay.
///
/// A pure string transform; `"mycrate::codec::huff::decode<u16>"`
/// becomes `"huff::decode"`.
pub fn beautify_function_name(function: &str) -> String {
    let mut stripped = String::with_capacity(function.len());
    let mut depth = 0usize;
    for c in function.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            _ if depth == 0 => stripped.push(c),
            _ => {}
        }
    }
    let segments: Vec<&str> = stripped.split("::").filter(|s| !s.is_empty()).collect();
    let keep = segments.len().saturating_sub(2);
    segments[keep..].join("::")
}

/// Render a duration for humans: four significant digits in the first
/// unit that keeps the number below 1999.
pub fn format_seconds(seconds: f64) -> String {
    let (value, unit) = if seconds < 1999e-9 {
        (seconds * 1e9, "ns")
    } else if seconds < 1999e-6 {
        (seconds * 1e6, "us")
    } else if seconds < 1999e-3 {
        (seconds * 1e3, "ms")
    } else {
        (seconds, "s")
    };
    let decimals = if value >= 1000.0 {
        0
    } else if value >= 100.0 {
        1
    } else if value >= 10.0 {
        2
    } else {
        3
    };
    format!("{value:.decimals$} {unit}")
}
