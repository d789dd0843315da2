//! Chrome Tracing JSON (`chrome://tracing`, Perfetto) over a decoded
//! trace.
//!
//! Spec: <https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU/preview>

use crate::tracer::export::site_display_name;
use crate::tracer::format::TraceVisitor;
use crate::tracer::site::Site;
use crate::tracer::trace::Trace;
use serde::Serialize;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::io::Write;
use std::path::Path;

#[derive(Serialize)]
struct ChromeEvent<'a> {
    name: Cow<'a, str>,
    cat: &'static str,
    ph: &'static str,
    pid: u32,
    tid: u32,
    ts: f64,
}

/// Collects B/E events; the CPU a record was observed on becomes the
/// `tid`, so per-core lanes line up in the viewer.
struct Collector {
    events: Vec<(bool, &'static Site, u64, u32)>,
    stack: SmallVec<[&'static Site; 16]>,
    min_cycles: u64,
    seen_any: bool,
}

impl TraceVisitor for Collector {
    fn on_enter(&mut self, site: &'static Site, cycles: u64, cpu: u32) {
        if !self.seen_any {
            self.min_cycles = cycles;
            self.seen_any = true;
        }
        self.stack.push(site);
        self.events.push((true, site, cycles, cpu));
    }

    fn on_exit(&mut self, cycles: u64, cpu: u32) {
        let Some(site) = self.stack.pop() else { return };
        self.events.push((false, site, cycles, cpu));
    }
}

/// Serialize `trace` as a Chrome Tracing event array.
///
/// `ts` is microseconds from the first event, converted through the
/// trace's cycle calibration (counter ticks are taken as nanoseconds
/// when no calibration is available).
pub fn write_chrome_trace(trace: &Trace, writer: impl Write) -> std::io::Result<()> {
    let mut collector = Collector {
        events: Vec::new(),
        stack: SmallVec::new(),
        min_cycles: 0,
        seen_any: false,
    };
    trace.visit(&mut collector);

    let seconds_per_cycle = trace.seconds_per_cycle().unwrap_or(1e-9);
    let min = collector.min_cycles;
    let events: Vec<ChromeEvent> = collector
        .events
        .iter()
        .map(|&(open, site, cycles, cpu)| ChromeEvent {
            name: site_display_name(site),
            cat: "PERF",
            ph: if open { "B" } else { "E" },
            pid: 0,
            tid: cpu,
            ts: cycles.saturating_sub(min) as f64 * seconds_per_cycle * 1e6,
        })
        .collect();

    serde_json::to_writer(writer, &events)?;
    Ok(())
}

/// Write a Chrome trace to `path`. Silently returns when the file
/// cannot be created.
pub fn write_chrome_trace_file(trace: &Trace, path: impl AsRef<Path>) {
    let Ok(file) = std::fs::File::create(path) else {
        return;
    };
    let _ = write_chrome_trace(trace, std::io::BufWriter::new(file));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::trace::TraceBuilder;

    static SITE: Site = Site::new("src/c.rs", "c::step", "step", 4);

    #[test]
    fn begin_end_pairs_share_a_name() {
        let mut b = TraceBuilder::new("chrome");
        b.add_enter(&SITE, 1000, 2).add_exit(3000, 2);
        let mut out = Vec::new();
        write_chrome_trace(&b.finish(), &mut out).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let events = json.as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["ph"], "B");
        assert_eq!(events[1]["ph"], "E");
        assert_eq!(events[0]["name"], "step");
        assert_eq!(events[1]["name"], "step");
        assert_eq!(events[0]["cat"], "PERF");
        assert_eq!(events[0]["pid"], 0);
        assert_eq!(events[0]["tid"], 2);
        assert_eq!(events[0]["ts"], 0.0);
        // 2000 ticks at the 1 ns/tick fallback = 2 us
        assert_eq!(events[1]["ts"], 2.0);
    }

    #[test]
    fn output_is_a_well_formed_array() {
        let mut b = TraceBuilder::new("chrome2");
        for i in 0..10u64 {
            b.add_enter(&SITE, i * 10, 0).add_exit(i * 10 + 5, 0);
        }
        let mut out = Vec::new();
        write_chrome_trace(&b.finish(), &mut out).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 20);
    }
}
