//! Speedscope JSON (file format v0.0.1) over a decoded trace.
//!
//! See <https://github.com/jlfwong/speedscope/wiki/Importing-from-custom-sources>.

use crate::tracer::export::site_display_name;
use crate::tracer::format::TraceVisitor;
use crate::tracer::site::Site;
use crate::tracer::trace::Trace;
use serde::Serialize;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

/// Tuning knobs for [`write_speedscope`].
#[derive(Clone, Copy)]
pub struct SpeedscopeOptions {
    /// Refuse to write profiles with more events than this.
    pub max_events: usize,
}

impl Default for SpeedscopeOptions {
    fn default() -> Self {
        SpeedscopeOptions {
            max_events: 1_000_000,
        }
    }
}

#[derive(Serialize)]
struct Frame<'a> {
    name: Cow<'a, str>,
    file: &'a str,
    line: u32,
}

#[derive(Serialize)]
struct ProfileEvent {
    #[serde(rename = "type")]
    kind: &'static str,
    frame: usize,
    at: f64,
}

#[derive(Serialize)]
struct Profile<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'a str,
    unit: &'static str,
    #[serde(rename = "startValue")]
    start_value: f64,
    #[serde(rename = "endValue")]
    end_value: f64,
    events: Vec<ProfileEvent>,
}

#[derive(Serialize)]
struct SpeedscopeFile<'a> {
    #[serde(rename = "$schema")]
    schema: &'static str,
    version: &'static str,
    shared: Shared<'a>,
    profiles: Vec<Profile<'a>>,
}

#[derive(Serialize)]
struct Shared<'a> {
    frames: Vec<Frame<'a>>,
}

/// Interns frames and collects open/close events, closing anything
/// still open at the maximum observed cycle value.
#[derive(Default)]
struct Collector {
    frames: Vec<&'static Site>,
    frame_ids: HashMap<*const Site, usize>,
    events: Vec<(bool, usize, u64)>,
    stack: SmallVec<[usize; 16]>,
    min_cycles: u64,
    max_cycles: u64,
    seen_any: bool,
}

impl Collector {
    fn frame_of(&mut self, site: &'static Site) -> usize {
        *self.frame_ids.entry(site).or_insert_with(|| {
            self.frames.push(site);
            self.frames.len() - 1
        })
    }

    fn note(&mut self, cycles: u64) {
        if self.seen_any {
            self.min_cycles = self.min_cycles.min(cycles);
            self.max_cycles = self.max_cycles.max(cycles);
        } else {
            self.min_cycles = cycles;
            self.max_cycles = cycles;
            self.seen_any = true;
        }
    }

    fn close_pending(&mut self) {
        while let Some(frame) = self.stack.pop() {
            self.events.push((false, frame, self.max_cycles));
        }
    }
}

impl TraceVisitor for Collector {
    fn on_enter(&mut self, site: &'static Site, cycles: u64, _cpu: u32) {
        self.note(cycles);
        let frame = self.frame_of(site);
        self.events.push((true, frame, cycles));
        self.stack.push(frame);
    }

    fn on_exit(&mut self, cycles: u64, _cpu: u32) {
        self.note(cycles);
        let Some(frame) = self.stack.pop() else { return };
        self.events.push((false, frame, cycles));
    }
}

/// Serialize `trace` as an evented Speedscope profile.
///
/// `at` values are seconds when the trace carries a wall-clock
/// calibration, raw cycle deltas (unit `none`) otherwise. When the
/// event count exceeds [`SpeedscopeOptions::max_events`] nothing is
/// written and one line goes to stderr.
pub fn write_speedscope(
    trace: &Trace,
    writer: impl Write,
    options: SpeedscopeOptions,
) -> std::io::Result<()> {
    let mut collector = Collector::default();
    trace.visit(&mut collector);
    collector.close_pending();

    if collector.events.len() > options.max_events {
        eprintln!(
            "[cycletrace] not writing speedscope profile for \"{}\": {} events exceed the cap of {}",
            trace.name(),
            collector.events.len(),
            options.max_events
        );
        return Ok(());
    }

    let (unit, scale): (&'static str, f64) = match trace.seconds_per_cycle() {
        Some(ratio) => ("seconds", ratio),
        None => ("none", 1.0),
    };
    let min = collector.min_cycles;
    let events = collector
        .events
        .iter()
        .map(|&(open, frame, cycles)| ProfileEvent {
            kind: if open { "O" } else { "C" },
            frame,
            at: (cycles - min) as f64 * scale,
        })
        .collect();

    let file = SpeedscopeFile {
        schema: "https://www.speedscope.app/file-format-schema.json",
        version: "0.0.1",
        shared: Shared {
            frames: collector
                .frames
                .iter()
                .map(|site| Frame {
                    name: site_display_name(site),
                    file: site.file,
                    line: site.line,
                })
                .collect(),
        },
        profiles: vec![Profile {
            kind: "evented",
            name: trace.name(),
            unit,
            start_value: 0.0,
            end_value: (collector.max_cycles - min) as f64 * scale,
            events,
        }],
    };
    serde_json::to_writer(writer, &file)?;
    Ok(())
}

/// Write a Speedscope profile with default options to `path`. Silently
/// returns when the file cannot be created.
pub fn write_speedscope_file(trace: &Trace, path: impl AsRef<Path>) {
    let Ok(file) = std::fs::File::create(path) else {
        return;
    };
    let _ = write_speedscope(trace, std::io::BufWriter::new(file), SpeedscopeOptions::default());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::trace::TraceBuilder;

    static SITE_A: Site = Site::new("src/s.rs", "s::alpha", "alpha", 1);
    static SITE_B: Site = Site::new("src/s.rs", "s::beta", "", 2);

    fn sample_trace() -> Trace {
        let mut b = TraceBuilder::new("sample");
        b.add_enter(&SITE_A, 100, 0)
            .add_enter(&SITE_B, 110, 0)
            .add_exit(120, 0)
            .add_exit(140, 0);
        b.finish()
    }

    #[test]
    fn emits_one_frame_per_distinct_site() {
        let mut out = Vec::new();
        write_speedscope(&sample_trace(), &mut out, SpeedscopeOptions::default()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let frames = json["shared"]["frames"].as_array().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["name"], "alpha");
        // empty label falls back to the beautified function path
        assert_eq!(frames[1]["name"], "s::beta");
        assert_eq!(frames[1]["line"], 2);
    }

    #[test]
    fn events_are_zero_based_and_balanced() {
        let mut out = Vec::new();
        write_speedscope(&sample_trace(), &mut out, SpeedscopeOptions::default()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let profile = &json["profiles"][0];
        assert_eq!(profile["type"], "evented");
        assert_eq!(profile["startValue"], 0.0);
        assert_eq!(profile["endValue"], 40.0);
        let events = profile["events"].as_array().unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0]["type"], "O");
        assert_eq!(events[0]["at"], 0.0);
        assert_eq!(events[3]["type"], "C");
        assert_eq!(events[3]["at"], 40.0);
    }

    #[test]
    fn open_events_are_closed_at_max() {
        let mut b = TraceBuilder::new("open");
        b.add_enter(&SITE_A, 10, 0).add_enter(&SITE_B, 30, 0);
        let mut out = Vec::new();
        write_speedscope(&b.finish(), &mut out, SpeedscopeOptions::default()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let events = json["profiles"][0]["events"].as_array().unwrap();
        assert_eq!(events.len(), 4);
        // both synthesized closes land at the maximum observed value
        assert_eq!(events[2]["at"], 20.0);
        assert_eq!(events[3]["at"], 20.0);
    }

    #[test]
    fn cap_refuses_to_write() {
        let mut out = Vec::new();
        write_speedscope(&sample_trace(), &mut out, SpeedscopeOptions { max_events: 3 }).unwrap();
        assert!(out.is_empty());
    }
}
