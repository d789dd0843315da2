//! Immutable trace snapshots and their derived views.

use crate::tracer::format::{self, TraceVisitor};
use crate::tracer::site::Site;
use serde::Serialize;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::time::Instant;

/// One recorded entry or exit.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Event {
    pub site: &'static Site,
    pub cycles: u64,
    pub cpu: u32,
    pub enter: bool,
}

/// A matched entry/exit pair.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EventScope {
    pub site: &'static Site,
    pub start_cycles: u64,
    pub end_cycles: u64,
    pub start_cpu: u32,
    pub end_cpu: u32,
}

impl EventScope {
    pub fn cycles(&self) -> u64 {
        self.end_cycles.saturating_sub(self.start_cycles)
    }
}

/// Aggregate over every matched pair of one site.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SiteStats {
    pub site: &'static Site,
    pub samples: u64,
    pub total_cycles: u64,
}

/// An immutable snapshot of a scope's flattened event stream plus its
/// wall-clock and cycle stamps.
///
/// Snapshots taken while the owning thread was mid-call may hold
/// unmatched entries; every derived view tolerates that silently.
#[derive(Debug, Clone)]
pub struct Trace {
    name: String,
    data: Vec<u32>,
    time_start: Instant,
    time_end: Instant,
    cycles_start: u64,
    cycles_end: u64,
}

impl Trace {
    pub(crate) fn from_parts(
        name: String,
        data: Vec<u32>,
        time_start: Instant,
        time_end: Instant,
        cycles_start: u64,
        cycles_end: u64,
    ) -> Trace {
        Trace {
            name,
            data,
            time_start,
            time_end,
            cycles_start,
            cycles_end,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw event-stream words (see the layout in the crate docs).
    pub fn data(&self) -> &[u32] {
        &self.data
    }

    pub fn cycles_start(&self) -> u64 {
        self.cycles_start
    }

    pub fn cycles_end(&self) -> u64 {
        self.cycles_end
    }

    pub fn elapsed_cycles(&self) -> u64 {
        self.cycles_end.saturating_sub(self.cycles_start)
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.time_end.duration_since(self.time_start).as_secs_f64()
    }

    /// Wall-clock seconds per counter tick, when this trace carries a
    /// usable calibration.
    pub fn seconds_per_cycle(&self) -> Option<f64> {
        let cycles = self.elapsed_cycles();
        let seconds = self.elapsed_seconds();
        if cycles > 0 && seconds > 0.0 {
            Some(seconds / cycles as f64)
        } else {
            None
        }
    }

    /// Drive `visitor` over every record in stream order.
    pub fn visit<V: TraceVisitor>(&self, visitor: &mut V) {
        format::visit_words(&self.data, visitor);
    }

    /// Replay the stream into a flat event list.
    pub fn compute_events(&self) -> Vec<Event> {
        struct Events {
            events: Vec<Event>,
            open: SmallVec<[&'static Site; 16]>,
        }
        impl TraceVisitor for Events {
            fn on_enter(&mut self, site: &'static Site, cycles: u64, cpu: u32) {
                self.open.push(site);
                self.events.push(Event {
                    site,
                    cycles,
                    cpu,
                    enter: true,
                });
            }
            fn on_exit(&mut self, cycles: u64, cpu: u32) {
                // an exit whose entry predates the snapshot has no site
                // to report; skip it
                let Some(site) = self.open.pop() else { return };
                self.events.push(Event {
                    site,
                    cycles,
                    cpu,
                    enter: false,
                });
            }
        }

        let mut v = Events {
            events: Vec::new(),
            open: SmallVec::new(),
        };
        self.visit(&mut v);
        v.events
    }

    /// Pair entries with exits, in post-order (a scope appears after
    /// every scope nested inside it). Pairs still open at the end of
    /// the stream are dropped.
    pub fn compute_event_scopes(&self) -> Vec<EventScope> {
        struct Scopes {
            out: Vec<EventScope>,
            open: SmallVec<[(&'static Site, u64, u32); 16]>,
        }
        impl TraceVisitor for Scopes {
            fn on_enter(&mut self, site: &'static Site, cycles: u64, cpu: u32) {
                self.open.push((site, cycles, cpu));
            }
            fn on_exit(&mut self, cycles: u64, cpu: u32) {
                let Some((site, start_cycles, start_cpu)) = self.open.pop() else {
                    return;
                };
                self.out.push(EventScope {
                    site,
                    start_cycles,
                    end_cycles: cycles,
                    start_cpu,
                    end_cpu: cpu,
                });
            }
        }

        let mut v = Scopes {
            out: Vec::new(),
            open: SmallVec::new(),
        };
        self.visit(&mut v);
        v.out
    }

    /// Per-site totals over all matched pairs, sorted by total cycles
    /// descending.
    pub fn compute_site_stats(&self) -> Vec<SiteStats> {
        let mut by_site: HashMap<*const Site, SiteStats> = HashMap::new();
        for scope in self.compute_event_scopes() {
            let entry = by_site.entry(scope.site).or_insert(SiteStats {
                site: scope.site,
                samples: 0,
                total_cycles: 0,
            });
            entry.samples += 1;
            entry.total_cycles += scope.cycles();
        }
        let mut stats: Vec<SiteStats> = by_site.into_values().collect();
        stats.sort_unstable_by(|a, b| {
            b.total_cycles
                .cmp(&a.total_cycles)
                .then(b.samples.cmp(&a.samples))
                .then(a.site.line.cmp(&b.site.line))
        });
        stats
    }

    /// Re-emit only the entry/exit pairs whose entering site, or any
    /// ancestor still open at that point, satisfies `predicate`. The
    /// stamps are carried over unchanged.
    pub fn filter_subscope(&self, mut predicate: impl FnMut(&'static Site) -> bool) -> Trace {
        struct Filter<'p, P> {
            predicate: &'p mut P,
            out: Vec<u32>,
            matched: SmallVec<[bool; 16]>,
            active: usize,
        }
        impl<P: FnMut(&'static Site) -> bool> TraceVisitor for Filter<'_, P> {
            fn on_enter(&mut self, site: &'static Site, cycles: u64, cpu: u32) {
                let hit = (self.predicate)(site);
                if hit {
                    self.active += 1;
                }
                self.matched.push(hit);
                if self.active > 0 {
                    format::push_enter(&mut self.out, site, cycles, cpu);
                }
            }
            fn on_exit(&mut self, cycles: u64, cpu: u32) {
                if self.active > 0 {
                    format::push_exit(&mut self.out, cycles, cpu);
                }
                if let Some(hit) = self.matched.pop() {
                    if hit {
                        self.active -= 1;
                    }
                }
            }
        }

        let mut v = Filter {
            predicate: &mut predicate,
            out: Vec::new(),
            matched: SmallVec::new(),
            active: 0,
        };
        self.visit(&mut v);
        Trace {
            name: self.name.clone(),
            data: v.out,
            time_start: self.time_start,
            time_end: self.time_end,
            cycles_start: self.cycles_start,
            cycles_end: self.cycles_end,
        }
    }

    /// Re-emit with every CPU field replaced by `cpu`. Sites and cycle
    /// values are unchanged.
    pub fn remap_cpu(&self, cpu: u32) -> Trace {
        struct Remap {
            cpu: u32,
            out: Vec<u32>,
        }
        impl TraceVisitor for Remap {
            fn on_enter(&mut self, site: &'static Site, cycles: u64, _cpu: u32) {
                format::push_enter(&mut self.out, site, cycles, self.cpu);
            }
            fn on_exit(&mut self, cycles: u64, _cpu: u32) {
                format::push_exit(&mut self.out, cycles, self.cpu);
            }
        }

        let mut v = Remap {
            cpu,
            out: Vec::new(),
        };
        self.visit(&mut v);
        Trace {
            name: self.name.clone(),
            data: v.out,
            time_start: self.time_start,
            time_end: self.time_end,
            cycles_start: self.cycles_start,
            cycles_end: self.cycles_end,
        }
    }

    /// Print the heaviest sites to stdout, one line each, using the
    /// trace's cycle calibration when it has one.
    ///
    /// NOTE: totals of recursive sites count every level of the
    /// recursion.
    pub fn print_site_stats(&self, max_sites: usize) {
        let stats = self.compute_site_stats();
        println!("trace \"{}\": {} distinct sites", self.name, stats.len());
        let seconds_per_cycle = self.seconds_per_cycle();
        for s in stats.iter().take(max_sites) {
            let label = crate::tracer::export::site_display_name(s.site);
            match seconds_per_cycle {
                Some(ratio) => println!(
                    "  {label}: {} samples, {}",
                    s.samples,
                    crate::tracer::export::format_seconds(s.total_cycles as f64 * ratio)
                ),
                None => println!("  {label}: {} samples, {} cycles", s.samples, s.total_cycles),
            }
        }
    }
}

/// Assembles a synthetic [`Trace`] record by record. The counterpart of
/// the recorder for tests and tools that transform event streams.
pub struct TraceBuilder {
    name: String,
    data: Vec<u32>,
    min_cycles: u64,
    max_cycles: u64,
}

impl TraceBuilder {
    pub fn new(name: impl Into<String>) -> TraceBuilder {
        TraceBuilder {
            name: name.into(),
            data: Vec::new(),
            min_cycles: u64::MAX,
            max_cycles: 0,
        }
    }

    pub fn add_enter(&mut self, site: &'static Site, cycles: u64, cpu: u32) -> &mut Self {
        format::push_enter(&mut self.data, site, cycles, cpu);
        self.note(cycles);
        self
    }

    pub fn add_exit(&mut self, cycles: u64, cpu: u32) -> &mut Self {
        format::push_exit(&mut self.data, cycles, cpu);
        self.note(cycles);
        self
    }

    fn note(&mut self, cycles: u64) {
        self.min_cycles = self.min_cycles.min(cycles);
        self.max_cycles = self.max_cycles.max(cycles);
    }

    /// Finish into a trace whose cycle stamps span the recorded events.
    /// Builder traces carry no wall-clock calibration.
    pub fn finish(self) -> Trace {
        let now = Instant::now();
        let (cycles_start, cycles_end) = if self.data.is_empty() {
            (0, 0)
        } else {
            (self.min_cycles, self.max_cycles)
        };
        Trace {
            name: self.name,
            data: self.data,
            time_start: now,
            time_end: now,
            cycles_start,
            cycles_end,
        }
    }
}
