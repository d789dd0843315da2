//! Adaptive-repetition micro-benchmarking with percentile-robust
//! reporting.
//!
//! The driver probes the callable once to gauge its cost, picks a
//! repetition schedule from that probe, times the runs in both cycles
//! and wall-clock seconds, and reports per-sample figures net of a
//! measured rehydrate+sink baseline.
//!
//! Inputs are rehydrated from volatile storage each run and outputs are
//! drained into volatile storage, so the optimizer can neither hoist
//! the work out of the loop nor delete it:
//!
//! ```
//! use cycletrace::bench::{benchmark_with, Source};
//!
//! let results = benchmark_with(|x: u64| x.rotate_left(7) ^ 0x5bd1e995, 99u64);
//! results.print_summary("rotate: ");
//!
//! // manual barriers for closures with captured state
//! let base = Source::new(3.0f64);
//! let results = cycletrace::bench::benchmark(|| base.get() * base.get());
//! assert!(results.cycles_per_sample(0.0) >= 0.0);
//! ```

use crate::tracer::cycles;
use crate::tracer::export::format_seconds;
use std::cell::Cell;
use std::mem::MaybeUninit;
use std::ptr;
use std::time::Instant;

/// A value the optimizer must re-read every run.
///
/// Reads go through `read_volatile`, so hoisting or constant-folding
/// the value across runs is not allowed.
pub struct Source<T: Copy> {
    slot: Cell<T>,
}

impl<T: Copy> Source<T> {
    pub fn new(value: T) -> Source<T> {
        Source {
            slot: Cell::new(value),
        }
    }

    /// Rehydrate the value.
    #[inline(always)]
    pub fn get(&self) -> T {
        // SAFETY: the cell always holds a valid T and nothing aliases it
        // mutably while we read.
        unsafe { ptr::read_volatile(self.slot.as_ptr()) }
    }

    pub fn set(&self, value: T) {
        self.slot.set(value);
    }
}

/// An output the optimizer must consider used.
///
/// Implementations drain the value into volatile storage. Compose your
/// own types by draining their parts:
///
/// ```
/// use cycletrace::bench::SinkValue;
///
/// struct Vec3 { x: f32, y: f32, z: f32 }
/// impl SinkValue for Vec3 {
///     fn drain(self) {
///         self.x.drain();
///         self.y.drain();
///         self.z.drain();
///     }
/// }
/// ```
pub trait SinkValue {
    fn drain(self);
}

/// Drain a value into volatile storage.
#[inline(always)]
pub fn sink<T: SinkValue>(value: T) {
    value.drain();
}

macro_rules! impl_sink_for_copy {
    ($($ty:ty),* $(,)?) => {
        $(impl SinkValue for $ty {
            #[inline(always)]
            fn drain(self) {
                let mut slot = MaybeUninit::<$ty>::uninit();
                // SAFETY: writing a plain-old-data value to a live,
                // properly aligned stack slot.
                unsafe { ptr::write_volatile(slot.as_mut_ptr(), self) };
            }
        })*
    };
}

impl_sink_for_copy!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
);

impl<A: SinkValue, B: SinkValue> SinkValue for (A, B) {
    #[inline(always)]
    fn drain(self) {
        self.0.drain();
        self.1.drain();
    }
}

impl<A: SinkValue, B: SinkValue, C: SinkValue> SinkValue for (A, B, C) {
    #[inline(always)]
    fn drain(self) {
        self.0.drain();
        self.1.drain();
        self.2.drain();
    }
}

impl<T: SinkValue, const N: usize> SinkValue for [T; N] {
    #[inline(always)]
    fn drain(self) {
        for v in self {
            v.drain();
        }
    }
}

/// One timed cluster of runs.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub samples: u32,
    pub cycles: u64,
    pub seconds: f64,
}

/// Everything a benchmark run measured.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkResults {
    pub experiments: Vec<Timing>,
    pub warmups: Vec<Timing>,
    pub baselines: Vec<Timing>,
}

// schedule thresholds, in probe cycles
const EXTRA_LONG_CYCLES: u64 = 100_000_000;
const LONG_CYCLES: u64 = 1_000_000;
const MEDIUM_CYCLES: u64 = 10_000;
const SHORT_CYCLES: u64 = 500;

const PROBE_COUNT: usize = 3;
const LONG_RUNS: usize = 5;
const MEDIUM_RUNS: usize = 5;
const MEDIUM_CLUSTER: u32 = 5;
const SHORT_RUNS: usize = 10;
const SHORT_CLUSTER: u32 = 100;
const VERY_SHORT_RUNS: usize = 10;
const VERY_SHORT_CLUSTER: u32 = 1000;
const BASELINE_RUNS: usize = 10;
const BASELINE_CLUSTER: u32 = 1000;

fn time_runs(f: &mut impl FnMut(), count: u32) -> Timing {
    let t_start = Instant::now();
    let c_start = cycles::counter();
    for _ in 0..count {
        f();
    }
    let c_end = cycles::counter();
    Timing {
        samples: count,
        cycles: c_end.wrapping_sub(c_start),
        seconds: t_start.elapsed().as_secs_f64(),
    }
}

fn run_schedule(mut execute: impl FnMut(), mut baseline: impl FnMut()) -> BenchmarkResults {
    let mut res = BenchmarkResults::default();

    // gauge the cost with single runs; the fastest probe decides
    let mut probe = time_runs(&mut execute, 1);
    res.warmups.push(probe);
    for _ in 1..PROBE_COUNT {
        let t = time_runs(&mut execute, 1);
        if t.cycles < probe.cycles {
            probe = t;
        }
        res.warmups.push(t);
    }

    if probe.cycles > EXTRA_LONG_CYCLES {
        // too expensive to repeat
        res.experiments.push(probe);
    } else if probe.cycles > LONG_CYCLES {
        res.experiments.push(probe);
        for _ in 0..LONG_RUNS {
            res.experiments.push(time_runs(&mut execute, 1));
        }
    } else if probe.cycles > MEDIUM_CYCLES {
        for _ in 0..MEDIUM_RUNS {
            res.experiments.push(time_runs(&mut execute, MEDIUM_CLUSTER));
        }
    } else if probe.cycles > SHORT_CYCLES {
        for _ in 0..SHORT_RUNS {
            res.experiments.push(time_runs(&mut execute, SHORT_CLUSTER));
        }
    } else {
        for _ in 0..VERY_SHORT_RUNS {
            res.experiments
                .push(time_runs(&mut execute, VERY_SHORT_CLUSTER));
        }
    }

    for _ in 0..BASELINE_RUNS {
        res.baselines.push(time_runs(&mut baseline, BASELINE_CLUSTER));
    }

    res
}

/// Benchmark a callable. The result value is drained through [`sink`];
/// read captured inputs through [`Source`] to keep the optimizer
/// honest.
pub fn benchmark<R>(mut f: impl FnMut() -> R) -> BenchmarkResults
where
    R: SinkValue + Default,
{
    run_schedule(|| sink(f()), || sink(R::default()))
}

/// Benchmark a single-argument callable. The argument is rehydrated
/// from volatile storage before every run; pass a tuple to feed more
/// than one value.
pub fn benchmark_with<A, R>(mut f: impl FnMut(A) -> R, arg: A) -> BenchmarkResults
where
    A: Copy,
    R: SinkValue + Default,
{
    let source = Source::new(arg);
    run_schedule(
        || sink(f(source.get())),
        || {
            let _ = source.get();
            sink(R::default());
        },
    )
}

impl BenchmarkResults {
    /// Seconds per sample of the `ceil(n*percentile)`-th fastest
    /// experiment (clamped; percentile 0 is the fastest). Negative when
    /// nothing was measured.
    pub fn seconds_per_sample(&self, percentile: f64) -> f64 {
        if self.experiments.is_empty() {
            return -1.0;
        }
        let t = self.nth_by(percentile, |a, b| a.seconds.total_cmp(&b.seconds));
        t.seconds / t.samples as f64
    }

    /// Cycles per sample of the `ceil(n*percentile)`-th fastest
    /// experiment. Negative when nothing was measured.
    pub fn cycles_per_sample(&self, percentile: f64) -> f64 {
        if self.experiments.is_empty() {
            return -1.0;
        }
        let t = self.nth_by(percentile, |a, b| a.cycles.cmp(&b.cycles));
        t.cycles as f64 / t.samples as f64
    }

    fn nth_by(
        &self,
        percentile: f64,
        mut cmp: impl FnMut(&Timing, &Timing) -> std::cmp::Ordering,
    ) -> Timing {
        let n = ((self.experiments.len() as f64 * percentile).ceil() as usize)
            .min(self.experiments.len() - 1);
        let mut sorted: Vec<Timing> = self.experiments.clone();
        sorted.select_nth_unstable_by(n, &mut cmp);
        sorted[n]
    }

    /// Seconds per sample of the fastest baseline cluster; 0 when no
    /// baseline was measured.
    pub fn baseline_seconds_per_sample(&self) -> f64 {
        self.baselines
            .iter()
            .min_by(|a, b| a.seconds.total_cmp(&b.seconds))
            .map(|t| t.seconds / t.samples as f64)
            .unwrap_or(0.0)
    }

    /// Cycles per sample of the fastest baseline cluster; 0 when no
    /// baseline was measured.
    pub fn baseline_cycles_per_sample(&self) -> f64 {
        self.baselines
            .iter()
            .min_by_key(|t| t.cycles)
            .map(|t| t.cycles as f64 / t.samples as f64)
            .unwrap_or(0.0)
    }

    /// Print the min-to-70th-percentile band, baseline-corrected on the
    /// fast end.
    pub fn print_summary(&self, prefix: &str) {
        let sps_min = (self.seconds_per_sample(0.0) - self.baseline_seconds_per_sample()).max(0.0);
        let cps_min = (self.cycles_per_sample(0.0) - self.baseline_cycles_per_sample()).max(0.0);
        let sps_p70 = self.seconds_per_sample(0.7);
        let cps_p70 = self.cycles_per_sample(0.7);
        println!(
            "{prefix}{} .. {} / sample, {cps_min:.0} .. {cps_p70:.0} cycles / sample",
            format_seconds(sps_min),
            format_seconds(sps_p70),
        );
    }

    /// Print every timing: experiments, warmups, baselines.
    pub fn print_all(&self, prefix: &str) {
        let print = |t: &Timing| {
            println!(
                "{prefix}  {} cycles, {}, {} sample(s)",
                t.cycles,
                format_seconds(t.seconds),
                t.samples
            );
        };
        println!("{prefix}experiments:");
        self.experiments.iter().for_each(print);
        println!("{prefix}warmup:");
        self.warmups.iter().for_each(print);
        if !self.baselines.is_empty() {
            println!("{prefix}baseline:");
            self.baselines.iter().for_each(print);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic(cycles: &[u64]) -> BenchmarkResults {
        BenchmarkResults {
            experiments: cycles
                .iter()
                .map(|&c| Timing {
                    samples: 10,
                    cycles: c,
                    seconds: c as f64 * 1e-9,
                })
                .collect(),
            warmups: Vec::new(),
            baselines: Vec::new(),
        }
    }

    #[test]
    fn percentile_zero_is_the_fastest_experiment() {
        let res = synthetic(&[500, 100, 900, 300]);
        assert_eq!(res.cycles_per_sample(0.0), 10.0);
    }

    #[test]
    fn percentile_selects_the_ceil_nth_smallest() {
        let res = synthetic(&[500, 100, 900, 300]);
        // ceil(4 * 0.5) = 2 -> third smallest (0-indexed), 500 cycles
        assert_eq!(res.cycles_per_sample(0.5), 50.0);
        // clamped to the largest
        assert_eq!(res.cycles_per_sample(1.0), 90.0);
    }

    #[test]
    fn empty_results_report_negative() {
        let res = BenchmarkResults::default();
        assert!(res.cycles_per_sample(0.0) < 0.0);
        assert!(res.seconds_per_sample(0.0) < 0.0);
        assert_eq!(res.baseline_cycles_per_sample(), 0.0);
    }

    #[test]
    fn benchmark_runs_and_measures_something() {
        let res = benchmark_with(
            |x: u64| {
                let mut acc = x;
                for i in 0..64u64 {
                    acc = acc.wrapping_mul(6364136223846793005).wrapping_add(i);
                }
                acc
            },
            42u64,
        );
        assert!(!res.experiments.is_empty());
        assert_eq!(res.warmups.len(), 3);
        assert_eq!(res.baselines.len(), BASELINE_RUNS);
        assert!(res.cycles_per_sample(0.0) > 0.0);
        assert!(res.seconds_per_sample(0.7) >= res.seconds_per_sample(0.0));
    }

    #[test]
    fn void_results_are_supported() {
        let counter = std::cell::Cell::new(0u64);
        let res = benchmark(|| {
            counter.set(counter.get() + 1);
        });
        assert!(!res.experiments.is_empty());
        assert!(counter.get() > 0);
    }

    #[test]
    fn source_rehydrates_updates() {
        let src = Source::new(1u32);
        assert_eq!(src.get(), 1);
        src.set(5);
        assert_eq!(src.get(), 5);
    }
}
