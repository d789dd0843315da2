//! Cycle-counter reads (TSC on x86_64, CNTVCT on aarch64).
//!
//! [`timestamp`] additionally reports the id of the core the read was
//! made on. Counter values are raw ticks; they are monotonic per core
//! but not comparable across cores without calibration.

/// Read the cycle counter together with the current core id.
///
/// On x86_64 this is a single serialising `rdtscp`, which returns the
/// counter and `IA32_TSC_AUX` (the core id as initialised by the OS) in
/// one instruction. Elsewhere the counter and the core id are read
/// separately; targets without a hardware counter fall back to a
/// monotonic clock and core 0.
#[inline(always)]
pub fn timestamp() -> (u64, u32) {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: rdtscp is available on every x86_64 CPU this crate targets.
    unsafe {
        let mut aux: u32 = 0;
        let tsc = core::arch::x86_64::__rdtscp(&mut aux);
        (tsc, aux)
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        (counter(), current_cpu())
    }
}

/// Read the plain cycle counter. Single inline instruction on x86_64
/// (`rdtsc`) and aarch64 (`mrs cntvct_el0`).
#[inline(always)]
pub fn counter() -> u64 {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: rdtsc has no preconditions.
    unsafe {
        core::arch::x86_64::_rdtsc()
    }
    #[cfg(target_arch = "aarch64")]
    {
        let val: u64;
        // SAFETY: reading the virtual counter register has no side effects.
        unsafe { core::arch::asm!("mrs {}, cntvct_el0", out(reg) val) };
        val
    }
    // Fallback: nanoseconds of a monotonic clock against a private
    // epoch. Loses the cycle granularity but keeps every derived view
    // functional.
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        use std::sync::OnceLock;
        use std::time::Instant;
        static FALLBACK_EPOCH: OnceLock<Instant> = OnceLock::new();
        let epoch = FALLBACK_EPOCH.get_or_init(Instant::now);
        epoch.elapsed().as_nanos() as u64
    }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline]
fn current_cpu() -> u32 {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: sched_getcpu takes no arguments; a negative return is
        // mapped to core 0 below.
        let cpu = unsafe { libc::sched_getcpu() };
        if cpu < 0 {
            0
        } else {
            cpu as u32
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_advances() {
        let a = counter();
        let mut x = 0u64;
        for i in 0..10_000u64 {
            x = x.wrapping_add(i).rotate_left(7);
        }
        std::hint::black_box(x);
        let b = counter();
        assert!(b > a, "counter did not advance: {a} -> {b}");
    }

    #[test]
    fn timestamp_counter_is_consistent_with_counter() {
        let lo = counter();
        let (ts, _cpu) = timestamp();
        let hi = counter();
        assert!(lo <= ts && ts <= hi, "{lo} <= {ts} <= {hi}");
    }
}
