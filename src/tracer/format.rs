//! Binary event-stream encoding.
//!
//! ## Chunk word layout
//! ```text
//! Records are sequences of little-endian 32-bit words, discriminated
//! by their first word:
//!
//!   entry (5 words):  [ptr_lo] [ptr_hi] [cc_lo] [cc_hi] [cpu]
//!   exit  (4 words):  [0xFFFF_FFFF] [cc_lo] [cc_hi] [cpu]
//!   0x0000_0000:      end of stream (rest of the buffer is unused)
//! ```
//!
//! `ptr_lo | ptr_hi << 32` is the address of a [`Site`]; `cc_lo |
//! cc_hi << 32` is the 64-bit cycle counter; `cpu` is the core the
//! record was made on. The exit sentinel works because no valid site
//! address has `0xFFFF_FFFF` in its low half on supported platforms.
//! A zero first word marks the end of useful data in a snapshot taken
//! mid-execution.

use crate::tracer::site::Site;

/// First word of an exit record.
pub const END_SENTINEL: u32 = 0xFFFF_FFFF;

/// Words in an entry record.
pub const ENTER_WORDS: usize = 5;

/// Words in an exit record.
pub const EXIT_WORDS: usize = 4;

/// Upper bound the recorder reserves at the end of every chunk so the
/// largest record sequence written without a bounds check never
/// overruns.
pub const MAX_RECORD_WORDS: usize = ENTER_WORDS + EXIT_WORDS;

/// Callbacks driven by the decoder, in stream order.
///
/// Entries and exits arrive strictly nested per thread, but a snapshot
/// of a running thread may end with unmatched entries, and a stream may
/// open with exits whose entries predate it.
pub trait TraceVisitor {
    fn on_enter(&mut self, site: &'static Site, cycles: u64, cpu: u32);
    fn on_exit(&mut self, cycles: u64, cpu: u32);
}

/// Append an entry record for `site`.
pub(crate) fn push_enter(out: &mut Vec<u32>, site: &'static Site, cycles: u64, cpu: u32) {
    let addr = site.addr();
    out.push(addr as u32);
    out.push((addr >> 32) as u32);
    out.push(cycles as u32);
    out.push((cycles >> 32) as u32);
    out.push(cpu);
}

/// Append an exit record.
pub(crate) fn push_exit(out: &mut Vec<u32>, cycles: u64, cpu: u32) {
    out.push(END_SENTINEL);
    out.push(cycles as u32);
    out.push((cycles >> 32) as u32);
    out.push(cpu);
}

/// Decode `data`, calling the visitor for every complete record.
///
/// Stops at a zero first word or when the remaining words cannot hold a
/// complete record.
///
/// Callers must guarantee that every non-sentinel first word is the low
/// half of a live `&'static Site` address (which is why this function
/// is crate-private; the safe public surface is
/// [`Trace::visit`](crate::tracer::trace::Trace::visit), whose data can
/// only come from this process's recorder or builder).
pub(crate) fn visit_words<V: TraceVisitor>(data: &[u32], visitor: &mut V) {
    let mut idx = 0usize;
    loop {
        let Some(&first) = data.get(idx) else { return };
        if first == 0 {
            return;
        }
        if first != END_SENTINEL {
            if idx + ENTER_WORDS > data.len() {
                return;
            }
            let addr = (data[idx + 1] as u64) << 32 | first as u64;
            let cycles = (data[idx + 3] as u64) << 32 | data[idx + 2] as u64;
            let cpu = data[idx + 4];
            // SAFETY: guaranteed by the caller contract above; sites are
            // 'static, so the reference never dangles.
            let site = unsafe { &*(addr as usize as *const Site) };
            visitor.on_enter(site, cycles, cpu);
            idx += ENTER_WORDS;
        } else {
            if idx + EXIT_WORDS > data.len() {
                return;
            }
            let cycles = (data[idx + 2] as u64) << 32 | data[idx + 1] as u64;
            let cpu = data[idx + 3];
            visitor.on_exit(cycles, cpu);
            idx += EXIT_WORDS;
        }
    }
}
