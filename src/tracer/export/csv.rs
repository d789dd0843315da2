//! Per-site CSV summary of a decoded trace.

use crate::tracer::format::TraceVisitor;
use crate::tracer::site::Site;
use crate::tracer::trace::Trace;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

#[derive(Default, Clone, Copy)]
struct Entry {
    count: u64,
    cycles_total: u64,
    cycles_children: u64,
    cycles_min: u64,
    cycles_max: u64,
}

struct Frame {
    site: &'static Site,
    start_cycles: u64,
    children: u64,
}

/// Accumulates per-site totals; child cycles are added to the parent's
/// open frame so `total_body = total - children` can be reported.
struct Collector {
    entries: HashMap<*const Site, Entry>,
    order: Vec<&'static Site>,
    stack: SmallVec<[Frame; 16]>,
}

impl TraceVisitor for Collector {
    fn on_enter(&mut self, site: &'static Site, cycles: u64, _cpu: u32) {
        self.stack.push(Frame {
            site,
            start_cycles: cycles,
            children: 0,
        });
    }

    fn on_exit(&mut self, cycles: u64, _cpu: u32) {
        let Some(frame) = self.stack.pop() else { return };
        let dt = cycles.saturating_sub(frame.start_cycles);

        let entry = self
            .entries
            .entry(frame.site as *const Site)
            .or_insert_with(|| {
                self.order.push(frame.site);
                Entry {
                    cycles_min: u64::MAX,
                    ..Entry::default()
                }
            });
        entry.count += 1;
        entry.cycles_total += dt;
        entry.cycles_children += frame.children;
        entry.cycles_min = entry.cycles_min.min(dt);
        entry.cycles_max = entry.cycles_max.max(dt);

        if let Some(parent) = self.stack.last_mut() {
            parent.children += dt;
        }
    }
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Write one row per site:
/// `name,file,function,count,total,avg,min,max,total_body,avg_body`,
/// cycle-valued columns as raw counter ticks.
pub fn write_summary_csv(trace: &Trace, mut writer: impl Write) -> std::io::Result<()> {
    let mut collector = Collector {
        entries: HashMap::new(),
        order: Vec::new(),
        stack: SmallVec::new(),
    };
    trace.visit(&mut collector);

    writeln!(
        writer,
        "name,file,function,count,total,avg,min,max,total_body,avg_body"
    )?;
    for site in &collector.order {
        let e = collector.entries[&(*site as *const Site)];
        let body = e.cycles_total.saturating_sub(e.cycles_children);
        writeln!(
            writer,
            "{},{},{},{},{},{},{},{},{},{}",
            quote(site.name),
            quote(&format!("{}:{}", site.file, site.line)),
            quote(site.function),
            e.count,
            e.cycles_total,
            e.cycles_total / e.count,
            e.cycles_min,
            e.cycles_max,
            body,
            body / e.count,
        )?;
    }
    Ok(())
}

/// Write the per-site summary to `path`. Silently returns when the
/// file cannot be created.
pub fn write_summary_csv_file(trace: &Trace, path: impl AsRef<Path>) {
    let Ok(file) = std::fs::File::create(path) else {
        return;
    };
    let _ = write_summary_csv(trace, std::io::BufWriter::new(file));
}
