//! Shape checks on the exported Speedscope, Chrome and CSV files.

use cycletrace::export::{
    write_chrome_trace_file, write_speedscope, write_speedscope_file, write_summary_csv,
    SpeedscopeOptions,
};
use cycletrace::{Site, Trace, TraceBuilder};
use tempfile::TempDir;

static RENDER: Site = Site::new("src/render.rs", "render::frame", "frame", 12);
static SHADE: Site = Site::new("src/render.rs", "render::shade", "", 40);

/// frame { shade } frame { shade shade }
fn sample_trace() -> Trace {
    let mut b = TraceBuilder::new("render");
    b.add_enter(&RENDER, 100, 0)
        .add_enter(&SHADE, 120, 0)
        .add_exit(180, 0)
        .add_exit(200, 0)
        .add_enter(&RENDER, 300, 1)
        .add_enter(&SHADE, 310, 1)
        .add_exit(330, 1)
        .add_enter(&SHADE, 340, 1)
        .add_exit(390, 1)
        .add_exit(400, 1);
    b.finish()
}

#[test]
fn speedscope_file_structure() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.speedscope.json");
    write_speedscope_file(&sample_trace(), &path);

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["version"], "0.0.1");
    assert_eq!(
        json["$schema"],
        "https://www.speedscope.app/file-format-schema.json"
    );

    let frames = json["shared"]["frames"].as_array().unwrap();
    assert_eq!(frames.len(), 2, "one frame per distinct site");
    assert_eq!(frames[0]["name"], "frame");
    assert_eq!(frames[0]["file"], "src/render.rs");
    assert_eq!(frames[0]["line"], 12);
    assert_eq!(frames[1]["name"], "render::shade", "label fallback");

    let profile = &json["profiles"][0];
    assert_eq!(profile["type"], "evented");
    assert_eq!(profile["name"], "render");
    assert_eq!(profile["unit"], "none");
    assert_eq!(profile["startValue"], 0.0);
    assert_eq!(profile["endValue"], 300.0);

    let events = profile["events"].as_array().unwrap();
    assert_eq!(events.len(), 10);
    let opens = events.iter().filter(|e| e["type"] == "O").count();
    let closes = events.iter().filter(|e| e["type"] == "C").count();
    assert_eq!(opens, closes);
    // at-values are relative to the trace minimum and non-decreasing
    let mut last = -1.0f64;
    for e in events {
        let at = e["at"].as_f64().unwrap();
        assert!(at >= last);
        last = at;
    }
    assert_eq!(events[0]["at"], 0.0);
}

#[test]
fn speedscope_cap_refuses_and_leaves_no_content() {
    let mut out = Vec::new();
    write_speedscope(
        &sample_trace(),
        &mut out,
        SpeedscopeOptions { max_events: 5 },
    )
    .unwrap();
    assert!(out.is_empty(), "over-cap export must not write");
}

#[test]
fn chrome_trace_pairs_and_cpu_lanes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("chrome.json");
    write_chrome_trace_file(&sample_trace(), &path);

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let events = json.as_array().unwrap();
    assert_eq!(events.len(), 10);

    let begins = events.iter().filter(|e| e["ph"] == "B").count();
    let ends = events.iter().filter(|e| e["ph"] == "E").count();
    assert_eq!(begins, ends);
    for e in events {
        assert_eq!(e["cat"], "PERF");
        assert_eq!(e["pid"], 0);
        let tid = e["tid"].as_u64().unwrap();
        assert!(tid == 0 || tid == 1, "tid is the recording cpu");
        assert!(e["ts"].as_f64().unwrap() >= 0.0);
    }
    // the second frame ran on cpu 1
    assert_eq!(events[4]["tid"], 1);
}

#[test]
fn csv_summary_rows() {
    let mut out = Vec::new();
    write_summary_csv(&sample_trace(), &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(
        lines[0],
        "name,file,function,count,total,avg,min,max,total_body,avg_body"
    );
    assert_eq!(lines.len(), 3, "header plus one row per site");

    // frame: two calls of 100 cycles each; children 60 and 70
    let frame_row = lines.iter().find(|l| l.starts_with("\"frame\"")).unwrap();
    assert_eq!(
        *frame_row,
        "\"frame\",\"src/render.rs:12\",\"render::frame\",2,200,100,100,100,70,35"
    );

    // shade: 60 + 20 + 50 cycles over three calls, no children
    let shade_row = lines.iter().find(|l| l.starts_with("\"\"")).unwrap();
    assert_eq!(
        *shade_row,
        "\"\",\"src/render.rs:40\",\"render::shade\",3,130,43,20,60,130,43"
    );
}

#[test]
fn file_helpers_swallow_unwritable_paths() {
    let trace = sample_trace();
    // a directory that does not exist; nothing panics, nothing is written
    write_speedscope_file(&trace, "/nonexistent-cycletrace/dir/a.json");
    write_chrome_trace_file(&trace, "/nonexistent-cycletrace/dir/b.json");
    cycletrace::export::write_summary_csv_file(&trace, "/nonexistent-cycletrace/dir/c.csv");
}
