//! Plain-text rendering of profiler results.

use crate::profiling::{FrameResults, SpanResults};
use std::fmt::{self, Write};
use std::time::Duration;

/// Writes one frame's profiling report, one indented line per value:
///
/// ```text
/// Frame 240
///   CPU time: 1302.426 µs
///   Group render
///     CPU time: 1203.705 µs
///     GPU Queries:
///       clear: 153.600 µs
///       draw: 94.208 µs
/// ```
pub fn write_frame_results(out: &mut impl Write, results: &FrameResults) -> fmt::Result {
    write_span(out, results, &results.root, 0)
}

fn write_span(
    out: &mut impl Write,
    results: &FrameResults,
    span: &SpanResults,
    depth: usize,
) -> fmt::Result {
    let nesting = "  ".repeat(depth + 1);

    if depth == 0 {
        writeln!(out, "Frame {}", results.tag)?;
    } else {
        writeln!(out, "{}Group {}", "  ".repeat(depth), span.label)?;
    }

    writeln!(out, "{nesting}CPU time: {}", format_duration(span.cpu_time()))?;
    if !span.queries.is_empty() {
        writeln!(out, "{nesting}GPU Queries:")?;
        for query in &span.queries {
            writeln!(
                out,
                "{nesting}  {}: {}",
                query.label,
                format_duration(query.gpu_time()),
            )?;
        }
    }
    for child in &span.children {
        write_span(out, results, child, depth + 1)?;
    }

    Ok(())
}

fn format_duration(duration: Duration) -> String {
    format!("{:.3} µs", duration.as_nanos() as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiling::QueryResults;
    use std::time::Instant;

    #[test]
    fn renders_the_expected_layout() {
        let start = Instant::now();
        let at = |micros| start + Duration::from_micros(micros);

        let results = FrameResults {
            tag: 240,
            root: SpanResults {
                label: "frame",
                cpu_start: at(0),
                cpu_end: at(1500),
                queries: vec![],
                children: vec![SpanResults {
                    label: "render",
                    cpu_start: at(100),
                    cpu_end: at(1400),
                    queries: vec![
                        QueryResults {
                            label: "clear",
                            start_ns: 0,
                            end_ns: 153_600,
                        },
                        QueryResults {
                            label: "draw",
                            start_ns: 153_600,
                            end_ns: 247_808,
                        },
                    ],
                    children: vec![SpanResults {
                        label: "submit",
                        cpu_start: at(1300),
                        cpu_end: at(1400),
                        queries: vec![],
                        children: vec![],
                    }],
                }],
            },
        };

        let mut report = String::new();
        write_frame_results(&mut report, &results).unwrap();
        assert_eq!(
            report,
            "Frame 240\n\
             \x20 CPU time: 1500.000 µs\n\
             \x20 Group render\n\
             \x20   CPU time: 1300.000 µs\n\
             \x20   GPU Queries:\n\
             \x20     clear: 153.600 µs\n\
             \x20     draw: 94.208 µs\n\
             \x20   Group submit\n\
             \x20     CPU time: 100.000 µs\n",
        );
    }
}
