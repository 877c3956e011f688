use super::{
    gpu_queries::GpuQueryError,
    span_tree::FinishedSpans,
};
use log::*;
use std::time::{Duration, Instant};

/// Fully-resolved profiling output for one frame: the span tree with CPU timings and
/// every GPU query populated. This is the only representation that leaves the
/// profiler, and it owns all of its data - nothing in here points back at per-frame
/// storage.
#[derive(Debug)]
pub struct FrameResults {
    pub tag: u64,
    pub root: SpanResults,
}

#[derive(Debug)]
pub struct SpanResults {
    pub label: &'static str,
    pub cpu_start: Instant,
    pub cpu_end: Instant,
    /// Resolved GPU queries attributed to this span. Empty when the span requested
    /// none, or when the frame's readback was lost.
    pub queries: Vec<QueryResults>,
    pub children: Vec<SpanResults>,
}

impl SpanResults {
    pub fn cpu_time(&self) -> Duration {
        self.cpu_end.duration_since(self.cpu_start)
    }
}

/// A resolved GPU timestamp pair, in nanoseconds of device time.
#[derive(Debug)]
pub struct QueryResults {
    pub label: &'static str,
    pub start_ns: u64,
    pub end_ns: u64,
}

impl QueryResults {
    pub fn gpu_time(&self) -> Duration {
        Duration::from_nanos(self.end_ns - self.start_ns)
    }
}

/// Merges a frame's raw GPU timestamps back into its finalized span tree, producing
/// the owned result handed to callers.
///
/// `ticks` is [`None`] when the frame's readback was lost; the result then carries CPU
/// timings only. Timestamps that fail validation (missing or non-monotonic pairs) are
/// demoted to the same CPU-only fallback instead of reporting corrupted numbers.
pub(crate) fn merge_results(
    tag: u64,
    finished: &FinishedSpans,
    mut ticks: Option<&[u64]>,
    timestamp_period: f32,
) -> FrameResults {
    if let Some(raw) = ticks {
        if let Err(error) = validate_ticks(finished, raw) {
            warn!("frame {tag}: {error}; reporting CPU timings only");
            ticks = None;
        }
    }

    FrameResults {
        tag,
        root: build_span(finished, 0, ticks, timestamp_period),
    }
}

fn validate_ticks(finished: &FinishedSpans, ticks: &[u64]) -> Result<(), GpuQueryError> {
    for span in &finished.spans {
        for request in &span.queries {
            let start = request.pair_index as usize;
            if start + 1 >= ticks.len() {
                return Err(GpuQueryError::MissingTimestamps);
            }
            if ticks[start + 1] < ticks[start] {
                return Err(GpuQueryError::OutOfOrderTimestamps);
            }
        }
    }
    Ok(())
}

fn build_span(
    finished: &FinishedSpans,
    index: u32,
    ticks: Option<&[u64]>,
    timestamp_period: f32,
) -> SpanResults {
    let record = &finished.spans[index as usize];
    SpanResults {
        label: record.label,
        cpu_start: record.cpu_start,
        cpu_end: record.cpu_end.expect("span was never closed"),
        queries: ticks
            .map(|ticks| {
                record
                    .queries
                    .iter()
                    .map(|request| QueryResults {
                        label: request.label,
                        start_ns: to_nanos(ticks[request.pair_index as usize], timestamp_period),
                        end_ns: to_nanos(ticks[request.pair_index as usize + 1], timestamp_period),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        children: record
            .children
            .iter()
            .map(|&child| build_span(finished, child, ticks, timestamp_period))
            .collect(),
    }
}

/// Raw timestamps are device-clock ticks; the conversion factor is the device-reported
/// tick period in nanoseconds.
fn to_nanos(ticks: u64, timestamp_period: f32) -> u64 {
    (ticks as f64 * timestamp_period as f64) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiling::span_tree::{QueryRequest, SpanTree};

    fn frame_with_two_queries() -> FinishedSpans {
        let mut tree = SpanTree::start();
        let span = tree.nest("render");
        tree.attach_query(QueryRequest {
            label: "draw",
            pair_index: 0,
        });
        tree.attach_query(QueryRequest {
            label: "clear",
            pair_index: 2,
        });
        tree.end(span);
        tree.finish()
    }

    #[test]
    fn merges_raw_ticks_into_nanoseconds() {
        let finished = frame_with_two_queries();
        let results = merge_results(5, &finished, Some(&[100, 200, 200, 350]), 1.0);

        assert_eq!(results.tag, 5);
        let render = &results.root.children[0];
        assert_eq!(render.label, "render");

        let draw = &render.queries[0];
        assert_eq!(draw.label, "draw");
        assert_eq!(draw.gpu_time(), Duration::from_nanos(100));

        let clear = &render.queries[1];
        assert_eq!(clear.label, "clear");
        assert_eq!(clear.gpu_time(), Duration::from_nanos(150));
    }

    #[test]
    fn applies_the_timestamp_period() {
        let finished = frame_with_two_queries();
        let results = merge_results(0, &finished, Some(&[100, 200, 200, 350]), 2.5);

        let render = &results.root.children[0];
        assert_eq!(render.queries[0].gpu_time(), Duration::from_nanos(250));
    }

    #[test]
    fn lost_readback_reports_cpu_only() {
        let finished = frame_with_two_queries();
        let results = merge_results(1, &finished, None, 1.0);

        let render = &results.root.children[0];
        assert!(render.queries.is_empty());
        assert!(render.cpu_time() <= results.root.cpu_time());
    }

    #[test]
    fn out_of_order_ticks_are_discarded() {
        let finished = frame_with_two_queries();
        let results = merge_results(2, &finished, Some(&[200, 100, 200, 350]), 1.0);
        assert!(results.root.children[0].queries.is_empty());
    }

    #[test]
    fn missing_ticks_are_discarded() {
        let finished = frame_with_two_queries();
        let results = merge_results(3, &finished, Some(&[100, 200]), 1.0);
        assert!(results.root.children[0].queries.is_empty());
    }
}
