//! Hierarchical CPU + GPU frame profiler.
//!
//! Each frame is recorded as a tree of nested CPU spans, any of which may carry GPU
//! timestamp queries. CPU timings come from [`Instant`](std::time::Instant) pairs
//! taken as spans open and close; GPU timings go through a ring of timestamp query
//! sets whose results are read back asynchronously, several frames after submission.
//!
//! The per-frame lifecycle is strict and panics on misuse:
//!
//! 1. [`Profiler::start_frame`] - may block if the GPU has fallen behind
//! 2. [`Profiler::nest`] / [`Profiler::end_span`] and the GPU query pair around
//!    command encoding
//! 3. [`Profiler::finish_frame`] after the frame's commands are submitted
//! 4. [`Profiler::resolve`] on a follow-up encoder, then [`Profiler::map`]
//! 5. [`Profiler::collect`] at the top of a later frame picks up whatever readbacks
//!    have completed, oldest frame first

mod collect;
mod gpu_queries;
mod span_tree;

pub use collect::{FrameResults, QueryResults, SpanResults};
pub use gpu_queries::GpuQueryError;
pub use span_tree::SpanToken;

use crate::graphics::DeviceContext;
use collect::merge_results;
use gpu_queries::QueryRing;
use log::*;
use span_tree::{FinishedSpans, QueryRequest, SpanTree};
use std::{collections::VecDeque, mem, sync::Arc};

pub struct ProfilerConfig {
    /// How many frames may be awaiting GPU readback before
    /// [`start_frame`](Profiler::start_frame) blocks.
    pub pipeline_depth: usize,
    pub enable_gpu_queries: bool,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            pipeline_depth: 3,
            enable_gpu_queries: true,
        }
    }
}

/// Handle to an open GPU query, to be passed back to
/// [`end_gpu_query`](Profiler::end_gpu_query) before the owning span ends.
///
/// The pair index is [`None`] when the query wasn't actually issued, either because
/// GPU profiling is disabled or because the frame ran out of query capacity. Ending
/// such a token is a no-op.
#[must_use]
pub struct GpuQueryToken {
    pair_index: Option<u32>,
}

struct GpuState {
    dc: Arc<DeviceContext>,
    ring: QueryRing,
}

struct ActiveFrame {
    tag: u64,
    spans: SpanTree,
    /// Ring slot claimed for this frame, [`None`] when GPU profiling is off.
    slot: Option<usize>,
}

struct SealedFrame {
    tag: u64,
    spans: FinishedSpans,
    slot: Option<usize>,
    resolved: bool,
}

struct PendingFrame {
    tag: u64,
    spans: FinishedSpans,
    slot: Option<usize>,
}

/// See the [module docs](self) for the recording lifecycle.
pub struct Profiler {
    gpu: Option<GpuState>,
    current: Option<ActiveFrame>,
    sealed: Option<SealedFrame>,
    /// Frames whose readback hasn't completed yet, oldest first.
    pending: VecDeque<PendingFrame>,
    completed: Vec<FrameResults>,
}

impl Profiler {
    pub fn new(dc: &Arc<DeviceContext>, config: &ProfilerConfig) -> Self {
        if !config.enable_gpu_queries {
            return Self::disabled();
        }
        if !dc.device.features().contains(wgpu::Features::TIMESTAMP_QUERY) {
            warn!("Device doesn't support timestamp queries, GPU profiling is disabled");
            return Self::disabled();
        }

        Self {
            gpu: Some(GpuState {
                dc: dc.clone(),
                ring: QueryRing::new(dc, config.pipeline_depth),
            }),
            ..Self::disabled()
        }
    }

    /// Creates a CPU-only profiler. Spans work as usual; GPU queries become no-ops and
    /// frames complete as soon as they're mapped.
    pub fn disabled() -> Self {
        Self {
            gpu: None,
            current: None,
            sealed: None,
            pending: VecDeque::new(),
            completed: Vec::new(),
        }
    }

    /// Begins recording a frame. `tag` must increase by one every frame.
    ///
    /// Blocks when the frame's ring slot is still occupied by an unfinished readback,
    /// which caps how far the CPU may run ahead of the GPU.
    ///
    /// ## Panics
    /// Panics if the previous frame wasn't finished and mapped.
    pub fn start_frame(&mut self, tag: u64) {
        assert!(self.current.is_none(), "a frame is already being recorded");
        assert!(
            self.sealed.is_none(),
            "the previous frame was finished but never mapped"
        );

        let slot = self.gpu.as_ref().map(|gpu| gpu.ring.slot_index(tag));
        if let Some(slot) = slot {
            self.wait_for_slot(slot);
            self.gpu.as_mut().unwrap().ring.acquire(slot);
        }

        self.current = Some(ActiveFrame {
            tag,
            spans: SpanTree::start(),
            slot,
        });
    }

    /// Opens a CPU span nested under the innermost open one.
    pub fn nest(&mut self, label: &'static str) -> SpanToken {
        self.current_frame().spans.nest(label)
    }

    /// Closes the innermost open CPU span.
    pub fn end_span(&mut self, token: SpanToken) {
        self.current_frame().spans.end(token);
    }

    /// Writes a start timestamp and attributes the query to the innermost open span.
    pub fn begin_gpu_query(
        &mut self,
        label: &'static str,
        encoder: &mut wgpu::CommandEncoder,
    ) -> GpuQueryToken {
        let frame = self.current.as_mut().expect("no frame is being recorded");
        let pair_index = match (frame.slot, &mut self.gpu) {
            (Some(slot), Some(gpu)) => gpu.ring.begin_pair(slot, encoder),
            _ => None,
        };

        if let Some(pair_index) = pair_index {
            frame.spans.attach_query(QueryRequest { label, pair_index });
        }
        GpuQueryToken { pair_index }
    }

    /// Writes the query's end timestamp.
    pub fn end_gpu_query(&mut self, token: GpuQueryToken, encoder: &mut wgpu::CommandEncoder) {
        let Some(pair_index) = token.pair_index else {
            return;
        };
        let frame = self.current.as_ref().expect("no frame is being recorded");
        let slot = frame.slot.expect("query token without a frame slot");
        self.gpu
            .as_mut()
            .unwrap()
            .ring
            .end_pair(slot, pair_index, encoder);
    }

    /// Ends recording. All nested spans must be closed; the root span's CPU time is
    /// stamped here.
    pub fn finish_frame(&mut self) {
        let frame = self.current.take().expect("no frame is being recorded");
        self.sealed = Some(SealedFrame {
            tag: frame.tag,
            spans: frame.spans.finish(),
            slot: frame.slot,
            resolved: false,
        });
    }

    /// Encodes the copy of the finished frame's timestamps into its readback buffer.
    /// Must be submitted after the frame's own command buffers.
    pub fn resolve(&mut self, encoder: &mut wgpu::CommandEncoder) {
        let sealed = self.sealed.as_mut().expect("no finished frame to resolve");
        assert!(!sealed.resolved, "frame was already resolved");

        if let (Some(slot), Some(gpu)) = (sealed.slot, &mut self.gpu) {
            gpu.ring.resolve(slot, encoder);
        }
        sealed.resolved = true;
    }

    /// Starts the finished frame's asynchronous readback and queues it for
    /// [`collect`](Profiler::collect). Never blocks.
    ///
    /// ## Panics
    /// Panics unless [`finish_frame`](Profiler::finish_frame) and, with GPU profiling
    /// active, [`resolve`](Profiler::resolve) were called for this frame.
    pub fn map(&mut self) {
        let sealed = self.sealed.take().expect("no finished frame to map");
        if let (Some(slot), Some(gpu)) = (sealed.slot, &mut self.gpu) {
            assert!(sealed.resolved, "frame was mapped without being resolved");
            gpu.ring.map(slot);
        }

        self.pending.push_back(PendingFrame {
            tag: sealed.tag,
            spans: sealed.spans,
            slot: sealed.slot,
        });
    }

    /// Takes every frame whose results are complete, in frame tag order. Since
    /// readbacks finish in submission order, this drains pending frames from the
    /// oldest until it hits one that is still in flight.
    pub fn collect(&mut self) -> Vec<FrameResults> {
        self.drain_mapped();
        mem::take(&mut self.completed)
    }

    fn drain_mapped(&mut self) {
        let gpu = &mut self.gpu;
        let period = gpu.as_ref().map_or(1.0, |gpu| gpu.ring.timestamp_period);
        drain_queue(&mut self.pending, &mut self.completed, period, |slot| {
            gpu.as_mut()
                .map_or(Some(Ok(Vec::new())), |gpu| gpu.ring.try_take_results(slot))
        });
    }

    /// Blocks until `slot` is free, draining completed readbacks along the way. This
    /// is the pipeline's backpressure point: a slot only frees up once its frame's
    /// timestamps have been read back.
    fn wait_for_slot(&mut self, slot: usize) {
        loop {
            self.drain_mapped();
            let gpu = self.gpu.as_ref().unwrap();
            if !gpu.ring.is_in_flight(slot) {
                return;
            }
            trace!("Frame slot {slot} still in flight, waiting for the GPU");
            gpu.dc.device.poll(wgpu::Maintain::Wait);
        }
    }

    fn current_frame(&mut self) -> &mut ActiveFrame {
        self.current.as_mut().expect("no frame is being recorded")
    }
}

/// Moves completed frames from the pending queue into `completed`, oldest first,
/// stopping at the first frame whose readback (as reported by `poll_slot`) is still
/// in flight. Frames behind it stay queued even if their own readback finished
/// earlier, which is what keeps collected results in tag order.
fn drain_queue(
    pending: &mut VecDeque<PendingFrame>,
    completed: &mut Vec<FrameResults>,
    timestamp_period: f32,
    mut poll_slot: impl FnMut(usize) -> Option<Result<Vec<u64>, GpuQueryError>>,
) {
    loop {
        let Some(front) = pending.front() else {
            break;
        };

        let ticks = match front.slot {
            Some(slot) => match poll_slot(slot) {
                None => break,
                Some(Ok(ticks)) => Some(ticks),
                Some(Err(error)) => {
                    warn!("frame {}: {error}; reporting CPU timings only", front.tag);
                    None
                }
            },
            None => None,
        };

        let frame = pending.pop_front().unwrap();
        completed.push(merge_results(
            frame.tag,
            &frame.spans,
            ticks.as_deref(),
            timestamp_period,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_frame(profiler: &mut Profiler, tag: u64) {
        profiler.start_frame(tag);
        let work = profiler.nest("work");
        profiler.end_span(work);
        profiler.finish_frame();
        profiler.map();
    }

    #[test]
    fn frames_complete_in_tag_order() {
        let mut profiler = Profiler::disabled();
        for tag in 0..3 {
            record_frame(&mut profiler, tag);
        }

        let tags: Vec<_> = profiler.collect().iter().map(|f| f.tag).collect();
        assert_eq!(tags, [0, 1, 2]);
    }

    fn pending_frame(tag: u64, slot: usize) -> PendingFrame {
        PendingFrame {
            tag,
            spans: SpanTree::start().finish(),
            slot: Some(slot),
        }
    }

    #[test]
    fn later_readbacks_wait_behind_earlier_frames() {
        let mut pending: VecDeque<_> = (0..2).map(|tag| pending_frame(tag, tag as usize)).collect();
        let mut completed = Vec::new();

        // Frame 1's readback finished first; frame 0's is still in flight, so nothing
        // may be handed out yet.
        drain_queue(&mut pending, &mut completed, 1.0, |slot| match slot {
            0 => None,
            _ => Some(Ok(Vec::new())),
        });
        assert!(completed.is_empty());
        assert_eq!(pending.len(), 2);

        drain_queue(&mut pending, &mut completed, 1.0, |_| Some(Ok(Vec::new())));
        let tags: Vec<_> = completed.iter().map(|f| f.tag).collect();
        assert_eq!(tags, [0, 1]);
    }

    #[test]
    fn failed_readbacks_dont_block_the_queue() {
        let mut pending: VecDeque<_> = (0..2).map(|tag| pending_frame(tag, tag as usize)).collect();
        let mut completed = Vec::new();

        drain_queue(&mut pending, &mut completed, 1.0, |slot| match slot {
            0 => Some(Err(GpuQueryError::MappingFailed)),
            _ => Some(Ok(Vec::new())),
        });

        // The failed frame still comes out, CPU-only, in its place in the order.
        let tags: Vec<_> = completed.iter().map(|f| f.tag).collect();
        assert_eq!(tags, [0, 1]);
        assert!(completed[0].root.queries.is_empty());
    }

    #[test]
    fn collect_drains_completed_frames() {
        let mut profiler = Profiler::disabled();
        record_frame(&mut profiler, 0);

        let results = profiler.collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].root.label, "frame");
        assert_eq!(results[0].root.children[0].label, "work");

        assert!(profiler.collect().is_empty());
    }

    #[test]
    fn disabled_profiler_issues_no_queries() {
        let mut profiler = Profiler::disabled();
        profiler.start_frame(0);
        // No encoder exists here, which is fine since no query can be issued.
        let token = GpuQueryToken { pair_index: None };
        assert!(token.pair_index.is_none());
        profiler.finish_frame();
        profiler.map();

        let results = profiler.collect();
        assert!(results[0].root.queries.is_empty());
    }

    #[test]
    #[should_panic(expected = "already being recorded")]
    fn double_start_panics() {
        let mut profiler = Profiler::disabled();
        profiler.start_frame(0);
        profiler.start_frame(1);
    }

    #[test]
    #[should_panic(expected = "no finished frame to map")]
    fn mapping_without_finishing_panics() {
        let mut profiler = Profiler::disabled();
        profiler.start_frame(0);
        profiler.map();
    }

    #[test]
    #[should_panic(expected = "never ended")]
    fn finishing_with_open_spans_panics() {
        let mut profiler = Profiler::disabled();
        profiler.start_frame(0);
        let _span = profiler.nest("leaked");
        profiler.finish_frame();
    }
}
