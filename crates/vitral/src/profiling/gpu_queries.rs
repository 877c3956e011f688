use crate::graphics::DeviceContext;
use log::*;
use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};
use thiserror::Error;

/// Timestamps per frame slot. Each query uses a start/end pair, so this allows up to
/// 16 GPU queries per frame.
pub(crate) const MAX_TIMESTAMPS_PER_FRAME: u32 = 32;

const QUERY_SIZE: u64 = wgpu::QUERY_SIZE as u64;

/// Recoverable failures of the query pipeline. These degrade a frame's results to
/// CPU-only data; they never abort the render loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GpuQueryError {
    #[error("readback buffer mapping failed")]
    MappingFailed,
    #[error("device reported out-of-order timestamps")]
    OutOfOrderTimestamps,
    #[error("device returned too few timestamps")]
    MissingTimestamps,
}

// Mapping state of a slot's readback buffer. Written by the map_async callback on
// whatever thread the driver runs it on, read from the render thread.
const STATE_IDLE: u8 = 0;
const STATE_PENDING: u8 = 1;
const STATE_MAPPED: u8 = 2;
const STATE_FAILED: u8 = 3;

/// One entry of the in-flight frame ring: a timestamp query set plus the buffers used
/// to get its values back to the CPU.
struct FrameSlot {
    query_set: wgpu::QuerySet,
    resolve_buffer: wgpu::Buffer,
    read_buffer: wgpu::Buffer,
    state: Arc<AtomicU8>,
    /// Timestamps written this frame.
    used: u32,
    /// Set from acquisition until the readback that frees the slot.
    in_flight: bool,
}

impl FrameSlot {
    fn new(device: &wgpu::Device, index: usize) -> Self {
        let size = MAX_TIMESTAMPS_PER_FRAME as u64 * QUERY_SIZE;
        Self {
            query_set: device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some(&format!("Profiler Query Set #{index}")),
                ty: wgpu::QueryType::Timestamp,
                count: MAX_TIMESTAMPS_PER_FRAME,
            }),
            resolve_buffer: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("Profiler Resolve Buffer #{index}")),
                size,
                usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }),
            read_buffer: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("Profiler Read Buffer #{index}")),
                size,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            }),
            state: Arc::new(AtomicU8::new(STATE_IDLE)),
            used: 0,
            in_flight: false,
        }
    }

    fn readback_size(&self) -> u64 {
        self.used as u64 * QUERY_SIZE
    }
}

/// Fixed-size ring of per-frame query slots, indexed by `frame tag % pipeline depth`.
///
/// GPU completion trails submission by up to the pipeline depth, so that many frames'
/// query sets and readback buffers have to exist simultaneously. Modeling them as an
/// explicit ring polled once per loop iteration keeps the whole asynchronous dance
/// observable from the single render thread.
pub(crate) struct QueryRing {
    slots: Vec<FrameSlot>,
    /// Nanoseconds per timestamp tick, as reported by the device. Queried exactly once
    /// at initialization.
    pub timestamp_period: f32,
}

impl QueryRing {
    pub fn new(dc: &DeviceContext, depth: usize) -> Self {
        assert!(depth > 0, "pipeline depth must be at least 1");
        Self {
            slots: (0..depth).map(|i| FrameSlot::new(&dc.device, i)).collect(),
            timestamp_period: dc.queue.get_timestamp_period(),
        }
    }

    pub fn slot_index(&self, tag: u64) -> usize {
        (tag % self.slots.len() as u64) as usize
    }

    pub fn is_in_flight(&self, slot: usize) -> bool {
        self.slots[slot].in_flight
    }

    /// Claims a slot for a new frame. The caller must have waited for it to be free.
    pub fn acquire(&mut self, slot: usize) {
        let slot = &mut self.slots[slot];
        assert!(!slot.in_flight, "acquired a frame slot that is still in flight");
        slot.used = 0;
        slot.state.store(STATE_IDLE, Ordering::Relaxed);
        slot.in_flight = true;
    }

    /// Reserves a start/end timestamp pair and writes the start timestamp. Returns
    /// [`None`] when the frame is out of query capacity, in which case the query is
    /// dropped with a warning rather than crashing the renderer.
    pub fn begin_pair(&mut self, slot: usize, encoder: &mut wgpu::CommandEncoder) -> Option<u32> {
        let slot = &mut self.slots[slot];
        if slot.used + 2 > MAX_TIMESTAMPS_PER_FRAME {
            warn!("per-frame GPU query capacity exhausted, dropping a query");
            return None;
        }

        let pair_index = slot.used;
        slot.used += 2;
        encoder.write_timestamp(&slot.query_set, pair_index);
        Some(pair_index)
    }

    /// Writes the end timestamp of a previously reserved pair.
    pub fn end_pair(&mut self, slot: usize, pair_index: u32, encoder: &mut wgpu::CommandEncoder) {
        let slot = &self.slots[slot];
        encoder.write_timestamp(&slot.query_set, pair_index + 1);
    }

    /// Emits the commands that copy this frame's raw timestamps into its readback
    /// buffer. These must be the last commands of the frame touching the query set.
    pub fn resolve(&mut self, slot: usize, encoder: &mut wgpu::CommandEncoder) {
        let slot = &self.slots[slot];
        if slot.used == 0 {
            return;
        }

        encoder.resolve_query_set(&slot.query_set, 0..slot.used, &slot.resolve_buffer, 0);
        encoder.copy_buffer_to_buffer(
            &slot.resolve_buffer,
            0,
            &slot.read_buffer,
            0,
            slot.readback_size(),
        );
    }

    /// Kicks off the asynchronous mapping of the slot's readback buffer. Never blocks;
    /// completion is observed later through [`QueryRing::try_take_results`].
    pub fn map(&mut self, slot: usize) {
        let slot = &mut self.slots[slot];
        debug_assert!(slot.in_flight);

        if slot.used == 0 {
            // Nothing was resolved, the frame completes the moment it's polled.
            slot.state.store(STATE_MAPPED, Ordering::Release);
            return;
        }

        slot.state.store(STATE_PENDING, Ordering::Relaxed);
        let state = slot.state.clone();
        slot.read_buffer
            .slice(0..slot.readback_size())
            .map_async(wgpu::MapMode::Read, move |result| match result {
                Ok(()) => state.store(STATE_MAPPED, Ordering::Release),
                Err(_) => state.store(STATE_FAILED, Ordering::Release),
            });
    }

    /// Non-blocking poll of a slot's readback. Returns [`None`] while the mapping is
    /// still pending; otherwise frees the slot and returns the raw timestamps, or the
    /// failure that lost them.
    pub fn try_take_results(&mut self, slot: usize) -> Option<Result<Vec<u64>, GpuQueryError>> {
        let slot = &mut self.slots[slot];
        match slot.state.load(Ordering::Acquire) {
            STATE_PENDING => None,
            STATE_MAPPED => {
                let ticks = if slot.used == 0 {
                    Vec::new()
                } else {
                    let view = slot.read_buffer.slice(0..slot.readback_size()).get_mapped_range();
                    let ticks = view
                        .chunks_exact(QUERY_SIZE as usize)
                        .map(|bytes| u64::from_le_bytes(bytes.try_into().unwrap()))
                        .collect();
                    drop(view);
                    slot.read_buffer.unmap();
                    ticks
                };

                slot.in_flight = false;
                slot.state.store(STATE_IDLE, Ordering::Relaxed);
                Some(Ok(ticks))
            }
            STATE_FAILED => {
                slot.in_flight = false;
                slot.state.store(STATE_IDLE, Ordering::Relaxed);
                Some(Err(GpuQueryError::MappingFailed))
            }
            state => unreachable!("readback polled in invalid mapping state {state}"),
        }
    }
}
