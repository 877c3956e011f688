use crate::align;
use bytemuck::Pod;
use std::{
    alloc::{self, Layout},
    cell::{Cell, UnsafeCell},
    mem,
    ptr::{self, NonNull},
    slice,
};

/// Default capacity of a fresh arena. Plenty for per-frame scratch; the arena
/// grows on its own if a frame ever needs more.
const DEFAULT_CAPACITY: usize = 256 * 1024;

/// A bump allocator with frame-bounded lifetimes.
///
/// All allocations made between two [`FrameArena::reset`] calls share the same backing
/// storage and are handed out by bumping an offset, making individual allocations nearly
/// free. There is no way to free a single allocation; the only way to reclaim memory is
/// to reset the whole arena, which is meant to happen exactly once per frame.
///
/// Allocations borrow the arena, and `reset` takes `&mut self`. The borrow checker
/// therefore statically rejects any use of an allocation after the reset that
/// invalidated it:
///
/// ```compile_fail
/// use vitral_utils::FrameArena;
///
/// let mut arena = FrameArena::new();
/// let scratch = arena.alloc_slice::<u32>(16);
/// arena.reset();
/// scratch[0] = 1; // ERROR: `arena` is still borrowed by `scratch`
/// ```
///
/// ## Example
/// ```
/// use vitral_utils::FrameArena;
///
/// let mut arena = FrameArena::new();
/// for _frame in 0..3 {
///     arena.reset();
///     let scratch = arena.alloc_slice::<f32>(128);
///     scratch[0] = 1.0;
/// }
/// ```
pub struct FrameArena {
    /// Backing storage. Chunks hold raw heap allocations that never move, so pushing
    /// new chunks doesn't invalidate pointers into older ones.
    chunks: UnsafeCell<Vec<Chunk>>,
    /// Bump offset into the last chunk.
    cursor: Cell<usize>,
    /// Bytes handed out since the last reset.
    used: Cell<usize>,
}

/// One raw chunk of backing storage.
///
/// The base pointer is captured exactly once, when the chunk is allocated, and every
/// arena pointer is derived from it. The chunk is never reborrowed as a slice, which
/// would assert uniqueness over the whole range and invalidate allocations already
/// handed out from it.
struct Chunk {
    base: NonNull<u8>,
    len: usize,
}

impl Chunk {
    fn new(len: usize) -> Self {
        let layout = Self::layout(len);
        let base = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
            .unwrap_or_else(|| alloc::handle_alloc_error(layout));
        Self { base, len }
    }

    fn layout(len: usize) -> Layout {
        Layout::from_size_align(len, 1).expect("arena chunk size overflow")
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        // SAFETY: allocated in `Chunk::new` with the same layout.
        unsafe { alloc::dealloc(self.base.as_ptr(), Self::layout(self.len)) }
    }
}

impl FrameArena {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            chunks: UnsafeCell::new(vec![Chunk::new(capacity.max(64))]),
            cursor: Cell::new(0),
            used: Cell::new(0),
        }
    }

    /// Allocates a zeroed slice of `len` elements, valid until the next [`reset`].
    ///
    /// [`reset`]: FrameArena::reset
    pub fn alloc_slice<T: Pod>(&self, len: usize) -> &mut [T] {
        let size = mem::size_of::<T>()
            .checked_mul(len)
            .expect("arena allocation size overflow");
        if size == 0 {
            return &mut [];
        }

        let ptr = self.alloc_raw(size, mem::align_of::<T>());
        // SAFETY: alloc_raw returned `size` bytes aligned for T, disjoint from every
        // other live allocation. Zeroed bytes are a valid value for any Pod type.
        unsafe {
            ptr::write_bytes(ptr, 0, size);
            slice::from_raw_parts_mut(ptr.cast::<T>(), len)
        }
    }

    /// Invalidates all prior allocations and makes the storage available for reuse.
    ///
    /// Taking `&mut self` is what upholds the arena's central invariant: no allocation
    /// handed out before a reset can still be alive after it.
    pub fn reset(&mut self) {
        let chunks = self.chunks.get_mut();
        if chunks.len() > 1 {
            // The arena grew mid-frame. Merge everything into one chunk of the combined
            // size, so the steady state is a single chunk and resets stay trivial.
            let total = chunks.iter().map(|chunk| chunk.len).sum();
            chunks.clear();
            chunks.push(Chunk::new(total));
        }
        self.cursor.set(0);
        self.used.set(0);
    }

    /// Bytes handed out since the last reset.
    pub fn allocated_bytes(&self) -> usize {
        self.used.get()
    }

    /// Total backing storage held by the arena.
    pub fn capacity(&self) -> usize {
        // SAFETY: the chunk list is only mutated inside alloc_raw/reset, neither of
        // which can be running concurrently with this shared borrow (the arena is
        // single-threaded by construction, it's !Sync).
        unsafe { (*self.chunks.get()).iter().map(|chunk| chunk.len).sum() }
    }

    fn alloc_raw(&self, size: usize, alignment: usize) -> *mut u8 {
        debug_assert!(alignment.is_power_of_two());

        // SAFETY: the returned pointer ranges are disjoint (the cursor only moves
        // forward between resets), and every pointer derives from the chunk's stored
        // base, so no allocation ever invalidates an older one.
        unsafe {
            let chunks = &mut *self.chunks.get();

            let mut chunk = chunks.last().unwrap();
            let mut start = self.aligned_cursor(chunk, alignment);
            if start + size > chunk.len {
                // Out of space in the current chunk. Doubling keeps the chunk count
                // logarithmic in the worst frame; reset merges them back into one.
                let grown = (chunk.len * 2).max(size + alignment);
                chunks.push(Chunk::new(grown));
                self.cursor.set(0);

                chunk = chunks.last().unwrap();
                start = self.aligned_cursor(chunk, alignment);
            }

            self.cursor.set(start + size);
            self.used.set(self.used.get() + size);
            chunk.base.as_ptr().add(start)
        }
    }

    /// Returns the cursor advanced so that the corresponding *address* (not merely the
    /// offset) is aligned. Chunk storage is only guaranteed byte-aligned.
    fn aligned_cursor(&self, chunk: &Chunk, alignment: usize) -> usize {
        let addr = chunk.base.as_ptr() as usize + self.cursor.get();
        self.cursor.get() + (align(addr, alignment) - addr)
    }
}

impl Default for FrameArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_disjoint_and_zeroed() {
        let arena = FrameArena::with_capacity(1024);

        let a = arena.alloc_slice::<u32>(8);
        assert!(a.iter().all(|&v| v == 0));
        a.fill(0xAAAA_AAAA);

        let b = arena.alloc_slice::<u32>(8);
        assert!(b.iter().all(|&v| v == 0), "fresh allocation saw old data");
        b.fill(0xBBBB_BBBB);

        assert!(a.iter().all(|&v| v == 0xAAAA_AAAA));
        assert!(b.iter().all(|&v| v == 0xBBBB_BBBB));
    }

    #[test]
    fn allocations_are_aligned() {
        let arena = FrameArena::with_capacity(1024);

        arena.alloc_slice::<u8>(3);
        let wide = arena.alloc_slice::<u64>(4);
        assert_eq!(wide.as_ptr() as usize % mem::align_of::<u64>(), 0);

        arena.alloc_slice::<u8>(1);
        let floats = arena.alloc_slice::<f32>(7);
        assert_eq!(floats.as_ptr() as usize % mem::align_of::<f32>(), 0);
    }

    #[test]
    fn older_allocations_stay_valid_across_growth() {
        let arena = FrameArena::with_capacity(64);

        let first = arena.alloc_slice::<u32>(4);
        first.fill(1);

        // Forces a fresh chunk while `first` is still live, then keeps writing
        // through every older slice afterwards.
        let second = arena.alloc_slice::<u32>(64);
        second.fill(2);
        let third = arena.alloc_slice::<u32>(4);
        third.fill(3);

        first[0] += 1;
        second[0] += 1;
        assert_eq!(first, [2, 1, 1, 1]);
        assert_eq!(second[0], 3);
        assert!(third.iter().all(|&v| v == 3));
    }

    #[test]
    fn grows_beyond_initial_capacity() {
        let arena = FrameArena::with_capacity(64);

        let big = arena.alloc_slice::<u8>(1000);
        big.fill(0xCC);
        let more = arena.alloc_slice::<u8>(1000);
        more.fill(0xDD);

        assert!(big.iter().all(|&v| v == 0xCC));
        assert!(arena.capacity() >= 2000);
    }

    #[test]
    fn reset_reclaims_storage() {
        let mut arena = FrameArena::with_capacity(64);

        arena.alloc_slice::<u8>(500);
        assert_eq!(arena.allocated_bytes(), 500);
        let grown = arena.capacity();

        arena.reset();
        assert_eq!(arena.allocated_bytes(), 0);
        // Merged back into a single chunk, nothing was given back to the OS.
        assert_eq!(arena.capacity(), grown);

        // The whole frame now fits without growing again.
        arena.alloc_slice::<u8>(500);
        assert_eq!(arena.capacity(), grown);
    }

    #[test]
    fn zero_sized_allocations() {
        let arena = FrameArena::with_capacity(64);
        let empty = arena.alloc_slice::<u32>(0);
        assert!(empty.is_empty());
        assert_eq!(arena.allocated_bytes(), 0);
    }
}
