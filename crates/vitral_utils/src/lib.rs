//! Various utilities shared across Vitral's crates

mod arena;
pub use arena::FrameArena;

pub type AnyResult<T = (), E = anyhow::Error> = anyhow::Result<T, E>;

/// Aligns the value upwards. Alignment doesn't have to be a power of two.
///
/// ```
/// use vitral_utils::align;
/// assert_eq!(16, align(10, 8));
/// assert_eq!(10, align(10, 5));
/// ```
pub const fn align(n: usize, a: usize) -> usize {
    (n + a - 1) / a * a
}
