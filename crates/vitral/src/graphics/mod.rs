//! Window surface, device plumbing and the demo scene renderer.
//!
//! The renderer is deliberately small: a static 2D scene of colored rectangles, drawn
//! with a clear pass followed by a single alpha-blended draw pass. It exists to give
//! the [profiler](crate::profiling) something real to measure, with per-pass GPU
//! queries and the vertex staging work showing up as CPU spans.

#[doc(inline)]
pub use device_context::*;
mod device_context;

#[doc(inline)]
pub use scene::*;
mod scene;

#[doc(inline)]
pub use scene_renderer::*;
mod scene_renderer;
