use clap::Parser;

/// User-specified command line parameters
#[derive(Debug, Parser)]
#[clap(name = "Vitral", about)]
pub struct Args {
    /// Window width in pixels.
    #[clap(long, default_value_t = 800)]
    pub width: u32,

    /// Window height in pixels.
    #[clap(long, default_value_t = 800)]
    pub height: u32,

    /// How many frames may be in flight on the GPU before the profiler applies
    /// backpressure. Typical values are 2-3.
    #[clap(long, default_value_t = 3)]
    pub pipeline_depth: usize,

    /// Disables GPU timestamp queries. CPU spans are still recorded and reported.
    #[clap(long)]
    pub no_gpu_profiling: bool,

    /// Exits after rendering this many frames. Mostly useful for benchmarking runs.
    #[clap(long)]
    pub frame_limit: Option<u64>,

    /// Silences the per-frame profiler report.
    #[clap(long)]
    pub quiet: bool,
}
