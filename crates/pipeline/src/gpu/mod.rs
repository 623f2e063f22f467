//! `wgpu` rendition of the pipeline.
//!
//! - `context` owns instance, device, queue and (for windowed runs) the
//!   surface, and chooses the present mode from the pacing policy.
//! - `backend` implements [`GpuBackend`](crate::backend::GpuBackend) with one
//!   encoder per frame, building pipelines and bind group layouts from the
//!   interface the linker reflected.
//! - `probe` is the headless device smoke test.

mod backend;
mod context;
mod probe;

pub use backend::WgpuBackend;
pub use context::{AdapterProfile, GpuContext};
pub use probe::{run_probe, ProbeReport, PROBE_HEIGHT, PROBE_TILE, PROBE_WIDTH};
