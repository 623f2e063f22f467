//! Compute-dispatch simulation and display pipeline.
//!
//! ```text
//!   ProgramStages ──link──▶ LinkedProgram ──install──▶ ResourceSet ◀── images / params / quad
//!                                                         │
//!        ComputeDispatcher ──dispatch + barrier──▶ output image (or SimulationState back buffer)
//!                                                         │
//!        DisplayStage ──sample over the quad──▶ present   │
//!                                                         ▼
//!        FrameLoop: input ▸ clock ▸ steps / dispatch ▸ draw, repeated until quit
//! ```
//!
//! The core talks to the device through [`GpuBackend`]. [`gpu::WgpuBackend`]
//! runs on real hardware; [`software::SoftwareBackend`] runs kernels as Rust
//! closures and records every operation, which is what the tests use.

pub mod backend;
pub mod clock;
pub mod dispatch;
pub mod display;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod linker;
pub mod resources;
pub mod runtime;
pub mod simulation;
pub mod snapshot;
pub mod software;
pub mod window;

pub use backend::GpuBackend;
pub use clock::{FrameClock, StepSchedule};
pub use dispatch::{ComputeDispatcher, ComputeKernel, WorkGroups};
pub use display::DisplayStage;
pub use error::PipelineError;
pub use frame::{
    Action, DisplaySpec, FrameLoop, InputEvent, IterationReport, Key, KeyBindings, KernelSpec,
    LoopMode, LoopSpec, ParamsEncoder, RunState, RunSummary,
};
pub use linker::{
    link_program, LinkedProgram, ProgramKind, ProgramStages, ShaderProgram, StageKind, StageSource,
};
pub use resources::{Binding, ImageFormat, ImageId, ImageTarget, ParamsId, ProgramId, ResourceSet};
pub use runtime::{
    InputSource, PacingPolicy, ScriptedInput, SteppedTimeSource, SystemTimeSource, TimeSource,
};
pub use simulation::{Buffer, Seeder, SimulationState, StepRecord};
pub use window::{run_windowed, WindowOptions};
