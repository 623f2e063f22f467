//! Frame loop.
//!
//! One iteration, in order:
//!
//! ```text
//!   drain input ──▶ tick clock ──▶ simulation steps (stateful, running, due)
//!                               └▶ dispatch      (animated, every iteration)
//!                 ──▶ DisplayStage::draw(latest image) ──▶ present
//! ```
//!
//! Run state only changes on input events. Setup errors are returned from
//! [`FrameLoop::new`] before any iteration runs.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::backend::GpuBackend;
use crate::clock::{FrameClock, StepSchedule};
use crate::dispatch::{ComputeDispatcher, ComputeKernel};
use crate::display::DisplayStage;
use crate::error::PipelineError;
use crate::linker::{ProgramStages, ShaderProgram};
use crate::resources::{Binding, ImageId, ImageTarget, ParamsId, ResourceSet};
use crate::runtime::{InputSource, TimeSource};
use crate::simulation::{Seeder, SimulationState};

const GENERATION_LOG_INTERVAL: u64 = 10;
const FRAME_LOG_INTERVAL: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    Quitting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Escape,
    Space,
    Enter,
    Character(char),
    Other,
}

impl Key {
    /// Parses a key name such as `escape`, `space`, `enter` or a single
    /// character.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "escape" | "esc" => Some(Self::Escape),
            "space" => Some(Self::Space),
            "enter" | "return" => Some(Self::Enter),
            other => {
                let mut chars = other.chars();
                match (chars.next(), chars.next()) {
                    (Some(ch), None) => Some(Self::Character(ch)),
                    _ => None,
                }
            }
        }
    }

    fn matches(&self, other: &Key) -> bool {
        match (self, other) {
            (Self::Character(a), Self::Character(b)) => a.to_lowercase().eq(b.to_lowercase()),
            (Self::Space, Self::Character(' ')) | (Self::Character(' '), Self::Space) => true,
            _ => self == other,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Escape => f.write_str("ESC"),
            Self::Space => f.write_str("SPACE"),
            Self::Enter => f.write_str("ENTER"),
            Self::Character(ch) => write!(f, "{}", ch.to_uppercase()),
            Self::Other => f.write_str("?"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Quit,
    KeyPress(Key),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    TogglePause,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBindings {
    pub quit: Key,
    pub pause: Key,
    pub reset: Key,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            quit: Key::Escape,
            pause: Key::Space,
            reset: Key::Character('r'),
        }
    }
}

impl KeyBindings {
    pub fn action(&self, key: &Key) -> Option<Action> {
        if self.quit.matches(key) {
            Some(Action::Quit)
        } else if self.pause.matches(key) {
            Some(Action::TogglePause)
        } else if self.reset.matches(key) {
            Some(Action::Reset)
        } else {
            None
        }
    }
}

/// Fills an animated kernel's parameter block from the accumulated time.
pub trait ParamsEncoder {
    fn size(&self) -> usize;
    fn encode(&mut self, elapsed: Duration) -> Vec<u8>;
}

pub struct KernelSpec {
    pub stages: ProgramStages,
    pub tile: u32,
    pub output_slot: u32,
    /// Slot of the previous generation for simulations.
    pub input_slot: Option<u32>,
    pub params_slot: Option<u32>,
}

pub struct DisplaySpec {
    pub stages: ProgramStages,
    pub image_slot: u32,
}

pub enum LoopMode {
    /// Dispatched once during setup, then only displayed.
    Static { params: Option<Vec<u8>> },
    /// Dispatched every iteration with freshly encoded parameters.
    Animated { params: Box<dyn ParamsEncoder> },
    /// Stepped on a fixed schedule through a ping-pong [`SimulationState`].
    Simulation {
        seeder: Box<dyn Seeder>,
        schedule: StepSchedule,
    },
}

impl fmt::Debug for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static { params } => f
                .debug_struct("Static")
                .field("params", &params.as_ref().map(Vec::len))
                .finish(),
            Self::Animated { params } => f
                .debug_struct("Animated")
                .field("params", &params.size())
                .finish(),
            Self::Simulation { schedule, .. } => f
                .debug_struct("Simulation")
                .field("schedule", schedule)
                .finish_non_exhaustive(),
        }
    }
}

/// Everything needed to build a [`FrameLoop`].
pub struct LoopSpec {
    pub label: String,
    pub kernel: KernelSpec,
    pub display: DisplaySpec,
    pub target: ImageTarget,
    pub mode: LoopMode,
}

enum Workload {
    Static {
        output: ImageId,
    },
    Animated {
        output: ImageId,
        params: ParamsId,
        params_slot: u32,
        encoder: Box<dyn ParamsEncoder>,
    },
    Simulation {
        state: SimulationState,
        seeder: Box<dyn Seeder>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationReport {
    pub frame: u64,
    pub run_state: RunState,
    pub steps: u32,
    pub dispatched: bool,
    pub generation: Option<u64>,
    pub presented: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub generation: Option<u64>,
    pub elapsed: Duration,
}

pub struct FrameLoop {
    label: String,
    resources: ResourceSet,
    dispatcher: ComputeDispatcher,
    kernel: ComputeKernel,
    display: DisplayStage,
    workload: Workload,
    clock: FrameClock,
    run_state: RunState,
    keys: KeyBindings,
    frames: u64,
}

/// Allocates the workload's images and parameter blocks. Static kernels are
/// dispatched here, simulations are seeded.
#[allow(clippy::too_many_arguments)]
fn prepare_workload<B: GpuBackend + ?Sized>(
    backend: &mut B,
    resources: &mut ResourceSet,
    dispatcher: &mut ComputeDispatcher,
    kernel: &ComputeKernel,
    kernel_spec: &KernelSpec,
    label: &str,
    target: ImageTarget,
    mode: LoopMode,
) -> Result<(Workload, Option<StepSchedule>), PipelineError> {
    match mode {
        LoopMode::Static { params } => {
            let output = resources.create_image(backend, target)?;
            let mut extra = Vec::new();
            if let (Some(bytes), Some(slot)) = (params, kernel_spec.params_slot) {
                let block = resources.create_params(backend, label, bytes.len())?;
                resources.update_params(backend, block, &bytes)?;
                extra.push(Binding::uniform(slot, block));
            }
            dispatcher.dispatch(backend, resources, kernel, output, &extra)?;
            Ok((Workload::Static { output }, None))
        }
        LoopMode::Animated { params } => {
            let params_slot = kernel_spec.params_slot.ok_or_else(|| {
                PipelineError::Binding(format!("animated kernel '{label}' needs a parameter slot"))
            })?;
            let output = resources.create_image(backend, target)?;
            let block = resources.create_params(backend, label, params.size())?;
            let workload = Workload::Animated {
                output,
                params: block,
                params_slot,
                encoder: params,
            };
            Ok((workload, None))
        }
        LoopMode::Simulation {
            mut seeder,
            schedule,
        } => {
            let input_slot = kernel_spec.input_slot.ok_or_else(|| {
                PipelineError::Binding(format!("simulation kernel '{label}' needs an input slot"))
            })?;
            let mut state = SimulationState::new(backend, resources, target, input_slot)?;
            state.reset(backend, resources, seeder.as_mut())?;
            Ok((Workload::Simulation { state, seeder }, Some(schedule)))
        }
    }
}

impl fmt::Debug for FrameLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameLoop")
            .field("label", &self.label)
            .field("run_state", &self.run_state)
            .field("frames", &self.frames)
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl FrameLoop {
    /// Links both programs, allocates every resource and seeds or renders the
    /// initial image. Any failure here is fatal to the demo, and whatever was
    /// already acquired is released before the error is returned.
    pub fn new<B: GpuBackend + ?Sized>(
        backend: &mut B,
        spec: LoopSpec,
        keys: KeyBindings,
    ) -> Result<Self, PipelineError> {
        let LoopSpec {
            label,
            kernel: kernel_spec,
            display: display_spec,
            target,
            mode,
        } = spec;

        let mut kernel_program = ShaderProgram::new(label.clone(), kernel_spec.stages.clone());
        let kernel_linked = kernel_program.link()?.clone();
        let mut display_program =
            ShaderProgram::new(format!("{label}-display"), display_spec.stages);
        let display_linked = display_program.link()?.clone();

        let mut resources = ResourceSet::new();
        let assembled = (|| -> Result<_, PipelineError> {
            let kernel_id = resources.install_program(backend, &kernel_linked)?;
            let display_id = resources.install_program(backend, &display_linked)?;
            resources.create_quad(backend)?;
            let kernel = ComputeKernel::new(
                &resources,
                kernel_id,
                kernel_spec.tile,
                kernel_spec.output_slot,
            )?;
            let display = DisplayStage::new(&resources, display_id, display_spec.image_slot)?;
            let mut dispatcher = ComputeDispatcher::new();
            let (workload, schedule) = prepare_workload(
                backend,
                &mut resources,
                &mut dispatcher,
                &kernel,
                &kernel_spec,
                &label,
                target,
                mode,
            )?;
            Ok((kernel, display, dispatcher, workload, schedule))
        })();
        let (kernel, display, dispatcher, workload, schedule) = match assembled {
            Ok(parts) => parts,
            Err(err) => {
                resources.release_all(backend);
                return Err(err);
            }
        };

        info!(
            demo = %label,
            width = target.width,
            height = target.height,
            format = target.format.as_str(),
            tile = kernel.tile(),
            "demo ready"
        );

        Ok(Self {
            label,
            resources,
            dispatcher,
            kernel,
            display,
            workload,
            clock: FrameClock::new(schedule),
            run_state: RunState::Running,
            keys,
            frames: 0,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn is_stateful(&self) -> bool {
        matches!(self.workload, Workload::Simulation { .. })
    }

    pub fn generation(&self) -> Option<u64> {
        match &self.workload {
            Workload::Simulation { state, .. } => Some(state.generation()),
            _ => None,
        }
    }

    pub fn simulation(&self) -> Option<&SimulationState> {
        match &self.workload {
            Workload::Simulation { state, .. } => Some(state),
            _ => None,
        }
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn resources(&self) -> &ResourceSet {
        &self.resources
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Image the display stage shows: the front buffer for simulations,
    /// otherwise the kernel's output.
    pub fn latest_image(&self) -> ImageId {
        match &self.workload {
            Workload::Static { output } | Workload::Animated { output, .. } => *output,
            Workload::Simulation { state, .. } => state.front_image(),
        }
    }

    /// Runs one iteration. After quit is observed nothing is dispatched or
    /// drawn; the caller is expected to call [`teardown`](Self::teardown).
    pub fn iterate<B, I>(
        &mut self,
        backend: &mut B,
        events: I,
        now: Instant,
    ) -> Result<IterationReport, PipelineError>
    where
        B: GpuBackend + ?Sized,
        I: IntoIterator<Item = InputEvent>,
    {
        for event in events {
            self.handle_event(backend, event)?;
        }

        if self.run_state == RunState::Quitting {
            return Ok(IterationReport {
                frame: self.frames,
                run_state: self.run_state,
                steps: 0,
                dispatched: false,
                generation: self.generation(),
                presented: false,
            });
        }

        self.clock.tick(now);

        let mut steps = 0;
        let mut dispatched = false;
        match &mut self.workload {
            Workload::Static { .. } => {}
            Workload::Animated {
                output,
                params,
                params_slot,
                encoder,
            } => {
                let elapsed = self.clock.elapsed();
                let bytes = encoder.encode(elapsed);
                self.resources.update_params(backend, *params, &bytes)?;
                self.dispatcher.dispatch(
                    backend,
                    &mut self.resources,
                    &self.kernel,
                    *output,
                    &[Binding::uniform(*params_slot, *params)],
                )?;
                dispatched = true;
                if (self.frames + 1) % FRAME_LOG_INTERVAL == 0 {
                    debug!(
                        demo = %self.label,
                        frame = self.frames + 1,
                        time = elapsed.as_secs_f32(),
                        "animation progress"
                    );
                }
            }
            Workload::Simulation { state, .. } => {
                if self.run_state == RunState::Running {
                    let due = self.clock.due_steps();
                    for _ in 0..due {
                        let record = state.step(
                            backend,
                            &mut self.resources,
                            &mut self.dispatcher,
                            &self.kernel,
                            &[],
                        )?;
                        steps += 1;
                        if record.generation % GENERATION_LOG_INTERVAL == 0 {
                            info!(demo = %self.label, generation = record.generation, "generation");
                        }
                    }
                    dispatched = steps > 0;
                }
            }
        }

        let latest = self.latest_image();
        self.display.draw(backend, &self.resources, latest)?;
        self.frames += 1;

        Ok(IterationReport {
            frame: self.frames,
            run_state: self.run_state,
            steps,
            dispatched,
            generation: self.generation(),
            presented: true,
        })
    }

    fn handle_event<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        event: InputEvent,
    ) -> Result<(), PipelineError> {
        if self.run_state == RunState::Quitting {
            return Ok(());
        }

        let action = match &event {
            InputEvent::Quit => Some(Action::Quit),
            InputEvent::KeyPress(key) => self.keys.action(key),
        };

        match action {
            Some(Action::Quit) => {
                info!(demo = %self.label, "quit requested");
                self.run_state = RunState::Quitting;
            }
            Some(Action::TogglePause) if self.is_stateful() => {
                self.run_state = match self.run_state {
                    RunState::Running => RunState::Paused,
                    _ => RunState::Running,
                };
                info!(demo = %self.label, state = ?self.run_state, "run state toggled");
            }
            Some(Action::Reset) => {
                if let Workload::Simulation { state, seeder } = &mut self.workload {
                    state.reset(backend, &mut self.resources, seeder.as_mut())?;
                    info!(demo = %self.label, "simulation reset");
                } else {
                    trace!(?event, "reset ignored by a stateless demo");
                }
            }
            Some(Action::TogglePause) | None => trace!(?event, "input ignored"),
        }
        Ok(())
    }

    /// Pull-style driver: polls `input` and `time` until quit is observed,
    /// then tears down.
    pub fn run<B, I, T>(
        mut self,
        backend: &mut B,
        input: &mut I,
        time: &mut T,
    ) -> Result<RunSummary, PipelineError>
    where
        B: GpuBackend + ?Sized,
        I: InputSource + ?Sized,
        T: TimeSource + ?Sized,
    {
        loop {
            let events = input.drain();
            let report = self.iterate(backend, events, time.now())?;
            if report.run_state == RunState::Quitting {
                break;
            }
        }

        let summary = RunSummary {
            frames: self.frames,
            generation: self.generation(),
            elapsed: self.clock.elapsed(),
        };
        self.teardown(backend)?;
        Ok(summary)
    }

    /// Waits for outstanding GPU work, then releases every resource in reverse
    /// acquisition order.
    pub fn teardown<B: GpuBackend + ?Sized>(
        mut self,
        backend: &mut B,
    ) -> Result<(), PipelineError> {
        backend.wait_idle()?;
        self.resources.release_all(backend);
        debug!(demo = %self.label, frames = self.frames, "frame loop torn down");
        Ok(())
    }
}
