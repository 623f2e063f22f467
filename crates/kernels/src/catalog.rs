use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use pipeline::{
    DisplaySpec, ImageFormat, ImageTarget, KernelSpec, LoopMode, LoopSpec, ParamsEncoder,
    ProgramStages, Seeder, StepSchedule,
};

use crate::params::{CameraEncoder, MandelbrotParams, TimeEncoder};
use crate::seed::{Pattern, PatternSeeder, RandomSeeder};
use crate::shaders;

pub const DEFAULT_TILE: u32 = 16;
pub const DEFAULT_STEP_INTERVAL: Duration = Duration::from_millis(160);
pub const DEFAULT_MAX_CATCH_UP: u32 = 4;
pub const DEFAULT_DENSITY: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DemoKind {
    Life,
    Mandelbrot,
    Waves,
    Raytrace,
}

impl DemoKind {
    pub const ALL: [DemoKind; 4] = [
        DemoKind::Life,
        DemoKind::Mandelbrot,
        DemoKind::Waves,
        DemoKind::Raytrace,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Life => "life",
            Self::Mandelbrot => "mandelbrot",
            Self::Waves => "waves",
            Self::Raytrace => "raytrace",
        }
    }

    /// Program label of the compute kernel. Software kernels are registered
    /// under the same label.
    pub fn label(self) -> &'static str {
        self.name()
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Life => "Conway's Game of Life on a toroidal grid, stepped on a fixed schedule",
            Self::Mandelbrot => "Mandelbrot set with a smooth palette, rendered once",
            Self::Waves => "Animated interference pattern driven by elapsed time",
            Self::Raytrace => "Four spheres with lambert shading and a bouncing centre sphere",
        }
    }

    /// Output image size when nothing overrides it.
    pub fn default_size(self) -> (u32, u32) {
        match self {
            Self::Life => (512, 512),
            Self::Mandelbrot => (1024, 768),
            Self::Waves | Self::Raytrace => (800, 600),
        }
    }

    pub fn format(self) -> ImageFormat {
        match self {
            Self::Life => ImageFormat::Rgba8Unorm,
            _ => ImageFormat::Rgba32Float,
        }
    }

    pub fn is_stateful(self) -> bool {
        matches!(self, Self::Life)
    }

    pub fn kernel_source(self) -> &'static str {
        match self {
            Self::Life => shaders::LIFE,
            Self::Mandelbrot => shaders::MANDELBROT,
            Self::Waves => shaders::WAVES,
            Self::Raytrace => shaders::RAYTRACE,
        }
    }

    pub fn kernel_stages(self, tile: u32) -> ProgramStages {
        ProgramStages::compute(shaders::with_tile(self.kernel_source(), tile))
    }

    /// Every program the demo links: its kernel and the display program.
    pub fn programs(self, tile: u32) -> Vec<(String, ProgramStages)> {
        vec![
            (self.label().to_string(), self.kernel_stages(tile)),
            (format!("{}-display", self.label()), shaders::display_stages()),
        ]
    }

    pub fn loop_spec(self, options: &DemoOptions) -> LoopSpec {
        let (width, height) = options.size;
        let target = ImageTarget::new(width, height, self.format());
        let stages = self.kernel_stages(options.tile);

        let (kernel, mode) = match self {
            Self::Life => (
                KernelSpec {
                    stages,
                    tile: options.tile,
                    output_slot: 2,
                    input_slot: Some(0),
                    params_slot: None,
                },
                LoopMode::Simulation {
                    seeder: options.seeding.seeder(),
                    schedule: options.step,
                },
            ),
            Self::Mandelbrot => (
                KernelSpec {
                    stages,
                    tile: options.tile,
                    output_slot: 0,
                    input_slot: None,
                    params_slot: Some(1),
                },
                LoopMode::Static {
                    params: Some(bytemuck::bytes_of(&options.mandelbrot).to_vec()),
                },
            ),
            Self::Waves | Self::Raytrace => (
                KernelSpec {
                    stages,
                    tile: options.tile,
                    output_slot: 0,
                    input_slot: None,
                    params_slot: Some(1),
                },
                LoopMode::Animated {
                    params: self.encoder(options),
                },
            ),
        };

        LoopSpec {
            label: self.label().to_string(),
            kernel,
            display: DisplaySpec {
                stages: shaders::display_stages(),
                image_slot: 0,
            },
            target,
            mode,
        }
    }

    fn encoder(self, options: &DemoOptions) -> Box<dyn ParamsEncoder> {
        match self {
            Self::Raytrace => Box::new(CameraEncoder {
                camera_pos: options.camera,
            }),
            _ => Box::new(TimeEncoder),
        }
    }
}

impl fmt::Display for DemoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DemoKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == normalized)
            .ok_or_else(|| format!("unknown demo '{value}'"))
    }
}

/// How the life grid is filled on start and on every reset.
#[derive(Debug, Clone, PartialEq)]
pub enum Seeding {
    Random { seed: Option<u64>, density: f64 },
    Pattern(Pattern),
}

impl Seeding {
    pub fn seeder(&self) -> Box<dyn Seeder> {
        match self {
            Self::Random { seed, density } => Box::new(RandomSeeder::new(*seed, *density)),
            Self::Pattern(pattern) => Box::new(PatternSeeder::new(*pattern)),
        }
    }
}

/// Knobs a demo instance is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoOptions {
    pub size: (u32, u32),
    pub tile: u32,
    pub step: StepSchedule,
    pub seeding: Seeding,
    pub mandelbrot: MandelbrotParams,
    pub camera: [f32; 3],
}

impl DemoOptions {
    pub fn defaults(kind: DemoKind) -> Self {
        Self {
            size: kind.default_size(),
            tile: DEFAULT_TILE,
            step: StepSchedule::new(DEFAULT_STEP_INTERVAL, DEFAULT_MAX_CATCH_UP),
            seeding: Seeding::Random {
                seed: None,
                density: DEFAULT_DENSITY,
            },
            mandelbrot: MandelbrotParams::default(),
            camera: [0.0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::encode_cells;
    use crate::software;
    use pipeline::software::SoftwareBackend;
    use pipeline::{link_program, FrameLoop, KeyBindings, ScriptedInput, SteppedTimeSource};
    use std::time::Instant;

    fn live_cells(backend: &SoftwareBackend) -> Vec<usize> {
        backend
            .last_frame()
            .expect("presented")
            .texels
            .iter()
            .enumerate()
            .filter(|(_, texel)| texel[0] > 0.5)
            .map(|(index, _)| index)
            .collect()
    }

    /// Runs `frames` iterations 100ms apart and returns the live cells
    /// presented by each one.
    fn run_small_grid(spec: LoopSpec, frames: u32) -> Vec<Vec<usize>> {
        let mut backend = software::backend();
        let mut frame_loop =
            FrameLoop::new(&mut backend, spec, KeyBindings::default()).expect("setup");
        let origin = Instant::now();
        let mut history = Vec::new();
        for frame in 0..frames {
            let now = origin + Duration::from_millis(100) * frame;
            let report = frame_loop.iterate(&mut backend, [], now).expect("iterate");
            assert_eq!(report.generation, Some(u64::from(frame)));
            history.push(live_cells(&backend));
        }
        frame_loop.teardown(&mut backend).expect("teardown");
        assert!(backend.hazards().is_empty());
        assert_eq!(backend.out_of_bounds_writes(), 0);
        history
    }

    fn small_life_options() -> DemoOptions {
        let mut options = DemoOptions::defaults(DemoKind::Life);
        options.size = (4, 4);
        options.tile = 4;
        options.step = StepSchedule::new(Duration::from_millis(100), DEFAULT_MAX_CATCH_UP);
        options
    }

    #[test]
    fn names_round_trip_through_from_str() {
        for kind in DemoKind::ALL {
            assert_eq!(kind.name().parse::<DemoKind>(), Ok(kind));
        }
        assert!("doom".parse::<DemoKind>().is_err());
    }

    #[test]
    fn every_program_links_at_several_tiles() {
        for tile in [1, 8, 16, 32] {
            for kind in DemoKind::ALL {
                for (label, stages) in kind.programs(tile) {
                    let linked = link_program(&label, &stages)
                        .unwrap_or_else(|err| panic!("{label} at tile {tile}: {err}"));
                    if stages.kind() == pipeline::ProgramKind::Compute {
                        assert_eq!(linked.local_size, Some([tile, tile, 1]));
                    }
                }
            }
        }
    }

    #[test]
    fn every_demo_runs_on_the_software_backend() {
        for kind in DemoKind::ALL {
            let mut options = DemoOptions::defaults(kind);
            options.size = (12, 10);
            options.tile = 8;
            options.seeding = Seeding::Random {
                seed: Some(3),
                density: 0.4,
            };
            let mut backend = software::backend();
            let frame_loop =
                FrameLoop::new(&mut backend, kind.loop_spec(&options), KeyBindings::default())
                    .unwrap_or_else(|err| panic!("{kind}: {err}"));
            let mut input = ScriptedInput::new().quit_after(5);
            let mut time = SteppedTimeSource::new(DEFAULT_STEP_INTERVAL);
            let summary = frame_loop
                .run(&mut backend, &mut input, &mut time)
                .unwrap_or_else(|err| panic!("{kind}: {err}"));

            assert_eq!(summary.frames, 5, "{kind}");
            assert_eq!(summary.generation.is_some(), kind.is_stateful(), "{kind}");
            assert!(backend.hazards().is_empty(), "{kind}");
            assert_eq!(backend.out_of_bounds_writes(), 0, "{kind}");
            assert_eq!(backend.present_count(), 5, "{kind}");
        }
    }

    #[test]
    fn blinker_on_a_four_by_four_torus_has_period_two() {
        let mut options = small_life_options();
        options.seeding = Seeding::Pattern(Pattern::Blinker);
        let history = run_small_grid(DemoKind::Life.loop_spec(&options), 5);

        let horizontal = vec![9, 10, 11];
        let vertical = vec![6, 10, 14];
        for (generation, live) in history.iter().enumerate() {
            let expected = if generation % 2 == 0 {
                &horizontal
            } else {
                &vertical
            };
            assert_eq!(live, expected, "generation {generation}");
        }
    }

    #[test]
    fn blinker_across_the_corner_wraps_both_axes() {
        let options = small_life_options();
        let mut spec = DemoKind::Life.loop_spec(&options);
        // Vertical blinker centred on (0, 0): rows 3, 0 and 1 of column 0.
        spec.mode = LoopMode::Simulation {
            seeder: Box::new(|target: &ImageTarget| {
                encode_cells(target, |x, y| x == 0 && y != 2)
            }),
            schedule: options.step,
        };
        let history = run_small_grid(spec, 4);

        // Horizontal phase: columns 3, 0 and 1 of row 0.
        assert_eq!(history[0], vec![0, 4, 12]);
        assert_eq!(history[1], vec![0, 1, 3]);
        assert_eq!(history[2], vec![0, 4, 12]);
        assert_eq!(history[3], vec![0, 1, 3]);
    }
}
