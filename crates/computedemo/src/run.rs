use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use democonfig::{DemoConfig, Pacing};
use kernels::{DemoKind, DemoOptions, Seeding};
use pipeline::software::encode_rgba8;
use pipeline::{
    gpu, link_program, run_windowed, snapshot, FrameLoop, ImageFormat, ImageTarget, Key,
    KeyBindings, PacingPolicy, PipelineError, ProgramStages, ScriptedInput, StepSchedule,
    SteppedTimeSource, WindowOptions,
};
use tracing_subscriber::EnvFilter;

use crate::cli::{CheckArgs, Cli, Command, FractalArgs, LifeArgs, ProbeArgs, SimulateArgs};
use crate::paths::AppPaths;

const DEFAULT_FILTER: &str =
    "warn,computedemo=info,pipeline=info,kernels=info,naga=error,wgpu=error";

pub fn run(cli: Cli) -> Result<()> {
    initialise_tracing();

    let paths = AppPaths::discover()?;
    let config_path = cli
        .global
        .config
        .clone()
        .unwrap_or_else(|| paths.config_file());
    let config = DemoConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    tracing::debug!(
        config_dir = %paths.config_dir().display(),
        config = %config_path.display(),
        "resolved computedemo paths"
    );

    let settings = Settings::resolve(&config, &cli)?;
    let result = match cli.command {
        Command::Life(args) => {
            run_window(&settings, DemoKind::Life, &args, &FractalArgs::default())
        }
        Command::Mandelbrot(args) => {
            run_window(&settings, DemoKind::Mandelbrot, &LifeArgs::default(), &args)
        }
        Command::Waves => run_window(
            &settings,
            DemoKind::Waves,
            &LifeArgs::default(),
            &FractalArgs::default(),
        ),
        Command::Raytrace => run_window(
            &settings,
            DemoKind::Raytrace,
            &LifeArgs::default(),
            &FractalArgs::default(),
        ),
        Command::List => {
            list();
            Ok(())
        }
        Command::Check(args) => check(settings.tile, &args),
        Command::Probe(args) => probe(&args),
        Command::Simulate(args) => simulate(&settings, &args),
    };
    if let Err(err) = &result {
        if let Some(listing) = shader_listing(err) {
            eprintln!("shader source:\n{listing}");
        }
    }
    result
}

/// Numbered source of the stage behind a compile failure anywhere in the chain.
fn shader_listing(err: &anyhow::Error) -> Option<String> {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<PipelineError>())
        .find_map(PipelineError::source_listing)
}

fn initialise_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Configuration merged with command-line overrides.
struct Settings {
    config: DemoConfig,
    pacing: PacingPolicy,
    tile: u32,
    keys: KeyBindings,
}

impl Settings {
    fn resolve(config: &DemoConfig, cli: &Cli) -> Result<Self> {
        let pacing = match cli.global.pacing.unwrap_or(config.pacing) {
            Pacing::Vsync => PacingPolicy::Vsync,
            Pacing::Immediate => PacingPolicy::Immediate,
            Pacing::Capped(fps) => PacingPolicy::Capped { fps },
        };
        let keys = KeyBindings {
            quit: parse_key("quit", &config.keys.quit)?,
            pause: parse_key("pause", &config.keys.pause)?,
            reset: parse_key("reset", &config.keys.reset)?,
        };
        Ok(Self {
            config: config.clone(),
            pacing,
            tile: cli.global.tile.unwrap_or(config.dispatch.tile),
            keys,
        })
    }

    fn demo_options(
        &self,
        kind: DemoKind,
        life: &LifeArgs,
        fractal: &FractalArgs,
    ) -> DemoOptions {
        let config = &self.config;
        let mut options = DemoOptions::defaults(kind);
        options.tile = self.tile;
        options.camera = config.raytrace.camera;
        options.mandelbrot.max_iterations = fractal
            .iterations
            .unwrap_or(config.mandelbrot.max_iterations);
        options.size = match kind {
            DemoKind::Life => {
                let grid = life.grid.unwrap_or(config.life.grid);
                (grid, grid)
            }
            DemoKind::Mandelbrot => (config.mandelbrot.width, config.mandelbrot.height),
            DemoKind::Waves => (config.waves.width, config.waves.height),
            DemoKind::Raytrace => (config.raytrace.width, config.raytrace.height),
        };
        options.step = StepSchedule::new(
            life.interval.unwrap_or(config.life.step_interval),
            config.life.max_catch_up,
        );
        options.seeding = match life.pattern {
            Some(pattern) => Seeding::Pattern(pattern),
            None => Seeding::Random {
                seed: life.seed.or(config.life.seed),
                density: config.life.density,
            },
        };
        options
    }

    fn window_size(&self, kind: DemoKind, options: &DemoOptions) -> (u32, u32) {
        match kind {
            DemoKind::Life => {
                let cell = self.config.life.cell_size;
                (
                    options.size.0.saturating_mul(cell),
                    options.size.1.saturating_mul(cell),
                )
            }
            _ => options.size,
        }
    }
}

fn parse_key(action: &str, raw: &str) -> Result<Key> {
    Key::from_name(raw).with_context(|| format!("keys.{action}: unknown key '{raw}'"))
}

fn check_interval(life: &LifeArgs) -> Result<()> {
    if life.interval.is_some_and(|interval| interval.is_zero()) {
        bail!("--interval must be greater than zero");
    }
    Ok(())
}

fn run_window(
    settings: &Settings,
    kind: DemoKind,
    life: &LifeArgs,
    fractal: &FractalArgs,
) -> Result<()> {
    check_interval(life)?;
    let options = settings.demo_options(kind, life, fractal);
    let window = WindowOptions {
        title: format!("{} - {}", settings.config.window.title, kind.name()),
        size: settings.window_size(kind, &options),
        pacing: settings.pacing,
        visible: true,
    };
    if kind.is_stateful() {
        tracing::info!(
            "{}: pause/resume, {}: reset, {}: quit",
            settings.keys.pause,
            settings.keys.reset,
            settings.keys.quit
        );
    } else {
        tracing::info!("{}: quit", settings.keys.quit);
    }

    let summary = run_windowed(window, kind.loop_spec(&options), settings.keys.clone())
        .with_context(|| format!("{} demo failed", kind.name()))?;
    tracing::info!(
        demo = kind.name(),
        frames = summary.frames,
        generation = summary.generation,
        elapsed = ?summary.elapsed,
        "demo finished"
    );
    Ok(())
}

fn list() {
    for kind in DemoKind::ALL {
        let (width, height) = kind.default_size();
        println!(
            "{:<11} {:>4}x{:<4} {}",
            kind.name(),
            width,
            height,
            kind.description()
        );
    }
}

fn check(tile: u32, args: &CheckArgs) -> Result<()> {
    let mut programs: Vec<(String, ProgramStages)> = DemoKind::ALL
        .into_iter()
        .flat_map(|kind| kind.programs(tile))
        .collect();
    for path in &args.kernels {
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read kernel {}", path.display()))?;
        let label = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        programs.push((label, ProgramStages::compute(source)));
    }

    let mut failures = 0usize;
    for (label, stages) in programs {
        match link_program(&label, &stages) {
            Ok(linked) => {
                let slots = linked.interface.slots().len();
                match linked.local_size {
                    Some([x, y, z]) => {
                        println!("ok    {label:<20} compute {x}x{y}x{z}, {slots} slots")
                    }
                    None => println!("ok    {label:<20} raster, {slots} slots"),
                }
            }
            Err(err) => {
                failures += 1;
                println!("FAIL  {label:<20} {err}");
                tracing::error!(program = %label, error = %err, "program failed to link");
                if let Some(listing) = err.source_listing() {
                    eprintln!("{label} source:\n{listing}");
                }
            }
        }
    }
    if failures > 0 {
        bail!("{failures} program(s) failed to link");
    }
    Ok(())
}

fn probe(args: &ProbeArgs) -> Result<()> {
    let report = gpu::run_probe(args.output.as_deref()).context("GPU probe failed")?;
    println!(
        "adapter: {}\ndispatch: {}x{} groups of {}x{}\ntexels: {} checked, {} mismatched",
        report.adapter,
        report.groups.x,
        report.groups.y,
        gpu::PROBE_TILE,
        gpu::PROBE_TILE,
        report.texels,
        report.mismatched
    );
    if !report.passed() {
        bail!("probe found {} mismatched texels", report.mismatched);
    }
    Ok(())
}

fn simulate(settings: &Settings, args: &SimulateArgs) -> Result<()> {
    if !args.fps.is_finite() || args.fps <= 0.0 {
        bail!("--fps must be greater than zero");
    }
    check_interval(&args.life)?;
    let kind = args.demo;
    let mut options = settings.demo_options(kind, &args.life, &args.fractal);
    if let Some(size) = args.size {
        options.size = size;
    }

    let mut backend = kernels::software::backend();
    let frame_loop =
        FrameLoop::new(&mut backend, kind.loop_spec(&options), settings.keys.clone())
            .with_context(|| format!("failed to set up {}", kind.name()))?;
    let mut input = ScriptedInput::new().quit_after(args.frames);
    let mut time = SteppedTimeSource::from_fps(args.fps);
    let summary = frame_loop
        .run(&mut backend, &mut input, &mut time)
        .with_context(|| format!("{} simulation failed", kind.name()))?;

    match summary.generation {
        Some(generation) => println!(
            "{}: {} frames, generation {}, {:.2}s virtual",
            kind.name(),
            summary.frames,
            generation,
            summary.elapsed.as_secs_f32()
        ),
        None => println!(
            "{}: {} frames, {:.2}s virtual",
            kind.name(),
            summary.frames,
            summary.elapsed.as_secs_f32()
        ),
    }

    if let Some(path) = args.output.as_deref() {
        write_last_frame(&backend, path)?;
    }
    Ok(())
}

fn write_last_frame(backend: &pipeline::software::SoftwareBackend, path: &Path) -> Result<()> {
    let frame = backend
        .last_frame()
        .filter(|frame| !frame.texels.is_empty())
        .context("no frame was presented")?;
    let target = ImageTarget::new(frame.width, frame.height, ImageFormat::Rgba8Unorm);
    snapshot::save_png(path, &target, &encode_rgba8(&frame.texels))?;
    tracing::info!(path = %path.display(), "wrote last frame");
    Ok(())
}
