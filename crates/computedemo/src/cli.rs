use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use democonfig::{Pacing, MAX_TILE};
use kernels::{DemoKind, Pattern};

#[derive(Parser, Debug)]
#[command(
    name = "computedemo",
    author,
    version,
    about = "Real-time GPU compute demos: life, mandelbrot, waves and a raytracer"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Configuration file; defaults to `config.toml` in the config directory.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Frame pacing: `vsync`, `immediate`, or a frame rate cap such as `30`.
    #[arg(long, global = true, value_name = "MODE", value_parser = parse_pacing)]
    pub pacing: Option<Pacing>,

    /// Workgroup edge length used by every compute kernel.
    #[arg(
        long,
        global = true,
        value_name = "N",
        value_parser = clap::value_parser!(u32).range(1..=MAX_TILE as i64)
    )]
    pub tile: Option<u32>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Conway's Game of Life. SPACE pauses, R reseeds, ESC quits.
    Life(LifeArgs),
    /// Static Mandelbrot render.
    Mandelbrot(FractalArgs),
    /// Animated wave interference pattern.
    Waves,
    /// Four-sphere raytracer with a bouncing centre sphere.
    Raytrace,
    /// List the available demos.
    List,
    /// Link every shader program offline and report failures.
    Check(CheckArgs),
    /// Headless GPU self-test: one fill dispatch read back and verified.
    Probe(ProbeArgs),
    /// Run a demo on the CPU backend with virtual time.
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Default, Clone)]
pub struct LifeArgs {
    /// Seed for the random soup; the same seed reproduces every reset.
    #[arg(long, value_name = "N")]
    pub seed: Option<u64>,

    /// Grid edge length in cells.
    #[arg(long, value_name = "N")]
    pub grid: Option<u32>,

    /// Time between generations (e.g. `100ms`).
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    pub interval: Option<Duration>,

    /// Start from a named pattern instead of a random soup.
    #[arg(long, value_name = "NAME")]
    pub pattern: Option<Pattern>,
}

#[derive(Args, Debug, Default, Clone)]
pub struct FractalArgs {
    /// Escape-time iteration limit.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub iterations: Option<u32>,
}

#[derive(Args, Debug, Default)]
pub struct CheckArgs {
    /// Extra compute kernel (GLSL 450) to link alongside the built-in programs.
    #[arg(long = "kernel", value_name = "PATH")]
    pub kernels: Vec<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub struct ProbeArgs {
    /// Write the probe image as PNG.
    #[arg(long, value_name = "PNG")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Demo to run.
    #[arg(value_name = "DEMO")]
    pub demo: DemoKind,

    /// Iterations to run before quitting.
    #[arg(long, value_name = "N", default_value_t = 60)]
    pub frames: u64,

    /// Virtual frame rate driving the clock.
    #[arg(long, value_name = "FPS", default_value_t = 60.0)]
    pub fps: f32,

    /// Override the output image size (e.g. `64x64`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<(u32, u32)>,

    /// Write the last presented frame as PNG.
    #[arg(long, value_name = "PNG")]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub life: LifeArgs,

    #[command(flatten)]
    pub fractal: FractalArgs,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_pacing(value: &str) -> Result<Pacing, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("pacing must not be empty".to_string());
    }
    match Pacing::parse(trimmed)? {
        Pacing::Capped(fps) if !fps.is_finite() || fps <= 0.0 => {
            Err(format!("frame rate cap must be > 0, got '{trimmed}'"))
        }
        pacing => Ok(pacing),
    }
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("invalid size '{value}'; expected WIDTHxHEIGHT"))?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width in '{value}'"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height in '{value}'"))?;
    if width == 0 || height == 0 {
        return Err(format!("size '{value}' must be non-zero"));
    }
    Ok((width, height))
}
