//! Initial states for the life simulation.

use std::fmt;
use std::str::FromStr;

use pipeline::{ImageFormat, ImageTarget, Seeder};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Packs a cell grid into `target`'s format: live cells are white, dead cells
/// black, alpha is always opaque.
pub fn encode_cells(target: &ImageTarget, mut alive: impl FnMut(u32, u32) -> bool) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(target.byte_len());
    for y in 0..target.height {
        for x in 0..target.width {
            let on = alive(x, y);
            match target.format {
                ImageFormat::Rgba8Unorm => {
                    let value = if on { 255 } else { 0 };
                    bytes.extend_from_slice(&[value, value, value, 255]);
                }
                ImageFormat::Rgba32Float => {
                    let value = if on { 1.0f32 } else { 0.0 };
                    bytes.extend_from_slice(bytemuck::bytes_of(&[value, value, value, 1.0]));
                }
            }
        }
    }
    bytes
}

/// Uniform random soup. A fixed seed reproduces the same soup on every reset;
/// without one each reset draws a fresh one.
#[derive(Debug, Clone)]
pub struct RandomSeeder {
    rng: StdRng,
    density: f64,
}

impl RandomSeeder {
    pub fn new(seed: Option<u64>, density: f64) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            density: density.clamp(0.0, 1.0),
        }
    }

    pub fn density(&self) -> f64 {
        self.density
    }
}

impl Seeder for RandomSeeder {
    fn seed(&mut self, target: &ImageTarget) -> Vec<u8> {
        let density = self.density;
        let rng = &mut self.rng;
        let bytes = encode_cells(target, |_, _| rng.gen_bool(density));
        debug!(density, width = target.width, height = target.height, "seeded random soup");
        bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Blinker,
    Glider,
    Block,
}

impl Pattern {
    pub const ALL: [Pattern; 3] = [Pattern::Blinker, Pattern::Glider, Pattern::Block];

    pub fn name(self) -> &'static str {
        match self {
            Self::Blinker => "blinker",
            Self::Glider => "glider",
            Self::Block => "block",
        }
    }

    /// Live cells relative to the pattern's anchor.
    fn cells(self) -> &'static [(i32, i32)] {
        match self {
            Self::Blinker => &[(-1, 0), (0, 0), (1, 0)],
            Self::Glider => &[(0, 1), (1, 0), (-1, -1), (0, -1), (1, -1)],
            Self::Block => &[(0, 0), (1, 0), (0, 1), (1, 1)],
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Pattern {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|pattern| pattern.name() == normalized)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|pattern| pattern.name()).collect();
                format!("unknown pattern '{value}' (expected one of {})", known.join(", "))
            })
    }
}

/// A single named pattern anchored at the grid centre, wrapped onto the torus.
#[derive(Debug, Clone, Copy)]
pub struct PatternSeeder {
    pattern: Pattern,
}

impl PatternSeeder {
    pub fn new(pattern: Pattern) -> Self {
        Self { pattern }
    }
}

impl Seeder for PatternSeeder {
    fn seed(&mut self, target: &ImageTarget) -> Vec<u8> {
        let (width, height) = (target.width as i32, target.height as i32);
        let (cx, cy) = (width / 2, height / 2);
        let live: Vec<(u32, u32)> = self
            .pattern
            .cells()
            .iter()
            .map(|&(dx, dy)| {
                (
                    (cx + dx).rem_euclid(width) as u32,
                    (cy + dy).rem_euclid(height) as u32,
                )
            })
            .collect();
        encode_cells(target, |x, y| live.contains(&(x, y)))
    }
}
