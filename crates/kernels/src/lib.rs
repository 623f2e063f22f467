//! The four demo kernels and everything needed to run them: GLSL sources,
//! uniform block layouts, CPU renditions for the software backend, life
//! seeders and the catalog that turns a [`DemoKind`] into a
//! [`LoopSpec`](pipeline::LoopSpec).

pub mod catalog;
pub mod params;
pub mod seed;
pub mod shaders;
pub mod software;

pub use catalog::{DemoKind, DemoOptions, Seeding, DEFAULT_TILE};
pub use params::{CameraEncoder, CameraParams, MandelbrotParams, TimeEncoder, TimeParams};
pub use seed::{Pattern, PatternSeeder, RandomSeeder};
