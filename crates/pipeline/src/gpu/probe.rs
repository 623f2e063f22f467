//! Device smoke test: one solid-fill dispatch over an 800x600 float image,
//! read back and checked texel by texel.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use super::backend::WgpuBackend;
use crate::dispatch::{ComputeDispatcher, ComputeKernel, WorkGroups};
use crate::linker::{link_program, ProgramStages};
use crate::resources::{ImageFormat, ImageTarget, ResourceSet};
use crate::snapshot;

pub const PROBE_WIDTH: u32 = 800;
pub const PROBE_HEIGHT: u32 = 600;
pub const PROBE_TILE: u32 = 16;

const FILL_KERNEL: &str = r#"#version 450
layout(local_size_x = 16, local_size_y = 16, local_size_z = 1) in;
layout(set = 0, binding = 0, rgba32f) uniform writeonly image2D uOutput;
void main() {
    ivec2 coord = ivec2(gl_GlobalInvocationID.xy);
    ivec2 size = imageSize(uOutput);
    if (coord.x >= size.x || coord.y >= size.y) {
        return;
    }
    imageStore(uOutput, coord, vec4(1.0, 0.0, 0.0, 1.0));
}
"#;

#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub adapter: String,
    pub groups: WorkGroups,
    pub texels: usize,
    pub mismatched: usize,
}

impl ProbeReport {
    pub fn passed(&self) -> bool {
        self.mismatched == 0
    }
}

/// Runs the probe on the default adapter, optionally writing the result as a
/// PNG.
pub fn run_probe(snapshot_path: Option<&Path>) -> Result<ProbeReport> {
    let mut backend = WgpuBackend::headless()?;
    let adapter = backend.context().adapter_profile().name.clone();

    let linked = link_program("probe", &ProgramStages::compute(FILL_KERNEL))?;
    let mut resources = ResourceSet::new();
    let program = resources.install_program(&mut backend, &linked)?;
    let target = ImageTarget::new(PROBE_WIDTH, PROBE_HEIGHT, ImageFormat::Rgba32Float);
    let output = resources.create_image(&mut backend, target)?;
    let kernel = ComputeKernel::new(&resources, program, PROBE_TILE, 0)?;

    let mut dispatcher = ComputeDispatcher::new();
    let groups = dispatcher.dispatch(&mut backend, &mut resources, &kernel, output, &[])?;
    let bytes = backend
        .read_image(output)
        .context("failed to read the probe image back")?;
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(bytemuck::pod_read_unaligned::<f32>)
        .collect();

    let expected = [1.0f32, 0.0, 0.0, 1.0];
    let mismatched = values
        .chunks_exact(4)
        .filter(|texel| *texel != expected.as_slice())
        .count();
    let report = ProbeReport {
        adapter,
        groups,
        texels: values.len() / 4,
        mismatched,
    };
    info!(
        adapter = %report.adapter,
        groups_x = groups.x,
        groups_y = groups.y,
        mismatched,
        "probe dispatch complete"
    );

    if let Some(path) = snapshot_path {
        snapshot::save_png(path, &target, &bytes)?;
        info!(path = %path.display(), "wrote probe snapshot");
    }

    resources.release_all(&mut backend);
    if report.texels != target.texel_count() {
        bail!(
            "probe read back {} texels, expected {}",
            report.texels,
            target.texel_count()
        );
    }
    Ok(report)
}
