//! CPU backend.
//!
//! Runs compute programs as Rust closures registered under the program label,
//! one call per invocation of every work group, including the invocations that
//! fall outside the output image. It also models memory visibility: a dispatch
//! writes into a pending copy of its output that only becomes readable at the
//! barrier. Reading an image with pending writes is recorded as a hazard
//! instead of silently returning stale data.

use std::collections::HashMap;
use std::fmt;

use bytemuck::Pod;
use tracing::trace;

use crate::backend::GpuBackend;
use crate::dispatch::WorkGroups;
use crate::error::PipelineError;
use crate::linker::{LinkedProgram, ProgramKind};
use crate::resources::{
    Access, Binding, BoundResource, ImageFormat, ImageId, ImageTarget, ParamsId, ProgramId,
    QuadGeometry, ResourceHandle,
};

pub type Texel = [f32; 4];

type Kernel = Box<dyn Fn(&Invocation<'_>) -> Option<Texel>>;

enum InputView<'a> {
    Image {
        width: u32,
        height: u32,
        texels: &'a [Texel],
    },
    Params(&'a [u8]),
}

/// What a software kernel sees for one invocation.
pub struct Invocation<'a> {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    inputs: &'a [(u32, InputView<'a>)],
}

impl Invocation<'_> {
    /// Global invocation id along x.
    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    /// Dimensions of the output image.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn in_bounds(&self) -> bool {
        self.x < self.width && self.y < self.height
    }

    /// Texel fetch from the image bound at `slot`. Out-of-range coordinates
    /// read as zero.
    pub fn load(&self, slot: u32, x: i32, y: i32) -> Texel {
        match self.input(slot) {
            Some(InputView::Image {
                width,
                height,
                texels,
            }) => {
                if x < 0 || y < 0 || x as u32 >= *width || y as u32 >= *height {
                    return [0.0; 4];
                }
                texels[y as usize * *width as usize + x as usize]
            }
            _ => [0.0; 4],
        }
    }

    /// Parameter block bound at `slot`, or zeroes if it is missing or short.
    pub fn params<T: Pod>(&self, slot: u32) -> T {
        match self.input(slot) {
            Some(InputView::Params(bytes)) if bytes.len() >= std::mem::size_of::<T>() => {
                bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<T>()])
            }
            _ => T::zeroed(),
        }
    }

    fn input(&self, slot: u32) -> Option<&InputView<'_>> {
        self.inputs
            .iter()
            .find(|(bound, _)| *bound == slot)
            .map(|(_, view)| view)
    }
}

/// Operations recorded in issue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoftwareOp {
    Install(ProgramId),
    Allocate(ImageId),
    Upload(ImageId),
    WriteParams(ParamsId),
    Dispatch {
        program: ProgramId,
        output: ImageId,
        reads: Vec<ImageId>,
        groups: (u32, u32),
    },
    Barrier(ImageId),
    Draw(ImageId),
    Present,
    WaitIdle,
}

/// A read of an image whose latest writes were not yet behind a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hazard {
    pub image: ImageId,
    pub reader: ProgramId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresentedFrame {
    pub image: Option<ImageId>,
    pub width: u32,
    pub height: u32,
    pub texels: Vec<Texel>,
}

struct SoftwareImage {
    target: ImageTarget,
    visible: Vec<Texel>,
    pending: Option<Vec<Texel>>,
}

struct InstalledProgram {
    label: String,
    kind: ProgramKind,
}

#[derive(Default)]
pub struct SoftwareBackend {
    kernels: HashMap<String, Kernel>,
    programs: HashMap<ProgramId, InstalledProgram>,
    images: HashMap<ImageId, SoftwareImage>,
    params: HashMap<ParamsId, Vec<u8>>,
    quad: Option<QuadGeometry>,
    drawn: Option<ImageId>,
    last_frame: Option<PresentedFrame>,
    presents: u64,
    ops: Vec<SoftwareOp>,
    hazards: Vec<Hazard>,
    out_of_bounds_writes: u64,
    released: Vec<ResourceHandle>,
}

impl fmt::Debug for SoftwareBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareBackend")
            .field("kernels", &self.kernels.keys().collect::<Vec<_>>())
            .field("images", &self.images.len())
            .field("presents", &self.presents)
            .field("hazards", &self.hazards)
            .finish_non_exhaustive()
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the CPU rendition of the compute program labelled `label`.
    /// Returning `None` from the kernel means "no write".
    pub fn register_kernel<F>(&mut self, label: impl Into<String>, kernel: F)
    where
        F: Fn(&Invocation<'_>) -> Option<Texel> + 'static,
    {
        self.kernels.insert(label.into(), Box::new(kernel));
    }

    pub fn ops(&self) -> &[SoftwareOp] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    pub fn hazards(&self) -> &[Hazard] {
        &self.hazards
    }

    pub fn out_of_bounds_writes(&self) -> u64 {
        self.out_of_bounds_writes
    }

    pub fn released(&self) -> &[ResourceHandle] {
        &self.released
    }

    /// Visible contents of an image.
    pub fn texels(&self, id: ImageId) -> Option<&[Texel]> {
        self.images.get(&id).map(|image| image.visible.as_slice())
    }

    pub fn last_frame(&self) -> Option<&PresentedFrame> {
        self.last_frame.as_ref()
    }

    pub fn present_count(&self) -> u64 {
        self.presents
    }

    fn image(&self, id: ImageId) -> Result<&SoftwareImage, PipelineError> {
        self.images
            .get(&id)
            .ok_or_else(|| PipelineError::Device(format!("{id} is not allocated")))
    }

    fn note_read(&mut self, image: ImageId, reader: ProgramId) {
        let pending = self
            .images
            .get(&image)
            .is_some_and(|entry| entry.pending.is_some());
        if pending {
            self.hazards.push(Hazard { image, reader });
        }
    }
}

impl GpuBackend for SoftwareBackend {
    fn install_program(
        &mut self,
        id: ProgramId,
        program: &LinkedProgram,
    ) -> Result<(), PipelineError> {
        if program.kind == ProgramKind::Compute && !self.kernels.contains_key(&program.label) {
            return Err(PipelineError::ResourceCreation(format!(
                "no software kernel registered for '{}'",
                program.label
            )));
        }
        self.programs.insert(
            id,
            InstalledProgram {
                label: program.label.clone(),
                kind: program.kind,
            },
        );
        self.ops.push(SoftwareOp::Install(id));
        Ok(())
    }

    fn allocate_image(&mut self, id: ImageId, target: &ImageTarget) -> Result<(), PipelineError> {
        self.images.insert(
            id,
            SoftwareImage {
                target: *target,
                visible: vec![[0.0; 4]; target.texel_count()],
                pending: None,
            },
        );
        self.ops.push(SoftwareOp::Allocate(id));
        Ok(())
    }

    fn allocate_params(&mut self, id: ParamsId, size: usize) -> Result<(), PipelineError> {
        self.params.insert(id, vec![0; size]);
        Ok(())
    }

    fn allocate_quad(&mut self, quad: &QuadGeometry) -> Result<(), PipelineError> {
        self.quad = Some(quad.clone());
        Ok(())
    }

    fn release(&mut self, handle: ResourceHandle) {
        match handle {
            ResourceHandle::Program(id) => {
                self.programs.remove(&id);
            }
            ResourceHandle::Image(id) => {
                self.images.remove(&id);
            }
            ResourceHandle::Params(id) => {
                self.params.remove(&id);
            }
            ResourceHandle::Quad => self.quad = None,
        }
        self.released.push(handle);
    }

    fn upload_image(&mut self, id: ImageId, texels: &[u8]) -> Result<(), PipelineError> {
        let image = self
            .images
            .get_mut(&id)
            .ok_or_else(|| PipelineError::Device(format!("{id} is not allocated")))?;
        image.visible = decode_texels(image.target.format, texels);
        image.pending = None;
        self.ops.push(SoftwareOp::Upload(id));
        Ok(())
    }

    fn write_params(&mut self, id: ParamsId, bytes: &[u8]) -> Result<(), PipelineError> {
        let block = self
            .params
            .get_mut(&id)
            .ok_or_else(|| PipelineError::Device(format!("{id} is not allocated")))?;
        block[..bytes.len()].copy_from_slice(bytes);
        self.ops.push(SoftwareOp::WriteParams(id));
        Ok(())
    }

    fn dispatch(
        &mut self,
        program: ProgramId,
        groups: WorkGroups,
        bindings: &[Binding],
    ) -> Result<(), PipelineError> {
        let output = bindings
            .iter()
            .find(|binding| binding.access == Access::Write)
            .and_then(Binding::image)
            .ok_or_else(|| PipelineError::Device("dispatch without an output image".into()))?;
        let reads: Vec<ImageId> = bindings
            .iter()
            .filter(|binding| matches!(binding.access, Access::Read | Access::Sampled))
            .filter_map(Binding::image)
            .collect();
        for &image in &reads {
            self.note_read(image, program);
        }

        let label = self
            .programs
            .get(&program)
            .map(|installed| installed.label.as_str())
            .ok_or_else(|| PipelineError::Device(format!("{program} is not installed")))?;
        let kernel = self
            .kernels
            .get(label)
            .ok_or_else(|| PipelineError::Device(format!("no software kernel for '{label}'")))?;

        let mut inputs = Vec::new();
        for binding in bindings {
            match (binding.access, binding.resource) {
                (Access::Read | Access::Sampled, BoundResource::Image(id)) => {
                    let image = self.image(id)?;
                    inputs.push((
                        binding.slot,
                        InputView::Image {
                            width: image.target.width,
                            height: image.target.height,
                            texels: &image.visible,
                        },
                    ));
                }
                (Access::Uniform, BoundResource::Params(id)) => {
                    let bytes = self
                        .params
                        .get(&id)
                        .ok_or_else(|| PipelineError::Device(format!("{id} is not allocated")))?;
                    inputs.push((binding.slot, InputView::Params(bytes)));
                }
                _ => {}
            }
        }

        let target_image = self.image(output)?;
        let target = target_image.target;
        let mut written = target_image
            .pending
            .clone()
            .unwrap_or_else(|| target_image.visible.clone());
        let mut out_of_bounds = 0;

        let (span_x, span_y) = groups.invocations();
        for y in 0..span_y {
            for x in 0..span_x {
                let invocation = Invocation {
                    x,
                    y,
                    width: target.width,
                    height: target.height,
                    inputs: &inputs,
                };
                let Some(texel) = kernel(&invocation) else {
                    continue;
                };
                if x >= target.width || y >= target.height {
                    out_of_bounds += 1;
                    continue;
                }
                written[y as usize * target.width as usize + x as usize] =
                    store_texel(target.format, texel);
            }
        }
        drop(inputs);

        self.out_of_bounds_writes += out_of_bounds;
        if let Some(image) = self.images.get_mut(&output) {
            image.pending = Some(written);
        }
        self.ops.push(SoftwareOp::Dispatch {
            program,
            output,
            reads,
            groups: (groups.x, groups.y),
        });
        Ok(())
    }

    fn barrier(&mut self, image: ImageId) -> Result<(), PipelineError> {
        let entry = self
            .images
            .get_mut(&image)
            .ok_or_else(|| PipelineError::Device(format!("{image} is not allocated")))?;
        if let Some(pending) = entry.pending.take() {
            entry.visible = pending;
        }
        self.ops.push(SoftwareOp::Barrier(image));
        Ok(())
    }

    fn draw(&mut self, program: ProgramId, bindings: &[Binding]) -> Result<(), PipelineError> {
        if self.quad.is_none() {
            return Err(PipelineError::Device(
                "draw issued before the quad was allocated".into(),
            ));
        }
        let kind = self.programs.get(&program).map(|installed| installed.kind);
        if kind != Some(ProgramKind::Raster) {
            return Err(PipelineError::Device(format!("{program} is not a raster program")));
        }
        let image = bindings
            .iter()
            .find(|binding| binding.access == Access::Sampled)
            .and_then(Binding::image)
            .ok_or_else(|| PipelineError::Device("draw without a sampled image".into()))?;
        self.image(image)?;
        self.note_read(image, program);
        self.drawn = Some(image);
        self.ops.push(SoftwareOp::Draw(image));
        Ok(())
    }

    fn present(&mut self) -> Result<(), PipelineError> {
        let frame = match self.drawn.take() {
            Some(id) => {
                let image = self.image(id)?;
                PresentedFrame {
                    image: Some(id),
                    width: image.target.width,
                    height: image.target.height,
                    texels: image.visible.clone(),
                }
            }
            None => PresentedFrame {
                image: None,
                width: 0,
                height: 0,
                texels: Vec::new(),
            },
        };
        self.last_frame = Some(frame);
        self.presents += 1;
        self.ops.push(SoftwareOp::Present);
        trace!(presents = self.presents, "software present");
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<(), PipelineError> {
        self.ops.push(SoftwareOp::WaitIdle);
        Ok(())
    }
}

fn decode_texels(format: ImageFormat, bytes: &[u8]) -> Vec<Texel> {
    match format {
        ImageFormat::Rgba8Unorm => bytes
            .chunks_exact(4)
            .map(|px| {
                [
                    px[0] as f32 / 255.0,
                    px[1] as f32 / 255.0,
                    px[2] as f32 / 255.0,
                    px[3] as f32 / 255.0,
                ]
            })
            .collect(),
        ImageFormat::Rgba32Float => bytes
            .chunks_exact(16)
            .map(bytemuck::pod_read_unaligned::<Texel>)
            .collect(),
    }
}

fn store_texel(format: ImageFormat, texel: Texel) -> Texel {
    match format {
        ImageFormat::Rgba8Unorm => {
            texel.map(|channel| (channel.clamp(0.0, 1.0) * 255.0).round() / 255.0)
        }
        ImageFormat::Rgba32Float => texel,
    }
}

/// Converts texels to 8-bit RGBA, clamping each channel to `[0, 1]`.
pub fn encode_rgba8(texels: &[Texel]) -> Vec<u8> {
    texels
        .iter()
        .flat_map(|texel| texel.map(|channel| (channel.clamp(0.0, 1.0) * 255.0).round() as u8))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{ComputeDispatcher, ComputeKernel};
    use crate::linker::{link_program, ProgramStages};
    use crate::resources::ResourceSet;

    const FILL: &str = r#"#version 450
layout(local_size_x = 4, local_size_y = 4, local_size_z = 1) in;
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

    fn fill_setup(guarded: bool) -> (SoftwareBackend, ResourceSet, ComputeKernel, ImageId) {
        let mut backend = SoftwareBackend::new();
        backend.register_kernel("fill", move |inv| {
            if guarded && !inv.in_bounds() {
                return None;
            }
            Some([1.0, 0.0, 0.0, 1.0])
        });
        let mut resources = ResourceSet::new();
        let linked = link_program("fill", &ProgramStages::compute(FILL)).expect("links");
        let program = resources.install_program(&mut backend, &linked).expect("install");
        let kernel = ComputeKernel::new(&resources, program, 4, 0).expect("kernel");
        let image = resources
            .create_image(&mut backend, ImageTarget::new(6, 5, ImageFormat::Rgba32Float))
            .expect("image");
        (backend, resources, kernel, image)
    }

    #[test]
    fn images_start_zeroed() {
        let (backend, _, _, image) = fill_setup(true);
        let texels = backend.texels(image).expect("allocated");
        assert_eq!(texels.len(), 30);
        assert!(texels.iter().all(|texel| *texel == [0.0; 4]));
    }

    #[test]
    fn dispatch_covers_partial_tiles_and_barrier_publishes() {
        let (mut backend, mut resources, kernel, image) = fill_setup(true);
        let mut dispatcher = ComputeDispatcher::new();
        let groups = dispatcher
            .dispatch(&mut backend, &mut resources, &kernel, image, &[])
            .expect("dispatch");
        assert_eq!((groups.x, groups.y), (2, 2));
        assert!(backend
            .texels(image)
            .expect("allocated")
            .iter()
            .all(|texel| *texel == [1.0, 0.0, 0.0, 1.0]));
        assert_eq!(backend.out_of_bounds_writes(), 0);
        assert!(matches!(
            backend.ops().last(),
            Some(SoftwareOp::Barrier(id)) if *id == image
        ));
    }

    #[test]
    fn unguarded_kernels_are_caught_writing_out_of_bounds() {
        let (mut backend, mut resources, kernel, image) = fill_setup(false);
        ComputeDispatcher::new()
            .dispatch(&mut backend, &mut resources, &kernel, image, &[])
            .expect("dispatch");
        // 8x8 invocations against a 6x5 image.
        assert_eq!(backend.out_of_bounds_writes(), 64 - 30);
    }

    #[test]
    fn writes_stay_invisible_until_the_barrier() {
        let (mut backend, mut resources, kernel, image) = fill_setup(true);
        let bindings = [Binding::write(0, image)];
        resources
            .validate_bindings(kernel.program(), &bindings)
            .expect("valid");
        backend
            .dispatch(kernel.program(), WorkGroups::cover(6, 5, 4), &bindings)
            .expect("dispatch");
        assert!(backend
            .texels(image)
            .expect("allocated")
            .iter()
            .all(|texel| *texel == [0.0; 4]));
        backend.barrier(image).expect("barrier");
        assert_eq!(backend.texels(image).expect("allocated")[0], [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn rgba8_uploads_and_stores_are_quantized() {
        let texels = decode_texels(ImageFormat::Rgba8Unorm, &[255, 0, 128, 255]);
        assert_eq!(texels[0][0], 1.0);
        assert!((texels[0][2] - 128.0 / 255.0).abs() < 1e-6);
        let stored = store_texel(ImageFormat::Rgba8Unorm, [0.2, -1.0, 2.0, 1.0]);
        assert!((stored[0] - 51.0 / 255.0).abs() < 1e-6);
        assert_eq!(stored[1], 0.0);
        assert_eq!(stored[2], 1.0);
        assert_eq!(encode_rgba8(&[[1.0, 0.5, 0.0, 1.0]]), vec![255, 128, 0, 255]);
    }

    #[test]
    fn install_requires_a_registered_kernel() {
        let mut backend = SoftwareBackend::new();
        let mut resources = ResourceSet::new();
        let linked = link_program("fill", &ProgramStages::compute(FILL)).expect("links");
        let err = resources.install_program(&mut backend, &linked).unwrap_err();
        assert!(matches!(err, PipelineError::ResourceCreation(_)));
    }
}
