//! Resource Set: the registry of every GPU object a demo owns.
//!
//! Allocation itself is delegated to a [`GpuBackend`]; the set hands out ids,
//! remembers acquisition order so teardown can run in reverse, checks binding
//! lists against a program's reflected interface, and tracks which images hold
//! writes that have not yet been made visible by a barrier.

use std::collections::BTreeSet;
use std::fmt;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, trace};

use crate::backend::GpuBackend;
use crate::error::PipelineError;
use crate::linker::{LinkedProgram, ProgramInterface, ProgramKind, SlotKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// 4x8-bit normalized.
    Rgba8Unorm,
    /// 4x32-bit float.
    Rgba32Float,
}

impl ImageFormat {
    pub fn bytes_per_texel(self) -> usize {
        match self {
            Self::Rgba8Unorm => 4,
            Self::Rgba32Float => 16,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rgba8Unorm => "rgba8unorm",
            Self::Rgba32Float => "rgba32float",
        }
    }
}

/// Fixed-size 2D pixel buffer description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTarget {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

impl ImageTarget {
    pub fn new(width: u32, height: u32, format: ImageFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn byte_len(&self) -> usize {
        self.texel_count() * self.format.bytes_per_texel()
    }
}

macro_rules! resource_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

resource_id!(ProgramId, "program");
resource_id!(ImageId, "image");
resource_id!(ParamsId, "params");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    Program(ProgramId),
    Image(ImageId),
    Params(ParamsId),
    Quad,
}

/// Capability a binding grants to the program it is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Storage image written by a compute kernel.
    Write,
    /// Image read texel by texel (no filtering).
    Read,
    /// Image sampled through the display sampler.
    Sampled,
    /// Small parameter block.
    Uniform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundResource {
    Image(ImageId),
    Params(ParamsId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub slot: u32,
    pub resource: BoundResource,
    pub access: Access,
}

impl Binding {
    pub fn write(slot: u32, image: ImageId) -> Self {
        Self {
            slot,
            resource: BoundResource::Image(image),
            access: Access::Write,
        }
    }

    pub fn read(slot: u32, image: ImageId) -> Self {
        Self {
            slot,
            resource: BoundResource::Image(image),
            access: Access::Read,
        }
    }

    pub fn sampled(slot: u32, image: ImageId) -> Self {
        Self {
            slot,
            resource: BoundResource::Image(image),
            access: Access::Sampled,
        }
    }

    pub fn uniform(slot: u32, params: ParamsId) -> Self {
        Self {
            slot,
            resource: BoundResource::Params(params),
            access: Access::Uniform,
        }
    }

    pub fn image(&self) -> Option<ImageId> {
        match self.resource {
            BoundResource::Image(id) => Some(id),
            BoundResource::Params(_) => None,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

/// Full-viewport quad; `uv = position * 0.5 + 0.5`, so texel row 0 lands at the
/// bottom of the viewport.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadGeometry {
    pub vertices: [QuadVertex; 4],
    pub indices: [u16; 6],
}

impl QuadGeometry {
    pub fn fullscreen() -> Self {
        let corner = |x: f32, y: f32| QuadVertex {
            position: [x, y],
            uv: [x * 0.5 + 0.5, y * 0.5 + 0.5],
        };
        Self {
            vertices: [
                corner(-1.0, -1.0),
                corner(1.0, -1.0),
                corner(1.0, 1.0),
                corner(-1.0, 1.0),
            ],
            indices: [0, 1, 2, 2, 3, 0],
        }
    }
}

#[derive(Debug, Clone)]
struct ProgramEntry {
    label: String,
    kind: ProgramKind,
    interface: ProgramInterface,
    local_size: Option<[u32; 3]>,
}

#[derive(Debug, Clone)]
struct ParamsEntry {
    label: String,
    size: usize,
}

#[derive(Debug, Default)]
pub struct ResourceSet {
    programs: Vec<Option<ProgramEntry>>,
    images: Vec<Option<ImageTarget>>,
    params: Vec<Option<ParamsEntry>>,
    quad: Option<QuadGeometry>,
    acquired: Vec<ResourceHandle>,
    unflushed: BTreeSet<ImageId>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install_program<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        program: &LinkedProgram,
    ) -> Result<ProgramId, PipelineError> {
        let id = ProgramId(self.programs.len() as u32);
        backend.install_program(id, program)?;
        self.programs.push(Some(ProgramEntry {
            label: program.label.clone(),
            kind: program.kind,
            interface: program.interface.clone(),
            local_size: program.local_size,
        }));
        self.acquired.push(ResourceHandle::Program(id));
        debug!(%id, label = %program.label, "installed program");
        Ok(id)
    }

    /// Allocates a zero-initialized image.
    pub fn create_image<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        target: ImageTarget,
    ) -> Result<ImageId, PipelineError> {
        if target.width == 0 || target.height == 0 {
            return Err(PipelineError::ResourceCreation(format!(
                "image dimensions must be non-zero (got {}x{})",
                target.width, target.height
            )));
        }
        let id = ImageId(self.images.len() as u32);
        backend.allocate_image(id, &target)?;
        self.images.push(Some(target));
        self.acquired.push(ResourceHandle::Image(id));
        debug!(
            %id,
            width = target.width,
            height = target.height,
            format = target.format.as_str(),
            "allocated image"
        );
        Ok(id)
    }

    pub fn create_params<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        label: &str,
        size: usize,
    ) -> Result<ParamsId, PipelineError> {
        if size == 0 {
            return Err(PipelineError::ResourceCreation(format!(
                "parameter block '{label}' must not be empty"
            )));
        }
        let id = ParamsId(self.params.len() as u32);
        backend.allocate_params(id, size)?;
        self.params.push(Some(ParamsEntry {
            label: label.to_string(),
            size,
        }));
        self.acquired.push(ResourceHandle::Params(id));
        debug!(%id, label, size, "allocated parameter block");
        Ok(id)
    }

    pub fn create_quad<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
    ) -> Result<(), PipelineError> {
        if self.quad.is_some() {
            return Ok(());
        }
        let quad = QuadGeometry::fullscreen();
        backend.allocate_quad(&quad)?;
        self.quad = Some(quad);
        self.acquired.push(ResourceHandle::Quad);
        Ok(())
    }

    /// Replaces an image's contents from the host.
    pub fn upload_image<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        id: ImageId,
        texels: &[u8],
    ) -> Result<(), PipelineError> {
        let target = self.image_or_err(id)?;
        if texels.len() != target.byte_len() {
            return Err(PipelineError::ResourceCreation(format!(
                "upload to {id} has {} bytes, expected {}",
                texels.len(),
                target.byte_len()
            )));
        }
        backend.upload_image(id, texels)?;
        self.unflushed.remove(&id);
        Ok(())
    }

    pub fn update_params<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        id: ParamsId,
        bytes: &[u8],
    ) -> Result<(), PipelineError> {
        let entry = self
            .params
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| PipelineError::Binding(format!("{id} is not allocated")))?;
        if bytes.len() > entry.size {
            return Err(PipelineError::Binding(format!(
                "parameter block '{}' holds {} bytes, got {}",
                entry.label,
                entry.size,
                bytes.len()
            )));
        }
        backend.write_params(id, bytes)
    }

    pub fn image(&self, id: ImageId) -> Option<&ImageTarget> {
        self.images.get(id.index()).and_then(Option::as_ref)
    }

    pub fn program_local_size(&self, id: ProgramId) -> Option<[u32; 3]> {
        self.program(id).and_then(|entry| entry.local_size)
    }

    pub fn program_kind(&self, id: ProgramId) -> Option<ProgramKind> {
        self.program(id).map(|entry| entry.kind)
    }

    pub fn has_quad(&self) -> bool {
        self.quad.is_some()
    }

    pub fn acquisition_order(&self) -> &[ResourceHandle] {
        &self.acquired
    }

    /// Checks a binding list against the program's reflected interface.
    ///
    /// Every non-sampler slot must be bound exactly once with a matching
    /// capability; an image may not be bound for writing and reading at the
    /// same time; images with unflushed writes may not be read.
    pub fn validate_bindings(
        &self,
        program: ProgramId,
        bindings: &[Binding],
    ) -> Result<(), PipelineError> {
        let entry = self
            .program(program)
            .ok_or_else(|| PipelineError::Binding(format!("{program} is not installed")))?;
        let label = &entry.label;

        for (index, binding) in bindings.iter().enumerate() {
            if bindings[..index].iter().any(|other| other.slot == binding.slot) {
                return Err(PipelineError::Binding(format!(
                    "'{label}': slot {} bound more than once",
                    binding.slot
                )));
            }

            let slot = entry.interface.slot(binding.slot).ok_or_else(|| {
                PipelineError::Binding(format!(
                    "'{label}' declares no resource at slot {}",
                    binding.slot
                ))
            })?;

            match (binding.access, binding.resource, slot.kind) {
                (
                    Access::Write,
                    BoundResource::Image(image),
                    SlotKind::StorageImage {
                        format,
                        writable: true,
                    },
                ) => {
                    let target = self.image_or_err(image)?;
                    if target.format != format {
                        return Err(PipelineError::Binding(format!(
                            "'{label}' slot {} expects {} but {image} is {}",
                            binding.slot,
                            format.as_str(),
                            target.format.as_str()
                        )));
                    }
                    let aliased = bindings.iter().any(|other| {
                        other.access != Access::Write && other.image() == Some(image)
                    });
                    if aliased {
                        return Err(PipelineError::Binding(format!(
                            "'{label}': {image} is bound for writing and reading in one pass"
                        )));
                    }
                }
                (
                    Access::Read | Access::Sampled,
                    BoundResource::Image(image),
                    SlotKind::Texture,
                ) => {
                    self.image_or_err(image)?;
                    if self.unflushed.contains(&image) {
                        return Err(PipelineError::Binding(format!(
                            "'{label}' reads {image} before a barrier made its writes visible"
                        )));
                    }
                }
                (Access::Uniform, BoundResource::Params(params), SlotKind::Uniform { size }) => {
                    let block = self
                        .params
                        .get(params.index())
                        .and_then(Option::as_ref)
                        .ok_or_else(|| {
                            PipelineError::Binding(format!("{params} is not allocated"))
                        })?;
                    if block.size < size as usize {
                        return Err(PipelineError::Binding(format!(
                            "'{label}' slot {} needs {size} bytes but '{}' holds {}",
                            binding.slot, block.label, block.size
                        )));
                    }
                }
                (access, _, kind) => {
                    return Err(PipelineError::Binding(format!(
                        "'{label}' slot {} is {kind:?}; cannot bind it with {access:?} access",
                        binding.slot
                    )));
                }
            }
        }

        for slot in entry.interface.slots() {
            if slot.kind == SlotKind::Sampler {
                continue;
            }
            if !bindings.iter().any(|binding| binding.slot == slot.binding) {
                return Err(PipelineError::Binding(format!(
                    "'{label}' slot {} ({}) is not bound",
                    slot.binding,
                    slot.name.as_deref().unwrap_or("unnamed")
                )));
            }
        }

        Ok(())
    }

    pub(crate) fn mark_written(&mut self, image: ImageId) {
        self.unflushed.insert(image);
    }

    pub(crate) fn mark_visible(&mut self, image: ImageId) {
        self.unflushed.remove(&image);
    }

    /// Releases every resource in reverse acquisition order.
    pub fn release_all<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        while let Some(handle) = self.acquired.pop() {
            backend.release(handle);
            match handle {
                ResourceHandle::Program(id) => {
                    if let Some(slot) = self.programs.get_mut(id.index()) {
                        *slot = None;
                    }
                }
                ResourceHandle::Image(id) => {
                    if let Some(slot) = self.images.get_mut(id.index()) {
                        *slot = None;
                    }
                    self.unflushed.remove(&id);
                }
                ResourceHandle::Params(id) => {
                    if let Some(slot) = self.params.get_mut(id.index()) {
                        *slot = None;
                    }
                }
                ResourceHandle::Quad => self.quad = None,
            }
            trace!(?handle, "released resource");
        }
    }

    fn program(&self, id: ProgramId) -> Option<&ProgramEntry> {
        self.programs.get(id.index()).and_then(Option::as_ref)
    }

    fn image_or_err(&self, id: ImageId) -> Result<&ImageTarget, PipelineError> {
        self.image(id)
            .ok_or_else(|| PipelineError::Binding(format!("{id} is not allocated")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linker::{link_program, ProgramStages};
    use crate::software::SoftwareBackend;

    const PROGRAM: &str = r#"#version 450
layout(local_size_x = 8, local_size_y = 8, local_size_z = 1) in;
layout(set = 0, binding = 0, rgba8) uniform writeonly image2D uOutput;
layout(set = 0, binding = 1) uniform texture2D uInput;
layout(set = 0, binding = 2) uniform sampler uInputSampler;
void main() {
    ivec2 coord = ivec2(gl_GlobalInvocationID.xy);
    ivec2 size = imageSize(uOutput);
    if (coord.x >= size.x || coord.y >= size.y) {
        return;
    }
    imageStore(uOutput, coord, texelFetch(sampler2D(uInput, uInputSampler), coord, 0));
}
"#;

    fn setup() -> (SoftwareBackend, ResourceSet, ProgramId, ImageId, ImageId) {
        let mut backend = SoftwareBackend::new();
        let mut resources = ResourceSet::new();
        let linked = link_program("copy", &ProgramStages::compute(PROGRAM)).expect("links");
        backend.register_kernel("copy", |inv| Some(inv.load(1, inv.x() as i32, inv.y() as i32)));
        let program = resources.install_program(&mut backend, &linked).expect("install");
        let target = ImageTarget::new(4, 4, ImageFormat::Rgba8Unorm);
        let a = resources.create_image(&mut backend, target).expect("a");
        let b = resources.create_image(&mut backend, target).expect("b");
        (backend, resources, program, a, b)
    }

    #[test]
    fn quad_covers_viewport_with_two_triangles() {
        let quad = QuadGeometry::fullscreen();
        assert_eq!(quad.indices, [0, 1, 2, 2, 3, 0]);
        assert_eq!(quad.vertices[0].uv, [0.0, 0.0]);
        assert_eq!(quad.vertices[2].uv, [1.0, 1.0]);
        assert_eq!(std::mem::size_of::<QuadVertex>(), 16);
    }

    #[test]
    fn rejects_zero_sized_images() {
        let (mut backend, mut resources, ..) = setup();
        let err = resources
            .create_image(&mut backend, ImageTarget::new(0, 4, ImageFormat::Rgba8Unorm))
            .unwrap_err();
        assert!(matches!(err, PipelineError::ResourceCreation(_)));
    }

    #[test]
    fn accepts_matching_bindings() {
        let (_, resources, program, a, b) = setup();
        resources
            .validate_bindings(program, &[Binding::write(0, b), Binding::read(1, a)])
            .expect("valid bindings");
    }

    #[test]
    fn rejects_wrong_capability_and_missing_slot() {
        let (_, resources, program, a, b) = setup();
        let err = resources
            .validate_bindings(program, &[Binding::read(0, b), Binding::read(1, a)])
            .unwrap_err();
        assert!(matches!(err, PipelineError::Binding(_)));

        let err = resources
            .validate_bindings(program, &[Binding::write(0, b)])
            .unwrap_err();
        assert!(err.to_string().contains("not bound"), "{err}");
    }

    #[test]
    fn rejects_reading_and_writing_one_image() {
        let (_, resources, program, a, _) = setup();
        let err = resources
            .validate_bindings(program, &[Binding::write(0, a), Binding::read(1, a)])
            .unwrap_err();
        assert!(err.to_string().contains("writing and reading"), "{err}");
    }

    #[test]
    fn rejects_reads_of_unflushed_images() {
        let (_, mut resources, program, a, b) = setup();
        resources.mark_written(a);
        let err = resources
            .validate_bindings(program, &[Binding::write(0, b), Binding::read(1, a)])
            .unwrap_err();
        assert!(err.to_string().contains("before a barrier"), "{err}");
        resources.mark_visible(a);
        assert!(resources
            .validate_bindings(program, &[Binding::write(0, b), Binding::read(1, a)])
            .is_ok());
    }

    #[test]
    fn upload_checks_length() {
        let (mut backend, mut resources, _, a, _) = setup();
        let err = resources.upload_image(&mut backend, a, &[0; 3]).unwrap_err();
        assert!(matches!(err, PipelineError::ResourceCreation(_)));
        resources
            .upload_image(&mut backend, a, &[255; 64])
            .expect("exact upload");
    }

    #[test]
    fn releases_in_reverse_acquisition_order() {
        let (mut backend, mut resources, program, a, b) = setup();
        resources.create_quad(&mut backend).expect("quad");
        let expected: Vec<_> = vec![
            ResourceHandle::Quad,
            ResourceHandle::Image(b),
            ResourceHandle::Image(a),
            ResourceHandle::Program(program),
        ];
        resources.release_all(&mut backend);
        assert_eq!(backend.released(), expected.as_slice());
        assert!(resources.acquisition_order().is_empty());
        assert!(resources.image(a).is_none());
    }
}
