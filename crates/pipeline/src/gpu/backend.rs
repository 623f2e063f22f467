use std::borrow::Cow;
use std::collections::HashMap;
use std::num::NonZeroU64;

use tracing::{debug, error, trace, warn};
use wgpu::util::DeviceExt;

use super::context::GpuContext;
use crate::backend::GpuBackend;
use crate::dispatch::WorkGroups;
use crate::error::PipelineError;
use crate::linker::{LinkedProgram, ProgramInterface, ProgramKind, SlotKind, StageKind};
use crate::resources::{
    Binding, BoundResource, ImageFormat, ImageId, ImageTarget, ParamsId, ProgramId,
    QuadGeometry, QuadVertex, ResourceHandle,
};

const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const UNIFORM_ALIGNMENT: usize = 16;

enum Pipeline {
    Compute(wgpu::ComputePipeline),
    Raster(wgpu::RenderPipeline),
}

struct GpuProgram {
    label: String,
    pipeline: Pipeline,
    layout: wgpu::BindGroupLayout,
    interface: ProgramInterface,
}

struct GpuImage {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    target: ImageTarget,
}

struct QuadBuffers {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

struct Offscreen {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: (u32, u32),
}

/// Frame being recorded: the command encoder plus the surface texture the
/// draw goes to, if one was acquired.
#[derive(Default)]
struct FrameRecording {
    encoder: Option<wgpu::CommandEncoder>,
    surface_texture: Option<wgpu::SurfaceTexture>,
}

/// [`GpuBackend`] on top of `wgpu`.
///
/// Commands are recorded into one encoder that is submitted at present,
/// before host uploads, and on [`wait_idle`](GpuBackend::wait_idle). Every
/// dispatch gets its own compute pass; `wgpu` orders a storage write in one
/// pass before sampled reads in later passes, so the explicit barrier only
/// has to end the pass.
pub struct WgpuBackend {
    context: GpuContext,
    sampler: wgpu::Sampler,
    programs: HashMap<ProgramId, GpuProgram>,
    images: HashMap<ImageId, GpuImage>,
    params: HashMap<ParamsId, wgpu::Buffer>,
    quad: Option<QuadBuffers>,
    offscreen: Option<Offscreen>,
    recording: FrameRecording,
    presented: u64,
    skipped: u64,
}

impl WgpuBackend {
    pub fn new(context: GpuContext) -> Self {
        context.device.on_uncaptured_error(Box::new(|err| {
            error!(error = %err, "uncaptured wgpu error");
        }));
        let sampler = context.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("image sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        Self {
            context,
            sampler,
            programs: HashMap::new(),
            images: HashMap::new(),
            params: HashMap::new(),
            quad: None,
            offscreen: None,
            recording: FrameRecording::default(),
            presented: 0,
            skipped: 0,
        }
    }

    pub fn headless() -> anyhow::Result<Self> {
        Ok(Self::new(GpuContext::headless()?))
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.context.resize(width, height);
    }

    pub fn presented_frames(&self) -> u64 {
        self.presented
    }

    /// Frames dropped because no surface texture could be acquired.
    pub fn skipped_frames(&self) -> u64 {
        self.skipped
    }

    /// Copies an image back to the host, tightly packed in its format.
    /// Waits for every command recorded so far.
    pub fn read_image(&mut self, id: ImageId) -> Result<Vec<u8>, PipelineError> {
        self.flush();
        let image = self.image(id)?;
        let target = image.target;
        let row_bytes = target.width as usize * target.format.bytes_per_texel();
        let alignment = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize;
        let padded_row = row_bytes.div_ceil(alignment) * alignment;

        let staging = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size: (padded_row * target.height as usize) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &image.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row as u32),
                    rows_per_image: Some(target.height),
                },
            },
            extent(&target),
        );
        self.context.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.context
            .device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| PipelineError::Device(format!("device poll failed: {err}")))?;
        rx.recv()
            .map_err(|_| PipelineError::Device("readback callback never ran".into()))?
            .map_err(|err| PipelineError::Device(format!("failed to map readback buffer: {err}")))?;

        let mut bytes = Vec::with_capacity(row_bytes * target.height as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks_exact(padded_row) {
                bytes.extend_from_slice(&row[..row_bytes]);
            }
        }
        staging.unmap();
        Ok(bytes)
    }

    fn image(&self, id: ImageId) -> Result<&GpuImage, PipelineError> {
        self.images
            .get(&id)
            .ok_or_else(|| PipelineError::Device(format!("{id} is not allocated")))
    }

    fn program(&self, id: ProgramId) -> Result<&GpuProgram, PipelineError> {
        self.programs
            .get(&id)
            .ok_or_else(|| PipelineError::Device(format!("{id} is not installed")))
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.context.device;
        self.recording.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            })
        })
    }

    /// Submits whatever has been recorded so far.
    fn flush(&mut self) {
        if let Some(encoder) = self.recording.encoder.take() {
            self.context.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    fn target_format(&self) -> wgpu::TextureFormat {
        self.context.surface_format().unwrap_or(OFFSCREEN_FORMAT)
    }

    fn bind_group(
        &self,
        program: &GpuProgram,
        bindings: &[Binding],
    ) -> Result<wgpu::BindGroup, PipelineError> {
        let mut entries = Vec::with_capacity(program.interface.slots().len());
        for slot in program.interface.slots() {
            let resource = if slot.kind == SlotKind::Sampler {
                wgpu::BindingResource::Sampler(&self.sampler)
            } else {
                let binding = bindings
                    .iter()
                    .find(|binding| binding.slot == slot.binding)
                    .ok_or_else(|| {
                        PipelineError::Binding(format!(
                            "'{}' slot {} is not bound",
                            program.label, slot.binding
                        ))
                    })?;
                match binding.resource {
                    BoundResource::Image(id) => {
                        wgpu::BindingResource::TextureView(&self.image(id)?.view)
                    }
                    BoundResource::Params(id) => self
                        .params
                        .get(&id)
                        .ok_or_else(|| PipelineError::Device(format!("{id} is not allocated")))?
                        .as_entire_binding(),
                }
            };
            entries.push(wgpu::BindGroupEntry {
                binding: slot.binding,
                resource,
            });
        }

        Ok(self
            .context
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&program.label),
                layout: &program.layout,
                entries: &entries,
            }))
    }

    fn acquire_surface_texture(&mut self) -> Result<bool, PipelineError> {
        let Some(state) = self.context.surface.as_ref() else {
            return Ok(false);
        };
        match state.surface.get_current_texture() {
            Ok(frame) => {
                self.recording.surface_texture = Some(frame);
                Ok(true)
            }
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                debug!("surface lost or outdated; reconfiguring");
                self.context.reconfigure();
                self.skipped += 1;
                Ok(false)
            }
            Err(wgpu::SurfaceError::OutOfMemory) => Err(PipelineError::Device(
                "surface reported out of memory".into(),
            )),
            Err(err) => {
                warn!(error = ?err, "failed to acquire surface texture; skipping frame");
                self.skipped += 1;
                Ok(false)
            }
        }
    }

    fn offscreen_view(&mut self, size: (u32, u32)) -> &wgpu::TextureView {
        let device = &self.context.device;
        let offscreen = match self.offscreen.take() {
            Some(offscreen) if offscreen.size == size => offscreen,
            _ => {
                let texture = device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("offscreen target"),
                    size: wgpu::Extent3d {
                        width: size.0,
                        height: size.1,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: OFFSCREEN_FORMAT,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                    view_formats: &[],
                });
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                Offscreen {
                    _texture: texture,
                    view,
                    size,
                }
            }
        };
        &self.offscreen.insert(offscreen).view
    }
}

impl GpuBackend for WgpuBackend {
    fn install_program(
        &mut self,
        id: ProgramId,
        program: &LinkedProgram,
    ) -> Result<(), PipelineError> {
        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let modules: Vec<(StageKind, wgpu::ShaderModule)> = program
            .stages
            .iter()
            .map(|stage| {
                let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(&program.label),
                    source: wgpu::ShaderSource::Glsl {
                        shader: Cow::Owned(stage.source.clone()),
                        stage: stage.kind.naga_stage(),
                        defines: &[],
                    },
                });
                (stage.kind, module)
            })
            .collect();
        let module = |kind: StageKind| {
            modules
                .iter()
                .find(|(stage, _)| *stage == kind)
                .map(|(_, module)| module)
                .ok_or_else(|| {
                    PipelineError::ResourceCreation(format!(
                        "'{}' has no {kind} stage",
                        program.label
                    ))
                })
        };

        let layout_entries = layout_entries(&program.interface);
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&program.label),
            entries: &layout_entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&program.label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = match program.kind {
            ProgramKind::Compute => {
                Pipeline::Compute(device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(&program.label),
                    layout: Some(&pipeline_layout),
                    module: module(StageKind::Compute)?,
                    entry_point: Some("main"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                }))
            }
            ProgramKind::Raster => {
                let vertex_layout = wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2],
                };
                Pipeline::Raster(device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(&program.label),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: module(StageKind::Vertex)?,
                        entry_point: Some("main"),
                        buffers: &[vertex_layout],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleList,
                        strip_index_format: None,
                        front_face: wgpu::FrontFace::Ccw,
                        cull_mode: None,
                        polygon_mode: wgpu::PolygonMode::Fill,
                        unclipped_depth: false,
                        conservative: false,
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    fragment: Some(wgpu::FragmentState {
                        module: module(StageKind::Fragment)?,
                        entry_point: Some("main"),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: self.target_format(),
                            blend: None,
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    multiview: None,
                    cache: None,
                }))
            }
        };

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(PipelineError::ResourceCreation(format!(
                "'{}' rejected by the device: {err}",
                program.label
            )));
        }

        debug!(%id, label = %program.label, kind = ?program.kind, "created pipeline");
        self.programs.insert(
            id,
            GpuProgram {
                label: program.label.clone(),
                pipeline,
                layout,
                interface: program.interface.clone(),
            },
        );
        Ok(())
    }

    /// `wgpu` zero-initializes new textures.
    fn allocate_image(&mut self, id: ImageId, target: &ImageTarget) -> Result<(), PipelineError> {
        let limit = self.context.adapter_profile().max_texture_dimension;
        if target.width > limit || target.height > limit {
            return Err(PipelineError::ResourceCreation(format!(
                "{}x{} exceeds the device limit of {limit}",
                target.width, target.height
            )));
        }
        let texture = self.context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pipeline image"),
            size: extent(target),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(target.format),
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.images.insert(
            id,
            GpuImage {
                texture,
                view,
                target: *target,
            },
        );
        Ok(())
    }

    fn allocate_params(&mut self, id: ParamsId, size: usize) -> Result<(), PipelineError> {
        let padded = size.div_ceil(UNIFORM_ALIGNMENT) * UNIFORM_ALIGNMENT;
        let buffer = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("parameter block"),
            size: padded as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.params.insert(id, buffer);
        Ok(())
    }

    fn allocate_quad(&mut self, quad: &QuadGeometry) -> Result<(), PipelineError> {
        let device = &self.context.device;
        let vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad vertices"),
            contents: bytemuck::cast_slice(&quad.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad indices"),
            contents: bytemuck::cast_slice(&quad.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        self.quad = Some(QuadBuffers {
            vertices,
            indices,
            index_count: quad.indices.len() as u32,
        });
        Ok(())
    }

    fn release(&mut self, handle: ResourceHandle) {
        match handle {
            ResourceHandle::Program(id) => {
                self.programs.remove(&id);
            }
            ResourceHandle::Image(id) => {
                if let Some(image) = self.images.remove(&id) {
                    image.texture.destroy();
                }
            }
            ResourceHandle::Params(id) => {
                if let Some(buffer) = self.params.remove(&id) {
                    buffer.destroy();
                }
            }
            ResourceHandle::Quad => {
                if let Some(quad) = self.quad.take() {
                    quad.vertices.destroy();
                    quad.indices.destroy();
                }
            }
        }
        trace!(?handle, "released");
    }

    fn upload_image(&mut self, id: ImageId, texels: &[u8]) -> Result<(), PipelineError> {
        // Queue writes land before the next submission; recorded commands go first.
        self.flush();
        let image = self.image(id)?;
        let target = image.target;
        self.context.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &image.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            texels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(target.width * target.format.bytes_per_texel() as u32),
                rows_per_image: Some(target.height),
            },
            extent(&target),
        );
        Ok(())
    }

    fn write_params(&mut self, id: ParamsId, bytes: &[u8]) -> Result<(), PipelineError> {
        self.flush();
        let buffer = self
            .params
            .get(&id)
            .ok_or_else(|| PipelineError::Device(format!("{id} is not allocated")))?;
        let padded = bytes.len().div_ceil(4) * 4;
        if padded == bytes.len() {
            self.context.queue.write_buffer(buffer, 0, bytes);
        } else {
            let mut aligned = bytes.to_vec();
            aligned.resize(padded, 0);
            self.context.queue.write_buffer(buffer, 0, &aligned);
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        program: ProgramId,
        groups: WorkGroups,
        bindings: &[Binding],
    ) -> Result<(), PipelineError> {
        let installed = self.program(program)?;
        let Pipeline::Compute(pipeline) = &installed.pipeline else {
            return Err(PipelineError::Device(format!("{program} is not a compute program")));
        };
        let bind_group = self.bind_group(installed, bindings)?;
        let pipeline = pipeline.clone();
        let label = installed.label.clone();

        let mut pass = self.encoder().begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(&label),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(groups.x, groups.y, 1);
        Ok(())
    }

    fn barrier(&mut self, image: ImageId) -> Result<(), PipelineError> {
        self.image(image)?;
        trace!(%image, "compute pass closed");
        Ok(())
    }

    fn draw(&mut self, program: ProgramId, bindings: &[Binding]) -> Result<(), PipelineError> {
        let installed = self.program(program)?;
        let Pipeline::Raster(pipeline) = &installed.pipeline else {
            return Err(PipelineError::Device(format!("{program} is not a raster program")));
        };
        let quad = self
            .quad
            .as_ref()
            .ok_or_else(|| {
                PipelineError::Device("draw issued before the quad was allocated".into())
            })?;
        let image_size = bindings
            .iter()
            .find_map(|binding| binding.image())
            .and_then(|id| self.images.get(&id))
            .map(|image| (image.target.width, image.target.height))
            .ok_or_else(|| PipelineError::Device("draw without an image".into()))?;
        let bind_group = self.bind_group(installed, bindings)?;
        let pipeline = pipeline.clone();
        let vertices = quad.vertices.clone();
        let indices = quad.indices.clone();
        let index_count = quad.index_count;

        let view = if self.context.surface.is_some() {
            if !self.acquire_surface_texture()? {
                return Ok(());
            }
            match self.recording.surface_texture.as_ref() {
                Some(frame) => frame
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default()),
                None => return Ok(()),
            }
        } else {
            self.offscreen_view(image_size).clone()
        };

        let mut pass = self.encoder().begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("display pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, vertices.slice(..));
        pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint16);
        pass.draw_indexed(0..index_count, 0, 0..1);
        Ok(())
    }

    fn present(&mut self) -> Result<(), PipelineError> {
        self.flush();
        if let Some(frame) = self.recording.surface_texture.take() {
            frame.present();
        }
        self.presented += 1;
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<(), PipelineError> {
        self.flush();
        self.context
            .device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|err| PipelineError::Device(format!("device poll failed: {err}")))
    }
}

fn texture_format(format: ImageFormat) -> wgpu::TextureFormat {
    match format {
        ImageFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        ImageFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
    }
}

fn extent(target: &ImageTarget) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: target.width,
        height: target.height,
        depth_or_array_layers: 1,
    }
}

fn layout_entries(interface: &ProgramInterface) -> Vec<wgpu::BindGroupLayoutEntry> {
    interface
        .slots()
        .iter()
        .map(|slot| {
            let visibility = slot
                .stages
                .iter()
                .fold(wgpu::ShaderStages::NONE, |acc, stage| {
                    acc | match stage {
                        StageKind::Vertex => wgpu::ShaderStages::VERTEX,
                        StageKind::Fragment => wgpu::ShaderStages::FRAGMENT,
                        StageKind::Compute => wgpu::ShaderStages::COMPUTE,
                    }
                });
            let ty = match slot.kind {
                SlotKind::StorageImage { format, writable } => wgpu::BindingType::StorageTexture {
                    access: if writable {
                        wgpu::StorageTextureAccess::WriteOnly
                    } else {
                        wgpu::StorageTextureAccess::ReadOnly
                    },
                    format: texture_format(format),
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                SlotKind::Texture => wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                SlotKind::Sampler => {
                    wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering)
                }
                SlotKind::Uniform { size } => wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: NonZeroU64::new(size as u64),
                },
            };
            wgpu::BindGroupLayoutEntry {
                binding: slot.binding,
                visibility,
                ty,
                count: None,
            }
        })
        .collect()
}
