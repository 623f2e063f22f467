//! Program linker.
//!
//! Stages are GLSL 450 sources compiled through the naga GLSL frontend (the
//! same frontend `wgpu` uses for `ShaderSource::Glsl`), validated, and then
//! cross-checked so that a program either links completely or fails with a
//! diagnostic before any GPU object exists:
//!
//! ```text
//!   ProgramStages ──▶ compile_stage() per stage ──▶ link_stages() ──▶ LinkedProgram
//!                          │ ShaderCompile               │ ShaderLink
//!                          ▼                             ▼
//!                     (naga modules dropped on every path)
//! ```
//!
//! The linked program keeps the stage sources and the reflected resource
//! interface. Backends create their own modules from the sources.

use std::fmt;

use tracing::debug;
use wgpu::naga;
use wgpu::naga::front::glsl;
use wgpu::naga::valid::{Capabilities, ValidationFlags, Validator};

use crate::error::{PipelineError, SourceText};
use crate::resources::ImageFormat;

const ENTRY_POINT: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageKind {
    Vertex,
    Fragment,
    Compute,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        }
    }

    pub(crate) fn naga_stage(self) -> naga::ShaderStage {
        match self {
            Self::Vertex => naga::ShaderStage::Vertex,
            Self::Fragment => naga::ShaderStage::Fragment,
            Self::Compute => naga::ShaderStage::Compute,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (stage kind, source text) pair of an untyped stage list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSource {
    pub kind: StageKind,
    pub source: String,
}

impl StageSource {
    pub fn new(kind: StageKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    Raster,
    Compute,
}

/// Stage list whose shape is checked by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramStages {
    Raster { vertex: String, fragment: String },
    Compute { compute: String },
}

impl ProgramStages {
    pub fn raster(vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self::Raster {
            vertex: vertex.into(),
            fragment: fragment.into(),
        }
    }

    pub fn compute(compute: impl Into<String>) -> Self {
        Self::Compute {
            compute: compute.into(),
        }
    }

    /// Builds a typed stage list from an ordered, untyped one.
    ///
    /// Accepts exactly one vertex plus one fragment stage, or exactly one
    /// compute stage.
    pub fn from_list(list: Vec<StageSource>) -> Result<Self, PipelineError> {
        let mut vertex = None;
        let mut fragment = None;
        let mut compute = None;
        for stage in list {
            let slot = match stage.kind {
                StageKind::Vertex => &mut vertex,
                StageKind::Fragment => &mut fragment,
                StageKind::Compute => &mut compute,
            };
            if slot.is_some() {
                return Err(PipelineError::InvalidStages(format!(
                    "more than one {} stage supplied",
                    stage.kind
                )));
            }
            *slot = Some(stage.source);
        }

        match (vertex, fragment, compute) {
            (Some(vertex), Some(fragment), None) => Ok(Self::Raster { vertex, fragment }),
            (None, None, Some(compute)) => Ok(Self::Compute { compute }),
            (None, None, None) => Err(PipelineError::InvalidStages("no stages supplied".into())),
            (_, _, Some(_)) => Err(PipelineError::InvalidStages(
                "a compute stage cannot be combined with raster stages".into(),
            )),
            (Some(_), None, None) => Err(PipelineError::InvalidStages(
                "raster program is missing its fragment stage".into(),
            )),
            (None, Some(_), None) => Err(PipelineError::InvalidStages(
                "raster program is missing its vertex stage".into(),
            )),
        }
    }

    pub fn kind(&self) -> ProgramKind {
        match self {
            Self::Raster { .. } => ProgramKind::Raster,
            Self::Compute { .. } => ProgramKind::Compute,
        }
    }

    /// Stages in pipeline order.
    pub fn stages(&self) -> Vec<(StageKind, &str)> {
        match self {
            Self::Raster { vertex, fragment } => vec![
                (StageKind::Vertex, vertex.as_str()),
                (StageKind::Fragment, fragment.as_str()),
            ],
            Self::Compute { compute } => vec![(StageKind::Compute, compute.as_str())],
        }
    }
}

/// Kind of resource a program expects at a binding slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    StorageImage { format: ImageFormat, writable: bool },
    Texture,
    Sampler,
    Uniform { size: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub binding: u32,
    pub kind: SlotKind,
    pub name: Option<String>,
    pub stages: Vec<StageKind>,
}

/// Resource slots reflected from every stage of a program, sorted by binding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramInterface {
    slots: Vec<Slot>,
}

impl ProgramInterface {
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot(&self, binding: u32) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.binding == binding)
    }

    fn merge(
        &mut self,
        stage: StageKind,
        binding: u32,
        kind: SlotKind,
        name: Option<String>,
    ) -> Result<(), PipelineError> {
        if let Some(existing) = self.slots.iter_mut().find(|slot| slot.binding == binding) {
            if existing.kind != kind {
                return Err(PipelineError::ShaderLink {
                    diagnostic: format!(
                        "binding {binding} is declared as {:?} in the {} stage \
                         and as {kind:?} in the {stage} stage",
                        existing.kind,
                        existing.stages.first().map(|s| s.as_str()).unwrap_or("previous"),
                    ),
                });
            }
            if !existing.stages.contains(&stage) {
                existing.stages.push(stage);
            }
            return Ok(());
        }

        self.slots.push(Slot {
            binding,
            kind,
            name,
            stages: vec![stage],
        });
        self.slots.sort_by_key(|slot| slot.binding);
        Ok(())
    }
}

/// Result of a successful link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedProgram {
    pub label: String,
    pub kind: ProgramKind,
    pub stages: Vec<StageSource>,
    pub interface: ProgramInterface,
    /// Declared local size for compute programs.
    pub local_size: Option<[u32; 3]>,
}

impl LinkedProgram {
    pub fn source(&self, kind: StageKind) -> Option<&str> {
        self.stages
            .iter()
            .find(|stage| stage.kind == kind)
            .map(|stage| stage.source.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum ProgramState {
    Unlinked,
    Linked(LinkedProgram),
    Failed(PipelineError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramStatus {
    Unlinked,
    Linked,
    Failed,
}

/// A program as owned by a demo: its stages plus the outcome of linking them.
#[derive(Debug, Clone)]
pub struct ShaderProgram {
    label: String,
    stages: ProgramStages,
    state: ProgramState,
}

impl ShaderProgram {
    pub fn new(label: impl Into<String>, stages: ProgramStages) -> Self {
        Self {
            label: label.into(),
            stages,
            state: ProgramState::Unlinked,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Links the program on first call. A failure is terminal: later calls
    /// return the same error without compiling again.
    pub fn link(&mut self) -> Result<&LinkedProgram, PipelineError> {
        if matches!(self.state, ProgramState::Unlinked) {
            self.state = match link_program(&self.label, &self.stages) {
                Ok(program) => ProgramState::Linked(program),
                Err(err) => ProgramState::Failed(err),
            };
        }

        match &self.state {
            ProgramState::Linked(program) => Ok(program),
            ProgramState::Failed(err) => Err(err.clone()),
            ProgramState::Unlinked => Err(PipelineError::ShaderLink {
                diagnostic: format!("program '{}' was not linked", self.label),
            }),
        }
    }

    pub fn linked(&self) -> Option<&LinkedProgram> {
        match &self.state {
            ProgramState::Linked(program) => Some(program),
            _ => None,
        }
    }

    pub fn status(&self) -> ProgramStatus {
        match self.state {
            ProgramState::Unlinked => ProgramStatus::Unlinked,
            ProgramState::Linked(_) => ProgramStatus::Linked,
            ProgramState::Failed(_) => ProgramStatus::Failed,
        }
    }
}

/// Compiles every stage and links them into one program.
pub fn link_program(label: &str, stages: &ProgramStages) -> Result<LinkedProgram, PipelineError> {
    let mut compiled = Vec::new();
    for (kind, source) in stages.stages() {
        compiled.push(compile_stage(kind, source)?);
    }

    let (interface, local_size) = link_stages(&compiled)?;
    debug!(
        program = label,
        slots = interface.slots().len(),
        ?local_size,
        "linked shader program"
    );

    Ok(LinkedProgram {
        label: label.to_string(),
        kind: stages.kind(),
        stages: stages
            .stages()
            .into_iter()
            .map(|(kind, source)| StageSource::new(kind, source))
            .collect(),
        interface,
        local_size,
    })
}

struct CompiledStage {
    kind: StageKind,
    module: naga::Module,
}

fn compile_stage(kind: StageKind, source: &str) -> Result<CompiledStage, PipelineError> {
    let compile_error = |diagnostic: String| PipelineError::ShaderCompile {
        stage: kind,
        diagnostic,
        stage_source: SourceText::new(source),
    };

    let mut frontend = glsl::Frontend::default();
    let module = frontend
        .parse(&glsl::Options::from(kind.naga_stage()), source)
        .map_err(|errors| compile_error(errors.emit_to_string(source)))?;

    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|err| compile_error(err.emit_to_string(source)))?;

    Ok(CompiledStage { kind, module })
}

fn link_stages(
    stages: &[CompiledStage],
) -> Result<(ProgramInterface, Option<[u32; 3]>), PipelineError> {
    let mut interface = ProgramInterface::default();
    let mut local_size = None;
    let mut vertex_outputs = Vec::new();
    let mut fragment_inputs = Vec::new();

    for stage in stages {
        let module = &stage.module;
        let entry = module
            .entry_points
            .iter()
            .find(|entry| entry.name == ENTRY_POINT && entry.stage == stage.kind.naga_stage())
            .ok_or_else(|| PipelineError::ShaderLink {
                diagnostic: format!("{} stage has no `{ENTRY_POINT}` entry point", stage.kind),
            })?;

        for (_, global) in module.global_variables.iter() {
            let Some(binding) = &global.binding else {
                continue;
            };
            if binding.group != 0 {
                return Err(PipelineError::ShaderLink {
                    diagnostic: format!(
                        "{} stage uses descriptor set {}; only set 0 is supported",
                        stage.kind, binding.group
                    ),
                });
            }
            let kind = slot_kind(module, global).map_err(|diagnostic| {
                PipelineError::ShaderLink {
                    diagnostic: format!("{} stage: {diagnostic}", stage.kind),
                }
            })?;
            interface.merge(stage.kind, binding.binding, kind, global.name.clone())?;
        }

        match stage.kind {
            StageKind::Vertex => {
                if let Some(result) = &entry.function.result {
                    collect_locations(
                        module,
                        result.binding.as_ref(),
                        result.ty,
                        &mut vertex_outputs,
                    );
                }
            }
            StageKind::Fragment => {
                for argument in &entry.function.arguments {
                    collect_locations(
                        module,
                        argument.binding.as_ref(),
                        argument.ty,
                        &mut fragment_inputs,
                    );
                }
            }
            StageKind::Compute => {
                if entry.workgroup_size.iter().any(|&extent| extent == 0) {
                    return Err(PipelineError::ShaderLink {
                        diagnostic: "compute stage declares an empty local size".into(),
                    });
                }
                local_size = Some(entry.workgroup_size);
            }
        }
    }

    for (location, inner) in &fragment_inputs {
        match vertex_outputs.iter().find(|(loc, _)| loc == location) {
            Some((_, produced)) if produced == inner => {}
            Some((_, produced)) => {
                return Err(PipelineError::ShaderLink {
                    diagnostic: format!(
                        "location {location}: vertex stage writes {produced:?} \
                         but fragment stage reads {inner:?}"
                    ),
                })
            }
            None => {
                return Err(PipelineError::ShaderLink {
                    diagnostic: format!(
                        "location {location}: fragment input is not written by the vertex stage"
                    ),
                })
            }
        }
    }

    Ok((interface, local_size))
}

fn collect_locations(
    module: &naga::Module,
    binding: Option<&naga::Binding>,
    ty: naga::Handle<naga::Type>,
    out: &mut Vec<(u32, naga::TypeInner)>,
) {
    match binding {
        Some(naga::Binding::Location { location, .. }) => {
            out.push((*location, module.types[ty].inner.clone()));
        }
        Some(naga::Binding::BuiltIn(_)) => {}
        None => {
            if let naga::TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_locations(module, member.binding.as_ref(), member.ty, out);
                }
            }
        }
    }
}

fn slot_kind(module: &naga::Module, global: &naga::GlobalVariable) -> Result<SlotKind, String> {
    let name = global.name.as_deref().unwrap_or("<unnamed>");
    let inner = &module.types[global.ty].inner;
    match *inner {
        naga::TypeInner::Image {
            class: naga::ImageClass::Storage { format, access },
            ..
        } => {
            let format = match format {
                naga::StorageFormat::Rgba8Unorm => ImageFormat::Rgba8Unorm,
                naga::StorageFormat::Rgba32Float => ImageFormat::Rgba32Float,
                other => {
                    return Err(format!(
                        "storage image `{name}` uses unsupported format {other:?}"
                    ))
                }
            };
            Ok(SlotKind::StorageImage {
                format,
                writable: access.contains(naga::StorageAccess::STORE),
            })
        }
        naga::TypeInner::Image {
            class: naga::ImageClass::Sampled { .. },
            ..
        } => Ok(SlotKind::Texture),
        naga::TypeInner::Sampler { .. } => Ok(SlotKind::Sampler),
        _ if global.space == naga::AddressSpace::Uniform => Ok(SlotKind::Uniform {
            size: inner.size(module.to_ctx()),
        }),
        _ => Err(format!("resource `{name}` has an unsupported type")),
    }
}
