use crate::dispatch::WorkGroups;
use crate::error::PipelineError;
use crate::linker::LinkedProgram;
use crate::resources::{
    Binding, ImageId, ImageTarget, ParamsId, ProgramId, QuadGeometry, ResourceHandle,
};

/// Everything the core asks of a GPU.
///
/// Ids are handed out by [`ResourceSet`](crate::resources::ResourceSet); a
/// backend only maps them onto its own objects. Commands are issued, not
/// awaited: only [`present`](GpuBackend::present) and
/// [`wait_idle`](GpuBackend::wait_idle) may block.
pub trait GpuBackend {
    fn install_program(
        &mut self,
        id: ProgramId,
        program: &LinkedProgram,
    ) -> Result<(), PipelineError>;

    /// Allocates a zero-initialized image.
    fn allocate_image(&mut self, id: ImageId, target: &ImageTarget) -> Result<(), PipelineError>;

    fn allocate_params(&mut self, id: ParamsId, size: usize) -> Result<(), PipelineError>;

    fn allocate_quad(&mut self, quad: &QuadGeometry) -> Result<(), PipelineError>;

    fn release(&mut self, handle: ResourceHandle);

    /// Replaces the whole image with tightly packed texels in its format.
    fn upload_image(&mut self, id: ImageId, texels: &[u8]) -> Result<(), PipelineError>;

    fn write_params(&mut self, id: ParamsId, bytes: &[u8]) -> Result<(), PipelineError>;

    fn dispatch(
        &mut self,
        program: ProgramId,
        groups: WorkGroups,
        bindings: &[Binding],
    ) -> Result<(), PipelineError>;

    /// Makes prior writes to `image` visible to every later command that
    /// reads it.
    fn barrier(&mut self, image: ImageId) -> Result<(), PipelineError>;

    /// Draws the quad with `program`. Sampler slots are filled by the backend.
    fn draw(&mut self, program: ProgramId, bindings: &[Binding]) -> Result<(), PipelineError>;

    fn present(&mut self) -> Result<(), PipelineError>;

    fn wait_idle(&mut self) -> Result<(), PipelineError>;
}
