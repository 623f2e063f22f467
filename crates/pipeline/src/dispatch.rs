//! Compute Dispatcher.

use tracing::trace;

use crate::backend::GpuBackend;
use crate::error::PipelineError;
use crate::linker::ProgramKind;
use crate::resources::{Binding, ImageId, ProgramId, ResourceSet};

/// Work-group counts for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkGroups {
    pub x: u32,
    pub y: u32,
    pub tile: u32,
}

impl WorkGroups {
    /// Smallest grid of `tile`x`tile` groups that covers `width`x`height`.
    ///
    /// Invocations past the edge are expected to be no-ops in the kernel.
    pub fn cover(width: u32, height: u32, tile: u32) -> Self {
        let tile = tile.max(1);
        Self {
            x: width.div_ceil(tile),
            y: height.div_ceil(tile),
            tile,
        }
    }

    pub fn invocations(&self) -> (u32, u32) {
        (self.x * self.tile, self.y * self.tile)
    }
}

/// A linked compute program together with the tile it is dispatched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeKernel {
    program: ProgramId,
    tile: u32,
    output_slot: u32,
}

impl ComputeKernel {
    /// The program's declared local size must be `[tile, tile, 1]`.
    pub fn new(
        resources: &ResourceSet,
        program: ProgramId,
        tile: u32,
        output_slot: u32,
    ) -> Result<Self, PipelineError> {
        if resources.program_kind(program) != Some(ProgramKind::Compute) {
            return Err(PipelineError::Binding(format!(
                "{program} is not an installed compute program"
            )));
        }
        let declared = resources.program_local_size(program).unwrap_or([0, 0, 0]);
        if declared != [tile, tile, 1] {
            return Err(PipelineError::TileMismatch {
                declared,
                requested: tile,
            });
        }
        Ok(Self {
            program,
            tile,
            output_slot,
        })
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn tile(&self) -> u32 {
        self.tile
    }

    pub fn output_slot(&self) -> u32 {
        self.output_slot
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ComputeDispatcher {
    dispatches: u64,
}

impl ComputeDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `output` for writing plus `extra`, dispatches enough groups to
    /// cover `output`, then issues the barrier that makes the result visible
    /// to the next reader. Returns without waiting for the GPU.
    pub fn dispatch<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        resources: &mut ResourceSet,
        kernel: &ComputeKernel,
        output: ImageId,
        extra: &[Binding],
    ) -> Result<WorkGroups, PipelineError> {
        let target = *resources
            .image(output)
            .ok_or_else(|| PipelineError::Binding(format!("{output} is not allocated")))?;

        let mut bindings = Vec::with_capacity(extra.len() + 1);
        bindings.push(Binding::write(kernel.output_slot, output));
        bindings.extend_from_slice(extra);
        resources.validate_bindings(kernel.program, &bindings)?;

        let groups = WorkGroups::cover(target.width, target.height, kernel.tile);
        backend.dispatch(kernel.program, groups, &bindings)?;
        resources.mark_written(output);

        backend.barrier(output)?;
        resources.mark_visible(output);

        self.dispatches += 1;
        trace!(
            program = %kernel.program,
            %output,
            dispatch = self.dispatches,
            groups_x = groups.x,
            groups_y = groups.y,
            "dispatched compute kernel"
        );
        Ok(groups)
    }
}
