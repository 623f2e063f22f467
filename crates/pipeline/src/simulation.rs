//! Ping-pong simulation state.
//!
//! Two images of identical shape alternate roles: `front` holds the most
//! recently completed generation and is read by the next step, which writes
//! the other image. A step never reads and writes the same image, and the
//! dispatcher's barrier sits between the write of step N and the read of
//! step N+1.

use tracing::debug;

use crate::backend::GpuBackend;
use crate::dispatch::{ComputeDispatcher, ComputeKernel};
use crate::error::PipelineError;
use crate::resources::{Binding, ImageId, ImageTarget, ResourceSet};

/// Produces the initial contents of buffer A, tightly packed in the target's
/// format. The distribution is up to the implementor.
pub trait Seeder {
    fn seed(&mut self, target: &ImageTarget) -> Vec<u8>;
}

impl<F> Seeder for F
where
    F: FnMut(&ImageTarget) -> Vec<u8>,
{
    fn seed(&mut self, target: &ImageTarget) -> Vec<u8> {
        self(target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Buffer {
    A,
    B,
}

impl Buffer {
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Which buffer a step read and which it wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRecord {
    pub read: Buffer,
    pub written: Buffer,
    pub generation: u64,
}

#[derive(Debug, Clone)]
pub struct SimulationState {
    images: [ImageId; 2],
    target: ImageTarget,
    input_slot: u32,
    front: Buffer,
    generation: u64,
}

impl SimulationState {
    /// Allocates both buffers. They are never reallocated afterwards.
    ///
    /// `input_slot` is where the step kernel expects the previous generation.
    pub fn new<B: GpuBackend + ?Sized>(
        backend: &mut B,
        resources: &mut ResourceSet,
        target: ImageTarget,
        input_slot: u32,
    ) -> Result<Self, PipelineError> {
        let a = resources.create_image(backend, target)?;
        let b = resources.create_image(backend, target)?;
        Ok(Self {
            images: [a, b],
            target,
            input_slot,
            front: Buffer::A,
            generation: 0,
        })
    }

    pub fn front(&self) -> Buffer {
        self.front
    }

    /// The buffer the next step writes.
    pub fn back(&self) -> Buffer {
        self.front.other()
    }

    pub fn image(&self, buffer: Buffer) -> ImageId {
        match buffer {
            Buffer::A => self.images[0],
            Buffer::B => self.images[1],
        }
    }

    pub fn front_image(&self) -> ImageId {
        self.image(self.front)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn target(&self) -> &ImageTarget {
        &self.target
    }

    /// Advances one generation: reads `front`, writes the other buffer, then
    /// flips `front` and bumps the generation counter.
    pub fn step<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        resources: &mut ResourceSet,
        dispatcher: &mut ComputeDispatcher,
        kernel: &ComputeKernel,
        extra: &[Binding],
    ) -> Result<StepRecord, PipelineError> {
        let src = self.front;
        let dst = src.other();

        let mut bindings = Vec::with_capacity(extra.len() + 1);
        bindings.push(Binding::read(self.input_slot, self.image(src)));
        bindings.extend_from_slice(extra);
        dispatcher.dispatch(backend, resources, kernel, self.image(dst), &bindings)?;

        self.front = dst;
        self.generation += 1;
        Ok(StepRecord {
            read: src,
            written: dst,
            generation: self.generation,
        })
    }

    /// Overwrites buffer A with a fresh state and restarts at generation 0.
    pub fn reset<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        resources: &mut ResourceSet,
        seeder: &mut dyn Seeder,
    ) -> Result<(), PipelineError> {
        let texels = seeder.seed(&self.target);
        resources.upload_image(backend, self.image(Buffer::A), &texels)?;
        self.front = Buffer::A;
        self.generation = 0;
        debug!(
            width = self.target.width,
            height = self.target.height,
            "simulation reset"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linker::{link_program, ProgramStages};
    use crate::resources::ImageFormat;
    use crate::software::{SoftwareBackend, SoftwareOp};

    const INCREMENT: &str = r#"#version 450
layout(local_size_x = 2, local_size_y = 2, local_size_z = 1) in;
layout(set = 0, binding = 0) uniform texture2D uPrevious;
layout(set = 0, binding = 1) uniform sampler uPreviousSampler;
layout(set = 0, binding = 2, rgba32f) uniform writeonly image2D uNext;
void main() {
    ivec2 coord = ivec2(gl_GlobalInvocationID.xy);
    ivec2 size = imageSize(uNext);
    if (coord.x >= size.x || coord.y >= size.y) {
        return;
    }
    vec4 previous = texelFetch(sampler2D(uPrevious, uPreviousSampler), coord, 0);
    imageStore(uNext, coord, previous + vec4(1.0));
}
"#;

    struct Fixture {
        backend: SoftwareBackend,
        resources: ResourceSet,
        dispatcher: ComputeDispatcher,
        kernel: ComputeKernel,
        state: SimulationState,
    }

    fn fixture() -> Fixture {
        let mut backend = SoftwareBackend::new();
        backend.register_kernel("increment", |inv| {
            if !inv.in_bounds() {
                return None;
            }
            let previous = inv.load(0, inv.x() as i32, inv.y() as i32);
            Some(previous.map(|channel| channel + 1.0))
        });
        let mut resources = ResourceSet::new();
        let linked =
            link_program("increment", &ProgramStages::compute(INCREMENT)).expect("links");
        let program = resources.install_program(&mut backend, &linked).expect("install");
        let kernel = ComputeKernel::new(&resources, program, 2, 2).expect("kernel");
        let state = SimulationState::new(
            &mut backend,
            &mut resources,
            ImageTarget::new(3, 3, ImageFormat::Rgba32Float),
            0,
        )
        .expect("state");
        Fixture {
            backend,
            resources,
            dispatcher: ComputeDispatcher::new(),
            kernel,
            state,
        }
    }

    fn zeros(target: &ImageTarget) -> Vec<u8> {
        vec![0; target.byte_len()]
    }

    impl Fixture {
        fn step(&mut self) -> StepRecord {
            self.state
                .step(
                    &mut self.backend,
                    &mut self.resources,
                    &mut self.dispatcher,
                    &self.kernel,
                    &[],
                )
                .expect("step")
        }

        fn reset(&mut self) {
            self.state
                .reset(&mut self.backend, &mut self.resources, &mut zeros)
                .expect("reset");
        }
    }

    #[test]
    fn generation_counts_steps_since_reset() {
        for steps in 0..6u64 {
            let mut fx = fixture();
            fx.reset();
            for _ in 0..steps {
                fx.step();
            }
            assert_eq!(fx.state.generation(), steps);
            let expected = steps as f32;
            let front = fx.backend.texels(fx.state.front_image()).expect("front");
            assert!(front.iter().all(|texel| texel[0] == expected));
        }
    }

    #[test]
    fn each_step_reads_what_the_previous_step_wrote() {
        let mut fx = fixture();
        fx.reset();
        let mut previous: Option<StepRecord> = None;
        for _ in 0..5 {
            let record = fx.step();
            assert_ne!(record.read, record.written);
            if let Some(previous) = previous {
                assert_eq!(previous.written, record.read);
            }
            previous = Some(record);
        }

        let dispatches: Vec<_> = fx
            .backend
            .ops()
            .iter()
            .filter_map(|op| match op {
                SoftwareOp::Dispatch { output, reads, .. } => Some((*output, reads.clone())),
                _ => None,
            })
            .collect();
        for pair in dispatches.windows(2) {
            assert_eq!(pair[1].1, vec![pair[0].0]);
            assert!(!pair[1].1.contains(&pair[1].0));
        }
        assert!(fx.backend.hazards().is_empty());
    }

    #[test]
    fn barrier_separates_consecutive_steps() {
        let mut fx = fixture();
        fx.reset();
        fx.backend.clear_ops();
        fx.step();
        fx.step();
        let kinds: Vec<_> = fx
            .backend
            .ops()
            .iter()
            .map(|op| matches!(op, SoftwareOp::Barrier(_)))
            .collect();
        assert_eq!(kinds, vec![false, true, false, true]);
    }

    #[test]
    fn reset_is_idempotent_and_never_reallocates() {
        let mut fx = fixture();
        let (a, b) = (fx.state.image(Buffer::A), fx.state.image(Buffer::B));
        fx.step();
        fx.step();
        fx.step();
        fx.backend.clear_ops();

        for _ in 0..2 {
            fx.reset();
            assert_eq!(fx.state.generation(), 0);
            assert_eq!(fx.state.front(), Buffer::A);
            assert_eq!(fx.state.back(), Buffer::B);
            assert_eq!(fx.state.front_image(), a);
        }
        assert_eq!(fx.state.image(Buffer::B), b);
        assert!(fx
            .backend
            .ops()
            .iter()
            .all(|op| !matches!(op, SoftwareOp::Allocate(_))));
        let front = fx.backend.texels(a).expect("buffer a");
        assert!(front.iter().all(|texel| *texel == [0.0; 4]));
    }
}
