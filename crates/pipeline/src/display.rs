use crate::backend::GpuBackend;
use crate::error::PipelineError;
use crate::linker::ProgramKind;
use crate::resources::{Binding, ImageId, ProgramId, ResourceSet};

/// Draws one image over the whole viewport and presents it.
///
/// Holds nothing between calls besides the program and the slot its image
/// goes to; the quad geometry lives in the [`ResourceSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayStage {
    program: ProgramId,
    image_slot: u32,
}

impl DisplayStage {
    pub fn new(
        resources: &ResourceSet,
        program: ProgramId,
        image_slot: u32,
    ) -> Result<Self, PipelineError> {
        if resources.program_kind(program) != Some(ProgramKind::Raster) {
            return Err(PipelineError::Binding(format!(
                "{program} is not an installed raster program"
            )));
        }
        if !resources.has_quad() {
            return Err(PipelineError::ResourceCreation(
                "display quad has not been created".into(),
            ));
        }
        Ok(Self {
            program,
            image_slot,
        })
    }

    pub fn draw<B: GpuBackend + ?Sized>(
        &self,
        backend: &mut B,
        resources: &ResourceSet,
        image: ImageId,
    ) -> Result<(), PipelineError> {
        let bindings = [Binding::sampled(self.image_slot, image)];
        resources.validate_bindings(self.program, &bindings)?;
        backend.draw(self.program, &bindings)?;
        backend.present()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linker::{link_program, ProgramStages};
    use crate::resources::{ImageFormat, ImageTarget};
    use crate::software::{SoftwareBackend, SoftwareOp};

    const VERTEX: &str = r#"#version 450
layout(location = 0) in vec2 aPos;
layout(location = 1) in vec2 aUv;
layout(location = 0) out vec2 vUv;
void main() {
    vUv = aUv;
    gl_Position = vec4(aPos, 0.0, 1.0);
}
"#;

    const FRAGMENT: &str = r#"#version 450
layout(location = 0) in vec2 vUv;
layout(location = 0) out vec4 outColor;
layout(set = 0, binding = 0) uniform texture2D uImage;
layout(set = 0, binding = 1) uniform sampler uSampler;
void main() {
    outColor = texture(sampler2D(uImage, uSampler), vUv);
}
"#;

    #[test]
    fn drawing_an_unwritten_image_presents_zeros() {
        let mut backend = SoftwareBackend::new();
        let mut resources = ResourceSet::new();
        let linked =
            link_program("display", &ProgramStages::raster(VERTEX, FRAGMENT)).expect("links");
        let program = resources.install_program(&mut backend, &linked).expect("install");
        resources.create_quad(&mut backend).expect("quad");
        let image = resources
            .create_image(&mut backend, ImageTarget::new(5, 3, ImageFormat::Rgba32Float))
            .expect("image");

        let display = DisplayStage::new(&resources, program, 0).expect("display");
        display.draw(&mut backend, &resources, image).expect("draw");

        let frame = backend.last_frame().expect("presented");
        assert_eq!(frame.image, Some(image));
        assert_eq!((frame.width, frame.height), (5, 3));
        assert!(frame.texels.iter().all(|texel| *texel == [0.0; 4]));
        assert_eq!(
            &backend.ops()[backend.ops().len() - 2..],
            &[SoftwareOp::Draw(image), SoftwareOp::Present]
        );
    }

    #[test]
    fn requires_the_quad() {
        let mut backend = SoftwareBackend::new();
        let mut resources = ResourceSet::new();
        let linked =
            link_program("display", &ProgramStages::raster(VERTEX, FRAGMENT)).expect("links");
        let program = resources.install_program(&mut backend, &linked).expect("install");
        assert!(DisplayStage::new(&resources, program, 0).is_err());
    }
}
