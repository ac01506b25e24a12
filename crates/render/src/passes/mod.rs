//! Render passes. Each pass owns its output surfaces and draws through a
//! [`RenderContext`]; inputs are borrowed texture handles of other passes.

mod bloom;
mod compose;
mod filter;
mod geometry;
mod lighting;
mod present;
mod reflection;
mod shadow;
mod skybox;
mod sphere_cut;
mod ssao;

pub use bloom::Bloom;
pub use compose::Addition;
pub use filter::{OnePassFilter, TwoPassFilter};
pub use geometry::{GeometryPass, InstanceSlots, MaterialSet, TypeMaterial};
pub use lighting::{LightingInputs, LightingPass, pack_lights};
pub use present::TextureDrawer;
pub use reflection::{CUBE_FACES, CaptureReport, CubeFace, ReflectionCapture};
pub use shadow::{LightDepth, ShadowPass};
pub use skybox::Skybox;
pub use sphere_cut::SphereCut;
pub use ssao::SsaoWithBlur;

use crate::camera::{Transformation, world_position};
use crate::gpu::{Bindings, DrawCommand, Geometry, Gpu, PassUniforms, ProgramHandle};
use crate::instances::InstanceBatches;
use crate::Result;
use glam::{Mat4, Vec3};
use orrery_assets::ContentProvider;
use std::any::Any;

/// Reacts to a change of the output resolution.
pub trait ResolutionAware {
    fn set_resolution(&mut self, gpu: &mut dyn Gpu, width: u32, height: u32) -> Result<()>;
}

/// Consumes the per-type instance transforms of the frame.
pub trait TransformAware {
    fn set_transforms(&mut self, gpu: &mut dyn Gpu, batches: &InstanceBatches);
}

/// A pass in the pipeline registry. Capabilities are queried, not assumed.
pub trait RenderPass: Any {
    fn name(&self) -> &'static str;

    fn as_resolution_aware(&mut self) -> Option<&mut dyn ResolutionAware> {
        None
    }

    fn as_transform_aware(&mut self) -> Option<&mut dyn TransformAware> {
        None
    }

    /// Free every device resource the pass owns.
    fn release(&mut self, gpu: &mut dyn Gpu);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// `as_any` / `as_any_mut` for a pass type.
macro_rules! any_pass {
    () => {
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    };
}
pub(crate) use any_pass;

/// Camera matrix and the world position derived from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct View {
    pub matrix: Mat4,
    pub position: Vec3,
}

impl View {
    pub fn new(matrix: Mat4) -> Self {
        Self {
            matrix,
            position: world_position(matrix),
        }
    }

    pub fn of(camera: &dyn Transformation) -> Self {
        Self::new(camera.matrix())
    }

    /// Uniform block with this view's camera filled in.
    pub fn uniforms(&self) -> PassUniforms {
        let mut uniforms = PassUniforms::new();
        uniforms.camera = self.matrix.to_cols_array_2d();
        uniforms.cam_pos = self.position.extend(1.0).to_array();
        uniforms
    }
}

pub(crate) fn geometry_program(
    gpu: &mut dyn Gpu,
    content: &dyn ContentProvider,
    name: &str,
) -> Result<ProgramHandle> {
    let source = content.load_shader_program(name)?;
    gpu.create_program(&source)
}

pub(crate) fn filter_program(
    gpu: &mut dyn Gpu,
    content: &dyn ContentProvider,
    name: &str,
) -> Result<ProgramHandle> {
    let source = content.load_filter_shader(name)?;
    gpu.create_program(&source)
}

pub(crate) fn fullscreen(program: ProgramHandle, bindings: Bindings, uniforms: PassUniforms) -> DrawCommand {
    DrawCommand {
        program,
        geometry: Geometry::Fullscreen,
        bindings,
        uniforms,
    }
}
