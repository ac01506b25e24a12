use super::{MaterialSet, RenderPass, ResolutionAware, View, any_pass, geometry_program};
use crate::context::RenderContext;
use crate::gpu::{
    Bindings, ClearOps, DrawCommand, Geometry, Gpu, InstanceBufferHandle, MeshHandle, ProgramHandle, TextureHandle,
};
use crate::surface::{RenderSurface, SurfaceSpec};
use crate::Result;
use glam::{Mat4, Vec3};
use orrery_assets::ContentProvider;

/// Keeps an image only where scene geometry lies inside a sphere around the
/// camera; everything farther (including the background) becomes zero.
pub struct SphereCut {
    program: ProgramHandle,
    sphere: MeshHandle,
    placement: InstanceBufferHandle,
    placed_at: Option<Vec3>,
    radius: f32,
    surface: RenderSurface,
}

impl SphereCut {
    pub fn new(
        gpu: &mut dyn Gpu,
        content: &dyn ContentProvider,
        materials: &MaterialSet,
        radius: f32,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        Ok(Self {
            program: geometry_program(gpu, content, "image_on_geometry.*")?,
            sphere: materials.inner_sphere(),
            placement: gpu.create_instance_buffer(1),
            placed_at: None,
            radius,
            surface: RenderSurface::create(gpu, width, height, &SurfaceSpec::new("sphere_cut").color(4, false))?,
        })
    }

    pub fn draw(
        &mut self,
        ctx: &mut RenderContext<'_>,
        view: &View,
        image: TextureHandle,
        scene_depth: TextureHandle,
    ) -> Result<()> {
        if self.placed_at != Some(view.position) {
            let model = Mat4::from_translation(view.position) * Mat4::from_scale(Vec3::splat(self.radius));
            ctx.gpu().write_instances(self.placement, &[model]);
            self.placed_at = Some(view.position);
        }
        let command = DrawCommand {
            program: self.program,
            geometry: Geometry::Mesh {
                mesh: self.sphere,
                instances: Some(self.placement),
                count: 1,
            },
            bindings: Bindings::new().texture(0, scene_depth).texture(1, image),
            uniforms: view.uniforms(),
        };
        self.surface.scoped(ctx, |ctx| {
            ctx.clear(&ClearOps::color([0.0; 4]))?;
            ctx.draw(&command)
        })
    }

    pub fn output(&self) -> TextureHandle {
        self.surface.texture()
    }
}

impl ResolutionAware for SphereCut {
    fn set_resolution(&mut self, gpu: &mut dyn Gpu, width: u32, height: u32) -> Result<()> {
        self.surface.resize(gpu, width, height)
    }
}

impl RenderPass for SphereCut {
    fn name(&self) -> &'static str {
        "sphere_cut"
    }

    fn as_resolution_aware(&mut self) -> Option<&mut dyn ResolutionAware> {
        Some(self)
    }

    fn release(&mut self, gpu: &mut dyn Gpu) {
        self.surface.release(gpu);
        gpu.release_instance_buffer(self.placement);
        gpu.release_program(self.program);
    }

    any_pass!();
}
