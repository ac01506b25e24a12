use super::{
    InstanceSlots, MaterialSet, RenderPass, ResolutionAware, TransformAware, View, any_pass, geometry_program,
};
use crate::camera::{LightCamera, OrbitView, Orthographic, Transformation, light_angles};
use crate::config::ShadowConfig;
use crate::context::RenderContext;
use crate::gpu::{Bindings, ClearOps, DrawCommand, Gpu, ProgramHandle, TextureHandle, WrapMode};
use crate::instances::InstanceBatches;
use crate::surface::{RenderSurface, SurfaceSpec};
use crate::Result;
use glam::Mat4;
use orrery_assets::ContentProvider;
use orrery_common::{EntityType, LightSource};

/// Light depth cleared to this so unlit texels never occlude.
const LIGHT_DEPTH_CLEAR: f32 = 10_000.0;
/// Largest light depth map side.
const MAX_LIGHT_MAP: u32 = 8192;

/// Light-space depth captured for one light. Consumed by
/// [`ShadowPass::project`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use = "captured light depth must be projected"]
pub struct LightDepth {
    light_camera: Mat4,
    light_direction: glam::Vec3,
}

impl LightDepth {
    pub fn light_camera(&self) -> Mat4 {
        self.light_camera
    }
}

/// Screen-space shadow factor (1 shadowed, 0 lit) in two stages: depth from
/// the light, then projection of that depth onto the camera's view.
pub struct ShadowPass {
    depth_program: ProgramHandle,
    shadow_program: ProgramHandle,
    light_surface: RenderSurface,
    output: RenderSurface,
    materials: MaterialSet,
    instances: InstanceSlots,
    config: ShadowConfig,
    light_camera: LightCamera,
}

impl ShadowPass {
    pub fn new(
        gpu: &mut dyn Gpu,
        content: &dyn ContentProvider,
        materials: MaterialSet,
        config: &ShadowConfig,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let depth_program = geometry_program(gpu, content, "depth.*")?;
        let shadow_program = geometry_program(gpu, content, "shadow.*")?;
        let (lw, lh) = Self::light_size(config, width, height);
        let light_surface = RenderSurface::create(gpu, lw, lh, &Self::light_spec())?;
        let output = RenderSurface::create(gpu, width, height, &Self::output_spec())?;
        let light_camera = LightCamera::new(
            OrbitView::new(config.distance, 0.0, 90.0, config.center),
            Orthographic::new(config.extent, config.extent, config.near, config.far),
        );
        tracing::info!(width, height, light_width = lw, light_height = lh, "shadow pass ready");
        Ok(Self {
            depth_program,
            shadow_program,
            light_surface,
            output,
            materials,
            instances: InstanceSlots::new(gpu),
            config: config.clone(),
            light_camera,
        })
    }

    fn light_spec() -> SurfaceSpec {
        SurfaceSpec::new("light_depth")
            .color(1, true)
            .with_depth()
            .with_wrap(WrapMode::ClampToEdge)
    }

    fn output_spec() -> SurfaceSpec {
        SurfaceSpec::new("shadow").color(1, false).with_depth()
    }

    fn light_size(config: &ShadowConfig, width: u32, height: u32) -> (u32, u32) {
        let scale = config.resolution_scale.max(1);
        (
            width.saturating_mul(scale).min(MAX_LIGHT_MAP),
            height.saturating_mul(scale).min(MAX_LIGHT_MAP),
        )
    }

    /// Orbit the light camera to look along `direction`.
    fn aim(&mut self, direction: glam::Vec3) -> Mat4 {
        let (azimuth, elevation) = light_angles(direction);
        let view = self.light_camera.view_mut();
        view.set_azimuth(azimuth);
        view.set_elevation(elevation);
        self.light_camera.matrix()
    }

    fn draw_instances(
        &self,
        ctx: &mut RenderContext<'_>,
        program: ProgramHandle,
        bindings: Bindings,
        uniforms: crate::gpu::PassUniforms,
    ) -> Result<()> {
        for kind in EntityType::ALL {
            if self.instances.count(kind) == 0 {
                continue;
            }
            let material = self.materials.get(kind);
            ctx.set_back_face_culling(material.cull_back);
            ctx.draw(&DrawCommand {
                program,
                geometry: self.instances.geometry(kind, material.mesh),
                bindings,
                uniforms,
            })?;
        }
        Ok(())
    }

    /// Stage one: render scene depth from the light.
    pub fn capture_depth(&mut self, ctx: &mut RenderContext<'_>, light: &LightSource) -> Result<LightDepth> {
        let _span = tracing::trace_span!("shadow_depth").entered();
        let light_camera = self.aim(light.direction);
        let light_view = View::new(light_camera);
        let uniforms = light_view.uniforms();
        self.light_surface.scoped(ctx, |ctx| {
            ctx.clear(&ClearOps::color([LIGHT_DEPTH_CLEAR, 0.0, 0.0, 1.0]).with_depth(1.0))?;
            ctx.set_depth_test(true);
            let result = self.draw_instances(ctx, self.depth_program, Bindings::new(), uniforms);
            ctx.reset_raster();
            result
        })?;
        Ok(LightDepth {
            light_camera,
            light_direction: (-light.direction).normalize_or_zero(),
        })
    }

    /// Stage two: classify each visible fragment of the camera view as lit or
    /// shadowed. `scene_depth` is the G-buffer's linear depth.
    pub fn project(
        &self,
        ctx: &mut RenderContext<'_>,
        depth: LightDepth,
        view: &View,
        scene_depth: TextureHandle,
    ) -> Result<()> {
        let _span = tracing::trace_span!("shadow_project").entered();
        let mut uniforms = view.uniforms();
        uniforms.light_camera = depth.light_camera.to_cols_array_2d();
        uniforms.light_direction = depth.light_direction.extend(0.0).to_array();
        uniforms.bias = self.config.bias;
        let bindings = Bindings::new()
            .texture(0, self.light_surface.texture())
            .texture(1, scene_depth);
        self.output.scoped(ctx, |ctx| {
            ctx.clear(&ClearOps::color([0.0; 4]).with_depth(1.0))?;
            ctx.set_depth_test(true);
            let result = self.draw_instances(ctx, self.shadow_program, bindings, uniforms);
            ctx.reset_raster();
            result
        })
    }

    /// Both stages for one light.
    pub fn draw(
        &mut self,
        ctx: &mut RenderContext<'_>,
        light: &LightSource,
        view: &View,
        scene_depth: TextureHandle,
    ) -> Result<()> {
        let depth = self.capture_depth(ctx, light)?;
        self.project(ctx, depth, view, scene_depth)
    }

    /// Leave the output fully lit, for frames without a light.
    pub fn clear(&self, ctx: &mut RenderContext<'_>) -> Result<()> {
        self.output
            .scoped(ctx, |ctx| ctx.clear(&ClearOps::color([0.0; 4]).with_depth(1.0)))
    }

    pub fn output(&self) -> TextureHandle {
        self.output.texture()
    }

    pub fn light_depth(&self) -> TextureHandle {
        self.light_surface.texture()
    }

    pub fn light_depth_size(&self) -> (u32, u32) {
        self.light_surface.size()
    }
}

impl ResolutionAware for ShadowPass {
    fn set_resolution(&mut self, gpu: &mut dyn Gpu, width: u32, height: u32) -> Result<()> {
        let (lw, lh) = Self::light_size(&self.config, width, height);
        tracing::debug!(width, height, light_width = lw, light_height = lh, "rebuilding shadow maps");
        self.light_surface.resize(gpu, lw, lh)?;
        self.output.resize(gpu, width, height)
    }
}

impl TransformAware for ShadowPass {
    fn set_transforms(&mut self, gpu: &mut dyn Gpu, batches: &InstanceBatches) {
        self.instances.upload(gpu, batches);
    }
}

impl RenderPass for ShadowPass {
    fn name(&self) -> &'static str {
        "shadow"
    }

    fn as_resolution_aware(&mut self) -> Option<&mut dyn ResolutionAware> {
        Some(self)
    }

    fn as_transform_aware(&mut self) -> Option<&mut dyn TransformAware> {
        Some(self)
    }

    fn release(&mut self, gpu: &mut dyn Gpu) {
        self.light_surface.release(gpu);
        self.output.release(gpu);
        self.instances.release(gpu);
        gpu.release_program(self.depth_program);
        gpu.release_program(self.shadow_program);
    }

    any_pass!();
}
