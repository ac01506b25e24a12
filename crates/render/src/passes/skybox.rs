use super::{MaterialSet, RenderPass, ResolutionAware, TextureDrawer, View, any_pass, geometry_program};
use crate::config::SkyboxConfig;
use crate::context::RenderContext;
use crate::gpu::{
    Attachment, Bindings, ClearOps, DrawCommand, Geometry, Gpu, InstanceBufferHandle, MeshHandle, ProgramHandle,
    TextureDesc, TextureFormat, TextureHandle, WrapMode,
};
use crate::surface::{RenderSurface, SurfaceSpec};
use crate::Result;
use glam::{Mat4, Vec3};
use orrery_assets::{ContentProvider, SKY_FACE_SUFFIXES};

/// Sky cube baked from six face images, drawn on a sphere around the camera.
///
/// With a scene depth input the sky only covers pixels whose geometry lies
/// beyond the sphere.
pub struct Skybox {
    program: ProgramHandle,
    cube: TextureHandle,
    sphere: MeshHandle,
    placement: InstanceBufferHandle,
    placed_at: Option<Vec3>,
    size: f32,
    mip_level: f32,
    surface: RenderSurface,
}

impl Skybox {
    pub fn new(
        gpu: &mut dyn Gpu,
        content: &dyn ContentProvider,
        materials: &MaterialSet,
        drawer: &TextureDrawer,
        config: &SkyboxConfig,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let program = geometry_program(gpu, content, "sky.*")?;
        let cube = Self::bake(gpu, content, drawer, &config.name)?;
        let surface = RenderSurface::create(gpu, width, height, &SurfaceSpec::new("skybox").color(4, false))?;
        tracing::info!(sky = %config.name, size = config.size, "skybox ready");
        Ok(Self {
            program,
            cube,
            sphere: materials.inner_sphere(),
            placement: gpu.create_instance_buffer(1),
            placed_at: None,
            size: config.size,
            mip_level: config.mip_level,
            surface,
        })
    }

    /// Draw every face image into its cube layer and build the mip chain.
    fn bake(
        gpu: &mut dyn Gpu,
        content: &dyn ContentProvider,
        drawer: &TextureDrawer,
        name: &str,
    ) -> Result<TextureHandle> {
        let images = SKY_FACE_SUFFIXES
            .iter()
            .map(|suffix| content.load_texture(&format!("{name}{suffix}")))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let size = images.iter().map(|i| i.width.max(i.height)).max().unwrap_or(1);
        let cube = gpu.create_texture(&TextureDesc::cube("sky_cube", size, TextureFormat::Rgba16Float));

        let mut ctx = RenderContext::new(&mut *gpu);
        for (layer, image) in images.iter().enumerate() {
            let source = ctx.gpu().upload_texture(image, WrapMode::ClampToEdge);
            let face = RenderSurface::from_attachments(
                ctx.gpu(),
                "sky_face",
                vec![Attachment {
                    texture: cube,
                    layer: layer as u32,
                }],
                None,
            );
            let mut face = match face {
                Ok(face) => face,
                Err(e) => {
                    ctx.gpu().release_texture(source);
                    return Err(e);
                }
            };
            let drawn = face.scoped(&mut ctx, |ctx| drawer.draw(ctx, source));
            face.release(ctx.gpu());
            ctx.gpu().release_texture(source);
            drawn?;
        }
        ctx.gpu().generate_mipmaps(cube);
        tracing::debug!(name, size, "sky cube baked");
        Ok(cube)
    }

    /// Draw the sky for `view`. `scene_depth` masks out nearer geometry.
    pub fn draw(&mut self, ctx: &mut RenderContext<'_>, view: &View, scene_depth: Option<TextureHandle>) -> Result<()> {
        if self.placed_at != Some(view.position) {
            let model = Mat4::from_translation(view.position) * Mat4::from_scale(Vec3::splat(self.size));
            ctx.gpu().write_instances(self.placement, &[model]);
            self.placed_at = Some(view.position);
        }

        let mut uniforms = view.uniforms();
        uniforms.mip_level = self.mip_level;
        let mut bindings = Bindings::new().cube(self.cube);
        if let Some(depth) = scene_depth {
            bindings = bindings.texture(0, depth);
            uniforms.textured = 1.0;
        }
        let command = DrawCommand {
            program: self.program,
            geometry: Geometry::Mesh {
                mesh: self.sphere,
                instances: Some(self.placement),
                count: 1,
            },
            bindings,
            uniforms,
        };
        self.surface.scoped(ctx, |ctx| {
            ctx.clear(&ClearOps::color([0.0; 4]))?;
            ctx.draw(&command)
        })
    }

    pub fn cube(&self) -> TextureHandle {
        self.cube
    }

    pub fn output(&self) -> TextureHandle {
        self.surface.texture()
    }
}

impl ResolutionAware for Skybox {
    fn set_resolution(&mut self, gpu: &mut dyn Gpu, width: u32, height: u32) -> Result<()> {
        self.surface.resize(gpu, width, height)
    }
}

impl RenderPass for Skybox {
    fn name(&self) -> &'static str {
        "skybox"
    }

    fn as_resolution_aware(&mut self) -> Option<&mut dyn ResolutionAware> {
        Some(self)
    }

    fn release(&mut self, gpu: &mut dyn Gpu) {
        self.surface.release(gpu);
        gpu.release_texture(self.cube);
        gpu.release_instance_buffer(self.placement);
        gpu.release_program(self.program);
    }

    any_pass!();
}
