//! Dynamic environment reflection for one reflective entity.
//!
//! Each frame the scene is rendered six times from the entity's location,
//! with the entity itself removed from its batch, into the faces of a cube
//! texture. Faces are processed one after another but every face has its own
//! bloom chain, so no intermediate glow state is shared between faces.

use super::{
    Addition, Bloom, GeometryPass, LightingInputs, LightingPass, MaterialSet, RenderPass, ResolutionAware,
    ShadowPass, Skybox, TextureDrawer, TransformAware, View, any_pass, geometry_program,
};
use crate::camera::{FaceCamera, Perspective, PositionView};
use crate::config::{ReflectionConfig, RendererConfig};
use crate::context::RenderContext;
use crate::gpu::{
    Attachment, Bindings, ClearOps, DrawCommand, Geometry, Gpu, InstanceBufferHandle, MeshHandle, ProgramHandle,
    TextureDesc, TextureFormat, TextureHandle,
};
use crate::instances::{InstanceBatches, batch_slot};
use crate::surface::{RenderSurface, SurfaceSpec};
use crate::{RenderError, Result};
use glam::{Mat4, Vec3};
use orrery_assets::ContentProvider;
use orrery_common::{EntityType, LightSource, ViewEntity};

/// Orientation of one capture camera, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubeFace {
    pub name: &'static str,
    pub azimuth: f32,
    pub elevation: f32,
}

/// Capture directions in cube layer order.
pub const CUBE_FACES: [CubeFace; 6] = [
    CubeFace { name: "+x", azimuth: 90.0, elevation: 0.0 },
    CubeFace { name: "-x", azimuth: -90.0, elevation: 0.0 },
    CubeFace { name: "+y", azimuth: 180.0, elevation: -90.0 },
    CubeFace { name: "-y", azimuth: 180.0, elevation: 90.0 },
    CubeFace { name: "+z", azimuth: 180.0, elevation: 0.0 },
    CubeFace { name: "-z", azimuth: 0.0, elevation: 0.0 },
];

/// What the last capture did to the reflector's batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureReport {
    pub kind: EntityType,
    pub slot: usize,
    pub location: Vec3,
    /// Batch size before exclusion.
    pub full_count: usize,
    /// Instances the capture's geometry pass drew.
    pub captured_count: usize,
    /// Batch size after restoring.
    pub restored_count: usize,
}

pub struct ReflectionCapture {
    config: ReflectionConfig,
    face_size: u32,
    geometry: GeometryPass,
    shadow: ShadowPass,
    lighting: LightingPass,
    sky: Skybox,
    add: Addition,
    blooms: Vec<Bloom>,
    faces: Vec<RenderSurface>,
    cube: TextureHandle,
    cube_faces: Vec<RenderSurface>,
    drawer: TextureDrawer,
    cameras: Vec<FaceCamera>,
    env_program: ProgramHandle,
    reflector_mesh: MeshHandle,
    reflector_cull: bool,
    reflector: InstanceBufferHandle,
    reflector_transform: Option<Mat4>,
    output: RenderSurface,
    last: Option<CaptureReport>,
}

impl ReflectionCapture {
    pub fn new(
        gpu: &mut dyn Gpu,
        content: &dyn ContentProvider,
        materials: &MaterialSet,
        config: &RendererConfig,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let reflection = config.reflection.clone();
        let f = Self::face_size_for(&reflection, width, height);

        let drawer = TextureDrawer::new(gpu, content)?;
        let geometry = GeometryPass::new(gpu, content, materials.clone(), config.depth_sentinel, f, f)?;
        let shadow = ShadowPass::new(gpu, content, materials.clone(), &config.shadow, f, f)?;
        let lighting = LightingPass::new(gpu, content, config.hemisphere_top, config.hemisphere_bottom, f, f)?;
        let sky = Skybox::new(gpu, content, materials, &drawer, &reflection.sky, f, f)?;
        let add = Addition::new(gpu, content, f, f)?;
        let blooms = (0..CUBE_FACES.len())
            .map(|_| Bloom::new(gpu, content, &config.bloom, f, f))
            .collect::<Result<Vec<_>>>()?;
        let faces = Self::create_faces(gpu, f)?;
        let (cube, cube_faces) = Self::create_cube(gpu, f)?;
        let cameras = CUBE_FACES
            .iter()
            .map(|face| {
                FaceCamera::new(
                    PositionView::new(Vec3::ZERO, face.azimuth, face.elevation),
                    Perspective::new(90.0, 1.0, reflection.near, reflection.far),
                )
            })
            .collect();
        let reflector_material = materials.get(reflection.reflective);
        let output = RenderSurface::create(gpu, width, height, &Self::output_spec())?;
        tracing::info!(kind = %reflection.reflective, face_size = f, "reflection capture ready");

        Ok(Self {
            env_program: geometry_program(gpu, content, "environment_map.*")?,
            reflector: gpu.create_instance_buffer(1),
            reflector_mesh: reflector_material.mesh,
            reflector_cull: reflector_material.cull_back,
            reflector_transform: None,
            config: reflection,
            face_size: f,
            geometry,
            shadow,
            lighting,
            sky,
            add,
            blooms,
            faces,
            cube,
            cube_faces,
            drawer,
            cameras,
            output,
            last: None,
        })
    }

    fn face_size_for(config: &ReflectionConfig, width: u32, height: u32) -> u32 {
        config.face_size.min(width).min(height).max(1)
    }

    fn output_spec() -> SurfaceSpec {
        SurfaceSpec::new("environment").color(4, false).with_depth()
    }

    fn create_faces(gpu: &mut dyn Gpu, size: u32) -> Result<Vec<RenderSurface>> {
        let spec = SurfaceSpec::new("capture_face").color(4, false).with_depth();
        let mut faces = Vec::with_capacity(CUBE_FACES.len());
        for _ in CUBE_FACES {
            match RenderSurface::create(gpu, size, size, &spec) {
                Ok(face) => faces.push(face),
                Err(e) => {
                    for face in &mut faces {
                        face.release(gpu);
                    }
                    return Err(e);
                }
            }
        }
        Ok(faces)
    }

    fn create_cube(gpu: &mut dyn Gpu, size: u32) -> Result<(TextureHandle, Vec<RenderSurface>)> {
        let cube = gpu.create_texture(&TextureDesc::cube("capture_cube", size, TextureFormat::Rgba16Float));
        let mut surfaces = Vec::with_capacity(CUBE_FACES.len());
        for layer in 0..CUBE_FACES.len() as u32 {
            let attachment = Attachment { texture: cube, layer };
            match RenderSurface::from_attachments(gpu, "capture_cube_face", vec![attachment], None) {
                Ok(surface) => surfaces.push(surface),
                Err(e) => {
                    for surface in &mut surfaces {
                        surface.release(gpu);
                    }
                    gpu.release_texture(cube);
                    return Err(e);
                }
            }
        }
        Ok((cube, surfaces))
    }

    fn release_cube(&mut self, gpu: &mut dyn Gpu) {
        for surface in &mut self.cube_faces {
            surface.release(gpu);
        }
        self.cube_faces.clear();
        gpu.release_texture(self.cube);
    }

    /// Capture the cube for the first entity of the reflective type.
    /// Returns `None` when there is no such entity.
    ///
    /// The entity is swapped out of `batches` for the six face renders and
    /// swapped back before this returns, also when a face fails.
    pub fn capture(
        &mut self,
        ctx: &mut RenderContext<'_>,
        batches: &mut InstanceBatches,
        entities: &[ViewEntity],
        lights: &[LightSource],
    ) -> Result<Option<CaptureReport>> {
        let kind = self.config.reflective;
        let Some(index) = entities.iter().position(|e| e.kind == kind) else {
            self.last = None;
            self.reflector_transform = None;
            return Ok(None);
        };
        let _span = tracing::debug_span!("reflection_capture", %kind).entered();
        let entity = entities[index];
        let slot = batch_slot(entities, index).ok_or_else(|| RenderError::InstanceBatchInconsistency {
            kind,
            message: format!("entity {index} has no batch slot"),
        })?;

        let full_count = batches.count(kind);
        let exclusion = batches.exclude_checked(kind, slot, entity.transform)?;
        self.geometry.set_transforms(ctx.gpu(), batches);
        self.shadow.set_transforms(ctx.gpu(), batches);
        let captured_count = self.geometry.instance_count(kind) as usize;

        let rendered = self.render_faces(ctx, entity.location(), lights);
        batches.restore(exclusion)?;
        rendered?;

        for (bloom, face) in self.blooms.iter_mut().zip(&self.faces) {
            bloom.draw(ctx, face.texture())?;
        }
        for (surface, bloom) in self.cube_faces.iter().zip(&self.blooms) {
            let drawer = &self.drawer;
            surface.scoped(ctx, |ctx| drawer.draw_mirrored(ctx, bloom.output()))?;
        }
        ctx.gpu().generate_mipmaps(self.cube);

        let report = CaptureReport {
            kind,
            slot,
            location: entity.location(),
            full_count,
            captured_count,
            restored_count: batches.count(kind),
        };
        tracing::debug!(?report, "cube captured");
        self.reflector_transform = Some(entity.transform);
        self.last = Some(report);
        Ok(Some(report))
    }

    fn render_faces(&mut self, ctx: &mut RenderContext<'_>, location: Vec3, lights: &[LightSource]) -> Result<()> {
        for (i, face) in CUBE_FACES.iter().enumerate() {
            let _span = tracing::trace_span!("capture_face", face = face.name).entered();
            self.cameras[i].view_mut().set_location(location);
            let view = View::of(&self.cameras[i]);

            self.geometry.draw(ctx, &view)?;
            match lights.first() {
                Some(light) => self.shadow.draw(ctx, light, &view, self.geometry.depth())?,
                None => self.shadow.clear(ctx)?,
            }
            let inputs = LightingInputs {
                color: self.geometry.color(),
                normal: self.geometry.normal(),
                position: self.geometry.position(),
                shadow: self.shadow.output(),
            };
            self.lighting.draw(ctx, &inputs, lights, self.config.ambient, &view)?;
            self.sky.draw(ctx, &view, Some(self.geometry.depth()))?;
            self.add.draw(ctx, self.sky.output(), self.lighting.output(), 1.0)?;

            let drawer = &self.drawer;
            let composed = self.add.output();
            self.faces[i].scoped(ctx, |ctx| {
                ctx.clear(&ClearOps::all())?;
                drawer.draw(ctx, composed)
            })?;
        }
        Ok(())
    }

    /// Draw the reflector sampling the captured cube, depth-tested against
    /// the scene's linear depth. Clears to zero when nothing was captured.
    pub fn draw(&mut self, ctx: &mut RenderContext<'_>, view: &View, scene_depth: TextureHandle) -> Result<()> {
        let Some(model) = self.reflector_transform else {
            return self
                .output
                .scoped(ctx, |ctx| ctx.clear(&ClearOps::all()));
        };
        ctx.gpu().write_instances(self.reflector, &[model]);

        let mut uniforms = view.uniforms();
        uniforms.mip_level = self.config.mip_level;
        uniforms.bias = self.config.depth_bias;
        let command = DrawCommand {
            program: self.env_program,
            geometry: Geometry::Mesh {
                mesh: self.reflector_mesh,
                instances: Some(self.reflector),
                count: 1,
            },
            bindings: Bindings::new().texture(0, scene_depth).cube(self.cube),
            uniforms,
        };
        let cull = self.reflector_cull;
        self.output.scoped(ctx, |ctx| {
            ctx.clear(&ClearOps::all())?;
            ctx.set_depth_test(true);
            ctx.set_back_face_culling(cull);
            let result = ctx.draw(&command);
            ctx.reset_raster();
            result
        })
    }

    pub fn output(&self) -> TextureHandle {
        self.output.texture()
    }

    pub fn cube(&self) -> TextureHandle {
        self.cube
    }

    /// Per-face captures before bloom.
    pub fn face_textures(&self) -> Vec<TextureHandle> {
        self.faces.iter().map(RenderSurface::texture).collect()
    }

    pub fn face_size(&self) -> u32 {
        self.face_size
    }

    pub fn last_capture(&self) -> Option<CaptureReport> {
        self.last
    }

    pub fn reflective(&self) -> EntityType {
        self.config.reflective
    }
}

impl ResolutionAware for ReflectionCapture {
    fn set_resolution(&mut self, gpu: &mut dyn Gpu, width: u32, height: u32) -> Result<()> {
        let f = Self::face_size_for(&self.config, width, height);
        tracing::debug!(width, height, face_size = f, "rebuilding cube capture");
        self.geometry.set_resolution(gpu, f, f)?;
        self.shadow.set_resolution(gpu, f, f)?;
        self.lighting.set_resolution(gpu, f, f)?;
        self.sky.set_resolution(gpu, f, f)?;
        self.add.set_resolution(gpu, f, f)?;
        for bloom in &mut self.blooms {
            bloom.set_resolution(gpu, f, f)?;
        }
        for face in &mut self.faces {
            face.resize(gpu, f, f)?;
        }
        let (cube, cube_faces) = Self::create_cube(gpu, f)?;
        self.release_cube(gpu);
        self.cube = cube;
        self.cube_faces = cube_faces;
        self.face_size = f;
        self.output.resize(gpu, width, height)
    }
}

impl RenderPass for ReflectionCapture {
    fn name(&self) -> &'static str {
        "reflection"
    }

    fn as_resolution_aware(&mut self) -> Option<&mut dyn ResolutionAware> {
        Some(self)
    }

    fn release(&mut self, gpu: &mut dyn Gpu) {
        self.geometry.release(gpu);
        self.shadow.release(gpu);
        self.lighting.release(gpu);
        self.sky.release(gpu);
        self.add.release(gpu);
        for bloom in &mut self.blooms {
            bloom.release(gpu);
        }
        for face in &mut self.faces {
            face.release(gpu);
        }
        self.release_cube(gpu);
        self.output.release(gpu);
        self.drawer.release(gpu);
        gpu.release_instance_buffer(self.reflector);
        gpu.release_program(self.env_program);
    }

    any_pass!();
}
