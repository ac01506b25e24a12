use super::{RenderPass, ResolutionAware, TransformAware, View, any_pass, geometry_program};
use crate::config::Materials;
use crate::context::RenderContext;
use crate::gpu::{
    Bindings, ClearOps, DrawCommand, Geometry, Gpu, InstanceBufferHandle, MeshHandle, ProgramHandle,
    TextureHandle, WrapMode,
};
use crate::instances::InstanceBatches;
use crate::surface::{RenderSurface, SurfaceSpec};
use crate::Result;
use glam::Vec3;
use orrery_assets::ContentProvider;
use orrery_common::EntityType;

/// Device resources for drawing one entity type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypeMaterial {
    pub mesh: MeshHandle,
    pub diffuse: Option<TextureHandle>,
    pub normal_map: Option<TextureHandle>,
    pub color: Vec3,
    pub cull_back: bool,
}

/// Meshes and textures of every entity type, loaded once and shared by the
/// passes that draw scene geometry.
#[derive(Debug, Clone)]
pub struct MaterialSet {
    types: [TypeMaterial; EntityType::COUNT],
    flat_normal: TextureHandle,
    sphere: MeshHandle,
}

impl MaterialSet {
    pub fn load(gpu: &mut dyn Gpu, content: &dyn ContentProvider, materials: &Materials) -> Result<Self> {
        let [maze, plane, mercury, mars] = EntityType::ALL;
        let types = [
            Self::load_type(gpu, content, materials, maze)?,
            Self::load_type(gpu, content, materials, plane)?,
            Self::load_type(gpu, content, materials, mercury)?,
            Self::load_type(gpu, content, materials, mars)?,
        ];
        let flat_normal = gpu.upload_texture(&content.load_texture("flat_normal")?, WrapMode::Repeat);
        // Inside faces point outward so sky and cut spheres survive back-face culling.
        let sphere = gpu.create_mesh(&content.load_mesh("uv_sphere")?.inverted());
        Ok(Self {
            types,
            flat_normal,
            sphere,
        })
    }

    fn load_type(
        gpu: &mut dyn Gpu,
        content: &dyn ContentProvider,
        materials: &Materials,
        kind: EntityType,
    ) -> Result<TypeMaterial> {
        let config = materials.get(kind);
        let mut texture = |name: &Option<String>| -> Result<Option<TextureHandle>> {
            match name {
                Some(name) => Ok(Some(gpu.upload_texture(&content.load_texture(name)?, WrapMode::Repeat))),
                None => Ok(None),
            }
        };
        let diffuse = texture(&config.diffuse)?;
        let normal_map = texture(&config.normal_map)?;
        let mesh = gpu.create_mesh(&content.load_mesh(&config.mesh)?);
        tracing::debug!(%kind, mesh = %config.mesh, "material loaded");
        Ok(TypeMaterial {
            mesh,
            diffuse,
            normal_map,
            color: config.color,
            cull_back: !config.disable_culling,
        })
    }

    pub fn get(&self, kind: EntityType) -> &TypeMaterial {
        &self.types[kind.index()]
    }

    pub fn flat_normal(&self) -> TextureHandle {
        self.flat_normal
    }

    /// Unit sphere with inward-facing triangles.
    pub fn inner_sphere(&self) -> MeshHandle {
        self.sphere
    }

    /// Free the shared meshes and textures. Every pass holding a clone
    /// must be done with them.
    pub fn release(&self, gpu: &mut dyn Gpu) {
        for material in &self.types {
            for texture in material.diffuse.iter().chain(material.normal_map.iter()) {
                gpu.release_texture(*texture);
            }
            gpu.release_mesh(material.mesh);
        }
        gpu.release_texture(self.flat_normal);
        gpu.release_mesh(self.sphere);
    }
}

/// One instance buffer per entity type plus the live count of each.
#[derive(Debug, Clone)]
pub struct InstanceSlots {
    buffers: [InstanceBufferHandle; EntityType::COUNT],
    counts: [u32; EntityType::COUNT],
}

impl InstanceSlots {
    pub fn new(gpu: &mut dyn Gpu) -> Self {
        Self {
            buffers: EntityType::ALL.map(|_| gpu.create_instance_buffer(16)),
            counts: [0; EntityType::COUNT],
        }
    }

    pub fn upload(&mut self, gpu: &mut dyn Gpu, batches: &InstanceBatches) {
        for kind in EntityType::ALL {
            let transforms = batches.transforms(kind);
            if !transforms.is_empty() {
                gpu.write_instances(self.buffers[kind.index()], transforms);
            }
            self.counts[kind.index()] = transforms.len() as u32;
        }
    }

    pub fn count(&self, kind: EntityType) -> u32 {
        self.counts[kind.index()]
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }

    pub fn release(&self, gpu: &mut dyn Gpu) {
        for buffer in self.buffers {
            gpu.release_instance_buffer(buffer);
        }
    }

    /// Instanced geometry of one type.
    pub fn geometry(&self, kind: EntityType, mesh: MeshHandle) -> Geometry {
        Geometry::Mesh {
            mesh,
            instances: Some(self.buffers[kind.index()]),
            count: self.counts[kind.index()],
        }
    }
}

/// Fills the G-buffer: albedo, world normal, linear depth, world position.
///
/// Linear depth is cleared to the sentinel so "no geometry" reads as far
/// away rather than as depth 0.
pub struct GeometryPass {
    program: ProgramHandle,
    surface: RenderSurface,
    materials: MaterialSet,
    instances: InstanceSlots,
    depth_sentinel: f32,
}

impl GeometryPass {
    pub fn new(
        gpu: &mut dyn Gpu,
        content: &dyn ContentProvider,
        materials: MaterialSet,
        depth_sentinel: f32,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let program = geometry_program(gpu, content, "deferred.*")?;
        let surface = RenderSurface::create(gpu, width, height, &Self::spec())?;
        tracing::info!(width, height, "geometry pass ready");
        Ok(Self {
            program,
            surface,
            materials,
            instances: InstanceSlots::new(gpu),
            depth_sentinel,
        })
    }

    fn spec() -> SurfaceSpec {
        SurfaceSpec::new("gbuffer")
            .color(4, false)
            .color(3, true)
            .color(1, true)
            .color(3, true)
            .with_depth()
    }

    pub fn draw(&self, ctx: &mut RenderContext<'_>, view: &View) -> Result<()> {
        let _span = tracing::trace_span!("geometry").entered();
        self.surface.scoped(ctx, |ctx| {
            ctx.clear(
                &ClearOps::color([0.0; 4])
                    .with_override(2, [self.depth_sentinel, 0.0, 0.0, 1.0])
                    .with_depth(1.0),
            )?;
            ctx.set_depth_test(true);
            let result = self.draw_types(ctx, view);
            ctx.reset_raster();
            result
        })
    }

    fn draw_types(&self, ctx: &mut RenderContext<'_>, view: &View) -> Result<()> {
        for kind in EntityType::ALL {
            if self.instances.count(kind) == 0 {
                continue;
            }
            let material = self.materials.get(kind);
            let mut uniforms = view.uniforms();
            uniforms.material_color = material.color.extend(1.0).to_array();
            uniforms.depth_sentinel = self.depth_sentinel;

            let mut bindings = Bindings::new();
            if let Some(diffuse) = material.diffuse {
                bindings = bindings.texture(0, diffuse);
                uniforms.textured = 1.0;
            }
            match material.normal_map {
                Some(normal) => {
                    bindings = bindings.texture(1, normal);
                    uniforms.normal_mapping = 1.0;
                }
                None => bindings = bindings.texture(1, self.materials.flat_normal()),
            }

            ctx.set_back_face_culling(material.cull_back);
            ctx.draw(&DrawCommand {
                program: self.program,
                geometry: self.instances.geometry(kind, material.mesh),
                bindings,
                uniforms,
            })?;
        }
        Ok(())
    }

    pub fn color(&self) -> TextureHandle {
        self.surface.textures()[0]
    }

    pub fn normal(&self) -> TextureHandle {
        self.surface.textures()[1]
    }

    /// Linear distance to the camera.
    pub fn depth(&self) -> TextureHandle {
        self.surface.textures()[2]
    }

    pub fn position(&self) -> TextureHandle {
        self.surface.textures()[3]
    }

    pub fn instance_count(&self, kind: EntityType) -> u32 {
        self.instances.count(kind)
    }

    pub fn size(&self) -> (u32, u32) {
        self.surface.size()
    }
}

impl ResolutionAware for GeometryPass {
    fn set_resolution(&mut self, gpu: &mut dyn Gpu, width: u32, height: u32) -> Result<()> {
        tracing::debug!(width, height, "rebuilding G-buffer");
        self.surface.resize(gpu, width, height)
    }
}

impl TransformAware for GeometryPass {
    fn set_transforms(&mut self, gpu: &mut dyn Gpu, batches: &InstanceBatches) {
        self.instances.upload(gpu, batches);
    }
}

impl RenderPass for GeometryPass {
    fn name(&self) -> &'static str {
        "geometry"
    }

    fn as_resolution_aware(&mut self) -> Option<&mut dyn ResolutionAware> {
        Some(self)
    }

    fn as_transform_aware(&mut self) -> Option<&mut dyn TransformAware> {
        Some(self)
    }

    fn release(&mut self, gpu: &mut dyn Gpu) {
        self.surface.release(gpu);
        self.instances.release(gpu);
        gpu.release_program(self.program);
    }

    any_pass!();
}
