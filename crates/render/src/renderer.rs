use crate::camera::Transformation;
use crate::config::RendererConfig;
use crate::context::RenderContext;
use crate::gpu::{Gpu, TextureHandle};
use crate::instances::InstanceBatches;
use crate::passes::{
    Addition, Bloom, CaptureReport, GeometryPass, LightingInputs, LightingPass, MaterialSet, ReflectionCapture,
    ShadowPass, Skybox, SphereCut, SsaoWithBlur, TextureDrawer, View, pack_lights,
};
use crate::pipeline::{PassId, PassRegistry};
use crate::Result;
use orrery_assets::ContentProvider;
use orrery_common::{LightSource, ViewEntity};

/// What one call to [`DeferredRenderer::render`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub draw_calls: usize,
    /// Instances in the frame's batches.
    pub instances: usize,
    pub bloom_applied: bool,
    /// Whether a reflection cube was captured.
    pub captured: bool,
}

/// Intermediate buffers of the last frame, for inspection and debug views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTextures {
    pub color: TextureHandle,
    pub normal: TextureHandle,
    pub depth: TextureHandle,
    pub position: TextureHandle,
    pub shadow: TextureHandle,
    pub environment: Option<TextureHandle>,
    pub lighting: TextureHandle,
    pub sky: TextureHandle,
    pub composed: TextureHandle,
    pub bloom: TextureHandle,
    pub final_output: TextureHandle,
}

/// The full deferred pipeline over a pass registry.
///
/// # Invariants
/// - Passes run strictly in registration order, one frame at a time.
/// - The context is neutral again when `render` returns.
/// - Batches match the entity snapshot of the last frame once it completes.
pub struct DeferredRenderer {
    config: RendererConfig,
    lights: Vec<LightSource>,
    bloom_enabled: bool,
    size: (u32, u32),
    materials: MaterialSet,
    batches: InstanceBatches,
    registry: PassRegistry,
    geometry: PassId<GeometryPass>,
    shadow: PassId<ShadowPass>,
    reflection: Option<PassId<ReflectionCapture>>,
    add_env: PassId<Addition>,
    lighting: PassId<LightingPass>,
    sphere_cut: PassId<SphereCut>,
    skybox: PassId<Skybox>,
    add_sky: PassId<Addition>,
    bloom: PassId<Bloom>,
    ssao: PassId<SsaoWithBlur>,
    present: PassId<TextureDrawer>,
    last_capture: Option<CaptureReport>,
}

impl DeferredRenderer {
    /// Load materials and build every pass at `width` x `height`. Any
    /// missing asset or invalid light list fails here.
    pub fn new(
        gpu: &mut dyn Gpu,
        content: &dyn ContentProvider,
        config: RendererConfig,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let _span = tracing::info_span!("renderer_init", backend = gpu.backend_name(), width, height).entered();
        pack_lights(&config.lights)?;
        let materials = MaterialSet::load(gpu, content, &config.materials)?;
        let drawer = TextureDrawer::new(gpu, content)?;

        let mut registry = PassRegistry::new();
        let geometry = registry.add(GeometryPass::new(
            gpu,
            content,
            materials.clone(),
            config.depth_sentinel,
            width,
            height,
        )?);
        let shadow = registry.add(ShadowPass::new(gpu, content, materials.clone(), &config.shadow, width, height)?);
        let reflection = if config.reflection.enabled {
            Some(registry.add(ReflectionCapture::new(gpu, content, &materials, &config, width, height)?))
        } else {
            None
        };
        let add_env = registry.add(Addition::new(gpu, content, width, height)?);
        let lighting = registry.add(LightingPass::new(
            gpu,
            content,
            config.hemisphere_top,
            config.hemisphere_bottom,
            width,
            height,
        )?);
        let sphere_cut = registry.add(SphereCut::new(
            gpu,
            content,
            &materials,
            config.sphere_cut_radius,
            width,
            height,
        )?);
        let skybox = registry.add(Skybox::new(gpu, content, &materials, &drawer, &config.skybox, width, height)?);
        let add_sky = registry.add(Addition::new(gpu, content, width, height)?);
        let bloom = registry.add(Bloom::new(gpu, content, &config.bloom, width, height)?);
        let ssao = registry.add(SsaoWithBlur::new(
            gpu,
            content,
            &config.ssao,
            config.depth_sentinel,
            width,
            height,
        )?);
        let present = registry.add(drawer);
        tracing::info!(passes = registry.len(), "deferred renderer ready");

        Ok(Self {
            lights: config.lights.clone(),
            bloom_enabled: config.bloom.enabled,
            size: (width, height),
            materials,
            batches: InstanceBatches::new(),
            registry,
            geometry,
            shadow,
            reflection,
            add_env,
            lighting,
            sphere_cut,
            skybox,
            add_sky,
            bloom,
            ssao,
            present,
            last_capture: None,
            config,
        })
    }

    /// Render one frame of `entities` seen through `camera` and draw the
    /// result into the context's active target.
    pub fn render(
        &mut self,
        ctx: &mut RenderContext<'_>,
        camera: &dyn Transformation,
        entities: &[ViewEntity],
    ) -> Result<FrameStats> {
        let _span = tracing::debug_span!("frame", entities = entities.len()).entered();
        let calls_before = ctx.draw_calls();

        self.batches.rebuild(entities);
        self.registry.broadcast_transforms(ctx.gpu(), &self.batches);
        let view = View::of(camera);

        let geometry = self.registry.get(self.geometry)?;
        geometry.draw(ctx, &view)?;
        let gbuffer = LightingInputs {
            color: geometry.color(),
            normal: geometry.normal(),
            position: geometry.position(),
            shadow: self.registry.get(self.shadow)?.output(),
        };
        let depth = geometry.depth();

        let shadow = self.registry.get_mut(self.shadow)?;
        match self.lights.first() {
            Some(light) => shadow.draw(ctx, light, &view, depth)?,
            None => shadow.clear(ctx)?,
        }

        let mut color = gbuffer.color;
        self.last_capture = None;
        if let Some(id) = self.reflection {
            let reflection = self.registry.get_mut(id)?;
            self.last_capture = reflection.capture(ctx, &mut self.batches, entities, &self.lights)?;
            reflection.draw(ctx, &view, depth)?;
            let environment = reflection.output();
            let add_env = self.registry.get_mut(self.add_env)?;
            add_env.draw(ctx, gbuffer.color, environment, self.config.reflection.mix)?;
            color = add_env.output();
        }

        let lighting = self.registry.get_mut(self.lighting)?;
        lighting.draw(ctx, &LightingInputs { color, ..gbuffer }, &self.lights, self.config.ambient, &view)?;
        let lit = lighting.output();

        let sphere_cut = self.registry.get_mut(self.sphere_cut)?;
        sphere_cut.draw(ctx, &view, lit, depth)?;
        let cut = sphere_cut.output();

        let skybox = self.registry.get_mut(self.skybox)?;
        skybox.draw(ctx, &view, Some(depth))?;
        let sky = skybox.output();

        let add_sky = self.registry.get_mut(self.add_sky)?;
        add_sky.draw(ctx, sky, cut, 1.0)?;
        let mut composed = add_sky.output();

        let bloom_applied = self.bloom_enabled;
        if bloom_applied {
            let bloom = self.registry.get_mut(self.bloom)?;
            bloom.draw(ctx, composed)?;
            composed = bloom.output();
        }

        let ssao = self.registry.get(self.ssao)?;
        ssao.draw(ctx, depth, composed)?;
        let finished = ssao.output();
        self.registry.get(self.present)?.draw(ctx, finished)?;

        if !ctx.is_neutral() {
            tracing::warn!(raster = ?ctx.raster(), depth = ctx.stack_depth(), "pipeline left context state dirty");
        }
        debug_assert!(ctx.is_neutral());

        let stats = FrameStats {
            draw_calls: ctx.draw_calls() - calls_before,
            instances: self.batches.total(),
            bloom_applied,
            captured: self.last_capture.is_some(),
        };
        tracing::debug!(?stats, "frame rendered");
        Ok(stats)
    }

    /// Rebuild every surface at the new size. Must happen before the next
    /// `render`.
    pub fn resize(&mut self, gpu: &mut dyn Gpu, width: u32, height: u32) -> Result<()> {
        self.registry.broadcast_resolution(gpu, width, height)?;
        self.size = (width, height);
        tracing::info!(width, height, "renderer resized");
        Ok(())
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn set_bloom(&mut self, enabled: bool) {
        self.bloom_enabled = enabled;
    }

    pub fn bloom_enabled(&self) -> bool {
        self.bloom_enabled
    }

    pub fn lights(&self) -> &[LightSource] {
        &self.lights
    }

    /// Replace the light list, rejecting more lights than the shader holds.
    pub fn set_lights(&mut self, lights: Vec<LightSource>) -> Result<()> {
        pack_lights(&lights)?;
        self.lights = lights;
        Ok(())
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn batches(&self) -> &InstanceBatches {
        &self.batches
    }

    pub fn last_capture(&self) -> Option<CaptureReport> {
        self.last_capture
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.registry.names()
    }

    pub fn textures(&self) -> Result<FrameTextures> {
        let geometry = self.registry.get(self.geometry)?;
        let environment = match self.reflection {
            Some(id) => Some(self.registry.get(id)?.output()),
            None => None,
        };
        Ok(FrameTextures {
            color: geometry.color(),
            normal: geometry.normal(),
            depth: geometry.depth(),
            position: geometry.position(),
            shadow: self.registry.get(self.shadow)?.output(),
            environment,
            lighting: self.registry.get(self.lighting)?.output(),
            sky: self.registry.get(self.skybox)?.output(),
            composed: self.registry.get(self.add_sky)?.output(),
            bloom: self.registry.get(self.bloom)?.output(),
            final_output: self.final_output()?,
        })
    }

    /// Buffer drawn by the final present.
    pub fn final_output(&self) -> Result<TextureHandle> {
        Ok(self.registry.get(self.ssao)?.output())
    }

    pub fn reflection_cube(&self) -> Result<Option<TextureHandle>> {
        match self.reflection {
            Some(id) => Ok(Some(self.registry.get(id)?.cube())),
            None => Ok(None),
        }
    }

    /// Free every device resource of the pipeline.
    pub fn release(mut self, gpu: &mut dyn Gpu) {
        self.registry.release_all(gpu);
        self.materials.release(gpu);
        tracing::debug!("renderer released");
    }
}
