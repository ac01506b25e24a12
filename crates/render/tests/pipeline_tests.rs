use glam::{Mat4, Vec3};
use orrery_assets::AssetStore;
use orrery_common::{EntityType, LightSource, ViewEntity};
use orrery_render::gpu::{TargetDesc, TargetHandle, TextureDesc, TextureFormat};
use orrery_render::{
    DeferredRenderer, Gpu, InstanceBatches, OrbitCamera, OrbitView, Perspective, RenderContext, RenderError,
    RendererConfig, ResourceStats, SoftwareGpu, TextureHandle,
};
use orrery_scene::SceneModel;

const W: u32 = 32;
const H: u32 = 24;

fn camera(width: u32, height: u32) -> OrbitCamera {
    OrbitCamera::new(
        OrbitView::new(5.0, 0.0, 30.0, Vec3::ZERO),
        Perspective::new(60.0, width as f32 / height as f32, 0.1, 1000.0),
    )
}

fn window(gpu: &mut SoftwareGpu, width: u32, height: u32) -> (TextureHandle, TargetHandle) {
    let texture = gpu.create_texture(&TextureDesc::d2("window", width, height, TextureFormat::Rgba8Unorm));
    let target = gpu
        .create_target(&TargetDesc {
            label: "window",
            colors: vec![texture.into()],
            depth: None,
        })
        .unwrap();
    (texture, target)
}

fn single_light_config() -> RendererConfig {
    RendererConfig {
        lights: vec![LightSource::directional(Vec3::NEG_Y, Vec3::ONE)],
        ..RendererConfig::default()
    }
}

fn luminance(p: [f32; 4]) -> f32 {
    0.2126 * p[0] + 0.7152 * p[1] + 0.0722 * p[2]
}

struct Harness {
    gpu: SoftwareGpu,
    renderer: DeferredRenderer,
    window: (TextureHandle, TargetHandle),
    camera: OrbitCamera,
}

impl Harness {
    fn new(config: RendererConfig) -> Self {
        let mut gpu = SoftwareGpu::new();
        let store = AssetStore::with_builtins();
        let renderer = DeferredRenderer::new(&mut gpu, &store, config, W, H).unwrap();
        let window = window(&mut gpu, W, H);
        Self {
            gpu,
            renderer,
            window,
            camera: camera(W, H),
        }
    }

    fn frame(&mut self, entities: &[ViewEntity]) -> orrery_render::FrameStats {
        let mut ctx = RenderContext::with_output(&mut self.gpu, self.window.1).unwrap();
        let stats = self.renderer.render(&mut ctx, &self.camera, entities).unwrap();
        assert!(ctx.is_neutral());
        assert_eq!(ctx.stack_depth(), 1);
        stats
    }

    fn read(&mut self, texture: TextureHandle) -> orrery_render::Readback {
        self.gpu.read_texture(texture, 0).unwrap()
    }
}

#[test]
fn lit_entity_over_sky_background() {
    let mut config = single_light_config();
    config.bloom.enabled = false;
    let mut h = Harness::new(config);
    let stats = h.frame(&[ViewEntity::new(EntityType::Mars, Mat4::IDENTITY)]);
    assert_eq!(stats.instances, 1);
    assert!(!stats.captured);
    assert!(stats.draw_calls > 0);

    let textures = h.renderer.textures().unwrap();
    let output = h.read(h.window.0);
    assert_eq!(output, h.read(textures.final_output));

    assert!(luminance(output.pixel(W / 2, H / 2)) > 0.0);
    assert!(h.read(textures.depth).pixel(W / 2, H / 2)[0] < 10.0);

    let corner = (0, 0);
    assert_eq!(h.read(textures.depth).pixel(corner.0, corner.1)[0], 1000.0);
    assert_eq!(h.read(textures.shadow).pixel(corner.0, corner.1)[0], 0.0);
    assert_eq!(h.read(textures.lighting).pixel(corner.0, corner.1), [0.0; 4]);
    let composed = h.read(textures.composed).pixel(corner.0, corner.1);
    assert_eq!(composed, h.read(textures.sky).pixel(corner.0, corner.1));
    assert_eq!(output.pixel(corner.0, corner.1), composed);
}

#[test]
fn bloom_changes_only_images_with_bright_pixels() {
    let entities = [ViewEntity::new(EntityType::Mars, Mat4::IDENTITY)];
    let render = |threshold: f32, bloom: bool| {
        let mut config = single_light_config();
        config.bloom.threshold = threshold;
        config.bloom.kernel = 6.0;
        let mut h = Harness::new(config);
        h.renderer.set_bloom(bloom);
        let stats = h.frame(&entities);
        assert_eq!(stats.bloom_applied, bloom);
        let composed = h.renderer.textures().unwrap().composed;
        (h.read(composed), h.read(h.window.0))
    };

    let (composed, with_bloom) = render(0.05, true);
    assert!(composed.pixels.iter().any(|p| luminance(*p) > 0.05));
    let (_, without_bloom) = render(0.05, false);
    assert_ne!(with_bloom, without_bloom);

    let (composed, with_bloom) = render(2.0, true);
    assert!(composed.pixels.iter().all(|p| luminance(*p) <= 2.0));
    let (_, without_bloom) = render(2.0, false);
    assert_eq!(with_bloom, without_bloom);
}

#[test]
fn resize_rebuilds_surfaces_without_leaks() {
    let mut h = Harness::new(single_light_config());
    let entities = SceneModel::new().view_entities();
    h.frame(&entities);
    let before = h.gpu.stats();

    for (w, h_) in [(20, 10), (7, 13), (W, H)] {
        h.renderer.resize(&mut h.gpu, w, h_).unwrap();
        assert_eq!(h.gpu.stats(), before);
        let textures = h.renderer.textures().unwrap();
        for texture in [
            textures.color,
            textures.normal,
            textures.depth,
            textures.position,
            textures.shadow,
            textures.lighting,
            textures.sky,
            textures.composed,
            textures.bloom,
            textures.final_output,
        ] {
            let desc = h.gpu.texture_desc(texture).unwrap();
            assert_eq!((desc.width, desc.height), (w, h_));
        }
        let environment = h.gpu.texture_desc(textures.environment.unwrap()).unwrap();
        assert_eq!((environment.width, environment.height), (w, h_));
    }
    assert_eq!(h.renderer.size(), (W, H));
    h.frame(&entities);
}

#[test]
fn zero_size_surfaces_are_rejected() {
    let mut h = Harness::new(single_light_config());
    let entities = SceneModel::new().view_entities();
    h.frame(&entities);
    let before = h.gpu.stats();
    assert!(matches!(
        h.renderer.resize(&mut h.gpu, 0, 10),
        Err(RenderError::FramebufferIncomplete { .. })
    ));
    assert_eq!(h.gpu.stats(), before);
    assert_eq!(h.renderer.size(), (W, H));

    let textures = h.renderer.textures().unwrap();
    let desc = h.gpu.texture_desc(textures.color).unwrap();
    assert_eq!((desc.width, desc.height), (W, H));
    h.frame(&entities);
}

#[test]
fn light_capacity_is_enforced() {
    let lights = |n: usize| {
        (0..n)
            .map(|i| LightSource::directional(Vec3::new(i as f32, -1.0, 0.0), Vec3::ONE))
            .collect::<Vec<_>>()
    };
    let mut h = Harness::new(single_light_config());
    assert!(h.renderer.set_lights(lights(8)).is_ok());
    h.frame(&[ViewEntity::new(EntityType::Mercury, Mat4::IDENTITY)]);
    assert!(matches!(
        h.renderer.set_lights(lights(9)),
        Err(RenderError::TooManyLightSources { count: 9, capacity: 8 })
    ));
    assert_eq!(h.renderer.lights().len(), 8);

    let mut gpu = SoftwareGpu::new();
    let config = RendererConfig {
        lights: lights(9),
        ..RendererConfig::default()
    };
    assert!(matches!(
        DeferredRenderer::new(&mut gpu, &AssetStore::with_builtins(), config, W, H),
        Err(RenderError::TooManyLightSources { .. })
    ));
}

#[test]
fn reflector_is_excluded_from_its_own_capture() {
    let mut h = Harness::new(single_light_config());
    let entities = vec![
        ViewEntity::new(EntityType::Mars, Mat4::from_translation(Vec3::new(3.0, 0.0, 0.0))),
        ViewEntity::new(EntityType::Maze, Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0))),
        ViewEntity::new(EntityType::Maze, Mat4::from_translation(Vec3::new(-3.0, 0.0, 0.0))),
    ];
    let stats = h.frame(&entities);
    assert!(stats.captured);
    assert_eq!(stats.instances, 3);

    let report = h.renderer.last_capture().unwrap();
    assert_eq!(report.kind, EntityType::Maze);
    assert_eq!(report.slot, 0);
    assert_eq!(report.location, Vec3::new(0.0, 1.0, 0.0));
    assert_eq!(report.full_count, 2);
    assert_eq!(report.captured_count, 1);
    assert_eq!(report.restored_count, 2);
    assert_eq!(h.renderer.batches(), &InstanceBatches::from_entities(&entities));
}

#[test]
fn capture_is_skipped_without_a_reflector_or_when_disabled() {
    let mut h = Harness::new(single_light_config());
    assert!(!h.frame(&[ViewEntity::new(EntityType::Plane, Mat4::IDENTITY)]).captured);
    assert!(h.renderer.last_capture().is_none());

    let mut config = single_light_config();
    config.reflection.enabled = false;
    let mut h = Harness::new(config);
    assert!(h.renderer.reflection_cube().unwrap().is_none());
    assert!(!h.renderer.pass_names().contains(&"reflection"));
    assert!(!h.frame(&[ViewEntity::new(EntityType::Maze, Mat4::IDENTITY)]).captured);
}

#[test]
fn default_scene_renders_frames_in_sequence() {
    let mut h = Harness::new(RendererConfig::default());
    h.camera = OrbitCamera::new(
        OrbitView::new(60.0, 30.0, 20.0, Vec3::new(0.0, 15.0, 0.0)),
        Perspective::new(60.0, W as f32 / H as f32, 0.1, 1000.0),
    );
    let mut scene = SceneModel::new();
    for _ in 0..3 {
        let entities = scene.view_entities();
        let stats = h.frame(&entities);
        assert_eq!(stats.instances, scene.entity_count());
        assert!(stats.captured);
        assert_eq!(h.renderer.batches().total(), entities.len());
        scene.update(0.1);
    }
    let cube = h.renderer.reflection_cube().unwrap().unwrap();
    let face = h.gpu.read_texture(cube, 2).unwrap();
    assert!(face.pixels.iter().any(|p| luminance(*p) > 0.0));
}

#[test]
fn rendering_without_a_target_fails() {
    let mut gpu = SoftwareGpu::new();
    let store = AssetStore::with_builtins();
    let mut renderer = DeferredRenderer::new(&mut gpu, &store, single_light_config(), W, H).unwrap();
    let mut ctx = RenderContext::new(&mut gpu);
    let result = renderer.render(&mut ctx, &camera(W, H), &[]);
    assert!(matches!(result, Err(RenderError::NoActiveTarget)));
    assert!(ctx.is_neutral());
}

#[test]
fn release_frees_every_resource() {
    let mut gpu = SoftwareGpu::new();
    let store = AssetStore::with_builtins();
    let mut renderer = DeferredRenderer::new(&mut gpu, &store, RendererConfig::default(), W, H).unwrap();
    let live = gpu.stats();
    assert!(live.live_textures > 0);
    assert!(live.live_programs > 0);
    assert_eq!(live.live_meshes, EntityType::COUNT + 1);
    assert_eq!(live.live_storage_buffers, 2);

    let (texture, target) = window(&mut gpu, W, H);
    let mut ctx = RenderContext::with_output(&mut gpu, target).unwrap();
    renderer.render(&mut ctx, &camera(W, H), &SceneModel::new().view_entities()).unwrap();
    drop(ctx);
    gpu.release_target(target);
    gpu.release_texture(texture);

    renderer.release(&mut gpu);
    assert_eq!(gpu.stats(), ResourceStats::default());
}
