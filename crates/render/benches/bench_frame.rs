use std::hint::black_box;
use std::time::Instant;

use glam::{Mat4, Vec3};
use orrery_assets::AssetStore;
use orrery_common::{EntityType, ViewEntity};
use orrery_render::gpu::{TargetDesc, TextureDesc, TextureFormat};
use orrery_render::{
    DeferredRenderer, Gpu, InstanceBatches, OrbitCamera, OrbitView, Perspective, RenderContext, RendererConfig,
    SoftwareGpu,
};
use orrery_scene::SceneModel;

fn camera(width: u32, height: u32) -> OrbitCamera {
    OrbitCamera::new(
        OrbitView::new(60.0, 30.0, 20.0, Vec3::new(0.0, 15.0, 0.0)),
        Perspective::new(60.0, width as f32 / height as f32, 0.1, 1000.0),
    )
}

fn bench_frame(width: u32, height: u32, config: RendererConfig, label: &str, iterations: usize) {
    let mut gpu = SoftwareGpu::new();
    let store = AssetStore::with_builtins();
    let mut renderer = DeferredRenderer::new(&mut gpu, &store, config, width, height).expect("renderer");
    let window = gpu.create_texture(&TextureDesc::d2("window", width, height, TextureFormat::Rgba8Unorm));
    let target = gpu
        .create_target(&TargetDesc {
            label: "window",
            colors: vec![window.into()],
            depth: None,
        })
        .expect("window target");
    let camera = camera(width, height);
    let mut scene = SceneModel::new();

    let start = Instant::now();
    for _ in 0..iterations {
        scene.update(1.0 / 60.0);
        let entities = scene.view_entities();
        let mut ctx = RenderContext::with_output(&mut gpu, target).expect("context");
        let _ = black_box(renderer.render(&mut ctx, &camera, black_box(&entities)).expect("frame"));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  {label} ({width}x{height}, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}");
}

fn bench_batch_rebuild(entity_count: usize, iterations: usize) {
    let side = (entity_count as f32).sqrt().ceil() as usize;
    let entities: Vec<ViewEntity> = (0..entity_count)
        .map(|i| {
            let kind = EntityType::ALL[i % EntityType::COUNT];
            let position = Vec3::new((i % side) as f32 * 4.0, 0.0, (i / side) as f32 * 4.0);
            ViewEntity::new(kind, Mat4::from_translation(position))
        })
        .collect();
    let mut batches = InstanceBatches::new();

    let start = Instant::now();
    for _ in 0..iterations {
        batches.rebuild(black_box(&entities));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  batch rebuild ({} entities, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}",
        entities.len()
    );
}

fn main() {
    println!("=== Frame Benchmarks (software backend) ===\n");

    println!("Full pipeline:");
    bench_frame(64, 48, RendererConfig::default(), "default", 5);
    bench_frame(160, 120, RendererConfig::default(), "default", 2);

    println!("\nWithout reflection capture:");
    let mut config = RendererConfig::default();
    config.reflection.enabled = false;
    bench_frame(64, 48, config.clone(), "no reflection", 5);
    config.bloom.enabled = false;
    bench_frame(64, 48, config, "no reflection, no bloom", 5);

    println!("\nInstance batches:");
    bench_batch_rebuild(100, 10000);
    bench_batch_rebuild(10000, 100);

    println!("\n=== Done ===");
}
