use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glam::Vec3;
use orrery_assets::AssetStore;
use orrery_render::gpu::{TargetDesc, TextureDesc, TextureFormat};
use orrery_render::{
    DeferredRenderer, FrameStats, Gpu, OrbitCamera, OrbitView, Perspective, Readback, RenderContext,
    RendererConfig, SoftwareGpu,
};
use orrery_render_wgpu::WgpuGpu;
use orrery_scene::SceneModel;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "orrery-cli", about = "Headless tools for the orrery renderer")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Print the default renderer config as YAML
    DumpConfig,
    /// Render the scene offscreen and save the last frame as PNG
    Render(RenderArgs),
}

#[derive(clap::Args)]
struct RenderArgs {
    /// Output PNG path
    #[arg(short, long, default_value = "orrery.png")]
    output: PathBuf,
    #[arg(long, default_value = "320")]
    width: u32,
    #[arg(long, default_value = "240")]
    height: u32,
    /// Frames to simulate before saving
    #[arg(short, long, default_value = "1")]
    frames: u32,
    /// Skip the bloom branch
    #[arg(long)]
    no_bloom: bool,
    /// Renderer config file (YAML, or JSON by extension)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Directory searched for meshes, textures and shaders before the built-ins
    #[arg(long)]
    assets: Option<PathBuf>,
    /// Render on a headless wgpu device instead of the software backend
    #[arg(long)]
    gpu: bool,
}

fn camera(width: u32, height: u32) -> OrbitCamera {
    OrbitCamera::new(
        OrbitView::new(60.0, 30.0, 20.0, Vec3::new(0.0, 15.0, 0.0)),
        Perspective::new(60.0, width as f32 / height.max(1) as f32, 0.1, 1000.0),
    )
}

fn render(gpu: &mut dyn Gpu, args: &RenderArgs) -> Result<(Readback, FrameStats)> {
    let config = match &args.config {
        Some(path) => RendererConfig::load(path)?,
        None => RendererConfig::default(),
    };
    let mut store = AssetStore::with_builtins();
    if let Some(root) = &args.assets {
        store = store.with_root(root);
    }

    let mut renderer = DeferredRenderer::new(gpu, &store, config, args.width, args.height)?;
    renderer.set_bloom(!args.no_bloom);
    let window = gpu.create_texture(&TextureDesc::d2("output", args.width, args.height, TextureFormat::Rgba8Unorm));
    let target = gpu
        .create_target(&TargetDesc {
            label: "output",
            colors: vec![window.into()],
            depth: None,
        })
        .map_err(|reason| anyhow::anyhow!("output target incomplete: {reason}"))?;

    let camera = camera(args.width, args.height);
    let mut scene = SceneModel::new();
    let mut stats = FrameStats::default();
    for frame in 0..args.frames.max(1) {
        let entities = scene.view_entities();
        let mut ctx = RenderContext::with_output(gpu, target)?;
        stats = renderer.render(&mut ctx, &camera, &entities)?;
        tracing::debug!(frame, draw_calls = stats.draw_calls, "frame rendered");
        scene.update(1.0 / 60.0);
    }
    gpu.flush();
    let pixels = gpu.read_texture(window, 0)?;

    renderer.release(gpu);
    gpu.release_target(target);
    gpu.release_texture(window);
    Ok((pixels, stats))
}

fn write_png(path: &Path, frame: &Readback) -> Result<()> {
    let image = image::RgbaImage::from_raw(frame.width, frame.height, frame.to_rgba8())
        .context("readback does not match its dimensions")?;
    image
        .save(path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("orrery-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", orrery_common::crate_info());
            println!("scene: {}", orrery_scene::crate_info());
            println!("assets: {}", orrery_assets::crate_info());
            println!("render: {}", orrery_render::crate_info());
            println!("render-wgpu: {}", orrery_render_wgpu::crate_info());
            let store = AssetStore::with_builtins();
            println!(
                "built-in assets: {} meshes, {} textures, {} programs",
                store.mesh_names().count(),
                store.texture_names().count(),
                store.program_names().count()
            );
            println!("scene entities: {}", SceneModel::new().entity_count());
        }
        Commands::DumpConfig => {
            print!("{}", RendererConfig::default().to_yaml()?);
        }
        Commands::Render(args) => {
            let (frame, stats) = if args.gpu {
                let mut gpu = WgpuGpu::headless()?;
                render(&mut gpu, &args)?
            } else {
                let mut gpu = SoftwareGpu::new();
                render(&mut gpu, &args)?
            };
            write_png(&args.output, &frame)?;
            println!(
                "wrote {} ({}x{}): {} draw calls, {} instances, bloom {}, capture {}",
                args.output.display(),
                frame.width,
                frame.height,
                stats.draw_calls,
                stats.instances,
                stats.bloom_applied,
                stats.captured
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(output: PathBuf) -> RenderArgs {
        RenderArgs {
            output,
            width: 24,
            height: 16,
            frames: 2,
            no_bloom: true,
            config: None,
            assets: None,
            gpu: false,
        }
    }

    #[test]
    fn renders_png_of_requested_size() {
        let dir = tempfile::tempdir().unwrap();
        let args = args(dir.path().join("frame.png"));
        let mut gpu = SoftwareGpu::new();
        let (frame, stats) = render(&mut gpu, &args).unwrap();
        assert!(!stats.bloom_applied);
        assert_eq!(gpu.stats(), orrery_render::ResourceStats::default());

        write_png(&args.output, &frame).unwrap();
        let decoded = image::open(&args.output).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (24, 16));
    }

    #[test]
    fn config_file_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renderer.yaml");
        std::fs::write(&path, "reflection:\n  enabled: false\n").unwrap();
        let mut args = args(dir.path().join("frame.png"));
        args.config = Some(path);
        let (_, stats) = render(&mut SoftwareGpu::new(), &args).unwrap();
        assert!(!stats.captured);
    }

    #[test]
    fn default_config_dumps_as_yaml() {
        let yaml = RendererConfig::default().to_yaml().unwrap();
        assert_eq!(RendererConfig::from_yaml_str(&yaml).unwrap().bloom.threshold, 0.7);
    }
}
