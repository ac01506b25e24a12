//! Deferred render pipeline for the orrery scene.
//!
//! A frame is a fixed chain of passes: G-buffer, shadow, environment
//! reflection, lighting, sky and sphere cut compositing, bloom, ambient
//! occlusion, present. Every pass owns its render surfaces and reads the
//! outputs of earlier passes by handle. The device sits behind the [`Gpu`]
//! trait; [`SoftwareGpu`] is a deterministic CPU implementation.
//!
//! # Invariants
//! - Surfaces are complete at creation and sized to the current resolution.
//! - A resize disposes every old surface before the next frame.
//! - Passes restore the render context to neutral state before returning.
//! - The reflective entity never appears in its own reflection.

mod camera;
mod config;
mod context;
mod error;
pub mod gpu;
mod instances;
pub mod passes;
mod pipeline;
mod renderer;
mod software;
mod surface;

pub use camera::{
    CachedValue, Camera, FaceCamera, LightCamera, OrbitCamera, OrbitView, Orthographic, Perspective, PositionView,
    Transformation, light_angles, world_position,
};
pub use config::{
    BloomConfig, BlurKind, ConfigError, MaterialConfig, Materials, ReflectionConfig, RendererConfig, ShadowConfig,
    SkyboxConfig, SsaoConfig,
};
pub use context::RenderContext;
pub use error::{RenderError, Result};
pub use gpu::{Gpu, Readback, ResourceStats, TextureHandle};
pub use instances::{Exclusion, InstanceBatches, batch_slot};
pub use pipeline::{PassId, PassRegistry};
pub use renderer::{DeferredRenderer, FrameStats, FrameTextures};
pub use software::SoftwareGpu;
pub use surface::{RenderSurface, SurfaceSpec};

pub fn crate_info() -> &'static str {
    "orrery-render v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("render"));
    }
}
