use super::{OnePassFilter, RenderPass, ResolutionAware, TwoPassFilter, any_pass};
use crate::config::{BlurKind, SsaoConfig};
use crate::context::RenderContext;
use crate::gpu::{Gpu, TextureHandle};
use crate::Result;
use orrery_assets::ContentProvider;

/// Occlusion from linear depth, blurred, multiplied into an image.
pub struct SsaoWithBlur {
    ssao: OnePassFilter,
    blur: TwoPassFilter,
    saturation: OnePassFilter,
}

impl SsaoWithBlur {
    pub fn new(
        gpu: &mut dyn Gpu,
        content: &dyn ContentProvider,
        config: &SsaoConfig,
        depth_sentinel: f32,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let mut ssao = OnePassFilter::color(gpu, content, "ssao", width, height)?;
        let u = ssao.uniforms_mut();
        u.kernel_size = config.radius;
        u.factor = config.strength;
        u.bias = config.bias;
        u.threshold = config.range;
        u.depth_sentinel = depth_sentinel;

        let blur = match config.blur {
            BlurKind::Avg => TwoPassFilter::avg_blur(gpu, content, config.blur_kernel, width, height)?,
            BlurKind::Gauss => TwoPassFilter::gauss_blur(gpu, content, config.blur_kernel, width, height)?,
        };
        Ok(Self {
            ssao,
            blur,
            saturation: OnePassFilter::color(gpu, content, "saturation_map", width, height)?,
        })
    }

    pub fn draw(&self, ctx: &mut RenderContext<'_>, depth: TextureHandle, image: TextureHandle) -> Result<()> {
        self.ssao.draw(ctx, &[depth])?;
        self.blur.draw(ctx, self.ssao.output())?;
        self.saturation.draw(ctx, &[self.blur.output(), image])
    }

    /// Blurred occlusion factor.
    pub fn occlusion(&self) -> TextureHandle {
        self.blur.output()
    }

    pub fn output(&self) -> TextureHandle {
        self.saturation.output()
    }
}

impl ResolutionAware for SsaoWithBlur {
    fn set_resolution(&mut self, gpu: &mut dyn Gpu, width: u32, height: u32) -> Result<()> {
        self.ssao.set_resolution(gpu, width, height)?;
        self.blur.set_resolution(gpu, width, height)?;
        self.saturation.set_resolution(gpu, width, height)
    }
}

impl RenderPass for SsaoWithBlur {
    fn name(&self) -> &'static str {
        "ssao"
    }

    fn as_resolution_aware(&mut self) -> Option<&mut dyn ResolutionAware> {
        Some(self)
    }

    fn release(&mut self, gpu: &mut dyn Gpu) {
        self.ssao.release(gpu);
        self.blur.release(gpu);
        self.saturation.release(gpu);
    }

    any_pass!();
}
