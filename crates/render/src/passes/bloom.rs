use super::{Addition, OnePassFilter, RenderPass, ResolutionAware, TwoPassFilter, any_pass};
use crate::config::BloomConfig;
use crate::context::RenderContext;
use crate::gpu::{Gpu, TextureHandle};
use crate::Result;
use orrery_assets::ContentProvider;

/// Bright-pass, box blur, then add the glow back onto the source.
///
/// An image with no pixel above the threshold comes out unchanged.
pub struct Bloom {
    extract: OnePassFilter,
    blur: TwoPassFilter,
    add: Addition,
}

impl Bloom {
    pub fn new(
        gpu: &mut dyn Gpu,
        content: &dyn ContentProvider,
        config: &BloomConfig,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let mut extract = OnePassFilter::color(gpu, content, "extract", width, height)?;
        extract.uniforms_mut().threshold = config.threshold;
        Ok(Self {
            extract,
            blur: TwoPassFilter::avg_blur(gpu, content, config.kernel, width, height)?,
            add: Addition::new(gpu, content, width, height)?,
        })
    }

    pub fn draw(&mut self, ctx: &mut RenderContext<'_>, input: TextureHandle) -> Result<()> {
        self.extract.draw(ctx, &[input])?;
        self.blur.draw(ctx, self.extract.output())?;
        self.add.draw(ctx, input, self.blur.output(), 1.0)
    }

    pub fn output(&self) -> TextureHandle {
        self.add.output()
    }
}

impl ResolutionAware for Bloom {
    fn set_resolution(&mut self, gpu: &mut dyn Gpu, width: u32, height: u32) -> Result<()> {
        self.extract.set_resolution(gpu, width, height)?;
        self.blur.set_resolution(gpu, width, height)?;
        self.add.set_resolution(gpu, width, height)
    }
}

impl RenderPass for Bloom {
    fn name(&self) -> &'static str {
        "bloom"
    }

    fn as_resolution_aware(&mut self) -> Option<&mut dyn ResolutionAware> {
        Some(self)
    }

    fn release(&mut self, gpu: &mut dyn Gpu) {
        self.extract.release(gpu);
        self.blur.release(gpu);
        self.add.release(gpu);
    }

    any_pass!();
}
