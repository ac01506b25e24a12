use super::{OnePassFilter, RenderPass, ResolutionAware, any_pass};
use crate::context::RenderContext;
use crate::gpu::{Gpu, TextureHandle};
use crate::Result;
use orrery_assets::ContentProvider;

/// `a + factor * b` into its own target.
pub struct Addition {
    filter: OnePassFilter,
}

impl Addition {
    pub fn new(gpu: &mut dyn Gpu, content: &dyn ContentProvider, width: u32, height: u32) -> Result<Self> {
        Ok(Self {
            filter: OnePassFilter::color(gpu, content, "addition", width, height)?,
        })
    }

    pub fn draw(
        &mut self,
        ctx: &mut RenderContext<'_>,
        a: TextureHandle,
        b: TextureHandle,
        factor: f32,
    ) -> Result<()> {
        self.filter.uniforms_mut().factor = factor;
        self.filter.draw(ctx, &[a, b])
    }

    pub fn output(&self) -> TextureHandle {
        self.filter.output()
    }
}

impl ResolutionAware for Addition {
    fn set_resolution(&mut self, gpu: &mut dyn Gpu, width: u32, height: u32) -> Result<()> {
        self.filter.set_resolution(gpu, width, height)
    }
}

impl RenderPass for Addition {
    fn name(&self) -> &'static str {
        "addition"
    }

    fn as_resolution_aware(&mut self) -> Option<&mut dyn ResolutionAware> {
        Some(self)
    }

    fn release(&mut self, gpu: &mut dyn Gpu) {
        self.filter.release(gpu);
    }

    any_pass!();
}
