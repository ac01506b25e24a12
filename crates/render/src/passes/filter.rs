use super::{RenderPass, ResolutionAware, any_pass, filter_program, fullscreen};
use crate::context::RenderContext;
use crate::gpu::{Bindings, ClearOps, Gpu, PassUniforms, ProgramHandle, TextureHandle};
use crate::surface::{RenderSurface, SurfaceSpec};
use crate::Result;
use orrery_assets::ContentProvider;

/// A full-screen program writing one output texture. Inputs bind to texture
/// slots in order.
pub struct OnePassFilter {
    name: &'static str,
    program: ProgramHandle,
    surface: RenderSurface,
    uniforms: PassUniforms,
}

impl OnePassFilter {
    pub fn new(
        gpu: &mut dyn Gpu,
        content: &dyn ContentProvider,
        name: &'static str,
        spec: &SurfaceSpec,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let program = filter_program(gpu, content, name)?;
        let surface = RenderSurface::create(gpu, width, height, spec)?;
        Ok(Self {
            name,
            program,
            surface,
            uniforms: PassUniforms::new(),
        })
    }

    /// 8-bit RGBA output.
    pub fn color(
        gpu: &mut dyn Gpu,
        content: &dyn ContentProvider,
        name: &'static str,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        Self::new(gpu, content, name, &SurfaceSpec::new(name).color(4, false), width, height)
    }

    /// Uniform values sent with every draw.
    pub fn uniforms_mut(&mut self) -> &mut PassUniforms {
        &mut self.uniforms
    }

    pub fn draw(&self, ctx: &mut RenderContext<'_>, inputs: &[TextureHandle]) -> Result<()> {
        let mut bindings = Bindings::new();
        for (slot, texture) in inputs.iter().enumerate().take(4) {
            bindings = bindings.texture(slot, *texture);
        }
        let command = fullscreen(self.program, bindings, self.uniforms);
        self.surface.scoped(ctx, |ctx| {
            ctx.clear(&ClearOps::color([0.0; 4]))?;
            ctx.draw(&command)
        })
    }

    pub fn output(&self) -> TextureHandle {
        self.surface.texture()
    }

    pub fn size(&self) -> (u32, u32) {
        self.surface.size()
    }
}

impl ResolutionAware for OnePassFilter {
    fn set_resolution(&mut self, gpu: &mut dyn Gpu, width: u32, height: u32) -> Result<()> {
        self.surface.resize(gpu, width, height)
    }
}

impl RenderPass for OnePassFilter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn as_resolution_aware(&mut self) -> Option<&mut dyn ResolutionAware> {
        Some(self)
    }

    fn release(&mut self, gpu: &mut dyn Gpu) {
        self.surface.release(gpu);
        gpu.release_program(self.program);
    }

    any_pass!();
}

/// Separable filter: horizontal into one surface, vertical into another.
pub struct TwoPassFilter {
    first: OnePassFilter,
    second: OnePassFilter,
}

impl TwoPassFilter {
    pub fn new(first: OnePassFilter, second: OnePassFilter) -> Self {
        Self { first, second }
    }

    fn blur(
        gpu: &mut dyn Gpu,
        content: &dyn ContentProvider,
        names: [&'static str; 2],
        kernel: f32,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let mut first = OnePassFilter::color(gpu, content, names[0], width, height)?;
        let mut second = OnePassFilter::color(gpu, content, names[1], width, height)?;
        first.uniforms_mut().kernel_size = kernel;
        second.uniforms_mut().kernel_size = kernel;
        Ok(Self::new(first, second))
    }

    /// Box blur over `kernel` pixels per axis.
    pub fn avg_blur(
        gpu: &mut dyn Gpu,
        content: &dyn ContentProvider,
        kernel: f32,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        Self::blur(gpu, content, ["blur_avg_pass1", "blur_avg_pass2"], kernel, width, height)
    }

    pub fn gauss_blur(
        gpu: &mut dyn Gpu,
        content: &dyn ContentProvider,
        kernel: f32,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        Self::blur(gpu, content, ["blur_gauss_pass1", "blur_gauss_pass2"], kernel, width, height)
    }

    pub fn set_kernel(&mut self, kernel: f32) {
        self.first.uniforms_mut().kernel_size = kernel;
        self.second.uniforms_mut().kernel_size = kernel;
    }

    pub fn draw(&self, ctx: &mut RenderContext<'_>, input: TextureHandle) -> Result<()> {
        self.first.draw(ctx, &[input])?;
        self.second.draw(ctx, &[self.first.output()])
    }

    pub fn output(&self) -> TextureHandle {
        self.second.output()
    }
}

impl ResolutionAware for TwoPassFilter {
    fn set_resolution(&mut self, gpu: &mut dyn Gpu, width: u32, height: u32) -> Result<()> {
        self.first.set_resolution(gpu, width, height)?;
        self.second.set_resolution(gpu, width, height)
    }
}

impl RenderPass for TwoPassFilter {
    fn name(&self) -> &'static str {
        "two_pass_filter"
    }

    fn as_resolution_aware(&mut self) -> Option<&mut dyn ResolutionAware> {
        Some(self)
    }

    fn release(&mut self, gpu: &mut dyn Gpu) {
        self.first.release(gpu);
        self.second.release(gpu);
    }

    any_pass!();
}
