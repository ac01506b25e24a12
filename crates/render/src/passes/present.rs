use super::{RenderPass, any_pass, filter_program, fullscreen};
use crate::context::RenderContext;
use crate::gpu::{Bindings, Gpu, PassUniforms, ProgramHandle, TextureHandle};
use crate::Result;
use orrery_assets::ContentProvider;

/// Draws a texture over the whole active target. This is the final present
/// and the copy used to fill cube faces.
pub struct TextureDrawer {
    program: ProgramHandle,
}

impl TextureDrawer {
    pub fn new(gpu: &mut dyn Gpu, content: &dyn ContentProvider) -> Result<Self> {
        Ok(Self {
            program: filter_program(gpu, content, "texture_drawer")?,
        })
    }

    pub fn draw(&self, ctx: &mut RenderContext<'_>, texture: TextureHandle) -> Result<()> {
        self.draw_with(ctx, texture, false)
    }

    /// Draw mirrored horizontally.
    pub fn draw_mirrored(&self, ctx: &mut RenderContext<'_>, texture: TextureHandle) -> Result<()> {
        self.draw_with(ctx, texture, true)
    }

    fn draw_with(&self, ctx: &mut RenderContext<'_>, texture: TextureHandle, mirrored: bool) -> Result<()> {
        let mut uniforms = PassUniforms::new();
        uniforms.flip_x = if mirrored { 1.0 } else { 0.0 };
        ctx.draw(&fullscreen(
            self.program,
            Bindings::new().texture(0, texture),
            uniforms,
        ))
    }
}

impl RenderPass for TextureDrawer {
    fn name(&self) -> &'static str {
        "present"
    }

    fn release(&mut self, gpu: &mut dyn Gpu) {
        gpu.release_program(self.program);
    }

    any_pass!();
}
