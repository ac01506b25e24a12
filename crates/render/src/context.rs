use crate::gpu::{ClearOps, DrawCommand, Gpu, RasterState, TargetHandle};
use crate::{RenderError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActiveTarget {
    target: TargetHandle,
    width: u32,
    height: u32,
}

/// The device plus the state every pass shares: the active-target stack and
/// the rasterizer state.
///
/// # Invariants
/// - Every push is matched by a pop before the pushing pass returns.
/// - Raster state is `RasterState::NEUTRAL` between passes.
pub struct RenderContext<'g> {
    gpu: &'g mut dyn Gpu,
    targets: Vec<ActiveTarget>,
    base_depth: usize,
    raster: RasterState,
    draw_calls: usize,
}

impl<'g> RenderContext<'g> {
    pub fn new(gpu: &'g mut dyn Gpu) -> Self {
        Self {
            gpu,
            targets: Vec::new(),
            base_depth: 0,
            raster: RasterState::NEUTRAL,
            draw_calls: 0,
        }
    }

    /// Context whose base target is `output` (a window or an offscreen
    /// image); the final present draws there.
    pub fn with_output(gpu: &'g mut dyn Gpu, output: TargetHandle) -> Result<Self> {
        let mut ctx = Self::new(gpu);
        ctx.push_target(output)?;
        ctx.base_depth = 1;
        Ok(ctx)
    }

    pub fn gpu(&mut self) -> &mut (dyn Gpu + 'g) {
        &mut *self.gpu
    }

    pub fn gpu_ref(&self) -> &(dyn Gpu + 'g) {
        &*self.gpu
    }

    /// Make `target` active, remembering the previous one.
    pub fn push_target(&mut self, target: TargetHandle) -> Result<()> {
        let (width, height) = self
            .gpu
            .target_size(target)
            .ok_or(RenderError::NoActiveTarget)?;
        self.targets.push(ActiveTarget {
            target,
            width,
            height,
        });
        Ok(())
    }

    /// Restore the previously active target.
    pub fn pop_target(&mut self) -> Option<TargetHandle> {
        self.targets.pop().map(|t| t.target)
    }

    pub fn active_target(&self) -> Option<TargetHandle> {
        self.targets.last().map(|t| t.target)
    }

    /// Viewport of the active target.
    pub fn viewport(&self) -> Option<(u32, u32)> {
        self.targets.last().map(|t| (t.width, t.height))
    }

    pub fn stack_depth(&self) -> usize {
        self.targets.len()
    }

    pub fn set_depth_test(&mut self, enabled: bool) {
        self.raster.depth_test = enabled;
    }

    pub fn set_back_face_culling(&mut self, enabled: bool) {
        self.raster.cull_back = enabled;
    }

    pub fn raster(&self) -> RasterState {
        self.raster
    }

    pub fn reset_raster(&mut self) {
        self.raster = RasterState::NEUTRAL;
    }

    /// True when no pass has left state behind.
    pub fn is_neutral(&self) -> bool {
        self.raster == RasterState::NEUTRAL && self.targets.len() == self.base_depth
    }

    pub fn clear(&mut self, ops: &ClearOps) -> Result<()> {
        let target = self.active_target().ok_or(RenderError::NoActiveTarget)?;
        self.gpu.clear(target, ops);
        Ok(())
    }

    /// Draw into the active target with the current raster state.
    pub fn draw(&mut self, command: &DrawCommand) -> Result<()> {
        let active = self.targets.last().copied().ok_or(RenderError::NoActiveTarget)?;
        let mut command = *command;
        command.uniforms.resolution = [active.width as f32, active.height as f32];
        self.gpu.draw(active.target, self.raster, &command);
        self.draw_calls += 1;
        Ok(())
    }

    pub fn draw_calls(&self) -> usize {
        self.draw_calls
    }

    pub fn reset_draw_calls(&mut self) {
        self.draw_calls = 0;
    }
}
