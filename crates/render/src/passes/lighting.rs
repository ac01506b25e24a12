use super::{RenderPass, ResolutionAware, View, any_pass, filter_program, fullscreen};
use crate::context::RenderContext;
use crate::gpu::{Bindings, BufferHandle, ClearOps, GpuLight, Gpu, LIGHT_CAPACITY, ProgramHandle, TextureHandle};
use crate::surface::{RenderSurface, SurfaceSpec};
use crate::{RenderError, Result};
use glam::Vec3;
use orrery_assets::ContentProvider;
use orrery_common::LightSource;

/// Pack lights into the fixed-size shader array. Unused slots hold a zero
/// light, which the shader skips.
pub fn pack_lights(lights: &[LightSource]) -> Result<[GpuLight; LIGHT_CAPACITY]> {
    if lights.len() > LIGHT_CAPACITY {
        return Err(RenderError::TooManyLightSources {
            count: lights.len(),
            capacity: LIGHT_CAPACITY,
        });
    }
    let mut packed = [GpuLight::default(); LIGHT_CAPACITY];
    for (slot, light) in packed.iter_mut().zip(lights) {
        slot.position = light.position.to_array();
        slot.direction = light.direction.to_array();
        slot.color = light.color.to_array();
    }
    Ok(packed)
}

/// G-buffer and shadow inputs of the lighting pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightingInputs {
    pub color: TextureHandle,
    pub normal: TextureHandle,
    pub position: TextureHandle,
    pub shadow: TextureHandle,
}

/// Accumulates ambient, hemisphere and directional light over the G-buffer.
pub struct LightingPass {
    program: ProgramHandle,
    lights: BufferHandle,
    uploaded: Option<[GpuLight; LIGHT_CAPACITY]>,
    surface: RenderSurface,
    hemisphere: (Vec3, Vec3),
}

impl LightingPass {
    pub fn new(
        gpu: &mut dyn Gpu,
        content: &dyn ContentProvider,
        hemisphere_top: Vec3,
        hemisphere_bottom: Vec3,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let program = filter_program(gpu, content, "lighting")?;
        let lights = gpu.create_storage_buffer(std::mem::size_of::<[GpuLight; LIGHT_CAPACITY]>());
        let surface = RenderSurface::create(gpu, width, height, &SurfaceSpec::new("lighting").color(4, false))?;
        Ok(Self {
            program,
            lights,
            uploaded: None,
            surface,
            hemisphere: (hemisphere_top, hemisphere_bottom),
        })
    }

    /// Light the G-buffer. Fails with `TooManyLightSources` before drawing
    /// anything if `lights` exceeds the shader capacity.
    pub fn draw(
        &mut self,
        ctx: &mut RenderContext<'_>,
        inputs: &LightingInputs,
        lights: &[LightSource],
        ambient: f32,
        view: &View,
    ) -> Result<()> {
        let packed = pack_lights(lights)?;
        if self.uploaded != Some(packed) {
            ctx.gpu().write_storage(self.lights, bytemuck::cast_slice(&packed));
            self.uploaded = Some(packed);
        }

        let mut uniforms = view.uniforms();
        uniforms.ambient = Vec3::splat(ambient).extend(1.0).to_array();
        uniforms.hem_top = self.hemisphere.0.extend(1.0).to_array();
        uniforms.hem_bottom = self.hemisphere.1.extend(1.0).to_array();
        let bindings = Bindings::new()
            .texture(0, inputs.color)
            .texture(1, inputs.normal)
            .texture(2, inputs.position)
            .texture(3, inputs.shadow)
            .storage(self.lights);
        let command = fullscreen(self.program, bindings, uniforms);
        self.surface.scoped(ctx, |ctx| {
            ctx.clear(&ClearOps::color([0.0; 4]))?;
            ctx.draw(&command)
        })
    }

    pub fn output(&self) -> TextureHandle {
        self.surface.texture()
    }
}

impl ResolutionAware for LightingPass {
    fn set_resolution(&mut self, gpu: &mut dyn Gpu, width: u32, height: u32) -> Result<()> {
        self.surface.resize(gpu, width, height)
    }
}

impl RenderPass for LightingPass {
    fn name(&self) -> &'static str {
        "lighting"
    }

    fn as_resolution_aware(&mut self) -> Option<&mut dyn ResolutionAware> {
        Some(self)
    }

    fn release(&mut self, gpu: &mut dyn Gpu) {
        self.surface.release(gpu);
        gpu.release_storage_buffer(self.lights);
        gpu.release_program(self.program);
    }

    any_pass!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lights(n: usize) -> Vec<LightSource> {
        (0..n)
            .map(|i| LightSource::directional(Vec3::new(0.0, -1.0, i as f32), Vec3::ONE))
            .collect()
    }

    #[test]
    fn eight_lights_fit() {
        let packed = pack_lights(&lights(8)).unwrap();
        assert!(packed.iter().all(|l| l.color == [1.0, 1.0, 1.0]));
    }

    #[test]
    fn nine_lights_overflow() {
        assert!(matches!(
            pack_lights(&lights(9)),
            Err(RenderError::TooManyLightSources { count: 9, capacity: 8 })
        ));
    }

    #[test]
    fn unused_slots_are_zero() {
        let packed = pack_lights(&lights(2)).unwrap();
        assert_ne!(packed[1], GpuLight::default());
        assert!(packed[2..].iter().all(|l| *l == GpuLight::default()));
    }
}
