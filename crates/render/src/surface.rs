use crate::context::RenderContext;
use crate::gpu::{Attachment, Gpu, TargetDesc, TargetHandle, TextureDesc, TextureFormat, TextureHandle, WrapMode};
use crate::{RenderError, Result};

/// Attachment layout of an owned surface.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceSpec {
    pub label: &'static str,
    pub colors: Vec<TextureFormat>,
    pub depth: bool,
    pub wrap: WrapMode,
}

impl SurfaceSpec {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            colors: Vec::new(),
            depth: false,
            wrap: WrapMode::ClampToEdge,
        }
    }

    /// Add a color attachment of `components` channels.
    pub fn color(mut self, components: u8, float: bool) -> Self {
        self.colors.push(TextureFormat::from_components(components, float));
        self
    }

    pub fn with_depth(mut self) -> Self {
        self.depth = true;
        self
    }

    pub fn with_wrap(mut self, wrap: WrapMode) -> Self {
        self.wrap = wrap;
        self
    }
}

/// A render target and the textures attached to it.
///
/// Owned surfaces release their textures with the target; surfaces built
/// over borrowed attachments (cube faces) release only the target.
#[derive(Debug)]
pub struct RenderSurface {
    spec: Option<SurfaceSpec>,
    target: TargetHandle,
    colors: Vec<TextureHandle>,
    depth: Option<TextureHandle>,
    width: u32,
    height: u32,
}

impl RenderSurface {
    /// Create textures for `spec` and attach them, failing with
    /// `FramebufferIncomplete` if the device rejects the set.
    pub fn create(gpu: &mut dyn Gpu, width: u32, height: u32, spec: &SurfaceSpec) -> Result<Self> {
        let colors: Vec<TextureHandle> = spec
            .colors
            .iter()
            .map(|format| {
                gpu.create_texture(&TextureDesc::d2(spec.label, width, height, *format).with_wrap(spec.wrap))
            })
            .collect();
        let depth = spec.depth.then(|| {
            gpu.create_texture(&TextureDesc::d2(
                spec.label,
                width,
                height,
                TextureFormat::Depth32Float,
            ))
        });

        let desc = TargetDesc {
            label: spec.label,
            colors: colors.iter().map(|t| Attachment::from(*t)).collect(),
            depth: depth.map(Attachment::from),
        };
        match gpu.create_target(&desc) {
            Ok(target) => {
                tracing::trace!(label = spec.label, width, height, "surface created");
                Ok(Self {
                    spec: Some(spec.clone()),
                    target,
                    colors,
                    depth,
                    width,
                    height,
                })
            }
            Err(reason) => {
                for texture in colors.into_iter().chain(depth) {
                    gpu.release_texture(texture);
                }
                Err(RenderError::FramebufferIncomplete {
                    label: spec.label,
                    reason,
                })
            }
        }
    }

    /// Target over attachments owned elsewhere, e.g. one face of a cube.
    pub fn from_attachments(
        gpu: &mut dyn Gpu,
        label: &'static str,
        colors: Vec<Attachment>,
        depth: Option<Attachment>,
    ) -> Result<Self> {
        let desc = TargetDesc {
            label,
            colors: colors.clone(),
            depth,
        };
        let target = gpu
            .create_target(&desc)
            .map_err(|reason| RenderError::FramebufferIncomplete { label, reason })?;
        let (width, height) = gpu.target_size(target).unwrap_or((0, 0));
        Ok(Self {
            spec: None,
            target,
            colors: colors.iter().map(|a| a.texture).collect(),
            depth: depth.map(|a| a.texture),
            width,
            height,
        })
    }

    pub fn target(&self) -> TargetHandle {
        self.target
    }

    /// First color attachment.
    pub fn texture(&self) -> TextureHandle {
        self.colors[0]
    }

    pub fn textures(&self) -> &[TextureHandle] {
        &self.colors
    }

    pub fn depth_texture(&self) -> Option<TextureHandle> {
        self.depth
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Build attachments at the new size, then dispose of the old ones.
    /// On failure the surface keeps its current attachments.
    pub fn resize(&mut self, gpu: &mut dyn Gpu, width: u32, height: u32) -> Result<()> {
        let Some(spec) = self.spec.clone() else {
            return Err(RenderError::FramebufferIncomplete {
                label: "borrowed",
                reason: crate::gpu::IncompleteReason::Unsupported(
                    "surface over borrowed attachments cannot be resized".into(),
                ),
            });
        };
        let mut old = std::mem::replace(self, Self::create(gpu, width, height, &spec)?);
        old.release(gpu);
        Ok(())
    }

    pub fn release(&mut self, gpu: &mut dyn Gpu) {
        gpu.release_target(self.target);
        if self.spec.is_some() {
            for texture in self.colors.drain(..).chain(self.depth.take()) {
                gpu.release_texture(texture);
            }
        }
    }

    pub fn activate(&self, ctx: &mut RenderContext<'_>) -> Result<()> {
        ctx.push_target(self.target)
    }

    pub fn deactivate(&self, ctx: &mut RenderContext<'_>) {
        ctx.pop_target();
    }

    /// Run `f` with this surface active. The previous target is restored
    /// whether or not `f` succeeds.
    pub fn scoped<'g, T>(
        &self,
        ctx: &mut RenderContext<'g>,
        f: impl FnOnce(&mut RenderContext<'g>) -> Result<T>,
    ) -> Result<T> {
        self.activate(ctx)?;
        let result = f(ctx);
        self.deactivate(ctx);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{ClearOps, TextureKind};
    use crate::software::SoftwareGpu;

    fn gbuffer_spec() -> SurfaceSpec {
        SurfaceSpec::new("gbuffer")
            .color(4, false)
            .color(3, true)
            .color(1, true)
            .with_depth()
    }

    #[test]
    fn create_allocates_every_attachment() {
        let mut gpu = SoftwareGpu::new();
        let surface = RenderSurface::create(&mut gpu, 16, 8, &gbuffer_spec()).unwrap();
        assert_eq!(surface.textures().len(), 3);
        assert_eq!(gpu.stats().live_textures, 4);
        assert_eq!(gpu.stats().live_targets, 1);
        let depth = gpu.texture_desc(surface.textures()[2]).unwrap();
        assert_eq!(depth.format, TextureFormat::R32Float);
    }

    #[test]
    fn resize_replaces_without_leaking() {
        let mut gpu = SoftwareGpu::new();
        let mut surface = RenderSurface::create(&mut gpu, 16, 8, &gbuffer_spec()).unwrap();
        let before = gpu.stats();
        let old = surface.texture();
        surface.resize(&mut gpu, 5, 7).unwrap();
        assert_eq!(gpu.stats(), before);
        assert!(gpu.texture_desc(old).is_none());
        for tex in surface.textures() {
            let desc = gpu.texture_desc(*tex).unwrap();
            assert_eq!((desc.width, desc.height), (5, 7));
        }
    }

    #[test]
    fn failed_resize_keeps_current_attachments() {
        let mut gpu = SoftwareGpu::new();
        let mut surface = RenderSurface::create(&mut gpu, 16, 8, &gbuffer_spec()).unwrap();
        let before = gpu.stats();
        let texture = surface.texture();
        let target = surface.target();

        assert!(surface.resize(&mut gpu, 0, 8).is_err());
        assert_eq!(gpu.stats(), before);
        assert_eq!(surface.texture(), texture);
        assert_eq!(surface.target(), target);
        assert_eq!(surface.size(), (16, 8));
        assert_eq!(gpu.target_size(target), Some((16, 8)));
    }

    #[test]
    fn zero_size_is_incomplete_and_leaves_nothing_behind() {
        let mut gpu = SoftwareGpu::new();
        let err = RenderSurface::create(&mut gpu, 0, 8, &gbuffer_spec()).unwrap_err();
        assert!(matches!(err, RenderError::FramebufferIncomplete { label: "gbuffer", .. }));
        assert_eq!(gpu.stats().live_textures, 0);
    }

    #[test]
    fn empty_spec_is_missing_attachment() {
        let mut gpu = SoftwareGpu::new();
        let err = RenderSurface::create(&mut gpu, 4, 4, &SurfaceSpec::new("empty")).unwrap_err();
        assert!(matches!(
            err,
            RenderError::FramebufferIncomplete {
                reason: crate::gpu::IncompleteReason::MissingAttachment,
                ..
            }
        ));
    }

    #[test]
    fn cube_face_surface_borrows_the_texture() {
        let mut gpu = SoftwareGpu::new();
        let cube = gpu.create_texture(&TextureDesc::cube("cube", 8, TextureFormat::Rgba16Float));
        let mut face = RenderSurface::from_attachments(
            &mut gpu,
            "face",
            vec![Attachment {
                texture: cube,
                layer: 3,
            }],
            None,
        )
        .unwrap();
        assert_eq!(face.size(), (8, 8));
        assert!(face.resize(&mut gpu, 4, 4).is_err());
        face.release(&mut gpu);
        assert_eq!(gpu.texture_desc(cube).map(|d| d.kind), Some(TextureKind::Cube));
        assert_eq!(gpu.stats().live_targets, 0);
    }

    #[test]
    fn scoped_pops_on_error() {
        let mut gpu = SoftwareGpu::new();
        let surface = RenderSurface::create(&mut gpu, 4, 4, &SurfaceSpec::new("s").color(4, false)).unwrap();
        let mut ctx = RenderContext::new(&mut gpu);
        let result: Result<()> = surface.scoped(&mut ctx, |ctx| {
            ctx.clear(&ClearOps::all())?;
            Err(RenderError::NoActiveTarget)
        });
        assert!(result.is_err());
        assert_eq!(ctx.stack_depth(), 0);
    }
}
