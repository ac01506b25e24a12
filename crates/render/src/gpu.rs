//! Device seam: everything the pipeline needs from a graphics backend.

use crate::Result;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use orrery_assets::{ImageData, MeshData, ShaderSource};
use std::fmt;

macro_rules! handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);
        )*
    };
}

handle!(
    /// 2D or cube texture owned by the device.
    TextureHandle,
    /// Render target: a set of attachments drawn together.
    TargetHandle,
    MeshHandle,
    /// Per-instance model matrices.
    InstanceBufferHandle,
    /// Storage buffer (the light list).
    BufferHandle,
    ProgramHandle,
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8Unorm,
    Rgba8Unorm,
    R32Float,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
}

impl TextureFormat {
    /// Color format for a component count and precision.
    pub fn from_components(components: u8, float: bool) -> Self {
        match (components, float) {
            (1, true) => TextureFormat::R32Float,
            (1, false) => TextureFormat::R8Unorm,
            (_, false) => TextureFormat::Rgba8Unorm,
            (_, true) => TextureFormat::Rgba16Float,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    /// Unorm formats clamp to [0, 1] and quantize to 8 bits.
    pub fn is_unorm(self) -> bool {
        matches!(self, TextureFormat::R8Unorm | TextureFormat::Rgba8Unorm)
    }

    pub fn components(self) -> u8 {
        match self {
            TextureFormat::R8Unorm | TextureFormat::R32Float | TextureFormat::Depth32Float => 1,
            _ => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    D2,
    Cube,
}

impl TextureKind {
    pub fn layers(self) -> u32 {
        match self {
            TextureKind::D2 => 1,
            TextureKind::Cube => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    ClampToEdge,
    #[default]
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub kind: TextureKind,
    pub mip_levels: u32,
    pub wrap: WrapMode,
}

impl TextureDesc {
    pub fn d2(label: &'static str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label,
            width,
            height,
            format,
            kind: TextureKind::D2,
            mip_levels: 1,
            wrap: WrapMode::default(),
        }
    }

    /// Square cube texture with a full mip chain.
    pub fn cube(label: &'static str, size: u32, format: TextureFormat) -> Self {
        Self {
            label,
            width: size,
            height: size,
            format,
            kind: TextureKind::Cube,
            mip_levels: full_mip_count(size, size),
            wrap: WrapMode::ClampToEdge,
        }
    }

    pub fn with_wrap(mut self, wrap: WrapMode) -> Self {
        self.wrap = wrap;
        self
    }
}

pub fn full_mip_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// One layer of a texture bound to a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    pub texture: TextureHandle,
    pub layer: u32,
}

impl From<TextureHandle> for Attachment {
    fn from(texture: TextureHandle) -> Self {
        Self { texture, layer: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDesc {
    pub label: &'static str,
    pub colors: Vec<Attachment>,
    pub depth: Option<Attachment>,
}

/// Why a render target failed its completeness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncompleteReason {
    MissingAttachment,
    MismatchedDimensions {
        expected: (u32, u32),
        found: (u32, u32),
    },
    MismatchedFormats {
        attachment: usize,
        format: TextureFormat,
    },
    Unsupported(String),
}

impl fmt::Display for IncompleteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncompleteReason::MissingAttachment => f.write_str("missing attachment"),
            IncompleteReason::MismatchedDimensions { expected, found } => write!(
                f,
                "mismatched dimensions: expected {}x{}, found {}x{}",
                expected.0, expected.1, found.0, found.1
            ),
            IncompleteReason::MismatchedFormats { attachment, format } => {
                write!(f, "attachment {attachment} has unusable format {format:?}")
            }
            IncompleteReason::Unsupported(what) => write!(f, "unsupported configuration: {what}"),
        }
    }
}

/// Completeness rules shared by every backend. `lookup` resolves a texture
/// handle to its description; unknown handles count as missing attachments.
pub fn check_completeness(
    desc: &TargetDesc,
    lookup: impl Fn(TextureHandle) -> Option<TextureDesc>,
    max_color_attachments: usize,
) -> std::result::Result<(u32, u32), IncompleteReason> {
    if desc.colors.is_empty() {
        return Err(IncompleteReason::MissingAttachment);
    }
    if desc.colors.len() > max_color_attachments {
        return Err(IncompleteReason::Unsupported(format!(
            "{} color attachments, at most {max_color_attachments}",
            desc.colors.len()
        )));
    }

    let mut size: Option<(u32, u32)> = None;
    let all = desc
        .colors
        .iter()
        .map(|a| (a, false))
        .chain(desc.depth.iter().map(|a| (a, true)));
    for (index, (attachment, is_depth)) in all.enumerate() {
        let tex = lookup(attachment.texture).ok_or(IncompleteReason::MissingAttachment)?;
        if tex.format.is_depth() != is_depth {
            return Err(IncompleteReason::MismatchedFormats {
                attachment: index,
                format: tex.format,
            });
        }
        if attachment.layer >= tex.kind.layers() {
            return Err(IncompleteReason::Unsupported(format!(
                "layer {} of a {}-layer texture",
                attachment.layer,
                tex.kind.layers()
            )));
        }
        if tex.width == 0 || tex.height == 0 {
            return Err(IncompleteReason::Unsupported("zero-sized attachment".into()));
        }
        match size {
            None => size = Some((tex.width, tex.height)),
            Some(expected) if expected != (tex.width, tex.height) => {
                return Err(IncompleteReason::MismatchedDimensions {
                    expected,
                    found: (tex.width, tex.height),
                });
            }
            Some(_) => {}
        }
    }
    size.ok_or(IncompleteReason::MissingAttachment)
}

/// Rasterizer state mutated by passes. `NEUTRAL` is what every pass must
/// leave behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterState {
    pub depth_test: bool,
    pub cull_back: bool,
}

impl RasterState {
    pub const NEUTRAL: RasterState = RasterState {
        depth_test: false,
        cull_back: true,
    };
}

impl Default for RasterState {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// What to clear on a target. Attachments without a value keep their
/// contents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClearOps {
    pub color: Option<[f32; 4]>,
    pub overrides: Vec<(usize, [f32; 4])>,
    pub depth: Option<f32>,
}

impl ClearOps {
    pub fn color(value: [f32; 4]) -> Self {
        Self {
            color: Some(value),
            ..Self::default()
        }
    }

    /// Color to zero, depth to 1.
    pub fn all() -> Self {
        Self::color([0.0; 4]).with_depth(1.0)
    }

    pub fn with_depth(mut self, depth: f32) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Clear one color attachment to a different value.
    pub fn with_override(mut self, attachment: usize, value: [f32; 4]) -> Self {
        self.overrides.push((attachment, value));
        self
    }

    pub fn color_for(&self, attachment: usize) -> Option<[f32; 4]> {
        self.overrides
            .iter()
            .rev()
            .find(|(i, _)| *i == attachment)
            .map(|(_, v)| *v)
            .or(self.color)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Geometry {
    /// One triangle covering the target.
    Fullscreen,
    /// Indexed mesh drawn `count` times. Without an instance buffer the model
    /// matrix is identity.
    Mesh {
        mesh: MeshHandle,
        instances: Option<InstanceBufferHandle>,
        count: u32,
    },
}

/// Resources bound to a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bindings {
    pub textures: [Option<TextureHandle>; 4],
    pub cube: Option<TextureHandle>,
    pub storage: Option<BufferHandle>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texture(mut self, slot: usize, texture: TextureHandle) -> Self {
        self.textures[slot] = Some(texture);
        self
    }

    pub fn cube(mut self, texture: TextureHandle) -> Self {
        self.cube = Some(texture);
        self
    }

    pub fn storage(mut self, buffer: BufferHandle) -> Self {
        self.storage = Some(buffer);
        self
    }
}

/// Uniform block shared by every program.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PassUniforms {
    pub camera: [[f32; 4]; 4],
    pub light_camera: [[f32; 4]; 4],
    pub cam_pos: [f32; 4],
    pub light_direction: [f32; 4],
    pub material_color: [f32; 4],
    pub ambient: [f32; 4],
    pub hem_top: [f32; 4],
    pub hem_bottom: [f32; 4],
    pub resolution: [f32; 2],
    pub factor: f32,
    pub mip_level: f32,
    pub kernel_size: f32,
    pub textured: f32,
    pub normal_mapping: f32,
    pub flip_x: f32,
    pub threshold: f32,
    pub depth_sentinel: f32,
    pub bias: f32,
    pub _pad: f32,
}

impl PassUniforms {
    pub fn new() -> Self {
        Self {
            camera: Mat4::IDENTITY.to_cols_array_2d(),
            light_camera: Mat4::IDENTITY.to_cols_array_2d(),
            ..Zeroable::zeroed()
        }
    }

    pub fn camera_matrix(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.camera)
    }

    pub fn light_camera_matrix(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.light_camera)
    }
}

impl Default for PassUniforms {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCommand {
    pub program: ProgramHandle,
    pub geometry: Geometry,
    pub bindings: Bindings,
    pub uniforms: PassUniforms,
}

/// Light slot as laid out in the storage buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct GpuLight {
    pub position: [f32; 3],
    pub _pad0: f32,
    pub direction: [f32; 3],
    pub _pad1: f32,
    pub color: [f32; 3],
    pub _pad2: f32,
}

/// Shader-side light array length.
pub const LIGHT_CAPACITY: usize = 8;

/// Texture contents read back as floats, rows top to bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct Readback {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[f32; 4]>,
}

impl Readback {
    pub fn pixel(&self, x: u32, y: u32) -> [f32; 4] {
        self.pixels[(y * self.width + x) as usize]
    }

    /// Rows of 8-bit RGBA, for writing image files.
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|p| p.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
            .collect()
    }
}

/// Live resource counts, for leak checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceStats {
    pub live_textures: usize,
    pub live_targets: usize,
    pub live_programs: usize,
    pub live_meshes: usize,
    pub live_instance_buffers: usize,
    pub live_storage_buffers: usize,
}

/// A graphics device as seen by the pipeline.
///
/// Draws are recorded in order; `flush` submits outstanding work. Reads of a
/// texture see every draw issued before them.
pub trait Gpu {
    fn backend_name(&self) -> &'static str;

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureHandle;

    /// Upload an 8-bit image as a mip-less 2D texture.
    fn upload_texture(&mut self, image: &ImageData, wrap: WrapMode) -> TextureHandle;

    fn texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc>;

    fn set_wrap_mode(&mut self, texture: TextureHandle, wrap: WrapMode);

    fn release_texture(&mut self, texture: TextureHandle);

    /// Build a render target, failing if it would not be complete.
    fn create_target(
        &mut self,
        desc: &TargetDesc,
    ) -> std::result::Result<TargetHandle, IncompleteReason>;

    fn target_size(&self, target: TargetHandle) -> Option<(u32, u32)>;

    fn release_target(&mut self, target: TargetHandle);

    fn create_program(&mut self, source: &ShaderSource) -> Result<ProgramHandle>;

    fn release_program(&mut self, program: ProgramHandle);

    fn create_mesh(&mut self, mesh: &MeshData) -> MeshHandle;

    fn release_mesh(&mut self, mesh: MeshHandle);

    fn create_instance_buffer(&mut self, capacity: usize) -> InstanceBufferHandle;

    fn write_instances(&mut self, buffer: InstanceBufferHandle, transforms: &[Mat4]);

    fn release_instance_buffer(&mut self, buffer: InstanceBufferHandle);

    fn create_storage_buffer(&mut self, size: usize) -> BufferHandle;

    fn write_storage(&mut self, buffer: BufferHandle, bytes: &[u8]);

    fn release_storage_buffer(&mut self, buffer: BufferHandle);

    fn clear(&mut self, target: TargetHandle, ops: &ClearOps);

    fn draw(&mut self, target: TargetHandle, raster: RasterState, command: &DrawCommand);

    /// Rebuild mips 1.. of every layer from mip 0.
    fn generate_mipmaps(&mut self, texture: TextureHandle);

    /// Read mip 0 of one layer.
    fn read_texture(&mut self, texture: TextureHandle, layer: u32) -> Result<Readback>;

    fn flush(&mut self);

    fn stats(&self) -> ResourceStats;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(map: &HashMap<TextureHandle, TextureDesc>) -> impl Fn(TextureHandle) -> Option<TextureDesc> + '_ {
        |h| map.get(&h).copied()
    }

    #[test]
    fn formats_follow_components_and_precision() {
        assert_eq!(TextureFormat::from_components(1, true), TextureFormat::R32Float);
        assert_eq!(TextureFormat::from_components(1, false), TextureFormat::R8Unorm);
        assert_eq!(TextureFormat::from_components(3, false), TextureFormat::Rgba8Unorm);
        assert_eq!(TextureFormat::from_components(4, true), TextureFormat::Rgba16Float);
    }

    #[test]
    fn full_mip_chain_lengths() {
        assert_eq!(full_mip_count(1, 1), 1);
        assert_eq!(full_mip_count(256, 256), 9);
        assert_eq!(full_mip_count(245, 245), 8);
    }

    #[test]
    fn completeness_rules() {
        let mut map = HashMap::new();
        map.insert(TextureHandle(1), TextureDesc::d2("a", 8, 8, TextureFormat::Rgba8Unorm));
        map.insert(TextureHandle(2), TextureDesc::d2("b", 4, 8, TextureFormat::Rgba8Unorm));
        map.insert(TextureHandle(3), TextureDesc::d2("d", 8, 8, TextureFormat::Depth32Float));
        map.insert(TextureHandle(4), TextureDesc::cube("c", 8, TextureFormat::Rgba16Float));

        let target = |colors: Vec<Attachment>, depth: Option<Attachment>| TargetDesc {
            label: "t",
            colors,
            depth,
        };

        assert_eq!(
            check_completeness(&target(vec![TextureHandle(1).into()], Some(TextureHandle(3).into())), lookup(&map), 4),
            Ok((8, 8))
        );
        assert_eq!(
            check_completeness(&target(vec![], None), lookup(&map), 4),
            Err(IncompleteReason::MissingAttachment)
        );
        assert_eq!(
            check_completeness(&target(vec![TextureHandle(9).into()], None), lookup(&map), 4),
            Err(IncompleteReason::MissingAttachment)
        );
        assert!(matches!(
            check_completeness(&target(vec![TextureHandle(1).into(), TextureHandle(2).into()], None), lookup(&map), 4),
            Err(IncompleteReason::MismatchedDimensions { .. })
        ));
        assert!(matches!(
            check_completeness(&target(vec![TextureHandle(3).into()], None), lookup(&map), 4),
            Err(IncompleteReason::MismatchedFormats { attachment: 0, .. })
        ));
        assert!(matches!(
            check_completeness(&target(vec![TextureHandle(1).into()], None), lookup(&map), 0),
            Err(IncompleteReason::Unsupported(_))
        ));

        let face = Attachment {
            texture: TextureHandle(4),
            layer: 5,
        };
        assert!(check_completeness(&target(vec![face], None), lookup(&map), 4).is_ok());
        let past_end = Attachment { layer: 6, ..face };
        assert!(matches!(
            check_completeness(&target(vec![past_end], None), lookup(&map), 4),
            Err(IncompleteReason::Unsupported(_))
        ));
    }

    #[test]
    fn clear_overrides_win() {
        let ops = ClearOps::color([0.0; 4]).with_override(2, [1000.0, 0.0, 0.0, 1.0]);
        assert_eq!(ops.color_for(0), Some([0.0; 4]));
        assert_eq!(ops.color_for(2), Some([1000.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn gpu_structs_have_device_layout() {
        assert_eq!(std::mem::size_of::<GpuLight>(), 48);
        assert_eq!(std::mem::size_of::<PassUniforms>() % 16, 0);
    }
}
