//! Deterministic CPU implementation of [`Gpu`].
//!
//! Used by tests, the frame benchmark and the headless CLI. Programs are
//! matched by name to Rust ports of the WGSL programs, so both backends
//! produce the same images up to sampling precision.

mod programs;
mod raster;
mod sampling;

use crate::gpu::{
    Attachment, BufferHandle, ClearOps, DrawCommand, Geometry, Gpu, GpuLight, IncompleteReason,
    InstanceBufferHandle, LIGHT_CAPACITY, MeshHandle, ProgramHandle, RasterState, Readback, ResourceStats,
    TargetDesc, TargetHandle, TextureDesc, TextureFormat, TextureHandle, WrapMode, check_completeness,
};
use crate::{RenderError, Result};
use glam::{Mat4, Vec4};
use orrery_assets::{ImageData, MeshData, ShaderSource, program_stem};
use programs::{Program, Shading};
use raster::{Canvas, transform_mesh};
use sampling::{Plane, SoftTexture};
use std::collections::HashMap;

const MAX_COLOR_ATTACHMENTS: usize = 4;

#[derive(Debug, Clone)]
struct Target {
    colors: Vec<Attachment>,
    depth: Option<Attachment>,
    width: u32,
    height: u32,
}

#[derive(Debug, Default)]
pub struct SoftwareGpu {
    next_id: u32,
    textures: HashMap<u32, SoftTexture>,
    targets: HashMap<u32, Target>,
    programs: HashMap<u32, Program>,
    meshes: HashMap<u32, MeshData>,
    instances: HashMap<u32, Vec<Mat4>>,
    storage: HashMap<u32, Vec<u8>>,
}

impl SoftwareGpu {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn lights(&self, buffer: Option<BufferHandle>) -> [GpuLight; LIGHT_CAPACITY] {
        let mut lights = [GpuLight::default(); LIGHT_CAPACITY];
        let Some(bytes) = buffer.and_then(|b| self.storage.get(&b.0)) else {
            return lights;
        };
        let stride = std::mem::size_of::<GpuLight>();
        for (light, chunk) in lights.iter_mut().zip(bytes.chunks_exact(stride)) {
            *light = bytemuck::pod_read_unaligned(chunk);
        }
        lights
    }

    fn shade_into(&self, canvas: &mut Canvas<'_>, raster: RasterState, command: &DrawCommand, program: Program) {
        let bound = |slot: Option<TextureHandle>| slot.and_then(|t| self.textures.get(&t.0));
        let shading = Shading {
            uniforms: &command.uniforms,
            textures: command.bindings.textures.map(bound),
            cube: bound(command.bindings.cube),
            lights: self.lights(command.bindings.storage),
        };
        let shade = |f: &raster::Fragment| program.shade(&shading, f);

        match command.geometry {
            Geometry::Fullscreen => canvas.fullscreen(shade),
            Geometry::Mesh { mesh, instances, count } => {
                let Some(mesh) = self.meshes.get(&mesh.0) else {
                    tracing::warn!(?mesh, "draw with unknown mesh");
                    return;
                };
                let camera = command.uniforms.camera_matrix();
                let models: &[Mat4] = match instances {
                    Some(buffer) => self.instances.get(&buffer.0).map(Vec::as_slice).unwrap_or_default(),
                    None => &[Mat4::IDENTITY],
                };
                for model in models.iter().take(count as usize) {
                    let vertices = transform_mesh(mesh, *model, camera);
                    for tri in mesh.indices.chunks_exact(3) {
                        let corners = [
                            vertices[tri[0] as usize],
                            vertices[tri[1] as usize],
                            vertices[tri[2] as usize],
                        ];
                        canvas.triangle(raster, corners, &shade);
                    }
                }
            }
        }
    }
}

impl Gpu for SoftwareGpu {
    fn backend_name(&self) -> &'static str {
        "software"
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureHandle {
        let id = self.allocate();
        self.textures.insert(id, SoftTexture::new(*desc));
        TextureHandle(id)
    }

    fn upload_texture(&mut self, image: &ImageData, wrap: WrapMode) -> TextureHandle {
        let desc = TextureDesc::d2("upload", image.width, image.height, TextureFormat::Rgba8Unorm).with_wrap(wrap);
        let mut texture = SoftTexture::new(desc);
        for (texel, pixel) in texture.layers[0][0].texels.iter_mut().zip(&image.pixels) {
            *texel = Vec4::from(pixel.map(|c| c as f32 / 255.0));
        }
        let id = self.allocate();
        self.textures.insert(id, texture);
        TextureHandle(id)
    }

    fn texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc> {
        self.textures.get(&texture.0).map(|t| t.desc)
    }

    fn set_wrap_mode(&mut self, texture: TextureHandle, wrap: WrapMode) {
        if let Some(t) = self.textures.get_mut(&texture.0) {
            t.desc.wrap = wrap;
        }
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn create_target(&mut self, desc: &TargetDesc) -> std::result::Result<TargetHandle, IncompleteReason> {
        let (width, height) = check_completeness(desc, |t| self.texture_desc(t), MAX_COLOR_ATTACHMENTS)?;
        let id = self.allocate();
        self.targets.insert(
            id,
            Target {
                colors: desc.colors.clone(),
                depth: desc.depth,
                width,
                height,
            },
        );
        Ok(TargetHandle(id))
    }

    fn target_size(&self, target: TargetHandle) -> Option<(u32, u32)> {
        self.targets.get(&target.0).map(|t| (t.width, t.height))
    }

    fn release_target(&mut self, target: TargetHandle) {
        self.targets.remove(&target.0);
    }

    fn create_program(&mut self, source: &ShaderSource) -> Result<ProgramHandle> {
        let stem = program_stem(&source.name);
        let program = Program::from_stem(stem).ok_or_else(|| RenderError::ProgramCreation {
            name: source.name.clone(),
            reason: "no software implementation".into(),
        })?;
        if program.kind() != source.kind {
            return Err(RenderError::ProgramCreation {
                name: source.name.clone(),
                reason: format!("expected a {:?} program, got {:?}", program.kind(), source.kind),
            });
        }
        let id = self.allocate();
        self.programs.insert(id, program);
        Ok(ProgramHandle(id))
    }

    fn release_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program.0);
    }

    fn create_mesh(&mut self, mesh: &MeshData) -> MeshHandle {
        let id = self.allocate();
        self.meshes.insert(id, mesh.clone());
        MeshHandle(id)
    }

    fn release_mesh(&mut self, mesh: MeshHandle) {
        self.meshes.remove(&mesh.0);
    }

    fn create_instance_buffer(&mut self, capacity: usize) -> InstanceBufferHandle {
        let id = self.allocate();
        self.instances.insert(id, Vec::with_capacity(capacity));
        InstanceBufferHandle(id)
    }

    fn write_instances(&mut self, buffer: InstanceBufferHandle, transforms: &[Mat4]) {
        if let Some(stored) = self.instances.get_mut(&buffer.0) {
            stored.clear();
            stored.extend_from_slice(transforms);
        }
    }

    fn release_instance_buffer(&mut self, buffer: InstanceBufferHandle) {
        self.instances.remove(&buffer.0);
    }

    fn create_storage_buffer(&mut self, size: usize) -> BufferHandle {
        let id = self.allocate();
        self.storage.insert(id, vec![0; size]);
        BufferHandle(id)
    }

    fn write_storage(&mut self, buffer: BufferHandle, bytes: &[u8]) {
        if let Some(stored) = self.storage.get_mut(&buffer.0) {
            stored.clear();
            stored.extend_from_slice(bytes);
        }
    }

    fn release_storage_buffer(&mut self, buffer: BufferHandle) {
        self.storage.remove(&buffer.0);
    }

    fn clear(&mut self, target: TargetHandle, ops: &ClearOps) {
        let Some(desc) = self.targets.get(&target.0).cloned() else {
            tracing::warn!(?target, "clear of unknown target");
            return;
        };
        for (index, attachment) in desc.colors.iter().enumerate() {
            let (Some(value), Some(texture)) = (ops.color_for(index), self.textures.get_mut(&attachment.texture.0))
            else {
                continue;
            };
            let stored = sampling::quantize(texture.desc.format, Vec4::from(value));
            texture.layers[attachment.layer as usize][0].fill(stored);
        }
        if let (Some(depth), Some(attachment)) = (ops.depth, desc.depth) {
            if let Some(texture) = self.textures.get_mut(&attachment.texture.0) {
                texture.layers[attachment.layer as usize][0].fill(Vec4::new(depth, 0.0, 0.0, 1.0));
            }
        }
    }

    fn draw(&mut self, target: TargetHandle, raster: RasterState, command: &DrawCommand) {
        let Some(desc) = self.targets.get(&target.0).cloned() else {
            tracing::warn!(?target, "draw to unknown target");
            return;
        };
        let Some(&program) = self.programs.get(&command.program.0) else {
            tracing::warn!(program = ?command.program, "draw with unknown program");
            return;
        };

        // Attachments leave the map while drawn so bound inputs can be read
        // alongside them.
        let attachments: Vec<Attachment> = desc.colors.iter().chain(desc.depth.iter()).copied().collect();
        let mut detached: Vec<(u32, SoftTexture)> = attachments
            .iter()
            .filter_map(|a| self.textures.remove(&a.texture.0).map(|t| (a.texture.0, t)))
            .collect();

        if detached.len() == attachments.len() {
            let mut colors: Vec<(&mut Plane, TextureFormat)> = detached
                .iter_mut()
                .zip(&attachments)
                .map(|((_, texture), a)| {
                    let format = texture.desc.format;
                    (&mut texture.layers[a.layer as usize][0], format)
                })
                .collect();
            let depth = match desc.depth {
                Some(_) => colors.pop().map(|(plane, _)| plane),
                None => None,
            };
            colors.truncate(program.outputs());
            let mut canvas = Canvas {
                colors,
                depth,
                width: desc.width,
                height: desc.height,
            };
            self.shade_into(&mut canvas, raster, command, program);
        } else {
            tracing::warn!(?target, "draw to a target with released attachments");
        }

        for (id, texture) in detached {
            self.textures.insert(id, texture);
        }
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) {
        if let Some(t) = self.textures.get_mut(&texture.0) {
            t.generate_mips();
        }
    }

    fn read_texture(&mut self, texture: TextureHandle, layer: u32) -> Result<Readback> {
        let t = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| RenderError::ReadbackFailed(format!("unknown texture {}", texture.0)))?;
        let mips = t
            .layers
            .get(layer as usize)
            .ok_or_else(|| RenderError::ReadbackFailed(format!("texture {} has no layer {layer}", texture.0)))?;
        let plane = &mips[0];
        Ok(Readback {
            width: plane.width,
            height: plane.height,
            pixels: plane.texels.iter().map(|v| v.to_array()).collect(),
        })
    }

    fn flush(&mut self) {}

    fn stats(&self) -> ResourceStats {
        ResourceStats {
            live_textures: self.textures.len(),
            live_targets: self.targets.len(),
            live_programs: self.programs.len(),
            live_meshes: self.meshes.len(),
            live_instance_buffers: self.instances.len(),
            live_storage_buffers: self.storage.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{Bindings, PassUniforms, TextureKind};
    use orrery_assets::ShaderKind;

    fn program(gpu: &mut SoftwareGpu, name: &str, kind: ShaderKind) -> Result<ProgramHandle> {
        gpu.create_program(&ShaderSource {
            name: name.into(),
            kind,
            wgsl: String::new(),
        })
    }

    fn color_target(gpu: &mut SoftwareGpu, w: u32, h: u32, format: TextureFormat) -> (TextureHandle, TargetHandle) {
        let texture = gpu.create_texture(&TextureDesc::d2("c", w, h, format));
        let target = gpu
            .create_target(&TargetDesc {
                label: "c",
                colors: vec![texture.into()],
                depth: None,
            })
            .unwrap();
        (texture, target)
    }

    #[test]
    fn clear_quantizes_to_the_attachment_format() {
        let mut gpu = SoftwareGpu::new();
        let (texture, target) = color_target(&mut gpu, 2, 2, TextureFormat::Rgba8Unorm);
        gpu.clear(target, &ClearOps::color([0.5, 1.5, -1.0, 1.0]));
        let back = gpu.read_texture(texture, 0).unwrap();
        assert_eq!(back.pixel(1, 1), [128.0 / 255.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn fullscreen_draw_reads_other_textures() {
        let mut gpu = SoftwareGpu::new();
        let source = gpu.upload_texture(&ImageData::solid(4, 4, [255, 0, 0, 255]), WrapMode::Repeat);
        let (texture, target) = color_target(&mut gpu, 4, 4, TextureFormat::Rgba16Float);
        let drawer = program(&mut gpu, "texture_drawer", ShaderKind::Filter).unwrap();
        let mut uniforms = PassUniforms::new();
        uniforms.resolution = [4.0, 4.0];
        gpu.draw(
            target,
            RasterState::NEUTRAL,
            &DrawCommand {
                program: drawer,
                geometry: Geometry::Fullscreen,
                bindings: Bindings::new().texture(0, source),
                uniforms,
            },
        );
        let back = gpu.read_texture(texture, 0).unwrap();
        assert!(back.pixels.iter().all(|p| *p == [1.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn unknown_or_mismatched_programs_fail() {
        let mut gpu = SoftwareGpu::new();
        assert!(matches!(
            program(&mut gpu, "mystery", ShaderKind::Filter),
            Err(RenderError::ProgramCreation { .. })
        ));
        assert!(matches!(
            program(&mut gpu, "deferred.wgsl", ShaderKind::Filter),
            Err(RenderError::ProgramCreation { .. })
        ));
        assert!(program(&mut gpu, "deferred.*", ShaderKind::Geometry).is_ok());
    }

    #[test]
    fn cube_faces_are_separate_targets() {
        let mut gpu = SoftwareGpu::new();
        let cube = gpu.create_texture(&TextureDesc::cube("cube", 4, TextureFormat::Rgba16Float));
        assert_eq!(gpu.texture_desc(cube).map(|d| d.kind), Some(TextureKind::Cube));
        for layer in 0..6 {
            let target = gpu
                .create_target(&TargetDesc {
                    label: "face",
                    colors: vec![Attachment { texture: cube, layer }],
                    depth: None,
                })
                .unwrap();
            gpu.clear(target, &ClearOps::color([layer as f32, 0.0, 0.0, 1.0]));
            gpu.release_target(target);
        }
        for layer in 0..6 {
            assert_eq!(gpu.read_texture(cube, layer).unwrap().pixel(0, 0)[0], layer as f32);
        }
        assert!(gpu.read_texture(cube, 6).is_err());
    }

    #[test]
    fn lights_round_trip_through_storage() {
        let mut gpu = SoftwareGpu::new();
        let buffer = gpu.create_storage_buffer(std::mem::size_of::<[GpuLight; LIGHT_CAPACITY]>());
        let mut lights = [GpuLight::default(); LIGHT_CAPACITY];
        lights[1].color = [0.25, 0.5, 1.0];
        gpu.write_storage(buffer, bytemuck::cast_slice(&lights));
        assert_eq!(gpu.lights(Some(buffer)), lights);
        assert_eq!(gpu.lights(None), [GpuLight::default(); LIGHT_CAPACITY]);
    }

    #[test]
    fn stats_track_live_resources() {
        let mut gpu = SoftwareGpu::new();
        let (texture, target) = color_target(&mut gpu, 2, 2, TextureFormat::R8Unorm);
        let drawer = program(&mut gpu, "texture_drawer", ShaderKind::Filter).unwrap();
        let mesh = gpu.create_mesh(&MeshData::cube());
        let instances = gpu.create_instance_buffer(4);
        let storage = gpu.create_storage_buffer(16);
        assert_eq!(
            gpu.stats(),
            ResourceStats {
                live_textures: 1,
                live_targets: 1,
                live_programs: 1,
                live_meshes: 1,
                live_instance_buffers: 1,
                live_storage_buffers: 1,
            }
        );

        gpu.release_target(target);
        gpu.release_texture(texture);
        gpu.release_program(drawer);
        gpu.release_mesh(mesh);
        gpu.release_instance_buffer(instances);
        gpu.release_storage_buffer(storage);
        assert_eq!(gpu.stats(), ResourceStats::default());
    }
}
