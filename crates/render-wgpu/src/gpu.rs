use crate::shaders::{self, binding};
use glam::Mat4;
use orrery_assets::{ImageData, MeshData, MeshVertex, ShaderKind, ShaderSource};
use orrery_render::gpu::{
    Attachment, Bindings, BufferHandle, ClearOps, DrawCommand, Geometry, Gpu, GpuLight, IncompleteReason,
    InstanceBufferHandle, LIGHT_CAPACITY, MeshHandle, PassUniforms, ProgramHandle, RasterState, Readback,
    ResourceStats, TargetDesc, TargetHandle, TextureDesc, TextureFormat, TextureHandle, TextureKind, WrapMode,
    check_completeness,
};
use orrery_render::{RenderError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use wgpu::util::DeviceExt;

/// Uniform blocks recorded before the encoder must be submitted.
const UNIFORM_SLOTS: u64 = 1024;
const LIGHT_BYTES: u64 = (LIGHT_CAPACITY * size_of::<GpuLight>()) as u64;
const INSTANCE_STRIDE: u64 = size_of::<[f32; 16]>() as u64;

const MESH_ATTRIBUTES: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
    0 => Float32x3,
    1 => Float32x3,
    2 => Float32x2,
    3 => Float32x3,
    4 => Float32x3
];
const INSTANCE_ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
    5 => Float32x4,
    6 => Float32x4,
    7 => Float32x4,
    8 => Float32x4
];
const MESH_BUFFERS: [wgpu::VertexBufferLayout<'static>; 2] = [
    wgpu::VertexBufferLayout {
        array_stride: size_of::<MeshVertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &MESH_ATTRIBUTES,
    },
    wgpu::VertexBufferLayout {
        array_stride: INSTANCE_STRIDE,
        step_mode: wgpu::VertexStepMode::Instance,
        attributes: &INSTANCE_ATTRIBUTES,
    },
];

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("no compatible graphics adapter")]
    NoAdapter,
    #[error("device request failed: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
}

pub(crate) fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

pub(crate) fn texel_size(format: TextureFormat) -> u32 {
    match format {
        TextureFormat::R8Unorm => 1,
        TextureFormat::Rgba8Unorm | TextureFormat::R32Float | TextureFormat::Depth32Float => 4,
        TextureFormat::Rgba16Float => 8,
        TextureFormat::Rgba32Float => 16,
    }
}

/// Row pitch of a texture-to-buffer copy.
pub(crate) fn padded_row(width: u32, format: TextureFormat) -> u32 {
    (width * texel_size(format)).div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
}

/// One texel as read back, single-channel formats widened to `(r, 0, 0, 1)`.
pub(crate) fn decode_texel(format: TextureFormat, bytes: &[u8]) -> [f32; 4] {
    let f32_at = |i: usize| f32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
    match format {
        TextureFormat::R8Unorm => [bytes[0] as f32 / 255.0, 0.0, 0.0, 1.0],
        TextureFormat::Rgba8Unorm => [0, 1, 2, 3].map(|i| bytes[i] as f32 / 255.0),
        TextureFormat::R32Float | TextureFormat::Depth32Float => [f32_at(0), 0.0, 0.0, 1.0],
        TextureFormat::Rgba16Float => {
            [0, 1, 2, 3].map(|i| half::f16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]).to_f32())
        }
        TextureFormat::Rgba32Float => [0, 1, 2, 3].map(|i| f32_at(4 * i)),
    }
}

fn buffer_with(device: &wgpu::Device, label: &str, bytes: &[u8], usage: wgpu::BufferUsages) -> wgpu::Buffer {
    let padding = [0u8; 4];
    let contents = if bytes.is_empty() { &padding[..] } else { bytes };
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents,
        usage,
    })
}

struct GpuTexture {
    texture: wgpu::Texture,
    desc: TextureDesc,
    sampled: wgpu::TextureView,
}

struct GpuTarget {
    colors: Vec<Attachment>,
    depth: Option<Attachment>,
    color_views: Vec<wgpu::TextureView>,
    depth_view: Option<wgpu::TextureView>,
    width: u32,
    height: u32,
}

impl GpuTarget {
    fn attached(&self) -> impl Iterator<Item = u32> + '_ {
        self.colors.iter().chain(self.depth.iter()).map(|a| a.texture.0)
    }
}

struct GpuProgram {
    name: String,
    module: wgpu::ShaderModule,
    kind: ShaderKind,
    outputs: usize,
}

struct GpuMesh {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

struct InstanceBuffer {
    buffer: wgpu::Buffer,
    capacity: usize,
    len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: u32,
    colors: Vec<wgpu::TextureFormat>,
    depth: bool,
    raster: RasterState,
}

/// Bindings after unusable textures were replaced by placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BindKey {
    textures: [Option<TextureHandle>; 4],
    cube: Option<TextureHandle>,
    storage: Option<BufferHandle>,
}

/// [`Gpu`] over a wgpu device.
///
/// Work is recorded into one command encoder and submitted on `flush`,
/// before a readback, or when a buffer still referenced by recorded draws
/// is rewritten.
pub struct WgpuGpu {
    device: wgpu::Device,
    queue: wgpu::Queue,
    layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    blit_layout: wgpu::BindGroupLayout,
    blit_pipeline_layout: wgpu::PipelineLayout,
    downsample: wgpu::ShaderModule,
    present: wgpu::ShaderModule,
    repeat_sampler: wgpu::Sampler,
    clamp_sampler: wgpu::Sampler,
    cube_sampler: wgpu::Sampler,
    uniforms: wgpu::Buffer,
    uniform_stride: u64,
    uniform_slot: u64,
    blank_2d: wgpu::TextureView,
    blank_cube: wgpu::TextureView,
    blank_lights: wgpu::Buffer,
    identity_instance: wgpu::Buffer,
    max_color_attachments: usize,
    next_id: u32,
    textures: HashMap<u32, GpuTexture>,
    targets: HashMap<u32, GpuTarget>,
    programs: HashMap<u32, GpuProgram>,
    meshes: HashMap<u32, GpuMesh>,
    instances: HashMap<u32, InstanceBuffer>,
    storage: HashMap<u32, wgpu::Buffer>,
    pipelines: HashMap<PipelineKey, Option<wgpu::RenderPipeline>>,
    bind_groups: HashMap<BindKey, wgpu::BindGroup>,
    downsample_pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    present_pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    encoder: Option<wgpu::CommandEncoder>,
    /// Buffers read by recorded, unsubmitted draws.
    in_use: HashSet<u32>,
}

impl WgpuGpu {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let texture_entry = |index: u32, dimension, filterable| wgpu::BindGroupLayoutEntry {
            binding: index,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable },
                view_dimension: dimension,
                multisampled: false,
            },
            count: None,
        };
        let sampler_entry = |index: u32, ty| wgpu::BindGroupLayoutEntry {
            binding: index,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(ty),
            count: None,
        };

        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: binding::UNIFORMS,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: wgpu::BufferSize::new(size_of::<PassUniforms>() as u64),
            },
            count: None,
        }];
        for slot in 0..4 {
            entries.push(texture_entry(binding::TEXTURES + slot, wgpu::TextureViewDimension::D2, false));
            entries.push(sampler_entry(binding::SAMPLERS + slot, wgpu::SamplerBindingType::NonFiltering));
        }
        entries.push(texture_entry(binding::CUBE, wgpu::TextureViewDimension::Cube, true));
        entries.push(sampler_entry(binding::CUBE_SAMPLER, wgpu::SamplerBindingType::Filtering));
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: binding::LIGHTS,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(LIGHT_BYTES),
            },
            count: None,
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("program_bindings"),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("program_layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blit_bindings"),
            entries: &[texture_entry(0, wgpu::TextureViewDimension::D2, false)],
        });
        let blit_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blit_layout"),
            bind_group_layouts: &[&blit_layout],
            push_constant_ranges: &[],
        });
        let module = |label: &str, source: &str| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        };
        let downsample = module("downsample", shaders::DOWNSAMPLE);
        let present = module("present", shaders::PRESENT);

        let sampler = |label: &str, address: wgpu::AddressMode, filter: wgpu::FilterMode| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: address,
                address_mode_v: address,
                address_mode_w: address,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            })
        };
        let repeat_sampler = sampler("repeat", wgpu::AddressMode::Repeat, wgpu::FilterMode::Nearest);
        let clamp_sampler = sampler("clamp", wgpu::AddressMode::ClampToEdge, wgpu::FilterMode::Nearest);
        let cube_sampler = sampler("cube", wgpu::AddressMode::ClampToEdge, wgpu::FilterMode::Linear);

        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        let uniform_stride = (size_of::<PassUniforms>() as u64).div_ceil(alignment) * alignment;
        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("uniform_ring"),
            size: uniform_stride * UNIFORM_SLOTS,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let blank = |dimension: wgpu::TextureViewDimension, layers: u32| {
            device
                .create_texture(&wgpu::TextureDescriptor {
                    label: Some("blank"),
                    size: wgpu::Extent3d {
                        width: 1,
                        height: 1,
                        depth_or_array_layers: layers,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING,
                    view_formats: &[],
                })
                .create_view(&wgpu::TextureViewDescriptor {
                    dimension: Some(dimension),
                    ..Default::default()
                })
        };
        let blank_2d = blank(wgpu::TextureViewDimension::D2, 1);
        let blank_cube = blank(wgpu::TextureViewDimension::Cube, 6);
        let blank_lights = buffer_with(
            &device,
            "blank_lights",
            &vec![0u8; LIGHT_BYTES as usize],
            wgpu::BufferUsages::STORAGE,
        );
        let identity_instance = buffer_with(
            &device,
            "identity_instance",
            bytemuck::cast_slice(&Mat4::IDENTITY.to_cols_array()),
            wgpu::BufferUsages::VERTEX,
        );
        let max_color_attachments = device.limits().max_color_attachments as usize;

        Self {
            device,
            queue,
            layout,
            pipeline_layout,
            blit_layout,
            blit_pipeline_layout,
            downsample,
            present,
            repeat_sampler,
            clamp_sampler,
            cube_sampler,
            uniforms,
            uniform_stride,
            uniform_slot: 0,
            blank_2d,
            blank_cube,
            blank_lights,
            identity_instance,
            max_color_attachments,
            next_id: 0,
            textures: HashMap::new(),
            targets: HashMap::new(),
            programs: HashMap::new(),
            meshes: HashMap::new(),
            instances: HashMap::new(),
            storage: HashMap::new(),
            pipelines: HashMap::new(),
            bind_groups: HashMap::new(),
            downsample_pipelines: HashMap::new(),
            present_pipelines: HashMap::new(),
            encoder: None,
            in_use: HashSet::new(),
        }
    }

    /// Device without a window, for offscreen rendering.
    pub fn headless() -> std::result::Result<Self, BackendError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(BackendError::NoAdapter)?;
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("orrery_headless"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        ))?;
        tracing::info!(backend = adapter.get_info().backend.to_str(), "headless device ready");
        Ok(Self::new(device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Draw `source` onto a surface texture view of any format. Recorded
    /// like every other draw; `flush` submits it.
    pub fn present_to(&mut self, source: TextureHandle, view: &wgpu::TextureView, format: wgpu::TextureFormat) {
        let Some(texture) = self.textures.get(&source.0) else {
            tracing::warn!(?source, "present of unknown texture");
            return;
        };
        if !self.present_pipelines.contains_key(&format) {
            let pipeline = self.blit_pipeline("present", &self.present, format);
            self.present_pipelines.insert(format, pipeline);
        }
        let bind_group = self.blit_bindings(&texture.sampled);
        let encoder = self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("frame") })
        });
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("present"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            ..Default::default()
        });
        if let Some(pipeline) = self.present_pipelines.get(&format) {
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
    }

    fn allocate(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn submit(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        self.uniform_slot = 0;
        self.in_use.clear();
    }

    /// Submit first if recorded draws still read `buffer`.
    fn before_rewrite(&mut self, buffer: u32) {
        if self.in_use.contains(&buffer) {
            tracing::trace!(buffer, "buffer rewritten mid-frame, submitting");
            self.submit();
        }
    }

    fn push_uniforms(&mut self, uniforms: &PassUniforms) -> u32 {
        if self.uniform_slot == UNIFORM_SLOTS {
            self.submit();
        }
        let offset = self.uniform_slot * self.uniform_stride;
        self.queue.write_buffer(&self.uniforms, offset, bytemuck::bytes_of(uniforms));
        self.uniform_slot += 1;
        offset as u32
    }

    fn blit_pipeline(&self, label: &str, module: &wgpu::ShaderModule, format: wgpu::TextureFormat) -> wgpu::RenderPipeline {
        self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&self.blit_pipeline_layout),
            vertex: wgpu::VertexState {
                module,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: Default::default(),
            multiview: None,
            cache: None,
        })
    }

    fn blit_bindings(&self, view: &wgpu::TextureView) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blit_source"),
            layout: &self.blit_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            }],
        })
    }

    /// Build the pipeline for `key` once. `false` if it failed validation.
    fn ensure_pipeline(&mut self, key: &PipelineKey) -> bool {
        if !self.pipelines.contains_key(key) {
            let Some(program) = self.programs.get(&key.program) else {
                return false;
            };
            let targets: Vec<Option<wgpu::ColorTargetState>> = key
                .colors
                .iter()
                .map(|&format| {
                    Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })
                })
                .collect();
            let depth_stencil = key.depth.then(|| wgpu::DepthStencilState {
                format: wgpu::TextureFormat::Depth32Float,
                depth_write_enabled: key.raster.depth_test,
                depth_compare: if key.raster.depth_test {
                    wgpu::CompareFunction::Less
                } else {
                    wgpu::CompareFunction::Always
                },
                stencil: Default::default(),
                bias: Default::default(),
            });
            let buffers: &[wgpu::VertexBufferLayout<'_>] = match program.kind {
                ShaderKind::Geometry => &MESH_BUFFERS,
                ShaderKind::Filter => &[],
            };

            self.device.push_error_scope(wgpu::ErrorFilter::Validation);
            let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(program.name.as_str()),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &program.module,
                    entry_point: Some(shaders::vertex_entry(program.kind)),
                    compilation_options: Default::default(),
                    buffers,
                },
                fragment: Some(wgpu::FragmentState {
                    module: &program.module,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &targets,
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: key.raster.cull_back.then_some(wgpu::Face::Back),
                    ..Default::default()
                },
                depth_stencil,
                multisample: Default::default(),
                multiview: None,
                cache: None,
            });
            let pipeline = match pollster::block_on(self.device.pop_error_scope()) {
                None => Some(pipeline),
                Some(error) => {
                    tracing::error!(program = %program.name, %error, "pipeline creation failed");
                    None
                }
            };
            self.pipelines.insert(key.clone(), pipeline);
        }
        self.pipelines.get(key).is_some_and(Option::is_some)
    }

    /// Drop bindings the program cannot read: attachments of the target
    /// being drawn, depth textures, and textures of the wrong kind.
    fn bind_key(&self, bindings: &Bindings, attached: &[u32]) -> BindKey {
        let usable = |slot: Option<TextureHandle>, kind: TextureKind| {
            slot.filter(|t| !attached.contains(&t.0)).filter(|t| {
                self.textures
                    .get(&t.0)
                    .is_some_and(|tex| tex.desc.kind == kind && !tex.desc.format.is_depth())
            })
        };
        BindKey {
            textures: bindings.textures.map(|slot| usable(slot, TextureKind::D2)),
            cube: usable(bindings.cube, TextureKind::Cube),
            storage: bindings.storage.filter(|b| self.storage.contains_key(&b.0)),
        }
    }

    fn ensure_bind_group(&mut self, key: BindKey) {
        if self.bind_groups.contains_key(&key) {
            return;
        }
        let texture = |slot: Option<TextureHandle>| slot.and_then(|t| self.textures.get(&t.0));
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: binding::UNIFORMS,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &self.uniforms,
                offset: 0,
                size: wgpu::BufferSize::new(size_of::<PassUniforms>() as u64),
            }),
        }];
        for (slot, bound) in key.textures.iter().enumerate() {
            let bound = texture(*bound);
            let view = bound.map_or(&self.blank_2d, |t| &t.sampled);
            let sampler = match bound.map(|t| t.desc.wrap) {
                Some(WrapMode::Repeat) => &self.repeat_sampler,
                _ => &self.clamp_sampler,
            };
            entries.push(wgpu::BindGroupEntry {
                binding: binding::TEXTURES + slot as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: binding::SAMPLERS + slot as u32,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: binding::CUBE,
            resource: wgpu::BindingResource::TextureView(texture(key.cube).map_or(&self.blank_cube, |t| &t.sampled)),
        });
        entries.push(wgpu::BindGroupEntry {
            binding: binding::CUBE_SAMPLER,
            resource: wgpu::BindingResource::Sampler(&self.cube_sampler),
        });
        let lights = key
            .storage
            .and_then(|b| self.storage.get(&b.0))
            .unwrap_or(&self.blank_lights);
        entries.push(wgpu::BindGroupEntry {
            binding: binding::LIGHTS,
            resource: lights.as_entire_binding(),
        });

        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("program_bindings"),
            layout: &self.layout,
            entries: &entries,
        });
        self.bind_groups.insert(key, group);
    }
}

impl Gpu for WgpuGpu {
    fn backend_name(&self) -> &'static str {
        "wgpu"
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureHandle {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: desc.width.max(1),
                height: desc.height.max(1),
                depth_or_array_layers: desc.kind.layers(),
            },
            mip_level_count: desc.mip_levels.max(1),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(desc.format),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let sampled = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(desc.label),
            dimension: Some(match desc.kind {
                TextureKind::D2 => wgpu::TextureViewDimension::D2,
                TextureKind::Cube => wgpu::TextureViewDimension::Cube,
            }),
            ..Default::default()
        });
        let id = self.allocate();
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                desc: *desc,
                sampled,
            },
        );
        TextureHandle(id)
    }

    fn upload_texture(&mut self, image: &ImageData, wrap: WrapMode) -> TextureHandle {
        let desc = TextureDesc::d2("upload", image.width, image.height, TextureFormat::Rgba8Unorm).with_wrap(wrap);
        let handle = self.create_texture(&desc);
        if let Some(texture) = self.textures.get(&handle.0) {
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                bytemuck::cast_slice(&image.pixels),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * image.width),
                    rows_per_image: Some(image.height),
                },
                wgpu::Extent3d {
                    width: image.width,
                    height: image.height,
                    depth_or_array_layers: 1,
                },
            );
        }
        handle
    }

    fn texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc> {
        self.textures.get(&texture.0).map(|t| t.desc)
    }

    fn set_wrap_mode(&mut self, texture: TextureHandle, wrap: WrapMode) {
        if let Some(t) = self.textures.get_mut(&texture.0) {
            t.desc.wrap = wrap;
            self.bind_groups.clear();
        }
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture.0).is_some() {
            self.bind_groups.clear();
        }
    }

    fn create_target(&mut self, desc: &TargetDesc) -> std::result::Result<TargetHandle, IncompleteReason> {
        let (width, height) = check_completeness(desc, |t| self.texture_desc(t), self.max_color_attachments)?;
        let view = |attachment: &Attachment| {
            self.textures.get(&attachment.texture.0).map(|t| {
                t.texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some(desc.label),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_mip_level: 0,
                    mip_level_count: Some(1),
                    base_array_layer: attachment.layer,
                    array_layer_count: Some(1),
                    ..Default::default()
                })
            })
        };
        let color_views = desc
            .colors
            .iter()
            .map(view)
            .collect::<Option<Vec<_>>>()
            .ok_or(IncompleteReason::MissingAttachment)?;
        let depth_view = match &desc.depth {
            Some(attachment) => Some(view(attachment).ok_or(IncompleteReason::MissingAttachment)?),
            None => None,
        };
        let id = self.allocate();
        self.targets.insert(
            id,
            GpuTarget {
                colors: desc.colors.clone(),
                depth: desc.depth,
                color_views,
                depth_view,
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
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(source.name.as_str()),
            source: wgpu::ShaderSource::Wgsl(shaders::compose(&source.wgsl).into()),
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(RenderError::ProgramCreation {
                name: source.name.clone(),
                reason: error.to_string(),
            });
        }
        let id = self.allocate();
        self.programs.insert(
            id,
            GpuProgram {
                name: source.name.clone(),
                module,
                kind: source.kind,
                outputs: shaders::fragment_outputs(&source.wgsl),
            },
        );
        tracing::debug!(name = %source.name, kind = ?source.kind, "program compiled");
        Ok(ProgramHandle(id))
    }

    fn release_program(&mut self, program: ProgramHandle) {
        if self.programs.remove(&program.0).is_some() {
            self.pipelines.retain(|key, _| key.program != program.0);
        }
    }

    fn create_mesh(&mut self, mesh: &MeshData) -> MeshHandle {
        let vertices = buffer_with(
            &self.device,
            "mesh_vertices",
            bytemuck::cast_slice(&mesh.vertices),
            wgpu::BufferUsages::VERTEX,
        );
        let indices = buffer_with(
            &self.device,
            "mesh_indices",
            bytemuck::cast_slice(&mesh.indices),
            wgpu::BufferUsages::INDEX,
        );
        let id = self.allocate();
        self.meshes.insert(
            id,
            GpuMesh {
                vertices,
                indices,
                index_count: mesh.indices.len() as u32,
            },
        );
        MeshHandle(id)
    }

    fn release_mesh(&mut self, mesh: MeshHandle) {
        self.meshes.remove(&mesh.0);
    }

    fn create_instance_buffer(&mut self, capacity: usize) -> InstanceBufferHandle {
        let capacity = capacity.max(1);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("instances"),
            size: capacity as u64 * INSTANCE_STRIDE,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let id = self.allocate();
        self.instances.insert(
            id,
            InstanceBuffer {
                buffer,
                capacity,
                len: 0,
            },
        );
        InstanceBufferHandle(id)
    }

    fn write_instances(&mut self, buffer: InstanceBufferHandle, transforms: &[Mat4]) {
        self.before_rewrite(buffer.0);
        let Some(stored) = self.instances.get_mut(&buffer.0) else {
            return;
        };
        if transforms.len() > stored.capacity {
            stored.capacity = transforms.len().next_power_of_two();
            stored.buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("instances"),
                size: stored.capacity as u64 * INSTANCE_STRIDE,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
        }
        let columns: Vec<[f32; 16]> = transforms.iter().map(Mat4::to_cols_array).collect();
        if !columns.is_empty() {
            self.queue.write_buffer(&stored.buffer, 0, bytemuck::cast_slice(&columns));
        }
        stored.len = transforms.len();
    }

    fn release_instance_buffer(&mut self, buffer: InstanceBufferHandle) {
        self.instances.remove(&buffer.0);
    }

    fn create_storage_buffer(&mut self, size: usize) -> BufferHandle {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("storage"),
            size: (size as u64).max(LIGHT_BYTES).next_multiple_of(4),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let id = self.allocate();
        self.storage.insert(id, buffer);
        BufferHandle(id)
    }

    fn write_storage(&mut self, buffer: BufferHandle, bytes: &[u8]) {
        self.before_rewrite(buffer.0);
        let Some(stored) = self.storage.get(&buffer.0) else {
            return;
        };
        let len = (bytes.len() as u64).min(stored.size()) as usize / 4 * 4;
        if len > 0 {
            self.queue.write_buffer(stored, 0, &bytes[..len]);
        }
    }

    fn release_storage_buffer(&mut self, buffer: BufferHandle) {
        if self.storage.remove(&buffer.0).is_some() {
            self.bind_groups.retain(|key, _| key.storage != Some(buffer));
        }
    }

    fn clear(&mut self, target: TargetHandle, ops: &ClearOps) {
        let Some(t) = self.targets.get(&target.0) else {
            tracing::warn!(?target, "clear of unknown target");
            return;
        };
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = t
            .color_views
            .iter()
            .enumerate()
            .map(|(index, view)| {
                let load = match ops.color_for(index) {
                    Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                        r: r as f64,
                        g: g as f64,
                        b: b as f64,
                        a: a as f64,
                    }),
                    None => wgpu::LoadOp::Load,
                };
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_stencil_attachment = t.depth_view.as_ref().map(|view| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: ops.depth.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        });
        let encoder = self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("frame") })
        });
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear"),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            ..Default::default()
        });
    }

    fn draw(&mut self, target: TargetHandle, raster: RasterState, command: &DrawCommand) {
        let Some(program) = self.programs.get(&command.program.0) else {
            tracing::warn!(program = ?command.program, "draw with unknown program");
            return;
        };
        let (kind, outputs) = (program.kind, program.outputs);
        let fullscreen = matches!(command.geometry, Geometry::Fullscreen);
        if fullscreen != (kind == ShaderKind::Filter) {
            tracing::warn!(program = %program.name, "geometry does not match the program kind");
            return;
        }
        let Some(t) = self.targets.get(&target.0) else {
            tracing::warn!(?target, "draw to unknown target");
            return;
        };
        let colors: Vec<wgpu::TextureFormat> = t
            .colors
            .iter()
            .take(outputs)
            .filter_map(|a| self.textures.get(&a.texture.0).map(|tex| wgpu_format(tex.desc.format)))
            .collect();
        if colors.len() != t.colors.len().min(outputs) {
            tracing::warn!(?target, "draw to a target with released attachments");
            return;
        }
        let attached: Vec<u32> = t.attached().collect();
        let key = PipelineKey {
            program: command.program.0,
            colors,
            depth: t.depth.is_some(),
            raster,
        };

        let (instances, count) = match command.geometry {
            Geometry::Fullscreen => (None, 1),
            Geometry::Mesh { mesh, instances, count } => {
                let Some(index_count) = self.meshes.get(&mesh.0).map(|m| m.index_count) else {
                    tracing::warn!(?mesh, "draw with unknown mesh");
                    return;
                };
                let available = match instances {
                    Some(buffer) => self.instances.get(&buffer.0).map_or(0, |b| b.len),
                    None => 1,
                };
                let count = count.min(available as u32);
                if count == 0 || index_count == 0 {
                    return;
                }
                (instances, count)
            }
        };

        if !self.ensure_pipeline(&key) {
            return;
        }
        let bind_key = self.bind_key(&command.bindings, &attached);
        self.ensure_bind_group(bind_key);
        let offset = self.push_uniforms(&command.uniforms);
        self.in_use.extend(instances.map(|b| b.0));
        self.in_use.extend(bind_key.storage.map(|b| b.0));

        let (Some(Some(pipeline)), Some(bind_group), Some(t)) = (
            self.pipelines.get(&key),
            self.bind_groups.get(&bind_key),
            self.targets.get(&target.0),
        ) else {
            return;
        };
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = t
            .color_views
            .iter()
            .take(outputs)
            .map(|view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_stencil_attachment = t.depth_view.as_ref().map(|view| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        });

        let encoder = self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("frame") })
        });
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("draw"),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            ..Default::default()
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[offset]);
        match command.geometry {
            Geometry::Fullscreen => pass.draw(0..3, 0..1),
            Geometry::Mesh { mesh, .. } => {
                let (Some(mesh), Some(instance_buffer)) = (
                    self.meshes.get(&mesh.0),
                    match instances {
                        Some(buffer) => self.instances.get(&buffer.0).map(|b| &b.buffer),
                        None => Some(&self.identity_instance),
                    },
                ) else {
                    return;
                };
                pass.set_vertex_buffer(0, mesh.vertices.slice(..));
                pass.set_vertex_buffer(1, instance_buffer.slice(..));
                pass.set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..mesh.index_count, 0, 0..count);
            }
        }
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) {
        let Some(desc) = self.texture_desc(texture) else {
            return;
        };
        if desc.mip_levels <= 1 || desc.format.is_depth() {
            return;
        }
        let format = wgpu_format(desc.format);
        if !self.downsample_pipelines.contains_key(&format) {
            let pipeline = self.blit_pipeline("downsample", &self.downsample, format);
            self.downsample_pipelines.insert(format, pipeline);
        }
        let (Some(t), Some(pipeline)) = (self.textures.get(&texture.0), self.downsample_pipelines.get(&format)) else {
            return;
        };
        let level_view = |layer: u32, level: u32| {
            t.texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some("mip"),
                dimension: Some(wgpu::TextureViewDimension::D2),
                base_mip_level: level,
                mip_level_count: Some(1),
                base_array_layer: layer,
                array_layer_count: Some(1),
                ..Default::default()
            })
        };
        let mut steps = Vec::new();
        for layer in 0..desc.kind.layers() {
            for level in 1..desc.mip_levels {
                let source = level_view(layer, level - 1);
                steps.push((self.blit_bindings(&source), level_view(layer, level)));
            }
        }

        let encoder = self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("frame") })
        });
        for (bind_group, view) in &steps {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("downsample"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                ..Default::default()
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
    }

    fn read_texture(&mut self, texture: TextureHandle, layer: u32) -> Result<Readback> {
        self.submit();
        let t = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| RenderError::ReadbackFailed(format!("unknown texture {}", texture.0)))?;
        if layer >= t.desc.kind.layers() {
            return Err(RenderError::ReadbackFailed(format!("texture {} has no layer {layer}", texture.0)));
        }
        let TextureDesc { width, height, format, .. } = t.desc;
        if width == 0 || height == 0 {
            return Ok(Readback {
                width,
                height,
                pixels: Vec::new(),
            });
        }
        let row = padded_row(width, format);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: row as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &t.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: if format.is_depth() {
                    wgpu::TextureAspect::DepthOnly
                } else {
                    wgpu::TextureAspect::All
                },
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| RenderError::ReadbackFailed(e.to_string()))?
            .map_err(|e| RenderError::ReadbackFailed(e.to_string()))?;

        let texel = texel_size(format) as usize;
        let pixels = {
            let data = slice.get_mapped_range();
            data.chunks_exact(row as usize)
                .flat_map(|line| {
                    line[..width as usize * texel]
                        .chunks_exact(texel)
                        .map(|bytes| decode_texel(format, bytes))
                        .collect::<Vec<_>>()
                })
                .collect()
        };
        buffer.unmap();
        Ok(Readback { width, height, pixels })
    }

    fn flush(&mut self) {
        self.submit();
    }

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

    #[test]
    fn readback_rows_are_aligned() {
        assert_eq!(padded_row(1, TextureFormat::R8Unorm), 256);
        assert_eq!(padded_row(64, TextureFormat::Rgba8Unorm), 256);
        assert_eq!(padded_row(65, TextureFormat::Rgba8Unorm), 512);
        assert_eq!(padded_row(32, TextureFormat::Rgba32Float), 512);
    }

    #[test]
    fn texels_decode_like_the_software_backend() {
        assert_eq!(decode_texel(TextureFormat::R8Unorm, &[255]), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(decode_texel(TextureFormat::Rgba8Unorm, &[0, 51, 255, 255]), [0.0, 0.2, 1.0, 1.0]);
        assert_eq!(
            decode_texel(TextureFormat::R32Float, &1000.0f32.to_le_bytes()),
            [1000.0, 0.0, 0.0, 1.0]
        );
        let halfs: Vec<u8> = [0.5f32, -2.0, 0.0, 1.0]
            .iter()
            .flat_map(|v| half::f16::from_f32(*v).to_le_bytes())
            .collect();
        assert_eq!(decode_texel(TextureFormat::Rgba16Float, &halfs), [0.5, -2.0, 0.0, 1.0]);
    }

    #[test]
    fn formats_map_one_to_one() {
        let formats = [
            TextureFormat::R8Unorm,
            TextureFormat::Rgba8Unorm,
            TextureFormat::R32Float,
            TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float,
            TextureFormat::Depth32Float,
        ];
        let mapped: HashSet<wgpu::TextureFormat> = formats.iter().map(|f| wgpu_format(*f)).collect();
        assert_eq!(mapped.len(), formats.len());
        for format in formats {
            assert_eq!(
                wgpu_format(format).block_copy_size(None).unwrap_or(4),
                texel_size(format),
                "{format:?}"
            );
        }
    }

    #[test]
    fn uniform_block_matches_wgsl_layout() {
        assert_eq!(size_of::<PassUniforms>(), 272);
        assert_eq!(LIGHT_BYTES, 384);
    }
}
