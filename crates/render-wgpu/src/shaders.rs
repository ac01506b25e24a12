//! WGSL shared by every program: the uniform block, bindings, sampling
//! helpers and both vertex stages. Program bodies only supply `fs_main`.

use orrery_assets::ShaderKind;

/// Bindings of group 0.
pub(crate) mod binding {
    pub const UNIFORMS: u32 = 0;
    pub const TEXTURES: u32 = 1;
    pub const SAMPLERS: u32 = 5;
    pub const CUBE: u32 = 9;
    pub const CUBE_SAMPLER: u32 = 10;
    pub const LIGHTS: u32 = 11;
}

pub(crate) const PRELUDE: &str = r#"
struct Uniforms {
    camera: mat4x4<f32>,
    light_camera: mat4x4<f32>,
    cam_pos: vec4<f32>,
    light_direction: vec4<f32>,
    material_color: vec4<f32>,
    ambient: vec4<f32>,
    hem_top: vec4<f32>,
    hem_bottom: vec4<f32>,
    resolution: vec2<f32>,
    factor: f32,
    mip_level: f32,
    kernel_size: f32,
    textured: f32,
    normal_mapping: f32,
    flip_x: f32,
    threshold: f32,
    depth_sentinel: f32,
    bias: f32,
    pad0: f32,
};

struct Light {
    position: vec3<f32>,
    direction: vec3<f32>,
    color: vec3<f32>,
};

@group(0) @binding(0) var<uniform> u: Uniforms;
@group(0) @binding(1) var tex0: texture_2d<f32>;
@group(0) @binding(2) var tex1: texture_2d<f32>;
@group(0) @binding(3) var tex2: texture_2d<f32>;
@group(0) @binding(4) var tex3: texture_2d<f32>;
@group(0) @binding(5) var samp0: sampler;
@group(0) @binding(6) var samp1: sampler;
@group(0) @binding(7) var samp2: sampler;
@group(0) @binding(8) var samp3: sampler;
@group(0) @binding(9) var cube_tex: texture_cube<f32>;
@group(0) @binding(10) var cube_samp: sampler;
@group(0) @binding(11) var<storage, read> lights: array<Light, 8>;

fn sample0(uv: vec2<f32>) -> vec4<f32> { return textureSampleLevel(tex0, samp0, uv, 0.0); }
fn sample1(uv: vec2<f32>) -> vec4<f32> { return textureSampleLevel(tex1, samp1, uv, 0.0); }
fn sample2(uv: vec2<f32>) -> vec4<f32> { return textureSampleLevel(tex2, samp2, uv, 0.0); }
fn sample3(uv: vec2<f32>) -> vec4<f32> { return textureSampleLevel(tex3, samp3, uv, 0.0); }

fn screen_uv(clip: vec4<f32>) -> vec2<f32> {
    return clip.xy / u.resolution;
}

struct MeshIn {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec3<f32>,
    @location(4) bitangent: vec3<f32>,
    @location(5) model_0: vec4<f32>,
    @location(6) model_1: vec4<f32>,
    @location(7) model_2: vec4<f32>,
    @location(8) model_3: vec4<f32>,
};

struct MeshOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) world: vec3<f32>,
    @location(2) normal: vec3<f32>,
    @location(3) tangent: vec3<f32>,
    @location(4) bitangent: vec3<f32>,
};

@vertex
fn vs_mesh(v: MeshIn) -> MeshOut {
    let model = mat4x4<f32>(v.model_0, v.model_1, v.model_2, v.model_3);
    let basis = mat3x3<f32>(model[0].xyz, model[1].xyz, model[2].xyz);
    let world = model * vec4<f32>(v.position, 1.0);

    var out: MeshOut;
    out.clip = u.camera * world;
    out.uv = v.uv;
    out.world = world.xyz;
    out.normal = basis * v.normal;
    out.tangent = basis * v.tangent;
    out.bitangent = basis * v.bitangent;
    return out;
}

struct ScreenOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

// One triangle covering the target; uv (0, 0) is the top-left texel.
@vertex
fn vs_screen(@builtin(vertex_index) index: u32) -> ScreenOut {
    let p = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: ScreenOut;
    out.clip = vec4<f32>(p * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(p.x, 1.0 - p.y);
    return out;
}
"#;

/// Full module for a program body.
pub(crate) fn compose(body: &str) -> String {
    format!("{PRELUDE}\n{body}")
}

pub(crate) fn vertex_entry(kind: ShaderKind) -> &'static str {
    match kind {
        ShaderKind::Geometry => "vs_mesh",
        ShaderKind::Filter => "vs_screen",
    }
}

/// Number of color outputs written by `fs_main`: one for a bare
/// `@location(0)` return, otherwise the locations of the returned struct.
pub(crate) fn fragment_outputs(body: &str) -> usize {
    let Some(signature) = body.split("fn fs_main").nth(1) else {
        return 1;
    };
    let Some(ret) = signature.split("->").nth(1) else {
        return 1;
    };
    let ret = ret.trim_start();
    if ret.starts_with('@') {
        return 1;
    }
    let name: String = ret.chars().take_while(|c| c.is_alphanumeric() || *c == '_').collect();
    let declaration = format!("struct {name}");
    let Some(start) = body.find(&declaration) else {
        return 1;
    };
    let fields = &body[start..];
    let end = fields.find('}').unwrap_or(fields.len());
    fields[..end].matches("@location(").count().max(1)
}

/// Builds mip `n` from mip `n - 1` as the mean of each 2x2 block.
pub(crate) const DOWNSAMPLE: &str = r#"
@group(0) @binding(0) var src: texture_2d<f32>;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let p = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(p * 2.0 - 1.0, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    let size = vec2<i32>(textureDimensions(src));
    let base = vec2<i32>(pos.xy) * 2;
    let last = size - vec2<i32>(1);
    let a = textureLoad(src, min(base, last), 0);
    let b = textureLoad(src, min(base + vec2<i32>(1, 0), last), 0);
    let c = textureLoad(src, min(base + vec2<i32>(0, 1), last), 0);
    let d = textureLoad(src, min(base + vec2<i32>(1, 1), last), 0);
    return (a + b + c + d) * 0.25;
}
"#;

/// Copies a texture onto a surface of any format, stretching to fit.
pub(crate) const PRESENT: &str = r#"
@group(0) @binding(0) var src: texture_2d<f32>;

struct Out {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> Out {
    let p = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: Out;
    out.clip = vec4<f32>(p * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(p.x, 1.0 - p.y);
    return out;
}

@fragment
fn fs_main(in: Out) -> @location(0) vec4<f32> {
    let size = vec2<f32>(textureDimensions(src));
    let texel = vec2<i32>(clamp(in.uv * size, vec2<f32>(0.0), size - vec2<f32>(1.0)));
    return vec4<f32>(textureLoad(src, texel, 0).rgb, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use orrery_assets::{AssetStore, ContentProvider};

    #[test]
    fn bare_location_return_is_one_output() {
        let body = "@fragment\nfn fs_main(in: ScreenOut) -> @location(0) vec4<f32> {\n    return sample0(in.uv);\n}";
        assert_eq!(fragment_outputs(body), 1);
    }

    #[test]
    fn struct_return_counts_locations() {
        let body = "struct GBufferOut {\n  @location(0) a: vec4<f32>,\n  @location(1) b: vec4<f32>,\n  @location(2) c: vec4<f32>,\n  @location(3) d: vec4<f32>,\n};\n\n@fragment\nfn fs_main(in: MeshOut) -> GBufferOut { }";
        assert_eq!(fragment_outputs(body), 4);
    }

    #[test]
    fn builtin_programs_have_expected_outputs() {
        let store = AssetStore::with_builtins();
        for name in ["deferred", "lighting", "sky", "ssao", "texture_drawer"] {
            let program = store
                .load_shader_program(name)
                .or_else(|_| store.load_filter_shader(name))
                .unwrap();
            let expected = if name == "deferred" { 4 } else { 1 };
            assert_eq!(fragment_outputs(&program.wgsl), expected, "{name}");
        }
    }

    #[test]
    fn composed_module_keeps_both_vertex_stages() {
        let module = compose("@fragment\nfn fs_main(in: ScreenOut) -> @location(0) vec4<f32> { return vec4<f32>(0.0); }");
        assert!(module.contains("fn vs_mesh"));
        assert!(module.contains("fn vs_screen"));
        assert!(module.ends_with("}"));
    }
}
