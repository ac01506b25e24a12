//! CPU versions of the WGSL programs, selected by program name.

use super::raster::{Fragment, Outputs};
use super::sampling::{SoftTexture, sample_2d, sample_cube};
use crate::gpu::{GpuLight, LIGHT_CAPACITY, PassUniforms};
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4, Vec4Swizzles};
use orrery_assets::ShaderKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Axis {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Program {
    Deferred,
    Depth,
    Shadow,
    Sky,
    ImageOnGeometry,
    EnvironmentMap,
    Lighting,
    Addition,
    Extract,
    BoxBlur(Axis),
    GaussBlur(Axis),
    Ssao,
    SaturationMap,
    TextureDrawer,
}

impl Program {
    pub fn from_stem(stem: &str) -> Option<Self> {
        Some(match stem {
            "deferred" => Program::Deferred,
            "depth" => Program::Depth,
            "shadow" => Program::Shadow,
            "sky" => Program::Sky,
            "image_on_geometry" => Program::ImageOnGeometry,
            "environment_map" => Program::EnvironmentMap,
            "lighting" => Program::Lighting,
            "addition" => Program::Addition,
            "extract" => Program::Extract,
            "blur_avg_pass1" => Program::BoxBlur(Axis::Horizontal),
            "blur_avg_pass2" => Program::BoxBlur(Axis::Vertical),
            "blur_gauss_pass1" => Program::GaussBlur(Axis::Horizontal),
            "blur_gauss_pass2" => Program::GaussBlur(Axis::Vertical),
            "ssao" => Program::Ssao,
            "saturation_map" => Program::SaturationMap,
            "texture_drawer" => Program::TextureDrawer,
            _ => return None,
        })
    }

    pub fn kind(self) -> ShaderKind {
        match self {
            Program::Deferred
            | Program::Depth
            | Program::Shadow
            | Program::Sky
            | Program::ImageOnGeometry
            | Program::EnvironmentMap => ShaderKind::Geometry,
            _ => ShaderKind::Filter,
        }
    }

    /// Run the fragment stage. `None` discards.
    pub fn shade(self, s: &Shading<'_>, f: &Fragment) -> Option<Outputs> {
        let u = s.uniforms;
        let one = |c: Vec4| Some([c, Vec4::ZERO, Vec4::ZERO, Vec4::ZERO]);
        match self {
            Program::Deferred => {
                let albedo = if u.textured > 0.5 {
                    s.sample(0, f.uv)
                } else {
                    Vec4::from(u.material_color)
                };
                let mut n = f.normal.normalize_or_zero();
                if u.normal_mapping > 0.5 {
                    let m = s.sample(1, f.uv).xyz() * 2.0 - Vec3::ONE;
                    let tbn = Mat3::from_cols(f.tangent.normalize_or_zero(), f.bitangent.normalize_or_zero(), n);
                    n = (tbn * m).normalize_or_zero();
                }
                Some([
                    albedo.xyz().extend(1.0),
                    n.extend(0.0),
                    Vec4::new(f.world.distance(s.cam_pos()), 0.0, 0.0, 1.0),
                    f.world.extend(1.0),
                ])
            }
            Program::Depth => one(Vec4::new(f.clip.z, 0.0, 0.0, 1.0)),
            Program::Shadow => {
                let scene = s.sample(1, s.screen_uv(f.clip)).x;
                if f.world.distance(s.cam_pos()) > scene + 0.05 {
                    return None;
                }
                let lc = Mat4::from_cols_array_2d(&u.light_camera) * f.world.extend(1.0);
                let ndc = lc.xyz() / lc.w;
                let stored = s.sample(0, Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5)).x;
                let n = f.normal.normalize_or_zero();
                let l = Vec4::from(u.light_direction).xyz().normalize_or_zero();
                let bias = (u.bias * (1.0 - n.dot(l))).max(u.bias * 0.1);
                let shadowed = if ndc.z - bias > stored { 1.0 } else { 0.0 };
                one(Vec4::new(shadowed, 0.0, 0.0, 1.0))
            }
            Program::Sky => {
                if u.textured > 0.5 && s.sample(0, s.screen_uv(f.clip)).x < f.world.distance(s.cam_pos()) {
                    return one(Vec4::ZERO);
                }
                let c = s.sample_cube((f.world - s.cam_pos()).normalize_or_zero(), u.mip_level);
                one(c.xyz().extend(1.0))
            }
            Program::ImageOnGeometry => {
                let uv = s.screen_uv(f.clip);
                if s.sample(0, uv).x < f.world.distance(s.cam_pos()) {
                    one(s.sample(1, uv))
                } else {
                    one(Vec4::ZERO)
                }
            }
            Program::EnvironmentMap => {
                let scene = s.sample(0, s.screen_uv(f.clip)).x;
                if f.world.distance(s.cam_pos()) > scene + u.bias {
                    return None;
                }
                let view = (f.world - s.cam_pos()).normalize_or_zero();
                let n = f.normal.normalize_or_zero();
                let r = view - 2.0 * view.dot(n) * n;
                one(s.sample_cube(r, u.mip_level).xyz().extend(1.0))
            }
            Program::Lighting => one(lighting(s, f.uv)),
            Program::Addition => one(s.sample(0, f.uv) + u.factor * s.sample(1, f.uv)),
            Program::Extract => {
                let c = s.sample(0, f.uv);
                let luminance = c.xyz().dot(Vec3::new(0.2126, 0.7152, 0.0722));
                one(if luminance > u.threshold { c.xyz().extend(1.0) } else { Vec4::ZERO })
            }
            Program::BoxBlur(axis) => one(blur(s, f.uv, axis, |_, _| 1.0)),
            Program::GaussBlur(axis) => one(blur(s, f.uv, axis, |i, radius| {
                let sigma = (radius as f32 / 2.0).max(0.5);
                (-((i * i) as f32) / (2.0 * sigma * sigma)).exp()
            })),
            Program::Ssao => one(ssao(s, f.uv)),
            Program::SaturationMap => {
                let ao = s.sample(0, f.uv).x;
                let image = s.sample(1, f.uv);
                one((image.xyz() * ao).extend(image.w))
            }
            Program::TextureDrawer => {
                let mut uv = f.uv;
                if u.flip_x > 0.5 {
                    uv.x = 1.0 - uv.x;
                }
                one(s.sample(0, uv).abs())
            }
        }
    }

    /// Color attachments written.
    pub fn outputs(self) -> usize {
        match self {
            Program::Deferred => 4,
            _ => 1,
        }
    }
}

fn lighting(s: &Shading<'_>, uv: Vec2) -> Vec4 {
    let u = s.uniforms;
    let albedo = s.sample(0, uv);
    if albedo.w <= 0.0 {
        return Vec4::ZERO;
    }
    let n = s.sample(1, uv).xyz().normalize_or_zero();
    let p = s.sample(2, uv).xyz();
    let shadow = s.sample(3, uv).x;
    let view = (s.cam_pos() - p).normalize_or_zero();

    let bottom = Vec4::from(u.hem_bottom).xyz();
    let top = Vec4::from(u.hem_top).xyz();
    let hemisphere = bottom.lerp(top, n.y * 0.5 + 0.5);
    let mut color = albedo.xyz() * (Vec4::from(u.ambient).xyz() + hemisphere);
    for light in &s.lights {
        let direction = Vec3::from(light.direction);
        if direction.length_squared() < 1e-8 {
            continue;
        }
        let l = -direction.normalize();
        let diffuse = n.dot(l).max(0.0);
        if diffuse <= 0.0 {
            continue;
        }
        let h = (l + view).normalize_or_zero();
        let specular = n.dot(h).max(0.0).powf(32.0) * 0.5;
        color += (albedo.xyz() * diffuse + Vec3::splat(specular)) * Vec3::from(light.color) * (1.0 - shadow);
    }
    color.extend(1.0)
}

fn blur(s: &Shading<'_>, uv: Vec2, axis: Axis, weight: impl Fn(i32, i32) -> f32) -> Vec4 {
    let u = s.uniforms;
    let radius = u.kernel_size.max(1.0) as i32 / 2;
    let texel = match axis {
        Axis::Horizontal => Vec2::new(1.0 / u.resolution[0], 0.0),
        Axis::Vertical => Vec2::new(0.0, 1.0 / u.resolution[1]),
    };
    let mut sum = Vec4::ZERO;
    let mut total = 0.0;
    for i in -radius..=radius {
        let w = weight(i, radius);
        sum += s.sample(0, uv + texel * i as f32) * w;
        total += w;
    }
    sum / total
}

fn ssao(s: &Shading<'_>, uv: Vec2) -> Vec4 {
    let u = s.uniforms;
    let center = s.sample(0, uv).x;
    if center >= u.depth_sentinel * 0.5 {
        return Vec4::ONE;
    }
    let resolution = Vec2::from(u.resolution);
    let mut occluded = 0.0;
    for i in 0..8 {
        let angle = i as f32 * std::f32::consts::FRAC_PI_4;
        let dir = Vec2::new(angle.cos(), angle.sin());
        for step in 1..=2 {
            let offset = dir * u.kernel_size * step as f32 * 0.5 / resolution;
            let diff = center - s.sample(0, uv + offset).x;
            if diff > u.bias && diff < u.threshold {
                occluded += 1.0;
            }
        }
    }
    let ao = (1.0 - u.factor * occluded / 16.0).clamp(0.0, 1.0);
    Vec4::new(ao, ao, ao, 1.0)
}

/// Everything a fragment can read: uniforms, bound textures, lights.
pub(crate) struct Shading<'a> {
    pub uniforms: &'a PassUniforms,
    pub textures: [Option<&'a SoftTexture>; 4],
    pub cube: Option<&'a SoftTexture>,
    pub lights: [GpuLight; LIGHT_CAPACITY],
}

impl Shading<'_> {
    /// Unbound slots read as zero.
    fn sample(&self, slot: usize, uv: Vec2) -> Vec4 {
        self.textures[slot].map_or(Vec4::ZERO, |t| sample_2d(t, uv))
    }

    fn sample_cube(&self, dir: Vec3, level: f32) -> Vec4 {
        self.cube.map_or(Vec4::ZERO, |t| sample_cube(t, dir, level))
    }

    fn screen_uv(&self, clip: Vec4) -> Vec2 {
        clip.xy() / Vec2::from(self.uniforms.resolution)
    }

    fn cam_pos(&self) -> Vec3 {
        Vec4::from(self.uniforms.cam_pos).xyz()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{TextureDesc, TextureFormat};
    use crate::software::sampling::Plane;

    fn texture(values: &[Vec4], width: u32) -> SoftTexture {
        let height = values.len() as u32 / width;
        let mut texture = SoftTexture::new(TextureDesc::d2("t", width, height, TextureFormat::Rgba16Float));
        texture.layers[0][0] = Plane {
            width,
            height,
            texels: values.to_vec(),
        };
        texture
    }

    fn shading<'a>(uniforms: &'a PassUniforms, textures: [Option<&'a SoftTexture>; 4]) -> Shading<'a> {
        Shading {
            uniforms,
            textures,
            cube: None,
            lights: [GpuLight::default(); LIGHT_CAPACITY],
        }
    }

    fn at(uv: Vec2) -> Fragment {
        Fragment {
            uv,
            ..Fragment::default()
        }
    }

    #[test]
    fn every_builtin_program_has_an_implementation() {
        for stem in [
            "deferred", "depth", "shadow", "sky", "image_on_geometry", "environment_map", "lighting",
            "addition", "extract", "blur_avg_pass1", "blur_avg_pass2", "blur_gauss_pass1",
            "blur_gauss_pass2", "ssao", "saturation_map", "texture_drawer",
        ] {
            assert!(Program::from_stem(stem).is_some(), "{stem}");
        }
        assert_eq!(Program::from_stem("deferred").map(Program::outputs), Some(4));
    }

    #[test]
    fn addition_scales_the_second_input() {
        let a = texture(&[Vec4::splat(0.25)], 1);
        let b = texture(&[Vec4::splat(0.5)], 1);
        let mut uniforms = PassUniforms::new();
        uniforms.factor = 0.5;
        let out = Program::Addition
            .shade(&shading(&uniforms, [Some(&a), Some(&b), None, None]), &at(Vec2::splat(0.5)))
            .unwrap();
        assert_eq!(out[0], Vec4::splat(0.5));
    }

    #[test]
    fn extract_keeps_only_bright_pixels() {
        let image = texture(&[Vec4::new(0.9, 0.9, 0.9, 1.0), Vec4::new(0.2, 0.2, 0.2, 1.0)], 2);
        let mut uniforms = PassUniforms::new();
        uniforms.threshold = 0.7;
        let s = shading(&uniforms, [Some(&image), None, None, None]);
        assert_eq!(Program::Extract.shade(&s, &at(Vec2::new(0.25, 0.5))).unwrap()[0], Vec4::new(0.9, 0.9, 0.9, 1.0));
        assert_eq!(Program::Extract.shade(&s, &at(Vec2::new(0.75, 0.5))).unwrap()[0], Vec4::ZERO);
    }

    #[test]
    fn box_blur_averages_the_row() {
        let row = texture(&[Vec4::ZERO, Vec4::splat(3.0), Vec4::ZERO], 3);
        let mut uniforms = PassUniforms::new();
        uniforms.kernel_size = 3.0;
        uniforms.resolution = [3.0, 1.0];
        let s = shading(&uniforms, [Some(&row), None, None, None]);
        let out = Program::BoxBlur(Axis::Horizontal).shade(&s, &at(Vec2::new(0.5, 0.5))).unwrap();
        assert_eq!(out[0], Vec4::ONE);
        let vertical = Program::BoxBlur(Axis::Vertical).shade(&s, &at(Vec2::new(0.5, 0.5))).unwrap();
        assert_eq!(vertical[0], Vec4::splat(3.0));
    }

    #[test]
    fn lighting_is_zero_without_geometry_and_ignores_empty_slots() {
        let uniforms = PassUniforms::new();
        let empty = texture(&[Vec4::ZERO], 1);
        let s = shading(&uniforms, [Some(&empty), None, None, None]);
        assert_eq!(Program::Lighting.shade(&s, &at(Vec2::splat(0.5))).unwrap()[0], Vec4::ZERO);

        let mut uniforms = PassUniforms::new();
        uniforms.ambient = [0.5, 0.5, 0.5, 1.0];
        let albedo = texture(&[Vec4::ONE], 1);
        let normal = texture(&[Vec4::new(0.0, 1.0, 0.0, 0.0)], 1);
        let s = shading(&uniforms, [Some(&albedo), Some(&normal), None, None]);
        let out = Program::Lighting.shade(&s, &at(Vec2::splat(0.5))).unwrap()[0];
        assert_eq!(out, Vec4::new(0.5, 0.5, 0.5, 1.0));
    }

    #[test]
    fn shadowed_fragments_lose_direct_light() {
        let mut uniforms = PassUniforms::new();
        uniforms.cam_pos = [0.0, 10.0, 0.0, 1.0];
        let albedo = texture(&[Vec4::ONE], 1);
        let normal = texture(&[Vec4::new(0.0, 1.0, 0.0, 0.0)], 1);
        let lit = texture(&[Vec4::ZERO], 1);
        let dark = texture(&[Vec4::ONE], 1);
        let mut s = shading(&uniforms, [Some(&albedo), Some(&normal), Some(&lit), Some(&lit)]);
        s.lights[0].direction = [0.0, -1.0, 0.0];
        s.lights[0].color = [1.0, 1.0, 1.0];
        let bright = Program::Lighting.shade(&s, &at(Vec2::splat(0.5))).unwrap()[0];
        s.textures[3] = Some(&dark);
        let shaded = Program::Lighting.shade(&s, &at(Vec2::splat(0.5))).unwrap()[0];
        assert!(bright.x > 1.0);
        assert_eq!(shaded, Vec4::new(0.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn ssao_leaves_background_unoccluded() {
        let mut uniforms = PassUniforms::new();
        uniforms.depth_sentinel = 1000.0;
        uniforms.resolution = [1.0, 1.0];
        let depth = texture(&[Vec4::splat(1000.0)], 1);
        let s = shading(&uniforms, [Some(&depth), None, None, None]);
        assert_eq!(Program::Ssao.shade(&s, &at(Vec2::splat(0.5))).unwrap()[0], Vec4::ONE);
    }

    #[test]
    fn drawer_mirrors_and_takes_magnitude() {
        let image = texture(&[Vec4::splat(-1.0), Vec4::splat(2.0)], 2);
        let mut uniforms = PassUniforms::new();
        let s = shading(&uniforms, [Some(&image), None, None, None]);
        assert_eq!(Program::TextureDrawer.shade(&s, &at(Vec2::new(0.25, 0.5))).unwrap()[0], Vec4::ONE);
        uniforms.flip_x = 1.0;
        let s = shading(&uniforms, [Some(&image), None, None, None]);
        assert_eq!(Program::TextureDrawer.shade(&s, &at(Vec2::new(0.25, 0.5))).unwrap()[0], Vec4::splat(2.0));
    }
}
