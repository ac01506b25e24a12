//! Texel storage, nearest sampling, cube lookup and mip generation.

use crate::gpu::{TextureDesc, TextureFormat, WrapMode};
use glam::{Vec2, Vec3, Vec4};

/// One mip level of one layer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Plane {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<Vec4>,
}

impl Plane {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            texels: vec![Vec4::ZERO; (width * height) as usize],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Vec4 {
        self.texels[(y * self.width + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, value: Vec4) {
        self.texels[(y * self.width + x) as usize] = value;
    }

    pub fn fill(&mut self, value: Vec4) {
        self.texels.fill(value);
    }

    /// Half-size copy, each texel the mean of up to four parents.
    fn downsample(&self) -> Plane {
        let mut next = Plane::new((self.width / 2).max(1), (self.height / 2).max(1));
        for y in 0..next.height {
            for x in 0..next.width {
                let x0 = (x * 2).min(self.width - 1);
                let y0 = (y * 2).min(self.height - 1);
                let x1 = (x0 + 1).min(self.width - 1);
                let y1 = (y0 + 1).min(self.height - 1);
                let sum = self.get(x0, y0) + self.get(x1, y0) + self.get(x0, y1) + self.get(x1, y1);
                next.set(x, y, sum * 0.25);
            }
        }
        next
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SoftTexture {
    pub desc: TextureDesc,
    /// `[layer][mip]`
    pub layers: Vec<Vec<Plane>>,
}

impl SoftTexture {
    pub fn new(desc: TextureDesc) -> Self {
        let mips = desc.mip_levels.max(1);
        let layers = (0..desc.kind.layers())
            .map(|_| {
                (0..mips)
                    .map(|m| Plane::new((desc.width >> m).max(1), (desc.height >> m).max(1)))
                    .collect()
            })
            .collect();
        Self { desc, layers }
    }

    pub fn base(&self, layer: usize) -> &Plane {
        &self.layers[layer][0]
    }

    /// Rebuild mips 1.. of every layer.
    pub fn generate_mips(&mut self) {
        for mips in &mut self.layers {
            for level in 1..mips.len() {
                mips[level] = mips[level - 1].downsample();
            }
        }
    }
}

/// Value as stored by a target of `format`.
pub(crate) fn quantize(format: TextureFormat, value: Vec4) -> Vec4 {
    let unorm = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() / 255.0;
    match format {
        TextureFormat::R8Unorm => Vec4::new(unorm(value.x), 0.0, 0.0, 1.0),
        TextureFormat::Rgba8Unorm => Vec4::new(unorm(value.x), unorm(value.y), unorm(value.z), unorm(value.w)),
        TextureFormat::R32Float | TextureFormat::Depth32Float => Vec4::new(value.x, 0.0, 0.0, 1.0),
        TextureFormat::Rgba16Float | TextureFormat::Rgba32Float => value,
    }
}

fn wrap_index(coord: f32, size: u32, wrap: WrapMode) -> u32 {
    let i = (coord * size as f32).floor() as i64;
    match wrap {
        WrapMode::ClampToEdge => i.clamp(0, size as i64 - 1) as u32,
        WrapMode::Repeat => i.rem_euclid(size as i64) as u32,
    }
}

fn sample_plane(plane: &Plane, uv: Vec2, wrap: WrapMode) -> Vec4 {
    if !uv.is_finite() {
        return Vec4::ZERO;
    }
    plane.get(wrap_index(uv.x, plane.width, wrap), wrap_index(uv.y, plane.height, wrap))
}

/// Nearest sample of mip 0, layer 0.
pub(crate) fn sample_2d(texture: &SoftTexture, uv: Vec2) -> Vec4 {
    sample_plane(texture.base(0), uv, texture.desc.wrap)
}

/// Cube layer and face coordinates for a direction. `t` grows downwards
/// on the face image.
pub(crate) fn cube_face(dir: Vec3) -> (usize, Vec2) {
    let a = dir.abs();
    let (layer, sc, tc, ma) = if a.x >= a.y && a.x >= a.z {
        if dir.x > 0.0 { (0, -dir.z, -dir.y, a.x) } else { (1, dir.z, -dir.y, a.x) }
    } else if a.y >= a.z {
        if dir.y > 0.0 { (2, dir.x, dir.z, a.y) } else { (3, dir.x, -dir.z, a.y) }
    } else if dir.z > 0.0 {
        (4, dir.x, -dir.y, a.z)
    } else {
        (5, -dir.x, -dir.y, a.z)
    };
    if ma <= 0.0 {
        return (0, Vec2::splat(0.5));
    }
    (layer, Vec2::new(sc / ma + 1.0, tc / ma + 1.0) * 0.5)
}

/// Nearest sample from the mip closest to `level`.
pub(crate) fn sample_cube(texture: &SoftTexture, dir: Vec3, level: f32) -> Vec4 {
    let (layer, st) = cube_face(dir);
    let mips = &texture.layers[layer.min(texture.layers.len() - 1)];
    let mip = (level.max(0.0).round() as usize).min(mips.len() - 1);
    sample_plane(&mips[mip], st, WrapMode::ClampToEdge)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Plane {
        let mut plane = Plane::new(width, height);
        for y in 0..height {
            for x in 0..width {
                plane.set(x, y, Vec4::new(x as f32, y as f32, 0.0, 1.0));
            }
        }
        plane
    }

    #[test]
    fn unorm_targets_quantize_to_eight_bits() {
        let v = quantize(TextureFormat::Rgba8Unorm, Vec4::new(0.5, 2.0, -1.0, 1.0));
        assert_eq!(v, Vec4::new(128.0 / 255.0, 1.0, 0.0, 1.0));
        assert_eq!(quantize(TextureFormat::R32Float, Vec4::new(1000.0, 5.0, 5.0, 0.0)), Vec4::new(1000.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn wrap_modes() {
        let plane = gradient(4, 4);
        let clamped = sample_plane(&plane, Vec2::new(1.3, -0.2), WrapMode::ClampToEdge);
        assert_eq!(clamped.truncate().truncate(), Vec2::new(3.0, 0.0));
        let repeated = sample_plane(&plane, Vec2::new(1.3, -0.2), WrapMode::Repeat);
        assert_eq!(repeated.truncate().truncate(), Vec2::new(1.0, 3.0));
    }

    #[test]
    fn cube_faces_follow_axis_order() {
        let axes = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
        for (layer, axis) in axes.into_iter().enumerate() {
            assert_eq!(cube_face(axis), (layer, Vec2::splat(0.5)));
        }
    }

    #[test]
    fn up_is_the_top_of_side_faces() {
        let (layer, st) = cube_face(Vec3::new(1.0, 0.5, 0.0));
        assert_eq!(layer, 0);
        assert!(st.y < 0.5);
        let (layer, st) = cube_face(Vec3::new(0.0, -0.5, -1.0));
        assert_eq!(layer, 5);
        assert!(st.y > 0.5);
    }

    #[test]
    fn mips_average_their_parents() {
        let desc = TextureDesc::cube("c", 4, TextureFormat::Rgba16Float);
        let mut texture = SoftTexture::new(desc);
        texture.layers[3][0] = gradient(4, 4);
        texture.generate_mips();
        assert_eq!(texture.layers[3].len(), 3);
        assert_eq!(texture.layers[3][1].get(0, 0), Vec4::new(0.5, 0.5, 0.0, 1.0));
        assert_eq!(texture.layers[3][2].get(0, 0), Vec4::new(1.5, 1.5, 0.0, 1.0));
        assert_eq!(sample_cube(&texture, Vec3::NEG_Y, 2.0), Vec4::new(1.5, 1.5, 0.0, 1.0));
    }
}
