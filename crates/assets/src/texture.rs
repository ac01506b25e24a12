use crate::AssetError;

/// Face name suffixes of a six-image skybox, in cube layer order
/// (+X, -X, +Y, -Y, +Z, -Z).
pub const SKY_FACE_SUFFIXES: [&str; 6] = ["_ft", "_bk", "_up", "_dn", "_lf", "_rt"];

/// Decoded 8-bit RGBA image, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[u8; 4]>,
}

impl ImageData {
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> [u8; 4]) -> Self {
        let mut pixels = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self::from_fn(width, height, |_, _| rgba)
    }

    pub fn checker(size: u32, cells: u32, a: [u8; 4], b: [u8; 4]) -> Self {
        let cell = (size / cells.max(1)).max(1);
        Self::from_fn(size, size, |x, y| if ((x / cell) + (y / cell)) % 2 == 0 { a } else { b })
    }

    /// Smooth value noise tinted between two colors.
    pub fn noise(size: u32, seed: u64, scale: f32, low: [u8; 4], high: [u8; 4]) -> Self {
        Self::from_fn(size, size, |x, y| {
            let t = value_noise(x as f32 / scale, y as f32 / scale, seed);
            lerp_rgba(low, high, t)
        })
    }

    /// Dark sky with sparse bright stars.
    pub fn starfield(size: u32, seed: u64) -> Self {
        Self::from_fn(size, size, |x, y| {
            let h = hash2(x, y, seed);
            if h % 97 == 0 {
                let v = 180 + (h >> 8) as u8 % 76;
                [v, v, v.saturating_sub(10), 255]
            } else {
                [4, 5, 12, 255]
            }
        })
    }

    /// Vertical two-color gradient.
    pub fn gradient(width: u32, height: u32, top: [u8; 4], bottom: [u8; 4]) -> Self {
        let span = (height.max(2) - 1) as f32;
        Self::from_fn(width, height, |_, y| lerp_rgba(top, bottom, y as f32 / span))
    }

    /// Decode PNG or JPEG bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, AssetError> {
        let img = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = img.dimensions();
        let pixels = img.pixels().map(|p| p.0).collect();
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }
}

fn lerp_rgba(a: [u8; 4], b: [u8; 4], t: f32) -> [u8; 4] {
    let t = t.clamp(0.0, 1.0);
    let mut out = [0u8; 4];
    for i in 0..4 {
        out[i] = (a[i] as f32 + (b[i] as f32 - a[i] as f32) * t).round() as u8;
    }
    out
}

/// Splitmix64 finalizer over packed coordinates.
fn hash2(x: u32, y: u32, seed: u64) -> u64 {
    let mut z = seed
        .wrapping_add((x as u64) << 32 | y as u64)
        .wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn lattice(x: i64, y: i64, seed: u64) -> f32 {
    (hash2(x as u32, y as u32, seed) >> 40) as f32 / (1u64 << 24) as f32
}

fn value_noise(x: f32, y: f32, seed: u64) -> f32 {
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let (sx, sy) = (fx * fx * (3.0 - 2.0 * fx), fy * fy * (3.0 - 2.0 * fy));
    let (ix, iy) = (x0 as i64, y0 as i64);
    let a = lattice(ix, iy, seed);
    let b = lattice(ix + 1, iy, seed);
    let c = lattice(ix, iy + 1, seed);
    let d = lattice(ix + 1, iy + 1, seed);
    let top = a + (b - a) * sx;
    let bottom = c + (d - c) * sx;
    top + (bottom - top) * sy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_fills_every_pixel() {
        let img = ImageData::solid(4, 3, [1, 2, 3, 4]);
        assert_eq!(img.pixels.len(), 12);
        assert!(img.pixels.iter().all(|p| *p == [1, 2, 3, 4]));
        assert_eq!(img.as_bytes().len(), 48);
    }

    #[test]
    fn checker_alternates() {
        let img = ImageData::checker(4, 2, [0, 0, 0, 255], [255, 255, 255, 255]);
        assert_eq!(img.pixel(0, 0), [0, 0, 0, 255]);
        assert_eq!(img.pixel(2, 0), [255, 255, 255, 255]);
        assert_eq!(img.pixel(2, 2), [0, 0, 0, 255]);
    }

    #[test]
    fn noise_is_deterministic_per_seed() {
        let a = ImageData::noise(16, 7, 4.0, [0, 0, 0, 255], [255, 255, 255, 255]);
        let b = ImageData::noise(16, 7, 4.0, [0, 0, 0, 255], [255, 255, 255, 255]);
        let c = ImageData::noise(16, 8, 4.0, [0, 0, 0, 255], [255, 255, 255, 255]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn gradient_spans_both_colors() {
        let img = ImageData::gradient(2, 5, [255, 0, 0, 255], [0, 0, 255, 255]);
        assert_eq!(img.pixel(0, 0), [255, 0, 0, 255]);
        assert_eq!(img.pixel(1, 4), [0, 0, 255, 255]);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(ImageData::decode(b"not an image"), Err(AssetError::Image(_))));
    }

    #[test]
    fn decode_reads_png() {
        let mut bytes = Vec::new();
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 255]));
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let decoded = ImageData::decode(&bytes).unwrap();
        assert_eq!(decoded.width, 2);
        assert_eq!(decoded.pixel(1, 1), [10, 20, 30, 255]);
    }
}
