//! Triangle setup, clipping and scan conversion.
//!
//! Clip space follows wgpu: depth in `0..=w`, NDC y up, row 0 of a target
//! at NDC y = +1. Counter-clockwise triangles (in NDC) face the viewer.

use super::sampling::{Plane, quantize};
use crate::gpu::{RasterState, TextureFormat};
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use orrery_assets::MeshData;

/// world (3), normal (3), uv (2), tangent (3), bitangent (3)
pub(crate) const VARYINGS: usize = 14;

pub(crate) type Outputs = [Vec4; 4];

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ClipVertex {
    pub clip: Vec4,
    pub varyings: [f32; VARYINGS],
}

impl ClipVertex {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        let mut varyings = self.varyings;
        for (v, o) in varyings.iter_mut().zip(other.varyings) {
            *v += (o - *v) * t;
        }
        Self {
            clip: self.clip.lerp(other.clip, t),
            varyings,
        }
    }
}

/// Fragment stage input. `clip` is (pixel x, pixel y, depth, 1/w) like a
/// WGSL `@builtin(position)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) struct Fragment {
    pub clip: Vec4,
    pub uv: Vec2,
    pub world: Vec3,
    pub normal: Vec3,
    pub tangent: Vec3,
    pub bitangent: Vec3,
}

impl Fragment {
    fn from_varyings(clip: Vec4, v: &[f32; VARYINGS]) -> Self {
        Self {
            clip,
            world: Vec3::new(v[0], v[1], v[2]),
            normal: Vec3::new(v[3], v[4], v[5]),
            uv: Vec2::new(v[6], v[7]),
            tangent: Vec3::new(v[8], v[9], v[10]),
            bitangent: Vec3::new(v[11], v[12], v[13]),
        }
    }
}

/// Vertex stage shared by every geometry program.
pub(crate) fn transform_mesh(mesh: &MeshData, model: Mat4, camera: Mat4) -> Vec<ClipVertex> {
    let linear = Mat3::from_mat4(model);
    mesh.vertices
        .iter()
        .map(|v| {
            let world = model.transform_point3(Vec3::from(v.position));
            let normal = linear * Vec3::from(v.normal);
            let tangent = linear * Vec3::from(v.tangent);
            let bitangent = linear * Vec3::from(v.bitangent);
            let mut varyings = [0.0; VARYINGS];
            varyings[0..3].copy_from_slice(&world.to_array());
            varyings[3..6].copy_from_slice(&normal.to_array());
            varyings[6..8].copy_from_slice(&v.uv);
            varyings[8..11].copy_from_slice(&tangent.to_array());
            varyings[11..14].copy_from_slice(&bitangent.to_array());
            ClipVertex {
                clip: camera * world.extend(1.0),
                varyings,
            }
        })
        .collect()
}

/// Sutherland-Hodgman against one plane; `distance >= 0` is inside.
fn clip_polygon(polygon: &[ClipVertex], distance: impl Fn(&ClipVertex) -> f32) -> Vec<ClipVertex> {
    let mut out = Vec::with_capacity(polygon.len() + 1);
    for (i, current) in polygon.iter().enumerate() {
        let next = &polygon[(i + 1) % polygon.len()];
        let (dc, dn) = (distance(current), distance(next));
        if dc >= 0.0 {
            out.push(*current);
        }
        if (dc >= 0.0) != (dn >= 0.0) {
            out.push(current.lerp(next, dc / (dc - dn)));
        }
    }
    out
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Attachments of the target being drawn.
pub(crate) struct Canvas<'a> {
    pub colors: Vec<(&'a mut Plane, TextureFormat)>,
    pub depth: Option<&'a mut Plane>,
    pub width: u32,
    pub height: u32,
}

impl Canvas<'_> {
    fn write(&mut self, x: u32, y: u32, outputs: &Outputs) {
        for ((plane, format), value) in self.colors.iter_mut().zip(outputs) {
            plane.set(x, y, quantize(*format, *value));
        }
    }

    pub fn fullscreen(&mut self, shade: impl Fn(&Fragment) -> Option<Outputs>) {
        let (w, h) = (self.width as f32, self.height as f32);
        for y in 0..self.height {
            for x in 0..self.width {
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let fragment = Fragment {
                    clip: Vec4::new(p.x, p.y, 0.0, 1.0),
                    uv: p / Vec2::new(w, h),
                    ..Fragment::default()
                };
                if let Some(outputs) = shade(&fragment) {
                    self.write(x, y, &outputs);
                }
            }
        }
    }

    /// Clip against the near and far planes, then fill the pieces.
    pub fn triangle(
        &mut self,
        raster: RasterState,
        vertices: [ClipVertex; 3],
        shade: &impl Fn(&Fragment) -> Option<Outputs>,
    ) {
        let inside = |v: &ClipVertex| v.clip.z >= 0.0 && v.clip.z <= v.clip.w;
        if vertices.iter().all(inside) {
            self.fill(raster, vertices, shade);
            return;
        }
        let near = clip_polygon(&vertices, |v| v.clip.z);
        let polygon = clip_polygon(&near, |v| v.clip.w - v.clip.z);
        for i in 1..polygon.len().saturating_sub(1) {
            self.fill(raster, [polygon[0], polygon[i], polygon[i + 1]], shade);
        }
    }

    fn fill(&mut self, raster: RasterState, v: [ClipVertex; 3], shade: &impl Fn(&Fragment) -> Option<Outputs>) {
        if v.iter().any(|c| c.clip.w <= 0.0) {
            return;
        }
        let ndc = v.map(|c| c.clip.truncate() / c.clip.w);
        let facing = (ndc[1].x - ndc[0].x) * (ndc[2].y - ndc[0].y) - (ndc[2].x - ndc[0].x) * (ndc[1].y - ndc[0].y);
        if !facing.is_finite() || facing.abs() < f32::EPSILON || (raster.cull_back && facing < 0.0) {
            return;
        }

        let (w, h) = (self.width as f32, self.height as f32);
        let screen = ndc.map(|p| Vec2::new((p.x * 0.5 + 0.5) * w, (0.5 - p.y * 0.5) * h));
        let area = edge(screen[0], screen[1], screen[2]);
        let inv_w = v.map(|c| 1.0 / c.clip.w);

        let lo = screen[0].min(screen[1]).min(screen[2]).max(Vec2::ZERO).floor();
        let hi = screen[0].max(screen[1]).max(screen[2]).min(Vec2::new(w, h)).ceil();
        for y in lo.y as u32..hi.y as u32 {
            for x in lo.x as u32..hi.x as u32 {
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let b = [
                    edge(screen[1], screen[2], p) / area,
                    edge(screen[2], screen[0], p) / area,
                    edge(screen[0], screen[1], p) / area,
                ];
                if b.iter().any(|&bi| bi < 0.0) {
                    continue;
                }
                let z = b[0] * ndc[0].z + b[1] * ndc[1].z + b[2] * ndc[2].z;
                if raster.depth_test {
                    if let Some(depth) = &self.depth {
                        if !(z < depth.get(x, y).x) {
                            continue;
                        }
                    }
                }

                let weights = [b[0] * inv_w[0], b[1] * inv_w[1], b[2] * inv_w[2]];
                let total = weights[0] + weights[1] + weights[2];
                let mut varyings = [0.0; VARYINGS];
                for (k, out) in varyings.iter_mut().enumerate() {
                    *out = (weights[0] * v[0].varyings[k] + weights[1] * v[1].varyings[k] + weights[2] * v[2].varyings[k])
                        / total;
                }
                let fragment = Fragment::from_varyings(Vec4::new(p.x, p.y, z, total), &varyings);
                if let Some(outputs) = shade(&fragment) {
                    if raster.depth_test {
                        if let Some(depth) = &mut self.depth {
                            depth.set(x, y, Vec4::new(z, 0.0, 0.0, 1.0));
                        }
                    }
                    self.write(x, y, &outputs);
                }
            }
        }
    }
}
