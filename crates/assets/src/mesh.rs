use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use std::collections::HashMap;

/// Interleaved vertex layout shared by every geometry program.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub tangent: [f32; 3],
    pub bitangent: [f32; 3],
}

impl MeshVertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            uv: uv.to_array(),
            tangent: [0.0; 3],
            bitangent: [0.0; 3],
        }
    }
}

/// Indexed triangle list. Front faces wind counter-clockwise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Check that the index list forms whole triangles over existing vertices.
    pub fn validate(&self) -> Result<(), String> {
        if self.indices.len() % 3 != 0 {
            return Err(format!("index count {} is not a multiple of 3", self.indices.len()));
        }
        let count = self.vertices.len() as u32;
        if let Some(bad) = self.indices.iter().find(|&&i| i >= count) {
            return Err(format!("index {bad} out of range for {count} vertices"));
        }
        Ok(())
    }

    /// Unit sphere built by subdividing an icosahedron.
    pub fn icosphere(subdivisions: u32, radius: f32) -> Self {
        let t = (1.0 + 5.0_f32.sqrt()) / 2.0;
        let mut positions: Vec<Vec3> = [
            (-1.0, t, 0.0),
            (1.0, t, 0.0),
            (-1.0, -t, 0.0),
            (1.0, -t, 0.0),
            (0.0, -1.0, t),
            (0.0, 1.0, t),
            (0.0, -1.0, -t),
            (0.0, 1.0, -t),
            (t, 0.0, -1.0),
            (t, 0.0, 1.0),
            (-t, 0.0, -1.0),
            (-t, 0.0, 1.0),
        ]
        .iter()
        .map(|&(x, y, z)| Vec3::new(x, y, z).normalize())
        .collect();

        #[rustfmt::skip]
        let mut faces: Vec<[u32; 3]> = vec![
            [0, 11, 5], [0, 5, 1], [0, 1, 7], [0, 7, 10], [0, 10, 11],
            [1, 5, 9], [5, 11, 4], [11, 10, 2], [10, 7, 6], [7, 1, 8],
            [3, 9, 4], [3, 4, 2], [3, 2, 6], [3, 6, 8], [3, 8, 9],
            [4, 9, 5], [2, 4, 11], [6, 2, 10], [8, 6, 7], [9, 8, 1],
        ];

        for _ in 0..subdivisions {
            let mut midpoints: HashMap<(u32, u32), u32> = HashMap::new();
            let mut midpoint = |a: u32, b: u32, positions: &mut Vec<Vec3>| -> u32 {
                let key = (a.min(b), a.max(b));
                *midpoints.entry(key).or_insert_with(|| {
                    let p = ((positions[a as usize] + positions[b as usize]) * 0.5).normalize();
                    positions.push(p);
                    positions.len() as u32 - 1
                })
            };
            let mut next = Vec::with_capacity(faces.len() * 4);
            for [a, b, c] in faces {
                let ab = midpoint(a, b, &mut positions);
                let bc = midpoint(b, c, &mut positions);
                let ca = midpoint(c, a, &mut positions);
                next.push([a, ab, ca]);
                next.push([b, bc, ab]);
                next.push([c, ca, bc]);
                next.push([ab, bc, ca]);
            }
            faces = next;
        }

        let vertices = positions
            .iter()
            .map(|&n| {
                let u = 0.5 + n.z.atan2(n.x) / std::f32::consts::TAU;
                let v = 0.5 - n.y.asin() / std::f32::consts::PI;
                MeshVertex::new(n * radius, n, Vec2::new(u, v))
            })
            .collect();
        let indices = faces.into_iter().flatten().collect();

        let mut mesh = Self { vertices, indices };
        mesh.compute_tangents();
        mesh
    }

    /// Latitude/longitude sphere with a proper uv seam.
    pub fn uv_sphere(slices: u32, stacks: u32, radius: f32) -> Self {
        let slices = slices.max(3);
        let stacks = stacks.max(2);
        let mut vertices = Vec::with_capacity(((slices + 1) * (stacks + 1)) as usize);
        for i in 0..=stacks {
            let theta = std::f32::consts::PI * i as f32 / stacks as f32;
            for j in 0..=slices {
                let phi = std::f32::consts::TAU * j as f32 / slices as f32;
                let n = Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
                let uv = Vec2::new(j as f32 / slices as f32, i as f32 / stacks as f32);
                vertices.push(MeshVertex::new(n * radius, n, uv));
            }
        }

        let row = slices + 1;
        let mut indices = Vec::with_capacity((slices * stacks * 6) as usize);
        for i in 0..stacks {
            for j in 0..slices {
                let a = i * row + j;
                let b = (i + 1) * row + j;
                let c = b + 1;
                let d = a + 1;
                indices.extend_from_slice(&[a, d, c, a, c, b]);
            }
        }

        let mut mesh = Self { vertices, indices };
        mesh.compute_tangents();
        mesh
    }

    /// Unit square in the XZ plane facing +Y.
    pub fn plane() -> Self {
        let n = Vec3::Y;
        let vertices = vec![
            MeshVertex::new(Vec3::new(-0.5, 0.0, -0.5), n, Vec2::new(0.0, 0.0)),
            MeshVertex::new(Vec3::new(-0.5, 0.0, 0.5), n, Vec2::new(0.0, 1.0)),
            MeshVertex::new(Vec3::new(0.5, 0.0, 0.5), n, Vec2::new(1.0, 1.0)),
            MeshVertex::new(Vec3::new(0.5, 0.0, -0.5), n, Vec2::new(1.0, 0.0)),
        ];
        let mut mesh = Self {
            vertices,
            indices: vec![0, 1, 2, 0, 2, 3],
        };
        mesh.compute_tangents();
        mesh
    }

    /// Unit cube centered on the origin with per-face normals.
    pub fn cube() -> Self {
        let p = 0.5_f32;
        #[rustfmt::skip]
        let faces: [(Vec3, [[f32; 3]; 4]); 6] = [
            (Vec3::Z,     [[-p, -p,  p], [ p, -p,  p], [ p,  p,  p], [-p,  p,  p]]),
            (Vec3::NEG_Z, [[ p, -p, -p], [-p, -p, -p], [-p,  p, -p], [ p,  p, -p]]),
            (Vec3::X,     [[ p, -p,  p], [ p, -p, -p], [ p,  p, -p], [ p,  p,  p]]),
            (Vec3::NEG_X, [[-p, -p, -p], [-p, -p,  p], [-p,  p,  p], [-p,  p, -p]]),
            (Vec3::Y,     [[-p,  p,  p], [ p,  p,  p], [ p,  p, -p], [-p,  p, -p]]),
            (Vec3::NEG_Y, [[-p, -p, -p], [ p, -p, -p], [ p, -p,  p], [-p, -p,  p]]),
        ];
        let corners = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, quad) in faces {
            let base = vertices.len() as u32;
            for (pos, uv) in quad.iter().zip(corners) {
                vertices.push(MeshVertex::new(Vec3::from(*pos), normal, Vec2::from(uv)));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }
        let mut mesh = Self { vertices, indices };
        mesh.compute_tangents();
        mesh
    }

    /// Flip winding and normals so the inside of a closed mesh becomes its
    /// front side.
    pub fn inverted(mut self) -> Self {
        for tri in self.indices.chunks_exact_mut(3) {
            tri.swap(1, 2);
        }
        for v in &mut self.vertices {
            v.normal = (-Vec3::from(v.normal)).to_array();
        }
        self.compute_tangents();
        self
    }

    /// Uniformly scale all positions.
    pub fn scaled(mut self, factor: f32) -> Self {
        for v in &mut self.vertices {
            v.position = (Vec3::from(v.position) * factor).to_array();
        }
        self
    }

    /// Recompute per-vertex normals from face geometry (area weighted).
    pub fn compute_normals(&mut self) {
        let mut acc = vec![Vec3::ZERO; self.vertices.len()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            let pa = Vec3::from(self.vertices[a].position);
            let pb = Vec3::from(self.vertices[b].position);
            let pc = Vec3::from(self.vertices[c].position);
            let n = (pb - pa).cross(pc - pa);
            acc[a] += n;
            acc[b] += n;
            acc[c] += n;
        }
        for (v, n) in self.vertices.iter_mut().zip(acc) {
            v.normal = n.normalize_or_zero().to_array();
        }
    }

    /// Derive tangent frames from uv gradients, orthogonalized against the
    /// vertex normal.
    pub fn compute_tangents(&mut self) {
        let mut tangents = vec![Vec3::ZERO; self.vertices.len()];
        let mut bitangents = vec![Vec3::ZERO; self.vertices.len()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            let (va, vb, vc) = (&self.vertices[a], &self.vertices[b], &self.vertices[c]);
            let e1 = Vec3::from(vb.position) - Vec3::from(va.position);
            let e2 = Vec3::from(vc.position) - Vec3::from(va.position);
            let d1 = Vec2::from(vb.uv) - Vec2::from(va.uv);
            let d2 = Vec2::from(vc.uv) - Vec2::from(va.uv);
            let det = d1.x * d2.y - d2.x * d1.y;
            if det.abs() < 1e-12 {
                continue;
            }
            let r = 1.0 / det;
            let t = (e1 * d2.y - e2 * d1.y) * r;
            let bt = (e2 * d1.x - e1 * d2.x) * r;
            for i in [a, b, c] {
                tangents[i] += t;
                bitangents[i] += bt;
            }
        }

        for (i, v) in self.vertices.iter_mut().enumerate() {
            let n = Vec3::from(v.normal);
            let mut t = tangents[i] - n * n.dot(tangents[i]);
            if t.length_squared() < 1e-12 {
                t = n.any_orthonormal_vector();
            }
            let t = t.normalize();
            let mut b = n.cross(t);
            if b.dot(bitangents[i]) < 0.0 {
                b = -b;
            }
            v.tangent = t.to_array();
            v.bitangent = b.to_array();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_normal(mesh: &MeshData, tri: usize) -> (Vec3, Vec3) {
        let idx = &mesh.indices[tri * 3..tri * 3 + 3];
        let p: Vec<Vec3> = idx
            .iter()
            .map(|&i| Vec3::from(mesh.vertices[i as usize].position))
            .collect();
        let n = (p[1] - p[0]).cross(p[2] - p[0]);
        let centroid = (p[0] + p[1] + p[2]) / 3.0;
        (n, centroid)
    }

    fn assert_outward(mesh: &MeshData) {
        for tri in 0..mesh.triangle_count() {
            let (n, centroid) = face_normal(mesh, tri);
            if n.length_squared() < 1e-12 {
                continue;
            }
            assert!(n.dot(centroid) > 0.0, "triangle {tri} winds inward");
        }
    }

    #[test]
    fn icosphere_is_counter_clockwise_outward() {
        let mesh = MeshData::icosphere(1, 1.0);
        assert_eq!(mesh.triangle_count(), 80);
        assert!(mesh.validate().is_ok());
        assert_outward(&mesh);
    }

    #[test]
    fn uv_sphere_is_counter_clockwise_outward() {
        let mesh = MeshData::uv_sphere(12, 8, 2.0);
        assert!(mesh.validate().is_ok());
        assert_outward(&mesh);
        for v in &mesh.vertices {
            assert!((Vec3::from(v.position).length() - 2.0).abs() < 1e-4);
        }
    }

    #[test]
    fn cube_and_plane_wind_outward() {
        assert_outward(&MeshData::cube());
        let plane = MeshData::plane();
        let (n, _) = face_normal(&plane, 0);
        assert!(n.y > 0.0);
        let (n, _) = face_normal(&plane, 1);
        assert!(n.y > 0.0);
    }

    #[test]
    fn inverted_sphere_faces_inward() {
        let mesh = MeshData::uv_sphere(12, 8, 1.0).inverted();
        for tri in 0..mesh.triangle_count() {
            let (n, centroid) = face_normal(&mesh, tri);
            if n.length_squared() > 1e-12 {
                assert!(n.dot(centroid) < 0.0);
            }
        }
        assert!(Vec3::from(mesh.vertices[20].normal).dot(Vec3::from(mesh.vertices[20].position)) < 0.0);
    }

    #[test]
    fn tangent_frames_are_orthonormal() {
        let mesh = MeshData::plane();
        for v in &mesh.vertices {
            let n = Vec3::from(v.normal);
            let t = Vec3::from(v.tangent);
            let b = Vec3::from(v.bitangent);
            assert!((t.length() - 1.0).abs() < 1e-5);
            assert!(t.dot(n).abs() < 1e-5);
            assert!(b.dot(n).abs() < 1e-5);
        }
    }

    #[test]
    fn validate_rejects_out_of_range_index() {
        let mut mesh = MeshData::plane();
        mesh.indices.push(99);
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn compute_normals_matches_plane_facing() {
        let mut mesh = MeshData::plane();
        for v in &mut mesh.vertices {
            v.normal = [0.0; 3];
        }
        mesh.compute_normals();
        for v in &mesh.vertices {
            assert!((Vec3::from(v.normal) - Vec3::Y).length() < 1e-5);
        }
    }
}
