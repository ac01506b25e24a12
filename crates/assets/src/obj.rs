use crate::{AssetError, MeshData, MeshVertex};
use glam::{Vec2, Vec3};
use std::collections::HashMap;

type Corner = (usize, Option<usize>, Option<usize>);

/// Parse Wavefront OBJ text into an indexed mesh.
///
/// Supports `v`, `vt`, `vn` and polygonal `f` records (fan triangulated),
/// including negative (relative) indices. Other records are ignored. Missing
/// normals are generated from face geometry.
pub fn parse_obj(source: &str) -> Result<MeshData, AssetError> {
    let mut positions: Vec<Vec3> = Vec::new();
    let mut normals: Vec<Vec3> = Vec::new();
    let mut uvs: Vec<Vec2> = Vec::new();
    let mut mesh = MeshData::default();
    let mut lookup: HashMap<Corner, u32> = HashMap::new();
    let mut has_normals = true;

    for (number, raw) in source.lines().enumerate() {
        let line = number + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        let mut parts = text.split_whitespace();
        let Some(tag) = parts.next() else {
            continue;
        };
        let fields: Vec<&str> = parts.collect();

        match tag {
            "v" => positions.push(Vec3::from(parse_floats::<3>(&fields, line)?)),
            "vn" => normals.push(Vec3::from(parse_floats::<3>(&fields, line)?)),
            "vt" => {
                let [u, v] = parse_floats::<2>(&fields, line)?;
                uvs.push(Vec2::new(u, 1.0 - v));
            }
            "f" => {
                if fields.len() < 3 {
                    return Err(obj_error(line, "face needs at least three corners"));
                }
                let mut corners = Vec::with_capacity(fields.len());
                for field in &fields {
                    let corner = parse_corner(field, positions.len(), uvs.len(), normals.len(), line)?;
                    has_normals &= corner.2.is_some();
                    let index = *lookup.entry(corner).or_insert_with(|| {
                        let (p, t, n) = corner;
                        mesh.vertices.push(MeshVertex::new(
                            positions[p],
                            n.map(|i| normals[i]).unwrap_or(Vec3::ZERO),
                            t.map(|i| uvs[i]).unwrap_or(Vec2::ZERO),
                        ));
                        mesh.vertices.len() as u32 - 1
                    });
                    corners.push(index);
                }
                for i in 1..corners.len() - 1 {
                    mesh.indices.extend_from_slice(&[corners[0], corners[i], corners[i + 1]]);
                }
            }
            _ => {}
        }
    }

    if mesh.is_empty() {
        return Err(obj_error(0, "no faces"));
    }
    if !has_normals {
        mesh.compute_normals();
    }
    mesh.compute_tangents();
    tracing::debug!(
        vertices = mesh.vertices.len(),
        triangles = mesh.triangle_count(),
        "parsed OBJ mesh"
    );
    Ok(mesh)
}

fn obj_error(line: usize, message: impl Into<String>) -> AssetError {
    AssetError::ObjParse {
        line,
        message: message.into(),
    }
}

fn parse_floats<const N: usize>(fields: &[&str], line: usize) -> Result<[f32; N], AssetError> {
    if fields.len() < N {
        return Err(obj_error(line, format!("expected {N} numbers")));
    }
    let mut out = [0.0; N];
    for (slot, field) in out.iter_mut().zip(fields) {
        *slot = field
            .parse()
            .map_err(|_| obj_error(line, format!("invalid number '{field}'")))?;
    }
    Ok(out)
}

fn resolve(raw: &str, len: usize, line: usize) -> Result<usize, AssetError> {
    let value: i64 = raw
        .parse()
        .map_err(|_| obj_error(line, format!("invalid index '{raw}'")))?;
    let index = match value {
        v if v > 0 => v - 1,
        v if v < 0 => len as i64 + v,
        _ => return Err(obj_error(line, "index 0 is not valid")),
    };
    if index < 0 || index as usize >= len {
        return Err(obj_error(line, format!("index {value} out of range")));
    }
    Ok(index as usize)
}

fn parse_corner(
    field: &str,
    positions: usize,
    uvs: usize,
    normals: usize,
    line: usize,
) -> Result<Corner, AssetError> {
    let mut refs = field.split('/');
    let p = resolve(refs.next().unwrap_or(""), positions, line)?;
    let t = match refs.next() {
        Some(raw) if !raw.is_empty() => Some(resolve(raw, uvs, line)?),
        _ => None,
    };
    let n = match refs.next() {
        Some(raw) if !raw.is_empty() => Some(resolve(raw, normals, line)?),
        _ => None,
    };
    Ok((p, t, n))
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD: &str = "\
# unit quad
v -1 0 -1
v -1 0 1
v 1 0 1
v 1 0 -1
vt 0 1
vt 0 0
vt 1 0
vt 1 1
vn 0 1 0
f 1/1/1 2/2/1 3/3/1 4/4/1
";

    #[test]
    fn quad_is_fan_triangulated() {
        let mesh = parse_obj(QUAD).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(mesh.vertices[0].normal, [0.0, 1.0, 0.0]);
        // v is flipped so images read top-down
        assert_eq!(mesh.vertices[1].uv, [0.0, 1.0]);
    }

    #[test]
    fn negative_indices_are_relative() {
        let src = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n";
        let mesh = parse_obj(src).unwrap();
        assert_eq!(mesh.triangle_count(), 1);
        // normals generated from winding: +Z
        assert!((Vec3::from(mesh.vertices[0].normal) - Vec3::Z).length() < 1e-5);
    }

    #[test]
    fn shared_corners_are_deduplicated() {
        let src = "v 0 0 0\nv 1 0 0\nv 0 1 0\nv 1 1 0\nf 1 2 3\nf 3 2 4\n";
        let mesh = parse_obj(src).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.triangle_count(), 2);
    }

    #[test]
    fn out_of_range_index_reports_line() {
        let err = parse_obj("v 0 0 0\nf 1 2 3\n").unwrap_err();
        assert!(matches!(err, AssetError::ObjParse { line: 2, .. }));
    }

    #[test]
    fn bad_number_is_rejected() {
        let err = parse_obj("v 0 zero 0\n").unwrap_err();
        assert!(matches!(err, AssetError::ObjParse { line: 1, .. }));
    }

    #[test]
    fn empty_source_has_no_faces() {
        assert!(parse_obj("# nothing\n").is_err());
    }
}
