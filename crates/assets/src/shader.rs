/// How a program is driven: instanced mesh geometry or a full-screen
/// triangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Geometry,
    Filter,
}

/// WGSL body of a program. The shared bindings, vertex stages and uniform
/// block are supplied by the backend; the body provides `fs_main`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub name: String,
    pub kind: ShaderKind,
    pub wgsl: String,
}

/// Strip globs and extensions: `deferred.*` and `deferred.wgsl` both name
/// the program `deferred`.
pub fn program_stem(name: &str) -> &str {
    let file = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match file.find('.') {
        Some(dot) => &file[..dot],
        None => file,
    }
}

pub(crate) const BUILTIN_PROGRAMS: &[(&str, ShaderKind, &str)] = &[
    ("deferred", ShaderKind::Geometry, include_str!("../shaders/deferred.wgsl")),
    ("depth", ShaderKind::Geometry, include_str!("../shaders/depth.wgsl")),
    ("shadow", ShaderKind::Geometry, include_str!("../shaders/shadow.wgsl")),
    ("sky", ShaderKind::Geometry, include_str!("../shaders/sky.wgsl")),
    ("image_on_geometry", ShaderKind::Geometry, include_str!("../shaders/image_on_geometry.wgsl")),
    ("environment_map", ShaderKind::Geometry, include_str!("../shaders/environment_map.wgsl")),
    ("lighting", ShaderKind::Filter, include_str!("../shaders/lighting.wgsl")),
    ("addition", ShaderKind::Filter, include_str!("../shaders/addition.wgsl")),
    ("extract", ShaderKind::Filter, include_str!("../shaders/extract.wgsl")),
    ("blur_avg_pass1", ShaderKind::Filter, include_str!("../shaders/blur_avg_pass1.wgsl")),
    ("blur_avg_pass2", ShaderKind::Filter, include_str!("../shaders/blur_avg_pass2.wgsl")),
    ("blur_gauss_pass1", ShaderKind::Filter, include_str!("../shaders/blur_gauss_pass1.wgsl")),
    ("blur_gauss_pass2", ShaderKind::Filter, include_str!("../shaders/blur_gauss_pass2.wgsl")),
    ("ssao", ShaderKind::Filter, include_str!("../shaders/ssao.wgsl")),
    ("saturation_map", ShaderKind::Filter, include_str!("../shaders/saturation_map.wgsl")),
    ("texture_drawer", ShaderKind::Filter, include_str!("../shaders/texture_drawer.wgsl")),
];

pub(crate) fn builtin_program(stem: &str) -> Option<ShaderSource> {
    BUILTIN_PROGRAMS
        .iter()
        .find(|(name, _, _)| *name == stem)
        .map(|(name, kind, wgsl)| ShaderSource {
            name: name.to_string(),
            kind: *kind,
            wgsl: wgsl.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_strips_globs_and_extensions() {
        assert_eq!(program_stem("deferred.*"), "deferred");
        assert_eq!(program_stem("lighting.wgsl"), "lighting");
        assert_eq!(program_stem("shaders/sky.wgsl"), "sky");
        assert_eq!(program_stem("ssao"), "ssao");
    }

    #[test]
    fn every_builtin_defines_a_fragment_entry() {
        for (name, _, wgsl) in BUILTIN_PROGRAMS {
            assert!(wgsl.contains("fn fs_main"), "{name} has no fs_main");
        }
    }

    #[test]
    fn builtin_lookup_keeps_kind() {
        assert_eq!(builtin_program("deferred").map(|s| s.kind), Some(ShaderKind::Geometry));
        assert_eq!(builtin_program("ssao").map(|s| s.kind), Some(ShaderKind::Filter));
        assert!(builtin_program("missing").is_none());
    }
}
