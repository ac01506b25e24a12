use crate::shader::{BUILTIN_PROGRAMS, builtin_program};
use crate::{
    AssetError, ContentProvider, ImageData, MeshData, SKY_FACE_SUFFIXES, ShaderKind, ShaderSource,
    parse_obj, program_stem,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Named content store backed by memory and, optionally, a directory.
#[derive(Debug, Clone, Default)]
pub struct AssetStore {
    root: Option<PathBuf>,
    meshes: BTreeMap<String, MeshData>,
    textures: BTreeMap<String, ImageData>,
    programs: BTreeMap<String, ShaderSource>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store with the procedural meshes and textures and every built-in
    /// program registered.
    pub fn with_builtins() -> Self {
        let mut store = Self::new();
        store.register_builtins();
        store
    }

    /// Also look for content under `root` when a name is not registered.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn register_mesh(&mut self, name: impl Into<String>, mesh: MeshData) {
        self.meshes.insert(name.into(), mesh);
    }

    pub fn register_texture(&mut self, name: impl Into<String>, image: ImageData) {
        self.textures.insert(name.into(), image);
    }

    /// Register one image per sky face under `{name}{suffix}`.
    pub fn register_sky(&mut self, name: &str, mut face: impl FnMut(usize) -> ImageData) {
        for (i, suffix) in SKY_FACE_SUFFIXES.iter().enumerate() {
            self.register_texture(format!("{name}{suffix}"), face(i));
        }
    }

    pub fn register_program(&mut self, source: ShaderSource) {
        self.programs.insert(source.name.clone(), source);
    }

    pub fn mesh_names(&self) -> impl Iterator<Item = &str> {
        self.meshes.keys().map(String::as_str)
    }

    pub fn texture_names(&self) -> impl Iterator<Item = &str> {
        self.textures.keys().map(String::as_str)
    }

    pub fn program_names(&self) -> impl Iterator<Item = &str> {
        self.programs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.meshes.len() + self.textures.len() + self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn register_builtins(&mut self) {
        self.register_mesh("icosphere", MeshData::icosphere(2, 1.0));
        self.register_mesh("uv_sphere", MeshData::uv_sphere(48, 24, 1.0));
        self.register_mesh("plane", MeshData::plane());
        self.register_mesh("cube", MeshData::cube());

        self.register_texture(
            "mercury",
            ImageData::noise(64, 11, 6.0, [70, 66, 62, 255], [190, 182, 170, 255]),
        );
        self.register_texture(
            "mars",
            ImageData::noise(64, 23, 5.0, [120, 40, 18, 255], [220, 120, 70, 255]),
        );
        self.register_texture(
            "haumea",
            ImageData::checker(64, 8, [92, 96, 104, 255], [150, 154, 160, 255]),
        );
        self.register_texture("flat_normal", ImageData::solid(1, 1, [128, 128, 255, 255]));

        self.register_sky("space", |face| ImageData::starfield(64, 101 + face as u64));
        self.register_sky("violentdays", |face| match face {
            2 => ImageData::gradient(64, 64, [255, 214, 150, 255], [250, 170, 110, 255]),
            3 => ImageData::solid(64, 64, [40, 22, 48, 255]),
            _ => ImageData::gradient(64, 64, [250, 170, 110, 255], [60, 30, 70, 255]),
        });

        for (name, _, _) in BUILTIN_PROGRAMS {
            if let Some(source) = builtin_program(name) {
                self.register_program(source);
            }
        }
        tracing::debug!(entries = self.len(), "registered built-in content");
    }

    fn read_file(path: &Path) -> Result<Vec<u8>, AssetError> {
        std::fs::read(path).map_err(|source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn find_file(&self, dir: &str, name: &str, extensions: &[&str]) -> Option<PathBuf> {
        let base = self.root.as_ref()?.join(dir);
        let direct = base.join(name);
        if Path::new(name).extension().is_some() && direct.is_file() {
            return Some(direct);
        }
        extensions
            .iter()
            .map(|ext| base.join(format!("{name}.{ext}")))
            .find(|p| p.is_file())
    }

    fn load_program(&self, name: &str, kind: ShaderKind) -> Result<ShaderSource, AssetError> {
        let stem = program_stem(name);
        let source = match self.programs.get(stem) {
            Some(source) => source.clone(),
            None => {
                let path = self
                    .find_file("shaders", stem, &["wgsl"])
                    .ok_or_else(|| AssetError::not_found("program", name))?;
                let bytes = Self::read_file(&path)?;
                let wgsl = String::from_utf8(bytes).map_err(|e| AssetError::Invalid {
                    kind: "program",
                    name: name.to_string(),
                    message: e.to_string(),
                })?;
                ShaderSource {
                    name: stem.to_string(),
                    kind,
                    wgsl,
                }
            }
        };
        if source.kind != kind {
            return Err(AssetError::Invalid {
                kind: "program",
                name: name.to_string(),
                message: format!("expected a {kind:?} program, found {:?}", source.kind),
            });
        }
        Ok(source)
    }
}

impl ContentProvider for AssetStore {
    fn load_mesh(&self, name: &str) -> Result<MeshData, AssetError> {
        if let Some(mesh) = self.meshes.get(name) {
            return Ok(mesh.clone());
        }
        let path = self
            .find_file("meshes", name, &["obj"])
            .ok_or_else(|| AssetError::not_found("mesh", name))?;
        let bytes = Self::read_file(&path)?;
        let text = String::from_utf8_lossy(&bytes);
        let mesh = parse_obj(&text)?;
        tracing::info!(name, path = %path.display(), "loaded mesh");
        Ok(mesh)
    }

    fn load_texture(&self, name: &str) -> Result<ImageData, AssetError> {
        if let Some(image) = self.textures.get(name) {
            return Ok(image.clone());
        }
        let path = self
            .find_file("textures", name, &["png", "jpg", "jpeg"])
            .ok_or_else(|| AssetError::not_found("texture", name))?;
        let image = ImageData::decode(&Self::read_file(&path)?)?;
        tracing::info!(name, width = image.width, height = image.height, "loaded texture");
        Ok(image)
    }

    fn load_shader_program(&self, name: &str) -> Result<ShaderSource, AssetError> {
        self.load_program(name, ShaderKind::Geometry)
    }

    fn load_filter_shader(&self, name: &str) -> Result<ShaderSource, AssetError> {
        self.load_program(name, ShaderKind::Filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_sky_faces_and_programs() {
        let store = AssetStore::with_builtins();
        for suffix in SKY_FACE_SUFFIXES {
            assert!(store.load_texture(&format!("space{suffix}")).is_ok());
            assert!(store.load_texture(&format!("violentdays{suffix}")).is_ok());
        }
        assert!(store.load_shader_program("deferred.*").is_ok());
        assert!(store.load_filter_shader("lighting.wgsl").is_ok());
        assert!(store.load_mesh("icosphere").is_ok());
    }

    #[test]
    fn missing_content_is_not_found() {
        let store = AssetStore::new();
        assert!(matches!(
            store.load_mesh("nothing"),
            Err(AssetError::NotFound { kind: "mesh", .. })
        ));
        assert!(matches!(
            store.load_texture("nothing"),
            Err(AssetError::NotFound { kind: "texture", .. })
        ));
        assert!(store.load_filter_shader("nothing").is_err());
    }

    #[test]
    fn program_kind_must_match() {
        let store = AssetStore::with_builtins();
        assert!(matches!(
            store.load_filter_shader("deferred"),
            Err(AssetError::Invalid { .. })
        ));
    }

    #[test]
    fn registrations_override_builtins() {
        let mut store = AssetStore::with_builtins();
        store.register_texture("mars", ImageData::solid(1, 1, [1, 2, 3, 255]));
        assert_eq!(store.load_texture("mars").unwrap().pixel(0, 0), [1, 2, 3, 255]);
    }

    #[test]
    fn loads_from_root_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("meshes")).unwrap();
        std::fs::create_dir_all(dir.path().join("shaders")).unwrap();
        std::fs::create_dir_all(dir.path().join("textures")).unwrap();
        std::fs::write(
            dir.path().join("meshes/tri.obj"),
            "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("shaders/tint.wgsl"),
            "@fragment\nfn fs_main(in: ScreenOut) -> @location(0) vec4<f32> { return vec4<f32>(1.0); }\n",
        )
        .unwrap();
        image::RgbaImage::from_pixel(3, 2, image::Rgba([9, 8, 7, 255]))
            .save(dir.path().join("textures/dot.png"))
            .unwrap();

        let store = AssetStore::new().with_root(dir.path());
        assert_eq!(store.load_mesh("tri").unwrap().triangle_count(), 1);
        assert_eq!(store.load_mesh("tri.obj").unwrap().triangle_count(), 1);
        let tint = store.load_filter_shader("tint.*").unwrap();
        assert_eq!(tint.name, "tint");
        assert_eq!(tint.kind, ShaderKind::Filter);
        let dot = store.load_texture("dot").unwrap();
        assert_eq!((dot.width, dot.height), (3, 2));
    }

    #[test]
    fn broken_obj_on_disk_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("meshes")).unwrap();
        std::fs::write(dir.path().join("meshes/bad.obj"), "f 1 2 3\n").unwrap();
        let store = AssetStore::new().with_root(dir.path());
        assert!(matches!(store.load_mesh("bad"), Err(AssetError::ObjParse { .. })));
    }
}
