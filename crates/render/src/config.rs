//! Renderer configuration. Every field has a default reproducing the
//! reference scene, so a config file only lists what it changes.

use glam::Vec3;
use orrery_common::{EntityType, LightSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Ambient term of the main lighting pass.
    pub ambient: f32,
    pub hemisphere_top: Vec3,
    pub hemisphere_bottom: Vec3,
    /// Linear depth written where there is no geometry.
    pub depth_sentinel: f32,
    pub lights: Vec<LightSource>,
    pub materials: Materials,
    pub shadow: ShadowConfig,
    pub reflection: ReflectionConfig,
    pub skybox: SkyboxConfig,
    pub sphere_cut_radius: f32,
    pub bloom: BloomConfig,
    pub ssao: SsaoConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            ambient: 0.7,
            hemisphere_top: Vec3::ZERO,
            hemisphere_bottom: Vec3::new(41.0, 49.0, 51.0) / 255.0,
            depth_sentinel: 1000.0,
            lights: vec![LightSource::directional(
                Vec3::new(-1.0, -1.0, 0.6).normalize(),
                Vec3::new(1.0, 0.77, 0.56),
            )],
            materials: Materials::default(),
            shadow: ShadowConfig::default(),
            reflection: ReflectionConfig::default(),
            skybox: SkyboxConfig {
                name: "space".into(),
                size: 100.0,
                mip_level: 0.0,
            },
            sphere_cut_radius: 100.0,
            bloom: BloomConfig::default(),
            ssao: SsaoConfig::default(),
        }
    }
}

impl RendererConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a `.json` file as JSON and anything else as YAML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text)?,
            _ => Self::from_yaml_str(&text)?,
        };
        tracing::info!(path = %path.display(), lights = config.lights.len(), "loaded renderer config");
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject values no pass can work with. The light count is checked by the
    /// lighting pass itself.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("shadow.resolution_scale", self.shadow.resolution_scale as f32),
            ("shadow.extent", self.shadow.extent),
            ("reflection.face_size", self.reflection.face_size as f32),
            ("bloom.kernel", self.bloom.kernel),
            ("ssao.blur_kernel", self.ssao.blur_kernel),
            ("depth_sentinel", self.depth_sentinel),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if self.shadow.far <= self.shadow.near {
            return Err(ConfigError::Invalid("shadow.far must exceed shadow.near".into()));
        }
        Ok(())
    }
}

/// How one entity type is drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialConfig {
    pub mesh: String,
    pub diffuse: Option<String>,
    pub normal_map: Option<String>,
    /// Used when there is no diffuse texture.
    pub color: Vec3,
    pub disable_culling: bool,
}

impl Default for MaterialConfig {
    fn default() -> Self {
        Self {
            mesh: "icosphere".into(),
            diffuse: None,
            normal_map: None,
            color: Vec3::splat(0.8),
            disable_culling: false,
        }
    }
}

impl MaterialConfig {
    fn textured(mesh: &str, diffuse: &str) -> Self {
        Self {
            mesh: mesh.into(),
            diffuse: Some(diffuse.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Materials {
    pub maze: MaterialConfig,
    pub plane: MaterialConfig,
    pub mercury: MaterialConfig,
    pub mars: MaterialConfig,
}

impl Default for Materials {
    fn default() -> Self {
        Self {
            maze: MaterialConfig {
                mesh: "uv_sphere".into(),
                color: Vec3::splat(0.83),
                ..MaterialConfig::default()
            },
            plane: MaterialConfig::textured("plane", "haumea"),
            mercury: MaterialConfig {
                disable_culling: true,
                ..MaterialConfig::textured("icosphere", "mercury")
            },
            mars: MaterialConfig {
                disable_culling: true,
                ..MaterialConfig::textured("icosphere", "mars")
            },
        }
    }
}

impl Materials {
    pub fn get(&self, kind: EntityType) -> &MaterialConfig {
        match kind {
            EntityType::Maze => &self.maze,
            EntityType::Plane => &self.plane,
            EntityType::Mercury => &self.mercury,
            EntityType::Mars => &self.mars,
        }
    }

    pub fn get_mut(&mut self, kind: EntityType) -> &mut MaterialConfig {
        match kind {
            EntityType::Maze => &mut self.maze,
            EntityType::Plane => &mut self.plane,
            EntityType::Mercury => &mut self.mercury,
            EntityType::Mars => &mut self.mars,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Light depth map size relative to the screen, per axis.
    pub resolution_scale: u32,
    /// Width and height of the light's orthographic box.
    pub extent: f32,
    /// Distance of the light camera from `center`.
    pub distance: f32,
    pub center: Vec3,
    pub near: f32,
    pub far: f32,
    pub bias: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            resolution_scale: 4,
            extent: 150.0,
            distance: 50.0,
            center: Vec3::ZERO,
            near: 0.1,
            far: 150.0,
            bias: 0.005,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionConfig {
    pub enabled: bool,
    /// Entity type whose first instance gets a reflection.
    pub reflective: EntityType,
    /// Upper bound of the cube face size; faces never exceed the screen.
    pub face_size: u32,
    pub ambient: f32,
    pub sky: SkyboxConfig,
    /// Weight of the reflection added over the scene color.
    pub mix: f32,
    /// Cube mip sampled by the reflector.
    pub mip_level: f32,
    pub near: f32,
    pub far: f32,
    /// Depth slack when testing the reflector against the scene.
    pub depth_bias: f32,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reflective: EntityType::Maze,
            face_size: 256,
            ambient: 0.1,
            sky: SkyboxConfig {
                name: "violentdays".into(),
                size: 245.0,
                mip_level: 2.0,
            },
            mix: 0.5,
            mip_level: 0.0,
            near: 0.1,
            far: 1500.0,
            depth_bias: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkyboxConfig {
    /// Face images are `{name}_ft`, `{name}_bk`, ... .
    pub name: String,
    /// Radius of the sky sphere.
    pub size: f32,
    pub mip_level: f32,
}

impl Default for SkyboxConfig {
    fn default() -> Self {
        Self {
            name: "space".into(),
            size: 100.0,
            mip_level: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomConfig {
    pub enabled: bool,
    pub threshold: f32,
    pub kernel: f32,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.7,
            kernel: 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlurKind {
    #[default]
    Avg,
    Gauss,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsaoConfig {
    /// Sample radius in pixels.
    pub radius: f32,
    pub strength: f32,
    /// Depth difference below which a sample does not occlude.
    pub bias: f32,
    /// Depth difference above which a sample does not occlude.
    pub range: f32,
    pub blur_kernel: f32,
    pub blur: BlurKind,
}

impl Default for SsaoConfig {
    fn default() -> Self {
        Self {
            radius: 8.0,
            strength: 1.0,
            bias: 0.05,
            range: 2.0,
            blur_kernel: 15.0,
            blur: BlurKind::Avg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_scene() {
        let config = RendererConfig::default();
        assert_eq!(config.lights.len(), 1);
        assert_eq!(config.shadow.resolution_scale, 4);
        assert_eq!(config.reflection.reflective, EntityType::Maze);
        assert_eq!(config.reflection.sky.name, "violentdays");
        assert_eq!(config.skybox.name, "space");
        assert!(config.materials.get(EntityType::Mars).disable_culling);
        assert!(!config.materials.get(EntityType::Plane).disable_culling);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = RendererConfig::from_yaml_str(
            "ambient: 0.5\nbloom:\n  enabled: false\nssao:\n  blur: gauss\n",
        )
        .unwrap();
        assert_eq!(config.ambient, 0.5);
        assert!(!config.bloom.enabled);
        assert_eq!(config.bloom.threshold, 0.7);
        assert_eq!(config.ssao.blur, BlurKind::Gauss);
        assert_eq!(config.materials, Materials::default());
    }

    #[test]
    fn yaml_round_trips() {
        let config = RendererConfig::default();
        let text = config.to_yaml().unwrap();
        assert_eq!(RendererConfig::from_yaml_str(&text).unwrap(), config);
    }

    #[test]
    fn json_is_accepted() {
        let config = RendererConfig::from_json_str(r#"{"sphere_cut_radius": 42.0}"#).unwrap();
        assert_eq!(config.sphere_cut_radius, 42.0);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            RendererConfig::from_yaml_str("shadow:\n  resolution_scale: 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RendererConfig::from_yaml_str("ambient: [1, 2"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn load_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("renderer.yaml");
        std::fs::write(&yaml, "depth_sentinel: 500\n").unwrap();
        assert_eq!(RendererConfig::load(&yaml).unwrap().depth_sentinel, 500.0);

        let json = dir.path().join("renderer.json");
        std::fs::write(&json, r#"{"depth_sentinel": 250}"#).unwrap();
        assert_eq!(RendererConfig::load(&json).unwrap().depth_sentinel, 250.0);

        assert!(matches!(
            RendererConfig::load(&dir.path().join("missing.yaml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
