//! Content provider for the renderer: meshes, textures and shader programs.
//!
//! Passes never touch the file system. They ask a [`ContentProvider`] for
//! named content at construction time and treat any failure as fatal.
//!
//! # Layout
//! [`AssetStore`] answers from in-memory registrations first, then from an
//! optional root directory (`meshes/`, `textures/`, `shaders/`).

mod error;
mod mesh;
mod obj;
mod shader;
mod store;
mod texture;

pub use error::AssetError;
pub use mesh::{MeshData, MeshVertex};
pub use obj::parse_obj;
pub use shader::{ShaderKind, ShaderSource, program_stem};
pub use store::AssetStore;
pub use texture::{ImageData, SKY_FACE_SUFFIXES};

/// Source of named content. Every method fails with [`AssetError::NotFound`]
/// when the name is unknown.
pub trait ContentProvider {
    fn load_mesh(&self, name: &str) -> Result<MeshData, AssetError>;

    fn load_texture(&self, name: &str) -> Result<ImageData, AssetError>;

    /// Geometry program. Accepts a bare name, a file name (`lighting.wgsl`)
    /// or a glob (`deferred.*`).
    fn load_shader_program(&self, name: &str) -> Result<ShaderSource, AssetError>;

    /// Full-screen filter program (fragment stage only).
    fn load_filter_shader(&self, name: &str) -> Result<ShaderSource, AssetError>;
}

pub fn crate_info() -> &'static str {
    "orrery-assets v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("assets"));
    }
}
