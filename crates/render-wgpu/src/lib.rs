//! wgpu backend for the orrery renderer.
//!
//! [`WgpuGpu`] implements the device seam of `orrery-render` on a wgpu
//! device, so the deferred pipeline runs unchanged on real hardware.
//! [`OrbitController`] turns mouse and keyboard input into orbit camera
//! motion.
//!
//! # Invariants
//! - Every program shares one bind group layout; unused slots get placeholders.
//! - A texture is never sampled by a draw that also writes it.
//! - Readback returns the same channel layout as the software backend.

mod camera;
mod gpu;
mod shaders;

pub use camera::{OrbitController, PanKey};
pub use gpu::{BackendError, WgpuGpu};

pub fn crate_info() -> &'static str {
    "orrery-render-wgpu v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_info_names_backend() {
        assert!(crate_info().contains("wgpu"));
    }
}
