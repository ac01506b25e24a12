//! Entity model: typed entities with orbital motion.
//!
//! # Invariants
//! - Model stepping is pure with respect to the elapsed time it is given.
//! - The renderer only ever sees [`orrery_common::ViewEntity`] snapshots.

pub mod model;

pub use model::{Entity, Orbit, SceneModel, euler_rotation};

pub fn crate_info() -> &'static str {
    "orrery-scene v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("scene"));
    }
}
