//! Shared vocabulary between the entity model, the content layer and the
//! renderer.
//!
//! # Invariants
//! - The set of entity types is closed; per-type storage is indexed by
//!   [`EntityType::index`].
//! - A [`ViewEntity`] is a read-only snapshot; the renderer never writes back.

mod types;

pub use types::{EntityType, LightSource, ViewEntity};

pub fn crate_info() -> &'static str {
    "orrery-common v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("common"));
    }
}
