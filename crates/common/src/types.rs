use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a scene entity. Entities of one kind share a mesh and material
/// and are drawn together as one instance batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Maze,
    Plane,
    Mercury,
    Mars,
}

impl EntityType {
    /// Number of entity types.
    pub const COUNT: usize = 4;

    /// All entity types in index order.
    pub const ALL: [EntityType; Self::COUNT] = [
        EntityType::Maze,
        EntityType::Plane,
        EntityType::Mercury,
        EntityType::Mars,
    ];

    /// Dense index usable for per-type arrays.
    pub fn index(self) -> usize {
        match self {
            EntityType::Maze => 0,
            EntityType::Plane => 1,
            EntityType::Mercury => 2,
            EntityType::Mars => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EntityType::Maze => "maze",
            EntityType::Plane => "plane",
            EntityType::Mercury => "mercury",
            EntityType::Mars => "mars",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One element of the per-tick entity snapshot: a type tag and a world
/// transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewEntity {
    pub kind: EntityType,
    pub transform: Mat4,
}

impl ViewEntity {
    pub fn new(kind: EntityType, transform: Mat4) -> Self {
        Self { kind, transform }
    }

    /// World-space location of the entity origin.
    pub fn location(&self) -> Vec3 {
        self.transform.w_axis.truncate()
    }
}

/// A directional light with an optional position (used for specular only).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightSource {
    pub position: Vec3,
    pub direction: Vec3,
    pub color: Vec3,
}

impl LightSource {
    /// A light that contributes nothing. Used to fill unused shader slots.
    pub const NEUTRAL: LightSource = LightSource {
        position: Vec3::ZERO,
        direction: Vec3::ZERO,
        color: Vec3::ZERO,
    };

    pub fn directional(direction: Vec3, color: Vec3) -> Self {
        Self {
            position: Vec3::ZERO,
            direction: direction.normalize_or_zero(),
            color,
        }
    }
}

impl Default for LightSource {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_indices_are_dense() {
        for (i, kind) in EntityType::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn entity_type_display_matches_name() {
        assert_eq!(EntityType::Mercury.to_string(), "mercury");
        assert_eq!(EntityType::Plane.name(), "plane");
    }

    #[test]
    fn view_entity_location_reads_translation() {
        let e = ViewEntity::new(
            EntityType::Maze,
            Mat4::from_translation(Vec3::new(0.0, 25.0, 0.0)),
        );
        assert_eq!(e.location(), Vec3::new(0.0, 25.0, 0.0));
    }

    #[test]
    fn directional_light_is_normalized() {
        let l = LightSource::directional(Vec3::new(0.0, -2.0, 0.0), Vec3::ONE);
        assert!((l.direction.length() - 1.0).abs() < 1e-6);
        assert_eq!(LightSource::default(), LightSource::NEUTRAL);
    }
}
