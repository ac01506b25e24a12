use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use orrery_common::{EntityType, ViewEntity};

/// Rotation about X, then Y, then Z (angles in radians).
pub fn euler_rotation(angles: Vec3) -> Mat4 {
    Mat4::from_rotation_z(angles.z) * Mat4::from_rotation_y(angles.y) * Mat4::from_rotation_x(angles.x)
}

/// A typed scene entity with a local placement and an optional extra
/// transformation applied after it (used for orbital motion).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityType,
    pub position: Vec3,
    /// Euler angles in radians.
    pub rotation: Vec3,
    pub scale: Vec3,
    pub additional: Mat4,
}

impl Entity {
    pub fn new(kind: EntityType, position: Vec3, rotation: Vec3, scale: Vec3) -> Self {
        Self {
            kind,
            position,
            rotation,
            scale,
            additional: Mat4::IDENTITY,
        }
    }

    pub fn uniform(kind: EntityType, position: Vec3, rotation: Vec3, scale: f32) -> Self {
        Self::new(kind, position, rotation, Vec3::splat(scale))
    }

    /// World transform: scale, then rotation, then translation, then the
    /// additional transformation.
    pub fn transformation(&self) -> Mat4 {
        self.additional
            * Mat4::from_translation(self.position)
            * euler_rotation(self.rotation)
            * Mat4::from_scale(self.scale)
    }

    pub fn view(&self) -> ViewEntity {
        ViewEntity::new(self.kind, self.transformation())
    }
}

/// Circular motion around a center, advancing a rotation vector by a
/// constant angular speed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orbit {
    pub radius: Vec3,
    pub speed: Vec3,
    pub center: Vec3,
    rotation: Vec3,
    self_rotated: bool,
}

impl Orbit {
    pub fn new(radius: Vec3, speed: Vec3, center: Vec3, initial_rotation: Vec3) -> Self {
        Self {
            radius,
            speed,
            center,
            rotation: initial_rotation,
            self_rotated: false,
        }
    }

    /// An orbit that cancels its own spin so the body keeps its facing.
    pub fn self_rotated(mut self) -> Self {
        self.self_rotated = true;
        self
    }

    pub fn rotation(&self) -> Vec3 {
        self.rotation
    }

    pub fn update(&mut self, dt: f32) {
        self.rotation += self.speed * dt;
    }

    pub fn transformation(&self) -> Mat4 {
        let orbit = Mat4::from_translation(self.center)
            * euler_rotation(self.rotation)
            * Mat4::from_translation(self.radius);
        if self.self_rotated {
            orbit * euler_rotation(-self.rotation)
        } else {
            orbit
        }
    }
}

/// The scene driven by the frame loop: a fixed set of entities, two of which
/// orbit the origin.
#[derive(Debug, Clone)]
pub struct SceneModel {
    entities: Vec<Entity>,
    orbits: Vec<(usize, Orbit)>,
    tick: u64,
    elapsed: f32,
}

impl Default for SceneModel {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneModel {
    /// Two planets orbiting in opposite phase above a ground plane, with the
    /// reflective maze body floating over the origin.
    pub fn new() -> Self {
        use std::f32::consts::PI;

        let tilt = Vec3::new(PI, PI / 2.0, PI / 30.0);
        let entities = vec![
            Entity::uniform(EntityType::Mercury, Vec3::new(5.0, 15.0, 0.0), tilt, 2.0),
            Entity::uniform(EntityType::Mars, Vec3::new(5.0, 15.0, 0.0), tilt, 3.0),
            Entity::uniform(EntityType::Maze, Vec3::new(0.0, 25.0, 0.0), Vec3::ZERO, 2.0),
            Entity::new(
                EntityType::Plane,
                Vec3::ZERO,
                Vec3::new(0.0, 0.5 * PI, 0.0),
                Vec3::new(201.0, 1.0, 201.0),
            ),
        ];
        let radius = Vec3::new(20.0, 20.0, 10.0);
        let speed = Vec3::new(0.0, 0.5, 0.0);
        let orbits = vec![
            (0, Orbit::new(radius, speed, Vec3::ZERO, Vec3::ZERO)),
            (1, Orbit::new(radius, speed, Vec3::ZERO, Vec3::new(0.0, PI, 0.0))),
        ];

        let mut model = Self {
            entities,
            orbits,
            tick: 0,
            elapsed: 0.0,
        };
        model.apply_orbits();
        tracing::debug!(entities = model.entities.len(), "scene model created");
        model
    }

    /// A model with caller-supplied entities and no motion.
    pub fn from_entities(entities: Vec<Entity>) -> Self {
        Self {
            entities,
            orbits: Vec::new(),
            tick: 0,
            elapsed: 0.0,
        }
    }

    /// Attach an orbit to the entity at `index`. Returns false if there is no
    /// such entity.
    pub fn add_orbit(&mut self, index: usize, orbit: Orbit) -> bool {
        if index >= self.entities.len() {
            return false;
        }
        self.orbits.push((index, orbit));
        self.apply_orbits();
        true
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Advance all orbits by `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        for (_, orbit) in &mut self.orbits {
            orbit.update(dt);
        }
        self.apply_orbits();
        self.tick += 1;
        self.elapsed += dt;
    }

    /// Snapshot of every entity's type and world transform.
    pub fn view_entities(&self) -> Vec<ViewEntity> {
        self.entities.iter().map(Entity::view).collect()
    }

    fn apply_orbits(&mut self) {
        for (index, orbit) in &self.orbits {
            if let Some(entity) = self.entities.get_mut(*index) {
                entity.additional = orbit.transformation();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_vec(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn entity_transform_applies_scale_before_translation() {
        let e = Entity::uniform(EntityType::Maze, Vec3::new(0.0, 25.0, 0.0), Vec3::ZERO, 2.0);
        let m = e.transformation();
        assert!(approx_vec(m.transform_point3(Vec3::X), Vec3::new(2.0, 25.0, 0.0)));
    }

    #[test]
    fn euler_rotation_order_is_x_then_y() {
        use std::f32::consts::FRAC_PI_2;
        // +Y turns to +Z about X, then to +X about Y.
        let r = euler_rotation(Vec3::new(FRAC_PI_2, FRAC_PI_2, 0.0));
        assert!(approx_vec(r.transform_vector3(Vec3::Y), Vec3::X));
    }

    #[test]
    fn orbit_moves_with_time() {
        let mut orbit = Orbit::new(Vec3::new(10.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0), Vec3::ZERO, Vec3::ZERO);
        let before = orbit.transformation().transform_point3(Vec3::ZERO);
        orbit.update(std::f32::consts::PI);
        let after = orbit.transformation().transform_point3(Vec3::ZERO);
        assert!(approx_vec(before, Vec3::new(10.0, 0.0, 0.0)));
        assert!(approx_vec(after, Vec3::new(-10.0, 0.0, 0.0)));
    }

    #[test]
    fn self_rotated_orbit_keeps_orientation() {
        let mut orbit = Orbit::new(Vec3::new(5.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0), Vec3::ZERO, Vec3::ZERO)
            .self_rotated();
        orbit.update(1.3);
        let m = orbit.transformation();
        assert!(approx_vec(m.transform_vector3(Vec3::X), Vec3::X));
    }

    #[test]
    fn default_scene_has_one_of_each_type() {
        let model = SceneModel::new();
        let views = model.view_entities();
        assert_eq!(views.len(), 4);
        for kind in EntityType::ALL {
            assert_eq!(views.iter().filter(|v| v.kind == kind).count(), 1);
        }
    }

    #[test]
    fn update_moves_orbiting_entities_only() {
        let mut model = SceneModel::new();
        let before = model.view_entities();
        model.update(0.5);
        let after = model.view_entities();
        assert_eq!(model.tick(), 1);
        assert_ne!(before[0].transform, after[0].transform);
        assert_ne!(before[1].transform, after[1].transform);
        assert_eq!(before[2].transform, after[2].transform);
        assert_eq!(before[3].transform, after[3].transform);
    }

    #[test]
    fn maze_floats_above_origin() {
        let model = SceneModel::new();
        let maze = model
            .view_entities()
            .into_iter()
            .find(|v| v.kind == EntityType::Maze)
            .map(|v| v.location());
        assert_eq!(maze, Some(Vec3::new(0.0, 25.0, 0.0)));
    }

    #[test]
    fn add_orbit_rejects_missing_entity() {
        let mut model = SceneModel::from_entities(vec![Entity::uniform(
            EntityType::Mars,
            Vec3::ZERO,
            Vec3::ZERO,
            1.0,
        )]);
        assert!(!model.add_orbit(3, Orbit::new(Vec3::X, Vec3::Y, Vec3::ZERO, Vec3::ZERO)));
        assert!(model.add_orbit(0, Orbit::new(Vec3::X, Vec3::Y, Vec3::ZERO, Vec3::ZERO)));
    }
}
