//! Views, projections and cameras with lazily recomputed matrices.
//!
//! Every transformation caches its matrix in a [`CachedValue`]. Setters mark
//! the cache dirty; the matrix is rebuilt on the next read only.

use glam::{Mat4, Vec3};
use std::cell::Cell;

/// A derived value rebuilt on demand after its inputs change.
#[derive(Debug, Clone)]
pub struct CachedValue<T: Copy> {
    value: Cell<Option<T>>,
    recomputes: Cell<u64>,
}

impl<T: Copy> CachedValue<T> {
    pub fn new() -> Self {
        Self {
            value: Cell::new(None),
            recomputes: Cell::new(0),
        }
    }

    /// Return the cached value, running `compute` first if it is dirty.
    pub fn get_or_update(&self, compute: impl FnOnce() -> T) -> T {
        match self.value.get() {
            Some(v) => v,
            None => {
                let v = compute();
                self.value.set(Some(v));
                self.recomputes.set(self.recomputes.get() + 1);
                v
            }
        }
    }

    pub fn invalidate(&self) {
        self.value.set(None);
    }

    pub fn is_dirty(&self) -> bool {
        self.value.get().is_none()
    }

    /// How many times the value has been computed.
    pub fn recompute_count(&self) -> u64 {
        self.recomputes.get()
    }
}

impl<T: Copy> Default for CachedValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Anything that produces a transformation matrix.
pub trait Transformation {
    fn matrix(&self) -> Mat4;

    /// How many times the matrix has been rebuilt.
    fn recompute_count(&self) -> u64;
}

macro_rules! setter {
    ($field:ident, $set:ident, $ty:ty) => {
        pub fn $field(&self) -> $ty {
            self.$field
        }

        pub fn $set(&mut self, value: $ty) {
            if self.$field != value {
                self.$field = value;
                self.cache.invalidate();
            }
        }
    };
}

/// View orbiting `target` at `distance`; angles in degrees. Positive
/// elevation looks down on the target.
#[derive(Debug, Clone)]
pub struct OrbitView {
    distance: f32,
    azimuth: f32,
    elevation: f32,
    target: Vec3,
    cache: CachedValue<Mat4>,
}

impl OrbitView {
    pub fn new(distance: f32, azimuth: f32, elevation: f32, target: Vec3) -> Self {
        Self {
            distance,
            azimuth,
            elevation,
            target,
            cache: CachedValue::new(),
        }
    }

    setter!(distance, set_distance, f32);
    setter!(azimuth, set_azimuth, f32);
    setter!(elevation, set_elevation, f32);
    setter!(target, set_target, Vec3);
}

impl Transformation for OrbitView {
    fn matrix(&self) -> Mat4 {
        self.cache.get_or_update(|| {
            Mat4::from_translation(Vec3::new(0.0, 0.0, -self.distance))
                * Mat4::from_rotation_x(self.elevation.to_radians())
                * Mat4::from_rotation_y(self.azimuth.to_radians())
                * Mat4::from_translation(-self.target)
        })
    }

    fn recompute_count(&self) -> u64 {
        self.cache.recompute_count()
    }
}

/// View from a location with a fixed orientation; angles in degrees.
/// Azimuth 0 looks down -Z, 90 down +X; elevation -90 looks up.
#[derive(Debug, Clone)]
pub struct PositionView {
    location: Vec3,
    azimuth: f32,
    elevation: f32,
    cache: CachedValue<Mat4>,
}

impl PositionView {
    pub fn new(location: Vec3, azimuth: f32, elevation: f32) -> Self {
        Self {
            location,
            azimuth,
            elevation,
            cache: CachedValue::new(),
        }
    }

    setter!(location, set_location, Vec3);
    setter!(azimuth, set_azimuth, f32);
    setter!(elevation, set_elevation, f32);
}

impl Transformation for PositionView {
    fn matrix(&self) -> Mat4 {
        self.cache.get_or_update(|| {
            Mat4::from_rotation_x(self.elevation.to_radians())
                * Mat4::from_rotation_y(self.azimuth.to_radians())
                * Mat4::from_translation(-self.location)
        })
    }

    fn recompute_count(&self) -> u64 {
        self.cache.recompute_count()
    }
}

/// Perspective projection, vertical field of view in degrees, depth 0..1.
#[derive(Debug, Clone)]
pub struct Perspective {
    fov: f32,
    aspect: f32,
    near: f32,
    far: f32,
    cache: CachedValue<Mat4>,
}

impl Perspective {
    pub fn new(fov: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            fov,
            aspect,
            near,
            far,
            cache: CachedValue::new(),
        }
    }

    setter!(fov, set_fov, f32);
    setter!(aspect, set_aspect, f32);
    setter!(near, set_near, f32);
    setter!(far, set_far, f32);
}

impl Transformation for Perspective {
    fn matrix(&self) -> Mat4 {
        self.cache.get_or_update(|| {
            let near = self.near.max(f32::EPSILON);
            let far = self.far.max(near * 2.0);
            Mat4::perspective_rh(self.fov.to_radians(), self.aspect.max(f32::EPSILON), near, far)
        })
    }

    fn recompute_count(&self) -> u64 {
        self.cache.recompute_count()
    }
}

/// Orthographic projection of a `width` x `height` box centered on the view
/// axis.
#[derive(Debug, Clone)]
pub struct Orthographic {
    width: f32,
    height: f32,
    near: f32,
    far: f32,
    cache: CachedValue<Mat4>,
}

impl Orthographic {
    pub fn new(width: f32, height: f32, near: f32, far: f32) -> Self {
        Self {
            width,
            height,
            near,
            far,
            cache: CachedValue::new(),
        }
    }

    setter!(width, set_width, f32);
    setter!(height, set_height, f32);
    setter!(near, set_near, f32);
    setter!(far, set_far, f32);
}

impl Transformation for Orthographic {
    fn matrix(&self) -> Mat4 {
        self.cache.get_or_update(|| {
            let near = self.near.max(f32::EPSILON);
            let far = self.far.max(near + f32::EPSILON);
            let (hw, hh) = (self.width * 0.5, self.height * 0.5);
            Mat4::orthographic_rh(-hw, hw, -hh, hh, near, far)
        })
    }

    fn recompute_count(&self) -> u64 {
        self.cache.recompute_count()
    }
}

/// Projection times view, cached on its own.
///
/// The product is rebuilt only when the view or projection matrix was.
#[derive(Debug, Clone)]
pub struct Camera<V, P> {
    view: V,
    projection: P,
    cache: CachedValue<Mat4>,
    /// Recompute counts of view and projection at the last product.
    inputs: Cell<(u64, u64)>,
}

impl<V: Transformation, P: Transformation> Camera<V, P> {
    pub fn new(view: V, projection: P) -> Self {
        Self {
            view,
            projection,
            cache: CachedValue::new(),
            inputs: Cell::new((0, 0)),
        }
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    /// Mutable view. Setters that change a parameter cause one recompute
    /// of the combined matrix on the next read.
    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    pub fn projection_mut(&mut self) -> &mut P {
        &mut self.projection
    }

    pub fn position(&self) -> Vec3 {
        world_position(self.matrix())
    }
}

impl<V: Transformation, P: Transformation> Transformation for Camera<V, P> {
    fn matrix(&self) -> Mat4 {
        let view = self.view.matrix();
        let projection = self.projection.matrix();
        let inputs = (self.view.recompute_count(), self.projection.recompute_count());
        if self.inputs.replace(inputs) != inputs {
            self.cache.invalidate();
        }
        self.cache.get_or_update(|| projection * view)
    }

    fn recompute_count(&self) -> u64 {
        self.cache.recompute_count()
    }
}

/// Camera world position from the inverted camera matrix: the eye is the
/// point projected to clip w = 0, normalized by its homogeneous component.
pub fn world_position(camera: Mat4) -> Vec3 {
    let inverse = camera.inverse();
    let eye = inverse.z_axis;
    if eye.w.abs() > 1e-6 {
        return eye.truncate() / eye.w;
    }
    // Orthographic cameras have no eye point; use the near-plane center.
    let near = inverse.w_axis;
    near.truncate() / near.w
}

/// Orbit angles (degrees) that place an orbit camera on the side the light
/// comes from, looking along `direction`.
pub fn light_angles(direction: Vec3) -> (f32, f32) {
    let mut d = (-direction).normalize_or_zero();
    d.x = -d.x;
    let azimuth = d.x.atan2(d.z);
    let horizontal = Vec3::new(d.x, 0.0, d.z);
    let elevation = if horizontal.length_squared() <= 1e-12 {
        std::f32::consts::FRAC_PI_2
    } else {
        d.dot(horizontal.normalize()).clamp(-1.0, 1.0).acos()
    };
    let elevation = if d.y < 0.0 { -elevation } else { elevation };
    (azimuth.to_degrees(), elevation.to_degrees())
}

pub type OrbitCamera = Camera<OrbitView, Perspective>;
pub type LightCamera = Camera<OrbitView, Orthographic>;
pub type FaceCamera = Camera<PositionView, Perspective>;

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-3
    }

    #[test]
    fn reads_without_mutation_hit_the_cache() {
        let cam = Camera::new(
            OrbitView::new(10.0, 30.0, 20.0, Vec3::ZERO),
            Perspective::new(60.0, 1.5, 0.1, 100.0),
        );
        let a = cam.matrix();
        let b = cam.matrix();
        assert_eq!(a, b);
        assert_eq!(cam.recompute_count(), 1);
        assert_eq!(cam.view().recompute_count(), 1);
    }

    #[test]
    fn mutation_recomputes_exactly_once() {
        let mut view = OrbitView::new(10.0, 0.0, 0.0, Vec3::ZERO);
        view.matrix();
        view.set_azimuth(0.0);
        view.matrix();
        assert_eq!(view.recompute_count(), 1);
        view.set_azimuth(45.0);
        view.matrix();
        view.matrix();
        assert_eq!(view.recompute_count(), 2);

        let mut cam = Camera::new(view, Perspective::new(60.0, 1.0, 0.1, 100.0));
        cam.matrix();
        cam.view_mut().set_azimuth(45.0);
        cam.projection_mut().set_fov(60.0);
        cam.matrix();
        cam.matrix();
        assert_eq!(cam.recompute_count(), 1);

        cam.view_mut().set_elevation(10.0);
        cam.matrix();
        cam.matrix();
        assert_eq!(cam.recompute_count(), 2);
        assert_eq!(cam.view().recompute_count(), 3);

        cam.projection_mut().set_aspect(2.0);
        let expected = cam.projection().matrix() * cam.view().matrix();
        assert_eq!(cam.matrix(), expected);
        assert_eq!(cam.recompute_count(), 3);
    }

    #[test]
    fn orbit_camera_sits_above_target_for_positive_elevation() {
        let cam = Camera::new(
            OrbitView::new(10.0, 0.0, 30.0, Vec3::new(0.0, 1.0, 0.0)),
            Perspective::new(60.0, 1.0, 0.1, 100.0),
        );
        let p = cam.position();
        assert!(close(p, Vec3::new(0.0, 1.0 + 5.0, 8.660_254)));
    }

    #[test]
    fn position_view_faces() {
        let forward = |az: f32, el: f32| {
            let m = PositionView::new(Vec3::ZERO, az, el).matrix();
            m.inverse().transform_vector3(Vec3::NEG_Z)
        };
        assert!(close(forward(90.0, 0.0), Vec3::X));
        assert!(close(forward(-90.0, 0.0), Vec3::NEG_X));
        assert!(close(forward(180.0, -90.0), Vec3::Y));
        assert!(close(forward(180.0, 90.0), Vec3::NEG_Y));
        assert!(close(forward(180.0, 0.0), Vec3::Z));
        assert!(close(forward(0.0, 0.0), Vec3::NEG_Z));
    }

    #[test]
    fn position_view_camera_position() {
        let cam = Camera::new(
            PositionView::new(Vec3::new(3.0, 4.0, 5.0), 90.0, 0.0),
            Perspective::new(90.0, 1.0, 0.1, 1500.0),
        );
        assert!(close(cam.position(), Vec3::new(3.0, 4.0, 5.0)));
    }

    #[test]
    fn light_camera_looks_along_light() {
        for dir in [
            Vec3::new(0.0, -1.0, 0.0),
            Vec3::new(-1.0, -1.0, 0.6),
            Vec3::new(0.3, -0.5, -0.8),
        ] {
            let (az, el) = light_angles(dir);
            let view = OrbitView::new(50.0, az, el, Vec3::ZERO);
            let look = view.matrix().inverse().transform_vector3(Vec3::NEG_Z);
            assert!(close(look, dir.normalize()), "{dir} -> {look}");
        }
    }

    #[test]
    fn orthographic_clamps_degenerate_planes() {
        let ortho = Orthographic::new(10.0, 10.0, -5.0, -10.0);
        assert!(ortho.matrix().is_finite());
    }
}
