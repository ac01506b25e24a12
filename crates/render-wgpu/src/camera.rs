use glam::{Vec2, Vec3};
use orrery_render::OrbitView;

/// Keys that slide the orbit target over the ground plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanKey {
    Forward,
    Backward,
    Left,
    Right,
}

/// Mouse and keyboard control of an [`OrbitView`]: drag to rotate, scroll
/// to zoom, pan keys to move the target. Camera motion lives outside the
/// scene model and is never fed back into it.
#[derive(Debug, Clone)]
pub struct OrbitController {
    /// Degrees per pixel of drag.
    pub rotate_speed: f32,
    /// Fraction of the distance per scroll line.
    pub zoom_speed: f32,
    /// World units per second.
    pub pan_speed: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    dragging: bool,
    cursor: Option<Vec2>,
    held: [bool; 4],
}

impl Default for OrbitController {
    fn default() -> Self {
        Self {
            rotate_speed: 0.3,
            zoom_speed: 0.1,
            pan_speed: 20.0,
            min_distance: 2.0,
            max_distance: 400.0,
            dragging: false,
            cursor: None,
            held: [false; 4],
        }
    }
}

impl OrbitController {
    pub fn set_dragging(&mut self, dragging: bool) {
        self.dragging = dragging;
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub fn cursor_moved(&mut self, position: Vec2, view: &mut OrbitView) {
        if let (true, Some(last)) = (self.dragging, self.cursor) {
            let delta = position - last;
            view.set_azimuth((view.azimuth() + delta.x * self.rotate_speed).rem_euclid(360.0));
            view.set_elevation((view.elevation() + delta.y * self.rotate_speed).clamp(-89.0, 89.0));
        }
        self.cursor = Some(position);
    }

    /// Positive lines zoom in.
    pub fn scroll(&mut self, lines: f32, view: &mut OrbitView) {
        let distance = view.distance() * (1.0 - lines * self.zoom_speed);
        view.set_distance(distance.clamp(self.min_distance, self.max_distance));
    }

    pub fn set_key(&mut self, key: PanKey, pressed: bool) {
        self.held[key as usize] = pressed;
    }

    /// Apply held pan keys for `dt` seconds.
    pub fn update(&mut self, dt: f32, view: &mut OrbitView) {
        let azimuth = view.azimuth().to_radians();
        let forward = Vec3::new(azimuth.sin(), 0.0, -azimuth.cos());
        let right = Vec3::new(azimuth.cos(), 0.0, azimuth.sin());
        let axis = |positive: PanKey, negative: PanKey| {
            self.held[positive as usize] as i32 as f32 - self.held[negative as usize] as i32 as f32
        };
        let direction =
            forward * axis(PanKey::Forward, PanKey::Backward) + right * axis(PanKey::Right, PanKey::Left);
        if direction != Vec3::ZERO {
            view.set_target(view.target() + direction.normalize() * self.pan_speed * dt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> OrbitView {
        OrbitView::new(50.0, 0.0, 20.0, Vec3::ZERO)
    }

    #[test]
    fn drag_rotates_only_while_held() {
        let mut controller = OrbitController::default();
        let mut view = view();
        controller.cursor_moved(Vec2::new(10.0, 10.0), &mut view);
        controller.cursor_moved(Vec2::new(110.0, 10.0), &mut view);
        assert_eq!(view.azimuth(), 0.0);

        controller.set_dragging(true);
        controller.cursor_moved(Vec2::new(120.0, 20.0), &mut view);
        assert!((view.azimuth() - 3.0).abs() < 1e-4);
        assert!((view.elevation() - 23.0).abs() < 1e-4);
    }

    #[test]
    fn elevation_stays_off_the_poles() {
        let mut controller = OrbitController::default();
        let mut view = view();
        controller.set_dragging(true);
        controller.cursor_moved(Vec2::ZERO, &mut view);
        controller.cursor_moved(Vec2::new(0.0, 10_000.0), &mut view);
        assert_eq!(view.elevation(), 89.0);
    }

    #[test]
    fn scroll_zoom_is_clamped() {
        let mut controller = OrbitController::default();
        let mut view = view();
        controller.scroll(1.0, &mut view);
        assert!((view.distance() - 45.0).abs() < 1e-4);
        controller.scroll(100.0, &mut view);
        assert_eq!(view.distance(), controller.min_distance);
        controller.scroll(-10_000.0, &mut view);
        assert_eq!(view.distance(), controller.max_distance);
    }

    #[test]
    fn pan_follows_azimuth() {
        let mut controller = OrbitController::default();
        let mut view = view();
        controller.set_key(PanKey::Forward, true);
        controller.update(0.5, &mut view);
        assert!(view.target().abs_diff_eq(Vec3::new(0.0, 0.0, -10.0), 1e-4));

        view.set_target(Vec3::ZERO);
        view.set_azimuth(90.0);
        controller.update(0.5, &mut view);
        assert!(view.target().abs_diff_eq(Vec3::new(10.0, 0.0, 0.0), 1e-4));

        controller.set_key(PanKey::Forward, false);
        view.set_target(Vec3::ZERO);
        controller.update(0.5, &mut view);
        assert_eq!(view.target(), Vec3::ZERO);
    }
}
