use crate::render::camera::OrbitController;
use winit::keyboard::{KeyCode, PhysicalKey};

const KEY_ORBIT_SPEED: f32 = 1.8;
const KEY_ZOOM_STEP: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputAction {
    None,
    Dolly(f32),
    FrameModel,
    ResetCamera,
}

/// Held arrow keys orbit continuously; the rest are one-shot actions.
///
/// While blocked (a text field has focus, or the loading overlay covers the
/// viewport) presses are ignored and held keys are let go. Releases still register.
#[derive(Default, Debug, Clone, Copy)]
pub struct InputState {
    pub orbit_left: bool,
    pub orbit_right: bool,
    pub orbit_up: bool,
    pub orbit_down: bool,
    blocked: bool,
}

impl InputState {
    pub fn set_blocked(&mut self, blocked: bool) {
        if blocked && !self.blocked {
            self.release_all();
        }
        self.blocked = blocked;
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn handle_key(&mut self, key: PhysicalKey, pressed: bool) -> InputAction {
        let PhysicalKey::Code(code) = key else {
            return InputAction::None;
        };
        if pressed && self.blocked {
            return InputAction::None;
        }
        match code {
            KeyCode::ArrowLeft => self.orbit_left = pressed,
            KeyCode::ArrowRight => self.orbit_right = pressed,
            KeyCode::ArrowUp => self.orbit_up = pressed,
            KeyCode::ArrowDown => self.orbit_down = pressed,
            KeyCode::Equal | KeyCode::NumpadAdd if pressed => {
                return InputAction::Dolly(KEY_ZOOM_STEP)
            }
            KeyCode::Minus | KeyCode::NumpadSubtract if pressed => {
                return InputAction::Dolly(1.0 / KEY_ZOOM_STEP)
            }
            KeyCode::KeyF if pressed => return InputAction::FrameModel,
            KeyCode::KeyR | KeyCode::Home if pressed => return InputAction::ResetCamera,
            _ => {}
        }
        InputAction::None
    }

    pub fn release_all(&mut self) {
        self.orbit_left = false;
        self.orbit_right = false;
        self.orbit_up = false;
        self.orbit_down = false;
    }

    /// Applies held keys for one frame. Returns true if the camera moved.
    pub fn update_orbit(&self, orbit: &mut OrbitController, frame_dt: f32) -> bool {
        if self.blocked {
            return false;
        }
        let axis = |negative: bool, positive: bool| match (negative, positive) {
            (true, false) => -1.0,
            (false, true) => 1.0,
            _ => 0.0,
        };
        let yaw = axis(self.orbit_left, self.orbit_right);
        let pitch = axis(self.orbit_down, self.orbit_up);
        if yaw == 0.0 && pitch == 0.0 {
            return false;
        }
        let step = KEY_ORBIT_SPEED * frame_dt;
        orbit.orbit(yaw * step, pitch * step);
        true
    }
}

/// Pointer input gathered over the preview viewport during one UI pass, in points.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ViewportGesture {
    pub orbit: [f32; 2],
    pub pan: [f32; 2],
    pub dolly_drag: f32,
    pub scroll: f32,
}

impl ViewportGesture {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }

    /// Converts pointer travel into camera motion. A drag across the full viewport
    /// height turns the camera once around the target; panning tracks the cursor at
    /// the target's depth.
    pub fn apply(&self, orbit: &mut OrbitController, viewport_height: f32, fov_y_degrees: f32) {
        if self.is_idle() || viewport_height <= 0.0 {
            return;
        }
        let turn = std::f32::consts::TAU / viewport_height;
        if self.orbit != [0.0, 0.0] {
            orbit.orbit(self.orbit[0] * turn, -self.orbit[1] * turn);
        }
        if self.pan != [0.0, 0.0] {
            let per_point = 2.0 * (fov_y_degrees.to_radians() * 0.5).tan() / viewport_height;
            orbit.pan(-self.pan[0] * per_point, self.pan[1] * per_point);
        }
        if self.dolly_drag != 0.0 {
            orbit.dolly((self.dolly_drag * 0.01).exp());
        }
        if self.scroll != 0.0 {
            orbit.dolly((-self.scroll * 0.002).exp());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn orbit() -> OrbitController {
        OrbitController::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO)
    }

    #[test]
    fn one_shot_keys_only_fire_on_press() {
        let mut input = InputState::default();
        let f = PhysicalKey::Code(KeyCode::KeyF);
        assert_eq!(input.handle_key(f, true), InputAction::FrameModel);
        assert_eq!(input.handle_key(f, false), InputAction::None);
        assert_eq!(
            input.handle_key(PhysicalKey::Code(KeyCode::Minus), true),
            InputAction::Dolly(1.0 / KEY_ZOOM_STEP)
        );
    }

    #[test]
    fn held_arrows_orbit_without_changing_distance() {
        let mut input = InputState::default();
        input.handle_key(PhysicalKey::Code(KeyCode::ArrowLeft), true);
        let mut camera = orbit();
        let before = camera.position;
        assert!(input.update_orbit(&mut camera, 0.1));
        assert!((camera.position - before).length() > 1e-3);
        assert!((camera.distance() - 5.0).abs() < 1e-4);

        input.release_all();
        assert!(!input.update_orbit(&mut camera, 0.1));
    }

    #[test]
    fn blocked_input_leaves_the_camera_alone() {
        let mut input = InputState::default();
        let left = PhysicalKey::Code(KeyCode::ArrowLeft);
        input.handle_key(left, true);
        input.set_blocked(true);
        assert!(input.is_blocked());
        assert!(!input.orbit_left);

        let mut camera = orbit();
        let before = camera.position;
        assert_eq!(input.handle_key(left, true), InputAction::None);
        assert_eq!(
            input.handle_key(PhysicalKey::Code(KeyCode::KeyR), true),
            InputAction::None
        );
        assert_eq!(
            input.handle_key(PhysicalKey::Code(KeyCode::Equal), true),
            InputAction::None
        );
        assert!(!input.update_orbit(&mut camera, 0.1));
        assert_eq!(camera.position, before);

        input.set_blocked(false);
        assert_eq!(
            input.handle_key(PhysicalKey::Code(KeyCode::KeyF), true),
            InputAction::FrameModel
        );
        input.handle_key(left, true);
        assert!(input.update_orbit(&mut camera, 0.1));
    }

    #[test]
    fn full_height_drag_is_one_turn() {
        let mut camera = orbit();
        let start = camera.position;
        let gesture = ViewportGesture {
            orbit: [400.0, 0.0],
            ..Default::default()
        };
        gesture.apply(&mut camera, 400.0, 45.0);
        assert!((camera.position - start).length() < 1e-3);
    }

    #[test]
    fn scrolling_up_moves_closer() {
        let mut camera = orbit();
        ViewportGesture {
            scroll: 120.0,
            ..Default::default()
        }
        .apply(&mut camera, 400.0, 45.0);
        assert!(camera.distance() < 5.0);
    }

    #[test]
    fn panning_moves_target_and_eye_together() {
        let mut camera = orbit();
        let offset = camera.position - camera.target;
        ViewportGesture {
            pan: [50.0, -20.0],
            ..Default::default()
        }
        .apply(&mut camera, 400.0, 45.0);
        assert!(camera.target.length() > 1e-3);
        assert!((camera.position - camera.target - offset).length() < 1e-4);
    }
}
