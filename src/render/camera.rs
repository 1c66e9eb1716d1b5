use crate::config::CameraConfig;
use glam::{Mat4, Vec3};

const MIN_DISTANCE: f32 = 0.05;
const MAX_DISTANCE: f32 = 500.0;
const PITCH_LIMIT: f32 = 89.0 * std::f32::consts::PI / 180.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerspectiveCamera {
    pub fov_y_degrees: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
}

impl PerspectiveCamera {
    pub fn from_config(config: &CameraConfig, aspect: f32) -> Self {
        Self {
            fov_y_degrees: config.fov_degrees,
            aspect,
            near: config.near,
            far: config.far,
            eye: Vec3::from(config.eye),
            target: Vec3::from(config.target),
            up: Vec3::Y,
        }
    }

    pub fn look_at(&mut self, eye: Vec3, target: Vec3, up: Vec3) {
        self.eye = eye;
        self.target = target;
        self.up = up;
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(
            self.fov_y_degrees.to_radians(),
            self.aspect.max(1e-3),
            self.near,
            self.far,
        )
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection() * self.view()
    }
}

/// Orbit/pan/dolly camera around a target point.
#[derive(Debug, Clone, Copy)]
pub struct OrbitController {
    pub position: Vec3,
    pub target: Vec3,
    pub yaw: f32,
    pub pitch: f32,
}

impl OrbitController {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        let (yaw, pitch) = forward_to_yaw_pitch(target - position);
        Self {
            position,
            target,
            yaw,
            pitch: pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT),
        }
    }

    pub fn from_camera(camera: &PerspectiveCamera) -> Self {
        Self::new(camera.eye, camera.target)
    }

    pub fn distance(&self) -> f32 {
        (self.position - self.target).length().max(MIN_DISTANCE)
    }

    pub fn frame_bounds_preserve_orientation(&mut self, center: Vec3, extent: Vec3) {
        let radius = extent.max_element();
        let distance = if radius > 0.0 { radius * 3.0 } else { 3.0 };
        let (forward, _, _) = self.basis();
        self.target = center;
        self.position = center - forward * distance;
    }

    pub fn apply(&self, camera: &mut PerspectiveCamera) {
        let (_, _, up) = self.basis();
        camera.look_at(self.position, self.target, up);
    }

    /// Rotates around the target, keeping the distance.
    pub fn orbit(&mut self, yaw_delta: f32, pitch_delta: f32) {
        let distance = self.distance();
        self.yaw += yaw_delta;
        self.pitch = (self.pitch + pitch_delta).clamp(-PITCH_LIMIT, PITCH_LIMIT);
        wrap_yaw(&mut self.yaw);
        let (forward, _, _) = self.basis();
        self.position = self.target - forward * distance;
    }

    /// Moves target and eye together in the view plane. Offsets are in units of the
    /// current orbit distance.
    pub fn pan(&mut self, right: f32, up: f32) {
        let distance = self.distance();
        let (_, right_dir, up_dir) = self.basis();
        let offset = (right_dir * right + up_dir * up) * distance;
        self.position += offset;
        self.target += offset;
    }

    /// Scales the orbit distance; values below 1 move closer.
    pub fn dolly(&mut self, factor: f32) {
        if !factor.is_finite() || factor <= 0.0 {
            return;
        }
        let distance = (self.distance() * factor).clamp(MIN_DISTANCE, MAX_DISTANCE);
        let (forward, _, _) = self.basis();
        self.position = self.target - forward * distance;
    }

    pub fn basis(&self) -> (Vec3, Vec3, Vec3) {
        camera_basis(self.yaw, self.pitch)
    }
}

fn forward_to_yaw_pitch(forward: Vec3) -> (f32, f32) {
    let n = forward.try_normalize().unwrap_or(Vec3::NEG_Z);
    (n.z.atan2(n.x), n.y.clamp(-1.0, 1.0).asin())
}

fn camera_basis(yaw: f32, pitch: f32) -> (Vec3, Vec3, Vec3) {
    let cos_pitch = pitch.cos();
    let forward = Vec3::new(yaw.cos() * cos_pitch, pitch.sin(), yaw.sin() * cos_pitch);
    let right = Vec3::new(-yaw.sin(), 0.0, yaw.cos());
    let up = right.cross(forward).normalize_or_zero();
    (forward, right, up)
}

fn wrap_yaw(yaw: &mut f32) {
    const TWO_PI: f32 = std::f32::consts::PI * 2.0;
    if yaw.is_finite() {
        *yaw = (*yaw + std::f32::consts::PI).rem_euclid(TWO_PI) - std::f32::consts::PI;
    }
}

#[cfg(test)]
mod tests {
    use super::{OrbitController, PerspectiveCamera};
    use crate::config::CameraConfig;
    use glam::Vec3;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn orbit_keeps_distance_to_target() {
        let mut orbit = OrbitController::new(Vec3::new(5.5, 4.0, 8.0), Vec3::new(0.0, 1.0, 0.0));
        let before = orbit.distance();
        orbit.orbit(0.7, -0.2);
        assert!((orbit.distance() - before).abs() < 1e-4);
        assert!(approx(orbit.target, Vec3::new(0.0, 1.0, 0.0)));
        assert!(orbit.position.is_finite());
    }

    #[test]
    fn pitch_is_clamped_short_of_the_pole() {
        let mut orbit = OrbitController::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        orbit.orbit(0.0, 10.0);
        assert!(orbit.pitch < std::f32::consts::FRAC_PI_2);
        let (_, _, up) = orbit.basis();
        assert!(up.length() > 0.9);
    }

    #[test]
    fn pan_moves_target_and_eye_together() {
        let mut orbit = OrbitController::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        let offset = orbit.position - orbit.target;
        orbit.pan(0.1, 0.05);
        assert!(approx(orbit.position - orbit.target, offset));
        assert!(orbit.target.length() > 0.0);
    }

    #[test]
    fn dolly_scales_distance_within_limits() {
        let mut orbit = OrbitController::new(Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO);
        orbit.dolly(0.5);
        assert!((orbit.distance() - 2.0).abs() < 1e-4);
        orbit.dolly(1e-6);
        assert!(orbit.distance() >= 0.05 - 1e-6);
        orbit.dolly(-1.0);
        assert!(orbit.distance().is_finite());
    }

    #[test]
    fn frame_bounds_preserves_orientation() {
        let mut orbit = OrbitController::new(Vec3::new(5.0, 6.0, 7.0), Vec3::ZERO);
        let (yaw, pitch) = (orbit.yaw, orbit.pitch);
        orbit.frame_bounds_preserve_orientation(Vec3::new(1.0, 1.0, 1.0), Vec3::splat(2.0));
        assert!((orbit.yaw - yaw).abs() < 1e-6);
        assert!((orbit.pitch - pitch).abs() < 1e-6);
        assert!(approx(orbit.target, Vec3::ONE));
        assert!((orbit.distance() - 6.0).abs() < 1e-4);
    }

    #[test]
    fn apply_points_camera_at_target() {
        let config = CameraConfig::preview();
        let mut camera = PerspectiveCamera::from_config(&config, 1.5);
        let orbit = OrbitController::from_camera(&camera);
        orbit.apply(&mut camera);
        assert!(approx(camera.target, Vec3::new(0.0, 1.0, 0.0)));
        assert!(approx(camera.eye, Vec3::new(5.5, 4.0, 8.0)));
        assert!(camera.view_projection().is_finite());
    }
}
