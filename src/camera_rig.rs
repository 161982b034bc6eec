use glam::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4};
use winit::dpi::PhysicalSize;

use crate::config::{OrbitConfig, ViewerConfig};
use crate::space::SphericalAngles;
use crate::state::ViewMode;

const CAMERA_NEAR: f32 = 0.1;
const CAMERA_FAR: f32 = 1000.0;

/// Free-look perspective camera. Orientation is a quaternion rather than a
/// look-at target so first-person rotation can roll through the poles the
/// way the stitched panoramas expect.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub orientation: Quat,
    pub fov_y_deg: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn new(position: Vec3, orientation: Quat, fov_y_deg: f32) -> Self {
        Self { position, orientation, fov_y_deg, near: CAMERA_NEAR, far: CAMERA_FAR }
    }

    pub fn forward(&self) -> Vec3 {
        self.orientation * Vec3::NEG_Z
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.orientation, self.position).inverse()
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov_y_deg.to_radians(), aspect.max(0.0001), self.near, self.far)
    }

    pub fn view_projection(&self, viewport: PhysicalSize<u32>) -> Mat4 {
        let aspect = if viewport.height > 0 {
            viewport.width as f32 / viewport.height as f32
        } else {
            1.0
        };
        self.projection_matrix(aspect) * self.view_matrix()
    }

    /// World-space ray from the camera through a screen position.
    pub fn screen_ray(&self, screen: Vec2, viewport: PhysicalSize<u32>) -> Option<(Vec3, Vec3)> {
        if viewport.width == 0 || viewport.height == 0 {
            return None;
        }
        let ndc_x = (2.0 * screen.x / viewport.width as f32) - 1.0;
        let ndc_y = 1.0 - (2.0 * screen.y / viewport.height as f32);
        let clip = Vec4::new(ndc_x, ndc_y, 1.0, 1.0);
        let inv_view_proj = self.view_projection(viewport).inverse();
        let world = inv_view_proj * clip;
        if world.w.abs() < f32::EPSILON {
            return None;
        }
        let through = (world.truncate() / world.w) - self.position;
        Some((self.position, through.normalize()))
    }

    pub fn look_at(&mut self, target: Vec3) {
        let forward = target - self.position;
        if forward.length_squared() < 1e-12 {
            return;
        }
        let forward = forward.normalize();
        let up = if forward.dot(Vec3::Y).abs() > 0.999 { Vec3::Z } else { Vec3::Y };
        let z_axis = -forward;
        let x_axis = up.cross(z_axis).normalize();
        let y_axis = z_axis.cross(x_axis);
        self.orientation = Quat::from_mat3(&Mat3::from_cols(x_axis, y_axis, z_axis));
    }
}

/// Azimuth and polar angles, in degrees, read back from an orientation.
pub fn camera_angles(orientation: Quat) -> (f32, f32) {
    let (azimuth, polar, _) = orientation.to_euler(glam::EulerRot::YXZ);
    (azimuth.to_degrees(), polar.to_degrees())
}

/// Spherical coordinates about +Y, mirroring how orbit offsets are stored.
#[derive(Debug, Clone, Copy)]
struct Spherical {
    radius: f32,
    theta: f32,
    phi: f32,
}

impl Spherical {
    fn from_vec3(v: Vec3) -> Self {
        let radius = v.length();
        if radius < 1e-8 {
            return Self { radius: 0.0, theta: 0.0, phi: 0.0 };
        }
        Self {
            radius,
            theta: v.x.atan2(v.z),
            phi: (v.y / radius).clamp(-1.0, 1.0).acos(),
        }
    }

    fn to_vec3(self) -> Vec3 {
        let sin_phi = self.phi.sin();
        Vec3::new(
            self.radius * sin_phi * self.theta.sin(),
            self.radius * self.phi.cos(),
            self.radius * sin_phi * self.theta.cos(),
        )
    }
}

/// Orbit-control state: a target the camera swings around plus the
/// per-view-mode tuning applied to pointer input.
#[derive(Debug, Clone)]
pub struct OrbitControls {
    pub target: Vec3,
    pub enable_rotate: bool,
    pub enable_pan: bool,
    pub enable_zoom: bool,
    pub rotate_speed: f32,
    pub min_distance: f32,
    pub max_distance: f32,
}

/// Camera plus controls plus the navigation glide between nodes.
///
/// The glide keeps `alpha` above 1 while idle; arming it resets alpha to
/// zero and each tick advances by a fixed step, snapping exactly onto the
/// destination once alpha passes 1. Rotation targets stay in azimuth and
/// polar degrees and are re-slerped from the live orientation every tick,
/// which gives the characteristic ease-in settle.
pub struct CameraRig {
    pub camera: Camera,
    pub controls: OrbitControls,
    lerp_from: Vec3,
    lerp_to: Vec3,
    rotate_to: Option<SphericalAngles>,
    alpha: f32,
    lerp_step: f32,
    orbit_settings: OrbitConfig,
    mobile: bool,
}

impl CameraRig {
    pub fn new(
        position: Vec3,
        rotation: SphericalAngles,
        orbit_target: Vec3,
        fov_y_deg: f32,
        view_mode: ViewMode,
        config: &ViewerConfig,
    ) -> Self {
        let camera = Camera::new(position, rotation.orientation(), fov_y_deg);
        let controls = OrbitControls {
            target: orbit_target,
            enable_rotate: true,
            enable_pan: false,
            enable_zoom: false,
            rotate_speed: 0.0,
            min_distance: 0.0,
            max_distance: 0.0,
        };
        let mut rig = Self {
            camera,
            controls,
            lerp_from: position,
            lerp_to: position,
            rotate_to: Some(rotation),
            alpha: 1.1,
            lerp_step: config.transition.lerp_alpha_step,
            orbit_settings: config.orbit.clone(),
            mobile: config.mobile,
        };
        rig.update_orbit_controls_view_mode(view_mode);
        rig
    }

    /// Arms a glide toward a new camera position, optionally settling onto
    /// a new orientation along the way.
    pub fn set_lerp_target(
        &mut self,
        target: Vec3,
        rotation: Option<SphericalAngles>,
        debug_mode: bool,
    ) {
        self.lerp_from = self.camera.position;
        self.lerp_to = target;
        self.alpha = 0.0;
        self.rotate_to = rotation;
        if debug_mode {
            eprintln!("[rig] start lerp");
        }
    }

    pub fn is_lerping(&self) -> bool {
        self.alpha <= 1.0
    }

    pub fn lerp_destination(&self) -> Vec3 {
        self.lerp_to
    }

    /// One fixed tick of the rig. Returns true when the glide moved the
    /// camera so the caller can keep the panorama cubes centered on it.
    pub fn update(&mut self, view_mode: ViewMode, debug_mode: bool) -> bool {
        let mut moved = false;
        if self.alpha <= 1.0 {
            self.alpha += self.lerp_step;
            let t = self.alpha.min(1.0);
            self.camera.position = self.lerp_from.lerp(self.lerp_to, t);
            if self.alpha > 1.0 {
                if debug_mode {
                    eprintln!("[rig] end lerp");
                }
                self.camera.position = self.lerp_to;
            }
            if let Some(rotation) = self.rotate_to {
                self.camera.orientation = self.camera.orientation.slerp(rotation.orientation(), t);
            }
            moved = true;
        }

        // First person keeps the orbit pivot a short step ahead of the
        // camera so drags read as looking around, not flying around.
        if view_mode == ViewMode::Fpv {
            self.controls.target =
                self.camera.position + self.camera.forward() * self.orbit_settings.fpv_distance;
        }
        moved
    }

    pub fn update_orbit_controls_view_mode(&mut self, view_mode: ViewMode) {
        let orbit = &self.orbit_settings;
        match view_mode {
            ViewMode::Orbit => {
                self.controls.enable_pan = true;
                self.controls.enable_zoom = true;
                self.controls.rotate_speed = orbit.rotate_speed;
                self.controls.max_distance = orbit.max_distance;
                self.controls.min_distance = orbit.min_distance;
            }
            ViewMode::Fpv => {
                self.controls.enable_pan = false;
                self.controls.enable_zoom = false;
                self.controls.rotate_speed = orbit.fpv_rotate_speed;
                self.controls.max_distance = orbit.fpv_distance;
                self.controls.min_distance = orbit.fpv_distance;
            }
        }
        if self.mobile {
            self.controls.rotate_speed *= orbit.mobile_rotate_multiplier;
        }
    }

    /// Applies a pointer drag. Deltas are in pixels; a full viewport height
    /// of travel sweeps one whole turn before the speed factor.
    pub fn orbit(&mut self, delta: Vec2, viewport_height: f32) {
        if !self.controls.enable_rotate {
            return;
        }
        let height = viewport_height.max(1.0);
        let speed = self.controls.rotate_speed;
        let d_theta = std::f32::consts::TAU * delta.x / height * speed;
        let d_phi = std::f32::consts::TAU * delta.y / height * speed;

        let mut spherical = Spherical::from_vec3(self.camera.position - self.controls.target);
        spherical.theta -= d_theta;
        spherical.phi = (spherical.phi - d_phi).clamp(0.01, std::f32::consts::PI - 0.01);
        spherical.radius = spherical
            .radius
            .clamp(self.controls.min_distance, self.controls.max_distance);
        self.camera.position = self.controls.target + spherical.to_vec3();
        self.camera.look_at(self.controls.target);
    }

    /// Scales the orbit distance. No effect in first person, where the
    /// distance is pinned and zoom works on field of view instead.
    pub fn dolly(&mut self, factor: f32) {
        if !self.controls.enable_zoom {
            return;
        }
        let offset = self.camera.position - self.controls.target;
        let radius = (offset.length() * factor)
            .clamp(self.controls.min_distance, self.controls.max_distance);
        if offset.length_squared() < 1e-12 {
            return;
        }
        self.camera.position = self.controls.target + offset.normalize() * radius;
    }

    /// Screen-space pan: shifts camera and target together.
    pub fn pan(&mut self, delta: Vec2, viewport_height: f32) {
        if !self.controls.enable_pan {
            return;
        }
        let height = viewport_height.max(1.0);
        let distance = (self.camera.position - self.controls.target).length()
            * (self.camera.fov_y_deg.to_radians() / 2.0).tan();
        let right = self.camera.orientation * Vec3::X;
        let up = self.camera.orientation * Vec3::Y;
        let shift =
            right * (-2.0 * delta.x * distance / height) + up * (2.0 * delta.y * distance / height);
        self.camera.position += shift;
        self.controls.target += shift;
    }

    pub fn log_camera_angles(&self, node_uuid: &str) {
        let (azimuth, polar) = camera_angles(self.camera.orientation);
        eprintln!("[rig] node {node_uuid}");
        eprintln!(
            "[rig] camera position {} {} {}",
            self.camera.position.x, self.camera.position.y, self.camera.position.z
        );
        eprintln!("[rig] polar {polar} azimuth {azimuth}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rig(view_mode: ViewMode) -> CameraRig {
        CameraRig::new(
            Vec3::ZERO,
            SphericalAngles { azimuth: 0.0, polar: 90.0 },
            Vec3::new(0.0, 0.0, -0.1),
            90.0,
            view_mode,
            &ViewerConfig::default(),
        )
    }

    #[test]
    fn idle_rig_leaves_the_camera_alone() {
        let mut rig = rig(ViewMode::Fpv);
        let before = rig.camera.position;
        assert!(!rig.is_lerping());
        rig.update(ViewMode::Fpv, false);
        assert_eq!(rig.camera.position, before);
    }

    #[test]
    fn glide_snaps_exactly_onto_the_destination() {
        let mut rig = rig(ViewMode::Fpv);
        let to = Vec3::new(10.0, 0.0, -4.0);
        rig.set_lerp_target(to, None, false);
        assert!(rig.is_lerping());

        let mut ticks = 0;
        while rig.is_lerping() {
            rig.update(ViewMode::Fpv, false);
            ticks += 1;
            assert!(ticks < 40, "glide never finished");
        }
        assert_eq!(rig.camera.position, to);
        assert!((19..=22).contains(&ticks), "finished in {ticks} ticks");
    }

    #[test]
    fn rotation_settles_onto_the_requested_angles() {
        let mut rig = rig(ViewMode::Fpv);
        let rotation = SphericalAngles { azimuth: 120.0, polar: 80.0 };
        rig.set_lerp_target(Vec3::new(2.0, 0.0, 0.0), Some(rotation), false);
        while rig.is_lerping() {
            rig.update(ViewMode::Fpv, false);
        }
        let target = rotation.orientation();
        assert!(rig.camera.orientation.dot(target).abs() > 0.9999);
    }

    #[test]
    fn first_person_pins_the_pivot_just_ahead() {
        let mut rig = rig(ViewMode::Fpv);
        rig.update(ViewMode::Fpv, false);
        let offset = rig.controls.target - rig.camera.position;
        assert!((offset.length() - 0.1).abs() < 1e-5);
        assert!(offset.normalize().dot(rig.camera.forward()) > 0.999);
    }

    #[test]
    fn control_tuning_follows_the_view_mode() {
        let mut rig = rig(ViewMode::Orbit);
        assert!(rig.controls.enable_pan);
        assert!(rig.controls.enable_zoom);
        assert!((rig.controls.rotate_speed - 0.4).abs() < 1e-6);
        assert_eq!(rig.controls.min_distance, 1.0);
        assert_eq!(rig.controls.max_distance, 150.0);

        rig.update_orbit_controls_view_mode(ViewMode::Fpv);
        assert!(!rig.controls.enable_pan);
        assert!(!rig.controls.enable_zoom);
        assert!((rig.controls.rotate_speed + 0.25).abs() < 1e-6);
        assert_eq!(rig.controls.min_distance, 0.1);
        assert_eq!(rig.controls.max_distance, 0.1);
    }

    #[test]
    fn mobile_scales_the_rotate_speed() {
        let mut config = ViewerConfig::default();
        config.mobile = true;
        let rig = CameraRig::new(
            Vec3::ZERO,
            SphericalAngles::default(),
            Vec3::NEG_Z,
            90.0,
            ViewMode::Orbit,
            &config,
        );
        assert!((rig.controls.rotate_speed - 0.4 * 1.7).abs() < 1e-6);
    }

    #[test]
    fn center_screen_ray_matches_the_camera_forward() {
        let rig = rig(ViewMode::Fpv);
        let viewport = PhysicalSize::new(1280, 720);
        let (origin, dir) = rig
            .camera
            .screen_ray(Vec2::new(640.0, 360.0), viewport)
            .unwrap();
        assert_eq!(origin, rig.camera.position);
        assert!(dir.dot(rig.camera.forward()) > 0.999);
    }

    #[test]
    fn orbit_drag_swings_around_the_target() {
        let mut rig = rig(ViewMode::Orbit);
        rig.controls.target = Vec3::ZERO;
        rig.camera.position = Vec3::new(0.0, 0.0, 5.0);
        rig.camera.look_at(Vec3::ZERO);

        rig.orbit(Vec2::new(120.0, 0.0), 720.0);
        let radius = rig.camera.position.length();
        assert!((radius - 5.0).abs() < 1e-4);
        let toward = (rig.controls.target - rig.camera.position).normalize();
        assert!(rig.camera.forward().dot(toward) > 0.999);
    }

    #[test]
    fn dolly_is_inert_in_first_person() {
        let mut rig = rig(ViewMode::Fpv);
        rig.camera.position = Vec3::new(0.0, 0.0, 0.0);
        let before = rig.camera.position;
        rig.dolly(0.5);
        assert_eq!(rig.camera.position, before);

        let mut rig = self::rig(ViewMode::Orbit);
        rig.controls.target = Vec3::ZERO;
        rig.camera.position = Vec3::new(0.0, 0.0, 8.0);
        rig.dolly(0.5);
        assert!((rig.camera.position.z - 4.0).abs() < 1e-4);
    }
}
