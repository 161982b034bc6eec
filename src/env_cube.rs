use glam::{EulerRot, Mat4, Quat, Vec3};
use smallvec::SmallVec;

use crate::picking::ray_quad_intersection;
use crate::space;
use crate::state::ViewMode;
use crate::texture_cache::{
    TextureCache, TextureEvent, TextureHandle, TextureOutcome, TextureTier, FACE_COUNT,
};

/// Edge length of each face plane.
pub const FACE_SIZE: f32 = 200.0;

/// Duration of the face fade when toggling view modes.
pub const FADE_MS: u32 = 200;

/// Offset of a face plane from the cube center.
///
/// 0 top, 1 front, 2 left, 3 back, 4 right, 5 bottom.
pub fn face_offset(face: u8) -> Vec3 {
    match face {
        2 => Vec3::new(-100.0, 0.0, 0.0),
        4 => Vec3::new(100.0, 0.0, 0.0),
        0 => Vec3::new(0.0, 100.0, 0.0),
        5 => Vec3::new(0.0, -100.0, 0.0),
        1 => Vec3::new(0.0, 0.0, 100.0),
        3 => Vec3::new(0.0, 0.0, -100.0),
        _ => Vec3::ZERO,
    }
}

/// XYZ euler angles, in radians, turning a face plane inward.
pub fn face_rotation(face: u8) -> Vec3 {
    use std::f32::consts::{FRAC_PI_2, PI};
    match face {
        2 => Vec3::new(0.0, FRAC_PI_2, 0.0),
        4 => Vec3::new(0.0, -FRAC_PI_2, 0.0),
        0 => Vec3::new(FRAC_PI_2, 0.0, PI),
        5 => Vec3::new(-FRAC_PI_2, 0.0, PI),
        1 => Vec3::new(0.0, PI, 0.0),
        3 => Vec3::ZERO,
        _ => Vec3::ZERO,
    }
}

/// Orientation of a whole cube for a node captured with the given
/// rotation. The yaw flips sign and the result is twisted half a turn
/// about Z to match how the panoramas were stitched.
pub fn cube_orientation(node_rotation: Vec3) -> Quat {
    let node = Quat::from_euler(
        EulerRot::XYZ,
        node_rotation.x,
        -node_rotation.y,
        node_rotation.z,
    );
    node * Quat::from_rotation_z(std::f32::consts::PI)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    Unlit,
    Lit,
}

impl MaterialKind {
    pub fn label(self) -> &'static str {
        match self {
            MaterialKind::Unlit => "unlit",
            MaterialKind::Lit => "lit",
        }
    }
}

/// Render state of one face plane.
pub struct FaceMaterial {
    pub texture: Option<TextureHandle>,
    pub opacity: f32,
    pub depth_write: bool,
    pub depth_test: bool,
    pub kind: MaterialKind,
}

/// One panorama cube: six textured planes around the camera.
pub struct EnvCube {
    pub node_uuid: String,
    node_rotation: Vec3,
    faces: [FaceMaterial; FACE_COUNT as usize],
    full_resolution_faces: [bool; FACE_COUNT as usize],
    pub position: Vec3,
    pub orientation: Quat,
    pub visible: bool,
    /// Cleared when a view-mode fade has taken the faces fully out.
    pub faces_visible: bool,
    pub render_order: i32,
    outgoing: bool,
}

impl EnvCube {
    pub fn new(
        uuid: &str,
        node_rotation: Vec3,
        outgoing: bool,
        camera_position: Vec3,
        cache: &mut TextureCache,
    ) -> Self {
        let mut opacity = if outgoing { 0.0 } else { 1.0 };
        if space::is_waypoint(uuid) {
            opacity = 0.0;
        }
        let faces = std::array::from_fn(|face| {
            let face = face as u8;
            cache.request(uuid, face, TextureTier::Preview);
            FaceMaterial {
                texture: cache.get(uuid, face, TextureTier::Preview),
                opacity,
                depth_write: false,
                depth_test: false,
                kind: MaterialKind::Unlit,
            }
        });
        Self {
            node_uuid: uuid.to_string(),
            node_rotation,
            faces,
            full_resolution_faces: [false; FACE_COUNT as usize],
            position: camera_position,
            orientation: cube_orientation(node_rotation),
            visible: true,
            faces_visible: true,
            render_order: 0,
            outgoing,
        }
    }

    pub fn is_outgoing(&self) -> bool {
        self.outgoing
    }

    pub fn faces(&self) -> &[FaceMaterial; FACE_COUNT as usize] {
        &self.faces
    }

    pub fn is_full_resolution(&self, face: u8) -> bool {
        self.full_resolution_faces[face as usize]
    }

    pub fn show(&mut self) {
        self.visible = true;
    }

    pub fn hide(&mut self) {
        self.visible = false;
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        for face in &mut self.faces {
            face.opacity = opacity;
        }
    }

    pub fn set_depth_properties(&mut self, enable: bool) {
        for face in &mut self.faces {
            face.depth_write = enable;
            face.depth_test = enable;
        }
    }

    pub fn set_material_kind(&mut self, kind: MaterialKind) {
        for face in &mut self.faces {
            face.kind = kind;
        }
    }

    /// Points the cube at a different node: swaps in that node's preview
    /// faces, forgets full-resolution state, and recenters on the camera.
    /// Waypoints have no imagery, so the cube is left untouched for them.
    pub fn retarget(
        &mut self,
        uuid: &str,
        node_rotation: Vec3,
        camera_position: Vec3,
        cache: &mut TextureCache,
    ) {
        self.node_uuid = uuid.to_string();
        if space::is_waypoint(uuid) {
            return;
        }
        for face in 0..FACE_COUNT {
            cache.request(uuid, face, TextureTier::Preview);
            self.faces[face as usize].texture = cache.get(uuid, face, TextureTier::Preview);
        }
        self.full_resolution_faces = [false; FACE_COUNT as usize];
        self.position = camera_position;
        self.node_rotation = node_rotation;
        self.orientation = cube_orientation(node_rotation);
    }

    pub fn face_world_matrix(&self, face: u8) -> Mat4 {
        let rot = face_rotation(face);
        let local = Mat4::from_rotation_translation(
            Quat::from_euler(EulerRot::XYZ, rot.x, rot.y, rot.z),
            face_offset(face),
        );
        Mat4::from_rotation_translation(self.orientation, self.position) * local
    }

    /// Faces the camera is currently looking at and that are still at the
    /// preview tier. The forward ray from the cube center lands on exactly
    /// the face filling the middle of the screen.
    pub fn visible_faces(&self, camera_forward: Vec3) -> SmallVec<[u8; 6]> {
        let mut visible = SmallVec::new();
        let half = FACE_SIZE / 2.0;
        for face in 0..FACE_COUNT {
            if self.full_resolution_faces[face as usize] {
                continue;
            }
            let to_world = self.face_world_matrix(face);
            if ray_quad_intersection(self.position, camera_forward, &to_world, half, half)
                .is_some()
            {
                visible.push(face);
            }
        }
        visible
    }

    /// A finished preview lands on its face unless the face has already
    /// been upgraded past it.
    fn apply_preview(&mut self, face: u8, handle: TextureHandle) {
        if self.full_resolution_faces[face as usize] {
            return;
        }
        self.faces[face as usize].texture = Some(handle);
    }

    /// A finished full-size face only applies while the cube still shows
    /// the node it was requested for and no navigation is in flight.
    fn apply_full_res(&mut self, uuid: &str, face: u8, handle: TextureHandle, is_navigating: bool) {
        if is_navigating {
            return;
        }
        if uuid != self.node_uuid {
            return;
        }
        self.faces[face as usize].texture = Some(handle);
        self.full_resolution_faces[face as usize] = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeDirection {
    In,
    Out,
}

/// The pair of cubes behind every navigation: `current` paints the node
/// being viewed, `outgoing` holds the previous panorama and fades away on
/// top of it during a crossfade. Render order keeps `outgoing` drawn after
/// `current` so the incoming imagery is always underneath the fade.
pub struct EnvCubePair {
    pub current: EnvCube,
    pub outgoing: EnvCube,
    fade: Option<FadeDirection>,
}

impl EnvCubePair {
    pub fn new(
        uuid: &str,
        node_rotation: Vec3,
        camera_position: Vec3,
        cache: &mut TextureCache,
    ) -> Self {
        Self {
            current: EnvCube::new(uuid, node_rotation, false, camera_position, cache),
            outgoing: EnvCube::new(uuid, node_rotation, true, camera_position, cache),
            fade: None,
        }
    }

    /// Stages both cubes for a crossfade: the outgoing cube takes over the
    /// node being left at full opacity, the current cube takes the node
    /// being entered. The caller owns the navigation lock and the opacity
    /// ramp that follows.
    pub fn begin_crossfade(
        &mut self,
        current_uuid: &str,
        current_rotation: Vec3,
        outgoing_uuid: &str,
        outgoing_rotation: Vec3,
        camera_position: Vec3,
        cache: &mut TextureCache,
        view_mode: ViewMode,
        debug_mode: bool,
    ) {
        self.set_render_order(view_mode, debug_mode);
        self.outgoing
            .retarget(outgoing_uuid, outgoing_rotation, camera_position, cache);
        self.outgoing.set_opacity(1.0);
        self.current
            .retarget(current_uuid, current_rotation, camera_position, cache);
    }

    /// Crossfade progress in [0, 1]; the outgoing cube thins out linearly.
    pub fn set_crossfade_progress(&mut self, progress: f32) {
        self.outgoing.set_opacity(1.0 - progress.clamp(0.0, 1.0));
    }

    pub fn set_render_order(&mut self, view_mode: ViewMode, debug_mode: bool) {
        let order = if view_mode == ViewMode::Fpv && !debug_mode {
            1
        } else {
            0
        };
        self.current.render_order = order;
        self.outgoing.render_order = order + 1;
    }

    pub fn handle_toggle_debug_mode(&mut self, view_mode: ViewMode, debug_mode: bool) {
        self.set_render_order(view_mode, debug_mode);
    }

    /// Reorders the cubes for the new mode and stages a 200ms face fade,
    /// in for first person and out for orbit. Returns the direction so the
    /// caller can start the ramp.
    pub fn handle_toggle_view_mode(
        &mut self,
        view_mode: ViewMode,
        debug_mode: bool,
    ) -> FadeDirection {
        self.set_render_order(view_mode, debug_mode);
        let direction = if view_mode == ViewMode::Fpv {
            self.current.set_opacity(0.0);
            self.current.faces_visible = true;
            FadeDirection::In
        } else {
            FadeDirection::Out
        };
        self.fade = Some(direction);
        direction
    }

    /// Advances the staged view-mode fade. A completed fade-out also hides
    /// the face planes entirely.
    pub fn apply_fade(&mut self, progress: f32, done: bool) {
        let Some(direction) = self.fade else {
            return;
        };
        match direction {
            FadeDirection::In => self.current.set_opacity(progress),
            FadeDirection::Out => {
                self.current.set_opacity(1.0 - progress);
                if done {
                    self.current.faces_visible = false;
                }
            }
        }
        if done {
            self.fade = None;
        }
    }

    pub fn fade_in_progress(&self) -> Option<FadeDirection> {
        self.fade
    }

    /// Dims the live panorama, used while overlay content has focus.
    pub fn dim(&mut self, opacity: f32) {
        self.current.set_opacity(opacity);
    }

    pub fn set_material_kind(&mut self, kind: MaterialKind) {
        self.current.set_material_kind(kind);
        self.outgoing.set_material_kind(kind);
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.current.position = position;
        self.outgoing.position = position;
    }

    pub fn set_depth_properties(&mut self, enable: bool) {
        self.current.set_depth_properties(enable);
        self.outgoing.set_depth_properties(enable);
    }

    /// Per-frame upgrade pass: asks for full-size textures for whatever
    /// preview faces the camera is looking at. Desktop only, and never
    /// while navigating.
    pub fn update(
        &mut self,
        cache: &mut TextureCache,
        camera_forward: Vec3,
        mobile: bool,
        is_navigating: bool,
    ) {
        if mobile || is_navigating {
            return;
        }
        if space::is_waypoint(&self.current.node_uuid) {
            return;
        }
        for face in self.current.visible_faces(camera_forward) {
            cache.request(&self.current.node_uuid, face, TextureTier::Full);
        }
    }

    /// Routes a finished load onto the cubes. Previews land on whichever
    /// cube shows that node; full-size faces only ever land on the current
    /// cube, guarded against stale nodes and in-flight navigations.
    pub fn apply_texture_event(&mut self, event: &TextureEvent, is_navigating: bool) {
        let handle = match &event.outcome {
            TextureOutcome::Ready(handle) => handle.clone(),
            TextureOutcome::Failed(handle) => handle.clone(),
        };
        match event.tier {
            TextureTier::Preview => {
                if event.uuid == self.current.node_uuid {
                    self.current.apply_preview(event.face, handle.clone());
                }
                if event.uuid == self.outgoing.node_uuid {
                    self.outgoing.apply_preview(event.face, handle);
                }
            }
            TextureTier::Full => {
                self.current
                    .apply_full_res(&event.uuid, event.face, handle, is_navigating);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TextureSourceConfig;
    use crate::texture_cache::{BlockingTextureLoader, TextureFetcher};
    use anyhow::Result;
    use std::io::Cursor;

    struct AlwaysOk;

    impl TextureFetcher for AlwaysOk {
        fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
            let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([5, 5, 5, 255]));
            let mut bytes = Vec::new();
            img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
                .unwrap();
            Ok(bytes)
        }
    }

    fn cache() -> TextureCache {
        TextureCache::new(
            &TextureSourceConfig::default(),
            Box::new(BlockingTextureLoader::new(Box::new(AlwaysOk))),
        )
    }

    fn pair(cache: &mut TextureCache) -> EnvCubePair {
        EnvCubePair::new("node-a", Vec3::ZERO, Vec3::ZERO, cache)
    }

    #[test]
    fn face_tables_match_capture_layout() {
        assert_eq!(face_offset(0), Vec3::new(0.0, 100.0, 0.0));
        assert_eq!(face_offset(3), Vec3::new(0.0, 0.0, -100.0));
        assert_eq!(face_offset(2), Vec3::new(-100.0, 0.0, 0.0));
        let top = face_rotation(0);
        assert!((top.x - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
        assert!((top.z - std::f32::consts::PI).abs() < 1e-6);
        assert_eq!(face_rotation(3), Vec3::ZERO);
    }

    #[test]
    fn zero_rotation_still_twists_about_z() {
        let orientation = cube_orientation(Vec3::ZERO);
        assert!((orientation * Vec3::X + Vec3::X).length() < 1e-5);
        assert!((orientation * Vec3::Y + Vec3::Y).length() < 1e-5);
        assert!((orientation * Vec3::Z - Vec3::Z).length() < 1e-5);
    }

    #[test]
    fn outgoing_cube_starts_transparent() {
        let mut cache = cache();
        let pair = pair(&mut cache);
        assert_eq!(pair.current.faces()[0].opacity, 1.0);
        assert_eq!(pair.outgoing.faces()[0].opacity, 0.0);
        assert!(!pair.current.faces()[0].depth_write);
        assert!(!pair.current.faces()[0].depth_test);
    }

    #[test]
    fn waypoint_cube_is_invisible_and_inert() {
        let mut cache = cache();
        let cube = EnvCube::new("map-tour", Vec3::ZERO, false, Vec3::ZERO, &mut cache);
        assert_eq!(cube.faces()[0].opacity, 0.0);
        assert!(cube.faces()[0].texture.is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn retarget_to_waypoint_leaves_faces_alone() {
        let mut cache = cache();
        let mut cube = EnvCube::new("node-a", Vec3::ZERO, false, Vec3::ZERO, &mut cache);
        for event in cache.pump() {
            if event.uuid == "node-a" {
                cube.apply_preview(event.face, match event.outcome {
                    TextureOutcome::Ready(handle) => handle,
                    TextureOutcome::Failed(handle) => handle,
                });
            }
        }
        let before = cube.orientation;
        cube.retarget("map-tour", Vec3::new(0.0, 1.0, 0.0), Vec3::ONE, &mut cache);
        assert_eq!(cube.node_uuid, "map-tour");
        assert_eq!(cube.orientation, before);
        assert!(cube.faces()[0].texture.is_some());
    }

    #[test]
    fn crossfade_swaps_nodes_and_ramps_outgoing_down() {
        let mut cache = cache();
        let mut pair = pair(&mut cache);
        pair.begin_crossfade(
            "node-b",
            Vec3::ZERO,
            "node-a",
            Vec3::ZERO,
            Vec3::ZERO,
            &mut cache,
            ViewMode::Fpv,
            false,
        );
        assert_eq!(pair.current.node_uuid, "node-b");
        assert_eq!(pair.outgoing.node_uuid, "node-a");
        assert_eq!(pair.outgoing.faces()[0].opacity, 1.0);

        pair.set_crossfade_progress(0.5);
        assert!((pair.outgoing.faces()[0].opacity - 0.5).abs() < 1e-6);
        pair.set_crossfade_progress(1.0);
        assert_eq!(pair.outgoing.faces()[0].opacity, 0.0);
    }

    #[test]
    fn render_order_keeps_outgoing_on_top() {
        let mut cache = cache();
        let mut pair = pair(&mut cache);
        pair.set_render_order(ViewMode::Fpv, false);
        assert_eq!(pair.current.render_order, 1);
        assert_eq!(pair.outgoing.render_order, 2);

        pair.set_render_order(ViewMode::Orbit, false);
        assert_eq!(pair.current.render_order, 0);
        assert_eq!(pair.outgoing.render_order, 1);

        pair.set_render_order(ViewMode::Fpv, true);
        assert_eq!(pair.current.render_order, 0);
    }

    #[test]
    fn view_mode_fades_run_in_then_out() {
        let mut cache = cache();
        let mut pair = pair(&mut cache);
        assert_eq!(
            pair.handle_toggle_view_mode(ViewMode::Orbit, false),
            FadeDirection::Out
        );
        pair.apply_fade(0.5, false);
        assert!((pair.current.faces()[0].opacity - 0.5).abs() < 1e-6);
        pair.apply_fade(1.0, true);
        assert_eq!(pair.current.faces()[0].opacity, 0.0);
        assert!(!pair.current.faces_visible);

        assert_eq!(
            pair.handle_toggle_view_mode(ViewMode::Fpv, false),
            FadeDirection::In
        );
        assert!(pair.current.faces_visible);
        assert_eq!(pair.current.faces()[0].opacity, 0.0);
        pair.apply_fade(1.0, true);
        assert_eq!(pair.current.faces()[0].opacity, 1.0);
        assert!(pair.fade_in_progress().is_none());
    }

    #[test]
    fn material_toggle_preserves_faces() {
        let mut cache = cache();
        let mut pair = pair(&mut cache);
        cache.pump();
        pair.dim(0.4);
        pair.set_material_kind(MaterialKind::Lit);
        assert_eq!(pair.current.faces()[0].kind, MaterialKind::Lit);
        assert!((pair.current.faces()[0].opacity - 0.4).abs() < 1e-6);
        pair.set_material_kind(MaterialKind::Unlit);
        assert_eq!(pair.current.faces()[0].kind, MaterialKind::Unlit);
    }

    #[test]
    fn full_res_faces_ignore_stale_nodes_and_navigation() {
        let mut cache = cache();
        let mut pair = pair(&mut cache);
        cache.pump();

        cache.request("node-a", 1, TextureTier::Full);
        let events = cache.pump();
        assert_eq!(events.len(), 1);

        // During a navigation the upgrade must not land.
        pair.apply_texture_event(&events[0], true);
        assert!(!pair.current.is_full_resolution(1));

        // A stale node id must not land either.
        pair.current.node_uuid = "node-b".to_string();
        pair.apply_texture_event(&events[0], false);
        assert!(!pair.current.is_full_resolution(1));

        pair.current.node_uuid = "node-a".to_string();
        pair.apply_texture_event(&events[0], false);
        assert!(pair.current.is_full_resolution(1));
    }

    #[test]
    fn forward_ray_picks_the_face_in_view() {
        let mut cache = cache();
        let cube = EnvCube::new("node-a", Vec3::ZERO, false, Vec3::ZERO, &mut cache);
        let visible = cube.visible_faces(Vec3::Z);
        assert_eq!(visible.as_slice(), &[1]);
        let visible = cube.visible_faces(Vec3::Y);
        assert_eq!(visible.as_slice(), &[0]);
    }

    #[test]
    fn upgrade_pass_skips_mobile_and_navigation() {
        let mut cache = cache();
        let mut pair = pair(&mut cache);
        cache.pump();
        let before = cache.len();

        pair.update(&mut cache, Vec3::Z, true, false);
        assert_eq!(cache.len(), before);
        pair.update(&mut cache, Vec3::Z, false, true);
        assert_eq!(cache.len(), before);

        pair.update(&mut cache, Vec3::Z, false, false);
        assert_eq!(cache.len(), before + 1);
        cache.pump();
        assert!(cache.is_resolved("node-a", 1, TextureTier::Full));
    }
}
