use std::path::Path;
use std::rc::Rc;

use anyhow::{anyhow, bail, Context, Result};
use glam::{Mat4, Vec3};
use gltf::mesh::Mode;

use crate::picking::{self, PickRegistry, PickTarget, SurfaceGeometry};
use crate::space::GroupPlacement;
use crate::state::ViewMode;

/// Ghost opacity the model starts at when revealed during navigation.
pub const REVEAL_OPACITY: f32 = 0.2;
/// How long the navigation reveal takes to fade back out.
pub const REVEAL_MS: u32 = 400;

pub struct ExteriorPiece {
    pub name: String,
    /// Placement of this mesh inside the model's own scene graph.
    pub transform: Mat4,
    pub geometry: Rc<SurfaceGeometry>,
}

/// The textured shell of the whole space, shown solid in orbit view and
/// kept around invisibly in first-person view.
///
/// In first person the meshes drop to opacity zero but stay in the scene,
/// so pointer rays still land on walls and floors. Depth-only duplicates
/// of every piece (the occluders) mask markers that sit behind geometry;
/// they are regenerated whenever the view or debug state changes.
pub struct ExteriorModel {
    pieces: Vec<ExteriorPiece>,
    to_world: Mat4,
    pub visible: bool,
    pub opacity: f32,
    pub wireframe: bool,
    pub render_order: i32,
    pub depth_write: bool,
    pub depth_test: bool,
    occluders_active: bool,
    suppress_occluders: bool,
    displaying_capture: bool,
    pub reveal_opacity: f32,
}

impl ExteriorModel {
    pub fn load(path: impl AsRef<Path>, placement: &GroupPlacement) -> Result<Self> {
        let path_ref = path.as_ref();
        let (document, buffers, _images) = gltf::import(path_ref)
            .with_context(|| format!("import exterior model from {}", path_ref.display()))?;
        let scene = document
            .default_scene()
            .or_else(|| document.scenes().next())
            .ok_or_else(|| anyhow!("no scenes in {}", path_ref.display()))?;
        let mut pieces = Vec::new();
        for node in scene.nodes() {
            collect_pieces(&node, Mat4::IDENTITY, &buffers, &mut pieces);
        }
        if pieces.is_empty() {
            bail!("no triangle meshes in {}", path_ref.display());
        }
        Ok(Self::from_pieces(pieces, placement))
    }

    pub fn from_pieces(pieces: Vec<ExteriorPiece>, placement: &GroupPlacement) -> Self {
        Self {
            pieces,
            to_world: placement.matrix_radians(),
            visible: true,
            opacity: 1.0,
            wireframe: false,
            render_order: 0,
            depth_write: true,
            depth_test: true,
            occluders_active: false,
            suppress_occluders: false,
            displaying_capture: false,
            reveal_opacity: 0.0,
        }
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    pub fn to_world(&self) -> Mat4 {
        self.to_world
    }

    /// Hosts whose scenes replace the exterior entirely set this to keep
    /// occluders and navigation reveals from ever appearing.
    pub fn set_suppress_occluders(&mut self, suppress: bool) {
        self.suppress_occluders = suppress;
        if suppress {
            self.occluders_active = false;
        }
    }

    pub fn occluders_active(&self) -> bool {
        self.occluders_active
    }

    pub fn occluder_render_order(&self) -> i32 {
        self.render_order + 1
    }

    /// Re-derives opacity, ordering, and occluders for the current view
    /// and debug state. Runs after load and on every toggle of either.
    pub fn update_transparency(&mut self, view_mode: ViewMode, debug_mode: bool) {
        let transparent = view_mode == ViewMode::Fpv && !debug_mode;
        self.opacity = if transparent { 0.0 } else { 1.0 };
        self.wireframe = debug_mode;
        self.render_order = if view_mode == ViewMode::Orbit || debug_mode {
            2
        } else {
            1
        };
        self.occluders_active = transparent && !self.suppress_occluders;
        if view_mode == ViewMode::Orbit {
            self.depth_write = true;
            self.depth_test = true;
            if self.displaying_capture {
                self.restore_default_materials();
            }
        }
    }

    pub fn handle_toggle_view_mode(&mut self, view_mode: ViewMode, debug_mode: bool) {
        self.update_transparency(view_mode, debug_mode);
    }

    pub fn handle_toggle_debug_mode(&mut self, view_mode: ViewMode, debug_mode: bool) {
        self.update_transparency(view_mode, debug_mode);
    }

    pub fn show(&mut self) {
        self.visible = true;
        self.occluders_active = false;
    }

    pub fn hide(&mut self) {
        self.visible = false;
        self.occluders_active = false;
    }

    pub fn toggle_visibility(&mut self) {
        self.visible = !self.visible;
    }

    pub fn show_occluders(&mut self) {
        if !self.suppress_occluders {
            self.occluders_active = true;
        }
    }

    pub fn hide_occluders(&mut self) {
        self.occluders_active = false;
    }

    /// Starts the brief ghost reveal that plays while walking between
    /// nodes. Desktop only; returns whether the reveal actually began so
    /// the caller knows to run the fade.
    pub fn show_for_navigation(
        &mut self,
        mobile: bool,
        view_mode: ViewMode,
        debug_mode: bool,
    ) -> bool {
        if mobile || self.suppress_occluders {
            return false;
        }
        self.displaying_capture = true;
        self.update_transparency(view_mode, debug_mode);
        self.occluders_active = false;
        self.reveal_opacity = REVEAL_OPACITY;
        self.render_order = 10;
        true
    }

    /// Fade progress in [0, 1] from the scheduler.
    pub fn set_reveal_progress(&mut self, progress: f32) {
        self.reveal_opacity = REVEAL_OPACITY * (1.0 - progress.clamp(0.0, 1.0));
    }

    pub fn end_navigation_reveal(&mut self, view_mode: ViewMode, debug_mode: bool) {
        self.reveal_opacity = 0.0;
        if view_mode == ViewMode::Fpv && !debug_mode && !self.suppress_occluders {
            self.occluders_active = true;
        }
    }

    /// Back on the authored materials the shell reads as solid again.
    pub fn restore_default_materials(&mut self) {
        self.displaying_capture = false;
        self.opacity = 1.0;
    }

    /// Nearest surface under a ray, while the model is in the scene.
    /// Opacity does not matter here; invisible first-person walls still
    /// catch rays.
    pub fn raycast(&self, origin: Vec3, dir: Vec3) -> Option<(f32, Vec3, Vec3)> {
        if !self.visible {
            return None;
        }
        let mut nearest: Option<(f32, Vec3, Vec3)> = None;
        for piece in &self.pieces {
            let world = self.to_world * piece.transform;
            if let Some(hit) = picking::ray_hit_mesh(origin, dir, &world, &piece.geometry) {
                let closer = match &nearest {
                    Some((best, _, _)) => hit.0 < *best,
                    None => true,
                };
                if closer {
                    nearest = Some(hit);
                }
            }
        }
        nearest
    }

    pub fn register_pick_targets(&self, registry: &mut PickRegistry) {
        if !self.visible {
            return;
        }
        for piece in &self.pieces {
            registry.add(PickTarget::ExteriorSurface {
                name: piece.name.clone(),
                to_world: self.to_world * piece.transform,
                geometry: piece.geometry.clone(),
            });
        }
    }
}

fn collect_pieces(
    node: &gltf::Node,
    parent: Mat4,
    buffers: &[gltf::buffer::Data],
    pieces: &mut Vec<ExteriorPiece>,
) {
    let transform = parent * Mat4::from_cols_array_2d(&node.transform().matrix());
    if let Some(mesh) = node.mesh() {
        for (primitive_index, primitive) in mesh.primitives().enumerate() {
            if primitive.mode() != Mode::Triangles {
                continue;
            }
            let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));
            let positions: Vec<Vec3> = reader
                .read_positions()
                .map(|it| it.map(Vec3::from_array).collect())
                .unwrap_or_default();
            if positions.is_empty() {
                continue;
            }
            let indices: Vec<u32> = reader
                .read_indices()
                .map(|read| read.into_u32().collect())
                .unwrap_or_else(|| (0..positions.len() as u32).collect());
            let base = node
                .name()
                .or_else(|| mesh.name())
                .map(|name| name.to_string())
                .unwrap_or_else(|| format!("piece_{}", pieces.len()));
            let name = if primitive_index > 0 {
                format!("{base}::{primitive_index}")
            } else {
                base
            };
            pieces.push(ExteriorPiece {
                name,
                transform,
                geometry: Rc::new(SurfaceGeometry { positions, indices }),
            });
        }
    }
    for child in node.children() {
        collect_pieces(&child, transform, buffers, pieces);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::Vec3Data;

    fn floor_piece() -> ExteriorPiece {
        // A 10 x 10 floor quad at y = 0 facing up.
        let geometry = SurfaceGeometry {
            positions: vec![
                Vec3::new(-5.0, 0.0, -5.0),
                Vec3::new(5.0, 0.0, -5.0),
                Vec3::new(5.0, 0.0, 5.0),
                Vec3::new(-5.0, 0.0, 5.0),
            ],
            indices: vec![0, 2, 1, 0, 3, 2],
        };
        ExteriorPiece {
            name: "floor".to_string(),
            transform: Mat4::IDENTITY,
            geometry: Rc::new(geometry),
        }
    }

    fn model() -> ExteriorModel {
        let placement = GroupPlacement {
            offset_position: Vec3Data::default(),
            offset_rotation: Vec3Data::default(),
            scale: 1.0,
        };
        ExteriorModel::from_pieces(vec![floor_piece()], &placement)
    }

    #[test]
    fn first_person_hides_but_keeps_occluders() {
        let mut exterior = model();
        exterior.update_transparency(ViewMode::Fpv, false);
        assert_eq!(exterior.opacity, 0.0);
        assert!(exterior.occluders_active());
        assert_eq!(exterior.render_order, 1);
        assert_eq!(exterior.occluder_render_order(), 2);
        assert!(!exterior.wireframe);
    }

    #[test]
    fn orbit_shows_solid_without_occluders() {
        let mut exterior = model();
        exterior.update_transparency(ViewMode::Orbit, false);
        assert_eq!(exterior.opacity, 1.0);
        assert!(!exterior.occluders_active());
        assert_eq!(exterior.render_order, 2);
        assert!(exterior.depth_write);
        assert!(exterior.depth_test);
    }

    #[test]
    fn debug_mode_wireframes_in_either_view() {
        let mut exterior = model();
        exterior.update_transparency(ViewMode::Fpv, true);
        assert_eq!(exterior.opacity, 1.0);
        assert!(exterior.wireframe);
        assert_eq!(exterior.render_order, 2);
        assert!(!exterior.occluders_active());
    }

    #[test]
    fn invisible_first_person_walls_still_catch_rays() {
        let mut exterior = model();
        exterior.update_transparency(ViewMode::Fpv, false);
        let hit = exterior.raycast(Vec3::new(1.0, 3.0, 1.0), -Vec3::Y);
        assert!(hit.is_some());
        let (distance, point, normal) = hit.unwrap();
        assert!((distance - 3.0).abs() < 1e-4);
        assert!(point.y.abs() < 1e-4);
        assert!((normal - Vec3::Y).length() < 1e-4);

        exterior.hide();
        assert!(exterior.raycast(Vec3::new(1.0, 3.0, 1.0), -Vec3::Y).is_none());
    }

    #[test]
    fn navigation_reveal_fades_ghost_then_restores_occluders() {
        let mut exterior = model();
        exterior.update_transparency(ViewMode::Fpv, false);
        assert!(exterior.show_for_navigation(false, ViewMode::Fpv, false));
        assert_eq!(exterior.reveal_opacity, REVEAL_OPACITY);
        assert_eq!(exterior.render_order, 10);
        assert!(!exterior.occluders_active());

        exterior.set_reveal_progress(0.5);
        assert!((exterior.reveal_opacity - REVEAL_OPACITY * 0.5).abs() < 1e-6);

        exterior.end_navigation_reveal(ViewMode::Fpv, false);
        assert_eq!(exterior.reveal_opacity, 0.0);
        assert!(exterior.occluders_active());
    }

    #[test]
    fn navigation_reveal_skipped_on_touch_devices() {
        let mut exterior = model();
        assert!(!exterior.show_for_navigation(true, ViewMode::Fpv, false));
        assert_eq!(exterior.reveal_opacity, 0.0);
    }

    #[test]
    fn returning_to_orbit_restores_authored_materials() {
        let mut exterior = model();
        exterior.update_transparency(ViewMode::Fpv, false);
        exterior.show_for_navigation(false, ViewMode::Fpv, false);
        exterior.end_navigation_reveal(ViewMode::Fpv, false);

        exterior.update_transparency(ViewMode::Orbit, false);
        assert_eq!(exterior.opacity, 1.0);
        assert!(!exterior.occluders_active());
    }

    #[test]
    fn suppressed_occluders_stay_off_everywhere() {
        let mut exterior = model();
        exterior.set_suppress_occluders(true);
        exterior.update_transparency(ViewMode::Fpv, false);
        assert!(!exterior.occluders_active());
        assert!(!exterior.show_for_navigation(false, ViewMode::Fpv, false));
        exterior.show_occluders();
        assert!(!exterior.occluders_active());
    }

    #[test]
    fn pick_targets_registered_only_while_visible() {
        let mut exterior = model();
        let mut registry = PickRegistry::default();
        exterior.register_pick_targets(&mut registry);
        assert_eq!(registry.len(), 1);

        exterior.hide();
        registry.clear();
        exterior.register_pick_targets(&mut registry);
        assert!(registry.is_empty());
    }
}
