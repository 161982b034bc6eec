use glam::{Mat4, Quat, Vec3};

use crate::config::MarkerConfig;
use crate::exterior::ExteriorModel;
use crate::picking::{PickRegistry, PickTarget};
use crate::space::{self, SpaceData};
use crate::state::ViewMode;

/// The clickable floor-plane indicator under a viewpoint. The dot ring and
/// the active ring share one opacity; being the current node is expressed
/// by the active ring's visibility alone.
pub struct FloorMarker {
    pub uuid: String,
    /// Group-local resting point, the floor position plus a small lift.
    pub local_position: Vec3,
    pub visible: bool,
    pub ring_opacity: f32,
    pub active_ring_visible: bool,
    /// Half extent of the invisible hit plane, in group-local units.
    pub half_extent: f32,
    base_opacity: f32,
    hover_opacity: f32,
    orbit_boost: f32,
}

impl FloorMarker {
    fn new(uuid: &str, floor_position: Vec3, config: &MarkerConfig, active: bool) -> Self {
        Self {
            uuid: uuid.to_string(),
            local_position: floor_position + Vec3::new(0.0, config.lift, 0.0),
            visible: true,
            ring_opacity: config.base_opacity,
            active_ring_visible: active,
            half_extent: config.radius,
            base_opacity: config.base_opacity,
            hover_opacity: config.hover_opacity,
            orbit_boost: config.orbit_opacity_boost,
        }
    }

    /// Marker plane laid flat at its resting point.
    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(
            Quat::from_rotation_x(std::f32::consts::FRAC_PI_2),
            self.local_position,
        )
    }

    pub fn on_hover_enter(&mut self, view_mode: ViewMode) {
        self.ring_opacity = self.hover_opacity + self.mode_boost(view_mode);
    }

    pub fn on_hover_exit(&mut self, view_mode: ViewMode) {
        self.ring_opacity = self.base_opacity + self.mode_boost(view_mode);
    }

    /// Resets to the resting opacity for the mode, dropping any hover.
    pub fn apply_view_mode(&mut self, view_mode: ViewMode) {
        self.ring_opacity = self.base_opacity + self.mode_boost(view_mode);
    }

    pub fn set_active(&mut self, active: bool) {
        self.active_ring_visible = active;
    }

    fn mode_boost(&self, view_mode: ViewMode) -> f32 {
        if view_mode == ViewMode::Orbit {
            self.orbit_boost
        } else {
            0.0
        }
    }
}

/// One navigable viewpoint with its debug sphere and floor marker.
pub struct GraphNode {
    pub uuid: String,
    /// Group-local capture position.
    pub position: Vec3,
    pub world_position: Vec3,
    /// Panorama capture orientation in radians.
    pub rotation: Vec3,
    pub image: String,
    pub is_active: bool,
    pub sphere_radius: f32,
    pub sphere_visible: bool,
    pub marker: FloorMarker,
}

impl GraphNode {
    pub fn is_waypoint(&self) -> bool {
        space::is_waypoint(&self.uuid)
    }
}

/// All viewpoints of the loaded space under one shared placement.
pub struct NodeGraph {
    nodes: Vec<GraphNode>,
    group_matrix: Mat4,
    group_scale: f32,
}

impl NodeGraph {
    pub fn new(space: &SpaceData, current_uuid: &str, config: &MarkerConfig) -> Self {
        let group_matrix = space.node_group_matrix();
        let group_scale = space.scene_settings.nodes.scale;
        let nodes = space
            .nodes
            .iter()
            .map(|record| {
                let active = record.uuid == current_uuid;
                let position: Vec3 = record.position.into();
                GraphNode {
                    uuid: record.uuid.clone(),
                    position,
                    world_position: group_matrix.transform_point3(position),
                    rotation: record.rotation.into(),
                    image: record.image.clone(),
                    is_active: active,
                    sphere_radius: if active { 0.3 } else { 0.2 },
                    sphere_visible: false,
                    marker: FloorMarker::new(
                        &record.uuid,
                        record.floor_position.into(),
                        config,
                        active,
                    ),
                }
            })
            .collect();
        Self {
            nodes,
            group_matrix,
            group_scale,
        }
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find(&self, uuid: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|node| node.uuid == uuid)
    }

    pub fn find_mut(&mut self, uuid: &str) -> Option<&mut GraphNode> {
        self.nodes.iter_mut().find(|node| node.uuid == uuid)
    }

    pub fn world_position(&self, uuid: &str) -> Option<Vec3> {
        self.find(uuid).map(|node| node.world_position)
    }

    pub fn marker_world_matrix(&self, node: &GraphNode) -> Mat4 {
        self.group_matrix * node.marker.local_matrix()
    }

    /// Moves the active ring to the given node and clears it everywhere
    /// else, so at most one marker ever shows as current.
    pub fn set_active_marker(&mut self, uuid: &str) {
        for node in &mut self.nodes {
            let active = node.uuid == uuid;
            node.is_active = active;
            node.marker.set_active(active);
        }
    }

    pub fn handle_toggle_view_mode(&mut self, view_mode: ViewMode) {
        for node in &mut self.nodes {
            node.marker.apply_view_mode(view_mode);
        }
    }

    pub fn handle_toggle_debug_mode(&mut self, debug_mode: bool) {
        for node in &mut self.nodes {
            node.sphere_visible = debug_mode;
        }
    }

    pub fn show_floor_markers(&mut self) {
        self.set_floor_markers_visible(true);
    }

    pub fn hide_floor_markers(&mut self) {
        self.set_floor_markers_visible(false);
    }

    pub fn set_floor_markers_visible(&mut self, visible: bool) {
        for node in &mut self.nodes {
            node.marker.visible = visible;
        }
    }

    pub fn toggle_floor_markers(&mut self) {
        let current = self
            .nodes
            .first()
            .map(|node| node.marker.visible)
            .unwrap_or(false);
        self.set_floor_markers_visible(!current);
    }

    /// Drops every marker onto the exterior model by casting straight down
    /// from its node. Markers over a hole keep their authored position.
    pub fn update_floor_marker_positions(&mut self, exterior: &ExteriorModel) {
        let inverse_group = self.group_matrix.inverse();
        for node in &mut self.nodes {
            if let Some((_, point, _)) = exterior.raycast(node.world_position, -Vec3::Y) {
                node.marker.local_position = inverse_group.transform_point3(point);
            }
        }
    }

    /// Non-waypoint nodes nearest to the given one, ordered closest first.
    pub fn nearest_nodes(&self, uuid: &str, count: usize) -> Vec<&GraphNode> {
        let Some(origin) = self.world_position(uuid) else {
            return Vec::new();
        };
        let mut candidates: Vec<&GraphNode> = self
            .nodes
            .iter()
            .filter(|node| node.uuid != uuid && !node.is_waypoint())
            .collect();
        candidates.sort_by(|a, b| {
            let da = (a.world_position - origin).length_squared();
            let db = (b.world_position - origin).length_squared();
            da.total_cmp(&db)
        });
        candidates.truncate(count);
        candidates
    }

    /// Nearest non-waypoint node to an arbitrary world point.
    pub fn nearest_to_point(&self, point: Vec3) -> Option<&GraphNode> {
        self.nodes
            .iter()
            .filter(|node| !node.is_waypoint())
            .min_by(|a, b| {
                let da = (a.world_position - point).length_squared();
                let db = (b.world_position - point).length_squared();
                da.total_cmp(&db)
            })
    }

    pub fn register_pick_targets(&self, registry: &mut PickRegistry) {
        for node in &self.nodes {
            if node.marker.visible {
                registry.add(PickTarget::FloorMarker {
                    uuid: node.uuid.clone(),
                    to_world: self.marker_world_matrix(node),
                    half_extent: node.marker.half_extent,
                });
            }
            if node.sphere_visible {
                registry.add(PickTarget::NodeSphere {
                    uuid: node.uuid.clone(),
                    center: node.world_position,
                    radius: node.sphere_radius * self.group_scale,
                });
            }
        }
    }
}
