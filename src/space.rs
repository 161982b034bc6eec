use anyhow::{Context, Result};
use glam::{EulerRot, Mat4, Quat, Vec3};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Reserved id prefix for synthetic tour waypoints. Waypoint nodes sit in the
/// graph for map-style jumps but never resolve imagery and are excluded from
/// preload distance ranking.
pub const WAYPOINT_PREFIX: &str = "map";

pub fn is_waypoint(uuid: &str) -> bool {
    uuid.starts_with(WAYPOINT_PREFIX)
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Vec3Data {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl From<Vec3> for Vec3Data {
    fn from(value: Vec3) -> Self {
        Self { x: value.x, y: value.y, z: value.z }
    }
}

impl From<Vec3Data> for Vec3 {
    fn from(value: Vec3Data) -> Self {
        Vec3::new(value.x, value.y, value.z)
    }
}

/// Camera orientation as degrees: azimuth around +Y, polar from +Y.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SphericalAngles {
    #[serde(default)]
    pub azimuth: f32,
    #[serde(default = "SphericalAngles::default_polar")]
    pub polar: f32,
}

impl SphericalAngles {
    const fn default_polar() -> f32 {
        90.0
    }

    /// YXZ Euler construction: yaw by azimuth about Y, then pitch by polar
    /// about X. The same construction drives camera rotation targets.
    pub fn orientation(&self) -> Quat {
        Quat::from_euler(EulerRot::YXZ, self.azimuth.to_radians(), self.polar.to_radians(), 0.0)
    }

    /// Unit offset from a look target toward the camera resting position.
    pub fn radial_offset(&self) -> Vec3 {
        let azimuth = self.azimuth.to_radians();
        let polar = self.polar.to_radians();
        Vec3::new(polar.sin() * azimuth.cos(), polar.cos(), polar.sin() * azimuth.sin())
    }
}

impl Default for SphericalAngles {
    fn default() -> Self {
        Self { azimuth: 0.0, polar: Self::default_polar() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub uuid: String,
    #[serde(default)]
    pub position: Vec3Data,
    /// Panorama capture orientation in radians.
    #[serde(default)]
    pub rotation: Vec3Data,
    #[serde(default)]
    pub floor_position: Vec3Data,
    #[serde(default)]
    pub image: String,
}

impl NodeRecord {
    pub fn is_waypoint(&self) -> bool {
        is_waypoint(&self.uuid)
    }
}

/// Placement of a child group under the space root: translation, XYZ Euler
/// rotation, uniform scale.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPlacement {
    #[serde(default)]
    pub offset_position: Vec3Data,
    #[serde(default)]
    pub offset_rotation: Vec3Data,
    #[serde(default = "GroupPlacement::default_scale")]
    pub scale: f32,
}

impl GroupPlacement {
    const fn default_scale() -> f32 {
        1.0
    }

    /// Rotation field interpreted as degrees (node group convention).
    pub fn matrix_degrees(&self) -> Mat4 {
        let rot = Quat::from_euler(
            EulerRot::XYZ,
            self.offset_rotation.x.to_radians(),
            self.offset_rotation.y.to_radians(),
            self.offset_rotation.z.to_radians(),
        );
        Mat4::from_scale_rotation_translation(Vec3::splat(self.scale), rot, self.offset_position.into())
    }

    /// Rotation field interpreted as radians (exterior mesh convention).
    pub fn matrix_radians(&self) -> Mat4 {
        let rot = Quat::from_euler(
            EulerRot::XYZ,
            self.offset_rotation.x,
            self.offset_rotation.y,
            self.offset_rotation.z,
        );
        Mat4::from_scale_rotation_translation(Vec3::splat(self.scale), rot, self.offset_position.into())
    }
}

impl Default for GroupPlacement {
    fn default() -> Self {
        Self {
            offset_position: Vec3Data::default(),
            offset_rotation: Vec3Data::default(),
            scale: Self::default_scale(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneSettings {
    #[serde(default)]
    pub nodes: GroupPlacement,
    #[serde(default)]
    pub dollhouse: GroupPlacement,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceData {
    /// Asset version suffix for texture URLs; absent means unversioned.
    #[serde(default)]
    pub version: Option<String>,
    /// Exterior photogrammetry mesh (gltf/glb) path or URL.
    #[serde(default)]
    pub mesh: Option<String>,
    #[serde(default)]
    pub initial_node: Option<String>,
    #[serde(default)]
    pub initial_rotation: SphericalAngles,
    #[serde(default)]
    pub scene_settings: SceneSettings,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
}

impl SpaceData {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("Reading space file {}", path.display()))?;
        let space = serde_json::from_slice::<SpaceData>(&bytes)
            .with_context(|| format!("Parsing space file {}", path.display()))?;
        Ok(space)
    }

    pub fn find_node(&self, uuid: &str) -> Option<&NodeRecord> {
        self.nodes.iter().find(|node| node.uuid == uuid)
    }

    /// The configured starting node, or the first non-waypoint node when the
    /// configured id is missing or absent.
    pub fn initial_node(&self) -> Option<&NodeRecord> {
        if let Some(id) = self.initial_node.as_deref() {
            if let Some(node) = self.find_node(id) {
                return Some(node);
            }
            eprintln!("[space] initial node '{id}' not found, falling back to first node");
        }
        self.nodes.iter().find(|node| !node.is_waypoint())
    }

    pub fn node_group_matrix(&self) -> Mat4 {
        self.scene_settings.nodes.matrix_degrees()
    }

    pub fn exterior_matrix(&self) -> Mat4 {
        self.scene_settings.dollhouse.matrix_radians()
    }

    pub fn node_world_position(&self, record: &NodeRecord) -> Vec3 {
        self.node_group_matrix().transform_point3(record.position.into())
    }

    pub fn floor_world_position(&self, record: &NodeRecord) -> Vec3 {
        self.node_group_matrix().transform_point3(record.floor_position.into())
    }

    pub fn initial_orbit_target(&self) -> Option<Vec3> {
        self.initial_node().map(|node| self.node_world_position(node))
    }

    /// FPV resting pose: a point at `radius` from the orbit target along the
    /// initial rotation's spherical offset.
    pub fn initial_camera_position(&self, radius: f32) -> Option<Vec3> {
        let target = self.initial_orbit_target()?;
        Some(target + self.initial_rotation.radial_offset() * radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space_with_group(offset: Vec3, rotation_deg: Vec3, scale: f32) -> SpaceData {
        SpaceData {
            initial_node: Some("a".to_string()),
            scene_settings: SceneSettings {
                nodes: GroupPlacement {
                    offset_position: offset.into(),
                    offset_rotation: rotation_deg.into(),
                    scale,
                },
                dollhouse: GroupPlacement::default(),
            },
            nodes: vec![NodeRecord {
                uuid: "a".to_string(),
                position: Vec3::new(1.0, 0.0, 0.0).into(),
                rotation: Vec3Data::default(),
                floor_position: Vec3::new(1.0, -1.5, 0.0).into(),
                image: String::new(),
            }],
            ..SpaceData::default()
        }
    }

    #[test]
    fn waypoint_prefix_detection() {
        assert!(is_waypoint("map-entry"));
        assert!(is_waypoint("map"));
        assert!(!is_waypoint("atrium-01"));
    }

    #[test]
    fn node_group_transform_applies_translation_rotation_scale() {
        let space = space_with_group(Vec3::new(0.0, 0.0, 2.0), Vec3::new(0.0, 90.0, 0.0), 2.0);
        let world = space.node_world_position(&space.nodes[0]);
        // (1,0,0) scaled to (2,0,0), yawed 90 degrees onto -Z, then offset.
        assert!(world.distance(Vec3::new(0.0, 0.0, 0.0)) < 1e-5, "got {world:?}");
        let floor = space.floor_world_position(&space.nodes[0]);
        assert!(floor.distance(Vec3::new(0.0, -3.0, 0.0)) < 1e-5, "got {floor:?}");
    }

    #[test]
    fn initial_node_falls_back_past_waypoints() {
        let mut space = space_with_group(Vec3::ZERO, Vec3::ZERO, 1.0);
        space.initial_node = Some("missing".to_string());
        space.nodes.insert(
            0,
            NodeRecord {
                uuid: "map-overview".to_string(),
                position: Vec3Data::default(),
                rotation: Vec3Data::default(),
                floor_position: Vec3Data::default(),
                image: String::new(),
            },
        );
        let initial = space.initial_node().expect("fallback node");
        assert_eq!(initial.uuid, "a");
    }

    #[test]
    fn initial_camera_position_offsets_along_spherical_angles() {
        let mut space = space_with_group(Vec3::ZERO, Vec3::ZERO, 1.0);
        // Azimuth 0 with polar 90 offsets the camera along +X of the target.
        space.initial_rotation = SphericalAngles { azimuth: 0.0, polar: 90.0 };
        let target = space.initial_orbit_target().unwrap();
        let camera = space.initial_camera_position(0.1).unwrap();
        assert!((camera - target).distance(Vec3::new(0.1, 0.0, 0.0)) < 1e-6);
    }

    #[test]
    fn spherical_polar_zero_points_up() {
        let angles = SphericalAngles { azimuth: 45.0, polar: 0.0 };
        assert!(angles.radial_offset().distance(Vec3::Y) < 1e-6);
    }

    #[test]
    fn parses_camel_case_dataset() {
        let json = r#"{
            "version": "2",
            "mesh": "model.glb",
            "initialNode": "n1",
            "initialRotation": { "azimuth": 30.0, "polar": 85.0 },
            "sceneSettings": {
                "nodes": {
                    "offsetPosition": { "x": 1.0, "y": 0.0, "z": 0.0 },
                    "offsetRotation": { "x": 0.0, "y": 180.0, "z": 0.0 },
                    "scale": 0.5
                }
            },
            "nodes": [
                {
                    "uuid": "n1",
                    "position": { "x": 0.0, "y": 1.6, "z": 0.0 },
                    "rotation": { "x": 0.0, "y": 1.57, "z": 0.0 },
                    "floorPosition": { "x": 0.0, "y": 0.0, "z": 0.0 },
                    "image": "n1.jpg"
                }
            ]
        }"#;
        let space: SpaceData = serde_json::from_str(json).unwrap();
        assert_eq!(space.version.as_deref(), Some("2"));
        assert_eq!(space.mesh.as_deref(), Some("model.glb"));
        assert_eq!(space.initial_node().unwrap().uuid, "n1");
        assert!((space.scene_settings.nodes.scale - 0.5).abs() < 1e-6);
        assert!((space.nodes[0].floor_position.y - 0.0).abs() < 1e-6);
    }
}
