use glam::{Quat, Vec2, Vec3};
use winit::dpi::PhysicalSize;

use crate::config::ViewerConfig;
use crate::exterior::ExteriorModel;
use crate::navigation::{NavigationContext, NavigationController};
use crate::nodes::NodeGraph;
use crate::picking::{HitTarget, PickRegistry};
use crate::state::{StateUpdate, ViewMode};
use crate::tween::TweenName;

const CURSOR_RENDER_ORDER: i32 = 10;
const ANGLE_TIE_EPSILON: f32 = 1e-4;

/// Screen-space rectangle the pointer should ignore, for overlay chrome
/// that sits on top of the canvas.
#[derive(Debug, Clone, Copy)]
pub struct ScreenRect {
    pub min: Vec2,
    pub max: Vec2,
}

impl ScreenRect {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
    }
}

/// The ring decal that follows the pointer across walls and floors.
/// Sitting exactly at the origin doubles as the hidden state.
pub struct CursorDecal {
    pub position: Vec3,
    pub orientation: Quat,
    pub opacity: f32,
    pub inner_radius: f32,
    pub outer_radius: f32,
    pub render_order: i32,
}

impl CursorDecal {
    fn new(config: &ViewerConfig) -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            opacity: 0.0,
            inner_radius: config.cursor.inner_radius,
            outer_radius: config.cursor.outer_radius,
            render_order: CURSOR_RENDER_ORDER,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.position != Vec3::ZERO
    }

    /// Lays the ring onto a surface: up axis onto the normal, then a
    /// quarter turn so the ring plane hugs the surface.
    pub fn set_surface(&mut self, point: Vec3, normal: Vec3) {
        self.position = point;
        self.orientation = Quat::from_rotation_arc(Vec3::Y, normal)
            * Quat::from_rotation_x(std::f32::consts::FRAC_PI_2);
    }

    pub fn clear(&mut self) {
        self.position = Vec3::ZERO;
    }
}

/// Turns pointer input into hovers, the cursor decal, and navigation.
///
/// Click resolution order: overlay chrome swallows the click; a floor
/// marker in front of the exterior shell navigates; a debug sphere does
/// the same when debug mode is on; with nothing hit, a node within the
/// angular cap of the click direction wins, smallest angle first and
/// camera distance breaking ties; and a click landing on the shell itself
/// walks to the node nearest the hit point.
pub struct PointerInteraction {
    registry: PickRegistry,
    exclusion_rects: Vec<ScreenRect>,
    previous_hovered_marker: Option<String>,
    pub cursor: CursorDecal,
    idle_elapsed_ms: f32,
}

impl PointerInteraction {
    pub fn new(config: &ViewerConfig) -> Self {
        Self {
            registry: PickRegistry::new(),
            exclusion_rects: Vec::new(),
            previous_hovered_marker: None,
            cursor: CursorDecal::new(config),
            idle_elapsed_ms: 0.0,
        }
    }

    pub fn set_exclusion_rects(&mut self, rects: Vec<ScreenRect>) {
        self.exclusion_rects = rects;
    }

    pub fn hovered_marker(&self) -> Option<&str> {
        self.previous_hovered_marker.as_deref()
    }

    fn rebuild_registry(&mut self, graph: &NodeGraph, exterior: Option<&ExteriorModel>) {
        self.registry.clear();
        graph.register_pick_targets(&mut self.registry);
        if let Some(exterior) = exterior {
            exterior.register_pick_targets(&mut self.registry);
        }
    }

    /// A click or tap at a screen position.
    pub fn process_interaction_click(
        &mut self,
        nav: &mut NavigationController,
        ctx: &mut NavigationContext,
        screen: Vec2,
        viewport: PhysicalSize<u32>,
    ) {
        if self.exclusion_rects.iter().any(|rect| rect.contains(screen)) {
            return;
        }
        let snapshot = ctx.state.get();
        let Some((origin, dir)) = ctx.rig.camera.screen_ray(screen, viewport) else {
            return;
        };

        self.rebuild_registry(ctx.graph, ctx.exterior.as_deref());
        let hits = self.registry.cast(origin, dir);

        let mut nearest_exterior_distance = f32::INFINITY;
        let mut nearest_exterior_point = None;
        for hit in &hits {
            if let HitTarget::Exterior { .. } = hit.target {
                if hit.distance < nearest_exterior_distance {
                    nearest_exterior_distance = hit.distance;
                    nearest_exterior_point = Some(hit.point);
                }
            }
        }

        let mut marker_click = false;
        for hit in &hits {
            match &hit.target {
                HitTarget::FloorMarker { uuid } => {
                    marker_click = true;
                    if hit.distance < nearest_exterior_distance
                        && (snapshot.current_node.as_deref() != Some(uuid.as_str())
                            || snapshot.view_mode == ViewMode::Orbit)
                    {
                        let target = uuid.clone();
                        nav.navigate_when_ready(ctx, &target);
                        return;
                    }
                }
                HitTarget::Node { uuid } if !marker_click && snapshot.debug_mode => {
                    if hit.distance < nearest_exterior_distance
                        && (snapshot.view_mode == ViewMode::Orbit
                            || snapshot.current_node.as_deref() != Some(uuid.as_str()))
                    {
                        let target = uuid.clone();
                        nav.navigate_when_ready(ctx, &target);
                        return;
                    }
                }
                _ => {}
            }
        }

        let mut chosen = None;
        if nearest_exterior_point.is_none() && !marker_click {
            chosen = self.angular_nearest(ctx, &snapshot.current_node, snapshot.view_mode, dir);
        } else if let Some(point) = nearest_exterior_point {
            chosen = ctx.graph.nearest_to_point(point).map(|node| node.uuid.clone());
        }

        if let Some(uuid) = chosen {
            nav.navigate_when_ready(ctx, &uuid);
        }
    }

    /// Node closest in direction to the click ray, within the angular cap.
    /// Smaller angle wins outright; equal angles fall back to whichever
    /// node is nearer the camera.
    fn angular_nearest(
        &self,
        ctx: &NavigationContext,
        current_node: &Option<String>,
        view_mode: ViewMode,
        click_direction: Vec3,
    ) -> Option<String> {
        let cap = ctx.config.picking.angular_cap_deg.to_radians();
        let camera_position = ctx.rig.camera.position;
        let mut best: Option<(&str, f32, f32)> = None;

        for node in ctx.graph.nodes() {
            if view_mode == ViewMode::Fpv && current_node.as_deref() == Some(node.uuid.as_str()) {
                continue;
            }
            if node.is_waypoint() {
                continue;
            }
            let to_node = node.world_position - camera_position;
            if to_node.length_squared() < 1e-12 {
                continue;
            }
            let angle = click_direction.angle_between(to_node.normalize());
            if angle > cap {
                continue;
            }
            let distance = to_node.length();
            let better = match best {
                None => true,
                Some((_, best_angle, best_distance)) => {
                    angle < best_angle - ANGLE_TIE_EPSILON
                        || ((angle - best_angle).abs() <= ANGLE_TIE_EPSILON
                            && distance < best_distance)
                }
            };
            if better {
                best = Some((&node.uuid, angle, distance));
            }
        }
        best.map(|(uuid, _, _)| uuid.to_string())
    }

    /// Pointer motion: refreshes the surface decal, floor-marker hover
    /// state, and the cursor idle timer.
    pub fn process_interaction_move(
        &mut self,
        ctx: &mut NavigationContext,
        screen: Vec2,
        viewport: PhysicalSize<u32>,
    ) {
        let snapshot = ctx.state.get();
        let Some((origin, dir)) = ctx.rig.camera.screen_ray(screen, viewport) else {
            return;
        };

        if let Some((_, point, normal)) = ctx
            .exterior
            .as_deref()
            .and_then(|exterior| exterior.raycast(origin, dir))
        {
            self.cursor.set_surface(point, normal);
        }

        self.rebuild_registry(ctx.graph, ctx.exterior.as_deref());
        let hovered = self
            .registry
            .cast(origin, dir)
            .into_iter()
            .find_map(|hit| match hit.target {
                HitTarget::FloorMarker { uuid } => Some(uuid),
                _ => None,
            });

        if hovered != self.previous_hovered_marker {
            if let Some(previous) = self.previous_hovered_marker.take() {
                if let Some(node) = ctx.graph.find_mut(&previous) {
                    node.marker.on_hover_exit(snapshot.view_mode);
                }
            }
            if let Some(uuid) = &hovered {
                if let Some(node) = ctx.graph.find_mut(uuid) {
                    node.marker.on_hover_enter(snapshot.view_mode);
                }
            }
            self.previous_hovered_marker = hovered.clone();
            ctx.state.set(StateUpdate {
                hovered_marker: Some(hovered),
                ..StateUpdate::default()
            });
        }

        self.handle_cursor_fade(ctx);
    }

    /// Motion wakes the cursor and restarts the idle countdown.
    fn handle_cursor_fade(&mut self, ctx: &mut NavigationContext) {
        self.cursor.opacity = ctx.config.cursor.visible_opacity;
        self.idle_elapsed_ms = 0.0;
        ctx.tweens.cancel(TweenName::CursorFade);
    }

    /// Per-frame idle accounting. Once the pointer has rested long enough
    /// the fade ramp starts.
    pub fn advance_idle(&mut self, ctx: &mut NavigationContext, dt_seconds: f32) {
        self.idle_elapsed_ms += dt_seconds * 1000.0;
        if self.idle_elapsed_ms >= ctx.config.cursor.idle_ms as f32
            && self.cursor.opacity > 0.0
            && !ctx.tweens.is_active(TweenName::CursorFade)
        {
            ctx.tweens.begin(TweenName::CursorFade, ctx.config.cursor.fade_ms);
        }
    }

    /// Cursor fade tick from the scheduler.
    pub fn apply_cursor_fade(&mut self, ctx: &NavigationContext, progress: f32, done: bool) {
        let active = ctx.config.cursor.visible_opacity;
        self.cursor.opacity = (active * (1.0 - progress)).max(0.0);
        if done {
            self.cursor.opacity = 0.0;
        }
    }

    /// Touch devices show no decal; called after a touch move.
    pub fn clear_cursor(&mut self) {
        self.cursor.clear();
    }
}
