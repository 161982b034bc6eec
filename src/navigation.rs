use glam::Vec3;

use crate::camera_rig::CameraRig;
use crate::config::ViewerConfig;
use crate::env_cube::{self, EnvCubePair};
use crate::exterior::{self, ExteriorModel};
use crate::nodes::NodeGraph;
use crate::space::SphericalAngles;
use crate::state::{StateHandle, StateUpdate, ViewMode};
use crate::texture_cache::{TextureCache, TextureTier};
use crate::tween::{TweenName, TweenScheduler};
use crate::viewer::ViewerHooks;

/// How to arrive at a node. The default walks there in first person.
#[derive(Debug, Clone)]
pub struct NavigationOptions {
    pub view_mode: ViewMode,
    /// Pivot override, for framing a feature instead of the node itself.
    pub orbit_target: Option<Vec3>,
    /// Camera pull-back from the pivot when arriving in orbit.
    pub distance: Option<f32>,
    pub position: Option<Vec3>,
    pub rotation: Option<SphericalAngles>,
    pub no_dollhouse: bool,
}

impl Default for NavigationOptions {
    fn default() -> Self {
        Self {
            view_mode: ViewMode::Fpv,
            orbit_target: None,
            distance: None,
            position: None,
            rotation: None,
            no_dollhouse: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SetViewModeOptions {
    pub do_lerp: bool,
    pub no_dollhouse: bool,
}

impl Default for SetViewModeOptions {
    fn default() -> Self {
        Self { do_lerp: true, no_dollhouse: false }
    }
}

/// Everything a navigation touches, borrowed for the duration of one call.
pub struct NavigationContext<'a> {
    pub config: &'a ViewerConfig,
    pub state: &'a StateHandle,
    pub rig: &'a mut CameraRig,
    pub cubes: &'a mut EnvCubePair,
    pub cache: &'a mut TextureCache,
    pub graph: &'a mut NodeGraph,
    pub exterior: Option<&'a mut ExteriorModel>,
    pub tweens: &'a mut TweenScheduler,
    pub hooks: &'a mut dyn ViewerHooks,
}

/// Moves the viewer between nodes and view modes.
///
/// Every transition runs through here: marker clicks, mode toggles, zoom
/// ramps. The `is_navigating` flag on the shared state is the only
/// backpressure; while a crossfade is in flight new navigation requests
/// are swallowed.
pub struct NavigationController {
    /// Node waiting on its preview faces before a deferred navigation.
    pending_load: Option<String>,
    zoom_target: Option<f32>,
}

impl NavigationController {
    pub fn new() -> Self {
        Self { pending_load: None, zoom_target: None }
    }

    pub fn pending_load(&self) -> Option<&str> {
        self.pending_load.as_deref()
    }

    /// Walks or jumps to a node. No-ops when already standing there in
    /// first person with nothing else requested, and always while another
    /// navigation is still crossfading.
    pub fn handle_navigation(
        &mut self,
        ctx: &mut NavigationContext,
        uuid: &str,
        options: NavigationOptions,
    ) {
        let snapshot = ctx.state.get();
        if snapshot.debug_mode {
            eprintln!("[nav] navigating to {uuid} in {}", options.view_mode.label());
        }

        if snapshot.view_mode == ViewMode::Fpv
            && options.view_mode == ViewMode::Fpv
            && snapshot.current_node.as_deref() == Some(uuid)
            && options.position.is_none()
            && options.rotation.is_none()
        {
            return;
        }
        if snapshot.is_navigating {
            return;
        }

        let Some(node_world) = ctx.graph.world_position(uuid) else {
            eprintln!("[nav] unknown node {uuid}");
            return;
        };
        let node_rotation = match ctx.graph.find(uuid) {
            Some(node) => node.rotation,
            None => Vec3::ZERO,
        };

        let new_orbit_target = options.orbit_target.unwrap_or(node_world);
        ctx.rig.controls.target = new_orbit_target;

        let previous_node = snapshot.current_node.clone();
        if previous_node.as_deref() != Some(uuid) {
            ctx.state.set(StateUpdate {
                outgoing_node: previous_node.clone(),
                current_node: Some(uuid.to_string()),
                ..StateUpdate::default()
            });
        }
        ctx.graph.set_active_marker(uuid);

        let mut lerp_target = new_orbit_target;
        if options.view_mode == ViewMode::Orbit {
            let distance = options.distance.unwrap_or(ctx.config.orbit.back_offset);
            lerp_target = new_orbit_target - ctx.rig.camera.forward() * distance;
        }
        if let Some(position) = options.position {
            lerp_target = position;
        }

        let outgoing_view_mode = snapshot.view_mode;
        if options.view_mode != outgoing_view_mode {
            self.set_view_mode(
                ctx,
                options.view_mode,
                SetViewModeOptions { do_lerp: false, no_dollhouse: options.no_dollhouse },
            );
        }

        // Leaving orbit there is no crossfade to hide the swap, so the
        // incoming faces go up while the cube is still faded out.
        if outgoing_view_mode == ViewMode::Orbit {
            ctx.cubes
                .current
                .retarget(uuid, node_rotation, ctx.rig.camera.position, ctx.cache);
        }

        ctx.rig
            .set_lerp_target(lerp_target, options.rotation, snapshot.debug_mode);

        if outgoing_view_mode == ViewMode::Fpv && previous_node.as_deref() != Some(uuid) {
            if let Some(outgoing_uuid) = previous_node {
                self.crossfade(ctx, uuid, node_rotation, &outgoing_uuid);
            }
        }
    }

    fn crossfade(
        &mut self,
        ctx: &mut NavigationContext,
        current_uuid: &str,
        current_rotation: Vec3,
        outgoing_uuid: &str,
    ) {
        let snapshot = ctx.state.get();
        let outgoing_rotation = match ctx.graph.find(outgoing_uuid) {
            Some(node) => node.rotation,
            None => Vec3::ZERO,
        };

        ctx.state.set(StateUpdate { is_navigating: Some(true), ..StateUpdate::default() });
        ctx.cubes.begin_crossfade(
            current_uuid,
            current_rotation,
            outgoing_uuid,
            outgoing_rotation,
            ctx.rig.camera.position,
            ctx.cache,
            snapshot.view_mode,
            snapshot.debug_mode,
        );

        if let Some(exterior) = ctx.exterior.as_deref_mut() {
            if exterior.show_for_navigation(ctx.config.mobile, snapshot.view_mode, snapshot.debug_mode)
            {
                ctx.tweens.begin(TweenName::NavigationReveal, exterior::REVEAL_MS);
            }
        }

        if snapshot.debug_mode {
            eprintln!("[cube] start crossfade");
        }
        ctx.tweens
            .begin(TweenName::Crossfade, ctx.config.transition.crossfade_ms);
        ctx.hooks.navigation_started(current_uuid);
    }

    /// Crossfade tick from the scheduler. Completion releases the
    /// navigation lock.
    pub fn apply_crossfade(&mut self, ctx: &mut NavigationContext, progress: f32, done: bool) {
        ctx.cubes.set_crossfade_progress(progress);
        if done {
            ctx.state
                .set(StateUpdate { is_navigating: Some(false), ..StateUpdate::default() });
            if ctx.state.get().debug_mode {
                eprintln!("[cube] end crossfade");
            }
        }
    }

    pub fn toggle_view_mode(&mut self, ctx: &mut NavigationContext) {
        let mode = match ctx.state.get().view_mode {
            ViewMode::Fpv => ViewMode::Orbit,
            ViewMode::Orbit => ViewMode::Fpv,
        };
        self.set_view_mode(ctx, mode, SetViewModeOptions::default());
    }

    pub fn set_view_mode(
        &mut self,
        ctx: &mut NavigationContext,
        new_mode: ViewMode,
        options: SetViewModeOptions,
    ) {
        let snapshot = ctx.state.get();
        ctx.hooks.view_mode_changed(new_mode);

        let new_camera_position;
        match new_mode {
            ViewMode::Fpv => {
                new_camera_position = snapshot
                    .current_node
                    .as_deref()
                    .and_then(|uuid| ctx.graph.world_position(uuid))
                    .unwrap_or(ctx.rig.camera.position);
                ctx.rig.camera.fov_y_deg = ctx.config.zoom.base_fov_deg;
            }
            ViewMode::Orbit => {
                new_camera_position = ctx.rig.controls.target
                    - ctx.rig.camera.forward() * ctx.config.orbit.back_offset;
                ctx.rig.camera.fov_y_deg = ctx.config.zoom.orbit_fov_deg;
            }
        }

        if new_mode == ViewMode::Orbit {
            if let Some(exterior) = ctx.exterior.as_deref_mut() {
                exterior.restore_default_materials();
            }
        }

        let zoom_level = match new_mode {
            // Widest field of view corresponds to zoom level zero.
            ViewMode::Fpv => Some(ctx.config.zoom.min_level),
            ViewMode::Orbit => None,
        };
        ctx.state.set(StateUpdate {
            view_mode: Some(new_mode),
            zoom_level,
            ..StateUpdate::default()
        });

        if options.do_lerp {
            ctx.rig
                .set_lerp_target(new_camera_position, None, snapshot.debug_mode);
        }
        ctx.rig.update_orbit_controls_view_mode(new_mode);

        if let Some(exterior) = ctx.exterior.as_deref_mut() {
            if options.no_dollhouse {
                exterior.hide();
            } else {
                exterior.handle_toggle_view_mode(new_mode, snapshot.debug_mode);
            }
        }

        ctx.cubes.handle_toggle_view_mode(new_mode, snapshot.debug_mode);
        ctx.tweens.begin(TweenName::ViewModeFade, env_cube::FADE_MS);
        ctx.graph.handle_toggle_view_mode(new_mode);

        ctx.hooks.flashlight_toggled(new_mode == ViewMode::Fpv);
    }

    /// Nudges the zoom level, clamped to its range, and applies the
    /// matching field of view immediately.
    pub fn handle_zoom(&mut self, ctx: &mut NavigationContext, amount: f32) {
        let snapshot = ctx.state.get();
        let zoom = (snapshot.zoom_level + amount)
            .clamp(ctx.config.zoom.min_level, ctx.config.zoom.max_level);
        let fov = ctx.config.zoom.fov_for_level(zoom);
        ctx.rig.camera.fov_y_deg = fov;
        if snapshot.debug_mode {
            eprintln!("[nav] zoom {zoom} fov {fov}");
        }
        ctx.state
            .set(StateUpdate { zoom_level: Some(zoom), ..StateUpdate::default() });
    }

    /// Glides the zoom level toward a target instead of jumping. The tween
    /// runs for as many ticks as the decaying steps need to reach the snap
    /// window.
    pub fn lerp_to_zoom(&mut self, ctx: &mut NavigationContext, target: f32) {
        let target = target.clamp(ctx.config.zoom.min_level, ctx.config.zoom.max_level);
        self.zoom_target = Some(target);
        let gap = (target - ctx.state.get().zoom_level).abs();
        let ramp = ctx.config.zoom.ramp_factor.clamp(1e-3, 0.999);
        let epsilon = ctx.config.zoom.snap_epsilon.max(1e-3);
        let ticks = if gap <= epsilon {
            1.0
        } else {
            ((epsilon / gap).ln() / (1.0 - ramp).ln()).ceil()
        };
        let duration = ticks as u32 * ctx.config.transition.tick_ms;
        ctx.tweens.begin(TweenName::ZoomRamp, duration);
    }

    /// Zoom ramp tick. Each step closes a fixed fraction of the remaining
    /// gap and the ramp snaps onto the target once within one level of it.
    pub fn apply_zoom_ramp(&mut self, ctx: &mut NavigationContext, done: bool) {
        let Some(target) = self.zoom_target else {
            return;
        };
        let current = ctx.state.get().zoom_level;
        self.handle_zoom(ctx, (target - current) * ctx.config.zoom.ramp_factor);

        let landed = ctx.state.get().zoom_level;
        if done || (landed - target).abs() < ctx.config.zoom.snap_epsilon {
            self.handle_zoom(ctx, target - landed);
            ctx.tweens.cancel(TweenName::ZoomRamp);
            self.zoom_target = None;
        }
    }

    /// Warms the cache for the nodes around a target so the next few
    /// steps start with their panoramas already local.
    pub fn preload_nearest_nodes(&mut self, ctx: &mut NavigationContext, uuid: &str) {
        let snapshot = ctx.state.get();
        if snapshot.debug_mode {
            eprintln!("[nav] preloading around {uuid}");
        }
        let count = ctx.config.preload.count_for_device(ctx.config.mobile);
        let nearest: Vec<String> = ctx
            .graph
            .nearest_nodes(uuid, count)
            .into_iter()
            .map(|node| node.uuid.clone())
            .collect();
        for near in nearest {
            ctx.cache.request_node_faces(&near, TextureTier::Preview);
        }
    }

    /// Navigates once the target's preview faces are resolved. If they are
    /// already local this is immediate; otherwise the node is parked
    /// behind a loading indicator and either finishes when the faces land
    /// or gives up after the load timeout.
    pub fn navigate_when_ready(&mut self, ctx: &mut NavigationContext, uuid: &str) {
        if ctx.cache.node_resolved(uuid, TextureTier::Preview) {
            self.handle_navigation(ctx, uuid, NavigationOptions::default());
        } else {
            ctx.hooks.loading_indicator(true);
            ctx.cache.request_node_faces(uuid, TextureTier::Preview);
            self.pending_load = Some(uuid.to_string());
            ctx.tweens
                .begin(TweenName::LoadTimeout, ctx.config.preload.load_timeout_ms);
        }
        self.preload_nearest_nodes(ctx, uuid);
    }

    /// Called after the cache pump. Resolves a parked navigation as soon
    /// as its faces are in, win or lose.
    pub fn poll_pending_load(&mut self, ctx: &mut NavigationContext) {
        let Some(uuid) = self.pending_load.clone() else {
            return;
        };
        if !ctx.cache.node_resolved(&uuid, TextureTier::Preview) {
            return;
        }
        ctx.tweens.cancel(TweenName::LoadTimeout);
        ctx.hooks.loading_indicator(false);
        self.pending_load = None;
        self.handle_navigation(ctx, &uuid, NavigationOptions::default());
    }

    /// Load timeout fired before the faces arrived. The parked navigation
    /// is dropped; a resolution landing later is ignored.
    pub fn handle_load_timeout(&mut self, ctx: &mut NavigationContext) {
        if let Some(uuid) = self.pending_load.take() {
            eprintln!("[nav] giving up on textures for {uuid}");
            ctx.hooks.loading_indicator(false);
        }
    }
}

impl Default for NavigationController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_walk_in_first_person() {
        let options = NavigationOptions::default();
        assert_eq!(options.view_mode, ViewMode::Fpv);
        assert!(options.orbit_target.is_none());
        assert!(options.distance.is_none());
        assert!(!options.no_dollhouse);
    }

    #[test]
    fn set_view_mode_defaults_lerp_on() {
        let options = SetViewModeOptions::default();
        assert!(options.do_lerp);
        assert!(!options.no_dollhouse);
    }
}
