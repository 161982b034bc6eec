use anyhow::{anyhow, Result};
use glam::Vec2;
use winit::dpi::PhysicalSize;
use winit::event::{DeviceEvent, WindowEvent};

use crate::camera_rig::{camera_angles, Camera, CameraRig};
use crate::config::ViewerConfig;
use crate::env_cube::EnvCubePair;
use crate::exterior::ExteriorModel;
use crate::input::{PointerEvent, PointerTracker, WHEEL_ZOOM_STEP};
use crate::interaction::{CursorDecal, PointerInteraction, ScreenRect};
use crate::navigation::{
    NavigationContext, NavigationController, NavigationOptions, SetViewModeOptions,
};
use crate::nodes::NodeGraph;
use crate::space::SpaceData;
use crate::state::{SharedState, Snapshot, StateHandle, StateUpdate, ViewMode};
use crate::texture_cache::{TextureCache, TextureLoader};
use crate::tween::{TweenName, TweenScheduler, TweenStep};

/// Wheel and pinch dolly scale per step while orbiting, matching the feel
/// of the first-person zoom ramp.
const ORBIT_DOLLY_SCALE: f32 = 0.95;
/// A stalled frame never replays more than this many fixed ticks.
const MAX_TICK_BACKLOG: u32 = 25;

/// Host callbacks for the chrome the engine deliberately does not own:
/// loading indicators, flashlight overlays, auxiliary layers that fade with
/// the view mode. Every method has a no-op default so embedders implement
/// only what they render.
pub trait ViewerHooks {
    fn view_mode_changed(&mut self, _mode: ViewMode) {}
    fn navigation_started(&mut self, _uuid: &str) {}
    fn flashlight_toggled(&mut self, _on: bool) {}
    fn loading_indicator(&mut self, _visible: bool) {}
}

/// Hook sink for embedders that render no chrome at all.
#[derive(Default)]
pub struct NoopHooks;

impl ViewerHooks for NoopHooks {}

pub struct ViewerParams {
    pub config: ViewerConfig,
    pub space: SpaceData,
    pub loader: Box<dyn TextureLoader>,
    pub exterior: Option<ExteriorModel>,
    pub hooks: Box<dyn ViewerHooks>,
}

/// The whole engine behind one facade: owns the camera rig, the panorama
/// cube pair, the node graph, the texture cache, and the controllers that
/// move between them. Hosts feed it window events and frame deltas and read
/// back camera matrices and scene objects to draw.
pub struct Viewer {
    config: ViewerConfig,
    state: StateHandle,
    space: SpaceData,
    rig: CameraRig,
    cubes: EnvCubePair,
    cache: TextureCache,
    graph: NodeGraph,
    exterior: Option<ExteriorModel>,
    tweens: TweenScheduler,
    navigation: NavigationController,
    interaction: PointerInteraction,
    tracker: PointerTracker,
    hooks: Box<dyn ViewerHooks>,
    viewport: PhysicalSize<u32>,
    tick_carry_ms: f32,
}

impl Viewer {
    pub fn new(params: ViewerParams) -> Result<Self> {
        let ViewerParams { config, space, loader, exterior, hooks } = params;

        let initial = space
            .initial_node()
            .ok_or_else(|| anyhow!("space has no usable nodes"))?;
        let initial_uuid = initial.uuid.clone();

        let state = SharedState::new(Snapshot {
            current_node: Some(initial_uuid.clone()),
            ..Snapshot::default()
        });
        let snapshot = state.get();

        let mut cache = TextureCache::new(&config.textures, loader);
        cache.set_version(space.version.clone());

        let orbit_target = space
            .initial_orbit_target()
            .ok_or_else(|| anyhow!("space has no usable nodes"))?;
        let position = space
            .initial_camera_position(config.orbit.fpv_distance)
            .unwrap_or(orbit_target);
        let fov = config.zoom.fov_for_level(snapshot.zoom_level);
        let rig = CameraRig::new(
            position,
            space.initial_rotation,
            orbit_target,
            fov,
            snapshot.view_mode,
            &config,
        );

        let mut graph = NodeGraph::new(&space, &initial_uuid, &config.markers);
        graph.handle_toggle_view_mode(snapshot.view_mode);

        let node_rotation = graph
            .find(&initial_uuid)
            .map(|node| node.rotation)
            .unwrap_or_default();
        let mut cubes = EnvCubePair::new(&initial_uuid, node_rotation, position, &mut cache);
        cubes.set_render_order(snapshot.view_mode, snapshot.debug_mode);

        let mut exterior = exterior;
        if let Some(exterior) = exterior.as_mut() {
            exterior.update_transparency(snapshot.view_mode, snapshot.debug_mode);
            graph.update_floor_marker_positions(exterior);
        }

        let interaction = PointerInteraction::new(&config);
        let tracker = PointerTracker::new(&config.picking);
        let tweens = TweenScheduler::new(config.transition.tick_ms);

        let mut viewer = Self {
            config,
            state,
            space,
            rig,
            cubes,
            cache,
            graph,
            exterior,
            tweens,
            navigation: NavigationController::new(),
            interaction,
            tracker,
            hooks,
            viewport: PhysicalSize::new(1280, 720),
            tick_carry_ms: 0.0,
        };

        let (nav, _, mut ctx) = viewer.split_context();
        nav.preload_nearest_nodes(&mut ctx, &initial_uuid);
        Ok(viewer)
    }

    /// Shared state handle; hosts subscribe here for UI updates.
    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.get()
    }

    pub fn space(&self) -> &SpaceData {
        &self.space
    }

    pub fn camera(&self) -> &Camera {
        &self.rig.camera
    }

    pub fn cubes(&self) -> &EnvCubePair {
        &self.cubes
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    pub fn exterior(&self) -> Option<&ExteriorModel> {
        self.exterior.as_ref()
    }

    pub fn cursor(&self) -> &CursorDecal {
        &self.interaction.cursor
    }

    pub fn cache(&self) -> &TextureCache {
        &self.cache
    }

    pub fn viewport(&self) -> PhysicalSize<u32> {
        self.viewport
    }

    /// True while a camera glide, a crossfade, or a deferred navigation
    /// waiting on textures is still in flight.
    pub fn is_transitioning(&self) -> bool {
        self.rig.is_lerping()
            || self.state.get().is_navigating
            || self.navigation.pending_load().is_some()
    }

    pub fn set_viewport(&mut self, size: PhysicalSize<u32>) {
        if size.width > 0 && size.height > 0 {
            self.viewport = size;
        }
    }

    /// Screen regions owned by host chrome; pointer hits inside them never
    /// reach the scene.
    pub fn set_exclusion_rects(&mut self, rects: Vec<ScreenRect>) {
        self.interaction.set_exclusion_rects(rects);
    }

    pub fn handle_window_event(&mut self, event: &WindowEvent) {
        if let WindowEvent::Resized(size) = event {
            self.set_viewport(*size);
        }
        self.tracker.push(PointerEvent::from_window_event(event));
    }

    pub fn handle_device_event(&mut self, event: &DeviceEvent) {
        self.tracker.push(PointerEvent::from_device_event(event));
    }

    /// One frame: drains pointer input, runs the fixed transition ticks,
    /// routes finished texture loads, and advances the cursor idle clock.
    pub fn update(&mut self, dt_seconds: f32) {
        self.process_input();
        self.run_ticks(dt_seconds);
        self.pump_textures();

        let snapshot = self.state.get();
        self.cubes.update(
            &mut self.cache,
            self.rig.camera.forward(),
            self.config.mobile,
            snapshot.is_navigating,
        );

        let (_, interaction, mut ctx) = self.split_context();
        interaction.advance_idle(&mut ctx, dt_seconds);
    }

    fn process_input(&mut self) {
        if self.tracker.take_debug_toggle() {
            self.toggle_debug_mode();
        }

        if let Some(moved) = self.tracker.take_pointer_move() {
            let viewport = self.viewport;
            let (_, interaction, mut ctx) = self.split_context();
            interaction.process_interaction_move(&mut ctx, moved.position, viewport);
            if moved.from_touch {
                interaction.clear_cursor();
            }
        }

        if let Some(screen) = self.tracker.take_click() {
            let viewport = self.viewport;
            let (nav, interaction, mut ctx) = self.split_context();
            interaction.process_interaction_click(nav, &mut ctx, screen, viewport);
        }

        let drag = self.tracker.take_mouse_delta();
        if drag != Vec2::ZERO {
            let height = self.viewport.height as f32;
            if self.tracker.left_held() || self.tracker.touch_drag_active() {
                self.rig.orbit(drag, height);
            } else if self.tracker.right_held() {
                self.rig.pan(drag, height);
            }
        }

        if let Some(delta) = self.tracker.consume_wheel_delta() {
            match self.state.get().view_mode {
                // Wheel up tightens the field of view.
                ViewMode::Fpv => {
                    let amount = if delta > 0.0 { WHEEL_ZOOM_STEP } else { -WHEEL_ZOOM_STEP };
                    self.handle_zoom(amount);
                }
                ViewMode::Orbit => {
                    let factor =
                        if delta > 0.0 { ORBIT_DOLLY_SCALE } else { 1.0 / ORBIT_DOLLY_SCALE };
                    self.rig.dolly(factor);
                }
            }
        }

        if let Some(amount) = self.tracker.take_pinch_zoom() {
            match self.state.get().view_mode {
                ViewMode::Fpv => self.handle_zoom(amount),
                ViewMode::Orbit => {
                    let factor =
                        if amount > 0.0 { ORBIT_DOLLY_SCALE } else { 1.0 / ORBIT_DOLLY_SCALE };
                    self.rig.dolly(factor);
                }
            }
        }

        self.tracker.clear_frame();
    }

    fn run_ticks(&mut self, dt_seconds: f32) {
        let tick_ms = self.config.transition.tick_ms.max(1);
        self.tick_carry_ms += dt_seconds.max(0.0) * 1000.0;
        let max_backlog = (tick_ms * MAX_TICK_BACKLOG) as f32;
        if self.tick_carry_ms > max_backlog {
            self.tick_carry_ms = max_backlog;
        }

        let tick_seconds = tick_ms as f32 / 1000.0;
        while self.tick_carry_ms >= tick_ms as f32 {
            self.tick_carry_ms -= tick_ms as f32;

            let snapshot = self.state.get();
            let moved = self.rig.update(snapshot.view_mode, snapshot.debug_mode);
            if moved {
                self.cubes.set_position(self.rig.camera.position);
            }

            let steps = self.tweens.advance(tick_seconds);
            for step in steps {
                self.apply_tween_step(step);
            }
        }
    }

    fn apply_tween_step(&mut self, step: TweenStep) {
        match step.name {
            TweenName::Crossfade => {
                let (nav, _, mut ctx) = self.split_context();
                nav.apply_crossfade(&mut ctx, step.progress, step.done);
            }
            TweenName::ZoomRamp => {
                let (nav, _, mut ctx) = self.split_context();
                nav.apply_zoom_ramp(&mut ctx, step.done);
            }
            TweenName::CursorFade => {
                let (_, interaction, ctx) = self.split_context();
                interaction.apply_cursor_fade(&ctx, step.progress, step.done);
            }
            TweenName::ViewModeFade => {
                self.cubes.apply_fade(step.progress, step.done);
            }
            TweenName::NavigationReveal => {
                let snapshot = self.state.get();
                if let Some(exterior) = self.exterior.as_mut() {
                    exterior.set_reveal_progress(step.progress);
                    if step.done {
                        exterior.end_navigation_reveal(snapshot.view_mode, snapshot.debug_mode);
                    }
                }
            }
            TweenName::LoadTimeout => {
                if step.done {
                    let (nav, _, mut ctx) = self.split_context();
                    nav.handle_load_timeout(&mut ctx);
                }
            }
        }
    }

    fn pump_textures(&mut self) {
        let events = self.cache.pump();
        if events.is_empty() {
            return;
        }
        let is_navigating = self.state.get().is_navigating;
        for event in &events {
            self.cubes.apply_texture_event(event, is_navigating);
        }
        let (nav, _, mut ctx) = self.split_context();
        nav.poll_pending_load(&mut ctx);
    }

    /// Jumps straight into a navigation, bypassing the preview-load gate.
    pub fn navigate_to(&mut self, uuid: &str, options: NavigationOptions) {
        let (nav, _, mut ctx) = self.split_context();
        nav.handle_navigation(&mut ctx, uuid, options);
    }

    /// Navigates once the target's preview faces are in, showing the
    /// loading indicator in the meantime. The path marker clicks take.
    pub fn navigate_when_ready(&mut self, uuid: &str) {
        let (nav, _, mut ctx) = self.split_context();
        nav.navigate_when_ready(&mut ctx, uuid);
    }

    pub fn toggle_view_mode(&mut self) {
        let (nav, _, mut ctx) = self.split_context();
        nav.toggle_view_mode(&mut ctx);
    }

    pub fn set_view_mode(&mut self, mode: ViewMode, options: SetViewModeOptions) {
        let (nav, _, mut ctx) = self.split_context();
        nav.set_view_mode(&mut ctx, mode, options);
    }

    pub fn handle_zoom(&mut self, amount: f32) {
        let (nav, _, mut ctx) = self.split_context();
        nav.handle_zoom(&mut ctx, amount);
    }

    pub fn lerp_to_zoom(&mut self, target: f32) {
        let (nav, _, mut ctx) = self.split_context();
        nav.lerp_to_zoom(&mut ctx, target);
    }

    pub fn preload_nearest_nodes(&mut self, uuid: &str) {
        let target = uuid.to_string();
        let (nav, _, mut ctx) = self.split_context();
        nav.preload_nearest_nodes(&mut ctx, &target);
    }

    pub fn toggle_debug_mode(&mut self) {
        let snapshot = self.state.get();
        let debug_mode = !snapshot.debug_mode;
        eprintln!("[viewer] debug mode {}", if debug_mode { "on" } else { "off" });
        self.state.set(StateUpdate { debug_mode: Some(debug_mode), ..StateUpdate::default() });

        if let Some(exterior) = self.exterior.as_mut() {
            exterior.handle_toggle_debug_mode(snapshot.view_mode, debug_mode);
        }
        self.graph.handle_toggle_debug_mode(debug_mode);
        self.cubes.handle_toggle_debug_mode(snapshot.view_mode, debug_mode);
    }

    /// One-line pose readout for overlay hosts while debug mode is on.
    pub fn debug_summary(&self) -> String {
        let snapshot = self.state.get();
        let position = self.rig.camera.position;
        let (azimuth, polar) = camera_angles(self.rig.camera.orientation);
        format!(
            "node {} | {} | pos ({:.2}, {:.2}, {:.2}) | az {:.1} polar {:.1} | zoom {:.0}{}",
            snapshot.current_node.as_deref().unwrap_or("-"),
            snapshot.view_mode.label(),
            position.x,
            position.y,
            position.z,
            azimuth,
            polar,
            snapshot.zoom_level,
            if snapshot.is_navigating { " | navigating" } else { "" },
        )
    }

    fn split_context(
        &mut self,
    ) -> (&mut NavigationController, &mut PointerInteraction, NavigationContext<'_>) {
        (
            &mut self.navigation,
            &mut self.interaction,
            NavigationContext {
                config: &self.config,
                state: &self.state,
                rig: &mut self.rig,
                cubes: &mut self.cubes,
                cache: &mut self.cache,
                graph: &mut self.graph,
                exterior: self.exterior.as_mut(),
                tweens: &mut self.tweens,
                hooks: &mut *self.hooks,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::{NodeRecord, SpaceData};
    use crate::texture_cache::{BlockingTextureLoader, TextureFetcher};
    use anyhow::Result;
    use glam::Vec3;
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;

    struct PngFetcher;

    impl TextureFetcher for PngFetcher {
        fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
            let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([9, 9, 9, 255]));
            let mut bytes = Vec::new();
            img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
                .unwrap();
            Ok(bytes)
        }
    }

    fn node(uuid: &str, x: f32, z: f32) -> NodeRecord {
        NodeRecord {
            uuid: uuid.to_string(),
            position: Vec3::new(x, 1.5, z).into(),
            rotation: Vec3::ZERO.into(),
            floor_position: Vec3::new(x, 0.0, z).into(),
            image: format!("spaces/demo/{uuid}"),
        }
    }

    fn demo_space() -> SpaceData {
        SpaceData {
            version: Some("v2".to_string()),
            initial_node: Some("hall".to_string()),
            nodes: vec![node("hall", 0.0, 0.0), node("stairs", 4.0, 0.0), node("attic", 0.0, 6.0)],
            ..SpaceData::default()
        }
    }

    fn viewer() -> Viewer {
        Viewer::new(ViewerParams {
            config: ViewerConfig::default(),
            space: demo_space(),
            loader: Box::new(BlockingTextureLoader::new(Box::new(PngFetcher))),
            exterior: None,
            hooks: Box::new(NoopHooks),
        })
        .unwrap()
    }

    #[test]
    fn starts_on_the_configured_node_in_first_person() {
        let viewer = viewer();
        let snapshot = viewer.snapshot();
        assert_eq!(snapshot.current_node.as_deref(), Some("hall"));
        assert_eq!(snapshot.view_mode, ViewMode::Fpv);
        assert!(!snapshot.is_navigating);
        assert!((viewer.camera().fov_y_deg - 90.0).abs() < 1e-4);
    }

    #[test]
    fn construction_preloads_preview_faces_for_the_neighborhood() {
        let viewer = viewer();
        // 3 nodes x 6 faces: the initial cube plus the preload pass.
        assert!(viewer.cache().len() >= 18);
    }

    #[test]
    fn crossfade_completes_after_the_transition_duration() {
        let mut viewer = viewer();
        viewer.update(0.02);
        viewer.navigate_when_ready("stairs");
        assert!(viewer.snapshot().is_navigating);

        // 900ms crossfade at 20ms ticks, plus slack for the deferred start.
        for _ in 0..60 {
            viewer.update(0.02);
        }
        let snapshot = viewer.snapshot();
        assert_eq!(snapshot.current_node.as_deref(), Some("stairs"));
        assert!(!snapshot.is_navigating);
        assert_eq!(viewer.cubes().current.node_uuid, "stairs");
    }

    #[test]
    fn state_subscribers_observe_navigation() {
        let mut viewer = viewer();
        let seen: Rc<RefCell<Vec<Option<String>>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        viewer.state().subscribe(move |snapshot| {
            sink.borrow_mut().push(snapshot.current_node.clone());
        });

        viewer.update(0.02);
        viewer.navigate_when_ready("attic");
        assert!(seen.borrow().iter().any(|node| node.as_deref() == Some("attic")));
    }

    #[test]
    fn debug_summary_names_the_current_node_and_mode() {
        let viewer = viewer();
        let summary = viewer.debug_summary();
        assert!(summary.contains("hall"));
        assert!(summary.contains("FPV"));
    }
}
