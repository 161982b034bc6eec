use glam::Vec2;
use std::collections::HashMap;
use winit::event::{DeviceEvent, ElementState, MouseButton, MouseScrollDelta, TouchPhase, WindowEvent};
use winit::keyboard::Key;

use crate::config::PickingConfig;

/// One wheel notch maps to this much zoom-level change in first-person view.
pub const WHEEL_ZOOM_STEP: f32 = 10.0;
/// Pinch gap change in pixels is scaled by this before it reaches the zoom ramp.
pub const PINCH_ZOOM_SPEED: f32 = 0.3;

pub enum PointerEvent {
    Key { key: Key, pressed: bool },
    CursorPos { x: f32, y: f32 },
    MouseButton { button: MouseButton, pressed: bool },
    MouseMove { dx: f32, dy: f32 },
    Wheel { delta: f32 },
    TouchPoint { id: u64, phase: TouchPhase, x: f32, y: f32 },
    Other,
}

impl PointerEvent {
    pub fn from_window_event(ev: &WindowEvent) -> Self {
        match ev {
            WindowEvent::MouseWheel { delta, .. } => {
                let d = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(p) => p.y as f32,
                };
                PointerEvent::Wheel { delta: d }
            }
            WindowEvent::CursorMoved { position, .. } => {
                PointerEvent::CursorPos { x: position.x as f32, y: position.y as f32 }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                PointerEvent::MouseButton { button: *button, pressed: *state == ElementState::Pressed }
            }
            WindowEvent::KeyboardInput { event, .. } => PointerEvent::Key {
                key: event.logical_key.clone(),
                pressed: event.state == ElementState::Pressed,
            },
            WindowEvent::Touch(touch) => PointerEvent::TouchPoint {
                id: touch.id,
                phase: touch.phase,
                x: touch.location.x as f32,
                y: touch.location.y as f32,
            },
            _ => PointerEvent::Other,
        }
    }

    pub fn from_device_event(ev: &DeviceEvent) -> Self {
        match ev {
            DeviceEvent::MouseMotion { delta: (dx, dy) } => {
                PointerEvent::MouseMove { dx: *dx as f32, dy: *dy as f32 }
            }
            _ => PointerEvent::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerMove {
    pub position: Vec2,
    pub from_touch: bool,
}

/// Accumulates winit pointer traffic for one frame and resolves press/release
/// pairs into clicks. A release counts as a click only while both axes stay
/// under the drag threshold, so orbit drags never fall through to picking.
pub struct PointerTracker {
    drag_threshold_px: f32,
    cursor_pos: Option<Vec2>,
    press_pos: Option<Vec2>,
    left_pressed: bool,
    right_pressed: bool,
    mouse_delta: Vec2,
    wheel: f32,
    click: Option<Vec2>,
    moved: Option<PointerMove>,
    touches: HashMap<u64, Vec2>,
    pinch_gap: Option<f32>,
    pinch_delta: f32,
    debug_toggle_pressed: bool,
}

impl PointerTracker {
    pub fn new(config: &PickingConfig) -> Self {
        Self {
            drag_threshold_px: config.drag_threshold_px,
            cursor_pos: None,
            press_pos: None,
            left_pressed: false,
            right_pressed: false,
            mouse_delta: Vec2::ZERO,
            wheel: 0.0,
            click: None,
            moved: None,
            touches: HashMap::new(),
            pinch_gap: None,
            pinch_delta: 0.0,
            debug_toggle_pressed: false,
        }
    }

    pub fn push(&mut self, ev: PointerEvent) {
        match ev {
            PointerEvent::Key { key, pressed } => {
                if pressed {
                    if let Key::Character(ch) = &key {
                        if ch.as_str() == "\\" {
                            self.debug_toggle_pressed = true;
                        }
                    }
                }
            }
            PointerEvent::CursorPos { x, y } => {
                let pos = Vec2::new(x, y);
                self.cursor_pos = Some(pos);
                self.moved = Some(PointerMove { position: pos, from_touch: false });
            }
            PointerEvent::MouseButton { button, pressed } => match button {
                MouseButton::Left => {
                    if pressed {
                        self.left_pressed = true;
                        self.press_pos = self.cursor_pos;
                    } else {
                        self.left_pressed = false;
                        self.finish_press(self.cursor_pos);
                    }
                }
                MouseButton::Right => {
                    self.right_pressed = pressed;
                }
                _ => {}
            },
            PointerEvent::MouseMove { dx, dy } => {
                self.mouse_delta += Vec2::new(dx, dy);
            }
            PointerEvent::Wheel { delta } => {
                self.wheel += delta;
            }
            PointerEvent::TouchPoint { id, phase, x, y } => {
                self.push_touch(id, phase, Vec2::new(x, y));
            }
            PointerEvent::Other => {}
        }
    }

    fn push_touch(&mut self, id: u64, phase: TouchPhase, pos: Vec2) {
        match phase {
            TouchPhase::Started => {
                if self.touches.is_empty() {
                    self.press_pos = Some(pos);
                }
                self.touches.insert(id, pos);
                self.cursor_pos = Some(pos);
            }
            TouchPhase::Moved => {
                let previous = self.touches.insert(id, pos);
                self.cursor_pos = Some(pos);
                if self.touches.len() == 2 {
                    if let Some(gap) = self.current_pinch_gap() {
                        let start = self.pinch_gap.unwrap_or(gap);
                        self.pinch_delta += gap - start;
                        self.pinch_gap = Some(gap);
                    }
                } else {
                    self.moved = Some(PointerMove { position: pos, from_touch: true });
                    if let Some(previous) = previous {
                        self.mouse_delta += pos - previous;
                    }
                }
            }
            TouchPhase::Ended => {
                self.touches.remove(&id);
                self.finish_press(Some(pos));
                if self.touches.len() < 2 {
                    self.pinch_gap = None;
                }
            }
            TouchPhase::Cancelled => {
                self.touches.remove(&id);
                self.press_pos = None;
                if self.touches.len() < 2 {
                    self.pinch_gap = None;
                }
            }
        }
    }

    fn current_pinch_gap(&self) -> Option<f32> {
        let mut points = self.touches.values();
        let a = points.next()?;
        let b = points.next()?;
        Some(a.distance(*b))
    }

    fn finish_press(&mut self, release: Option<Vec2>) {
        let (Some(down), Some(up)) = (self.press_pos.take(), release) else {
            return;
        };
        let delta = up - down;
        if delta.x.abs() < self.drag_threshold_px && delta.y.abs() < self.drag_threshold_px {
            self.click = Some(up);
        }
    }

    pub fn clear_frame(&mut self) {
        self.mouse_delta = Vec2::ZERO;
        self.wheel = 0.0;
        self.click = None;
        self.moved = None;
        self.pinch_delta = 0.0;
        self.debug_toggle_pressed = false;
    }

    pub fn take_click(&mut self) -> Option<Vec2> {
        self.click.take()
    }

    pub fn take_pointer_move(&mut self) -> Option<PointerMove> {
        self.moved.take()
    }

    pub fn take_mouse_delta(&mut self) -> Vec2 {
        let d = self.mouse_delta;
        self.mouse_delta = Vec2::ZERO;
        d
    }

    pub fn consume_wheel_delta(&mut self) -> Option<f32> {
        if self.wheel.abs() > 0.0 {
            let d = self.wheel;
            self.wheel = 0.0;
            Some(d)
        } else {
            None
        }
    }

    pub fn take_pinch_zoom(&mut self) -> Option<f32> {
        if self.pinch_delta.abs() > 0.0 {
            let d = self.pinch_delta * PINCH_ZOOM_SPEED;
            self.pinch_delta = 0.0;
            Some(d)
        } else {
            None
        }
    }

    pub fn take_debug_toggle(&mut self) -> bool {
        let pressed = self.debug_toggle_pressed;
        self.debug_toggle_pressed = false;
        pressed
    }

    pub fn left_held(&self) -> bool {
        self.left_pressed
    }

    pub fn right_held(&self) -> bool {
        self.right_pressed
    }

    pub fn touch_drag_active(&self) -> bool {
        self.touches.len() == 1
    }

    pub fn cursor_position(&self) -> Option<Vec2> {
        self.cursor_pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> PointerTracker {
        PointerTracker::new(&PickingConfig::default())
    }

    fn press_release(t: &mut PointerTracker, down: Vec2, up: Vec2) {
        t.push(PointerEvent::CursorPos { x: down.x, y: down.y });
        t.push(PointerEvent::MouseButton { button: MouseButton::Left, pressed: true });
        t.push(PointerEvent::CursorPos { x: up.x, y: up.y });
        t.push(PointerEvent::MouseButton { button: MouseButton::Left, pressed: false });
    }

    #[test]
    fn short_press_is_a_click_at_the_release_point() {
        let mut t = tracker();
        press_release(&mut t, Vec2::new(100.0, 100.0), Vec2::new(102.0, 99.0));
        assert_eq!(t.take_click(), Some(Vec2::new(102.0, 99.0)));
        assert_eq!(t.take_click(), None);
    }

    #[test]
    fn drag_on_either_axis_suppresses_the_click() {
        let mut t = tracker();
        press_release(&mut t, Vec2::new(100.0, 100.0), Vec2::new(100.0, 107.0));
        assert_eq!(t.take_click(), None);

        press_release(&mut t, Vec2::new(100.0, 100.0), Vec2::new(93.0, 100.0));
        assert_eq!(t.take_click(), None);
    }

    #[test]
    fn touch_tap_follows_the_same_threshold() {
        let mut t = tracker();
        t.push(PointerEvent::TouchPoint { id: 7, phase: TouchPhase::Started, x: 40.0, y: 40.0 });
        t.push(PointerEvent::TouchPoint { id: 7, phase: TouchPhase::Ended, x: 41.0, y: 42.0 });
        assert_eq!(t.take_click(), Some(Vec2::new(41.0, 42.0)));

        t.push(PointerEvent::TouchPoint { id: 8, phase: TouchPhase::Started, x: 40.0, y: 40.0 });
        t.push(PointerEvent::TouchPoint { id: 8, phase: TouchPhase::Moved, x: 80.0, y: 40.0 });
        t.push(PointerEvent::TouchPoint { id: 8, phase: TouchPhase::Ended, x: 80.0, y: 40.0 });
        assert_eq!(t.take_click(), None);
    }

    #[test]
    fn single_touch_move_reports_a_touch_hover_and_drag_delta() {
        let mut t = tracker();
        t.push(PointerEvent::TouchPoint { id: 1, phase: TouchPhase::Started, x: 10.0, y: 10.0 });
        t.push(PointerEvent::TouchPoint { id: 1, phase: TouchPhase::Moved, x: 16.0, y: 12.0 });
        let moved = t.take_pointer_move().unwrap();
        assert!(moved.from_touch);
        assert_eq!(moved.position, Vec2::new(16.0, 12.0));
        assert_eq!(t.take_mouse_delta(), Vec2::new(6.0, 2.0));
    }

    #[test]
    fn pinch_accumulates_gap_changes_and_resets_when_a_finger_lifts() {
        let mut t = tracker();
        t.push(PointerEvent::TouchPoint { id: 1, phase: TouchPhase::Started, x: 0.0, y: 0.0 });
        t.push(PointerEvent::TouchPoint { id: 2, phase: TouchPhase::Started, x: 100.0, y: 0.0 });
        // First two-finger move only records the baseline gap.
        t.push(PointerEvent::TouchPoint { id: 2, phase: TouchPhase::Moved, x: 100.0, y: 0.0 });
        assert_eq!(t.take_pinch_zoom(), None);

        t.push(PointerEvent::TouchPoint { id: 2, phase: TouchPhase::Moved, x: 140.0, y: 0.0 });
        let zoom = t.take_pinch_zoom().unwrap();
        assert!((zoom - 40.0 * PINCH_ZOOM_SPEED).abs() < 1e-4);

        t.push(PointerEvent::TouchPoint { id: 2, phase: TouchPhase::Ended, x: 140.0, y: 0.0 });
        t.push(PointerEvent::TouchPoint { id: 3, phase: TouchPhase::Started, x: 50.0, y: 0.0 });
        t.push(PointerEvent::TouchPoint { id: 3, phase: TouchPhase::Moved, x: 50.0, y: 0.0 });
        // New gesture starts from a fresh baseline instead of the stale gap.
        assert_eq!(t.take_pinch_zoom(), None);
    }

    #[test]
    fn backslash_key_arms_the_debug_toggle_once() {
        let mut t = tracker();
        t.push(PointerEvent::Key { key: Key::Character("\\".into()), pressed: true });
        assert!(t.take_debug_toggle());
        assert!(!t.take_debug_toggle());

        t.push(PointerEvent::Key { key: Key::Character("\\".into()), pressed: false });
        assert!(!t.take_debug_toggle());
    }

    #[test]
    fn wheel_notches_accumulate_until_consumed() {
        let mut t = tracker();
        t.push(PointerEvent::Wheel { delta: 1.0 });
        t.push(PointerEvent::Wheel { delta: 1.0 });
        assert_eq!(t.consume_wheel_delta(), Some(2.0));
        assert_eq!(t.consume_wheel_delta(), None);
    }
}
