use smallvec::SmallVec;

/// Every timed ramp in the viewer runs through one scheduler so a single
/// fixed step drives crossfades, zoom ramps, cursor fades, and load
/// timeouts alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TweenName {
    Crossfade,
    ZoomRamp,
    CursorFade,
    ViewModeFade,
    NavigationReveal,
    LoadTimeout,
}

impl TweenName {
    pub fn label(self) -> &'static str {
        match self {
            TweenName::Crossfade => "crossfade",
            TweenName::ZoomRamp => "zoom-ramp",
            TweenName::CursorFade => "cursor-fade",
            TweenName::ViewModeFade => "view-mode-fade",
            TweenName::NavigationReveal => "navigation-reveal",
            TweenName::LoadTimeout => "load-timeout",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TweenStep {
    pub name: TweenName,
    /// Linear progress in [0, 1] after this step.
    pub progress: f32,
    pub done: bool,
}

#[derive(Debug, Clone, Copy)]
struct ActiveTween {
    name: TweenName,
    elapsed_ms: u32,
    duration_ms: u32,
}

/// Fixed-step tween clock. Real frame deltas accumulate and are consumed in
/// whole ticks; leftover time carries to the next frame. At most one tween
/// per name is active; starting a name again restarts it.
pub struct TweenScheduler {
    tick_ms: u32,
    carry_ms: f32,
    active: Vec<ActiveTween>,
}

/// Frame hitches longer than this many ticks are dropped rather than
/// replayed as a burst of catch-up steps.
const MAX_BACKLOG_TICKS: u32 = 25;

impl TweenScheduler {
    pub fn new(tick_ms: u32) -> Self {
        Self { tick_ms: tick_ms.max(1), carry_ms: 0.0, active: Vec::new() }
    }

    pub fn begin(&mut self, name: TweenName, duration_ms: u32) {
        self.cancel(name);
        self.active.push(ActiveTween { name, elapsed_ms: 0, duration_ms });
    }

    pub fn cancel(&mut self, name: TweenName) -> bool {
        let before = self.active.len();
        self.active.retain(|tween| tween.name != name);
        before != self.active.len()
    }

    pub fn is_active(&self, name: TweenName) -> bool {
        self.active.iter().any(|tween| tween.name == name)
    }

    /// Advances by a real frame delta and returns one step per elapsed tick
    /// per active tween, in tween start order. A finished tween emits its
    /// final step with `done` set and is removed.
    pub fn advance(&mut self, dt_seconds: f32) -> SmallVec<[TweenStep; 8]> {
        let mut steps = SmallVec::new();
        self.carry_ms += dt_seconds.max(0.0) * 1000.0;
        let max_backlog = (self.tick_ms * MAX_BACKLOG_TICKS) as f32;
        if self.carry_ms > max_backlog {
            self.carry_ms = max_backlog;
        }
        while self.carry_ms >= self.tick_ms as f32 {
            self.carry_ms -= self.tick_ms as f32;
            for tween in self.active.iter_mut() {
                tween.elapsed_ms += self.tick_ms;
                let progress = if tween.duration_ms == 0 {
                    1.0
                } else {
                    (tween.elapsed_ms as f32 / tween.duration_ms as f32).min(1.0)
                };
                steps.push(TweenStep {
                    name: tween.name,
                    progress,
                    done: tween.elapsed_ms >= tween.duration_ms,
                });
            }
            self.active.retain(|tween| tween.elapsed_ms < tween.duration_ms);
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_ticks_carry_between_frames() {
        let mut tweens = TweenScheduler::new(20);
        tweens.begin(TweenName::Crossfade, 900);
        assert!(tweens.advance(0.010).is_empty());
        let steps = tweens.advance(0.010);
        assert_eq!(steps.len(), 1);
        assert!((steps[0].progress - 20.0 / 900.0).abs() < 1e-6);
        assert!(!steps[0].done);
    }

    #[test]
    fn long_frame_emits_multiple_steps() {
        let mut tweens = TweenScheduler::new(20);
        tweens.begin(TweenName::ZoomRamp, 200);
        let steps = tweens.advance(0.05);
        assert_eq!(steps.len(), 2);
        assert!(steps[1].progress > steps[0].progress);
    }

    #[test]
    fn crossfade_finishes_exactly_once() {
        let mut tweens = TweenScheduler::new(20);
        tweens.begin(TweenName::Crossfade, 900);
        let mut done_count = 0;
        let mut last_progress = 0.0;
        for _ in 0..60 {
            for step in tweens.advance(0.020) {
                if step.done {
                    done_count += 1;
                    last_progress = step.progress;
                }
            }
        }
        assert_eq!(done_count, 1);
        assert!((last_progress - 1.0).abs() < 1e-6);
        assert!(!tweens.is_active(TweenName::Crossfade));
    }

    #[test]
    fn cancel_stops_future_steps() {
        let mut tweens = TweenScheduler::new(20);
        tweens.begin(TweenName::LoadTimeout, 10_000);
        assert!(tweens.cancel(TweenName::LoadTimeout));
        assert!(!tweens.cancel(TweenName::LoadTimeout));
        assert!(tweens.advance(1.0).is_empty());
    }

    #[test]
    fn begin_restarts_an_active_tween() {
        let mut tweens = TweenScheduler::new(20);
        tweens.begin(TweenName::CursorFade, 200);
        let _ = tweens.advance(0.1);
        tweens.begin(TweenName::CursorFade, 200);
        let steps = tweens.advance(0.020);
        assert_eq!(steps.len(), 1);
        assert!((steps[0].progress - 0.1).abs() < 1e-6);
    }

    #[test]
    fn zero_duration_completes_on_first_tick() {
        let mut tweens = TweenScheduler::new(20);
        tweens.begin(TweenName::ViewModeFade, 0);
        let steps = tweens.advance(0.020);
        assert_eq!(steps.len(), 1);
        assert!(steps[0].done);
        assert!((steps[0].progress - 1.0).abs() < 1e-6);
    }

    #[test]
    fn hitch_backlog_is_clamped() {
        let mut tweens = TweenScheduler::new(20);
        tweens.begin(TweenName::Crossfade, 900);
        // A five-second stall must not replay five seconds of steps.
        let steps = tweens.advance(5.0);
        assert_eq!(steps.len() as u32, MAX_BACKLOG_TICKS);
    }
}
