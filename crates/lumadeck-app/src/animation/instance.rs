use std::sync::Arc;

use crate::error::Result;
use crate::media::surface::{Rect, Surface};

use super::AnimationDefinition;

/// Upper bound on frames consumed by one `advance` call. Past it the
/// remaining backlog is dropped instead of replayed.
const MAX_CATCH_UP_FRAMES: usize = 4096;

/// Lifecycle of a playback cursor. `Finished` is only reachable for
/// non-looping animations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Idle,
    Playing,
    Finished,
}

/// One live playback cursor over an [`AnimationDefinition`].
///
/// Holds a shared reference to the definition (and through it the sprite
/// sheet); dropping the instance releases only this reference.
#[derive(Debug)]
pub struct AnimationInstance {
    definition: Arc<AnimationDefinition>,
    current_frame: usize,
    last_advance: Option<f64>,
    pulse_accumulator: u32,
    state: PlayState,
}

impl AnimationInstance {
    pub fn new(definition: Arc<AnimationDefinition>) -> Self {
        Self {
            definition,
            current_frame: 0,
            last_advance: None,
            pulse_accumulator: 0,
            state: PlayState::Idle,
        }
    }

    /// A new instance already activated.
    pub fn started(definition: Arc<AnimationDefinition>) -> Self {
        let mut instance = Self::new(definition);
        instance.activate();
        instance
    }

    pub fn definition(&self) -> &Arc<AnimationDefinition> {
        &self.definition
    }

    /// Raw frame index; equals the frame count once a non-looping animation
    /// has finished.
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == PlayState::Finished
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayState::Playing
    }

    /// Frame that `draw` will show.
    pub fn drawn_frame(&self) -> usize {
        self.current_frame
            .min(self.definition.frame_count().saturating_sub(1))
    }

    /// Restart from frame 0 with no timing anchors.
    pub fn activate(&mut self) {
        self.reset();
        self.state = PlayState::Playing;
    }

    /// Halt playback where it stands.
    pub fn stop(&mut self) {
        self.state = PlayState::Idle;
        self.last_advance = None;
        self.pulse_accumulator = 0;
    }

    /// Note released. Retriggering animations rewind to frame 0 and go idle;
    /// the others keep running untouched.
    pub fn deactivate(&mut self) {
        if self.definition.retrigger() {
            self.reset();
            self.state = PlayState::Idle;
        }
    }

    fn reset(&mut self) {
        self.current_frame = 0;
        self.last_advance = None;
        self.pulse_accumulator = 0;
    }

    /// Advance wall-clock timed animations to `now` (ms). Consumes elapsed
    /// time frame by frame using each frame's own interval and carries the
    /// remainder to the next call. Returns the number of frames advanced.
    pub fn advance(&mut self, now: f64, bpm: f64) -> usize {
        if self.state != PlayState::Playing || self.definition.timing().is_pulse_driven() {
            return 0;
        }
        let Some(last) = self.last_advance else {
            self.last_advance = Some(now);
            return 0;
        };
        let mut elapsed = now - last;
        if elapsed < 0.0 {
            self.last_advance = Some(now);
            return 0;
        }

        let mut advanced = 0;
        while let Some(interval) = self.definition.frame_interval_ms(self.current_frame, bpm) {
            if elapsed < interval {
                break;
            }
            elapsed -= interval;
            advanced += 1;
            if self.step() {
                break;
            }
            if advanced >= MAX_CATCH_UP_FRAMES {
                log::debug!("Dropping {elapsed:.1} ms of animation backlog");
                elapsed = 0.0;
                break;
            }
        }
        self.last_advance = Some(now - elapsed);
        advanced
    }

    /// Count one clock pulse for pulse-driven animations. Returns whether a
    /// frame was advanced.
    pub fn on_pulse(&mut self) -> bool {
        if self.state != PlayState::Playing {
            return false;
        }
        let Some(required) = self.definition.pulses_for(self.current_frame) else {
            return false;
        };
        self.pulse_accumulator += 1;
        if self.pulse_accumulator < required {
            return false;
        }
        self.pulse_accumulator = 0;
        self.step();
        true
    }

    /// Move one frame forward. Returns true when the animation finished.
    fn step(&mut self) -> bool {
        let frame_count = self.definition.frame_count();
        self.current_frame += 1;
        if self.current_frame < frame_count {
            return false;
        }
        if self.definition.looping() {
            self.current_frame %= frame_count;
            false
        } else {
            self.current_frame = frame_count;
            self.state = PlayState::Finished;
            true
        }
    }

    /// Draw the current (clamped) frame scaled into `dst`.
    pub fn draw(&self, target: &mut dyn Surface, dst: Rect) -> Result<()> {
        let src = self.definition.frame_rect(self.drawn_frame());
        target.draw_image(self.definition.sheet().pixels(), src, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::test_support::{rate_def, strip_sheet};
    use crate::animation::{FrameTable, Timing};
    use crate::media::surface::PixelBuffer;

    fn playing(def: AnimationDefinition) -> AnimationInstance {
        let mut inst = AnimationInstance::started(Arc::new(def));
        inst.advance(0.0, 120.0); // anchor
        inst
    }

    #[test]
    fn new_instance_is_idle() {
        let inst = AnimationInstance::new(Arc::new(rate_def(4, 10.0)));
        assert_eq!(inst.state(), PlayState::Idle);
        assert_eq!(inst.current_frame(), 0);
    }

    #[test]
    fn idle_instance_does_not_advance() {
        let mut inst = AnimationInstance::new(Arc::new(rate_def(4, 10.0)));
        inst.advance(0.0, 120.0);
        assert_eq!(inst.advance(1000.0, 120.0), 0);
        assert_eq!(inst.current_frame(), 0);
    }

    #[test]
    fn first_advance_only_anchors() {
        let mut inst = AnimationInstance::started(Arc::new(rate_def(4, 10.0)));
        assert_eq!(inst.advance(5000.0, 120.0), 0);
        assert_eq!(inst.current_frame(), 0);
    }

    #[test]
    fn catch_up_is_exact_with_carry() {
        // 10 fps = 100 ms per frame
        let mut inst = playing(rate_def(10, 10.0));
        assert_eq!(inst.advance(350.0, 120.0), 3);
        assert_eq!(inst.current_frame(), 3);
        // 50 ms carried + 50 ms more = one frame
        assert_eq!(inst.advance(400.0, 120.0), 1);
        assert_eq!(inst.current_frame(), 4);
    }

    #[test]
    fn stall_advances_every_missed_frame() {
        // 20 fps = 50 ms per frame; 275 ms -> 5 frames
        let mut inst = playing(rate_def(10, 20.0));
        assert_eq!(inst.advance(275.0, 120.0), 5);
        assert_eq!(inst.current_frame(), 5);
    }

    #[test]
    fn looping_wraps_modulo() {
        let mut inst = playing(rate_def(4, 10.0));
        assert_eq!(inst.advance(1050.0, 120.0), 10);
        assert_eq!(inst.current_frame(), 2);
        assert!(inst.is_playing());
    }

    #[test]
    fn looping_frame_always_in_range() {
        let mut inst = playing(rate_def(3, 10.0));
        let mut now = 0.0;
        for step in [7.0, 130.0, 999.0, 45.0, 310.0, 1.0] {
            now += step;
            inst.advance(now, 120.0);
            assert!(inst.current_frame() < 3);
        }
    }

    #[test]
    fn non_looping_finishes_at_frame_count() {
        let mut inst = playing(rate_def(4, 10.0).with_looping(false));
        assert_eq!(inst.advance(1000.0, 120.0), 4);
        assert_eq!(inst.current_frame(), 4);
        assert!(inst.is_finished());
        assert_eq!(inst.drawn_frame(), 3);
    }

    #[test]
    fn finished_instance_ignores_further_advance() {
        let mut inst = playing(rate_def(4, 10.0).with_looping(false));
        inst.advance(1000.0, 120.0);
        let mut before = PixelBuffer::new(2, 2);
        inst.draw(&mut before, Rect::new(0, 0, 2, 2)).unwrap();

        assert_eq!(inst.advance(5000.0, 120.0), 0);
        assert!(!inst.on_pulse());
        let mut after = PixelBuffer::new(2, 2);
        inst.draw(&mut after, Rect::new(0, 0, 2, 2)).unwrap();
        assert_eq!(before, after);
        assert_eq!(inst.current_frame(), 4);
    }

    #[test]
    fn per_frame_rates_use_current_frame_interval() {
        // frame 0 at 10 fps (100 ms), frames 1.. at 20 fps (50 ms)
        let table = FrameTable::from_sparse(10.0, [("1", 20.0)], 4).unwrap();
        let def = AnimationDefinition::new(strip_sheet(4), 4, 4, Timing::RateTable(table)).unwrap();
        let mut inst = playing(def);
        // 100 (frame 0) + 50 (frame 1) + 50 (frame 2) = 200 ms -> frame 3
        assert_eq!(inst.advance(220.0, 120.0), 3);
        assert_eq!(inst.current_frame(), 3);
    }

    #[test]
    fn beats_per_frame_follows_bpm() {
        let def = AnimationDefinition::new(
            strip_sheet(8),
            8,
            8,
            Timing::BeatsPerFrame(FrameTable::uniform(1.0)),
        )
        .unwrap();
        let mut inst = playing(def);
        // 120 BPM: 500 ms per frame
        assert_eq!(inst.advance(1000.0, 120.0), 2);
        // 60 BPM: 1000 ms per frame, recomputed on the next call
        assert_eq!(inst.advance(2000.0, 60.0), 1);
        assert_eq!(inst.current_frame(), 3);
    }

    #[test]
    fn pulse_mode_ignores_wall_clock() {
        let def = AnimationDefinition::new(
            strip_sheet(4),
            4,
            4,
            Timing::PulsesPerFrame(FrameTable::uniform(3)),
        )
        .unwrap();
        let mut inst = playing(def);
        assert_eq!(inst.advance(10_000.0, 120.0), 0);
        assert!(!inst.on_pulse());
        assert!(!inst.on_pulse());
        assert!(inst.on_pulse());
        assert_eq!(inst.current_frame(), 1);
    }

    #[test]
    fn pulse_mode_per_frame_counts() {
        let table = FrameTable::from_list(&[1u32, 2], 3).unwrap();
        let def =
            AnimationDefinition::new(strip_sheet(3), 3, 3, Timing::PulsesPerFrame(table)).unwrap();
        let mut inst = AnimationInstance::started(Arc::new(def));
        assert!(inst.on_pulse()); // frame 0 needs 1
        assert!(!inst.on_pulse()); // frame 1 needs 2
        assert!(inst.on_pulse());
        assert_eq!(inst.current_frame(), 2);
    }

    #[test]
    fn retrigger_deactivation_rewinds() {
        let mut inst = playing(rate_def(10, 10.0));
        inst.advance(550.0, 120.0);
        assert_eq!(inst.current_frame(), 5);
        inst.deactivate();
        assert_eq!(inst.current_frame(), 0);
        assert_eq!(inst.state(), PlayState::Idle);
        inst.activate();
        assert_eq!(inst.current_frame(), 0);
        // Anchors were cleared: the next call only re-anchors.
        assert_eq!(inst.advance(10_000.0, 120.0), 0);
    }

    #[test]
    fn fire_and_forget_keeps_running() {
        let mut inst = playing(rate_def(10, 10.0).with_retrigger(false));
        inst.advance(300.0, 120.0);
        inst.deactivate();
        assert_eq!(inst.current_frame(), 3);
        assert!(inst.is_playing());
        inst.advance(500.0, 120.0);
        assert_eq!(inst.current_frame(), 5);
    }

    #[test]
    fn draw_shows_frame_pixels() {
        let mut inst = playing(rate_def(4, 10.0));
        inst.advance(200.0, 120.0);
        let mut target = PixelBuffer::new(2, 2);
        inst.draw(&mut target, Rect::new(0, 0, 2, 2)).unwrap();
        assert_eq!(target.pixel(0, 0), [30, 30, 30, 255]);
    }

    #[test]
    fn shared_definition_survives_instance_drop() {
        let def = Arc::new(rate_def(2, 10.0));
        let a = AnimationInstance::started(Arc::clone(&def));
        let b = AnimationInstance::started(Arc::clone(&def));
        assert_eq!(Arc::strong_count(&def), 3);
        drop(a);
        assert_eq!(Arc::strong_count(&def), 2);
        assert_eq!(b.definition().frame_count(), 2);
    }
}
