use std::collections::BTreeMap;
use std::sync::Arc;

use crate::animation::AnimationInstance;
use crate::engine::NoteHandler;
use crate::media::manifest::AnimationLibrary;
use crate::media::surface::Surface;

/// An active animation bound to one (channel, note) slot.
#[derive(Debug)]
struct Slot {
    instance: AnimationInstance,
    /// False once the note is released on a non-retriggering animation.
    held: bool,
}

/// A deck: a set of channels, each with at most one live animation per note.
///
/// Slots draw in channel then note order.
pub struct LayerGroup {
    name: &'static str,
    channels: Vec<u8>,
    library: Arc<AnimationLibrary>,
    slots: BTreeMap<(u8, u8), Slot>,
}

impl LayerGroup {
    pub fn new(name: &'static str, channels: Vec<u8>, library: Arc<AnimationLibrary>) -> Self {
        Self {
            name,
            channels,
            library,
            slots: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn owns(&self, channel: u8) -> bool {
        self.channels.contains(&channel)
    }

    pub fn active_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn instance(&self, channel: u8, note: u8) -> Option<&AnimationInstance> {
        self.slots.get(&(channel, note)).map(|s| &s.instance)
    }

    /// Advance every wall-clock timed slot.
    pub fn advance(&mut self, now: f64, bpm: f64) {
        for slot in self.slots.values_mut() {
            slot.instance.advance(now, bpm);
        }
    }

    pub fn on_pulse(&mut self) {
        for slot in self.slots.values_mut() {
            slot.instance.on_pulse();
        }
    }

    /// Draw every slot full-size onto `target`. A failing slot is logged and
    /// skipped. Released slots that have finished are dropped after their
    /// last frame is drawn. Returns the number of slots drawn.
    pub fn draw(&mut self, target: &mut dyn Surface) -> usize {
        let dst = target.full_rect();
        let mut drawn = 0;
        for (&(channel, note), slot) in &self.slots {
            match slot.instance.draw(target, dst) {
                Ok(()) => drawn += 1,
                Err(e) => log::warn!("{} layer {channel}/{note} failed to draw: {e}", self.name),
            }
        }
        self.slots
            .retain(|_, slot| slot.held || !slot.instance.is_finished());
        drawn
    }

    /// Stop and drop every slot.
    pub fn clear(&mut self) {
        for slot in self.slots.values_mut() {
            slot.instance.stop();
        }
        self.slots.clear();
    }
}

impl NoteHandler for LayerGroup {
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) -> bool {
        if !self.owns(channel) {
            return false;
        }
        let Some(variant) = self.library.select(channel, note, velocity) else {
            return false;
        };
        let instance = AnimationInstance::started(Arc::clone(&variant.definition));
        log::debug!(
            "{}: note {note} on channel {channel} -> variant {}",
            self.name,
            variant.threshold
        );
        if let Some(mut previous) = self
            .slots
            .insert((channel, note), Slot { instance, held: true })
        {
            previous.instance.stop();
        }
        true
    }

    fn note_off(&mut self, channel: u8, note: u8) -> bool {
        if !self.owns(channel) {
            return false;
        }
        let Some(slot) = self.slots.get_mut(&(channel, note)) else {
            return false;
        };
        slot.instance.deactivate();
        if slot.instance.definition().retrigger() {
            self.slots.remove(&(channel, note));
        } else {
            slot.held = false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::test_support::{rate_def, solid_def, unreadable_def};
    use crate::media::surface::PixelBuffer;

    fn library() -> Arc<AnimationLibrary> {
        let mut lib = AnimationLibrary::new();
        lib.insert(0, 60, 40, Arc::new(rate_def(4, 10.0)));
        lib.insert(0, 60, 80, Arc::new(rate_def(8, 10.0)));
        lib.insert(1, 61, 0, Arc::new(rate_def(4, 10.0).with_retrigger(false)));
        lib.insert(
            1,
            62,
            0,
            Arc::new(rate_def(2, 10.0).with_retrigger(false).with_looping(false)),
        );
        lib.insert(2, 10, 0, Arc::new(solid_def([255, 0, 0, 255])));
        lib.insert(2, 11, 0, Arc::new(solid_def([0, 0, 255, 255])));
        lib.insert(2, 9, 0, Arc::new(unreadable_def()));
        Arc::new(lib)
    }

    fn deck() -> LayerGroup {
        LayerGroup::new("deck A", vec![0, 1, 2], library())
    }

    #[test]
    fn foreign_channel_not_consumed() {
        let mut g = deck();
        assert!(!g.note_on(5, 60, 100));
        assert!(!g.note_off(5, 60));
        assert!(g.is_empty());
    }

    #[test]
    fn velocity_below_lowest_threshold_is_noop() {
        let mut g = deck();
        assert!(!g.note_on(0, 60, 30));
        assert!(g.is_empty());
        assert!(!g.note_on(0, 99, 100));
        assert!(g.is_empty());
    }

    #[test]
    fn velocity_picks_variant() {
        let mut g = deck();
        assert!(g.note_on(0, 60, 60));
        assert_eq!(g.instance(0, 60).unwrap().definition().frame_count(), 4);
        assert!(g.note_on(0, 60, 127));
        assert_eq!(g.instance(0, 60).unwrap().definition().frame_count(), 8);
        assert_eq!(g.active_count(), 1);
    }

    #[test]
    fn retrigger_on_restarts_slot() {
        let mut g = deck();
        g.note_on(0, 60, 60);
        g.advance(0.0, 120.0);
        g.advance(250.0, 120.0);
        assert_eq!(g.instance(0, 60).unwrap().current_frame(), 2);
        g.note_on(0, 60, 60);
        assert_eq!(g.instance(0, 60).unwrap().current_frame(), 0);
    }

    #[test]
    fn note_off_removes_retriggering_slot() {
        let mut g = deck();
        g.note_on(0, 60, 60);
        assert!(g.note_off(0, 60));
        assert!(g.instance(0, 60).is_none());
        assert!(!g.note_off(0, 60));
    }

    #[test]
    fn fire_and_forget_looping_keeps_playing() {
        let mut g = deck();
        g.note_on(1, 61, 1);
        g.advance(0.0, 120.0);
        g.advance(200.0, 120.0);
        g.note_off(1, 61);
        g.advance(300.0, 120.0);
        let inst = g.instance(1, 61).unwrap();
        assert_eq!(inst.current_frame(), 3);
        let mut target = PixelBuffer::new(2, 2);
        assert_eq!(g.draw(&mut target), 1);
        assert_eq!(g.active_count(), 1);
    }

    #[test]
    fn fire_and_forget_one_shot_expires_after_last_frame() {
        let mut g = deck();
        g.note_on(1, 62, 1);
        g.note_off(1, 62);
        g.advance(0.0, 120.0);
        g.advance(500.0, 120.0);
        assert!(g.instance(1, 62).unwrap().is_finished());
        let mut target = PixelBuffer::new(2, 2);
        assert_eq!(g.draw(&mut target), 1);
        assert_eq!(target.pixel(0, 0), [20, 20, 20, 255]);
        assert!(g.is_empty());
    }

    #[test]
    fn held_one_shot_stays_on_last_frame() {
        let mut g = deck();
        g.note_on(1, 62, 1);
        g.advance(0.0, 120.0);
        g.advance(500.0, 120.0);
        let mut target = PixelBuffer::new(2, 2);
        g.draw(&mut target);
        g.draw(&mut target);
        assert_eq!(g.active_count(), 1);
    }

    #[test]
    fn draws_in_channel_then_note_order() {
        let mut g = deck();
        g.note_on(2, 11, 1);
        g.note_on(2, 10, 1);
        let mut target = PixelBuffer::new(2, 2);
        assert_eq!(g.draw(&mut target), 2);
        // note 11 (blue) is drawn last and covers note 10
        assert_eq!(target.pixel(1, 1), [0, 0, 255, 255]);
    }

    #[test]
    fn clear_drops_everything() {
        let mut g = deck();
        g.note_on(0, 60, 100);
        g.note_on(2, 10, 100);
        g.clear();
        assert!(g.is_empty());
    }

    #[test]
    fn failing_slot_does_not_block_later_slots() {
        let mut g = deck();
        g.note_on(2, 9, 100);
        g.note_on(2, 10, 100);
        let mut out = PixelBuffer::new(2, 2);
        assert_eq!(g.draw(&mut out), 1);
        assert_eq!(out.pixel(1, 1), [255, 0, 0, 255]);
        assert_eq!(g.active_count(), 2);
    }
}
