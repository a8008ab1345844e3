use std::sync::Arc;

use crate::animation::{AnimationInstance, BitDepth};
use crate::engine::NoteHandler;
use crate::media::manifest::AnimationLibrary;
use crate::media::surface::Surface;

/// The currently latched crossfade mask.
#[derive(Debug)]
pub struct LatchedMask {
    pub instance: AnimationInstance,
    pub note: u8,
    pub threshold: u8,
    pub bit_depth: BitDepth,
}

/// Singleton mask latch bound to the mixer channel.
///
/// Note-on replaces the latched mask; note-off never clears it. Until the
/// first note-on there is no mask and deck A shows through unblended.
pub struct MaskEngine {
    channel: u8,
    library: Arc<AnimationLibrary>,
    latched: Option<LatchedMask>,
}

impl MaskEngine {
    pub fn new(channel: u8, library: Arc<AnimationLibrary>) -> Self {
        Self {
            channel,
            library,
            latched: None,
        }
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn latched(&self) -> Option<&LatchedMask> {
        self.latched.as_ref()
    }

    pub fn is_latched(&self) -> bool {
        self.latched.is_some()
    }

    /// Quantization for the latched mask; one bit when the definition
    /// carries no hint.
    pub fn bit_depth(&self) -> Option<BitDepth> {
        self.latched.as_ref().map(|m| m.bit_depth)
    }

    /// Latch a new mask, returning the replaced one already stopped.
    pub fn latch(&mut self, mask: LatchedMask) -> Option<LatchedMask> {
        log::debug!(
            "Mask latched: note {} variant {} ({}-bit)",
            mask.note,
            mask.threshold,
            mask.bit_depth.bits()
        );
        let mut previous = self.latched.replace(mask)?;
        previous.instance.stop();
        Some(previous)
    }

    pub fn advance(&mut self, now: f64, bpm: f64) {
        if let Some(mask) = &mut self.latched {
            mask.instance.advance(now, bpm);
        }
    }

    pub fn on_pulse(&mut self) {
        if let Some(mask) = &mut self.latched {
            mask.instance.on_pulse();
        }
    }

    /// Render the latched mask full-size into `target`. Returns false when no
    /// mask is latched or drawing failed.
    pub fn draw(&self, target: &mut dyn Surface) -> bool {
        let Some(mask) = &self.latched else {
            return false;
        };
        let dst = target.full_rect();
        match mask.instance.draw(target, dst) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Mask note {} failed to draw: {e}", mask.note);
                false
            }
        }
    }
}

impl NoteHandler for MaskEngine {
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) -> bool {
        if channel != self.channel {
            return false;
        }
        let Some(variant) = self.library.select(channel, note, velocity) else {
            return false;
        };
        let definition = Arc::clone(&variant.definition);
        let bit_depth = definition.bit_depth().unwrap_or(BitDepth::One);
        self.latch(LatchedMask {
            instance: AnimationInstance::started(definition),
            note,
            threshold: variant.threshold,
            bit_depth,
        });
        true
    }

    /// Consumed without effect: the mask stays latched.
    fn note_off(&mut self, channel: u8, _note: u8) -> bool {
        channel == self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::PlayState;
    use crate::animation::test_support::{rate_def, solid_def};
    use crate::media::surface::PixelBuffer;

    const MIXER: u8 = 4;

    fn engine() -> MaskEngine {
        let mut lib = AnimationLibrary::new();
        lib.insert(MIXER, 36, 0, Arc::new(rate_def(4, 10.0)));
        lib.insert(
            MIXER,
            37,
            0,
            Arc::new(solid_def([200, 200, 200, 255]).with_bit_depth(Some(BitDepth::Eight))),
        );
        lib.insert(MIXER, 38, 64, Arc::new(rate_def(2, 10.0)));
        MaskEngine::new(MIXER, Arc::new(lib))
    }

    #[test]
    fn absent_before_first_note() {
        let m = engine();
        assert!(!m.is_latched());
        assert_eq!(m.bit_depth(), None);
        let mut target = PixelBuffer::new(2, 2);
        assert!(!m.draw(&mut target));
    }

    #[test]
    fn note_off_keeps_latch() {
        let mut m = engine();
        assert!(m.note_on(MIXER, 36, 100));
        assert!(m.note_off(MIXER, 36));
        assert_eq!(m.latched().unwrap().note, 36);
        let mut target = PixelBuffer::new(2, 2);
        assert!(m.draw(&mut target));
    }

    #[test]
    fn new_note_replaces_and_stops_previous() {
        let mut m = engine();
        m.note_on(MIXER, 36, 100);
        m.advance(0.0, 120.0);
        m.advance(250.0, 120.0);
        assert_eq!(m.latched().unwrap().instance.current_frame(), 2);

        let replacement = LatchedMask {
            instance: AnimationInstance::started(Arc::clone(
                &m.library.variants(MIXER, 37)[0].definition,
            )),
            note: 37,
            threshold: 0,
            bit_depth: BitDepth::Eight,
        };
        let previous = m.latch(replacement).unwrap();
        assert_eq!(previous.note, 36);
        assert_eq!(previous.instance.state(), PlayState::Idle);
        assert_eq!(m.latched().unwrap().note, 37);
    }

    #[test]
    fn switching_notes_resets_to_first_frame() {
        let mut m = engine();
        m.note_on(MIXER, 36, 100);
        m.advance(0.0, 120.0);
        m.advance(250.0, 120.0);
        m.note_on(MIXER, 37, 100);
        assert_eq!(m.latched().unwrap().note, 37);
        assert_eq!(m.latched().unwrap().instance.current_frame(), 0);
        m.note_on(MIXER, 36, 100);
        assert_eq!(m.latched().unwrap().instance.current_frame(), 0);
    }

    #[test]
    fn bit_depth_defaults_to_one() {
        let mut m = engine();
        m.note_on(MIXER, 36, 100);
        assert_eq!(m.bit_depth(), Some(BitDepth::One));
        m.note_on(MIXER, 37, 100);
        assert_eq!(m.bit_depth(), Some(BitDepth::Eight));
    }

    #[test]
    fn unmatched_velocity_keeps_current_mask() {
        let mut m = engine();
        m.note_on(MIXER, 36, 100);
        assert!(!m.note_on(MIXER, 38, 10));
        assert_eq!(m.latched().unwrap().note, 36);
    }

    #[test]
    fn other_channels_ignored() {
        let mut m = engine();
        assert!(!m.note_on(0, 36, 100));
        assert!(!m.note_off(0, 36));
        assert!(!m.is_latched());
    }
}
