pub mod pixel;

use serde::{Deserialize, Serialize};

use crate::engine::NoteHandler;
use crate::error::{DeckError, Result};

use pixel::Orientation;

/// Inclusive range of MIDI notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRange {
    pub low: u8,
    pub high: u8,
}

impl NoteRange {
    pub const fn new(low: u8, high: u8) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, note: u8) -> bool {
        (self.low..=self.high).contains(&note)
    }

    pub fn len(&self) -> usize {
        usize::from(self.high.saturating_sub(self.low)) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.low > self.high
    }

    /// Position of `note` within the range.
    pub fn index(&self, note: u8) -> usize {
        usize::from(note.saturating_sub(self.low))
    }

    /// Notes in the upper half select the alternate variant of an effect.
    pub fn upper_half(&self, note: u8) -> bool {
        self.index(note) >= self.len().div_ceil(2)
    }

    fn overlaps(&self, other: &NoteRange) -> bool {
        self.low <= other.high && other.low <= self.high
    }
}

/// Effect types, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    Split,
    Mirror,
    Offset,
    Color,
    Glitch,
    Strobe,
    Reserved,
}

impl EffectKind {
    pub const ALL: [EffectKind; 7] = [
        EffectKind::Split,
        EffectKind::Mirror,
        EffectKind::Offset,
        EffectKind::Color,
        EffectKind::Glitch,
        EffectKind::Strobe,
        EffectKind::Reserved,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Note ranges and shaping constants shared by both effect buses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsConfig {
    pub split: NoteRange,
    pub mirror: NoteRange,
    pub offset: NoteRange,
    pub color: NoteRange,
    pub glitch: NoteRange,
    pub strobe: NoteRange,
    pub reserved: NoteRange,
    pub split_min: u8,
    pub split_max: u8,
    /// Full-intensity shift as a fraction of the shifted dimension.
    pub offset_scale: f64,
    /// Posterize levels at zero intensity.
    pub posterize_levels: f64,
    /// Levels removed at full intensity.
    pub posterize_span: f64,
    /// Per-pixel glitch probability at full intensity.
    pub glitch_probability: f64,
    /// Largest scanline shift in pixels at full intensity.
    pub glitch_max_shift: f64,
    pub glitch_seed: u64,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            split: NoteRange::new(24, 35),
            mirror: NoteRange::new(36, 41),
            offset: NoteRange::new(42, 47),
            color: NoteRange::new(48, 59),
            glitch: NoteRange::new(60, 71),
            strobe: NoteRange::new(72, 83),
            reserved: NoteRange::new(84, 95),
            split_min: 2,
            split_max: 8,
            offset_scale: 0.5,
            posterize_levels: 16.0,
            posterize_span: 12.0,
            glitch_probability: 0.2,
            glitch_max_shift: 48.0,
            glitch_seed: 0x5eed,
        }
    }
}

impl EffectsConfig {
    pub fn range(&self, kind: EffectKind) -> NoteRange {
        match kind {
            EffectKind::Split => self.split,
            EffectKind::Mirror => self.mirror,
            EffectKind::Offset => self.offset,
            EffectKind::Color => self.color,
            EffectKind::Glitch => self.glitch,
            EffectKind::Strobe => self.strobe,
            EffectKind::Reserved => self.reserved,
        }
    }

    pub fn kind_for(&self, note: u8) -> Option<EffectKind> {
        EffectKind::ALL
            .into_iter()
            .find(|kind| self.range(*kind).contains(note))
    }

    pub fn validate(&self) -> Result<()> {
        for (i, a) in EffectKind::ALL.iter().enumerate() {
            let ra = self.range(*a);
            if ra.is_empty() || ra.high > 127 {
                return Err(DeckError::Config(format!("{a:?} note range {ra:?} is invalid")));
            }
            for b in &EffectKind::ALL[i + 1..] {
                if ra.overlaps(&self.range(*b)) {
                    return Err(DeckError::Config(format!(
                        "{a:?} and {b:?} note ranges overlap"
                    )));
                }
            }
        }
        if self.split_min < 2 || self.split_min > self.split_max {
            return Err(DeckError::Config(format!(
                "split count bounds {}..{} are invalid",
                self.split_min, self.split_max
            )));
        }
        let finite_non_negative = [
            self.offset_scale,
            self.posterize_span,
            self.glitch_max_shift,
        ];
        if finite_non_negative.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(DeckError::Config("effect shaping constants must be >= 0".into()));
        }
        if !self.posterize_levels.is_finite() || self.posterize_levels < 2.0 {
            return Err(DeckError::Config("posterize_levels must be at least 2".into()));
        }
        if !(0.0..=1.0).contains(&self.glitch_probability) {
            return Err(DeckError::Config("glitch_probability must be in 0..=1".into()));
        }
        Ok(())
    }
}

/// An active effect entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectSlot {
    pub note: u8,
    pub velocity: u8,
}

impl EffectSlot {
    pub fn intensity(&self) -> f64 {
        f64::from(self.velocity) / 127.0
    }
}

/// Per-frame inputs shared by time-dependent effects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    pub now_ms: f64,
    pub bpm: f64,
}

/// Tempo-locked strobe gate. Soft hits flash once per beat for a quarter
/// of it, medium hits twice, hard hits four times at half duty.
pub fn strobe_on(now_ms: f64, bpm: f64, velocity: u8) -> bool {
    let (pulses_per_beat, duty) = match velocity {
        0..43 => (1.0, 0.25),
        43..86 => (2.0, 0.25),
        _ => (4.0, 0.5),
    };
    if bpm <= 0.0 {
        return false;
    }
    let period = 60_000.0 / bpm / pulses_per_beat;
    now_ms.rem_euclid(period) / period < duty
}

/// One effect application point: a channel, at most one entry per effect
/// type, and the scratch state the pixel passes need.
pub struct EffectBus {
    name: &'static str,
    channel: u8,
    config: EffectsConfig,
    slots: [Option<EffectSlot>; EffectKind::ALL.len()],
    scratch: Vec<u8>,
    rng: oorandom::Rand32,
}

impl EffectBus {
    pub fn new(name: &'static str, channel: u8, config: EffectsConfig, seed: u64) -> Self {
        Self {
            name,
            channel,
            config,
            slots: [None; EffectKind::ALL.len()],
            scratch: Vec::new(),
            rng: oorandom::Rand32::new(seed),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn slot(&self, kind: EffectKind) -> Option<EffectSlot> {
        self.slots[kind.index()]
    }

    pub fn active_kinds(&self) -> impl Iterator<Item = EffectKind> + '_ {
        EffectKind::ALL
            .into_iter()
            .filter(|kind| self.slots[kind.index()].is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn clear(&mut self) {
        self.slots = [None; EffectKind::ALL.len()];
    }

    /// Run every active effect over `pixels` in type order.
    pub fn apply(&mut self, pixels: &mut [u8], width: u32, height: u32, ctx: FrameContext) {
        let (w, h) = (width as usize, height as usize);
        if pixels.len() != w * h * 4 {
            log::warn!(
                "{}: buffer of {} bytes does not match {width}x{height}",
                self.name,
                pixels.len()
            );
            return;
        }
        for kind in EffectKind::ALL {
            let Some(slot) = self.slots[kind.index()] else {
                continue;
            };
            let range = self.config.range(kind);
            let upper = range.upper_half(slot.note);
            let orientation = if upper {
                Orientation::Vertical
            } else {
                Orientation::Horizontal
            };
            let intensity = slot.intensity();
            match kind {
                EffectKind::Split => {
                    let half = range.len().div_ceil(2).max(1);
                    let bands = (usize::from(self.config.split_min) + range.index(slot.note) % half)
                        .clamp(
                            usize::from(self.config.split_min),
                            usize::from(self.config.split_max),
                        );
                    pixel::split(pixels, &mut self.scratch, w, h, bands, orientation);
                }
                EffectKind::Mirror => pixel::mirror(pixels, w, h, orientation),
                EffectKind::Offset => {
                    let dim = if upper { h } else { w };
                    let shift = (intensity * dim as f64 * self.config.offset_scale) as usize;
                    pixel::offset(pixels, w, h, shift, orientation);
                }
                EffectKind::Color => {
                    if upper {
                        let levels = (self.config.posterize_levels
                            - intensity * self.config.posterize_span)
                            .floor()
                            .max(2.0);
                        pixel::posterize(pixels, levels as u32);
                    } else {
                        pixel::invert(pixels);
                    }
                }
                EffectKind::Glitch => pixel::glitch(
                    pixels,
                    &mut self.scratch,
                    w,
                    &mut self.rng,
                    intensity * self.config.glitch_probability,
                    (intensity * self.config.glitch_max_shift) as usize,
                ),
                EffectKind::Strobe => {
                    if strobe_on(ctx.now_ms, ctx.bpm, slot.velocity) {
                        pixel::flash(pixels);
                    }
                }
                EffectKind::Reserved => {}
            }
        }
    }
}

impl NoteHandler for EffectBus {
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) -> bool {
        if channel != self.channel {
            return false;
        }
        if velocity == 0 {
            return self.note_off(channel, note);
        }
        let Some(kind) = self.config.kind_for(note) else {
            return false;
        };
        log::debug!("{}: {kind:?} on (note {note}, velocity {velocity})", self.name);
        self.slots[kind.index()] = Some(EffectSlot { note, velocity });
        true
    }

    fn note_off(&mut self, channel: u8, note: u8) -> bool {
        if channel != self.channel {
            return false;
        }
        let Some(kind) = self.config.kind_for(note) else {
            return false;
        };
        let entry = &mut self.slots[kind.index()];
        if entry.is_some_and(|slot| slot.note == note) {
            *entry = None;
            log::debug!("{}: {kind:?} off", self.name);
        }
        true
    }
}
