pub mod instance;
pub mod velocity;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{DeckError, Result};
use crate::media::sprite::{FrameGeometry, SpriteSheet};
use crate::media::surface::Rect;

pub use instance::{AnimationInstance, PlayState};

/// Sparse per-frame lookup: the entry at the greatest index at or below the
/// frame wins, `default` covers frames before the first entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameTable<T> {
    default: T,
    entries: BTreeMap<usize, T>,
}

impl<T: Copy + Into<f64>> FrameTable<T> {
    pub fn uniform(value: T) -> Self {
        Self {
            default: value,
            entries: BTreeMap::new(),
        }
    }

    /// Build from explicit (frame, value) pairs. Every frame must be below
    /// `frame_count` and every value positive and finite.
    pub fn from_entries(
        default: T,
        entries: impl IntoIterator<Item = (usize, T)>,
        frame_count: usize,
    ) -> Result<Self> {
        check_positive(default)?;
        let mut map = BTreeMap::new();
        for (frame, value) in entries {
            if frame >= frame_count {
                return Err(DeckError::manifest(
                    format!("frame {frame}"),
                    format!("beyond frame count {frame_count}"),
                ));
            }
            check_positive(value)?;
            map.insert(frame, value);
        }
        Ok(Self {
            default,
            entries: map,
        })
    }

    /// Build from string-keyed entries as they appear in the manifest.
    /// Keys must be base-10 non-negative integers.
    pub fn from_sparse<'a>(
        default: T,
        entries: impl IntoIterator<Item = (&'a str, T)>,
        frame_count: usize,
    ) -> Result<Self> {
        let mut parsed = Vec::new();
        for (key, value) in entries {
            let frame = key.trim().parse::<usize>().map_err(|_| {
                DeckError::manifest(format!("frame key '{key}'"), "not a non-negative integer")
            })?;
            parsed.push((frame, value));
        }
        Self::from_entries(default, parsed, frame_count)
    }

    /// Build from a list indexed by frame. The first value doubles as default.
    pub fn from_list(values: &[T], frame_count: usize) -> Result<Self> {
        let Some(&first) = values.first() else {
            return Err(DeckError::manifest("per-frame list", "empty"));
        };
        if values.len() > frame_count {
            return Err(DeckError::manifest(
                "per-frame list",
                format!("{} values for {frame_count} frames", values.len()),
            ));
        }
        Self::from_entries(first, values.iter().copied().enumerate(), frame_count)
    }

    pub fn get(&self, frame: usize) -> T {
        self.entries
            .range(..=frame)
            .next_back()
            .map_or(self.default, |(_, v)| *v)
    }
}

fn check_positive<T: Into<f64>>(value: T) -> Result<()> {
    let v: f64 = value.into();
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(DeckError::manifest("timing value", format!("{v} is not positive")))
    }
}

/// How an animation decides when to move to the next frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Timing {
    /// Frames per second, per frame.
    RateTable(FrameTable<f64>),
    /// Duration in beats, per frame; follows the live tempo.
    BeatsPerFrame(FrameTable<f64>),
    /// Clock pulses per frame; wall-clock time is ignored.
    PulsesPerFrame(FrameTable<u32>),
}

impl Timing {
    pub fn is_pulse_driven(&self) -> bool {
        matches!(self, Timing::PulsesPerFrame(_))
    }
}

/// Mask quantization depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitDepth {
    One,
    Two,
    Four,
    Eight,
}

impl BitDepth {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            1 => Some(BitDepth::One),
            2 => Some(BitDepth::Two),
            4 => Some(BitDepth::Four),
            8 => Some(BitDepth::Eight),
            _ => None,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            BitDepth::One => 1,
            BitDepth::Two => 2,
            BitDepth::Four => 4,
            BitDepth::Eight => 8,
        }
    }

    /// Number of distinct mask levels (2, 4, 16, 256).
    pub fn levels(self) -> u32 {
        1 << self.bits()
    }
}

/// Static description of one sprite-sheet animation. Immutable after load.
#[derive(Debug)]
pub struct AnimationDefinition {
    sheet: Arc<SpriteSheet>,
    geometry: FrameGeometry,
    frame_count: usize,
    looping: bool,
    retrigger: bool,
    timing: Timing,
    bit_depth: Option<BitDepth>,
}

impl AnimationDefinition {
    /// A looping, retriggering animation with no bit-depth hint.
    pub fn new(
        sheet: Arc<SpriteSheet>,
        frame_count: usize,
        frames_per_row: usize,
        timing: Timing,
    ) -> Result<Self> {
        let geometry = FrameGeometry::fit(sheet.width(), sheet.height(), frame_count, frames_per_row)?;
        Ok(Self {
            sheet,
            geometry,
            frame_count,
            looping: true,
            retrigger: true,
            timing,
            bit_depth: None,
        })
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn with_retrigger(mut self, retrigger: bool) -> Self {
        self.retrigger = retrigger;
        self
    }

    pub fn with_bit_depth(mut self, bit_depth: Option<BitDepth>) -> Self {
        self.bit_depth = bit_depth;
        self
    }

    pub fn sheet(&self) -> &Arc<SpriteSheet> {
        &self.sheet
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn frames_per_row(&self) -> usize {
        self.geometry.frames_per_row
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn retrigger(&self) -> bool {
        self.retrigger
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn bit_depth(&self) -> Option<BitDepth> {
        self.bit_depth
    }

    /// Source rectangle of a frame within the sheet.
    pub fn frame_rect(&self, frame: usize) -> Rect {
        self.geometry.rect(frame)
    }

    /// Wall-clock duration of `frame` in ms, or `None` for pulse-driven timing.
    pub fn frame_interval_ms(&self, frame: usize, bpm: f64) -> Option<f64> {
        match &self.timing {
            Timing::RateTable(fps) => Some(1000.0 / fps.get(frame)),
            Timing::BeatsPerFrame(beats) => Some(beats.get(frame) * 60_000.0 / bpm),
            Timing::PulsesPerFrame(_) => None,
        }
    }

    /// Pulses required to leave `frame`, or `None` for wall-clock timing.
    pub fn pulses_for(&self, frame: usize) -> Option<u32> {
        match &self.timing {
            Timing::PulsesPerFrame(pulses) => Some(pulses.get(frame)),
            _ => None,
        }
    }
}
