//! Per-frame CPU compositor.
//!
//! Decks A and B render into their own offscreen buffers, get crossfaded
//! through the latched mask, pass through the pre-mix effect bus, land on
//! the visible surface under the overlay group, and finally go through the
//! post-composite bus. Offscreen buffers live across frames.

use crate::animation::BitDepth;
use crate::effect::{EffectBus, FrameContext};
use crate::layer::LayerGroup;
use crate::mask::MaskEngine;
use crate::media::surface::{PixelBuffer, Surface, composite_over};
use crate::settings::CanvasConfig;

/// Everything a frame is built from, borrowed from the engine.
pub struct FrameLayers<'a> {
    pub deck_a: &'a mut LayerGroup,
    pub deck_b: &'a mut LayerGroup,
    pub overlay: &'a mut LayerGroup,
    pub mask: &'a MaskEngine,
    pub effects_pre: &'a mut EffectBus,
    pub effects_post: &'a mut EffectBus,
}

/// Which buffer ended up as the mix in the last frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixSource {
    DeckA,
    DeckB,
    Masked(BitDepth),
}

pub struct Compositor {
    background: [u8; 4],
    deck_a: PixelBuffer,
    deck_b: PixelBuffer,
    mask: PixelBuffer,
    mixed: PixelBuffer,
    last_mix: MixSource,
}

impl Compositor {
    pub fn new(canvas: &CanvasConfig) -> Self {
        let (w, h) = (canvas.width, canvas.height);
        Self {
            background: canvas.background,
            deck_a: PixelBuffer::new(w, h),
            deck_b: PixelBuffer::new(w, h),
            mask: PixelBuffer::new(w, h),
            mixed: PixelBuffer::new(w, h),
            last_mix: MixSource::DeckA,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.mixed.width(), self.mixed.height())
    }

    /// The mixed decks of the last frame, after pre-mix effects.
    pub fn mixed(&self) -> &PixelBuffer {
        &self.mixed
    }

    pub fn last_mix(&self) -> MixSource {
        self.last_mix
    }

    pub fn render(&mut self, layers: FrameLayers<'_>, surface: &mut dyn Surface, ctx: FrameContext) {
        surface.fill([0, 0, 0, 0]);

        self.deck_a.fill(self.background);
        let a_drawn = layers.deck_a.draw(&mut self.deck_a);
        self.deck_b.fill(self.background);
        let b_drawn = layers.deck_b.draw(&mut self.deck_b);

        self.last_mix = self.mix(layers.mask, a_drawn, b_drawn);

        let (w, h) = self.size();
        layers
            .effects_pre
            .apply(self.mixed.pixels_mut(), w, h, ctx);

        if surface.size() == (w, h) {
            composite_over(surface.pixels_mut(), self.mixed.data());
        } else {
            let dst = surface.full_rect();
            if let Err(e) = surface.draw_image(&self.mixed, self.mixed.full_rect(), dst) {
                log::warn!("Failed to present mixed decks: {e}");
            }
        }

        layers.overlay.draw(surface);

        let (sw, sh) = surface.size();
        layers
            .effects_post
            .apply(surface.pixels_mut(), sw, sh, ctx);
    }

    fn mix(&mut self, mask: &MaskEngine, a_drawn: usize, b_drawn: usize) -> MixSource {
        if let Some(depth) = mask.bit_depth() {
            self.mask.fill([0, 0, 0, 255]);
            if mask.draw(&mut self.mask) {
                blend_masked(
                    self.deck_a.data(),
                    self.deck_b.data(),
                    self.mask.data(),
                    depth,
                    self.mixed.pixels_mut(),
                );
                return MixSource::Masked(depth);
            }
        }
        if a_drawn == 0 && b_drawn > 0 {
            self.mixed.copy_from(&self.deck_b);
            MixSource::DeckB
        } else {
            self.mixed.copy_from(&self.deck_a);
            MixSource::DeckA
        }
    }
}

/// BT.601 luma of an RGBA pixel.
pub fn luma(px: &[u8]) -> u8 {
    let sum = 299 * u32::from(px[0]) + 587 * u32::from(px[1]) + 114 * u32::from(px[2]);
    ((sum + 500) / 1000) as u8
}

/// Blend `a` and `b` through the grayscale `mask` into `out`.
///
/// One bit is a hard cut at 128. Deeper masks quantize to `levels` steps
/// and interpolate RGB linearly. Output alpha is the larger of the two.
pub fn blend_masked(a: &[u8], b: &[u8], mask: &[u8], depth: BitDepth, out: &mut [u8]) {
    let max_level = depth.levels() - 1;
    let pixels = out
        .chunks_exact_mut(4)
        .zip(a.chunks_exact(4))
        .zip(b.chunks_exact(4))
        .zip(mask.chunks_exact(4));
    for (((o, pa), pb), pm) in pixels {
        let v = luma(pm);
        if depth == BitDepth::One {
            let pick = if v >= 128 { pb } else { pa };
            o[..3].copy_from_slice(&pick[..3]);
        } else {
            let level = u32::from(v) * max_level / 255;
            let t = f64::from(level) / f64::from(max_level);
            for c in 0..3 {
                let (ca, cb) = (f64::from(pa[c]), f64::from(pb[c]));
                o[c] = (ca + (cb - ca) * t).round() as u8;
            }
        }
        o[3] = pa[3].max(pb[3]);
    }
}
