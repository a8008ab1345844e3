//! In-place pixel effects over packed RGBA8 buffers.
//!
//! Every function takes the buffer with its width and height; callers
//! guarantee `pixels.len() == width * height * 4`.

/// Axis an effect works along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// Repeat the image as `bands` equal stripes via modulo addressing.
/// Horizontal stripes stack top to bottom; vertical ones run left to right.
pub fn split(
    pixels: &mut [u8],
    scratch: &mut Vec<u8>,
    width: usize,
    height: usize,
    bands: usize,
    orientation: Orientation,
) {
    if bands < 2 || width == 0 || height == 0 {
        return;
    }
    scratch.clear();
    scratch.extend_from_slice(pixels);
    let src: &[[u8; 4]] = bytemuck::cast_slice(scratch.as_slice());
    let dst: &mut [[u8; 4]] = bytemuck::cast_slice_mut(pixels);
    for y in 0..height {
        for x in 0..width {
            let (sx, sy) = match orientation {
                Orientation::Horizontal => (x, (y * bands) % height),
                Orientation::Vertical => ((x * bands) % width, y),
            };
            dst[y * width + x] = src[sy * width + sx];
        }
    }
}

/// Reflect one half onto the other: horizontal mirrors the top half into
/// the bottom, vertical mirrors the left half into the right.
pub fn mirror(pixels: &mut [u8], width: usize, height: usize, orientation: Orientation) {
    if width == 0 || height == 0 {
        return;
    }
    let stride = width * 4;
    match orientation {
        Orientation::Horizontal => {
            for y in height.div_ceil(2)..height {
                let from = (height - 1 - y) * stride;
                pixels.copy_within(from..from + stride, y * stride);
            }
        }
        Orientation::Vertical => {
            let px: &mut [[u8; 4]] = bytemuck::cast_slice_mut(pixels);
            for row in px.chunks_exact_mut(width) {
                for x in width.div_ceil(2)..width {
                    row[x] = row[width - 1 - x];
                }
            }
        }
    }
}

/// Shift the image by `shift` pixels with wrap-around.
pub fn offset(
    pixels: &mut [u8],
    width: usize,
    height: usize,
    shift: usize,
    orientation: Orientation,
) {
    if width == 0 || height == 0 {
        return;
    }
    let stride = width * 4;
    match orientation {
        Orientation::Horizontal => {
            let shift = shift % width;
            for row in pixels.chunks_exact_mut(stride) {
                row.rotate_right(shift * 4);
            }
        }
        Orientation::Vertical => {
            pixels.rotate_right((shift % height) * stride);
        }
    }
}

/// Invert every RGB channel. Alpha is untouched.
pub fn invert(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(4) {
        for c in &mut px[..3] {
            *c = 255 - *c;
        }
    }
}

/// Quantize each RGB channel to `levels` evenly spaced values.
pub fn posterize(pixels: &mut [u8], levels: u32) {
    let levels = levels.clamp(2, 256);
    let max = levels - 1;
    for px in pixels.chunks_exact_mut(4) {
        for c in &mut px[..3] {
            let level = (u32::from(*c) * max + 127) / 255;
            *c = (level * 255 / max) as u8;
        }
    }
}

/// Smear random pixels sideways. Each pixel is picked with `probability`
/// and replaced by a neighbour up to `max_shift` pixels away on the same
/// scanline, clamped to the row edges.
pub fn glitch(
    pixels: &mut [u8],
    scratch: &mut Vec<u8>,
    width: usize,
    rng: &mut oorandom::Rand32,
    probability: f64,
    max_shift: usize,
) {
    let max_shift = max_shift.min(width.saturating_sub(1));
    if max_shift == 0 || probability <= 0.0 {
        return;
    }
    scratch.clear();
    scratch.extend_from_slice(pixels);
    let src: &[[u8; 4]] = bytemuck::cast_slice(scratch.as_slice());
    let dst: &mut [[u8; 4]] = bytemuck::cast_slice_mut(pixels);
    let span = 2 * max_shift as i32 + 1;
    for (i, px) in dst.iter_mut().enumerate() {
        if f64::from(rng.rand_float()) >= probability {
            continue;
        }
        let dx = rng.rand_range(0..span as u32) as i32 - max_shift as i32;
        let x = (i % width) as i32;
        let sx = (x + dx).clamp(0, width as i32 - 1) as usize;
        *px = src[i - i % width + sx];
    }
}

/// Flash the whole buffer to opaque white.
pub fn flash(pixels: &mut [u8]) {
    pixels.fill(255);
}
