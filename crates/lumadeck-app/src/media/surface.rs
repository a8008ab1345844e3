use crate::error::{DeckError, Result};

/// Pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the rectangle lies entirely inside a `width` x `height` area.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        u64::from(self.x) + u64::from(self.width) <= u64::from(width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(height)
    }
}

/// The drawable the compositor renders into.
pub trait Surface {
    fn size(&self) -> (u32, u32);

    /// Packed RGBA8, row-major, no padding.
    fn pixels(&self) -> &[u8];

    fn pixels_mut(&mut self) -> &mut [u8];

    /// Draw `src` of `image` scaled into `dst`, source-over. `src` must lie
    /// inside the image; `dst` is clipped to the surface.
    fn draw_image(&mut self, image: &PixelBuffer, src: Rect, dst: Rect) -> Result<()>;

    fn fill(&mut self, color: [u8; 4]) {
        for px in self.pixels_mut().chunks_exact_mut(4) {
            px.copy_from_slice(&color);
        }
    }

    fn full_rect(&self) -> Rect {
        let (w, h) = self.size();
        Rect::new(0, 0, w, h)
    }
}

/// Owned RGBA8 buffer. Used for sprite sheets, offscreen deck buffers and
/// as the default visible surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Transparent black buffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(DeckError::Render(format!(
                "{width}x{height} buffer needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn from_image(img: image::RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            data: img.into_raw(),
        }
    }

    pub fn to_image(&self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.data.clone())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn as_pixels(&self) -> &[[u8; 4]] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn as_pixels_mut(&mut self) -> &mut [[u8; 4]] {
        bytemuck::cast_slice_mut(&mut self.data)
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Panics when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.as_pixels()[self.index(x, y)]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = self.index(x, y);
        self.as_pixels_mut()[i] = rgba;
    }

    pub fn fill(&mut self, color: [u8; 4]) {
        self.as_pixels_mut().fill(color);
    }

    /// Copy pixels from a buffer of the same size.
    pub fn copy_from(&mut self, other: &PixelBuffer) {
        debug_assert_eq!((self.width, self.height), (other.width, other.height));
        self.data.copy_from_slice(&other.data);
    }

    /// Whether every pixel is fully transparent.
    pub fn is_clear(&self) -> bool {
        self.as_pixels().iter().all(|p| p[3] == 0)
    }
}

impl Surface for PixelBuffer {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn pixels(&self) -> &[u8] {
        &self.data
    }

    fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn draw_image(&mut self, image: &PixelBuffer, src: Rect, dst: Rect) -> Result<()> {
        if src.is_empty() || !src.fits_within(image.width, image.height) {
            return Err(DeckError::Render(format!(
                "source {src:?} outside {}x{} image",
                image.width, image.height
            )));
        }
        if dst.is_empty() {
            return Ok(());
        }

        let src_px = image.as_pixels();
        let (tw, th) = (self.width, self.height);
        let dst_px = bytemuck::cast_slice_mut::<u8, [u8; 4]>(&mut self.data);

        for dy in 0..dst.height {
            let ty = dst.y + dy;
            if ty >= th {
                break;
            }
            let sy = src.y + (u64::from(dy) * u64::from(src.height) / u64::from(dst.height)) as u32;
            let src_row = sy as usize * image.width as usize;
            let dst_row = ty as usize * tw as usize;
            for dx in 0..dst.width {
                let tx = dst.x + dx;
                if tx >= tw {
                    break;
                }
                let sx = src.x
                    + (u64::from(dx) * u64::from(src.width) / u64::from(dst.width)) as u32;
                blend_over(&mut dst_px[dst_row + tx as usize], src_px[src_row + sx as usize]);
            }
        }
        Ok(())
    }
}

/// Straight-alpha source-over for one pixel.
pub fn blend_over(dst: &mut [u8; 4], src: [u8; 4]) {
    let sa = u32::from(src[3]);
    if sa == 255 {
        *dst = src;
        return;
    }
    if sa == 0 {
        return;
    }
    let da = u32::from(dst[3]);
    let dw = da * (255 - sa) / 255;
    let out_a = sa + dw;
    if out_a == 0 {
        *dst = [0, 0, 0, 0];
        return;
    }
    for c in 0..3 {
        let v = (u32::from(src[c]) * sa + u32::from(dst[c]) * dw) / out_a;
        dst[c] = v.min(255) as u8;
    }
    dst[3] = out_a.min(255) as u8;
}

/// Source-over composite of two equally sized packed RGBA buffers.
pub fn composite_over(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let mut px = [d[0], d[1], d[2], d[3]];
        blend_over(&mut px, [s[0], s[1], s[2], s[3]]);
        d.copy_from_slice(&px);
    }
}
