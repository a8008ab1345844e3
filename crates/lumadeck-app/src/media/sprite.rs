use std::path::{Path, PathBuf};

use crate::error::{DeckError, Result};

use super::surface::{PixelBuffer, Rect};

/// A decoded sprite sheet. Shared read-only between every animation that
/// references the same image.
#[derive(Debug)]
pub struct SpriteSheet {
    pixels: PixelBuffer,
    path: Option<PathBuf>,
}

impl SpriteSheet {
    pub fn from_buffer(pixels: PixelBuffer) -> Self {
        Self { pixels, path: None }
    }

    /// Decode an image file (PNG, JPEG, etc.) via the `image` crate.
    pub fn load(path: &Path) -> Result<Self> {
        let img = image::open(path).map_err(|source| DeckError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        let rgba = img.to_rgba8();
        let (w, h) = rgba.dimensions();
        log::debug!("Loaded sprite sheet {}: {}x{}", path.display(), w, h);

        Ok(Self {
            pixels: PixelBuffer::from_image(rgba),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn pixels(&self) -> &PixelBuffer {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Grid layout of frames within a sheet, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub frame_width: u32,
    pub frame_height: u32,
    pub frames_per_row: usize,
}

impl FrameGeometry {
    /// Derive frame size from the sheet size: width / frames_per_row by
    /// height / rows.
    pub fn fit(
        sheet_width: u32,
        sheet_height: u32,
        frame_count: usize,
        frames_per_row: usize,
    ) -> Result<Self> {
        if frame_count == 0 || frames_per_row == 0 {
            return Err(DeckError::Geometry(
                "frame count and frames per row must be non-zero".into(),
            ));
        }
        let columns = frames_per_row.min(frame_count);
        let rows = frame_count.div_ceil(frames_per_row);
        let frame_width = sheet_width / frames_per_row as u32;
        let frame_height = sheet_height / rows as u32;
        if frame_width == 0 || frame_height == 0 {
            return Err(DeckError::Geometry(format!(
                "{sheet_width}x{sheet_height} sheet too small for {columns}x{rows} frames"
            )));
        }
        Ok(Self {
            frame_width,
            frame_height,
            frames_per_row,
        })
    }

    pub fn rect(&self, frame: usize) -> Rect {
        let col = (frame % self.frames_per_row) as u32;
        let row = (frame / self.frames_per_row) as u32;
        Rect::new(
            col * self.frame_width,
            row * self.frame_height,
            self.frame_width,
            self.frame_height,
        )
    }
}
