pub mod manifest;
pub mod sprite;
pub mod surface;

pub use manifest::{AnimationLibrary, Manifest};
pub use sprite::{FrameGeometry, SpriteSheet};
pub use surface::{PixelBuffer, Rect, Surface};
