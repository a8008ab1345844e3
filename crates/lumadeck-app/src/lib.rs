//! MIDI-driven sprite-sheet visual instrument.
//!
//! Control events from any number of MIDI inputs drive three decks of
//! sprite-sheet animations, a latched crossfade mask between decks A and B,
//! and two effect buses. The [`engine::Engine`] owns all of it and renders
//! into any [`media::surface::Surface`].

pub mod animation;
pub mod bus;
pub mod compositor;
pub mod effect;
pub mod engine;
pub mod error;
pub mod layer;
pub mod mask;
pub mod media;
pub mod midi;
pub mod runtime;
pub mod settings;
pub mod tempo;

pub use engine::Engine;
pub use error::{DeckError, Result};
