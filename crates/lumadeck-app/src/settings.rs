use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::effect::EffectsConfig;
use crate::error::{DeckError, Result};
use crate::tempo::TempoConfig;

/// Number of MIDI channels partitioned by [`ChannelMapping`].
pub const CHANNEL_COUNT: u8 = 16;

/// Which part of the instrument a channel drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    DeckA,
    Mixer,
    DeckB,
    EffectsPre,
    Overlay,
    EffectsPost,
    Reserved,
}

/// Static partition of the 16 channels. Channels are 0-indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMapping {
    pub deck_a: Vec<u8>,
    pub mixer: u8,
    pub deck_b: Vec<u8>,
    pub effects_pre: u8,
    pub overlay: Vec<u8>,
    pub effects_post: u8,
}

impl Default for ChannelMapping {
    fn default() -> Self {
        Self {
            deck_a: vec![0, 1, 2, 3],
            mixer: 4,
            deck_b: vec![5, 6, 7, 8],
            effects_pre: 9,
            overlay: vec![10, 11, 12, 13],
            effects_post: 14,
        }
    }
}

impl ChannelMapping {
    pub fn role(&self, channel: u8) -> ChannelRole {
        if self.deck_a.contains(&channel) {
            ChannelRole::DeckA
        } else if channel == self.mixer {
            ChannelRole::Mixer
        } else if self.deck_b.contains(&channel) {
            ChannelRole::DeckB
        } else if channel == self.effects_pre {
            ChannelRole::EffectsPre
        } else if self.overlay.contains(&channel) {
            ChannelRole::Overlay
        } else if channel == self.effects_post {
            ChannelRole::EffectsPost
        } else {
            ChannelRole::Reserved
        }
    }

    pub fn is_reserved(&self, channel: u8) -> bool {
        self.role(channel) == ChannelRole::Reserved
    }

    /// Every channel must be in range and claimed by at most one role.
    pub fn validate(&self) -> Result<()> {
        let mut claimed = [false; CHANNEL_COUNT as usize];
        let all = self
            .deck_a
            .iter()
            .chain(std::iter::once(&self.mixer))
            .chain(&self.deck_b)
            .chain(std::iter::once(&self.effects_pre))
            .chain(&self.overlay)
            .chain(std::iter::once(&self.effects_post));
        for &ch in all {
            if ch >= CHANNEL_COUNT {
                return Err(DeckError::Config(format!("channel {ch} out of range 0-15")));
            }
            if claimed[ch as usize] {
                return Err(DeckError::Config(format!(
                    "channel {ch} assigned to more than one role"
                )));
            }
            claimed[ch as usize] = true;
        }
        Ok(())
    }
}

/// Output canvas geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    pub width: u32,
    pub height: u32,
    /// RGBA clear colour for the offscreen deck buffers.
    pub background: [u8; 4],
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            background: [0, 0, 0, 255],
        }
    }
}

/// Defaults applied while turning manifest entries into animations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Frame rate for rate-table frames with no explicit entry at or below them.
    pub default_fps: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self { default_fps: 12.0 }
    }
}

/// Persisted engine configuration. Read once at startup, never mutated at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub canvas: CanvasConfig,
    #[serde(default)]
    pub channels: ChannelMapping,
    #[serde(default)]
    pub tempo: TempoConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub effects: EffectsConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: 1,
            canvas: CanvasConfig::default(),
            channels: ChannelMapping::default(),
            tempo: TempoConfig::default(),
            timing: TimingConfig::default(),
            effects: EffectsConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Path to the config file (~/.config/lumadeck/config.json).
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("lumadeck").join("config.json")
    }

    /// Load config from disk, falling back to default on any error.
    pub fn load() -> Self {
        let path = Self::config_path();
        let config = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(config) => {
                    log::info!("Loaded engine config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse engine config: {e}");
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("No engine config found, using defaults");
                Self::default()
            }
        };
        if let Err(e) = config.validate() {
            log::warn!("{e}; using defaults");
            return Self::default();
        }
        config
    }

    /// Save config to disk.
    pub fn save(&self) {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("Failed to create config dir: {e}");
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    log::error!("Failed to write engine config: {e}");
                } else {
                    log::debug!("Saved engine config to {}", path.display());
                }
            }
            Err(e) => log::error!("Failed to serialize engine config: {e}"),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.canvas.width == 0 || self.canvas.height == 0 {
            return Err(DeckError::Config("canvas must be non-empty".into()));
        }
        if !self.timing.default_fps.is_finite() || self.timing.default_fps <= 0.0 {
            return Err(DeckError::Config("default_fps must be positive".into()));
        }
        self.channels.validate()?;
        self.tempo.validate()?;
        self.effects.validate()
    }
}
