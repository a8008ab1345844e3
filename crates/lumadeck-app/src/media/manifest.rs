use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::animation::velocity::{self, Variant};
use crate::animation::{AnimationDefinition, BitDepth, FrameTable, Timing};
use crate::error::{DeckError, Result};
use crate::settings::{CHANNEL_COUNT, EngineConfig};

use super::sprite::SpriteSheet;

/// A per-frame value: one scalar for every frame, a list indexed by frame,
/// or a sparse object keyed by frame index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerFrame<T> {
    Scalar(T),
    List(Vec<T>),
    Sparse(BTreeMap<String, T>),
}

impl<T: Copy + Into<f64>> PerFrame<T> {
    /// Validate into a lookup table. Sparse tables without `fallback` need an
    /// entry for frame 0.
    pub fn to_table(&self, fallback: Option<T>, frame_count: usize) -> Result<FrameTable<T>> {
        match self {
            PerFrame::Scalar(v) => FrameTable::from_entries(*v, [], frame_count),
            PerFrame::List(values) => FrameTable::from_list(values, frame_count),
            PerFrame::Sparse(map) => {
                let default = fallback
                    .or_else(|| {
                        map.iter()
                            .find(|(k, _)| k.trim().parse::<usize>() == Ok(0))
                            .map(|(_, v)| *v)
                    })
                    .ok_or_else(|| DeckError::manifest("timing", "sparse table has no frame 0"))?;
                FrameTable::from_sparse(
                    default,
                    map.iter().map(|(k, v)| (k.as_str(), *v)),
                    frame_count,
                )
            }
        }
    }
}

/// Timing block of a manifest entry, tagged by `mode`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum TimingSpec {
    RateTable {
        #[serde(default)]
        fps: Option<PerFrame<f64>>,
    },
    BeatsPerFrame {
        beats: PerFrame<f64>,
    },
    PulsesPerFrame {
        pulses: PerFrame<u32>,
    },
}

impl Default for TimingSpec {
    fn default() -> Self {
        TimingSpec::RateTable { fps: None }
    }
}

impl TimingSpec {
    pub fn to_timing(&self, frame_count: usize, default_fps: f64) -> Result<Timing> {
        Ok(match self {
            TimingSpec::RateTable { fps: None } => {
                Timing::RateTable(FrameTable::from_entries(default_fps, [], frame_count)?)
            }
            TimingSpec::RateTable { fps: Some(fps) } => {
                Timing::RateTable(fps.to_table(Some(default_fps), frame_count)?)
            }
            TimingSpec::BeatsPerFrame { beats } => {
                Timing::BeatsPerFrame(beats.to_table(None, frame_count)?)
            }
            TimingSpec::PulsesPerFrame { pulses } => {
                Timing::PulsesPerFrame(pulses.to_table(None, frame_count)?)
            }
        })
    }
}

fn default_true() -> bool {
    true
}

/// One animation as declared in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Image path, relative to the manifest file.
    pub image: PathBuf,
    pub frame_count: usize,
    /// Defaults to a single row.
    #[serde(default)]
    pub frames_per_row: Option<usize>,
    #[serde(rename = "loop", default = "default_true")]
    pub looping: bool,
    #[serde(default = "default_true")]
    pub retrigger: bool,
    #[serde(default)]
    pub timing: TimingSpec,
    /// Kept loose so a bad value only drops the hint, not the entry.
    #[serde(default)]
    pub bit_depth: Option<serde_json::Value>,
}

impl ManifestEntry {
    /// Parsed bit-depth hint. Anything other than 1, 2, 4 or 8 is ignored
    /// with a warning.
    pub fn bit_depth_hint(&self, key: &str) -> Option<BitDepth> {
        let value = self.bit_depth.as_ref().filter(|v| !v.is_null())?;
        let depth = value
            .as_u64()
            .and_then(|bits| u8::try_from(bits).ok())
            .and_then(BitDepth::from_bits);
        if depth.is_none() {
            log::warn!("Ignoring invalid bitDepth {value} for {key}");
        }
        depth
    }
}

/// Raw manifest: channel -> note -> velocity threshold -> entry. Entries
/// stay as JSON until validated so one malformed entry cannot sink the rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub animations: BTreeMap<String, BTreeMap<String, BTreeMap<String, serde_json::Value>>>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| DeckError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| DeckError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn parse_key(raw: &str, limit: u8) -> Option<u8> {
    raw.trim().parse::<u8>().ok().filter(|v| *v < limit)
}

/// Loaded animations indexed by (channel, note), each slot holding its
/// velocity variants in ascending threshold order.
#[derive(Debug, Default)]
pub struct AnimationLibrary {
    slots: FxHashMap<(u8, u8), Vec<Variant>>,
}

impl AnimationLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a manifest file and decode every sprite sheet it references.
    /// Only an unreadable or unparsable manifest is an error; bad entries
    /// are dropped with a warning.
    pub fn load(path: &Path, config: &EngineConfig) -> Result<Self> {
        let manifest = Manifest::load(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let library = Self::from_manifest(&manifest, base_dir, config);
        log::info!(
            "Loaded {} animations across {} slots from {}",
            library.len(),
            library.slots.len(),
            path.display()
        );
        Ok(library)
    }

    pub fn from_manifest(manifest: &Manifest, base_dir: &Path, config: &EngineConfig) -> Self {
        let mut library = Self::new();
        let mut sheets: FxHashMap<PathBuf, Option<Arc<SpriteSheet>>> = FxHashMap::default();
        let mut omitted = 0usize;

        for (raw_channel, notes) in &manifest.animations {
            for (raw_note, velocities) in notes {
                for (raw_velocity, value) in velocities {
                    let key = format!("{raw_channel}/{raw_note}/{raw_velocity}");
                    let (Some(channel), Some(note), Some(threshold)) = (
                        parse_key(raw_channel, CHANNEL_COUNT),
                        parse_key(raw_note, 128),
                        parse_key(raw_velocity, 128),
                    ) else {
                        log::warn!("Skipping manifest entry {key}: key out of range");
                        omitted += 1;
                        continue;
                    };

                    match Self::build_entry(value, &key, base_dir, config, &mut sheets) {
                        Ok(definition) => {
                            library.insert(channel, note, threshold, Arc::new(definition));
                        }
                        Err(e) => {
                            log::warn!("Skipping manifest entry {key}: {e}");
                            omitted += 1;
                        }
                    }
                }
            }
        }

        if omitted > 0 {
            log::warn!("{omitted} manifest entries omitted");
        }
        let decoded = sheets.values().filter(|s| s.is_some()).count();
        log::debug!("{decoded} sprite sheets decoded");
        library
    }

    fn build_entry(
        value: &serde_json::Value,
        key: &str,
        base_dir: &Path,
        config: &EngineConfig,
        sheets: &mut FxHashMap<PathBuf, Option<Arc<SpriteSheet>>>,
    ) -> Result<AnimationDefinition> {
        let entry = ManifestEntry::deserialize(value)
            .map_err(|e| DeckError::manifest(key, e.to_string()))?;

        let image_path = base_dir.join(&entry.image);
        let sheet = sheets
            .entry(image_path.clone())
            .or_insert_with(|| match SpriteSheet::load(&image_path) {
                Ok(sheet) => Some(Arc::new(sheet)),
                Err(e) => {
                    log::warn!("{e}");
                    None
                }
            })
            .clone()
            .ok_or_else(|| DeckError::manifest(key, "image failed to load"))?;

        let timing = entry
            .timing
            .to_timing(entry.frame_count, config.timing.default_fps)?;
        let frames_per_row = entry.frames_per_row.unwrap_or(entry.frame_count);

        Ok(
            AnimationDefinition::new(sheet, entry.frame_count, frames_per_row, timing)?
                .with_looping(entry.looping)
                .with_retrigger(entry.retrigger)
                .with_bit_depth(entry.bit_depth_hint(key)),
        )
    }

    /// Add a variant, replacing any existing one with the same threshold.
    pub fn insert(
        &mut self,
        channel: u8,
        note: u8,
        threshold: u8,
        definition: Arc<AnimationDefinition>,
    ) {
        let variants = self.slots.entry((channel, note)).or_default();
        match variants.binary_search_by_key(&threshold, |v| v.threshold) {
            Ok(i) => variants[i].definition = definition,
            Err(i) => variants.insert(
                i,
                Variant {
                    threshold,
                    definition,
                },
            ),
        }
    }

    /// Variants for a slot, ascending by threshold. Empty when unmapped.
    pub fn variants(&self, channel: u8, note: u8) -> &[Variant] {
        self.slots
            .get(&(channel, note))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Variant whose threshold is the greatest not exceeding `velocity`.
    pub fn select(&self, channel: u8, note: u8, velocity: u8) -> Option<&Variant> {
        velocity::select(self.variants(channel, note), velocity)
    }

    /// Total number of loaded definitions.
    pub fn len(&self) -> usize {
        self.slots.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
