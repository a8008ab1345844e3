//! Tempo estimation from MIDI clock, a tempo controller, or a manual value.
//!
//! Sources compete by precedence: Clock > Controller > Manual > Default. The
//! clock path measures every `pulses_per_measurement` pulses, rejects
//! measurements that stray too far from the rolling average, and smooths the
//! accepted ones against the published value.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{DeckError, Result};

/// Where the current BPM came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TempoSource {
    Default,
    Manual,
    Controller,
    Clock,
}

impl TempoSource {
    fn precedence(self) -> u8 {
        match self {
            TempoSource::Default => 0,
            TempoSource::Manual => 1,
            TempoSource::Controller => 2,
            TempoSource::Clock => 3,
        }
    }
}

/// Published tempo: emitted only when the value or source actually changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoUpdate {
    pub bpm: f64,
    pub source: TempoSource,
}

/// Controller that sets tempo. `channel: None` listens on every channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerBinding {
    #[serde(default)]
    pub channel: Option<u8>,
    pub controller: u8,
}

impl ControllerBinding {
    pub fn matches(&self, channel: u8, controller: u8) -> bool {
        self.controller == controller && self.channel.is_none_or(|c| c == channel)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    pub min_bpm: f64,
    pub max_bpm: f64,
    pub default_bpm: f64,
    /// Clock pulses per quarter note.
    pub ppqn: u32,
    /// Pulses accumulated before each raw BPM measurement.
    pub pulses_per_measurement: u32,
    /// Rolling window of accepted measurements.
    pub window: usize,
    /// Maximum relative deviation from the rolling average (0.15 = 15%).
    pub outlier_tolerance: f64,
    /// Weight of the previously published BPM in exponential smoothing.
    pub smoothing: f64,
    /// Clock silence after which the next-lower source takes over.
    pub timeout_ms: f64,
    /// Smallest BPM change worth publishing.
    pub publish_epsilon: f64,
    /// Beat durations shorter than this are spurious.
    pub min_beat_ms: f64,
    pub controller: Option<ControllerBinding>,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            min_bpm: 20.0,
            max_bpm: 300.0,
            default_bpm: 120.0,
            ppqn: 24,
            pulses_per_measurement: 6,
            window: 8,
            outlier_tolerance: 0.15,
            smoothing: 0.9,
            timeout_ms: 1000.0,
            publish_epsilon: 0.01,
            min_beat_ms: 10.0,
            controller: Some(ControllerBinding {
                channel: None,
                controller: 20,
            }),
        }
    }
}

impl TempoConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_bpm.is_finite() && self.min_bpm > 0.0) {
            return Err(DeckError::Config("min_bpm must be positive".into()));
        }
        if !(self.max_bpm.is_finite() && self.max_bpm >= self.min_bpm) {
            return Err(DeckError::Config("max_bpm must be >= min_bpm".into()));
        }
        if self.ppqn == 0 || self.pulses_per_measurement == 0 || self.window == 0 {
            return Err(DeckError::Config(
                "ppqn, pulses_per_measurement and window must be non-zero".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(DeckError::Config("smoothing must be in [0, 1)".into()));
        }
        if !(self.default_bpm.is_finite() && self.default_bpm > 0.0) {
            return Err(DeckError::Config("default_bpm must be positive".into()));
        }
        let non_negative = |v: f64| v.is_finite() && v >= 0.0;
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !(non_negative(self.outlier_tolerance) && positive(self.timeout_ms)) {
            return Err(DeckError::Config(
                "outlier_tolerance and timeout_ms must be positive".into(),
            ));
        }
        if !(non_negative(self.min_beat_ms) && non_negative(self.publish_epsilon)) {
            return Err(DeckError::Config(
                "min_beat_ms and publish_epsilon must be finite and non-negative".into(),
            ));
        }
        Ok(())
    }

    fn clamp(&self, bpm: f64) -> f64 {
        bpm.clamp(self.min_bpm, self.max_bpm)
    }
}

pub struct TempoEstimator {
    config: TempoConfig,
    bpm: f64,
    source: TempoSource,
    controller_bpm: Option<f64>,
    manual_bpm: Option<f64>,
    /// Start of the current measurement block.
    anchor: Option<f64>,
    pulses_in_block: u32,
    /// Most recent pulse, for the watchdog. Survives Start and Stop.
    last_pulse: Option<f64>,
    measurements: VecDeque<f64>,
    /// Set once a clock sample has been accepted; the next ones are smoothed.
    clock_locked: bool,
    consecutive_outliers: usize,
    playing: bool,
    published: TempoUpdate,
}

impl TempoEstimator {
    pub fn new(config: TempoConfig) -> Self {
        let bpm = config.clamp(config.default_bpm);
        let window = config.window;
        Self {
            config,
            bpm,
            source: TempoSource::Default,
            controller_bpm: None,
            manual_bpm: None,
            anchor: None,
            pulses_in_block: 0,
            last_pulse: None,
            measurements: VecDeque::with_capacity(window),
            clock_locked: false,
            consecutive_outliers: 0,
            playing: false,
            published: TempoUpdate {
                bpm,
                source: TempoSource::Default,
            },
        }
    }

    pub fn config(&self) -> &TempoConfig {
        &self.config
    }

    /// Current BPM, always within the configured bounds.
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn source(&self) -> TempoSource {
        self.source
    }

    pub fn current(&self) -> TempoUpdate {
        TempoUpdate {
            bpm: self.bpm,
            source: self.source,
        }
    }

    /// Milliseconds per beat at the current tempo.
    pub fn beat_ms(&self) -> f64 {
        60_000.0 / self.bpm
    }

    /// Whether external transport is playing (Start/Continue received).
    pub fn playing(&self) -> bool {
        self.playing
    }

    /// Accepted raw measurements in the rolling window, oldest first.
    pub fn measurements(&self) -> impl Iterator<Item = f64> + '_ {
        self.measurements.iter().copied()
    }

    /// Process one clock pulse stamped at `now` ms.
    pub fn on_pulse(&mut self, now: f64) -> Option<TempoUpdate> {
        self.last_pulse = Some(now);
        let Some(anchor) = self.anchor else {
            self.anchor = Some(now);
            self.pulses_in_block = 0;
            return None;
        };

        self.pulses_in_block += 1;
        if self.pulses_in_block < self.config.pulses_per_measurement {
            return None;
        }

        let per_pulse = (now - anchor) / f64::from(self.pulses_in_block);
        self.anchor = Some(now);
        self.pulses_in_block = 0;

        let beat_ms = per_pulse * f64::from(self.config.ppqn);
        if beat_ms < self.config.min_beat_ms {
            log::debug!("Discarding spurious clock measurement ({beat_ms:.3} ms/beat)");
            return None;
        }
        self.accept_measurement(60_000.0 / beat_ms)
    }

    fn accept_measurement(&mut self, raw: f64) -> Option<TempoUpdate> {
        if let Some(avg) = self.window_average() {
            let deviation = (raw - avg).abs() / avg;
            if deviation > self.config.outlier_tolerance {
                self.consecutive_outliers += 1;
                if self.consecutive_outliers < self.config.window {
                    log::debug!(
                        "Rejecting clock outlier {raw:.2} BPM ({:.0}% from {avg:.2})",
                        deviation * 100.0
                    );
                    return None;
                }
                // A full window of disagreeing measurements is a real tempo change.
                log::info!("Clock tempo moved to ~{raw:.2} BPM, re-locking");
                self.measurements.clear();
                self.clock_locked = false;
            }
        }
        self.consecutive_outliers = 0;

        self.measurements.push_back(raw);
        while self.measurements.len() > self.config.window {
            self.measurements.pop_front();
        }
        let avg = self.window_average().unwrap_or(raw);

        let next = if self.clock_locked {
            self.config.smoothing * self.bpm + (1.0 - self.config.smoothing) * avg
        } else {
            avg
        };
        self.clock_locked = true;
        self.bpm = self.config.clamp(next);
        self.source = TempoSource::Clock;
        self.publish()
    }

    fn window_average(&self) -> Option<f64> {
        if self.measurements.is_empty() {
            return None;
        }
        Some(self.measurements.iter().sum::<f64>() / self.measurements.len() as f64)
    }

    /// Map a 0-127 controller value onto the BPM window. The value is
    /// remembered for fallback but ignored while the clock is in charge.
    pub fn on_controller(&mut self, value: u8) -> Option<TempoUpdate> {
        let t = f64::from(value.min(127)) / 127.0;
        let bpm = self.config.min_bpm + (self.config.max_bpm - self.config.min_bpm) * t;
        self.controller_bpm = Some(bpm);
        if self.source == TempoSource::Clock {
            return None;
        }
        self.bpm = self.config.clamp(bpm);
        self.source = TempoSource::Controller;
        self.publish()
    }

    /// Set a manual tempo. Takes effect only while no controller or clock
    /// value is in charge.
    pub fn set_manual(&mut self, bpm: f64) -> Option<TempoUpdate> {
        let bpm = self.config.clamp(bpm);
        self.manual_bpm = Some(bpm);
        if self.source.precedence() > TempoSource::Manual.precedence() {
            return None;
        }
        self.bpm = bpm;
        self.source = TempoSource::Manual;
        self.publish()
    }

    /// Transport Start: forget all clock history.
    pub fn on_start(&mut self) {
        self.playing = true;
        self.anchor = None;
        self.pulses_in_block = 0;
        self.measurements.clear();
        self.clock_locked = false;
        self.consecutive_outliers = 0;
    }

    /// Transport Stop: drop timing anchors, keep measurements for a fast re-lock.
    pub fn on_stop(&mut self) {
        self.playing = false;
        self.anchor = None;
        self.pulses_in_block = 0;
    }

    /// Transport Continue: notification only.
    pub fn on_continue(&mut self) {
        self.playing = true;
    }

    /// Watchdog: hand tempo back to the next-lower source when the clock has
    /// been silent longer than the timeout.
    pub fn check_timeout(&mut self, now: f64) -> Option<TempoUpdate> {
        if self.source != TempoSource::Clock {
            return None;
        }
        let silent_for = self.last_pulse.map_or(f64::INFINITY, |t| now - t);
        if silent_for <= self.config.timeout_ms {
            return None;
        }

        self.anchor = None;
        self.pulses_in_block = 0;
        self.clock_locked = false;
        let (bpm, source) = if let Some(bpm) = self.controller_bpm {
            (bpm, TempoSource::Controller)
        } else if let Some(bpm) = self.manual_bpm {
            (bpm, TempoSource::Manual)
        } else {
            (self.config.default_bpm, TempoSource::Default)
        };
        self.bpm = self.config.clamp(bpm);
        self.source = source;
        self.publish()
    }

    fn publish(&mut self) -> Option<TempoUpdate> {
        let next = self.current();
        let moved = (next.bpm - self.published.bpm).abs() > self.config.publish_epsilon;
        if !moved && next.source == self.published.source {
            return None;
        }
        if next.source != self.published.source {
            log::info!("Tempo source {:?} -> {:?}", self.published.source, next.source);
        }
        self.published = next;
        Some(next)
    }
}
