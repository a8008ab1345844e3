use serde::{Deserialize, Serialize};

/// Kind of a normalized control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    NoteOn,
    NoteOff,
    ControlChange,
    ClockPulse,
    Start,
    Stop,
    Continue,
}

impl EventKind {
    /// System realtime kinds carry no channel or data bytes.
    pub fn is_realtime(&self) -> bool {
        matches!(
            self,
            EventKind::ClockPulse | EventKind::Start | EventKind::Stop | EventKind::Continue
        )
    }
}

/// Decoded control message, small enough to Copy through channels.
///
/// `channel` is 0-indexed. For notes `data1` is the note number and `data2`
/// the velocity; for controller changes they are controller number and value.
/// Realtime events leave all three at zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlEvent {
    pub kind: EventKind,
    pub channel: u8,
    pub data1: u8,
    pub data2: u8,
    /// Milliseconds since the process epoch.
    pub timestamp: f64,
}

impl ControlEvent {
    pub fn note_on(channel: u8, note: u8, velocity: u8, timestamp: f64) -> Self {
        Self {
            kind: EventKind::NoteOn,
            channel,
            data1: note,
            data2: velocity,
            timestamp,
        }
    }

    pub fn note_off(channel: u8, note: u8, timestamp: f64) -> Self {
        Self {
            kind: EventKind::NoteOff,
            channel,
            data1: note,
            data2: 0,
            timestamp,
        }
    }

    pub fn control_change(channel: u8, controller: u8, value: u8, timestamp: f64) -> Self {
        Self {
            kind: EventKind::ControlChange,
            channel,
            data1: controller,
            data2: value,
            timestamp,
        }
    }

    pub fn realtime(kind: EventKind, timestamp: f64) -> Self {
        Self {
            kind,
            channel: 0,
            data1: 0,
            data2: 0,
            timestamp,
        }
    }
}
