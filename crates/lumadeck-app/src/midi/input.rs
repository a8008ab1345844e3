use std::time::Instant;

use crossbeam_channel::Sender;
use midir::{MidiInput, MidiInputConnection, MidiInputPort};

use super::types::{ControlEvent, EventKind};

/// Decode raw MIDI bytes into a ControlEvent.
///
/// Realtime bytes (0xF8 and above) are single-byte messages and skip the
/// length check. Channel messages shorter than three bytes, and commands other
/// than note on/off and control change, yield `None`.
pub fn decode(data: &[u8], timestamp: f64) -> Option<ControlEvent> {
    let &status = data.first()?;
    if status >= 0xF8 {
        let kind = match status {
            0xF8 => EventKind::ClockPulse,
            0xFA => EventKind::Start,
            0xFB => EventKind::Continue,
            0xFC => EventKind::Stop,
            _ => return None, // active sensing, reset, undefined
        };
        return Some(ControlEvent::realtime(kind, timestamp));
    }

    if data.len() < 3 {
        return None;
    }
    let channel = status & 0x0F;
    let data1 = data[1] & 0x7F;
    let data2 = data[2] & 0x7F;

    match status & 0xF0 {
        0x90 if data2 == 0 => Some(ControlEvent::note_off(channel, data1, timestamp)),
        0x90 => Some(ControlEvent::note_on(channel, data1, data2, timestamp)),
        0x80 => Some(ControlEvent::note_off(channel, data1, timestamp)),
        0xB0 => Some(ControlEvent::control_change(channel, data1, data2, timestamp)),
        _ => None,
    }
}

/// Where a port's callback delivers events: stamps them against a shared
/// epoch and queues them without blocking.
#[derive(Clone)]
pub struct EventSink {
    epoch: Instant,
    tx: Sender<ControlEvent>,
}

impl EventSink {
    pub fn new(epoch: Instant, tx: Sender<ControlEvent>) -> Self {
        Self { epoch, tx }
    }

    /// Decode `data` and queue it. Returns false when the bytes were not a
    /// supported message or the queue was full.
    pub fn push(&self, data: &[u8]) -> bool {
        let now_ms = self.epoch.elapsed().as_secs_f64() * 1000.0;
        decode(data, now_ms).is_some_and(|event| self.tx.try_send(event).is_ok())
    }
}

fn find_port(input: &MidiInput, name: &str) -> Option<MidiInputPort> {
    input
        .ports()
        .into_iter()
        .find(|p| input.port_name(p).is_ok_and(|n| n == name))
}

/// An open input port. Dropping it closes the connection.
pub struct MidiPort {
    _connection: MidiInputConnection<EventSink>,
}

impl MidiPort {
    /// Connect to the input called `port_name` as MIDI client `client`.
    pub fn open(client: &str, port_name: &str, sink: EventSink) -> anyhow::Result<Self> {
        let input = MidiInput::new(client)?;
        let port = find_port(&input, port_name)
            .ok_or_else(|| anyhow::anyhow!("no input named '{port_name}'"))?;
        let connection = input
            .connect(
                &port,
                &format!("{client} in"),
                |_, data, sink| {
                    sink.push(data);
                },
                sink,
            )
            .map_err(|e| anyhow::anyhow!("connect to '{port_name}': {e}"))?;
        log::debug!("Connected MIDI input '{port_name}'");
        Ok(Self {
            _connection: connection,
        })
    }

    /// Names of every input currently visible to `client`. Empty when the
    /// MIDI backend is unavailable.
    pub fn list_ports(client: &str) -> Vec<String> {
        match MidiInput::new(client) {
            Ok(input) => input
                .ports()
                .iter()
                .filter_map(|p| input.port_name(p).ok())
                .collect(),
            Err(e) => {
                log::warn!("MIDI backend unavailable: {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_bypasses_length_check() {
        let e = decode(&[0xF8], 5.0).unwrap();
        assert_eq!(e.kind, EventKind::ClockPulse);
        assert_eq!(e.timestamp, 5.0);
        assert_eq!(decode(&[0xFA], 0.0).unwrap().kind, EventKind::Start);
        assert_eq!(decode(&[0xFB], 0.0).unwrap().kind, EventKind::Continue);
        assert_eq!(decode(&[0xFC], 0.0).unwrap().kind, EventKind::Stop);
    }

    #[test]
    fn unsupported_realtime_dropped() {
        assert!(decode(&[0xFE], 0.0).is_none());
        assert!(decode(&[0xFF], 0.0).is_none());
    }

    #[test]
    fn short_channel_messages_dropped() {
        assert!(decode(&[], 0.0).is_none());
        assert!(decode(&[0x90], 0.0).is_none());
        assert!(decode(&[0x90, 60], 0.0).is_none());
    }

    #[test]
    fn note_on_decoded_with_channel() {
        let e = decode(&[0x93, 60, 100], 1.0).unwrap();
        assert_eq!(e.kind, EventKind::NoteOn);
        assert_eq!(e.channel, 3);
        assert_eq!(e.data1, 60);
        assert_eq!(e.data2, 100);
    }

    #[test]
    fn note_on_velocity_zero_is_note_off() {
        let e = decode(&[0x90, 60, 0], 1.0).unwrap();
        assert_eq!(e.kind, EventKind::NoteOff);
        assert_eq!(e.data1, 60);
    }

    #[test]
    fn note_off_decoded() {
        let e = decode(&[0x8F, 61, 64], 1.0).unwrap();
        assert_eq!(e.kind, EventKind::NoteOff);
        assert_eq!(e.channel, 15);
        assert_eq!(e.data2, 0);
    }

    #[test]
    fn control_change_decoded() {
        let e = decode(&[0xB2, 20, 127], 1.0).unwrap();
        assert_eq!(e.kind, EventKind::ControlChange);
        assert_eq!(e.channel, 2);
        assert_eq!((e.data1, e.data2), (20, 127));
    }

    #[test]
    fn other_commands_dropped() {
        assert!(decode(&[0xE0, 0, 64], 0.0).is_none()); // pitch bend
        assert!(decode(&[0xA0, 60, 10], 0.0).is_none()); // aftertouch
    }

    #[test]
    fn sink_queues_decoded_events_until_full() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let sink = EventSink::new(Instant::now(), tx);
        assert!(!sink.push(&[0xE0, 0, 64]));
        assert!(sink.push(&[0x90, 60, 100]));
        assert!(!sink.push(&[0xF8]));
        let e = rx.try_recv().unwrap();
        assert_eq!(e.kind, EventKind::NoteOn);
        assert!(e.timestamp >= 0.0);
        assert!(rx.try_recv().is_err());
    }
}
