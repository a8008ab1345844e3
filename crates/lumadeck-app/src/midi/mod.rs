pub mod input;
pub mod sources;
pub mod types;

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use self::input::{EventSink, MidiPort};
use self::sources::InputSources;
use self::types::ControlEvent;

/// Queue depth between the MIDI callback threads and the render thread.
const EVENT_QUEUE: usize = 1024;
const PORT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const CLIENT_NAME: &str = "lumadeck";

/// Bring `sources` in line with the `available` port names: open and attach
/// new ones, detach vanished ones. Returns the connection state when the
/// scan flipped it.
pub fn sync_sources<C>(
    sources: &mut InputSources<C>,
    available: &[String],
    mut open: impl FnMut(&str) -> anyhow::Result<C>,
) -> Option<bool> {
    let was_connected = sources.connected();
    sources.retain(|name| available.iter().any(|p| p == name));
    for name in available {
        if sources.contains(name) {
            continue;
        }
        match open(name) {
            Ok(source) => {
                sources.attach(name, source);
            }
            Err(e) => log::error!("Failed to open MIDI port '{name}': {e}"),
        }
    }
    let connected = sources.connected();
    (connected != was_connected).then_some(connected)
}

/// Every MIDI input on the system, funnelled into one event queue.
pub struct MidiSystem {
    epoch: Instant,
    sender: Sender<ControlEvent>,
    receiver: Receiver<ControlEvent>,
    sources: InputSources<MidiPort>,
    last_port_poll: Instant,
    pub available_ports: Vec<String>,
}

impl MidiSystem {
    /// Scan and attach every available input. Timestamps are milliseconds
    /// since `epoch`.
    pub fn new(epoch: Instant) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(EVENT_QUEUE);
        let mut sys = Self {
            epoch,
            sender,
            receiver,
            sources: InputSources::new(),
            last_port_poll: Instant::now(),
            available_ports: Vec::new(),
        };
        sys.refresh();
        if sys.available_ports.is_empty() {
            log::info!("No MIDI inputs found, waiting for hot-plug");
        }
        sys
    }

    /// Receiving end of the event queue.
    pub fn receiver(&self) -> Receiver<ControlEvent> {
        self.receiver.clone()
    }

    /// Extra producer for events that do not come from a port.
    pub fn sender(&self) -> Sender<ControlEvent> {
        self.sender.clone()
    }

    pub fn connected(&self) -> bool {
        self.sources.connected()
    }

    pub fn attached(&self) -> impl Iterator<Item = &str> {
        self.sources.names()
    }

    /// Hot-plug check, rate limited to one port scan every two seconds.
    /// Returns the connection state when it flipped.
    pub fn poll(&mut self) -> Option<bool> {
        if self.last_port_poll.elapsed() < PORT_POLL_INTERVAL {
            return None;
        }
        self.last_port_poll = Instant::now();
        self.refresh()
    }

    /// Rescan ports now.
    pub fn refresh(&mut self) -> Option<bool> {
        self.available_ports = MidiPort::list_ports(CLIENT_NAME);
        let sink = EventSink::new(self.epoch, self.sender.clone());
        sync_sources(&mut self.sources, &self.available_ports, |name| {
            MidiPort::open(CLIENT_NAME, name, sink.clone())
        })
    }
}
