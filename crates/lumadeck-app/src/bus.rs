use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::midi::types::ControlEvent;
use crate::tempo::TempoUpdate;

/// Typed notifications fanned out to subscribers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StateEvent {
    Tempo(TempoUpdate),
    /// Input connection state after a 0 <-> non-zero source transition.
    Connection(bool),
    Control(ControlEvent),
}

/// Listener registry: every subscriber owns a bounded receiver.
///
/// Producers only publish real changes, so subscribers never see a repeated
/// value for the same state. Full subscribers miss events rather than block
/// the render thread; disconnected ones are pruned on the next publish.
pub struct StateBus {
    subscribers: Vec<Sender<StateEvent>>,
    capacity: usize,
}

impl Default for StateBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl StateBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&mut self) -> Receiver<StateEvent> {
        let (tx, rx) = crossbeam_channel::bounded(self.capacity);
        self.subscribers.push(tx);
        rx
    }

    pub fn publish(&mut self, event: StateEvent) {
        self.subscribers.retain(|tx| match tx.try_send(event) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
