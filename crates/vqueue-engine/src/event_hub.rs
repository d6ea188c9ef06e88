//! Fan-out of engine events to any number of subscribers.

use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender};

use vqueue_core::event::EngineEvent;

pub struct EventHub {
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        match self.subscribers.lock() {
            Ok(mut subs) => subs.push(tx),
            Err(poisoned) => poisoned.into_inner().push(tx),
        }
        rx
    }

    pub fn emit(&self, event: EngineEvent) {
        let mut subs = match self.subscribers.lock() {
            Ok(subs) => subs,
            Err(poisoned) => poisoned.into_inner(),
        };
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use vqueue_core::event::EngineEvent;

    use super::EventHub;

    #[test]
    fn emit_reaches_all_live_subscribers_and_prunes_dead_ones() {
        let hub = EventHub::new();
        let first = hub.subscribe();
        let second = hub.subscribe();
        drop(second);

        hub.emit(EngineEvent::Idle);
        assert_eq!(first.try_recv(), Ok(EngineEvent::Idle));

        hub.emit(EngineEvent::Idle);
        assert_eq!(first.try_recv(), Ok(EngineEvent::Idle));
    }
}
