//! The scheduling engine: one control thread per call session.
//!
//! Commands from the host and completions from the audio layer land in a
//! single mailbox and are handled to completion, one at a time, by the
//! control thread. That serialisation is the whole concurrency story: no
//! scheduler state is touched anywhere else.

mod scheduler;


use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::info;

use vqueue_core::config::EngineConfig;
use vqueue_core::error::{EngineError, ParseError};
use vqueue_core::event::EngineEvent;
use vqueue_core::{MoleculeId, PRIORITY_LEVELS};

use crate::audio::{AudioAdapters, CompletionMsg};
use crate::clock::{Clock, MonotonicClock};
use crate::event_hub::EventHub;

use self::scheduler::Scheduler;

/// Everything the control thread can be asked to do.
pub(crate) enum EngineMsg {
    Enqueue {
        line: String,
        reply: Sender<Result<MoleculeId, ParseError>>,
    },
    Stop {
        id: MoleculeId,
    },
    CancelPriority {
        priority: u8,
    },
    DtmfDetected {
        digit: char,
    },
    Snapshot {
        reply: Sender<EngineSnapshot>,
    },
    Shutdown,
    Completion(CompletionMsg),
}

/// The atom an in-flight operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunningInfo {
    pub id: MoleculeId,
    pub atom: usize,
}

/// Point-in-time view of the queue, answered by the control thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub running: Option<RunningInfo>,
    pub lane_depths: [usize; PRIORITY_LEVELS],
}

impl EngineSnapshot {
    pub fn is_idle(&self) -> bool {
        self.running.is_none() && self.lane_depths.iter().all(|&depth| depth == 0)
    }
}

/// Handle used by the host (command bindings, call teardown) to drive the
/// session's scheduler.
#[derive(Clone)]
pub struct EngineHandle {
    tx: Sender<EngineMsg>,
    events: Arc<EventHub>,
    timeout: Duration,
}

impl EngineHandle {
    /// Lower a command line to a molecule and queue it. Returns the
    /// molecule id; parse rejections never touch the queue.
    pub fn enqueue(&self, line: &str) -> Result<MoleculeId, EngineError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(EngineMsg::Enqueue {
                line: line.to_string(),
                reply: reply_tx,
            })
            .map_err(|_| EngineError::Closed)?;
        match reply_rx.recv_timeout(self.timeout) {
            Ok(result) => Ok(result?),
            Err(RecvTimeoutError::Timeout) => Err(EngineError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::Closed),
        }
    }

    /// Cancel one molecule. Unknown ids are silently ignored.
    pub fn stop(&self, id: MoleculeId) {
        let _ = self.tx.send(EngineMsg::Stop { id });
    }

    /// Discard every molecule of one priority lane.
    pub fn cancel_priority(&self, priority: u8) {
        let _ = self.tx.send(EngineMsg::CancelPriority { priority });
    }

    /// Report a DTMF digit heard on the live audio stream.
    pub fn dtmf_detected(&self, digit: char) {
        let _ = self.tx.send(EngineMsg::DtmfDetected { digit });
    }

    pub fn snapshot(&self) -> Result<EngineSnapshot, EngineError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(EngineMsg::Snapshot { reply: reply_tx })
            .map_err(|_| EngineError::Closed)?;
        match reply_rx.recv_timeout(self.timeout) {
            Ok(snapshot) => Ok(snapshot),
            Err(RecvTimeoutError::Timeout) => Err(EngineError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::Closed),
        }
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(EngineMsg::Shutdown);
    }

    pub fn subscribe_events(&self) -> Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

/// Spawn the control thread for one call session.
pub fn start_engine(config: EngineConfig, adapters: AudioAdapters) -> (EngineHandle, JoinHandle<()>) {
    start_engine_with_clock(config, adapters, Arc::new(MonotonicClock::default()))
}

/// As [`start_engine`], with the monotonic source supplied by the caller.
pub fn start_engine_with_clock(
    config: EngineConfig,
    adapters: AudioAdapters,
    clock: Arc<dyn Clock>,
) -> (EngineHandle, JoinHandle<()>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let events = Arc::new(EventHub::new());
    let timeout = config.command_timeout;

    let scheduler = Scheduler::new(config, adapters, clock, Arc::clone(&events), tx.clone());
    let join = thread::Builder::new()
        .name("vqueue-control".to_string())
        .spawn(move || run_control_loop(rx, scheduler))
        .expect("failed to spawn vqueue-control thread");

    (
        EngineHandle {
            tx,
            events,
            timeout,
        },
        join,
    )
}

fn run_control_loop(rx: Receiver<EngineMsg>, mut scheduler: Scheduler) {
    info!("control thread started");
    loop {
        let gap_rx = scheduler.gap_receiver();
        crossbeam_channel::select! {
            recv(rx) -> msg => {
                let Ok(msg) = msg else { break };
                if scheduler.handle(msg) {
                    break;
                }
            }
            recv(gap_rx) -> _ => scheduler.handle_gap_elapsed(),
        }
    }
    scheduler.release_all();
    info!("control thread exited");
}
