//! The decision core: preemption, resumption and dispatch.
//!
//! Owned exclusively by the control thread. At most one playback or
//! capture operation is outstanding at any instant; every start call gets
//! a fresh token, and completions whose token no longer matches the
//! in-flight operation are dropped as stale. That makes releasing a handle
//! (whose cancellation still reports back asynchronously) safe at any
//! point.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use vqueue_core::config::EngineConfig;
use vqueue_core::event::{DiscardReason, EngineEvent};
use vqueue_core::mode::InterruptPolicy;
use vqueue_core::MoleculeId;

use crate::atom::{tone_file, Atom};
use crate::audio::{
    AtomOutcome, AudioAdapters, Completion, CompletionMsg, OperationHandle, StreamParams,
};
use crate::clock::Clock;
use crate::event_hub::EventHub;
use crate::lanes::Lanes;
use crate::molecule::Molecule;
use crate::parser;

use super::{EngineMsg, EngineSnapshot, RunningInfo};

/// Bookkeeping for the molecule whose atom is on the device (or waiting
/// out a DTMF inter-digit gap).
struct RunningOp {
    id: MoleculeId,
    token: u64,
    in_gap: bool,
}

/// What `step` decided to hand to the audio layer.
enum Dispatch {
    Play { filename: String, offset_ms: u64 },
    Record { filename: String, max_silence_ms: u64 },
}

/// Where a molecule stands after one of its operations completed.
enum AfterCompletion {
    /// The molecule vanished from its lane in the meantime.
    Gone,
    /// More DTMF digits follow after a silent gap.
    Gap { delay_ms: u64 },
    /// More DTMF digits follow immediately.
    NextDigit,
    /// Loop wrapped back to the first atom.
    Wrapped,
    /// The next atom is up.
    NextAtom,
    /// The molecule is terminally complete.
    Finished,
}

pub(super) struct Scheduler {
    config: EngineConfig,
    adapters: AudioAdapters,
    clock: Arc<dyn Clock>,
    events: Arc<EventHub>,
    mailbox_tx: Sender<EngineMsg>,
    lanes: Lanes,
    cur_play: Option<Box<dyn OperationHandle>>,
    cur_rec: Option<Box<dyn OperationHandle>>,
    running: Option<RunningOp>,
    op_token: u64,
    /// Fires when a DTMF inter-digit gap elapses; `never()` otherwise.
    gap_rx: Receiver<Instant>,
}

impl Scheduler {
    pub(super) fn new(
        config: EngineConfig,
        adapters: AudioAdapters,
        clock: Arc<dyn Clock>,
        events: Arc<EventHub>,
        mailbox_tx: Sender<EngineMsg>,
    ) -> Self {
        Self {
            config,
            adapters,
            clock,
            events,
            mailbox_tx,
            lanes: Lanes::new(),
            cur_play: None,
            cur_rec: None,
            running: None,
            op_token: 0,
            gap_rx: crossbeam_channel::never(),
        }
    }

    pub(super) fn gap_receiver(&self) -> Receiver<Instant> {
        self.gap_rx.clone()
    }

    /// Handle one mailbox message to completion. Returns true on shutdown.
    pub(super) fn handle(&mut self, msg: EngineMsg) -> bool {
        match msg {
            EngineMsg::Enqueue { line, reply } => {
                let result = parser::parse(&line, self.adapters.files.as_ref(), &self.config);
                let result = match result {
                    Ok(molecule) => Ok(self.on_enqueue(molecule)),
                    Err(err) => {
                        warn!(%err, %line, "rejected command");
                        Err(err)
                    }
                };
                let _ = reply.send(result);
            }
            EngineMsg::Stop { id } => self.on_cancel(id, DiscardReason::Cancelled),
            EngineMsg::CancelPriority { priority } => self.on_cancel_priority(priority),
            EngineMsg::DtmfDetected { digit } => self.on_dtmf(digit),
            EngineMsg::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            EngineMsg::Shutdown => return true,
            EngineMsg::Completion(msg) => self.on_complete(msg),
        }
        false
    }

    fn snapshot(&mut self) -> EngineSnapshot {
        let running_id = self.running.as_ref().map(|run| run.id);
        let running = running_id.and_then(|id| {
            self.lanes
                .find_mut(id)
                .map(|m| RunningInfo { id, atom: m.current })
        });
        EngineSnapshot {
            running,
            lane_depths: self.lanes.depths(),
        }
    }

    fn on_enqueue(&mut self, molecule: Molecule) -> MoleculeId {
        let priority = molecule.priority;
        let id = self.lanes.enqueue(molecule);
        info!(id, priority, "molecule enqueued");
        self.events.emit(EngineEvent::Enqueued { id, priority });

        let run_id = self.running.as_ref().map(|run| run.id);
        if let Some(run_id) = run_id {
            if let Some(incumbent) = self.lanes.find_mut(run_id) {
                let shielded = incumbent.modes.policy() == InterruptPolicy::DontInterrupt;
                if shielded || priority <= incumbent.priority {
                    // The newcomer waits its turn in its lane.
                    return id;
                }
                self.preempt(run_id);
            }
        }
        self.step();
        id
    }

    /// Stop the incumbent and apply its interrupt policy.
    fn preempt(&mut self, run_id: MoleculeId) {
        let now = self.clock.now_ms();
        self.release_handles();
        self.disarm_gap();
        self.running = None;

        let policy = match self.lanes.find_mut(run_id) {
            Some(m) => {
                let played = now.saturating_sub(m.time_started_ms);
                let total = m.total_length_ms();
                m.position_ms = m.position_ms.saturating_add(played);
                if m.modes.loops() {
                    if total > 0 {
                        m.position_ms %= total;
                    }
                } else {
                    m.position_ms = m.position_ms.min(total);
                }
                m.time_stopped_ms = Some(now);
                let policy = m.modes.policy();
                if policy == InterruptPolicy::Restart {
                    m.rewind();
                }
                policy
            }
            None => return,
        };
        debug!(id = run_id, ?policy, "preempted");

        if policy == InterruptPolicy::Discard {
            self.lanes.remove(run_id);
            self.events.emit(EngineEvent::Discarded {
                id: run_id,
                reason: DiscardReason::Preempted,
            });
        }
    }

    fn on_complete(&mut self, msg: CompletionMsg) {
        let Some(run) = &self.running else {
            // Late report from a released handle after the queue drained.
            return;
        };
        if run.token != msg.token {
            // Stale: a newer operation owns the device.
            return;
        }
        let run_id = run.id;
        self.running = None;
        self.release_handles();

        let recorded = match msg.outcome {
            AtomOutcome::Cancelled => {
                // A cancelled operation never advances the molecule.
                self.step();
                return;
            }
            AtomOutcome::Failed { reason } => {
                // Mid-stream device errors count as completion of the atom.
                warn!(id = run_id, %reason, "audio operation failed");
                None
            }
            AtomOutcome::Recorded { length_ms } => Some(length_ms),
            AtomOutcome::Completed => None,
        };
        self.advance(run_id, recorded);
    }

    /// Move a molecule forward after its current operation finished.
    fn advance(&mut self, run_id: MoleculeId, recorded_ms: Option<u64>) {
        let after = match self.lanes.find_mut(run_id) {
            None => AfterCompletion::Gone,
            Some(m) => {
                if let Some(length_ms) = recorded_ms {
                    if let Some(Atom::Record(record)) = m.atoms.get_mut(m.current) {
                        record.length_ms = length_ms;
                    }
                }

                let mut digit_gap = None;
                if let Some(Atom::Dtmf(dtmf)) = m.atoms.get_mut(m.current) {
                    dtmf.cursor += 1;
                    if dtmf.cursor < dtmf.digits.len() {
                        digit_gap = Some(dtmf.inter_digit_delay_ms);
                    }
                }

                if let Some(delay_ms) = digit_gap {
                    // A pending gap is not played time yet; credit it when
                    // it elapses.
                    let position = digit_position(m);
                    m.position_ms = position.saturating_sub(delay_ms);
                    if delay_ms > 0 {
                        AfterCompletion::Gap { delay_ms }
                    } else {
                        AfterCompletion::NextDigit
                    }
                } else if m.modes.loops() && m.current + 1 == m.atoms.len() {
                    m.rewind();
                    AfterCompletion::Wrapped
                } else {
                    m.current += 1;
                    m.position_ms = m.length_before(m.current);
                    if m.is_complete() {
                        AfterCompletion::Finished
                    } else {
                        AfterCompletion::NextAtom
                    }
                }
            }
        };

        match after {
            AfterCompletion::Gap { delay_ms } => self.arm_gap(run_id, delay_ms),
            AfterCompletion::Finished => {
                self.lanes.remove(run_id);
                info!(id = run_id, "molecule completed");
                self.events.emit(EngineEvent::Completed { id: run_id });
                self.step();
            }
            AfterCompletion::Gone
            | AfterCompletion::NextDigit
            | AfterCompletion::Wrapped
            | AfterCompletion::NextAtom => self.step(),
        }
    }

    fn on_cancel(&mut self, id: MoleculeId, reason: DiscardReason) {
        let was_running = self.running.as_ref().is_some_and(|run| run.id == id);
        if self.lanes.cancel(id) {
            info!(id, ?reason, "molecule cancelled");
            self.events.emit(EngineEvent::Discarded { id, reason });
        }
        if was_running {
            self.release_handles();
            self.disarm_gap();
            self.running = None;
            self.step();
        }
    }

    fn on_cancel_priority(&mut self, priority: u8) {
        let running_id = self.running.as_ref().map(|run| run.id);
        let running_here = running_id.is_some_and(|id| {
            self.lanes
                .find_mut(id)
                .is_some_and(|m| m.priority == priority)
        });

        let removed = self.lanes.cancel_priority(priority);
        if !removed.is_empty() {
            info!(priority, count = removed.len(), "lane cancelled");
        }
        for id in removed {
            self.events.emit(EngineEvent::Discarded {
                id,
                reason: DiscardReason::Cancelled,
            });
        }

        if running_here {
            self.release_handles();
            self.disarm_gap();
            self.running = None;
            self.step();
        }
    }

    /// A digit heard on the live stream cancels a running dtmf_stop
    /// molecule; anything else ignores it.
    fn on_dtmf(&mut self, digit: char) {
        let Some(run) = &self.running else {
            return;
        };
        let run_id = run.id;
        let stops = self
            .lanes
            .find_mut(run_id)
            .is_some_and(|m| m.modes.stops_on_dtmf());
        if stops {
            info!(id = run_id, digit = %digit, "stopped by incoming DTMF");
            self.on_cancel(run_id, DiscardReason::DtmfStop);
        }
    }

    /// The dispatch loop: pick the next candidate with `Lanes::next`,
    /// resume muted molecules at their virtual position, start exactly one
    /// audio operation. Molecules whose start fails are dropped and the
    /// loop tries the next candidate.
    fn step(&mut self) {
        if self.running.is_some() {
            return;
        }
        loop {
            let now = self.clock.now_ms();
            let Some(m) = self.lanes.next() else {
                self.events.emit(EngineEvent::Idle);
                return;
            };
            let id = m.id;

            if m.modes.policy() == InterruptPolicy::Mute {
                if let Some(stopped) = m.time_stopped_ms {
                    // Time kept running while the molecule sat preempted.
                    let target = m.position_ms + now.saturating_sub(stopped);
                    if target >= m.total_length_ms() && !m.modes.loops() {
                        debug!(id, "muted molecule ran out while preempted");
                        self.lanes.remove(id);
                        self.events.emit(EngineEvent::Discarded {
                            id,
                            reason: DiscardReason::Expired,
                        });
                        continue;
                    }
                    m.seek(target);
                    m.time_stopped_ms = None;
                    if m.is_complete() {
                        self.lanes.remove(id);
                        continue;
                    }
                }
            } else {
                m.time_stopped_ms = None;
            }

            let atom_index = m.current;
            let dispatch = match &m.atoms[atom_index] {
                Atom::Play(play) => Dispatch::Play {
                    filename: play.filename.clone(),
                    offset_ms: play.offset_ms,
                },
                Atom::Dtmf(dtmf) => match dtmf.pending_digit() {
                    Some(digit) => Dispatch::Play {
                        filename: self
                            .config
                            .audio_dir
                            .join(tone_file(digit))
                            .to_string_lossy()
                            .into_owned(),
                        offset_ms: 0,
                    },
                    None => {
                        warn!(id, "DTMF cursor ran past its digits");
                        self.lanes.remove(id);
                        continue;
                    }
                },
                Atom::Record(record) => Dispatch::Record {
                    filename: record.filename.clone(),
                    max_silence_ms: record.max_silence_ms,
                },
            };

            self.op_token += 1;
            let token = self.op_token;
            let completion = Completion::new(self.mailbox_tx.clone(), token);

            let started = match dispatch {
                Dispatch::Play {
                    filename,
                    offset_ms,
                } => {
                    debug!(id, %filename, offset_ms, "starting playback");
                    self.adapters
                        .player
                        .start(
                            &filename,
                            offset_ms,
                            &self.config.alert_module,
                            &self.config.alert_device,
                            completion,
                        )
                        .map(|handle| self.cur_play = Some(handle))
                }
                Dispatch::Record {
                    filename,
                    max_silence_ms,
                } => {
                    debug!(id, %filename, max_silence_ms, "starting capture");
                    let params = StreamParams {
                        srate: self.config.file_srate,
                        channels: self.config.file_channels,
                        ptime_ms: self.config.ptime_ms,
                    };
                    self.adapters
                        .capture
                        .start(params, &filename, max_silence_ms, completion)
                        .map(|handle| self.cur_rec = Some(handle))
                }
            };

            match started {
                Ok(()) => {
                    if let Some(m) = self.lanes.find_mut(id) {
                        m.time_started_ms = now;
                    }
                    self.running = Some(RunningOp {
                        id,
                        token,
                        in_gap: false,
                    });
                    self.events.emit(EngineEvent::AtomStarted {
                        id,
                        atom: atom_index,
                    });
                    return;
                }
                Err(err) => {
                    warn!(id, %err, "audio start failed; dropping molecule");
                    self.lanes.remove(id);
                    self.events.emit(EngineEvent::Discarded {
                        id,
                        reason: DiscardReason::AudioFailed,
                    });
                    self.events.emit(EngineEvent::Error {
                        message: err.to_string(),
                    });
                    continue;
                }
            }
        }
    }

    fn arm_gap(&mut self, run_id: MoleculeId, delay_ms: u64) {
        let now = self.clock.now_ms();
        if let Some(m) = self.lanes.find_mut(run_id) {
            // Restart the elapsed-time base so a preemption mid-gap only
            // accounts for the gap portion that really passed.
            m.time_started_ms = now;
        }
        self.op_token += 1;
        self.running = Some(RunningOp {
            id: run_id,
            token: self.op_token,
            in_gap: true,
        });
        self.gap_rx = crossbeam_channel::after(Duration::from_millis(delay_ms));
    }

    pub(super) fn handle_gap_elapsed(&mut self) {
        self.gap_rx = crossbeam_channel::never();
        match self.running.take() {
            Some(run) if run.in_gap => {
                if let Some(m) = self.lanes.find_mut(run.id) {
                    // The elapsed gap now counts as played time.
                    let position = digit_position(m);
                    m.position_ms = position;
                }
                self.step();
            }
            other => self.running = other,
        }
    }

    fn disarm_gap(&mut self) {
        self.gap_rx = crossbeam_channel::never();
    }

    /// Idempotent; must happen before any new start.
    fn release_handles(&mut self) {
        if let Some(mut handle) = self.cur_play.take() {
            handle.release();
        }
        if let Some(mut handle) = self.cur_rec.take() {
            handle.release();
        }
    }

    pub(super) fn release_all(&mut self) {
        self.release_handles();
        self.disarm_gap();
        self.running = None;
    }
}

/// Played duration up to the molecule's digit cursor, in whole per-digit
/// slots.
fn digit_position(m: &Molecule) -> u64 {
    let mut position = m.length_before(m.current);
    if let Some(Atom::Dtmf(dtmf)) = m.atoms.get(m.current) {
        position += dtmf.cursor as u64 * dtmf.digit_ms;
    }
    position
}
