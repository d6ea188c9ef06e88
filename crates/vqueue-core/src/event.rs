use serde::{Deserialize, Serialize};

use crate::MoleculeId;

/// Why a molecule left its lane before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// Its interrupt policy was Discard and something preempted it.
    Preempted,
    /// Explicit `vqueue_stop` / `vqueue_cancel`.
    Cancelled,
    /// A live DTMF digit arrived while it carried the dtmf_stop flag.
    DtmfStop,
    /// Mute playback ran past the end while it was preempted.
    Expired,
    /// The host audio layer refused to start its current atom.
    AudioFailed,
}

/// Notifications emitted by the engine, fanned out to all subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineEvent {
    Enqueued {
        id: MoleculeId,
        priority: u8,
    },
    /// An atom (or one DTMF digit of an atom) started on the audio device.
    AtomStarted {
        id: MoleculeId,
        atom: usize,
    },
    Completed {
        id: MoleculeId,
    },
    Discarded {
        id: MoleculeId,
        reason: DiscardReason,
    },
    /// All lanes are empty and nothing is running.
    Idle,
    Error {
        message: String,
    },
}
