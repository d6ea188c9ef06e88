//! Seams to the host user-agent's audio layer.
//!
//! The engine never touches devices or files itself. It drives the three
//! contracts below and hears back through [`Completion`], which routes the
//! host's callback onto the control thread. Samples are 16-bit LE PCM
//! throughout; companded formats are widened by the host's file reader.

use crossbeam_channel::Sender;

use vqueue_core::error::AudioError;

use crate::engine::EngineMsg;

/// Capture framing parameters, taken from the engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub srate: u32,
    pub channels: u16,
    pub ptime_ms: u32,
}

/// How the in-flight audio operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomOutcome {
    /// Play reached end of file, or a DTMF tone drained.
    Completed,
    /// Record hit its silence timeout; carries the captured duration.
    Recorded { length_ms: u64 },
    /// The handle was released before the operation finished.
    Cancelled,
    /// The device reported an error mid-operation.
    Failed { reason: String },
}

/// One-shot trampoline handed to the host with every start call.
///
/// The host fires it exactly once, from any thread; the engine's control
/// thread picks the message up in order with everything else. Late
/// completions from released handles are recognised by their stale token
/// and dropped.
pub struct Completion {
    tx: Sender<EngineMsg>,
    token: u64,
}

#[derive(Debug)]
pub(crate) struct CompletionMsg {
    pub(crate) token: u64,
    pub(crate) outcome: AtomOutcome,
}

impl Completion {
    pub(crate) fn new(tx: Sender<EngineMsg>, token: u64) -> Self {
        Self { tx, token }
    }

    pub fn finish(self, outcome: AtomOutcome) {
        let _ = self.tx.send(EngineMsg::Completion(CompletionMsg {
            token: self.token,
            outcome,
        }));
    }
}

/// An in-flight playback or capture operation.
///
/// Release stops the operation; the host still fires the completion with
/// [`AtomOutcome::Cancelled`]. Releasing twice is harmless.
pub trait OperationHandle: Send {
    fn release(&mut self);
}

/// The host's playback side.
pub trait Player: Send {
    /// Start playing `filename` at `offset_ms` on the configured alert
    /// module/device. Returns a handle the engine releases on preemption
    /// or cancel.
    fn start(
        &mut self,
        filename: &str,
        offset_ms: u64,
        module: &str,
        device: &str,
        completion: Completion,
    ) -> Result<Box<dyn OperationHandle>, AudioError>;
}

/// The host's capture side.
pub trait Capture: Send {
    /// Record into `filename` until silence lasts `max_silence_ms`.
    fn start(
        &mut self,
        params: StreamParams,
        filename: &str,
        max_silence_ms: u64,
        completion: Completion,
    ) -> Result<Box<dyn OperationHandle>, AudioError>;
}

/// The host's audio-file metadata reader.
pub trait AudioFiles: Send {
    /// Total duration of `filename` in milliseconds, or an error when the
    /// file cannot be opened as audio.
    fn duration_ms(&self, filename: &str) -> Result<u64, AudioError>;
}

/// The bundle of host seams a session is created with.
pub struct AudioAdapters {
    pub player: Box<dyn Player>,
    pub capture: Box<dyn Capture>,
    pub files: Box<dyn AudioFiles>,
}
