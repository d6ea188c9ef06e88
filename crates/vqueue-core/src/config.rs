use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Process-level audio parameters for one call session.
///
/// The host loads and merges these from its own configuration sources;
/// the engine only consumes the resulting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the DTMF tone files (`sound0.wav` .. `sound9.wav`,
    /// `soundstar.wav`, `soundroute.wav`, `soundA.wav` .. `soundD.wav`).
    pub audio_dir: PathBuf,
    /// Capture sample rate in Hz.
    pub file_srate: u32,
    /// Capture channel count.
    pub file_channels: u16,
    /// Packet time for capture framing, in milliseconds.
    pub ptime_ms: u32,
    /// Playback module handed to the host player.
    pub alert_module: String,
    /// Playback device handed to the host player.
    pub alert_device: String,
    /// Duration of a single synthesized DTMF tone.
    pub tone_ms: u64,
    /// Default gap between DTMF digits when the command omits one.
    pub inter_digit_delay_ms: u64,
    /// Default record silence-timeout when the command omits one.
    pub max_silence_ms: u64,
    /// How long handle calls wait for the control thread to answer.
    pub command_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            audio_dir: PathBuf::from("."),
            file_srate: 16_000,
            file_channels: 1,
            ptime_ms: 40,
            alert_module: String::new(),
            alert_device: String::new(),
            tone_ms: 100,
            inter_digit_delay_ms: 40,
            max_silence_ms: 500,
            command_timeout: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Per-digit duration of a DTMF atom with the given gap.
    pub fn digit_slot_ms(&self, inter_digit_delay_ms: u64) -> u64 {
        self.tone_ms + inter_digit_delay_ms
    }
}
