//! Rendering parameters and runtime configuration
//!
//! [`RenderParams`] is the immutable bundle handed identically to the batch
//! and streaming entry points; the parity guarantee depends on both paths
//! seeing exactly the same values. [`ParamsPatch`] carries partial updates
//! for the `config-update` message.

use crate::envelope::EnvelopeParams;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};

/// Default output sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
/// Default note duration in seconds.
pub const DEFAULT_DURATION: f32 = 1.0;
/// Default number of samples per network chunk (one second at 44.1 kHz).
pub const DEFAULT_SAMPLES_PER_CHUNK: usize = 44100;
/// Default real-time quantum in samples.
pub const DEFAULT_QUANTUM: usize = 128;
/// Chunks that must be buffered before playback leaves the pre-roll state.
pub const DEFAULT_MIN_BUFFERED_CHUNKS: usize = 2;
/// Default chunk window (arena slots): current, one trailing, and lookahead.
pub const DEFAULT_WINDOW_SIZE: usize = 8;

/// Immutable rendering configuration.
///
/// Missing fields fall back to the documented defaults rather than failing,
/// so a config deserialized from a partial JSON document is always usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderParams {
    /// Total note duration in seconds.
    pub duration_secs: f32,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Pitch offset in semitones, applied as a frequency ratio to every
    /// phase accumulator in the synthesis graph.
    pub note_offset: f32,
    /// Amplitude scale in [0, 1].
    pub velocity: f32,
    /// Swap left/right when interleaving multi-channel output.
    pub reverse_stereo: bool,
    /// Hint to the network that chunk evaluation may use an accelerator.
    pub use_gpu: bool,
    /// Interpolated wavetable reads instead of nearest-sample reads.
    pub anti_alias: bool,
    /// Hint to the network to route its outputs crosswise.
    pub cross_network_output: bool,
    /// Envelope applied over the whole duration.
    pub envelope: EnvelopeParams,
    /// Samples per network chunk.
    pub samples_per_chunk: usize,
    /// Samples per real-time processing quantum.
    pub quantum: usize,
    /// Chunks required before leaving the buffering pre-roll.
    pub min_buffered_chunks: usize,
    /// Chunk arena slots (current + trailing + lookahead).
    pub window_size: usize,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            duration_secs: DEFAULT_DURATION,
            sample_rate: DEFAULT_SAMPLE_RATE,
            note_offset: 0.0,
            velocity: 1.0,
            reverse_stereo: false,
            use_gpu: false,
            anti_alias: false,
            cross_network_output: false,
            envelope: EnvelopeParams::default(),
            samples_per_chunk: DEFAULT_SAMPLES_PER_CHUNK,
            quantum: DEFAULT_QUANTUM,
            min_buffered_chunks: DEFAULT_MIN_BUFFERED_CHUNKS,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

impl RenderParams {
    /// Total samples for the configured duration.
    pub fn total_samples(&self) -> u64 {
        (self.duration_secs as f64 * self.sample_rate as f64).round() as u64
    }

    /// Number of chunks covering the configured duration (last may be partial).
    pub fn total_chunks(&self) -> u64 {
        let total = self.total_samples();
        let spc = self.samples_per_chunk as u64;
        total.div_ceil(spc)
    }

    /// Frequency ratio for the configured semitone offset.
    pub fn pitch_ratio(&self) -> f32 {
        (self.note_offset / 12.0).exp2()
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.duration_secs <= 0.0 || !self.duration_secs.is_finite() {
            return Err(EngineError::InvalidConfig(format!(
                "duration must be positive, got {}",
                self.duration_secs
            )));
        }
        if self.sample_rate == 0 {
            return Err(EngineError::InvalidConfig("sample rate is zero".into()));
        }
        if self.samples_per_chunk == 0 {
            return Err(EngineError::InvalidConfig("samples_per_chunk is zero".into()));
        }
        if self.quantum == 0 {
            return Err(EngineError::InvalidConfig("quantum is zero".into()));
        }
        if !(0.0..=1.0).contains(&self.velocity) {
            return Err(EngineError::InvalidConfig(format!(
                "velocity must be in [0, 1], got {}",
                self.velocity
            )));
        }
        // The window needs room for current + trailing + the buffered lookahead.
        if self.window_size < self.min_buffered_chunks + 2 {
            return Err(EngineError::InvalidConfig(format!(
                "window_size {} too small for min_buffered_chunks {} plus current and trailing",
                self.window_size, self.min_buffered_chunks
            )));
        }
        // A quantum may start mid-chunk, so it can touch up to
        // quantum.div_ceil(samples_per_chunk) + 1 chunks. Those plus the
        // trailing chunk must fit in the window, or no delivery schedule
        // can ever satisfy a single quantum.
        let quantum_span = self.quantum.div_ceil(self.samples_per_chunk) + 1;
        if quantum_span > self.window_size - 1 {
            return Err(EngineError::InvalidConfig(format!(
                "quantum {} spans up to {} chunks of {} samples, more than window_size {} holds",
                self.quantum, quantum_span, self.samples_per_chunk, self.window_size
            )));
        }
        Ok(())
    }

    /// Merge a partial update. Structural fields (sample rate, chunk size,
    /// quantum, window) are deliberately absent from [`ParamsPatch`]: they
    /// change buffer addressing mid-stream and only take effect through a
    /// rebuild after `reset`.
    pub fn apply(&mut self, patch: &ParamsPatch) {
        if let Some(v) = patch.duration_secs {
            self.duration_secs = v;
        }
        if let Some(v) = patch.note_offset {
            self.note_offset = v;
        }
        if let Some(v) = patch.velocity {
            self.velocity = v.clamp(0.0, 1.0);
        }
        if let Some(v) = patch.reverse_stereo {
            self.reverse_stereo = v;
        }
        if let Some(v) = patch.use_gpu {
            self.use_gpu = v;
        }
        if let Some(v) = patch.anti_alias {
            self.anti_alias = v;
        }
        if let Some(v) = patch.cross_network_output {
            self.cross_network_output = v;
        }
        if let Some(env) = patch.envelope {
            self.envelope = env.clamped();
        }
    }
}

/// Partial parameter set for the `config-update` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamsPatch {
    pub duration_secs: Option<f32>,
    pub note_offset: Option<f32>,
    pub velocity: Option<f32>,
    pub reverse_stereo: Option<bool>,
    pub use_gpu: Option<bool>,
    pub anti_alias: Option<bool>,
    pub cross_network_output: Option<bool>,
    pub envelope: Option<EnvelopeParams>,
}
