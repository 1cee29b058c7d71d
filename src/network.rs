//! Pattern producing network interface
//!
//! The generative network itself (genome representation, reproduction,
//! feature inference) lives outside this crate; the engine only needs a way
//! to pull multi-channel output one chunk at a time. Implementations must
//! be a pure function of the absolute sample index so that chunks can be
//! evaluated in any order and re-evaluated after a reset without changing
//! the signal.

use serde::{Deserialize, Serialize};

/// Evaluation hints passed through from [`crate::config::RenderParams`].
/// Implementations are free to ignore them.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NetworkOptions {
    /// Evaluation may use an accelerator; same values must come back either way.
    pub use_gpu: bool,
    /// Route outputs crosswise between channel banks.
    pub cross_network_output: bool,
}

/// A network whose per-sample, multi-channel output drives synthesis.
pub trait PatternNetwork: Send {
    /// Number of output channels produced per sample.
    fn channel_count(&self) -> usize;

    /// Fill `out` (one pre-sized buffer per channel) with the samples of
    /// chunk `chunk_index`. Sample `i` of the chunk corresponds to absolute
    /// sample index `chunk_index * out[0].len() + i`.
    fn evaluate_chunk(&mut self, chunk_index: u64, out: &mut [Vec<f32>], opts: &NetworkOptions);
}

/// Deterministic stand-in network: a bank of phase-locked harmonic
/// channels derived from a seed. Exists so the engine can be exercised and
/// demoed without the evolutionary genome machinery; every channel is a
/// closed-form function of the sample index.
#[derive(Debug, Clone)]
pub struct HarmonicNetwork {
    seed: u64,
    channels: usize,
    sample_rate: f32,
}

impl HarmonicNetwork {
    pub fn new(seed: u64, channels: usize, sample_rate: f32) -> Self {
        Self {
            seed,
            channels: channels.max(1),
            sample_rate,
        }
    }

    /// Base frequency for a channel: spread over roughly two octaves above
    /// 110 Hz, scrambled by the seed.
    fn base_freq(&self, channel: usize) -> f32 {
        let h = self
            .seed
            .wrapping_mul(0x9e37_79b9_7f4a_7c15)
            .wrapping_add(channel as u64 * 0x85eb_ca6b);
        let unit = (h >> 40) as f32 / (1u64 << 24) as f32;
        110.0 * (unit * 2.0).exp2()
    }

    fn value(&self, channel: usize, sample_index: u64) -> f32 {
        let t = sample_index as f64 / self.sample_rate as f64;
        let f = self.base_freq(channel) as f64;
        let two_pi = std::f64::consts::TAU;
        // fundamental plus a quiet detuned third harmonic, kept in [-1, 1]
        let v = 0.7 * (two_pi * f * t).sin() + 0.3 * (two_pi * f * 3.01 * t).sin();
        v as f32
    }
}

impl PatternNetwork for HarmonicNetwork {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn evaluate_chunk(&mut self, chunk_index: u64, out: &mut [Vec<f32>], opts: &NetworkOptions) {
        let spc = out.first().map(|b| b.len()).unwrap_or(0);
        let base = chunk_index * spc as u64;
        for (c, buffer) in out.iter_mut().enumerate() {
            // crosswise routing mirrors the channel order
            let channel = if opts.cross_network_output {
                self.channels - 1 - (c % self.channels)
            } else {
                c % self.channels
            };
            for (i, sample) in buffer.iter_mut().enumerate() {
                *sample = self.value(channel, base + i as u64);
            }
        }
    }
}
