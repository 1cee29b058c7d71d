//! Deterministic envelope shaping over a fixed note duration
//!
//! Unlike a gated ADSR, the envelope here is a pure function of elapsed
//! time: there is no stored phase automaton that could drift away from the
//! time axis. The release always occupies the final `release` seconds of
//! the total duration, so the phase can be re-derived from `elapsed` alone
//! on every sample. Both the batch and streaming renderers call the same
//! function, which is what keeps their output identical.

use serde::{Deserialize, Serialize};

/// Envelope timing parameters, in seconds (sustain is a level, not a time).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeParams {
    pub attack: f32,
    pub decay: f32,
    pub sustain_level: f32,
    pub release: f32,
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self {
            attack: 0.01,
            decay: 0.1,
            sustain_level: 0.7,
            release: 0.2,
        }
    }
}

impl EnvelopeParams {
    /// Copy with all durations forced non-negative and the sustain level
    /// forced into [0, 1]. Applied once when parameters enter the engine so
    /// the per-sample path can assume sane values.
    pub fn clamped(self) -> Self {
        Self {
            attack: self.attack.max(0.0),
            decay: self.decay.max(0.0),
            sustain_level: self.sustain_level.clamp(0.0, 1.0),
            release: self.release.max(0.0),
        }
    }
}

/// Envelope phase, re-derived from elapsed time (never stored).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopePhase {
    Attack,
    Decay,
    Sustain,
    Release,
    Done,
}

/// Amplitude multiplier in [0, 1] for a note of `total` seconds.
///
/// Piecewise linear: ramp up over `attack`, ramp from 1.0 down to
/// `sustain_level` over `decay`, hold, then ramp to 0 over the final
/// `release` seconds. The release window takes precedence when the phases
/// overlap (total shorter than attack + decay + release); zero-length
/// phases are treated as already complete, so no division by zero.
pub fn envelope(elapsed: f32, params: &EnvelopeParams, total: f32) -> f32 {
    if total <= 0.0 || elapsed < 0.0 || elapsed >= total {
        return 0.0;
    }

    let release_start = total - params.release;
    let value = if elapsed >= release_start {
        // release > 0 here: elapsed < total rules out a zero-length window
        let progress = (elapsed - release_start) / params.release;
        params.sustain_level * (1.0 - progress)
    } else if params.attack > 0.0 && elapsed < params.attack {
        elapsed / params.attack
    } else if params.decay > 0.0 && elapsed < params.attack + params.decay {
        let progress = (elapsed - params.attack) / params.decay;
        1.0 + (params.sustain_level - 1.0) * progress
    } else {
        params.sustain_level
    };

    value.clamp(0.0, 1.0)
}

/// Which phase `elapsed` falls in. Diagnostic companion to [`envelope`];
/// derived the same way, never cached.
pub fn phase_at(elapsed: f32, params: &EnvelopeParams, total: f32) -> EnvelopePhase {
    if total <= 0.0 || elapsed >= total {
        return EnvelopePhase::Done;
    }
    if elapsed >= total - params.release {
        return EnvelopePhase::Release;
    }
    if params.attack > 0.0 && elapsed < params.attack {
        return EnvelopePhase::Attack;
    }
    if params.decay > 0.0 && elapsed < params.attack + params.decay {
        return EnvelopePhase::Decay;
    }
    EnvelopePhase::Sustain
}
