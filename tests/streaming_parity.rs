//! End-to-end parity between the batch and streaming rendering paths.
//!
//! The engine's core promise is that render-ahead-of-time output and the
//! real-time pipeline produce bit-identical samples. These tests run both
//! paths over the same network and compare outputs exactly, with no
//! tolerance.

use resonet::graph::{GraphConfig, NodeConfig, PartialConfig, WavetableSpec};
use resonet::{
    interleave_stereo, render_batch, render_streaming, EngineError, EnvelopeParams,
    HarmonicNetwork, RenderParams, Waveform,
};
use std::collections::BTreeMap;

fn params(duration_secs: f32, sample_rate: u32, samples_per_chunk: usize) -> RenderParams {
    RenderParams {
        duration_secs,
        sample_rate,
        samples_per_chunk,
        quantum: 128,
        ..Default::default()
    }
}

fn test_graph() -> GraphConfig {
    let mut nodes = BTreeMap::new();
    nodes.insert(
        "osc".to_string(),
        NodeConfig::Wavetable {
            tables: vec![
                WavetableSpec {
                    waveform: Waveform::Sine,
                    size: 256,
                    gain: 1.0,
                },
                WavetableSpec {
                    waveform: Waveform::Triangle,
                    size: 256,
                    gain: 0.9,
                },
            ],
            crossfade_channel: 0,
            frequency: 110.0,
            inputs: vec![],
        },
    );
    nodes.insert(
        "harmonics".to_string(),
        NodeConfig::Additive {
            partials: vec![
                PartialConfig {
                    ratio: 1.0,
                    amplitude: 1.0,
                    amp_channel: None,
                },
                PartialConfig {
                    ratio: 2.5,
                    amplitude: 0.3,
                    amp_channel: Some(1),
                },
            ],
            frequency: 220.0,
            inputs: vec!["osc".to_string()],
        },
    );
    GraphConfig { nodes }
}

fn assert_identical(batch: &[f32], streaming: &[f32]) {
    assert_eq!(batch.len(), streaming.len(), "sample counts differ");
    for (i, (b, s)) in batch.iter().zip(streaming.iter()).enumerate() {
        assert!(
            b.to_bits() == s.to_bits(),
            "sample {i} differs: batch {b} vs streaming {s}"
        );
    }
}

#[test]
fn test_parity_short_render_with_graph() {
    let p = params(0.5, 8000, 1024);
    let graph = test_graph();
    let batch = render_batch(HarmonicNetwork::new(7, 2, 8000.0), &p, Some(&graph)).unwrap();
    let streaming =
        render_streaming(HarmonicNetwork::new(7, 2, 8000.0), &p, Some(&graph)).unwrap();
    assert_eq!(batch.len(), 4000);
    assert_identical(&batch, &streaming);
}

#[test]
fn test_parity_short_render_fallback() {
    // no graph configured: both paths fall back to attenuated channel 0
    let p = params(0.5, 8000, 1024);
    let batch = render_batch(HarmonicNetwork::new(3, 2, 8000.0), &p, None).unwrap();
    let streaming = render_streaming(HarmonicNetwork::new(3, 2, 8000.0), &p, None).unwrap();
    assert_identical(&batch, &streaming);
}

#[test]
fn test_parity_long_render() {
    // over ten seconds of stream time, enough for many window wraps,
    // kept fast with a low sample rate
    let p = RenderParams {
        duration_secs: 12.0,
        sample_rate: 2000,
        samples_per_chunk: 500,
        quantum: 128,
        window_size: 4,
        min_buffered_chunks: 2,
        ..Default::default()
    };
    let graph = test_graph();
    let batch = render_batch(HarmonicNetwork::new(42, 2, 2000.0), &p, Some(&graph)).unwrap();
    let streaming =
        render_streaming(HarmonicNetwork::new(42, 2, 2000.0), &p, Some(&graph)).unwrap();
    assert_eq!(batch.len(), 24000);
    assert_identical(&batch, &streaming);
}

#[test]
fn test_four_second_render_at_48k() {
    // one-second chunks: 4 chunks, 192000 samples
    let p = params(4.0, 48000, 48000);
    let out = render_batch(HarmonicNetwork::new(1, 2, 48000.0), &p, None).unwrap();
    assert_eq!(out.len(), 192_000);
}

#[test]
fn test_batch_render_is_deterministic() {
    let p = params(0.25, 8000, 512);
    let graph = test_graph();
    let a = render_batch(HarmonicNetwork::new(9, 2, 8000.0), &p, Some(&graph)).unwrap();
    let b = render_batch(HarmonicNetwork::new(9, 2, 8000.0), &p, Some(&graph)).unwrap();
    assert_identical(&a, &b);
}

#[test]
fn test_streaming_parity_with_small_window() {
    // the tightest legal window forces constant eviction and refill
    let p = RenderParams {
        duration_secs: 1.0,
        sample_rate: 4000,
        samples_per_chunk: 250,
        quantum: 100,
        window_size: 3,
        min_buffered_chunks: 1,
        ..Default::default()
    };
    let batch = render_batch(HarmonicNetwork::new(5, 2, 4000.0), &p, None).unwrap();
    let streaming = render_streaming(HarmonicNetwork::new(5, 2, 4000.0), &p, None).unwrap();
    assert_eq!(batch.len(), 4000);
    assert_identical(&batch, &streaming);
}

#[test]
fn test_single_chunk_stream() {
    let p = params(0.1, 4000, 1024);
    let batch = render_batch(HarmonicNetwork::new(2, 2, 4000.0), &p, None).unwrap();
    let streaming = render_streaming(HarmonicNetwork::new(2, 2, 4000.0), &p, None).unwrap();
    assert_eq!(batch.len(), 400);
    assert_identical(&batch, &streaming);
}

#[test]
fn test_quantum_wider_than_window_fails_fast() {
    // 128-sample quanta over 10-sample chunks need more slots than the
    // window has; both entry points must reject this up front rather than
    // stall waiting for chunks that can never fit, or overrun the arena
    let p = RenderParams {
        duration_secs: 1.0,
        sample_rate: 1000,
        samples_per_chunk: 10,
        quantum: 128,
        window_size: 8,
        ..Default::default()
    };
    assert!(matches!(
        render_batch(HarmonicNetwork::new(1, 2, 1000.0), &p, None),
        Err(EngineError::InvalidConfig(_))
    ));
    assert!(matches!(
        render_streaming(HarmonicNetwork::new(1, 2, 1000.0), &p, None),
        Err(EngineError::InvalidConfig(_))
    ));
}

#[test]
fn test_wav_output_roundtrip() {
    // the samples survive the 16-bit WAV trip the CLI performs
    let p = params(0.25, 8000, 512);
    let samples = render_batch(HarmonicNetwork::new(8, 2, 8000.0), &p, None).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("render.wav");
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: p.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for sample in interleave_stereo(&samples, false) {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_sample(value).unwrap();
    }
    writer.finalize().unwrap();

    let mut reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().channels, 2);
    assert_eq!(reader.spec().sample_rate, 8000);
    let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(decoded.len(), samples.len() * 2);
    for (frame, &mono) in decoded.chunks(2).zip(samples.iter()) {
        // both channels carry the mono signal, within quantization error
        let expected = (mono.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        assert_eq!(frame[0], expected);
        assert_eq!(frame[1], expected);
    }
}

#[test]
fn test_envelope_shapes_output() {
    let p = RenderParams {
        duration_secs: 1.0,
        sample_rate: 4000,
        samples_per_chunk: 1000,
        envelope: EnvelopeParams {
            attack: 0.25,
            decay: 0.25,
            sustain_level: 0.5,
            release: 0.25,
        },
        ..Default::default()
    };
    let out = render_batch(HarmonicNetwork::new(11, 2, 4000.0), &p, None).unwrap();

    // attack ramps from silence
    assert_eq!(out[0], 0.0);
    let early_peak: f32 = out[..100].iter().map(|x| x.abs()).fold(0.0, f32::max);
    let attack_peak: f32 = out[900..1000].iter().map(|x| x.abs()).fold(0.0, f32::max);
    assert!(early_peak < attack_peak);

    // release decays back toward silence at the very end
    let tail_peak: f32 = out[3960..].iter().map(|x| x.abs()).fold(0.0, f32::max);
    let sustain_peak: f32 = out[2000..2400].iter().map(|x| x.abs()).fold(0.0, f32::max);
    assert!(tail_peak < sustain_peak);
}

#[test]
fn test_velocity_scales_output() {
    let quiet = RenderParams {
        velocity: 0.25,
        ..params(0.25, 4000, 500)
    };
    let loud = RenderParams {
        velocity: 1.0,
        ..params(0.25, 4000, 500)
    };
    let q = render_batch(HarmonicNetwork::new(4, 2, 4000.0), &quiet, None).unwrap();
    let l = render_batch(HarmonicNetwork::new(4, 2, 4000.0), &loud, None).unwrap();
    let q_peak: f32 = q.iter().map(|x| x.abs()).fold(0.0, f32::max);
    let l_peak: f32 = l.iter().map(|x| x.abs()).fold(0.0, f32::max);
    assert!(q_peak < l_peak * 0.5);
}

#[test]
fn test_note_offset_shifts_pitch() {
    // an octave up doubles the zero-crossing count of the graph output
    let graph = test_graph();
    let base = params(0.5, 8000, 1000);
    let octave = RenderParams {
        note_offset: 12.0,
        ..params(0.5, 8000, 1000)
    };
    let low = render_batch(HarmonicNetwork::new(6, 2, 8000.0), &base, Some(&graph)).unwrap();
    let high = render_batch(HarmonicNetwork::new(6, 2, 8000.0), &octave, Some(&graph)).unwrap();

    let crossings = |s: &[f32]| {
        s.windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count()
    };
    let low_c = crossings(&low);
    let high_c = crossings(&high);
    assert!(
        high_c > low_c + low_c / 2,
        "expected roughly doubled crossings, got {low_c} vs {high_c}"
    );
}
