//! Resonet render CLI
//!
//! Renders a demo harmonic network to a WAV file through either the
//! batch path or the full streaming pipeline. Both produce identical
//! samples; `--mode streaming` exercises the producer thread and
//! backpressure machinery end to end.

use clap::{Parser, ValueEnum};
use resonet::graph::{GraphConfig, NodeConfig, PartialConfig, WavetableSpec};
use resonet::{
    interleave_stereo, render_batch, render_streaming, HarmonicNetwork, RenderParams, RenderStats,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "resonet-render")]
#[command(about = "Render a demo pattern network to WAV", long_about = None)]
struct Cli {
    /// Output WAV file path
    #[arg(short, long, default_value = "out.wav")]
    output: PathBuf,

    /// Duration in seconds
    #[arg(short, long, default_value = "4.0")]
    duration: f32,

    /// Sample rate in Hz
    #[arg(short, long, default_value = "44100")]
    sample_rate: u32,

    /// Rendering path
    #[arg(short, long, value_enum, default_value = "batch")]
    mode: Mode,

    /// Pitch offset in semitones
    #[arg(short, long, default_value = "0.0")]
    note: f32,

    /// Output gain 0.0-1.0
    #[arg(short, long, default_value = "1.0")]
    velocity: f32,

    /// Swap left/right channels in the output file
    #[arg(long)]
    reverse_stereo: bool,

    /// Network seed
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Skip the synthesis graph and render the raw network fallback
    #[arg(long)]
    no_graph: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Batch,
    Streaming,
}

/// A small wavetable + additive patch driven by the network's channels.
fn demo_graph() -> GraphConfig {
    let mut nodes = BTreeMap::new();
    nodes.insert(
        "carrier".to_string(),
        NodeConfig::Wavetable {
            tables: vec![
                WavetableSpec {
                    waveform: resonet::Waveform::Sine,
                    size: 1024,
                    gain: 1.0,
                },
                WavetableSpec {
                    waveform: resonet::Waveform::Saw,
                    size: 1024,
                    gain: 0.8,
                },
            ],
            crossfade_channel: 0,
            frequency: 220.0,
            inputs: vec![],
        },
    );
    nodes.insert(
        "shimmer".to_string(),
        NodeConfig::Additive {
            partials: vec![
                PartialConfig {
                    ratio: 1.0,
                    amplitude: 1.0,
                    amp_channel: None,
                },
                PartialConfig {
                    ratio: 2.0,
                    amplitude: 0.4,
                    amp_channel: Some(1),
                },
                PartialConfig {
                    ratio: 3.0,
                    amplitude: 0.2,
                    amp_channel: None,
                },
            ],
            frequency: 440.0,
            inputs: vec!["carrier".to_string()],
        },
    );
    GraphConfig { nodes }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let params = RenderParams {
        duration_secs: cli.duration,
        sample_rate: cli.sample_rate,
        note_offset: cli.note,
        velocity: cli.velocity,
        reverse_stereo: cli.reverse_stereo,
        ..Default::default()
    };

    let network = HarmonicNetwork::new(cli.seed, 2, cli.sample_rate as f32);
    let graph = if cli.no_graph { None } else { Some(demo_graph()) };

    let samples = match cli.mode {
        Mode::Batch => render_batch(network, &params, graph.as_ref())?,
        Mode::Streaming => render_streaming(network, &params, graph.as_ref())?,
    };

    let stats = RenderStats::from_samples(&samples, cli.sample_rate);
    info!(
        samples = stats.sample_count,
        duration = stats.duration,
        rms = stats.rms,
        peak = stats.peak,
        dc_offset = stats.dc_offset,
        zero_crossings = stats.zero_crossings,
        "render stats"
    );

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: cli.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&cli.output, spec)?;
    for sample in interleave_stereo(&samples, cli.reverse_stereo) {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_sample(value)?;
    }
    writer.finalize()?;

    info!(path = %cli.output.display(), "wrote output");
    Ok(())
}
