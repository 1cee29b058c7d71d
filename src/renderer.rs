//! Batch and streaming rendering entry points
//!
//! Both entry points delegate to the same [`render`] function with the
//! same parameter set; the [`Delivery`] mode only decides *when* chunks
//! reach the consumer, never *how* a sample is computed. That single
//! shared path is the parity contract: streaming playback and
//! render-ahead-of-time output are the same numbers.

use crate::chunk::{Chunk, ChunkPool};
use crate::config::RenderParams;
use crate::consumer::{QuantumStatus, RealTimeConsumer};
use crate::error::EngineError;
use crate::graph::GraphConfig;
use crate::message::{ConsumerSignal, ProducerMessage};
use crate::network::{NetworkOptions, PatternNetwork};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// When chunks are handed to the consumer. Computation is identical in
/// both modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Chunks are fed synchronously from the render loop, as fast as the
    /// buffer window allows.
    Upfront,
    /// Chunks are produced on a background thread, paced by the
    /// consumer's backpressure signals.
    Background,
}

/// Render the whole signal ahead of time.
pub fn render_batch<N>(
    network: N,
    params: &RenderParams,
    graph: Option<&GraphConfig>,
) -> Result<Vec<f32>, EngineError>
where
    N: PatternNetwork + 'static,
{
    render(network, params, graph, Delivery::Upfront)
}

/// Render through the asynchronous producer/consumer pipeline, returning
/// the same samples [`render_batch`] would.
pub fn render_streaming<N>(
    network: N,
    params: &RenderParams,
    graph: Option<&GraphConfig>,
) -> Result<Vec<f32>, EngineError>
where
    N: PatternNetwork + 'static,
{
    render(network, params, graph, Delivery::Background)
}

/// The one shared rendering function. Any future capture mechanism must
/// layer on top of this; nothing may fork the sample computation per mode.
pub fn render<N>(
    network: N,
    params: &RenderParams,
    graph: Option<&GraphConfig>,
    delivery: Delivery,
) -> Result<Vec<f32>, EngineError>
where
    N: PatternNetwork + 'static,
{
    params.validate()?;
    let total_samples = params.total_samples() as usize;
    let total_chunks = params.total_chunks();
    let window = params.window_size as u64;
    info!(
        ?delivery,
        duration = params.duration_secs,
        sample_rate = params.sample_rate,
        total_chunks,
        "render start"
    );

    let pool = ChunkPool::new(params.samples_per_chunk, params.window_size + 2);
    pool.prefill(params.window_size);

    let (msg_tx, msg_rx) = unbounded();
    let (monitor_tx, monitor_rx) = unbounded();
    let mut signal_txs = vec![monitor_tx];
    let pacing_rx = if delivery == Delivery::Background {
        let (pacing_tx, pacing_rx) = unbounded();
        signal_txs.push(pacing_tx);
        Some(pacing_rx)
    } else {
        None
    };

    let mut consumer = RealTimeConsumer::new(params.clone(), pool.clone(), msg_rx, signal_txs);
    if let Some(config) = graph {
        msg_tx
            .send(ProducerMessage::GraphConfig(config.clone()))
            .expect("consumer owns the receiver");
    }

    let mut producer = ChunkProducer::new(network, params, pool, msg_tx);
    let mut out = Vec::with_capacity(total_samples);
    let mut quantum = vec![0.0; params.quantum];

    match delivery {
        Delivery::Upfront => {
            loop {
                // feed as far ahead as the window allows; eviction keeps
                // the floor moving
                let floor = consumer.current_chunk_index().saturating_sub(1);
                while producer.next_index() < floor + window && producer.produce_next()? {}

                let status = run_quantum(&mut consumer, &mut quantum, &mut out);
                check_faults(&monitor_rx)?;
                if status == QuantumStatus::Finished {
                    break;
                }
            }
        }
        Delivery::Background => {
            let signals = pacing_rx.expect("created for background delivery");
            let handle =
                thread::spawn(move || -> Result<(), EngineError> { producer.run(signals, window) });

            loop {
                // no hardware clock paces this loop, so wait for the
                // chunks the quantum needs instead of underrunning past
                // a producer that is merely slower than us
                let mut producer_done = false;
                while !consumer.next_quantum_ready() {
                    if handle.is_finished() {
                        producer_done = true;
                        break;
                    }
                    thread::sleep(Duration::from_micros(50));
                }

                let status = run_quantum(&mut consumer, &mut quantum, &mut out);
                check_faults(&monitor_rx)?;
                match status {
                    QuantumStatus::Finished => break,
                    // producer exited without completing the pre-roll;
                    // its error surfaces from the join below
                    QuantumStatus::Buffering if producer_done => break,
                    _ => {}
                }
            }

            match handle.join() {
                Ok(result) => result?,
                Err(_) => return Err(EngineError::ProducerPanicked),
            }
        }
    }

    debug!(samples = out.len(), "render complete");
    Ok(out)
}

/// One quantum: process, then append only the samples the cursor actually
/// advanced over. Pre-roll silence (frozen cursor) contributes nothing, so
/// both delivery modes yield exactly `total_samples` samples.
fn run_quantum(
    consumer: &mut RealTimeConsumer,
    quantum: &mut [f32],
    out: &mut Vec<f32>,
) -> QuantumStatus {
    let before = consumer.cursor();
    let status = consumer.process_quantum(quantum, 1);
    let advanced = (consumer.cursor() - before) as usize;
    out.extend_from_slice(&quantum[..advanced]);
    status
}

fn check_faults(monitor_rx: &Receiver<ConsumerSignal>) -> Result<(), EngineError> {
    for signal in monitor_rx.try_iter() {
        if let ConsumerSignal::Fault(e) = signal {
            return Err(e);
        }
    }
    Ok(())
}

/// Evaluates the network one chunk at a time and pushes the chunks into
/// the message channel, recycling sample buffers through the pool.
struct ChunkProducer<N: PatternNetwork> {
    network: N,
    channels: usize,
    opts: NetworkOptions,
    pool: Arc<ChunkPool>,
    msg_tx: Sender<ProducerMessage>,
    samples_per_chunk: usize,
    total_chunks: u64,
    next_index: u64,
}

impl<N: PatternNetwork> ChunkProducer<N> {
    fn new(
        network: N,
        params: &RenderParams,
        pool: Arc<ChunkPool>,
        msg_tx: Sender<ProducerMessage>,
    ) -> Self {
        Self {
            channels: network.channel_count().max(1),
            network,
            opts: NetworkOptions {
                use_gpu: params.use_gpu,
                cross_network_output: params.cross_network_output,
            },
            pool,
            msg_tx,
            samples_per_chunk: params.samples_per_chunk,
            total_chunks: params.total_chunks(),
            next_index: 0,
        }
    }

    fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Evaluate and deliver the next chunk. `Ok(false)` when the stream is
    /// exhausted or the consumer went away.
    fn produce_next(&mut self) -> Result<bool, EngineError> {
        if self.next_index >= self.total_chunks {
            return Ok(false);
        }
        let mut channels: Vec<Vec<f32>> =
            (0..self.channels).map(|_| self.pool.acquire()).collect();
        self.network
            .evaluate_chunk(self.next_index, &mut channels, &self.opts);
        let chunk = Chunk::new(self.next_index, channels, self.samples_per_chunk)?;
        if self
            .msg_tx
            .send(ProducerMessage::ChunkDelivered(chunk))
            .is_err()
        {
            return Ok(false);
        }
        self.next_index += 1;
        Ok(true)
    }

    /// Background production loop: pipeline up to the buffer window, then
    /// throttle on the consumer's signals.
    fn run(
        &mut self,
        signals: Receiver<ConsumerSignal>,
        window: u64,
    ) -> Result<(), EngineError> {
        // indices strictly below `allowed` fit in the consumer's window
        let mut allowed = window;
        loop {
            while self.next_index < allowed {
                if !self.produce_next()? {
                    debug!(produced = self.next_index, "producer done");
                    return Ok(());
                }
            }
            match signals.recv() {
                Ok(ConsumerSignal::ChunkConsumed { index }) => {
                    // chunk `index` was evicted, so its slot (and every
                    // slot before it) is reusable one window later
                    allowed = allowed.max(index + 1 + window);
                }
                Ok(ConsumerSignal::BufferLow { remaining }) => {
                    debug!(remaining, "buffer low");
                }
                Ok(ConsumerSignal::EndOfStream) => return Ok(()),
                Ok(ConsumerSignal::Fault(e)) => return Err(e),
                Ok(_) => {}
                // consumer dropped; nothing left to pace
                Err(_) => return Ok(()),
            }
        }
    }
}

/// Duplicate a mono signal into interleaved stereo, honoring the
/// stereo-reversal flag. With identical channels the swap is inert, but
/// this is the single place the flag is applied, shared by every writer.
pub fn interleave_stereo(samples: &[f32], reverse: bool) -> Vec<f32> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let (left, right) = (s, s);
        if reverse {
            out.push(right);
            out.push(left);
        } else {
            out.push(left);
            out.push(right);
        }
    }
    out
}

/// Statistics about rendered audio.
#[derive(Debug, Clone)]
pub struct RenderStats {
    pub duration: f32,
    pub sample_count: usize,
    pub rms: f32,
    pub peak: f32,
    pub dc_offset: f32,
    pub zero_crossings: usize,
}

impl RenderStats {
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        let sample_count = samples.len();
        if sample_count == 0 {
            return Self {
                duration: 0.0,
                sample_count: 0,
                rms: 0.0,
                peak: 0.0,
                dc_offset: 0.0,
                zero_crossings: 0,
            };
        }

        let sum_squares: f32 = samples.iter().map(|x| x * x).sum();
        let rms = (sum_squares / sample_count as f32).sqrt();
        let peak = samples.iter().map(|x| x.abs()).fold(0.0f32, f32::max);
        let dc_offset = samples.iter().sum::<f32>() / sample_count as f32;

        let mut zero_crossings = 0;
        for i in 1..sample_count {
            if (samples[i - 1] >= 0.0) != (samples[i] >= 0.0) {
                zero_crossings += 1;
            }
        }

        Self {
            duration: sample_count as f32 / sample_rate as f32,
            sample_count,
            rms,
            peak,
            dc_offset,
            zero_crossings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::HarmonicNetwork;

    fn small_params() -> RenderParams {
        RenderParams {
            duration_secs: 0.25,
            sample_rate: 8000,
            samples_per_chunk: 512,
            quantum: 128,
            ..Default::default()
        }
    }

    #[test]
    fn test_batch_render_length() {
        let params = small_params();
        let net = HarmonicNetwork::new(1, 2, params.sample_rate as f32);
        let samples = render_batch(net, &params, None).unwrap();
        assert_eq!(samples.len(), 2000);
    }

    #[test]
    fn test_fallback_path_is_not_silent() {
        let params = small_params();
        let net = HarmonicNetwork::new(1, 2, params.sample_rate as f32);
        let samples = render_batch(net, &params, None).unwrap();
        let stats = RenderStats::from_samples(&samples, params.sample_rate);
        assert!(stats.peak > 0.01, "fallback must produce audio, peak {}", stats.peak);
    }

    #[test]
    fn test_invalid_params_rejected_before_rendering() {
        let params = RenderParams {
            duration_secs: -1.0,
            ..Default::default()
        };
        let net = HarmonicNetwork::new(1, 1, 8000.0);
        assert!(matches!(
            render_batch(net, &params, None),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_interleave_stereo() {
        let mono = vec![0.1, -0.2];
        let stereo = interleave_stereo(&mono, false);
        assert_eq!(stereo, vec![0.1, 0.1, -0.2, -0.2]);
        assert_eq!(interleave_stereo(&mono, true).len(), 4);
    }

    #[test]
    fn test_stats() {
        let samples = vec![0.5, -0.5, 0.5, -0.5];
        let stats = RenderStats::from_samples(&samples, 4);
        assert_eq!(stats.sample_count, 4);
        assert_eq!(stats.duration, 1.0);
        assert!((stats.rms - 0.5).abs() < 1e-6);
        assert_eq!(stats.peak, 0.5);
        assert_eq!(stats.zero_crossings, 3);
        assert!(stats.dc_offset.abs() < 1e-6);
    }
}
