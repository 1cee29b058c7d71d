//! Real-time consumption state machine
//!
//! Once per quantum the consumer pulls values out of the chunk buffer,
//! runs the envelope and synthesis graph, writes output samples, advances
//! the playback cursor, evicts chunks behind it and emits backpressure
//! signals. Everything unbounded (chunk evaluation, allocation) happens on
//! the producer side; inside a quantum this code only does point lookups,
//! arithmetic and non-blocking channel operations.
//!
//! Messages are drained at quantum boundaries only, so buffering
//! transitions, graph swaps and resets are atomic with respect to a
//! quantum: no quantum is ever processed half-buffering, half-playing.

use crate::chunk::{Chunk, ChunkBuffer, ChunkPool};
use crate::config::RenderParams;
use crate::envelope::envelope;
use crate::error::EngineError;
use crate::graph::{EvalContext, SynthGraph};
use crate::message::{ConsumerSignal, ProducerMessage};
use crossbeam::channel::{Receiver, Sender};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of one quantum of processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantumStatus {
    /// Real samples were produced (possibly silence over an underrun gap).
    Running,
    /// Pre-roll: silence emitted, cursor frozen.
    Buffering,
    /// The stream has ended. Terminal until an explicit reset.
    Finished,
}

pub struct RealTimeConsumer {
    params: RenderParams,
    total_samples: u64,
    buffer: ChunkBuffer,
    pool: Arc<ChunkPool>,
    graph: SynthGraph,
    /// Total samples emitted; chunk index and offset derive from it.
    cursor: u64,
    is_buffering: bool,
    finished: bool,
    eos_sent: bool,
    msg_rx: Receiver<ProducerMessage>,
    signal_txs: Vec<Sender<ConsumerSignal>>,
}

impl RealTimeConsumer {
    /// `params` must already be validated. Signals fan out to every sender
    /// in `signal_txs` (producer pacing, renderer monitoring).
    pub fn new(
        params: RenderParams,
        pool: Arc<ChunkPool>,
        msg_rx: Receiver<ProducerMessage>,
        signal_txs: Vec<Sender<ConsumerSignal>>,
    ) -> Self {
        let mut params = params;
        params.envelope = params.envelope.clamped();
        Self {
            total_samples: params.total_samples(),
            buffer: ChunkBuffer::new(params.window_size),
            pool,
            graph: SynthGraph::empty(),
            cursor: 0,
            is_buffering: true,
            finished: false,
            eos_sent: false,
            msg_rx,
            signal_txs,
            params,
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    pub fn current_chunk_index(&self) -> u64 {
        self.cursor / self.params.samples_per_chunk as u64
    }

    pub fn is_buffering(&self) -> bool {
        self.is_buffering
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn buffered_chunks(&self) -> usize {
        self.buffer.len()
    }

    /// Drain pending messages and report whether every chunk the next
    /// quantum touches has arrived. Offline harnesses use this to pace
    /// themselves instead of a hardware clock; a free-running loop that
    /// skipped this check would underrun whenever it outran the producer.
    pub fn next_quantum_ready(&mut self) -> bool {
        self.drain_messages();
        if self.finished {
            return true;
        }
        if self.is_buffering {
            return false;
        }
        let end = (self.cursor + self.params.quantum as u64).min(self.total_samples);
        if end == self.cursor {
            return true;
        }
        let spc = self.params.samples_per_chunk as u64;
        let first = self.cursor / spc;
        let last = (end - 1) / spc;
        (first..=last).all(|index| self.buffer.lookup(index).is_some())
    }

    /// Process one quantum into `out` (interleaved, `channels` wide; the
    /// mono graph result is duplicated across channels). Never blocks,
    /// never allocates, never returns an error: faults go out on the
    /// signal channel and the output stays silent.
    pub fn process_quantum(&mut self, out: &mut [f32], channels: usize) -> QuantumStatus {
        self.drain_messages();
        out.fill(0.0);

        if self.finished {
            // terminal: silence forever, no further signals
            self.send_eos_once();
            return QuantumStatus::Finished;
        }
        if self.is_buffering {
            // time is frozen: cursor untouched so buffered content stays
            // aligned with the play position once buffering ends
            return QuantumStatus::Buffering;
        }

        let channels = channels.max(1);
        let frames = out.len() / channels;
        let spc = self.params.samples_per_chunk as u64;
        let sample_rate = self.params.sample_rate as f32;
        let total_secs = self.params.duration_secs;
        let velocity = self.params.velocity;
        let ctx = EvalContext {
            sample_rate,
            pitch_ratio: self.params.pitch_ratio(),
            anti_alias: self.params.anti_alias,
        };
        let mut underrun_reported = false;

        for frame in 0..frames {
            if self.cursor >= self.total_samples {
                self.finished = true;
                break;
            }
            let chunk_index = self.cursor / spc;
            let offset = (self.cursor % spc) as usize;

            let value = if let Some(chunk) = self.buffer.lookup(chunk_index) {
                let elapsed = self.cursor as f32 / sample_rate;
                let env = envelope(elapsed, &self.params.envelope, total_secs);
                let sample = self.graph.evaluate(chunk, offset, &ctx);
                env * sample * velocity
            } else {
                // underrun: the chunk has not arrived. Silence fills the
                // gap and the cursor still advances; stalling would miss
                // the real-time deadline.
                if !underrun_reported {
                    underrun_reported = true;
                    warn!(sample = self.cursor, chunk = chunk_index, "underrun");
                    self.send(ConsumerSignal::Underrun {
                        sample_index: self.cursor,
                    });
                }
                0.0
            };

            let base = frame * channels;
            for ch in 0..channels {
                out[base + ch] = value;
            }

            self.cursor += 1;
            if offset as u64 + 1 == spc {
                // crossed into the next chunk
                self.on_chunk_boundary(self.cursor / spc);
            }
        }

        if self.cursor >= self.total_samples {
            self.finished = true;
        }
        if self.finished {
            self.send_eos_once();
            QuantumStatus::Finished
        } else {
            QuantumStatus::Running
        }
    }

    fn on_chunk_boundary(&mut self, new_index: u64) {
        // keep the current chunk and one trailing chunk as a safety
        // margin; everything older goes back to the pool
        let evicted = self.buffer.evict_before(new_index.saturating_sub(1));
        for chunk in evicted {
            let index = chunk.index();
            for buffer in chunk.into_channels() {
                self.pool.release(buffer);
            }
            self.send(ConsumerSignal::ChunkConsumed { index });
        }

        let ahead = self.buffer.len_from(new_index);
        let undelivered_remain = new_index + (ahead as u64) < self.params.total_chunks();
        if undelivered_remain && ahead < self.params.min_buffered_chunks {
            self.send(ConsumerSignal::BufferLow { remaining: ahead });
        }
    }

    fn drain_messages(&mut self) {
        while let Ok(msg) = self.msg_rx.try_recv() {
            match msg {
                ProducerMessage::ChunkDelivered(chunk) => self.handle_chunk(chunk),
                ProducerMessage::GraphConfig(config) => match SynthGraph::from_config(&config) {
                    Ok(graph) => {
                        debug!(order = ?graph.evaluation_order(), "synthesis graph configured");
                        self.graph = graph;
                    }
                    Err(e) => self.fault(e),
                },
                ProducerMessage::ConfigUpdate(patch) => {
                    self.params.apply(&patch);
                    self.total_samples = self.params.total_samples();
                }
                ProducerMessage::Reset => self.reset(),
            }
        }
    }

    fn handle_chunk(&mut self, chunk: Chunk) {
        if self.finished {
            // integration error: data after end-of-stream without a reset
            self.fault(EngineError::StreamFinished);
            return;
        }
        let index = chunk.index();
        match self.buffer.insert(chunk) {
            Ok(()) => {
                let buffered = self.buffer.len();
                self.send(ConsumerSignal::ChunkReceived { index, buffered });
                // a stream shorter than the threshold must still start
                let needed = self
                    .params
                    .min_buffered_chunks
                    .min(self.params.total_chunks() as usize);
                if self.is_buffering && buffered >= needed {
                    debug!(buffered, "buffering complete, starting playback");
                    self.is_buffering = false;
                }
            }
            Err(e) => self.fault(e),
        }
    }

    /// Clear all buffered chunks, zero the cursor, return to the initial
    /// buffering state. The only way out of [`QuantumStatus::Finished`].
    fn reset(&mut self) {
        debug!("reset");
        self.buffer.clear(&self.pool);
        self.graph.reset_phases();
        self.cursor = 0;
        self.is_buffering = true;
        self.finished = false;
        self.eos_sent = false;
    }

    fn send_eos_once(&mut self) {
        if !self.eos_sent {
            self.eos_sent = true;
            debug!(cursor = self.cursor, "end of stream");
            self.send(ConsumerSignal::EndOfStream);
        }
    }

    fn fault(&self, error: EngineError) {
        warn!(%error, "engine fault");
        self.send(ConsumerSignal::Fault(error));
    }

    fn send(&self, signal: ConsumerSignal) {
        for tx in &self.signal_txs {
            let _ = tx.send(signal.clone());
        }
    }
}
