//! Control and data messages between the production and consumption contexts
//!
//! Tagged command enums, decoupled from any particular transport; the
//! renderer moves them over crossbeam channels but nothing here assumes
//! that. The consumer drains [`ProducerMessage`]s only at quantum
//! boundaries, which is what makes buffering transitions, config swaps and
//! resets atomic with respect to a quantum.

use crate::chunk::Chunk;
use crate::config::ParamsPatch;
use crate::error::EngineError;
use crate::graph::GraphConfig;

/// Producer -> consumer.
#[derive(Debug)]
pub enum ProducerMessage {
    /// A freshly evaluated chunk of network output.
    ChunkDelivered(Chunk),
    /// (Re)configure the synthesis graph.
    GraphConfig(GraphConfig),
    /// Merge a partial parameter set into the current config.
    ConfigUpdate(ParamsPatch),
    /// Clear all buffered state, zero the cursor, return to buffering.
    Reset,
}

/// Consumer -> producer. `Clone` so one signal can fan out to every
/// listener (producer pacing, renderer monitoring).
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumerSignal {
    /// Ack for a delivered chunk, with the retained-chunk count.
    ChunkReceived { index: u64, buffered: usize },
    /// Buffered lookahead fell below the minimum; produce more.
    BufferLow { remaining: usize },
    /// Chunk evicted behind the cursor; its resources may be reclaimed.
    ChunkConsumed { index: u64 },
    /// Playback reached a position whose chunk has not arrived. Non-fatal;
    /// the gap was filled with silence.
    Underrun { sample_index: u64 },
    /// The cursor reached the total sample count. Sent exactly once per run.
    EndOfStream,
    /// Structural error surfaced asynchronously; the consumer stays in a
    /// safe silent state instead of unwinding in the audio callback.
    Fault(EngineError),
}
