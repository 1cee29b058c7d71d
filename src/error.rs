//! Error types for the streaming synthesis engine.
//!
//! Real-time code never returns these mid-quantum; structural errors are
//! reported asynchronously as [`crate::message::ConsumerSignal::Fault`] and
//! the consumer keeps emitting silence instead of unwinding inside the
//! audio callback.

use thiserror::Error;

/// Error type for engine operations.
///
/// `Clone` because faults fan out to every signal listener.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("chunk {0} already inserted with different data")]
    DuplicateChunk(u64),

    #[error("chunk {incoming} does not fit: slot still occupied by chunk {occupied}")]
    BufferFull { incoming: u64, occupied: u64 },

    #[error("chunk {index}: channel {channel} has {got} samples, expected {expected}")]
    ChunkSize {
        index: u64,
        channel: usize,
        got: usize,
        expected: usize,
    },

    #[error("stream already finished; reset before delivering more chunks")]
    StreamFinished,

    #[error("synthesis graph has a dependency cycle through node '{0}'")]
    GraphCycle(String),

    #[error("node '{node}' references unknown input '{input}'")]
    UnknownInput { node: String, input: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("producer thread panicked")]
    ProducerPanicked,
}
