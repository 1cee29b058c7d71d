//! Resonet: chunked streaming synthesis engine
//!
//! Renders audio from a pattern-producing network in fixed-size chunks,
//! either ahead of time ([`render_batch`]) or through a backpressured
//! producer/consumer pipeline ([`render_streaming`]). Both paths run the
//! same consumer state machine over the same chunks, so their output is
//! bit-identical.
//!
//! The pipeline:
//!
//! ```text
//! PatternNetwork --chunks--> ChunkBuffer --quanta--> RealTimeConsumer
//!      (producer)            (bounded window)        (envelope + graph)
//! ```
//!
//! Chunks land in a bounded ring keyed by `index % window_size`; the
//! consumer walks a sample cursor through them one quantum at a time,
//! applying the amplitude envelope and an optional synthesis graph, and
//! evicts chunks it has moved past. Missing chunks play as silence and
//! the stream keeps going.

pub mod chunk;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod graph;
pub mod message;
pub mod network;
pub mod renderer;

pub use chunk::{Chunk, ChunkBuffer, ChunkPool};
pub use config::{ParamsPatch, RenderParams};
pub use consumer::{QuantumStatus, RealTimeConsumer};
pub use envelope::{envelope, EnvelopeParams, EnvelopePhase};
pub use error::EngineError;
pub use graph::{GraphConfig, NodeConfig, SynthGraph, Waveform};
pub use message::{ConsumerSignal, ProducerMessage};
pub use network::{HarmonicNetwork, NetworkOptions, PatternNetwork};
pub use renderer::{
    interleave_stereo, render, render_batch, render_streaming, Delivery, RenderStats,
};
