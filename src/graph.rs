//! Synthesis graph evaluator
//!
//! Turns one sample's worth of network channel values into one output
//! sample by evaluating a small directed graph of synthesis nodes. Node
//! kinds in scope are wavetable (crossfaded lookup over precomputed
//! tables) and additive (a bank of independently-phased partials). Nodes
//! are evaluated in dependency order via topological sort; in the common
//! case they are independent and the order only matters for determinism.

use crate::chunk::Chunk;
use crate::error::EngineError;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::f32::consts::TAU;

/// Gain applied to raw channel 0 when no graph is configured. The fallback
/// keeps the engine audible with incomplete configuration instead of
/// failing silently.
pub const FALLBACK_GAIN: f32 = 0.5;

/// Builtin waveforms for generated wavetables. Tables are synthesized at
/// configuration time; no audio assets are read from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    Sine,
    Triangle,
    Saw,
    Square,
}

/// One table in a wavetable node: a generated waveform with its gain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WavetableSpec {
    pub waveform: Waveform,
    #[serde(default = "default_table_size")]
    pub size: usize,
    #[serde(default = "default_gain")]
    pub gain: f32,
}

fn default_table_size() -> usize {
    1024
}

fn default_gain() -> f32 {
    1.0
}

/// One partial in an additive node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialConfig {
    /// Frequency ratio relative to the node's base frequency.
    pub ratio: f32,
    #[serde(default = "default_gain")]
    pub amplitude: f32,
    /// Network channel modulating this partial's amplitude, if any.
    #[serde(default)]
    pub amp_channel: Option<usize>,
}

/// Serializable node descriptor, the payload of the `graph-config` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeConfig {
    Wavetable {
        tables: Vec<WavetableSpec>,
        /// Network channel supplying the crossfade position.
        crossfade_channel: usize,
        /// Base frequency in Hz.
        frequency: f32,
        #[serde(default)]
        inputs: Vec<String>,
    },
    Additive {
        partials: Vec<PartialConfig>,
        frequency: f32,
        #[serde(default)]
        inputs: Vec<String>,
    },
}

impl NodeConfig {
    fn inputs(&self) -> &[String] {
        match self {
            NodeConfig::Wavetable { inputs, .. } => inputs,
            NodeConfig::Additive { inputs, .. } => inputs,
        }
    }
}

/// Graph descriptor: node key to node config. `BTreeMap` keeps iteration
/// (and therefore evaluation order among independent nodes) deterministic,
/// which the streaming/batch parity tests rely on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    pub nodes: BTreeMap<String, NodeConfig>,
}

/// Per-sample evaluation context, derived from the render parameters.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext {
    pub sample_rate: f32,
    /// Frequency ratio for the configured note offset.
    pub pitch_ratio: f32,
    /// Interpolated table reads instead of nearest-sample reads.
    pub anti_alias: bool,
}

struct PartialState {
    ratio: f32,
    amplitude: f32,
    amp_channel: Option<usize>,
    phase: f32,
}

enum NodeState {
    Wavetable {
        tables: Vec<Vec<f32>>,
        gains: Vec<f32>,
        crossfade_channel: usize,
        frequency: f32,
        phase: f32,
    },
    Additive {
        partials: Vec<PartialState>,
        frequency: f32,
    },
}

struct RuntimeNode {
    key: String,
    state: NodeState,
    /// Indices (into `nodes`) of upstream nodes whose outputs mix in.
    inputs: Vec<usize>,
    /// No other node consumes this one; sinks are averaged into the output.
    is_sink: bool,
}

/// Runtime evaluator. Owns all phase accumulators; everything else about a
/// sample is a function of the chunk values and the cursor.
pub struct SynthGraph {
    nodes: Vec<RuntimeNode>,
    /// Scratch for per-node outputs, reused every sample.
    values: Vec<f32>,
}

impl SynthGraph {
    /// Empty graph: evaluation uses the channel-0 fallback.
    pub fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Build the runtime graph from a descriptor. Dependency order comes
    /// from a topological sort; cycles and unknown input keys are
    /// configuration errors.
    pub fn from_config(config: &GraphConfig) -> Result<Self, EngineError> {
        let keys: Vec<String> = config.nodes.keys().cloned().collect();
        let index_of: HashMap<&str, usize> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.as_str(), i))
            .collect();

        let mut dag = DiGraph::<usize, ()>::new();
        let node_indices: Vec<_> = (0..keys.len()).map(|i| dag.add_node(i)).collect();
        for (i, key) in keys.iter().enumerate() {
            for input in config.nodes[key].inputs() {
                let j = *index_of.get(input.as_str()).ok_or_else(|| {
                    EngineError::UnknownInput {
                        node: key.clone(),
                        input: input.clone(),
                    }
                })?;
                dag.add_edge(node_indices[j], node_indices[i], ());
            }
        }

        let order = toposort(&dag, None)
            .map_err(|cycle| EngineError::GraphCycle(keys[dag[cycle.node_id()]].clone()))?;

        let mut consumed = vec![false; keys.len()];
        for key in &keys {
            for input in config.nodes[key].inputs() {
                consumed[index_of[input.as_str()]] = true;
            }
        }

        // position of each config node in evaluation order
        let mut position = vec![0usize; keys.len()];
        for (pos, &graph_idx) in order.iter().enumerate() {
            position[dag[graph_idx]] = pos;
        }

        let mut nodes: Vec<Option<RuntimeNode>> = (0..keys.len()).map(|_| None).collect();
        for (i, key) in keys.iter().enumerate() {
            let cfg = &config.nodes[key];
            let state = match cfg {
                NodeConfig::Wavetable {
                    tables,
                    crossfade_channel,
                    frequency,
                    ..
                } => {
                    if tables.is_empty() {
                        return Err(EngineError::InvalidConfig(format!(
                            "wavetable node '{}' has no tables",
                            key
                        )));
                    }
                    NodeState::Wavetable {
                        tables: tables.iter().map(generate_table).collect(),
                        gains: tables.iter().map(|t| t.gain).collect(),
                        crossfade_channel: *crossfade_channel,
                        frequency: *frequency,
                        phase: 0.0,
                    }
                }
                NodeConfig::Additive {
                    partials,
                    frequency,
                    ..
                } => {
                    if partials.is_empty() {
                        return Err(EngineError::InvalidConfig(format!(
                            "additive node '{}' has no partials",
                            key
                        )));
                    }
                    NodeState::Additive {
                        partials: partials
                            .iter()
                            .map(|p| PartialState {
                                ratio: p.ratio,
                                amplitude: p.amplitude,
                                amp_channel: p.amp_channel,
                                phase: 0.0,
                            })
                            .collect(),
                        frequency: *frequency,
                    }
                }
            };
            nodes[position[i]] = Some(RuntimeNode {
                key: key.clone(),
                state,
                inputs: cfg
                    .inputs()
                    .iter()
                    .map(|input| position[index_of[input.as_str()]])
                    .collect(),
                is_sink: !consumed[i],
            });
        }

        let nodes: Vec<RuntimeNode> = nodes.into_iter().flatten().collect();
        let values = vec![0.0; nodes.len()];
        Ok(Self { nodes, values })
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Zero every phase accumulator; part of the engine-wide reset.
    pub fn reset_phases(&mut self) {
        for node in &mut self.nodes {
            match &mut node.state {
                NodeState::Wavetable { phase, .. } => *phase = 0.0,
                NodeState::Additive { partials, .. } => {
                    for p in partials {
                        p.phase = 0.0;
                    }
                }
            }
        }
    }

    /// Evaluate one output sample from the chunk values at `offset`.
    ///
    /// With no nodes configured this is the documented fallback: raw
    /// channel 0 scaled by [`FALLBACK_GAIN`]. Otherwise nodes run in
    /// dependency order, upstream outputs mix into their consumers, and the
    /// result is the mean of the sink nodes.
    pub fn evaluate(&mut self, chunk: &Chunk, offset: usize, ctx: &EvalContext) -> f32 {
        if self.nodes.is_empty() {
            return chunk.sample(0, offset) * FALLBACK_GAIN;
        }

        let mut sum = 0.0;
        let mut sinks = 0usize;
        for i in 0..self.nodes.len() {
            let mixed_in: f32 = self.nodes[i]
                .inputs
                .iter()
                .map(|&j| self.values[j])
                .sum();
            let node = &mut self.nodes[i];
            let own = match &mut node.state {
                NodeState::Wavetable {
                    tables,
                    gains,
                    crossfade_channel,
                    frequency,
                    phase,
                } => {
                    let value = wavetable_sample(
                        tables,
                        gains,
                        *phase,
                        chunk.sample(*crossfade_channel, offset),
                        ctx.anti_alias,
                    );
                    *phase += *frequency * ctx.pitch_ratio / ctx.sample_rate;
                    *phase -= phase.floor();
                    value
                }
                NodeState::Additive {
                    partials,
                    frequency,
                } => {
                    let mut acc = 0.0;
                    for p in partials.iter_mut() {
                        let amp = match p.amp_channel {
                            Some(ch) => p.amplitude * unipolar(chunk.sample(ch, offset)),
                            None => p.amplitude,
                        };
                        acc += amp * (TAU * p.phase).sin();
                        p.phase += *frequency * p.ratio * ctx.pitch_ratio / ctx.sample_rate;
                        p.phase -= p.phase.floor();
                    }
                    acc / partials.len() as f32
                }
            };
            let value = own + mixed_in;
            self.values[i] = value;
            if node.is_sink {
                sum += value;
                sinks += 1;
            }
        }
        sum / sinks as f32
    }

    /// Node keys in evaluation order (for logging and tests).
    pub fn evaluation_order(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.key.as_str()).collect()
    }
}

/// Map a [-1, 1] network value to [0, 1].
fn unipolar(v: f32) -> f32 {
    ((v + 1.0) * 0.5).clamp(0.0, 1.0)
}

/// Crossfaded, gain-scaled read across a node's tables at `phase`.
fn wavetable_sample(
    tables: &[Vec<f32>],
    gains: &[f32],
    phase: f32,
    crossfade: f32,
    anti_alias: bool,
) -> f32 {
    let pos = unipolar(crossfade) * (tables.len() - 1) as f32;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(tables.len() - 1);
    let frac = pos - lo as f32;

    let read = |i: usize| gains[i] * table_read(&tables[i], phase, anti_alias);
    if lo == hi {
        read(lo)
    } else {
        read(lo) * (1.0 - frac) + read(hi) * frac
    }
}

fn table_read(table: &[f32], phase: f32, anti_alias: bool) -> f32 {
    let len = table.len();
    let pos = phase * len as f32;
    if anti_alias {
        let i0 = (pos.floor() as usize) % len;
        let i1 = (i0 + 1) % len;
        let frac = pos - pos.floor();
        table[i0] * (1.0 - frac) + table[i1] * frac
    } else {
        table[(pos as usize) % len]
    }
}

fn generate_table(spec: &WavetableSpec) -> Vec<f32> {
    let size = spec.size.max(2);
    (0..size)
        .map(|i| {
            let p = i as f32 / size as f32;
            match spec.waveform {
                Waveform::Sine => (TAU * p).sin(),
                Waveform::Triangle => {
                    if p < 0.25 {
                        4.0 * p
                    } else if p < 0.75 {
                        2.0 - 4.0 * p
                    } else {
                        4.0 * p - 4.0
                    }
                }
                Waveform::Saw => 2.0 * p - 1.0,
                Waveform::Square => {
                    if p < 0.5 {
                        1.0
                    } else {
                        -1.0
                    }
                }
            }
        })
        .collect()
}
