//! Kindle graph activation engine.
//!
//! Energy enters a memory graph through stimuli, spreads along weighted
//! links, and fades over time. Per-node factors slow decay for consolidated
//! or central nodes and leak energy arriving at ephemeral ones. A
//! criticality controller keeps the branching ratio ρ near a target that a
//! task-context inferrer chooses; a coherence meter and a mode classifier
//! describe the quality of the spread.
//!
//! Zero I/O. The engine reaches the graph only through [`GraphStore`].

pub mod activation;
pub mod adapter;
pub mod coherence;
pub mod config;
pub mod constants;
pub mod context;
pub mod criticality;
pub mod decay;
pub mod diffusion;
pub mod energy;
pub mod engine;
pub mod error;
pub mod events;
pub mod factors;
pub mod frame;
pub mod graph;
pub mod groups;
pub mod mode;
pub mod serde_compat;
pub mod stimulus;
pub mod synth;
pub mod time;
pub mod vector;

pub use activation::ActivationRule;
pub use adapter::{GraphStore, NodeUpdate};
pub use coherence::{CoherenceBand, CoherenceMeter, CoherenceReading};
pub use config::EngineConfig;
pub use context::{ContextHints, ContextInferrer, ContextReading, TaskContext};
pub use criticality::{CriticalityController, CriticalityReport, OperatorRates, SafetyState, spectral_radius};
pub use decay::DecayReport;
pub use diffusion::{DiffusionReport, Transfer};
pub use energy::{ChannelKey, EnergyChannels};
pub use engine::{Engine, EngineState, EngineStatus, TickReport};
pub use error::{ConfigError, EngineError, Result};
pub use events::{EventDetail, EventSink, TickEvent, TickSummary, TracingSink};
pub use factors::{NodeFactors, TypeProfiles};
pub use frame::Frame;
pub use graph::{Link, MemoryGraph, Node, NodeId};
pub use groups::{GroupReport, GroupTracker, VariantGroup};
pub use mode::{CriticalityMode, ModeReading, ModeTracker};
pub use serde_compat::{CURRENT_VERSION, export_json, import_json};
pub use stimulus::{InjectionReport, Stimulus};
pub use synth::{SynthSpec, generate};
