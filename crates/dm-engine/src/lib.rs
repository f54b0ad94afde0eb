//! dm-engine: sample bank, grid, voice pool, node graph, sequencer clock,
//! recording tap, and the audio callback orchestrator.

pub mod bank;
pub mod config;
pub mod engine;
pub mod grid;
pub mod graph;
pub mod oneshot;
pub mod preview;
pub mod recording;
pub mod sequencer;
pub mod slot_player;
pub mod smoother;
pub mod snapshot;
pub mod voice;

pub use bank::{MemoryLimits, SampleBank, SampleSource, Slot};
pub use config::EngineConfig;
pub use engine::Engine;
pub use grid::{Cell, Grid, Section};
pub use graph::{NodeGraph, NodeHandle, NodeSource, NodeState};
pub use preview::PreviewChannels;
pub use recording::RecordingTap;
pub use sequencer::{Region, Sequencer};
pub use slot_player::SlotPlayer;
pub use smoother::VolumeSmoother;
pub use snapshot::{SnapshotCell, TransportMode, TransportSnapshot};
pub use voice::{Voice, VoicePool, VoiceTiming};
