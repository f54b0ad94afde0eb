//! dm-audio: decoding, pitch-shifted playback, and output sinks.
//!
//! Owns everything that touches an encoded file or a physical audio
//! device — the engine crate composes these into the node graph and
//! callback orchestrator without knowing about `hound`, `symphonia`,
//! `rubato` or `cpal` directly.

pub mod decode;
pub mod pitch;
pub mod sink;

pub use decode::{decode_bytes, decode_path};
pub use pitch::{PitchSource, PitchStrategy, ReadOutcome};
pub use sink::{CpalSink, OfflineSink, RenderCallback, SinkFormat};
