//! Engine-wide capacity and default-limit constants (spec.md §3, §9).
//!
//! Per spec.md §9 these are "design parameters, not implementation
//! accidents" and MUST NOT change after `init`. They are compile-time
//! constants here (the representative grid dimensions from spec.md §3);
//! an `EngineConfig` (see dm-engine) carries the few values that are
//! legitimately construction-time parameters (sample rate, memory caps).

/// Number of sample bank slots.
pub const MAX_SLOTS: usize = 1024;

/// Number of pooled cell voices.
pub const MAX_VOICES: usize = 512;

/// Grid steps (representative 32x64 variant from spec.md §3).
pub const MAX_STEPS: usize = 32;

/// Grid columns (representative 32x64 variant from spec.md §3).
pub const MAX_COLUMNS: usize = 64;

/// Engine sample rate (spec.md §6: fixed 48 kHz default).
pub const ENGINE_SAMPLE_RATE: u32 = 48_000;

/// Engine channel count (spec.md §6: fixed stereo).
pub const ENGINE_CHANNELS: usize = 2;

/// Nominal callback period in frames (spec.md §5: ~512 frames / ~10.7ms @ 48kHz).
pub const NOMINAL_BLOCK_SIZE: usize = 512;

/// Default per-file memory cap in bytes (spec.md §4.1).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Default max number of in-memory slots (spec.md §4.1).
pub const DEFAULT_MAX_MEMORY_SLOTS: usize = 128;

/// Default global in-memory byte cap (spec.md §4.1).
pub const DEFAULT_MAX_TOTAL_MEMORY: u64 = 500 * 1024 * 1024;

/// Minimum/maximum BPM (spec.md §3).
pub const MIN_BPM: i32 = 1;
pub const MAX_BPM: i32 = 300;

/// Minimum/maximum pitch ratio (spec.md §3).
pub const MIN_PITCH_RATIO: f32 = 1.0 / 32.0;
pub const MAX_PITCH_RATIO: f32 = 32.0;

/// Pitch-source target-rate clamp (spec.md §4.2).
pub const MIN_TARGET_RATE_HZ: f64 = 8_000.0;
pub const MAX_TARGET_RATE_HZ: f64 = 192_000.0;

/// Default volume/pitch smoothing time constants (spec.md §4.7).
pub const DEFAULT_RISE_TIME_MS: f64 = 6.0;
pub const DEFAULT_FALL_TIME_MS: f64 = 12.0;

/// Convergence threshold for the volume smoother (spec.md §4.7).
pub const SMOOTH_THRESHOLD: f32 = 1e-4;

/// RealtimeStretch bypass conditions (spec.md §4.2).
pub const STRETCH_BYPASS_RATIO_DELTA: f32 = 0.10;
pub const STRETCH_BYPASS_MIN_FRAMES: usize = 128;

/// set_pitch no-op threshold (spec.md §4.2).
pub const PITCH_CHANGE_EPSILON: f32 = 0.001;

/// Dedicated one-shot slots reserved in the node graph for the two
/// preview channels (spec.md §3 Preview Channels: "two dedicated
/// one-shot voices").
pub const PREVIEW_VOICE_CAPACITY: usize = 2;

/// Headroom reserved in the node graph for concurrent direct slot
/// auditions (`play(slot)`, spec.md §6 "Slot play"). Unlike the cell
/// voice pool this isn't a spec-mandated capacity, just a worst-case
/// bound so a handful of simultaneous auditions can't exhaust the pooled
/// cell voices they share a graph with.
pub const SLOT_PLAY_VOICE_CAPACITY: usize = 64;

/// Default maximum callback block size the engine pre-allocates scratch
/// buffers for (spec.md §5: nominal period is ~512 frames, but a host
/// audio sink may occasionally request a larger block; processing must
/// still not allocate, so scratch is sized generously up front).
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 4096;
