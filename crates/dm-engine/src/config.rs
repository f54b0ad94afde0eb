//! Engine configuration: construction-time parameters, immutable after
//! `Engine::new` (spec.md §9: capacities "MUST NOT be dynamic after
//! init"). Grounded on the teacher's `rf-audio::AudioConfig` /
//! `rf-engine::EngineConfig` structs.

use dm_audio::pitch::PitchStrategy;
use dm_core::{
    DEFAULT_FALL_TIME_MS, DEFAULT_MAX_BLOCK_SIZE, DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_MEMORY_SLOTS,
    DEFAULT_MAX_TOTAL_MEMORY, DEFAULT_RISE_TIME_MS, ENGINE_CHANNELS, ENGINE_SAMPLE_RATE,
};

/// Construction-time parameters for an [`crate::engine::Engine`]
/// (spec.md §9). Supplied once, read throughout the engine's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub channels: usize,
    /// Largest block size the engine pre-allocates scratch for; a host
    /// callback requesting more than this is a programming error on the
    /// host's part (spec.md §5: nominal period is ~512 frames).
    pub max_block_size: usize,
    pub max_file_size: u64,
    pub max_memory_slots: usize,
    pub max_total_memory: u64,
    pub pitch_strategy: PitchStrategy,
    pub rise_time_ms: f64,
    pub fall_time_ms: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: ENGINE_SAMPLE_RATE,
            channels: ENGINE_CHANNELS,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_memory_slots: DEFAULT_MAX_MEMORY_SLOTS,
            max_total_memory: DEFAULT_MAX_TOTAL_MEMORY,
            pitch_strategy: PitchStrategy::Resample,
            rise_time_ms: DEFAULT_RISE_TIME_MS,
            fall_time_ms: DEFAULT_FALL_TIME_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.channels, 2);
        assert_eq!(config.pitch_strategy, PitchStrategy::Resample);
    }
}
