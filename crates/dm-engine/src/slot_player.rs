//! Direct slot audition: `play(slot)` / `stop(slot)` / `stop_all()`
//! (spec.md §6 "Slot play"). Plays a bank slot at its own default
//! volume/pitch, independent of the grid — the simpler, column-less
//! playback mode spec.md §9 calls out as subsumed by the richer per-cell
//! voice model but still exposed at the call-in boundary.

use std::collections::HashMap;
use std::sync::Arc;

use dm_audio::pitch::PitchStrategy;
use dm_core::{DmError, DmResult};

use crate::bank::{SampleBank, SampleSource};
use crate::graph::NodeGraph;
use crate::oneshot::OneShotVoice;

pub struct SlotPlayer {
    strategy: PitchStrategy,
    voices: HashMap<usize, OneShotVoice>,
}

impl SlotPlayer {
    pub fn new(strategy: PitchStrategy) -> Self {
        Self { strategy, voices: HashMap::new() }
    }

    pub fn play(&mut self, graph: &mut NodeGraph, bank: &SampleBank, slot: usize) -> DmResult<()> {
        let s = bank
            .slot(slot)
            .ok_or_else(|| DmError::BadArgument(format!("slot {slot} out of range")))?;
        let buffer = match &s.source {
            Some(SampleSource::InMemory(buf)) => buf.clone(),
            Some(SampleSource::Streaming(path)) => {
                Arc::new(dm_audio::decode_path(path, dm_core::ENGINE_SAMPLE_RATE)?)
            }
            None => return Err(DmError::BadState(format!("slot {slot} not loaded"))),
        };
        let volume = s.default_volume;
        let pitch = s.default_pitch_ratio;

        let voice = OneShotVoice::spawn(graph, buffer, self.strategy, pitch, volume)?;
        if let Some(previous) = self.voices.insert(slot, voice) {
            previous.stop(graph);
        }
        Ok(())
    }

    pub fn stop(&mut self, graph: &mut NodeGraph, slot: usize) {
        if let Some(voice) = self.voices.remove(&slot) {
            voice.stop(graph);
        }
    }

    pub fn stop_all(&mut self, graph: &mut NodeGraph) {
        for (_, voice) in self.voices.drain() {
            voice.stop(graph);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::MemoryLimits;

    fn write_wav(path: &std::path::Path, seconds: f32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let n = (seconds * 48000.0) as usize;
        for i in 0..n {
            let t = i as f32 / 48000.0;
            writer.write_sample((t * 440.0 * std::f32::consts::TAU).sin()).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn loaded_bank() -> SampleBank {
        let dir = std::env::temp_dir().join("dm_slot_player_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("s.wav");
        write_wav(&path, 0.1);
        let mut bank = SampleBank::new(MemoryLimits::default());
        bank.load(0, &path, true).unwrap();
        bank
    }

    #[test]
    fn play_and_stop_round_trip() {
        let bank = loaded_bank();
        let mut graph = NodeGraph::new(8, 512);
        let mut player = SlotPlayer::new(PitchStrategy::Resample);
        player.play(&mut graph, &bank, 0).unwrap();
        player.stop(&mut graph, 0);
    }

    #[test]
    fn play_unloaded_slot_fails() {
        let bank = SampleBank::new(MemoryLimits::default());
        let mut graph = NodeGraph::new(8, 512);
        let mut player = SlotPlayer::new(PitchStrategy::Resample);
        assert!(matches!(player.play(&mut graph, &bank, 0), Err(DmError::BadState(_))));
    }

    #[test]
    fn stop_all_clears_every_voice() {
        let bank = loaded_bank();
        let mut graph = NodeGraph::new(8, 512);
        let mut player = SlotPlayer::new(PitchStrategy::Resample);
        player.play(&mut graph, &bank, 0).unwrap();
        player.stop_all(&mut graph);
        assert!(player.voices.is_empty());
    }
}
