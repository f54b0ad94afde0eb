//! Preview Channels: two dedicated one-shot voices, "sample preview"
//! (an arbitrary file on disk, not necessarily bank-loaded) and "cell
//! preview" (a grid cell's currently-assigned sample), spec.md §3/§6.

use std::path::Path;
use std::sync::Arc;

use dm_audio::pitch::PitchStrategy;
use dm_core::{DmError, DmResult, ENGINE_SAMPLE_RATE, MAX_PITCH_RATIO, MIN_PITCH_RATIO};

use crate::bank::{SampleBank, SampleSource};
use crate::graph::NodeGraph;
use crate::grid::Grid;
use crate::oneshot::OneShotVoice;

fn validate_pitch(pitch: f32) -> DmResult<()> {
    if !(MIN_PITCH_RATIO..=MAX_PITCH_RATIO).contains(&pitch) {
        return Err(DmError::BadArgument(format!("pitch {pitch} out of range")));
    }
    Ok(())
}

pub struct PreviewChannels {
    strategy: PitchStrategy,
    sample_preview: Option<OneShotVoice>,
    cell_preview: Option<OneShotVoice>,
}

impl PreviewChannels {
    pub fn new(strategy: PitchStrategy) -> Self {
        Self { strategy, sample_preview: None, cell_preview: None }
    }

    /// Previews an arbitrary file on disk at the given pitch/volume,
    /// independent of the sample bank (spec.md §6 `preview_sample`).
    pub fn preview_sample(
        &mut self,
        graph: &mut NodeGraph,
        path: &Path,
        pitch: f32,
        volume: f32,
    ) -> DmResult<()> {
        validate_pitch(pitch)?;
        let frames = dm_audio::decode_path(path, ENGINE_SAMPLE_RATE)?;
        let voice = OneShotVoice::spawn(graph, Arc::new(frames), self.strategy, pitch, volume)?;
        if let Some(previous) = self.sample_preview.replace(voice) {
            previous.stop(graph);
        }
        Ok(())
    }

    /// Previews whatever sample a grid cell currently references, at an
    /// explicit pitch/volume supplied by the caller (spec.md §6
    /// `preview_cell`) — independent of the cell's own overrides.
    pub fn preview_cell(
        &mut self,
        graph: &mut NodeGraph,
        bank: &SampleBank,
        grid: &Grid,
        step: usize,
        column: usize,
        pitch: f32,
        volume: f32,
    ) -> DmResult<()> {
        validate_pitch(pitch)?;
        let cell = grid.cell(step, column)?;
        let slot_index = cell
            .sample_slot
            .ok_or_else(|| DmError::BadState(format!("cell ({step},{column}) is empty")))?;
        let slot = bank
            .slot(slot_index)
            .ok_or_else(|| DmError::BadArgument(format!("slot {slot_index} out of range")))?;
        let buffer = match &slot.source {
            Some(SampleSource::InMemory(buf)) => buf.clone(),
            Some(SampleSource::Streaming(path)) => {
                Arc::new(dm_audio::decode_path(path, ENGINE_SAMPLE_RATE)?)
            }
            None => return Err(DmError::BadState(format!("slot {slot_index} not loaded"))),
        };
        let voice = OneShotVoice::spawn(graph, buffer, self.strategy, pitch, volume)?;
        if let Some(previous) = self.cell_preview.replace(voice) {
            previous.stop(graph);
        }
        Ok(())
    }

    pub fn stop_sample_preview(&mut self, graph: &mut NodeGraph) {
        if let Some(voice) = self.sample_preview.take() {
            voice.stop(graph);
        }
    }

    pub fn stop_cell_preview(&mut self, graph: &mut NodeGraph) {
        if let Some(voice) = self.cell_preview.take() {
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

    #[test]
    fn preview_sample_attaches_and_replaces() {
        let dir = std::env::temp_dir().join("dm_preview_test_sample");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("p.wav");
        write_wav(&path, 0.1);

        let mut graph = NodeGraph::new(8, 512);
        let mut preview = PreviewChannels::new(PitchStrategy::Resample);
        preview.preview_sample(&mut graph, &path, 1.0, 0.8).unwrap();
        preview.preview_sample(&mut graph, &path, 1.5, 0.5).unwrap();
        preview.stop_sample_preview(&mut graph);
    }

    #[test]
    fn preview_cell_requires_loaded_slot() {
        let mut grid = Grid::new();
        grid.set_cell(0, 0, Some(0)).unwrap();
        let bank = SampleBank::new(MemoryLimits::default());
        let mut graph = NodeGraph::new(8, 512);
        let mut preview = PreviewChannels::new(PitchStrategy::Resample);
        let result = preview.preview_cell(&mut graph, &bank, &grid, 0, 0, 1.0, 1.0);
        assert!(matches!(result, Err(DmError::BadState(_))));
    }

    #[test]
    fn preview_cell_rejects_empty_cell() {
        let grid = Grid::new();
        let bank = SampleBank::new(MemoryLimits::default());
        let mut graph = NodeGraph::new(8, 512);
        let mut preview = PreviewChannels::new(PitchStrategy::Resample);
        let result = preview.preview_cell(&mut graph, &bank, &grid, 0, 0, 1.0, 1.0);
        assert!(matches!(result, Err(DmError::BadState(_))));
    }
}
