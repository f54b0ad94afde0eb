//! Audio Callback Orchestrator: the single owning value holding every
//! resource (bank, grid, voice pool, graph, sequencer, recording tap,
//! preview channels, slot player) and the public operation surface
//! consumed by the call-in boundary (spec.md §4.9, §6, §9).
//!
//! Grounded on the teacher's `rf-bridge::engine_bridge::EngineBridge` for
//! the shape of `process_block` — update transport, mix, tap output —
//! though metering is dropped (out of scope) and the step-sequencing,
//! voice pool, and override-resolution logic here have no teacher
//! counterpart, since the teacher is a DAW engine with tracks/clips, not
//! a drum-grid sequencer.

use std::path::Path;

use dm_audio::pitch::PitchStrategy;
use dm_core::{
    DmResult, StereoFrame, ENGINE_CHANNELS, MAX_STEPS, MAX_VOICES, PITCH_CHANGE_EPSILON,
    PREVIEW_VOICE_CAPACITY, SLOT_PLAY_VOICE_CAPACITY,
};

use crate::bank::{MemoryLimits, SampleBank};
use crate::config::EngineConfig;
use crate::graph::NodeGraph;
use crate::grid::Grid;
use crate::preview::PreviewChannels;
use crate::recording::RecordingTap;
use crate::sequencer::Sequencer;
use crate::slot_player::SlotPlayer;
use crate::snapshot::{SnapshotCell, TransportMode, TransportSnapshot};
use crate::voice::{VoicePool, VoiceTiming};

/// Owns every engine resource. There is intentionally only one of these
/// per process (spec.md §9); the call-in boundary (dm-ffi) holds it
/// behind a process-wide cell constructed by `init`.
pub struct Engine {
    config: EngineConfig,
    bank: SampleBank,
    grid: Grid,
    graph: NodeGraph,
    pool: VoicePool,
    sequencer: Sequencer,
    recording: RecordingTap,
    preview: PreviewChannels,
    slot_player: SlotPlayer,
    snapshot: SnapshotCell,
    scratch: Vec<StereoFrame>,
    frames_processed: u64,
    overrun_count: u64,
    recording_error_count: u64,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let graph_capacity = MAX_VOICES + PREVIEW_VOICE_CAPACITY + SLOT_PLAY_VOICE_CAPACITY;
        let timing = VoiceTiming {
            rise_time_ms: config.rise_time_ms,
            fall_time_ms: config.fall_time_ms,
            sample_rate: config.sample_rate as f64,
        };
        let limits = MemoryLimits {
            max_file_size: config.max_file_size,
            max_memory_slots: config.max_memory_slots,
            max_total_memory: config.max_total_memory,
        };
        let grid = Grid::new();
        let columns = grid.columns();

        Self {
            bank: SampleBank::new(limits),
            grid,
            graph: NodeGraph::new(graph_capacity, config.max_block_size),
            pool: VoicePool::new(config.pitch_strategy, timing),
            sequencer: Sequencer::new(config.sample_rate, columns),
            recording: RecordingTap::new(config.sample_rate),
            preview: PreviewChannels::new(config.pitch_strategy),
            slot_player: SlotPlayer::new(config.pitch_strategy),
            snapshot: SnapshotCell::new(),
            scratch: vec![StereoFrame::silence(); config.max_block_size],
            frames_processed: 0,
            overrun_count: 0,
            recording_error_count: 0,
            config,
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    // -- Bank --

    pub fn load(&mut self, slot: usize, path: &Path, in_memory: bool) -> DmResult<()> {
        log::debug!("load slot {slot} from {} (in_memory={in_memory})", path.display());
        self.bank.load(slot, path, in_memory)
    }

    pub fn unload(&mut self, slot: usize) {
        log::debug!("unload slot {slot}");
        self.bank.unload(slot);
    }

    pub fn is_loaded(&self, slot: usize) -> bool {
        self.bank.is_loaded(slot)
    }

    pub fn slot_count(&self) -> usize {
        self.bank.slot_count()
    }

    pub fn slot_memory(&self, slot: usize) -> u64 {
        self.bank.memory_usage(slot)
    }

    pub fn total_memory(&self) -> u64 {
        self.bank.total_memory()
    }

    pub fn memory_slot_count(&self) -> usize {
        self.bank.memory_slot_count()
    }

    pub fn max_memory_slots(&self) -> usize {
        self.bank.max_memory_slots()
    }

    pub fn max_file_size(&self) -> u64 {
        self.bank.max_file_size()
    }

    pub fn max_total_memory(&self) -> u64 {
        self.bank.max_total_memory()
    }

    pub fn available_memory(&self) -> u64 {
        self.bank.available_memory()
    }

    // -- Slot play (direct audition, independent of the grid) --

    pub fn play_slot(&mut self, slot: usize) -> DmResult<()> {
        self.slot_player.play(&mut self.graph, &self.bank, slot)
    }

    pub fn stop_slot(&mut self, slot: usize) {
        self.slot_player.stop(&mut self.graph, slot);
    }

    pub fn stop_all_slots(&mut self) {
        self.slot_player.stop_all(&mut self.graph);
    }

    // -- Defaults --

    /// Validates and stores the slot default, then refreshes every
    /// existing voice whose cell has no volume override (spec.md §4.1,
    /// §4.4 "Policy on grid changes").
    pub fn set_default_volume(&mut self, slot: usize, volume: f32) -> DmResult<()> {
        self.bank.set_default_volume(slot, volume)?;
        self.refresh_cells_referencing(slot, true, false);
        Ok(())
    }

    pub fn get_default_volume(&self, slot: usize) -> DmResult<f32> {
        self.bank.default_volume(slot)
    }

    pub fn set_default_pitch(&mut self, slot: usize, pitch: f32) -> DmResult<()> {
        self.bank.set_default_pitch(slot, pitch)?;
        self.refresh_cells_referencing(slot, false, true);
        Ok(())
    }

    pub fn get_default_pitch(&self, slot: usize) -> DmResult<f32> {
        self.bank.default_pitch(slot)
    }

    fn refresh_cells_referencing(&mut self, slot: usize, on_volume: bool, on_pitch: bool) {
        for step in 0..MAX_STEPS {
            for column in 0..self.grid.columns() {
                let Ok(cell) = self.grid.cell(step, column) else { continue };
                if cell.sample_slot != Some(slot) {
                    continue;
                }
                if on_volume && cell.volume_override.is_some() {
                    continue;
                }
                if on_pitch && cell.pitch_override.is_some() {
                    continue;
                }
                let _ = self.refresh_cell_voice(step, column);
            }
        }
    }

    // -- Grid --

    pub fn set_columns(&mut self, n: usize) -> DmResult<()> {
        self.grid.set_columns(n)?;
        self.invalidate_voices(|v| v.column >= n);
        self.sequencer.set_columns(n);
        Ok(())
    }

    /// Tears down any voice for the cell's previous slot, clears
    /// overrides, and eagerly creates a muted voice for the new slot
    /// (spec.md §4.4 "Policy on grid changes": slot A → B).
    pub fn set_cell(&mut self, step: usize, column: usize, slot: Option<usize>) -> DmResult<()> {
        let previous = self.grid.cell(step, column)?;

        if let Some(new_slot) = slot {
            // Validate before mutating anything (spec.md §7: "no partial
            // state persists on failure").
            if !self.bank.is_loaded(new_slot) {
                return Err(dm_core::DmError::BadState(format!("slot {new_slot} not loaded")));
            }
        }

        if let Some(old_slot) = previous.sample_slot {
            if let Some(idx) = self.pool.find_for_cell(step, column, old_slot) {
                self.pool.cleanup(idx, &mut self.graph);
                self.sequencer.forget_voice(idx);
            }
        }

        self.grid.set_cell(step, column, slot)?;

        if let Some(new_slot) = slot {
            let volume = self.bank.default_volume(new_slot)?;
            let pitch = self.bank.default_pitch(new_slot)?;
            self.pool.create(
                &self.bank,
                &mut self.graph,
                step,
                column,
                new_slot,
                volume,
                pitch,
                self.sequencer.current_frame(),
            )?;
        }
        Ok(())
    }

    pub fn clear_cell(&mut self, step: usize, column: usize) -> DmResult<()> {
        self.set_cell(step, column, None)
    }

    pub fn clear_all(&mut self) {
        self.invalidate_voices(|_| true);
        self.grid.clear_all();
    }

    fn invalidate_voices(&mut self, predicate: impl Fn(&crate::voice::Voice) -> bool) {
        let stale: Vec<usize> = (0..self.pool.capacity())
            .filter(|&idx| self.pool.voice(idx).is_some_and(&predicate))
            .collect();
        for idx in stale {
            self.pool.cleanup(idx, &mut self.graph);
            self.sequencer.forget_voice(idx);
        }
    }

    // -- Overrides --

    pub fn set_cell_volume(&mut self, step: usize, column: usize, v: f32) -> DmResult<()> {
        self.grid.set_cell_volume(step, column, v)?;
        self.refresh_cell_voice(step, column)
    }

    pub fn reset_cell_volume(&mut self, step: usize, column: usize) -> DmResult<()> {
        self.grid.reset_cell_volume(step, column)?;
        self.refresh_cell_voice(step, column)
    }

    pub fn get_cell_volume(&self, step: usize, column: usize) -> DmResult<Option<f32>> {
        self.grid.get_cell_volume(step, column)
    }

    pub fn set_cell_pitch(&mut self, step: usize, column: usize, p: f32) -> DmResult<()> {
        self.grid.set_cell_pitch(step, column, p)?;
        self.refresh_cell_voice(step, column)
    }

    pub fn reset_cell_pitch(&mut self, step: usize, column: usize) -> DmResult<()> {
        self.grid.reset_cell_pitch(step, column)?;
        self.refresh_cell_voice(step, column)
    }

    pub fn get_cell_pitch(&self, step: usize, column: usize) -> DmResult<Option<f32>> {
        self.grid.get_cell_pitch(step, column)
    }

    /// Re-resolves volume/pitch for the cell's voice (if any) and applies
    /// them, rebuilding the voice instead of live-updating when the
    /// pitch strategy is `Preprocess` and the ratio moved enough to need
    /// a new baked buffer (spec.md §4.2, §4.4).
    fn refresh_cell_voice(&mut self, step: usize, column: usize) -> DmResult<()> {
        let cell = self.grid.cell(step, column)?;
        let Some(slot) = cell.sample_slot else { return Ok(()) };
        let Some(idx) = self.pool.find_for_cell(step, column, slot) else { return Ok(()) };

        let default_volume = self.bank.default_volume(slot)?;
        let default_pitch = self.bank.default_pitch(slot)?;
        let volume = self.grid.resolve_volume(step, column, default_volume);
        let pitch = self.grid.resolve_pitch(step, column, default_pitch);

        if self.pool.strategy() == PitchStrategy::Preprocess {
            if let Some(current_ratio) = self.pool.pitch_ratio(idx) {
                if (current_ratio - pitch).abs() >= PITCH_CHANGE_EPSILON {
                    let current_frame = self.sequencer.current_frame();
                    self.pool.cleanup(idx, &mut self.graph);
                    let new_idx = self.pool.create(
                        &self.bank,
                        &mut self.graph,
                        step,
                        column,
                        slot,
                        volume,
                        pitch,
                        current_frame,
                    )?;
                    self.sequencer.retarget_voice(idx, new_idx);
                    return Ok(());
                }
            }
        }

        self.pool.set_target_volume(idx, volume);
        self.pool.set_pitch(idx, pitch)?;
        Ok(())
    }

    // -- Sections --

    pub fn insert_step(&mut self, section: usize, at_step: usize) -> DmResult<()> {
        self.grid.insert_step(section, at_step)?;
        self.invalidate_voices(|v| v.step >= at_step);
        Ok(())
    }

    pub fn delete_step(&mut self, section: usize, at_step: usize) -> DmResult<()> {
        self.grid.delete_step(section, at_step)?;
        self.invalidate_voices(|v| v.step >= at_step);
        Ok(())
    }

    pub fn section_count(&self) -> usize {
        self.grid.section_count()
    }

    pub fn section_start(&self, i: usize) -> DmResult<usize> {
        self.grid.section_start(i)
    }

    pub fn section_steps(&self, i: usize) -> DmResult<usize> {
        self.grid.section_steps(i)
    }

    pub fn section_at_step(&self, step: usize) -> Option<usize> {
        self.grid.section_at_step(step)
    }

    pub fn set_section_steps(&mut self, i: usize, n: usize) -> DmResult<()> {
        self.grid.set_section_steps(i, n)
    }

    // -- Transport --

    pub fn start(&mut self, bpm: i32, start_step: i32) -> DmResult<()> {
        log::info!("transport start bpm={bpm} start_step={start_step}");
        self.sequencer.start(bpm, start_step, &self.snapshot)
    }

    pub fn stop(&mut self) {
        log::info!("transport stop");
        self.sequencer.stop(&mut self.pool, &self.snapshot);
    }

    pub fn is_playing(&self) -> bool {
        self.sequencer.is_playing()
    }

    pub fn current_step(&self) -> i32 {
        self.sequencer.current_step()
    }

    pub fn set_bpm(&mut self, bpm: i32) -> DmResult<()> {
        self.sequencer.set_bpm(bpm)
    }

    pub fn set_region(&mut self, start: i32, end: i32) -> DmResult<()> {
        self.sequencer.set_region(start, end)
    }

    pub fn set_mode(&mut self, mode: TransportMode) {
        self.sequencer.set_mode(mode);
    }

    // -- Preview --

    pub fn preview_sample(&mut self, path: &Path, pitch: f32, volume: f32) -> DmResult<()> {
        self.preview.preview_sample(&mut self.graph, path, pitch, volume)
    }

    pub fn preview_cell(&mut self, step: usize, column: usize, pitch: f32, volume: f32) -> DmResult<()> {
        self.preview
            .preview_cell(&mut self.graph, &self.bank, &self.grid, step, column, pitch, volume)
    }

    pub fn stop_sample_preview(&mut self) {
        self.preview.stop_sample_preview(&mut self.graph);
    }

    pub fn stop_cell_preview(&mut self) {
        self.preview.stop_cell_preview(&mut self.graph);
    }

    // -- Recording --

    pub fn start_recording(&mut self, path: &Path) -> DmResult<()> {
        log::info!("start recording to {}", path.display());
        self.recording.start(path)
    }

    pub fn stop_recording(&mut self) -> DmResult<u64> {
        log::info!("stop recording");
        self.recording.stop()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_recording()
    }

    pub fn recording_duration_ms(&self) -> u64 {
        self.recording.recording_duration_ms()
    }

    // -- Diagnostics --

    pub fn active_voice_count(&self) -> usize {
        self.pool.active_voice_count()
    }

    pub fn max_voice_count(&self) -> usize {
        self.pool.capacity()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn overrun_count(&self) -> u64 {
        self.overrun_count
    }

    pub fn recording_error_count(&self) -> u64 {
        self.recording_error_count
    }

    // -- Snapshot --

    pub fn snapshot(&self) -> TransportSnapshot {
        self.snapshot.read()
    }

    // -- Audio callback orchestrator (spec.md §4.9) --

    /// Invoked once per audio period from the audio thread. Never
    /// allocates, never logs, never panics (spec.md §5, §7, §9): a
    /// request larger than the pre-allocated scratch is serviced up to
    /// capacity and the remainder of `out` is padded with silence, with
    /// the shortfall recorded in `overrun_count` for the host to log when
    /// it next polls diagnostics.
    pub fn process(&mut self, out: &mut [f32], frame_count: u32) {
        let channels = ENGINE_CHANNELS;
        let requested = frame_count as usize;
        let serviced = requested.min(self.scratch.len());
        if serviced < requested {
            self.overrun_count += 1;
        }

        self.frames_processed += serviced as u64;

        let scratch = &mut self.scratch[..serviced];
        self.sequencer.advance(
            serviced as u64,
            &self.grid,
            &self.bank,
            &mut self.pool,
            &mut self.graph,
            &self.snapshot,
        );
        self.pool.tick_smoothers(&mut self.graph);
        self.pool.monitor();
        self.graph.read(scratch);

        if self.recording.is_recording() && self.recording.write(scratch).is_err() {
            self.recording_error_count += 1;
        }

        for (i, frame) in scratch.iter().enumerate() {
            out[i * channels] = frame.left;
            out[i * channels + 1] = frame.right;
        }
        for sample in out.iter_mut().skip(serviced * channels) {
            *sample = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dm_audio::sink::OfflineSink;
    use std::sync::Arc;

    /// Drives `engine` through `sink` for `total_frames`, boxing it
    /// behind a mutex since `OfflineSink::render` requires a `'static +
    /// Send` callback (the real-time sink's own contract).
    fn render(engine: Engine, sink: &OfflineSink, total_frames: u64) -> Engine {
        let shared = Arc::new(parking_lot::Mutex::new(engine));
        let callback = shared.clone();
        sink.render(total_frames, Box::new(move |buf, frames| callback.lock().process(buf, frames)));
        Arc::try_unwrap(shared).ok().unwrap().into_inner()
    }

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

    fn engine_with_loop() -> Engine {
        let dir = std::env::temp_dir().join("dm_engine_test_basic");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("kick.wav");
        write_wav(&path, 0.5);

        let mut engine = Engine::new(EngineConfig::default());
        engine.load(0, &path, true).unwrap();
        engine.set_columns(1).unwrap();
        engine.set_cell(0, 0, Some(0)).unwrap();
        engine.set_cell(4, 0, Some(0)).unwrap();
        engine.set_region(0, 8).unwrap();
        engine
    }

    #[test]
    fn scenario_a_basic_loop_reaches_step_4_then_wraps() {
        let mut engine = engine_with_loop();
        engine.start(120, 0).unwrap();

        let sink = OfflineSink::new(48000, 2, 512);
        let engine = render(engine, &sink, 24000);
        assert_eq!(engine.current_step(), 4);

        let engine = render(engine, &sink, 24000);
        assert_eq!(engine.current_step(), 0);
    }

    #[test]
    fn scenario_b_override_beats_default_then_resets() {
        let dir = std::env::temp_dir().join("dm_engine_test_override");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("s.wav");
        write_wav(&path, 0.1);

        let mut engine = Engine::new(EngineConfig::default());
        engine.load(0, &path, true).unwrap();
        engine.set_default_volume(0, 0.8).unwrap();
        engine.set_cell(0, 0, Some(0)).unwrap();
        assert_eq!(engine.get_cell_volume(0, 0).unwrap(), None);

        engine.set_cell_volume(0, 0, 0.25).unwrap();
        assert_eq!(engine.get_cell_volume(0, 0).unwrap(), Some(0.25));

        engine.set_default_volume(0, 0.5).unwrap();
        assert_eq!(engine.get_cell_volume(0, 0).unwrap(), Some(0.25));

        engine.reset_cell_volume(0, 0).unwrap();
        assert_eq!(engine.get_cell_volume(0, 0).unwrap(), None);
    }

    #[test]
    fn scenario_d_memory_cap_boundary() {
        let dir = std::env::temp_dir().join("dm_engine_test_memcap");
        std::fs::create_dir_all(&dir).unwrap();
        let seconds_per_30mib = 30.0 * 1024.0 * 1024.0 / (48000.0 * 4.0);
        let config = EngineConfig { max_total_memory: 100 * 1024 * 1024, ..EngineConfig::default() };
        let mut engine = Engine::new(config);

        for i in 0..4 {
            let p = dir.join(format!("f{i}.wav"));
            write_wav(&p, seconds_per_30mib);
            let result = engine.load(i, &p, true);
            if i < 3 {
                assert!(result.is_ok());
            } else {
                assert!(matches!(result, Err(dm_core::DmError::MemoryLimitExceeded(_))));
            }
        }
        assert_eq!(engine.memory_slot_count(), 3);
    }

    #[test]
    fn scenario_e_recording_is_deterministic() {
        let dir = std::env::temp_dir().join("dm_engine_test_recording");
        std::fs::create_dir_all(&dir).unwrap();
        let out_path = dir.join("capture.wav");

        let mut engine = Engine::new(EngineConfig::default());
        engine.start_recording(&out_path).unwrap();

        let sink = OfflineSink::new(48000, 2, 512);
        let mut engine = render(engine, &sink, 96000);

        let duration_ms = engine.stop_recording().unwrap();
        assert_eq!(duration_ms, 2000);

        let reader = hound::WavReader::open(&out_path).unwrap();
        let data_bytes = reader.len() as u64 * 4;
        assert_eq!(data_bytes, 96000 * 2 * 4);
    }

    #[test]
    fn set_cell_rejects_unloaded_slot_without_mutating_grid() {
        let mut engine = Engine::new(EngineConfig::default());
        let result = engine.set_cell(0, 0, Some(0));
        assert!(matches!(result, Err(dm_core::DmError::BadState(_))));
        assert_eq!(engine.get_cell_volume(0, 0).unwrap(), None);
    }

    #[test]
    fn clear_all_tears_down_every_voice() {
        let mut engine = engine_with_loop();
        assert_eq!(engine.active_voice_count(), 2);
        engine.clear_all();
        assert_eq!(engine.active_voice_count(), 0);
    }

    #[test]
    fn overrun_is_recorded_when_request_exceeds_max_block_size() {
        let config = EngineConfig { max_block_size: 256, ..EngineConfig::default() };
        let mut engine = Engine::new(config);
        let mut buf = vec![0.0f32; 512 * 2];
        engine.process(&mut buf, 512);
        assert_eq!(engine.overrun_count(), 1);
        assert_eq!(engine.frames_processed(), 256);
    }
}
