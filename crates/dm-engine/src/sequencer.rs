//! Sequencer Clock: frame-counting transport, step advancement, region
//! looping (spec.md §4.6).

use dm_core::{DmError, DmResult, MAX_BPM, MIN_BPM};

use crate::bank::SampleBank;
use crate::graph::NodeGraph;
use crate::grid::Grid;
use crate::snapshot::{SnapshotCell, TransportMode};
use crate::voice::VoicePool;

/// `frames_per_step = (sample_rate * 60) / (bpm * 4)` — sixteenth-note
/// grid (spec.md §3).
fn frames_per_step(sample_rate: u32, bpm: i32) -> u64 {
    (sample_rate as u64 * 60) / (bpm as u64 * 4)
}

pub struct Region {
    pub start: i32,
    pub end: i32,
}

pub struct Sequencer {
    sample_rate: u32,
    playing: bool,
    bpm: i32,
    current_step: i32,
    step_frame_counter: u64,
    frames_per_step: u64,
    region: Region,
    mode: TransportMode,
    step_just_changed: bool,
    current_frame: u64,
    /// One playing voice index per column, for fade-out on replacement
    /// (spec.md §3 Currently-Playing Map).
    currently_playing: Vec<Option<usize>>,
}

impl Sequencer {
    pub fn new(sample_rate: u32, columns: usize) -> Self {
        Self {
            sample_rate,
            playing: false,
            bpm: 120,
            current_step: 0,
            step_frame_counter: 0,
            frames_per_step: frames_per_step(sample_rate, 120),
            region: Region { start: 0, end: dm_core::MAX_STEPS as i32 },
            mode: TransportMode::Loop,
            step_just_changed: false,
            current_frame: 0,
            currently_playing: vec![None; columns],
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn current_step(&self) -> i32 {
        self.current_step
    }

    pub fn bpm(&self) -> i32 {
        self.bpm
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    pub fn set_region(&mut self, start: i32, end: i32) -> DmResult<()> {
        if start < 0 || end <= start || end as usize > dm_core::MAX_STEPS {
            return Err(DmError::BadArgument(format!("invalid region [{start}, {end})")));
        }
        self.region = Region { start, end };
        Ok(())
    }

    pub fn set_mode(&mut self, mode: TransportMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn region(&self) -> (i32, i32) {
        (self.region.start, self.region.end)
    }

    /// Resizes the currently-playing-per-column map to match a new grid
    /// column count (spec.md §6 `set_columns`).
    pub fn set_columns(&mut self, columns: usize) {
        self.currently_playing.resize(columns, None);
    }

    /// Removes every reference to `voice_index` from the per-column map,
    /// without fading or touching the voice itself — used when the pool
    /// has already torn the voice down out from under the sequencer
    /// (grid edits, spec.md §4.5).
    pub fn forget_voice(&mut self, voice_index: usize) {
        for slot in &mut self.currently_playing {
            if *slot == Some(voice_index) {
                *slot = None;
            }
        }
    }

    /// Repoints every column referencing `old_index` to `new_index`,
    /// used after a `Preprocess`-pitch voice rebuild (spec.md §4.2, §4.4)
    /// so the sequencer keeps fading/retriggering the right voice.
    pub fn retarget_voice(&mut self, old_index: usize, new_index: usize) {
        for slot in &mut self.currently_playing {
            if *slot == Some(old_index) {
                *slot = Some(new_index);
            }
        }
    }

    /// Validates `bpm`, recomputes `frames_per_step`, and starts playback
    /// from `start_step` (spec.md §4.6).
    pub fn start(&mut self, bpm: i32, start_step: i32, snapshot: &SnapshotCell) -> DmResult<()> {
        if !(MIN_BPM..=MAX_BPM).contains(&bpm) {
            return Err(DmError::BadArgument(format!("bpm {bpm} out of [{MIN_BPM},{MAX_BPM}]")));
        }
        self.bpm = bpm;
        self.frames_per_step = frames_per_step(self.sample_rate, bpm);
        self.current_step = start_step;
        self.step_frame_counter = 0;
        self.step_just_changed = true;
        self.playing = true;
        self.publish(snapshot);
        Ok(())
    }

    /// Fades every currently-playing voice to zero and clears the
    /// per-column map (spec.md §4.6).
    pub fn stop(&mut self, pool: &mut VoicePool, snapshot: &SnapshotCell) {
        self.playing = false;
        self.current_step = 0;
        self.step_frame_counter = 0;
        for slot in &mut self.currently_playing {
            if let Some(voice_index) = slot.take() {
                pool.set_target_volume(voice_index, 0.0);
            }
        }
        self.publish(snapshot);
    }

    pub fn set_bpm(&mut self, bpm: i32) -> DmResult<()> {
        if !(MIN_BPM..=MAX_BPM).contains(&bpm) {
            return Err(DmError::BadArgument(format!("bpm {bpm} out of [{MIN_BPM},{MAX_BPM}]")));
        }
        self.bpm = bpm;
        self.frames_per_step = frames_per_step(self.sample_rate, bpm);
        Ok(())
    }

    fn publish(&self, snapshot: &SnapshotCell) {
        snapshot.publish(
            self.playing,
            self.current_step,
            self.bpm,
            self.region.start,
            self.region.end,
            self.mode,
        );
    }

    /// `advance(frame_count)` (spec.md §4.6, called from the audio
    /// callback orchestrator). No-op when not playing.
    pub fn advance(
        &mut self,
        frame_count: u64,
        grid: &Grid,
        bank: &SampleBank,
        pool: &mut VoicePool,
        graph: &mut NodeGraph,
        snapshot: &SnapshotCell,
    ) {
        self.current_frame += frame_count;
        if !self.playing {
            return;
        }

        if self.step_just_changed {
            self.step_just_changed = false;
            self.trigger_step(grid, bank, pool, graph);
        }

        let mut remaining = frame_count;
        while remaining > 0 {
            let to_next = self.frames_per_step - self.step_frame_counter;
            if remaining < to_next {
                self.step_frame_counter += remaining;
                break;
            }
            remaining -= to_next;
            self.step_frame_counter = 0;
            self.current_step += 1;
            if self.current_step >= self.region.end {
                self.current_step = self.region.start;
            }
            self.trigger_step(grid, bank, pool, graph);
            self.publish(snapshot);
        }
    }

    /// For each column, resolves the cell at `current_step` and updates
    /// voice targets per the replacement/retrigger/hold rules (spec.md
    /// §4.6 "Triggering a step").
    fn trigger_step(&mut self, grid: &Grid, bank: &SampleBank, pool: &mut VoicePool, graph: &mut NodeGraph) {
        let step = self.current_step as usize;
        for column in 0..grid.columns() {
            let cell = match grid.cell(step, column) {
                Ok(c) => c,
                Err(_) => continue,
            };
            let Some(sample_slot) = cell.sample_slot else { continue };

            let Some(voice_index) = pool.find_for_cell(step, column, sample_slot) else { continue };

            let default_volume = bank.default_volume(sample_slot).unwrap_or(1.0);
            let default_pitch = bank.default_pitch(sample_slot).unwrap_or(1.0);
            let target_volume = grid.resolve_volume(step, column, default_volume);
            let target_pitch = grid.resolve_pitch(step, column, default_pitch);

            let previous = self.currently_playing[column];
            if previous != Some(voice_index) {
                if let Some(prev_index) = previous {
                    pool.set_target_volume(prev_index, 0.0);
                }
                pool.seek(voice_index, 0);
                let _ = pool.set_pitch(voice_index, target_pitch);
                pool.set_target_volume(voice_index, target_volume);
                self.currently_playing[column] = Some(voice_index);
            } else {
                pool.seek(voice_index, 0);
                let _ = pool.set_pitch(voice_index, target_pitch);
                pool.set_target_volume(voice_index, target_volume);
            }
            let _ = graph;
        }
    }
}
