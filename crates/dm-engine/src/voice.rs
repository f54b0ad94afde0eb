//! Voice Pool: fixed-capacity array of cell voices, each owning one
//! decoder buffer, one pitch source, and one graph node (spec.md §4.4).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use dm_core::{DmError, DmResult, StereoFrame, MAX_VOICES};
use dm_audio::pitch::{PitchSource, PitchStrategy, ReadOutcome};

use crate::bank::{SampleBank, SampleSource};
use crate::graph::{NodeGraph, NodeHandle, NodeSource, NodeState};
use crate::smoother::VolumeSmoother;

/// Lock-free mailbox a voice's pitch control passes through, instead of a
/// mutex shared between the audio thread and the host thread. A
/// [`Voice`] is reachable from both the sequencer (retargeting a voice on
/// step trigger, itself running on the audio thread inside `advance`) and
/// the host thread (grid/default override edits); the underlying
/// [`PitchSource`] is owned solely by the audio-thread-side [`PitchNode`],
/// and both callers publish requests here instead of touching it
/// directly (spec.md §5 "never ... acquire a lock that can be held by
/// the host thread", §9 "atomic single-word publications").
///
/// Pitch and seek each get their own version counter so that a pitch-only
/// change never triggers a spurious reseek, and vice versa.
struct PitchControl {
    pitch_version: AtomicU32,
    pitch_bits: AtomicU32,
    seek_version: AtomicU32,
    seek_to: AtomicUsize,
    /// Published by `PitchNode::read` after each block; polled by
    /// `VoicePool::monitor` (diagnostics only, one callback of latency).
    finished: AtomicBool,
}

impl PitchControl {
    fn new(pitch: f32) -> Self {
        Self {
            pitch_version: AtomicU32::new(0),
            pitch_bits: AtomicU32::new(pitch.to_bits()),
            seek_version: AtomicU32::new(0),
            seek_to: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
        }
    }

    fn request_pitch(&self, ratio: f32) {
        self.pitch_bits.store(ratio.to_bits(), Ordering::Relaxed);
        self.pitch_version.fetch_add(1, Ordering::Release);
    }

    fn request_seek(&self, frame_index: usize) {
        self.seek_to.store(frame_index, Ordering::Relaxed);
        self.seek_version.fetch_add(1, Ordering::Release);
    }
}

/// Adapts a [`PitchSource`] to the graph's [`NodeSource`] contract. The
/// source is owned outright by this node — the graph (and therefore the
/// audio thread) is its only caller — with retune/retrigger requests
/// arriving through `control` rather than a shared lock (spec.md §4.4,
/// §5).
struct PitchNode {
    source: PitchSource,
    control: Arc<PitchControl>,
    applied_pitch_version: u32,
    applied_seek_version: u32,
}

impl PitchNode {
    fn drain_control(&mut self) {
        let pitch_version = self.control.pitch_version.load(Ordering::Acquire);
        if pitch_version != self.applied_pitch_version {
            self.applied_pitch_version = pitch_version;
            let ratio = f32::from_bits(self.control.pitch_bits.load(Ordering::Relaxed));
            let _ = self.source.set_pitch(ratio);
        }
        let seek_version = self.control.seek_version.load(Ordering::Acquire);
        if seek_version != self.applied_seek_version {
            self.applied_seek_version = seek_version;
            let frame_index = self.control.seek_to.load(Ordering::Relaxed);
            self.source.seek(frame_index);
        }
    }
}

impl NodeSource for PitchNode {
    fn read(&mut self, out: &mut [StereoFrame]) -> bool {
        self.drain_control();
        let at_end = matches!(self.source.read(out), Ok(ReadOutcome::AtEnd) | Err(_));
        self.control.finished.store(at_end, Ordering::Relaxed);
        at_end
    }
}

/// One pooled cell voice (spec.md §3 Voice).
pub struct Voice {
    pub id: u64,
    pub step: usize,
    pub column: usize,
    pub sample_slot: usize,
    pub start_frame: u64,
    control: Arc<PitchControl>,
    /// Last pitch ratio requested for this voice. Tracked here rather
    /// than read back from the (audio-thread-owned) `PitchSource`, so
    /// `VoicePool::pitch_ratio` never has to touch it either.
    pitch_ratio: f32,
    node: NodeHandle,
    smoother: VolumeSmoother,
    finished: bool,
}

impl Voice {
    pub fn current_volume(&self) -> f32 {
        self.smoother.current()
    }

    pub fn target_volume(&self) -> f32 {
        self.smoother.target()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn node_handle(&self) -> NodeHandle {
        self.node
    }
}

/// Per-voice timing configuration, copied into each voice's smoother at
/// creation (spec.md §4.7).
#[derive(Debug, Clone, Copy)]
pub struct VoiceTiming {
    pub rise_time_ms: f64,
    pub fall_time_ms: f64,
    pub sample_rate: f64,
}

/// Fixed-capacity pool of cell voices (spec.md §4.4).
pub struct VoicePool {
    voices: Vec<Option<Voice>>,
    next_id: u64,
    strategy: PitchStrategy,
    timing: VoiceTiming,
}

impl VoicePool {
    pub fn new(strategy: PitchStrategy, timing: VoiceTiming) -> Self {
        Self {
            voices: (0..MAX_VOICES).map(|_| None).collect(),
            next_id: 0,
            strategy,
            timing,
        }
    }

    pub fn capacity(&self) -> usize {
        self.voices.len()
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_some()).count()
    }

    pub fn voice(&self, index: usize) -> Option<&Voice> {
        self.voices.get(index).and_then(|v| v.as_ref())
    }

    pub fn strategy(&self) -> PitchStrategy {
        self.strategy
    }

    /// Last-requested pitch ratio for an active voice, used to decide
    /// whether a `Preprocess`-strategy voice needs a full rebuild rather
    /// than a live `set_pitch` (spec.md §4.2, §4.4).
    pub fn pitch_ratio(&self, index: usize) -> Option<f32> {
        self.voices.get(index).and_then(Option::as_ref).map(|v| v.pitch_ratio)
    }

    /// First non-active slot, or `None` (spec.md §4.4: `PoolExhausted`).
    pub fn find_available(&self) -> Option<usize> {
        self.voices.iter().position(Option::is_none)
    }

    /// Linear scan by `(step, column, sample_slot)` (spec.md §4.4).
    pub fn find_for_cell(&self, step: usize, column: usize, sample_slot: usize) -> Option<usize> {
        self.voices.iter().position(|v| {
            v.as_ref()
                .is_some_and(|v| v.step == step && v.column == column && v.sample_slot == sample_slot)
        })
    }

    /// Acquires a slot, builds its decoder/pitch source/graph node, and
    /// returns its index (spec.md §4.4 steps 1-5).
    pub fn create(
        &mut self,
        bank: &SampleBank,
        graph: &mut NodeGraph,
        step: usize,
        column: usize,
        sample_slot: usize,
        resolved_volume: f32,
        resolved_pitch: f32,
        current_frame: u64,
    ) -> DmResult<usize> {
        let index = self.find_available().ok_or(DmError::PoolExhausted)?;

        let slot = bank
            .slot(sample_slot)
            .ok_or_else(|| DmError::BadArgument(format!("slot {sample_slot} out of range")))?;
        let buffer = match &slot.source {
            Some(SampleSource::InMemory(buf)) => buf.clone(),
            Some(SampleSource::Streaming(path)) => {
                Arc::new(dm_audio::decode_path(path, dm_core::ENGINE_SAMPLE_RATE)?)
            }
            None => return Err(DmError::BadState(format!("slot {sample_slot} not loaded"))),
        };

        let mut pitch_source = PitchSource::new(buffer, self.strategy);
        pitch_source.set_pitch(resolved_pitch)?;
        if self.strategy == PitchStrategy::Preprocess {
            pitch_source.preprocess()?;
        }
        let control = Arc::new(PitchControl::new(resolved_pitch));
        let node_source = PitchNode {
            source: pitch_source,
            control: control.clone(),
            applied_pitch_version: 0,
            applied_seek_version: 0,
        };

        let node = graph.attach(Box::new(node_source)).ok_or(DmError::PoolExhausted)?;
        graph.set_bus_volume(node, 0.0);

        let mut smoother = VolumeSmoother::new(
            0.0,
            self.timing.rise_time_ms,
            self.timing.fall_time_ms,
            self.timing.sample_rate,
        );
        smoother.set_target(resolved_volume);

        let id = self.next_id;
        self.next_id += 1;

        self.voices[index] = Some(Voice {
            id,
            step,
            column,
            sample_slot,
            start_frame: current_frame,
            control,
            pitch_ratio: resolved_pitch,
            node,
            smoother,
            finished: false,
        });

        Ok(index)
    }

    /// Detaches the node, tears down the pitch source, zeroes the slot.
    /// Safe to call on an already-inactive index (spec.md §4.4).
    pub fn cleanup(&mut self, index: usize, graph: &mut NodeGraph) {
        if let Some(voice) = self.voices.get_mut(index).and_then(Option::take) {
            graph.detach(voice.node);
        }
    }

    /// Publishes a seek request for the audio thread to drain on its next
    /// `read` — never touches the voice's `PitchSource` directly (spec.md
    /// §5, §9).
    pub fn seek(&mut self, index: usize, frame_index: usize) {
        if let Some(voice) = self.voices.get(index).and_then(Option::as_ref) {
            voice.control.request_seek(frame_index);
        }
    }

    /// Publishes a pitch-change request for the audio thread to drain on
    /// its next `read` (spec.md §5, §9). Validated here so callers still
    /// get a synchronous error for an out-of-range ratio.
    pub fn set_pitch(&mut self, index: usize, ratio: f32) -> DmResult<()> {
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(DmError::BadArgument(format!("invalid pitch ratio {ratio}")));
        }
        if let Some(voice) = self.voices.get_mut(index).and_then(Option::as_mut) {
            voice.pitch_ratio = ratio;
            voice.control.request_pitch(ratio);
        }
        Ok(())
    }

    pub fn set_target_volume(&mut self, index: usize, volume: f32) {
        if let Some(voice) = self.voices.get_mut(index).and_then(Option::as_mut) {
            voice.smoother.set_target(volume);
        }
    }

    /// `volume_smoother.tick_all()` (spec.md §4.9 step 3): advances every
    /// active voice's envelope and writes the result to its graph node,
    /// stopping nodes that have settled at zero.
    pub fn tick_smoothers(&mut self, graph: &mut NodeGraph) {
        for voice in self.voices.iter_mut().flatten() {
            voice.smoother.tick();
            graph.set_bus_volume(voice.node, voice.smoother.current());
            let state = if voice.smoother.converged_to_zero() {
                NodeState::Stopped
            } else {
                NodeState::Started
            };
            graph.set_state(voice.node, state);
        }
    }

    /// `voice_pool.monitor()` (spec.md §4.9 step 4): records end-of-stream
    /// for every active voice without freeing it. Reads the flag the
    /// voice's `PitchNode` published at the end of the previous `read`
    /// (one callback of latency), rather than locking the source.
    pub fn monitor(&mut self) {
        for voice in self.voices.iter_mut().flatten() {
            voice.finished = voice.control.finished.load(Ordering::Relaxed);
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

    fn timing() -> VoiceTiming {
        VoiceTiming { rise_time_ms: 6.0, fall_time_ms: 12.0, sample_rate: 48000.0 }
    }

    fn loaded_bank(seconds: f32) -> SampleBank {
        let dir = std::env::temp_dir().join("dm_voice_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("voice.wav");
        write_wav(&path, seconds);
        let mut bank = SampleBank::new(MemoryLimits::default());
        bank.load(0, &path, true).unwrap();
        bank
    }

    #[test]
    fn create_attaches_muted_node_then_smoother_raises_it() {
        let bank = loaded_bank(0.1);
        let mut graph = NodeGraph::new(8, 512);
        let mut pool = VoicePool::new(PitchStrategy::Resample, timing());

        let idx = pool.create(&bank, &mut graph, 0, 0, 0, 1.0, 1.0, 0).unwrap();
        assert_eq!(graph.bus_volume(pool.voice(idx).unwrap().node_handle()), Some(0.0));

        for _ in 0..2000 {
            pool.tick_smoothers(&mut graph);
        }
        assert!(pool.voice(idx).unwrap().current_volume() > 0.99);
    }

    #[test]
    fn find_for_cell_locates_the_right_voice() {
        let bank = loaded_bank(0.1);
        let mut graph = NodeGraph::new(8, 512);
        let mut pool = VoicePool::new(PitchStrategy::Resample, timing());
        let idx = pool.create(&bank, &mut graph, 2, 3, 0, 1.0, 1.0, 0).unwrap();
        assert_eq!(pool.find_for_cell(2, 3, 0), Some(idx));
        assert_eq!(pool.find_for_cell(2, 4, 0), None);
    }

    #[test]
    fn cleanup_frees_slot_and_detaches_node() {
        let bank = loaded_bank(0.1);
        let mut graph = NodeGraph::new(8, 512);
        let mut pool = VoicePool::new(PitchStrategy::Resample, timing());
        let idx = pool.create(&bank, &mut graph, 0, 0, 0, 1.0, 1.0, 0).unwrap();
        let handle = pool.voice(idx).unwrap().node_handle();

        pool.cleanup(idx, &mut graph);
        assert!(pool.voice(idx).is_none());
        assert!(!graph.is_attached(handle));

        // no-op on an already-inactive index
        pool.cleanup(idx, &mut graph);
    }

    #[test]
    fn pool_exhaustion_returns_pool_exhausted() {
        let bank = loaded_bank(0.05);
        let mut graph = NodeGraph::new(MAX_VOICES, 512);
        let mut pool = VoicePool::new(PitchStrategy::Resample, timing());
        for i in 0..MAX_VOICES {
            pool.create(&bank, &mut graph, i % 32, 0, 0, 1.0, 1.0, 0).unwrap();
        }
        let result = pool.create(&bank, &mut graph, 0, 1, 0, 1.0, 1.0, 0);
        assert!(matches!(result, Err(DmError::PoolExhausted)));
    }

    #[test]
    fn monitor_marks_short_sample_finished_after_reading_past_end() {
        let bank = loaded_bank(0.001);
        let mut graph = NodeGraph::new(8, 4096);
        let mut pool = VoicePool::new(PitchStrategy::Resample, timing());
        let idx = pool.create(&bank, &mut graph, 0, 0, 0, 1.0, 1.0, 0).unwrap();
        graph.set_state(pool.voice(idx).unwrap().node_handle(), NodeState::Started);

        let mut out = vec![StereoFrame::silence(); 4096];
        graph.read(&mut out);
        pool.monitor();
        assert!(pool.voice(idx).unwrap().is_finished());
    }
}
