//! Sample Bank: fixed array of sample slots, decoding, and memory
//! accounting against the three caps (spec.md §4.1).

use std::sync::Arc;

use dm_core::{
    DmError, DmResult, StereoFrame, DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_MEMORY_SLOTS,
    DEFAULT_MAX_TOTAL_MEMORY, ENGINE_SAMPLE_RATE, MAX_SLOTS,
};

/// Where a slot's decoded audio lives. In-memory slots share one
/// immutable buffer across every voice's cursor (spec.md §5); streaming
/// slots re-decode from disk per voice (not counted toward memory caps).
#[derive(Clone)]
pub enum SampleSource {
    InMemory(Arc<Vec<StereoFrame>>),
    Streaming(std::path::PathBuf),
}

/// One sample bank slot (spec.md §3 Sample Slot).
#[derive(Clone)]
pub struct Slot {
    pub source: Option<SampleSource>,
    pub file_path: Option<std::path::PathBuf>,
    pub default_volume: f32,
    pub default_pitch_ratio: f32,
    /// Bytes counted toward the global in-memory tally; zero unless
    /// `source` is `InMemory`.
    memory_bytes: u64,
}

impl Slot {
    fn empty() -> Self {
        Self {
            source: None,
            file_path: None,
            default_volume: 1.0,
            default_pitch_ratio: 1.0,
            memory_bytes: 0,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.source.is_some()
    }

    pub fn memory_usage(&self) -> u64 {
        self.memory_bytes
    }
}

/// Sample bank memory limits (construction-time, spec.md §4.1).
#[derive(Debug, Clone, Copy)]
pub struct MemoryLimits {
    pub max_file_size: u64,
    pub max_memory_slots: usize,
    pub max_total_memory: u64,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_memory_slots: DEFAULT_MAX_MEMORY_SLOTS,
            max_total_memory: DEFAULT_MAX_TOTAL_MEMORY,
        }
    }
}

pub struct SampleBank {
    slots: Vec<Slot>,
    limits: MemoryLimits,
    total_memory: u64,
    memory_slot_count: usize,
}

impl SampleBank {
    pub fn new(limits: MemoryLimits) -> Self {
        Self {
            slots: (0..MAX_SLOTS).map(|_| Slot::empty()).collect(),
            limits,
            total_memory: 0,
            memory_slot_count: 0,
        }
    }

    fn check_slot(&self, slot: usize) -> DmResult<()> {
        if slot >= self.slots.len() {
            return Err(DmError::BadArgument(format!("slot {slot} out of range")));
        }
        Ok(())
    }

    /// Loads `path` into `slot`. Unloads any previous content first
    /// (idempotent). Enforces the three memory caps *before* retaining
    /// the buffer; on any failure, state is unchanged (spec.md §4.1).
    pub fn load(&mut self, slot: usize, path: &std::path::Path, in_memory: bool) -> DmResult<()> {
        self.check_slot(slot)?;

        if in_memory {
            let metadata = std::fs::metadata(path)
                .map_err(|e| DmError::OpenFailed(format!("{}: {e}", path.display())))?;
            let file_size = metadata.len();

            if file_size > self.limits.max_file_size {
                return Err(DmError::MemoryLimitExceeded(format!(
                    "{file_size} exceeds per-file cap {}",
                    self.limits.max_file_size
                )));
            }

            let was_in_memory = matches!(self.slots[slot].source, Some(SampleSource::InMemory(_)));
            let projected_slot_count = if was_in_memory {
                self.memory_slot_count
            } else {
                self.memory_slot_count + 1
            };
            if projected_slot_count > self.limits.max_memory_slots {
                return Err(DmError::MemoryLimitExceeded(format!(
                    "would exceed max in-memory slot count {}",
                    self.limits.max_memory_slots
                )));
            }

            let previous_bytes = self.slots[slot].memory_usage();
            let projected_total = self.total_memory - previous_bytes + file_size;
            if projected_total > self.limits.max_total_memory {
                return Err(DmError::MemoryLimitExceeded(format!(
                    "{projected_total} exceeds global cap {}",
                    self.limits.max_total_memory
                )));
            }

            let frames = dm_audio::decode_path(path, ENGINE_SAMPLE_RATE)?;

            self.unload(slot);
            self.slots[slot].source = Some(SampleSource::InMemory(Arc::new(frames)));
            self.slots[slot].file_path = Some(path.to_path_buf());
            self.slots[slot].memory_bytes = file_size;
            self.total_memory += file_size;
            self.memory_slot_count += 1;
        } else {
            if !path.exists() {
                return Err(DmError::OpenFailed(format!("{}: not found", path.display())));
            }
            self.unload(slot);
            self.slots[slot].source = Some(SampleSource::Streaming(path.to_path_buf()));
            self.slots[slot].file_path = Some(path.to_path_buf());
        }

        Ok(())
    }

    /// Releases the slot's buffer/stream and restores defaults to 1.0
    /// (spec.md §4.1). No-op on an already-empty slot.
    pub fn unload(&mut self, slot: usize) {
        if slot >= self.slots.len() {
            return;
        }
        let s = &mut self.slots[slot];
        if matches!(s.source, Some(SampleSource::InMemory(_))) {
            self.total_memory -= s.memory_bytes;
            self.memory_slot_count -= 1;
        }
        *s = Slot::empty();
    }

    pub fn is_loaded(&self, slot: usize) -> bool {
        self.slots.get(slot).is_some_and(Slot::is_loaded)
    }

    pub fn slot(&self, slot: usize) -> Option<&Slot> {
        self.slots.get(slot)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn memory_usage(&self, slot: usize) -> u64 {
        self.slots.get(slot).map(Slot::memory_usage).unwrap_or(0)
    }

    pub fn total_memory(&self) -> u64 {
        self.total_memory
    }

    pub fn memory_slot_count(&self) -> usize {
        self.memory_slot_count
    }

    pub fn max_memory_slots(&self) -> usize {
        self.limits.max_memory_slots
    }

    pub fn max_file_size(&self) -> u64 {
        self.limits.max_file_size
    }

    pub fn max_total_memory(&self) -> u64 {
        self.limits.max_total_memory
    }

    pub fn available_memory(&self) -> u64 {
        self.limits.max_total_memory.saturating_sub(self.total_memory)
    }

    pub fn set_default_volume(&mut self, slot: usize, volume: f32) -> DmResult<()> {
        self.check_slot(slot)?;
        if !(0.0..=1.0).contains(&volume) {
            return Err(DmError::BadArgument(format!("volume {volume} out of [0,1]")));
        }
        self.slots[slot].default_volume = volume;
        Ok(())
    }

    pub fn set_default_pitch(&mut self, slot: usize, pitch: f32) -> DmResult<()> {
        self.check_slot(slot)?;
        if !(dm_core::MIN_PITCH_RATIO..=dm_core::MAX_PITCH_RATIO).contains(&pitch) {
            return Err(DmError::BadArgument(format!("pitch {pitch} out of range")));
        }
        self.slots[slot].default_pitch_ratio = pitch;
        Ok(())
    }

    pub fn default_volume(&self, slot: usize) -> DmResult<f32> {
        self.check_slot(slot)?;
        Ok(self.slots[slot].default_volume)
    }

    pub fn default_pitch(&self, slot: usize) -> DmResult<f32> {
        self.check_slot(slot)?;
        Ok(self.slots[slot].default_pitch_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_wav(path: &std::path::Path, seconds: f32, byte_pad: usize) {
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
        if byte_pad > 0 {
            let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
            f.write_all(&vec![0u8; byte_pad]).unwrap();
        }
    }

    #[test]
    fn load_and_unload_round_trips_memory() {
        let dir = std::env::temp_dir().join("dm_bank_test_basic");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("a.wav");
        write_wav(&path, 0.1, 0);
        let file_size = std::fs::metadata(&path).unwrap().len();

        let mut bank = SampleBank::new(MemoryLimits::default());
        let before = bank.total_memory();
        bank.load(0, &path, true).unwrap();
        assert_eq!(bank.total_memory() - before, file_size);
        assert!(bank.is_loaded(0));

        bank.unload(0);
        assert_eq!(bank.total_memory(), before);
        assert!(!bank.is_loaded(0));
        assert_eq!(bank.default_volume(0).unwrap(), 1.0);
    }

    #[test]
    fn per_file_cap_rejects_oversized_load() {
        let dir = std::env::temp_dir().join("dm_bank_test_cap");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("big.wav");
        write_wav(&path, 0.05, 0);

        let file_size = std::fs::metadata(&path).unwrap().len();
        let mut bank = SampleBank::new(MemoryLimits {
            max_file_size: file_size - 1,
            ..MemoryLimits::default()
        });
        let result = bank.load(0, &path, true);
        assert!(matches!(result, Err(DmError::MemoryLimitExceeded(_))));
        assert!(!bank.is_loaded(0));
    }

    #[test]
    fn global_cap_boundary_scenario_d() {
        let dir = std::env::temp_dir().join("dm_bank_test_global");
        std::fs::create_dir_all(&dir).unwrap();

        // 3 files of ~30 MiB worth of samples (approximate via duration).
        let seconds_per_30mib = 30.0 * 1024.0 * 1024.0 / (48000.0 * 4.0);
        let mut paths = Vec::new();
        for i in 0..5 {
            let p = dir.join(format!("f{i}.wav"));
            write_wav(&p, seconds_per_30mib, 0);
            paths.push(p);
        }

        let mut bank = SampleBank::new(MemoryLimits {
            max_total_memory: 100 * 1024 * 1024,
            ..MemoryLimits::default()
        });

        assert!(bank.load(0, &paths[0], true).is_ok());
        assert!(bank.load(1, &paths[1], true).is_ok());
        assert!(bank.load(2, &paths[2], true).is_ok());
        let fourth = bank.load(3, &paths[3], true);
        assert!(matches!(fourth, Err(DmError::MemoryLimitExceeded(_))));
        assert_eq!(bank.memory_slot_count(), 3);
    }

    #[test]
    fn bad_slot_index_rejected() {
        let mut bank = SampleBank::new(MemoryLimits::default());
        let dir = std::env::temp_dir().join("dm_bank_test_badslot");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("x.wav");
        write_wav(&path, 0.01, 0);
        assert!(matches!(
            bank.load(MAX_SLOTS, &path, true),
            Err(DmError::BadArgument(_))
        ));
    }

    #[test]
    fn default_volume_and_pitch_validate_range() {
        let mut bank = SampleBank::new(MemoryLimits::default());
        assert!(bank.set_default_volume(0, 1.5).is_err());
        assert!(bank.set_default_volume(0, 0.5).is_ok());
        assert!(bank.set_default_pitch(0, 64.0).is_err());
        assert!(bank.set_default_pitch(0, 2.0).is_ok());
    }
}
