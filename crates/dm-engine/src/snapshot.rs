//! Public transport snapshot, published by the audio thread and read by
//! external (host) threads without a mutex (spec.md §3, §4.6).
//!
//! The teacher's own lock-free state sync (rf-realtime::state::TripleBuffer)
//! uses triple-buffering with a packed atomic index. This component needs
//! the simpler seqlock-style even/odd version protocol the specification
//! calls for instead, but keeps the same atomic-ordering idiom (acquire/
//! release, `portable_atomic` for the wider-than-pointer-width counter).

use portable_atomic::{AtomicU32, Ordering};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64};

/// Loop vs. song playback mode (spec.md §3 Transport State).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Loop,
    Song,
}

/// Value-type snapshot of transport state (spec.md §3 Public Snapshot).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportSnapshot {
    pub version: u32,
    pub playing: bool,
    pub current_step: i32,
    pub bpm: i32,
    pub region_start: i32,
    pub region_end: i32,
    pub mode: TransportMode,
}

/// Even/odd-versioned publication cell. The writer (audio thread) calls
/// [`Publisher::publish`] with a closure that mutates the fields; readers
/// (host threads) call [`read`] and retry on a torn read.
pub struct SnapshotCell {
    version: AtomicU32,
    playing: AtomicBool,
    current_step: AtomicI32,
    bpm: AtomicI32,
    region_start: AtomicI32,
    region_end: AtomicI32,
    mode: AtomicU64,
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self {
            version: AtomicU32::new(0),
            playing: AtomicBool::new(false),
            current_step: AtomicI32::new(0),
            bpm: AtomicI32::new(120),
            region_start: AtomicI32::new(0),
            region_end: AtomicI32::new(0),
            mode: AtomicU64::new(mode_to_u64(TransportMode::Loop)),
        }
    }

    /// Writer-side: bumps the version to odd, applies the mutation, bumps
    /// it to even (spec.md §3 protocol). Must only be called from the
    /// audio thread (the sequencer is its sole mutator).
    pub fn publish(
        &self,
        playing: bool,
        current_step: i32,
        bpm: i32,
        region_start: i32,
        region_end: i32,
        mode: TransportMode,
    ) {
        self.version.fetch_add(1, Ordering::AcqRel);
        self.playing.store(playing, Ordering::Relaxed);
        self.current_step.store(current_step, Ordering::Relaxed);
        self.bpm.store(bpm, Ordering::Relaxed);
        self.region_start.store(region_start, Ordering::Relaxed);
        self.region_end.store(region_end, Ordering::Relaxed);
        self.mode.store(mode_to_u64(mode), Ordering::Relaxed);
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Reader-side: spins until it observes a stable, even version
    /// straddling a consistent read of every field.
    pub fn read(&self) -> TransportSnapshot {
        loop {
            let before = self.version.load(Ordering::Acquire);
            if !before.is_multiple_of(2) {
                continue;
            }
            let playing = self.playing.load(Ordering::Relaxed);
            let current_step = self.current_step.load(Ordering::Relaxed);
            let bpm = self.bpm.load(Ordering::Relaxed);
            let region_start = self.region_start.load(Ordering::Relaxed);
            let region_end = self.region_end.load(Ordering::Relaxed);
            let mode = mode_from_u64(self.mode.load(Ordering::Relaxed));
            let after = self.version.load(Ordering::Acquire);
            if before == after {
                return TransportSnapshot {
                    version: before,
                    playing,
                    current_step,
                    bpm,
                    region_start,
                    region_end,
                    mode,
                };
            }
        }
    }
}

impl Default for SnapshotCell {
    fn default() -> Self {
        Self::new()
    }
}

fn mode_to_u64(mode: TransportMode) -> u64 {
    match mode {
        TransportMode::Loop => 0,
        TransportMode::Song => 1,
    }
}

fn mode_from_u64(v: u64) -> TransportMode {
    match v {
        1 => TransportMode::Song,
        _ => TransportMode::Loop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn read_after_publish_sees_written_values() {
        let cell = SnapshotCell::new();
        cell.publish(true, 4, 128, 0, 16, TransportMode::Song);
        let snap = cell.read();
        assert!(snap.playing);
        assert_eq!(snap.current_step, 4);
        assert_eq!(snap.bpm, 128);
        assert_eq!(snap.mode, TransportMode::Song);
        assert_eq!(snap.version % 2, 0);
    }

    #[test]
    fn concurrent_publish_and_read_never_tears() {
        let cell = Arc::new(SnapshotCell::new());
        let writer_cell = cell.clone();
        let writer = thread::spawn(move || {
            for step in 0..2000 {
                writer_cell.publish(true, step, 120, 0, 16, TransportMode::Loop);
            }
        });

        for _ in 0..2000 {
            let snap = cell.read();
            assert!(snap.current_step >= 0 && snap.current_step < 2000);
            assert_eq!(snap.version % 2, 0);
        }
        writer.join().unwrap();
    }
}
