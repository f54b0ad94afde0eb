//! Recording Tap: appends the mixed graph output to a WAV file while
//! armed (spec.md §4.8). Grounded on the teacher's
//! `rf-file::recording::DiskWriter`/`AudioRecorder` pair, simplified to
//! the spec's narrower contract — engine-native format only, no bit-depth
//! conversion, no pre-roll or punch in/out (those are Non-goals here).

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use dm_core::{DmError, DmResult, StereoFrame};

/// Streams interleaved f32 stereo frames straight to a standard RIFF/WAVE
/// file (spec.md §6 "Persisted state layout": format=3, IEEE float).
pub struct RecordingTap {
    sample_rate: u32,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    frames_written: u64,
}

impl RecordingTap {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate, writer: None, frames_written: 0 }
    }

    pub fn is_recording(&self) -> bool {
        self.writer.is_some()
    }

    /// Opens `path` for writing at engine format (spec.md §4.8). Fails
    /// with `BadState` if already recording, `OpenFailed` on I/O error.
    pub fn start(&mut self, path: &Path) -> DmResult<()> {
        if self.is_recording() {
            return Err(DmError::BadState("already recording".into()));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DmError::OpenFailed(format!("{}: {e}", parent.display())))?;
            }
        }
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let writer = hound::WavWriter::create(path, spec)
            .map_err(|e| DmError::OpenFailed(format!("{}: {e}", path.display())))?;
        self.writer = Some(writer);
        self.frames_written = 0;
        Ok(())
    }

    /// Finalizes the file and returns the recorded duration in
    /// milliseconds (spec.md §4.8). Fails with `BadState` if not
    /// currently recording.
    pub fn stop(&mut self) -> DmResult<u64> {
        let writer = self.writer.take().ok_or_else(|| DmError::BadState("not recording".into()))?;
        writer
            .finalize()
            .map_err(|e| DmError::OpenFailed(format!("finalize: {e}")))?;
        Ok(self.recording_duration_ms())
    }

    pub fn recording_duration_ms(&self) -> u64 {
        self.frames_written * 1000 / self.sample_rate as u64
    }

    /// Appends exactly `frames.len()` frames, in order, with no
    /// resampling or bit-depth conversion (spec.md §4.8 contract). A
    /// no-op when not recording.
    pub fn write(&mut self, frames: &[StereoFrame]) -> DmResult<()> {
        let Some(writer) = self.writer.as_mut() else { return Ok(()) };
        for frame in frames {
            writer
                .write_sample(frame.left)
                .and_then(|_| writer.write_sample(frame.right))
                .map_err(|e| DmError::OpenFailed(format!("write: {e}")))?;
        }
        self.frames_written += frames.len() as u64;
        Ok(())
    }
}
