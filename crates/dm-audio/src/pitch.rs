//! Pitch-shifted playback via resampling (spec.md §4.2).
//!
//! Pitch here is literally playback speed: a ratio of 2.0 plays the
//! underlying buffer twice as fast (and an octave up). There is no
//! pitch-preserving time-stretch (see Non-goals) — rf-dsp's phase vocoder
//! is deliberately not reused here, it solves a different problem.
//!
//! Grounded on the rubato usage in the tatolab-streamlib audio mixer
//! (`SincFixedIn`-based real-time resampler with a per-port resampler
//! instance and deinterleaved buffers) and on rubato 0.15's
//! `FastFixedOut`, which is the fixed-output/variable-input-length
//! resampler shape the pull-based `read(out_buf, frame_count)` contract
//! below needs.

use dm_core::{DmError, DmResult, StereoFrame, STRETCH_BYPASS_MIN_FRAMES, STRETCH_BYPASS_RATIO_DELTA};
use rubato::{FastFixedOut, PolynomialDegree, Resampler};
use std::sync::Arc;

/// Whether a read reached the end of the underlying buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Ok,
    AtEnd,
}

/// Selects the resampling algorithm behind a pitch source. All three are
/// speed-change strategies, they only differ in latency/quality tradeoff
/// (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PitchStrategy {
    /// Low-latency linear interpolation, the default.
    Resample,
    /// Higher-quality interpolation; bypassed for near-unity ratios or
    /// tiny block sizes where the extra quality isn't audible and the
    /// setup cost isn't worth paying.
    RealtimeStretch,
    /// Bakes the whole pitched buffer offline on first use of a given
    /// ratio, then plays back with no per-frame DSP at all.
    Preprocess,
}

const CHUNK_SIZE: usize = 256;

/// A per-voice pitch-shifting reader over a shared, immutable decoded
/// buffer. Each instance owns its own resampler and carry buffer — no
/// process-wide scratch is shared between voices (spec.md §4.2, §9).
pub struct PitchSource {
    buffer: Arc<Vec<StereoFrame>>,
    cursor: usize,
    pitch_ratio: f32,
    strategy: PitchStrategy,
    resampler: Option<FastFixedOut<f32>>,
    carry_left: Vec<f32>,
    carry_right: Vec<f32>,
    preprocessed: Option<Arc<Vec<StereoFrame>>>,
    /// Deinterleaved resampler scratch, sized once to the resampler's
    /// worst-case input/output frame counts and reused across calls —
    /// `read_resampled` never allocates (spec.md §4.2, §4.3, §5).
    scratch_in_left: Vec<f32>,
    scratch_in_right: Vec<f32>,
    scratch_out_left: Vec<f32>,
    scratch_out_right: Vec<f32>,
}

impl PitchSource {
    pub fn new(buffer: Arc<Vec<StereoFrame>>, strategy: PitchStrategy) -> Self {
        Self {
            buffer,
            cursor: 0,
            pitch_ratio: 1.0,
            strategy,
            resampler: None,
            carry_left: Vec::new(),
            carry_right: Vec::new(),
            preprocessed: None,
            scratch_in_left: Vec::new(),
            scratch_in_right: Vec::new(),
            scratch_out_left: Vec::new(),
            scratch_out_right: Vec::new(),
        }
    }

    pub fn length(&self) -> usize {
        self.buffer.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn seek(&mut self, frame_index: usize) {
        self.cursor = frame_index.min(self.buffer.len());
        self.carry_left.clear();
        self.carry_right.clear();
        if let Some(r) = &mut self.resampler {
            r.reset();
        }
    }

    /// Changes playback speed. A no-op below the epsilon threshold to
    /// avoid rebuilding the resampler for imperceptible jitter. `Preprocess`
    /// requires a voice rebuild to take effect (spec.md §4.2) — this
    /// method only updates the live `Resample`/`RealtimeStretch` path.
    pub fn set_pitch(&mut self, ratio: f32) -> DmResult<()> {
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(DmError::BadArgument(format!("invalid pitch ratio {ratio}")));
        }
        if (ratio - self.pitch_ratio).abs() < dm_core::PITCH_CHANGE_EPSILON {
            return Ok(());
        }
        self.pitch_ratio = ratio;
        self.resampler = None;
        Ok(())
    }

    pub fn pitch_ratio(&self) -> f32 {
        self.pitch_ratio
    }

    /// Bakes a pitch-shifted copy of the whole buffer at the current
    /// ratio for the `Preprocess` strategy, caching the result so repeat
    /// plays at the same ratio pay no further cost.
    pub fn preprocess(&mut self) -> DmResult<()> {
        if self.strategy != PitchStrategy::Preprocess {
            return Ok(());
        }
        if (self.pitch_ratio - 1.0).abs() < dm_core::PITCH_CHANGE_EPSILON {
            self.preprocessed = Some(self.buffer.clone());
            return Ok(());
        }
        let baked = bake_whole_buffer(&self.buffer, self.pitch_ratio)?;
        self.preprocessed = Some(Arc::new(baked));
        Ok(())
    }

    /// Fills `out` with exactly `out.len()` frames, advancing the cursor.
    /// Returns `ReadOutcome::AtEnd` once the source is fully drained —
    /// frames past that point in `out` are left as silence.
    pub fn read(&mut self, out: &mut [StereoFrame]) -> DmResult<ReadOutcome> {
        match self.strategy {
            PitchStrategy::Preprocess => self.read_preprocessed(out),
            PitchStrategy::Resample | PitchStrategy::RealtimeStretch => self.read_resampled(out),
        }
    }

    fn read_preprocessed(&mut self, out: &mut [StereoFrame]) -> DmResult<ReadOutcome> {
        let source = self.preprocessed.clone().unwrap_or_else(|| self.buffer.clone());
        read_linear(&source, &mut self.cursor, out)
    }

    fn read_resampled(&mut self, out: &mut [StereoFrame]) -> DmResult<ReadOutcome> {
        let bypass = self.strategy == PitchStrategy::RealtimeStretch
            && ((self.pitch_ratio - 1.0).abs() < STRETCH_BYPASS_RATIO_DELTA
                || out.len() < STRETCH_BYPASS_MIN_FRAMES);
        if (self.pitch_ratio - 1.0).abs() < dm_core::PITCH_CHANGE_EPSILON || bypass {
            return read_linear(&self.buffer, &mut self.cursor, out);
        }

        if self.resampler.is_none() {
            let degree = match self.strategy {
                PitchStrategy::Resample => PolynomialDegree::Linear,
                PitchStrategy::RealtimeStretch => PolynomialDegree::Cubic,
                PitchStrategy::Preprocess => unreachable!(),
            };
            let resampler = FastFixedOut::<f32>::new(
                1.0 / self.pitch_ratio as f64,
                4.0,
                degree,
                CHUNK_SIZE,
                2,
            )
            .map_err(|e| DmError::BadState(format!("resampler init failed: {e}")))?;
            self.scratch_in_left.resize(resampler.input_frames_max(), 0.0);
            self.scratch_in_right.resize(resampler.input_frames_max(), 0.0);
            self.scratch_out_left.resize(resampler.output_frames_max(), 0.0);
            self.scratch_out_right.resize(resampler.output_frames_max(), 0.0);
            self.resampler = Some(resampler);
            self.carry_left.clear();
            self.carry_right.clear();
        }

        let mut produced = 0usize;
        let mut at_end = false;

        while produced < out.len() {
            if !self.carry_left.is_empty() {
                let take = self.carry_left.len().min(out.len() - produced);
                for i in 0..take {
                    out[produced + i] = StereoFrame::new(self.carry_left[i], self.carry_right[i]);
                }
                self.carry_left.drain(0..take);
                self.carry_right.drain(0..take);
                produced += take;
                continue;
            }

            if at_end {
                break;
            }

            let resampler = self.resampler.as_mut().unwrap();
            let needed = resampler.input_frames_next();
            let available = self.buffer.len().saturating_sub(self.cursor);
            let take = needed.min(available);

            let in_left = &mut self.scratch_in_left[..needed];
            let in_right = &mut self.scratch_in_right[..needed];
            for i in 0..take {
                let f = self.buffer[self.cursor + i];
                in_left[i] = f.left;
                in_right[i] = f.right;
            }
            for i in take..needed {
                in_left[i] = 0.0;
                in_right[i] = 0.0;
            }
            self.cursor += take;
            if take < needed {
                at_end = true;
            }

            let output_len = resampler.output_frames_next();
            let (_, produced_len) = resampler
                .process_into_buffer(
                    &[&self.scratch_in_left[..needed], &self.scratch_in_right[..needed]],
                    &mut [
                        &mut self.scratch_out_left[..output_len],
                        &mut self.scratch_out_right[..output_len],
                    ],
                    None,
                )
                .map_err(|e| DmError::BadState(format!("resample failed: {e}")))?;
            self.carry_left.extend(&self.scratch_out_left[..produced_len]);
            self.carry_right.extend(&self.scratch_out_right[..produced_len]);

            if take == 0 {
                break;
            }
        }

        for frame in out.iter_mut().skip(produced) {
            *frame = StereoFrame::silence();
        }

        let exhausted = at_end
            && self.carry_left.is_empty()
            && (produced < out.len() || self.cursor >= self.buffer.len());
        Ok(if exhausted { ReadOutcome::AtEnd } else { ReadOutcome::Ok })
    }
}

fn read_linear(
    source: &[StereoFrame],
    cursor: &mut usize,
    out: &mut [StereoFrame],
) -> DmResult<ReadOutcome> {
    let available = source.len().saturating_sub(*cursor);
    let take = available.min(out.len());
    out[..take].copy_from_slice(&source[*cursor..*cursor + take]);
    for slot in out.iter_mut().skip(take) {
        *slot = StereoFrame::silence();
    }
    *cursor += take;
    Ok(if take < out.len() {
        ReadOutcome::AtEnd
    } else {
        ReadOutcome::Ok
    })
}

fn bake_whole_buffer(source: &[StereoFrame], ratio: f32) -> DmResult<Vec<StereoFrame>> {
    if source.is_empty() {
        return Ok(Vec::new());
    }
    let out_len = ((source.len() as f64) / ratio as f64).ceil() as usize;
    let mut baked = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_pos = i as f64 * ratio as f64;
        let idx = src_pos.floor() as usize;
        let frac = (src_pos - idx as f64) as f32;
        let a = *source.get(idx).unwrap_or(&StereoFrame::silence());
        let b = *source.get(idx + 1).unwrap_or(&a);
        baked.push(StereoFrame::new(
            a.left + (b.left - a.left) * frac,
            a.right + (b.right - a.right) * frac,
        ));
    }
    Ok(baked)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_buffer(n: usize) -> Arc<Vec<StereoFrame>> {
        Arc::new((0..n).map(|i| StereoFrame::new(i as f32, -(i as f32))).collect())
    }

    #[test]
    fn unity_pitch_passes_through() {
        let buf = ramp_buffer(1000);
        let mut src = PitchSource::new(buf, PitchStrategy::Resample);
        let mut out = vec![StereoFrame::silence(); 100];
        src.read(&mut out).unwrap();
        assert_eq!(out[0].left, 0.0);
        assert_eq!(out[99].left, 99.0);
    }

    #[test]
    fn reports_at_end_when_buffer_exhausted() {
        let buf = ramp_buffer(50);
        let mut src = PitchSource::new(buf, PitchStrategy::Resample);
        let mut out = vec![StereoFrame::silence(); 100];
        let outcome = src.read(&mut out).unwrap();
        assert_eq!(outcome, ReadOutcome::AtEnd);
    }

    #[test]
    fn seek_resets_cursor() {
        let buf = ramp_buffer(1000);
        let mut src = PitchSource::new(buf, PitchStrategy::Resample);
        src.seek(500);
        assert_eq!(src.cursor(), 500);
    }

    #[test]
    fn double_speed_resample_produces_output() {
        let buf = ramp_buffer(2000);
        let mut src = PitchSource::new(buf, PitchStrategy::Resample);
        src.set_pitch(2.0).unwrap();
        let mut out = vec![StereoFrame::silence(); 256];
        let outcome = src.read(&mut out).unwrap();
        assert_eq!(outcome, ReadOutcome::Ok);
        assert!(out.iter().any(|f| f.left != 0.0));
    }

    #[test]
    fn preprocess_bakes_cached_buffer() {
        let buf = ramp_buffer(1000);
        let mut src = PitchSource::new(buf, PitchStrategy::Preprocess);
        src.set_pitch(2.0).unwrap();
        src.preprocess().unwrap();
        assert!(src.preprocessed.is_some());
        let baked_len = src.preprocessed.as_ref().unwrap().len();
        assert!(baked_len < 1000);
    }

    #[test]
    fn rejects_invalid_pitch() {
        let buf = ramp_buffer(10);
        let mut src = PitchSource::new(buf, PitchStrategy::Resample);
        assert!(src.set_pitch(0.0).is_err());
        assert!(src.set_pitch(-1.0).is_err());
        assert!(src.set_pitch(f32::NAN).is_err());
    }
}
