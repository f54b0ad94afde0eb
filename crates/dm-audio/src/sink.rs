//! Output sinks — the boundary between the engine and an actual audio
//! device (spec.md §6).
//!
//! `AudioSink` is the capability the engine needs: a fixed format and a
//! way to register the render callback. `CpalSink` is the real
//! implementation, grounded on `rf-audio::engine::AudioEngine::start`'s
//! device-selection and stream-building pattern. `OfflineSink` drives the
//! same callback synchronously and deterministically for tests, grounded
//! on `rf-engine::freeze::OfflineRenderer`'s block-by-block render loop.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use dm_core::{DmError, DmResult};

/// The render callback the sink invokes once per audio period. `out` is
/// interleaved stereo f32, pre-sized to `frame_count * channels`.
pub type RenderCallback = Box<dyn FnMut(&mut [f32], u32) + Send + 'static>;

/// Format the engine always runs at (spec.md §6: fixed stereo float at a
/// device-negotiated sample rate).
#[derive(Debug, Clone, Copy)]
pub struct SinkFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// A live output stream backed by `cpal`. Dropping it stops the stream.
pub struct CpalSink {
    stream: cpal::Stream,
    format: SinkFormat,
}

impl CpalSink {
    /// Opens the default output device and starts streaming, calling
    /// `callback` from the audio thread for every period.
    pub fn open_default(mut callback: RenderCallback) -> DmResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| DmError::OpenFailed("no default output device".into()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| DmError::OpenFailed(e.to_string()))?;

        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();
        let channels = config.channels;
        let sample_rate = config.sample_rate.0;

        let stream = match sample_format {
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _| {
                    let frames = data.len() as u32 / channels as u32;
                    callback(data, frames);
                },
                move |err| log::error!("output stream error: {err}"),
                None,
            ),
            other => {
                return Err(DmError::OpenFailed(format!(
                    "unsupported device sample format {other:?}"
                )))
            }
        }
        .map_err(|e| DmError::OpenFailed(e.to_string()))?;

        stream
            .play()
            .map_err(|e| DmError::OpenFailed(e.to_string()))?;

        Ok(Self {
            stream,
            format: SinkFormat { sample_rate, channels },
        })
    }

    pub fn format(&self) -> SinkFormat {
        self.format
    }

    pub fn pause(&self) -> DmResult<()> {
        self.stream
            .pause()
            .map_err(|e| DmError::BadState(e.to_string()))
    }

    pub fn resume(&self) -> DmResult<()> {
        self.stream
            .play()
            .map_err(|e| DmError::BadState(e.to_string()))
    }
}

/// Drives a render callback synchronously in fixed-size blocks with no
/// device involved — deterministic and reproducible, used by tests and by
/// the engine's own offline rendering paths (spec.md §8 Scenario E).
pub struct OfflineSink {
    format: SinkFormat,
    block_size: usize,
}

impl OfflineSink {
    pub fn new(sample_rate: u32, channels: u16, block_size: usize) -> Self {
        Self {
            format: SinkFormat { sample_rate, channels },
            block_size,
        }
    }

    pub fn format(&self) -> SinkFormat {
        self.format
    }

    /// Renders exactly `total_frames` frames through `callback`, returning
    /// the full interleaved buffer. Each call gets exactly `block_size`
    /// frames except possibly the last, matching the real-time callback's
    /// periodic shape.
    pub fn render(&self, total_frames: u64, mut callback: RenderCallback) -> Vec<f32> {
        let channels = self.format.channels as usize;
        let mut out = vec![0.0f32; total_frames as usize * channels];
        let mut produced = 0u64;

        while produced < total_frames {
            let remaining = (total_frames - produced) as usize;
            let this_block = remaining.min(self.block_size);
            let start = produced as usize * channels;
            let end = start + this_block * channels;
            callback(&mut out[start..end], this_block as u32);
            produced += this_block as u64;
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_sink_renders_exact_frame_count() {
        let sink = OfflineSink::new(48000, 2, 512);
        let out = sink.render(2000, Box::new(|buf, frames| {
            for i in 0..frames as usize {
                buf[i * 2] = 1.0;
                buf[i * 2 + 1] = -1.0;
            }
        }));
        assert_eq!(out.len(), 2000 * 2);
        assert_eq!(out[0], 1.0);
        assert_eq!(out[1], -1.0);
        assert_eq!(out[out.len() - 2], 1.0);
    }

    #[test]
    fn offline_sink_handles_partial_last_block() {
        let sink = OfflineSink::new(48000, 2, 512);
        let calls = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let calls_inner = calls.clone();
        let out = sink.render(
            1000,
            Box::new(move |_buf, frames| {
                calls_inner.lock().unwrap().push(frames);
            }),
        );
        assert_eq!(out.len(), 1000 * 2);
        let recorded = calls.lock().unwrap().clone();
        assert_eq!(recorded, vec![512, 488]);
    }
}
