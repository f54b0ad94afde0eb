//! Sample decoding — reads an encoded file (WAV via hound, everything else
//! via symphonia) into a fully decoded, engine-format stereo buffer.
//!
//! Grounded on rf-file::audio_file's `read_wav`/`read_audio` split and on
//! rf_core's "decoder configuration is fixed at the engine sample rate and
//! channel count" contract (spec.md §4.1): decoding and rate conversion
//! both happen once, eagerly, on the host thread at `load()` time. The
//! resulting buffer is immutable and can be shared (via `Arc`) across every
//! voice's cursor, matching spec.md §5's "sample buffers in memory are
//! shared... read-only, immutable after load".

use std::path::Path;

use dm_core::{DmError, DmResult, StereoFrame};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decode raw file bytes (or a file path) into interleaved stereo frames
/// at `target_rate`. WAV is decoded with `hound` (matches the teacher's
/// "WAV via hound, otherwise symphonia" split — hound avoids pulling in
/// the full format-probing machinery for the common case).
pub fn decode_bytes(bytes: &[u8], target_rate: u32) -> DmResult<Vec<StereoFrame>> {
    if let Ok(frames) = decode_wav_bytes(bytes) {
        return Ok(resample_to_rate(frames.0, frames.1, target_rate));
    }
    decode_with_symphonia(Box::new(std::io::Cursor::new(bytes.to_vec())), target_rate)
}

/// Decode a file on disk (used for streaming-mode slots).
pub fn decode_path(path: &Path, target_rate: u32) -> DmResult<Vec<StereoFrame>> {
    let bytes = std::fs::read(path)
        .map_err(|e| DmError::DecodeFailed(format!("{}: {e}", path.display())))?;
    decode_bytes(&bytes, target_rate)
}

fn decode_wav_bytes(bytes: &[u8]) -> Result<(Vec<StereoFrame>, u32), ()> {
    let cursor = std::io::Cursor::new(bytes);
    let mut reader = hound::WavReader::new(cursor).map_err(|_| ())?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    let sample_rate = spec.sample_rate;

    let mono_or_interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.unwrap_or(0.0))
            .collect(),
        hound::SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.unwrap_or(0) as f32 / max_value)
                .collect()
        }
    };

    Ok((to_stereo_frames(&mono_or_interleaved, channels), sample_rate))
}

fn decode_with_symphonia(
    source: Box<dyn symphonia::core::io::MediaSource>,
    target_rate: u32,
) -> DmResult<Vec<StereoFrame>> {
    let mss = MediaSourceStream::new(source, Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DmError::DecodeFailed(e.to_string()))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| DmError::DecodeFailed("no decodable track".into()))?;
    let track_id = track.id;
    let source_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| DmError::DecodeFailed("unknown sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DmError::DecodeFailed(e.to_string()))?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut channels = 1usize;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(_)) => break,
            Err(e) => return Err(DmError::DecodeFailed(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(e) => return Err(DmError::DecodeFailed(e.to_string())),
        };
        channels = decoded.spec().channels.count();
        append_audio_buffer(&decoded, &mut interleaved);
    }

    let frames = to_stereo_frames(&interleaved, channels);
    Ok(resample_to_rate(frames, source_rate, target_rate))
}

fn append_audio_buffer(decoded: &AudioBufferRef, out: &mut Vec<f32>) {
    match decoded {
        AudioBufferRef::F32(buf) => interleave_into(buf, out),
        AudioBufferRef::F64(buf) => interleave_into(buf, out),
        AudioBufferRef::S32(buf) => interleave_into(buf, out),
        AudioBufferRef::S16(buf) => interleave_into(buf, out),
        AudioBufferRef::U8(buf) => interleave_into(buf, out),
        _ => {}
    }
}

fn interleave_into<S>(buf: &symphonia::core::audio::AudioBuffer<S>, out: &mut Vec<f32>)
where
    S: symphonia::core::sample::Sample + symphonia::core::conv::IntoSample<f32>,
{
    let channels = buf.spec().channels.count();
    let frames = buf.frames();
    for i in 0..frames {
        for ch in 0..channels {
            out.push(symphonia::core::conv::IntoSample::<f32>::into_sample(
                buf.chan(ch)[i],
            ));
        }
    }
}

fn to_stereo_frames(interleaved: &[f32], channels: usize) -> Vec<StereoFrame> {
    if channels == 0 {
        return Vec::new();
    }
    let num_frames = interleaved.len() / channels;
    let mut frames = Vec::with_capacity(num_frames);
    for i in 0..num_frames {
        let base = i * channels;
        let left = interleaved[base];
        let right = if channels > 1 { interleaved[base + 1] } else { left };
        frames.push(StereoFrame::new(left, right));
    }
    frames
}

/// Sample-rate-convert a decoded stereo buffer using rubato, matching the
/// pitch source's own resampling approach (spec.md §4.1: "mismatched
/// source formats are converted internally by the decoder").
fn resample_to_rate(frames: Vec<StereoFrame>, source_rate: u32, target_rate: u32) -> Vec<StereoFrame> {
    if source_rate == target_rate || frames.is_empty() {
        return frames;
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let mut left: Vec<f32> = frames.iter().map(|f| f.left).collect();
    let mut right: Vec<f32> = frames.iter().map(|f| f.right).collect();

    let chunk_size = 4096usize;
    let mut resampler = match FastFixedIn::<f32>::new(
        ratio,
        4.0,
        PolynomialDegree::Cubic,
        chunk_size,
        2,
    ) {
        Ok(r) => r,
        Err(_) => return frames,
    };

    let source_len = left.len();
    let mut out_left = Vec::new();
    let mut out_right = Vec::new();
    let mut pos = 0usize;

    while pos < source_len {
        let end = (pos + chunk_size).min(source_len);
        let mut in_left = left[pos..end].to_vec();
        let mut in_right = right[pos..end].to_vec();
        in_left.resize(chunk_size, 0.0);
        in_right.resize(chunk_size, 0.0);

        let input = [in_left, in_right];
        if let Ok(produced) = resampler.process(&input, None) {
            out_left.extend_from_slice(&produced[0]);
            out_right.extend_from_slice(&produced[1]);
        }
        pos = end;
    }

    // Chunks are zero-padded to a fixed size, so the tail chunk pulls in
    // silence past the real input; trim back to the expected output length.
    let expected_len = ((source_len as f64) * ratio).round() as usize;
    out_left.truncate(expected_len);
    out_right.truncate(expected_len);

    left.clear();
    right.clear();
    out_left
        .into_iter()
        .zip(out_right)
        .map(|(l, r)| StereoFrame::new(l, r))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_wav_bytes(seconds: f32, sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut buf = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut buf);
            let mut writer = hound::WavWriter::new(cursor, spec).unwrap();
            let n = (seconds * sample_rate as f32) as usize;
            for i in 0..n {
                let t = i as f32 / sample_rate as f32;
                let s = (t * 440.0 * std::f32::consts::TAU).sin() * 0.5;
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        buf
    }

    #[test]
    fn decode_wav_mono_becomes_stereo() {
        let bytes = sine_wav_bytes(0.5, 48000);
        let frames = decode_bytes(&bytes, 48000).unwrap();
        assert_eq!(frames.len(), 24000);
        assert!((frames[0].left - frames[0].right).abs() < 1e-6);
    }

    #[test]
    fn decode_wav_resamples_to_target() {
        let bytes = sine_wav_bytes(0.5, 44100);
        let frames = decode_bytes(&bytes, 48000).unwrap();
        let expected = (0.5 * 48000.0) as usize;
        assert!((frames.len() as i64 - expected as i64).abs() < 200);
    }

    #[test]
    fn decode_bad_bytes_fails() {
        let bytes = vec![0u8; 16];
        assert!(decode_bytes(&bytes, 48000).is_err());
    }
}
