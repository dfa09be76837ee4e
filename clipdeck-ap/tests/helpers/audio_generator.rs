//! Audio test file generation
//!
//! Deterministic 16-bit WAV fixtures written with hound.

use hound::{WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::{Path, PathBuf};

/// Generate a sine WAV file
///
/// # Arguments
/// * `path` - Output file path
/// * `duration_ms` - Duration in milliseconds
/// * `frequency_hz` - Sine frequency
/// * `amplitude` - 0.0-1.0
/// * `sample_rate` - File sample rate
/// * `channels` - Every channel carries the same signal
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    duration_ms: u64,
    frequency_hz: f32,
    amplitude: f32,
    sample_rate: u32,
    channels: u16,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    let total_frames = (sample_rate as u64 * duration_ms) / 1000;
    let amplitude_i16 = amplitude * i16::MAX as f32;

    for frame_idx in 0..total_frames {
        let t = frame_idx as f32 / sample_rate as f32;
        let sample = ((2.0 * PI * frequency_hz * t).sin() * amplitude_i16) as i16;
        for _ in 0..channels {
            writer.write_sample(sample)?;
        }
    }

    writer.finalize()?;
    Ok(())
}

/// Write stereo 44.1 kHz sine clips named `<name>.wav` into `dir`
pub fn write_clip_folder(dir: &Path, clips: &[(&str, u64)]) -> Vec<PathBuf> {
    clips
        .iter()
        .map(|(name, duration_ms)| {
            let path = dir.join(format!("{}.wav", name));
            generate_sine_wav(&path, *duration_ms, 440.0, 0.5, 44_100, 2).expect("write clip");
            path
        })
        .collect()
}
