use anyhow::{Context, Result};
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::analysis::hann_window;
use super::decode::decode_mono;
use super::wav;

const FFT_SIZE: usize = 2048;
const HOP_SIZE: usize = 512;

/// 4:1 above threshold; threshold sits at 1.5x the mean windowed RMS.
const COMP_RATIO: f32 = 4.0;
const COMP_THRESHOLD_FACTOR: f32 = 1.5;
const COMP_ATTACK: f32 = 0.003;
const COMP_RELEASE: f32 = 0.1;

/// Fixed per-band EQ gains: sub-bass, bass, low-mids, high-mids, highs.
const EQ_GAINS: [f32; 5] = [1.2, 1.1, 0.9, 1.1, 1.05];

/// -1.0 dBFS release ceiling, linear.
const TARGET_PEAK_DB: f32 = -1.0;

/// Fixed 20ms comb delay for the widened channel, computed at 44.1kHz.
const STEREO_DELAY_SAMPLES: usize = (0.02 * 44100.0) as usize;

#[derive(Debug, Serialize)]
struct MasterMetadata {
    peak_db: f32,
    rms_db: f32,
    duration: f32,
    sample_rate: u32,
}

/// Master the synced mix: compression, EQ, stereo widening, limiting.
///
/// Same contract as beat sync: never fails past its boundary. On any internal
/// error the input path comes back unchanged and no metadata is written.
pub fn master(input_path: &Path, out_dir: &Path) -> PathBuf {
    match master_inner(input_path, out_dir) {
        Ok(path) => path,
        Err(err) => {
            log::warn!("Mastering failed, keeping unmastered mix: {err:#}");
            input_path.to_path_buf()
        }
    }
}

fn master_inner(input_path: &Path, out_dir: &Path) -> Result<PathBuf> {
    let audio = decode_mono(input_path)?;

    log::info!("Mastering: compression");
    let compressed = apply_compression(&audio.samples);

    log::info!("Mastering: equalization");
    let equalized = apply_band_gains(&compressed, audio.sample_rate, &EQ_GAINS);

    log::info!("Mastering: stereo enhancement");
    let (mut left, mut right) = widen_stereo(&equalized);

    log::info!("Mastering: limiting");
    apply_limiting(&mut left, &mut right);

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let output_path = out_dir.join("final_track.wav");
    wav::write_stereo(&output_path, &left, &right, audio.sample_rate)?;

    let metadata = audio_metrics(&left, &right, audio.sample_rate);
    let metadata_path = out_dir.join("mastering_metadata.json");
    std::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)
        .with_context(|| format!("Failed to write {}", metadata_path.display()))?;

    log::info!(
        "Mastered track written to {} (peak {:.2} dB, rms {:.2} dB)",
        output_path.display(),
        metadata.peak_db,
        metadata.rms_db
    );
    Ok(output_path)
}

/// Dynamic range compression with asymmetric gain smoothing.
///
/// The gain update is a single-pass feedback loop: the smoothed gain at sample
/// i depends on the smoothed gain at i-1. Order matters; this must stay a
/// sequential fold and must not be parallelized.
fn apply_compression(audio: &[f32]) -> Vec<f32> {
    if audio.is_empty() {
        return Vec::new();
    }

    let threshold = mean_windowed_rms(audio) * COMP_THRESHOLD_FACTOR;

    let mut compressed = Vec::with_capacity(audio.len());
    let mut prev_gain = 1.0f32;

    for (i, &sample) in audio.iter().enumerate() {
        let level = sample.abs();
        let mut gain = if level > threshold {
            (threshold + (level - threshold) / COMP_RATIO) / level
        } else {
            1.0
        };

        if i > 0 {
            // Fast attack when gain drops, slow release while it recovers
            let coeff = if gain < prev_gain { COMP_ATTACK } else { COMP_RELEASE };
            gain = prev_gain + (gain - prev_gain) * coeff;
        }

        compressed.push(sample * gain);
        prev_gain = gain;
    }

    compressed
}

/// Mean RMS over short windows, matching the threshold basis of the chain.
fn mean_windowed_rms(audio: &[f32]) -> f32 {
    if audio.is_empty() {
        return 0.0;
    }

    let mut sum = 0.0f32;
    let mut count = 0usize;
    let mut pos = 0;
    loop {
        let end = (pos + FFT_SIZE).min(audio.len());
        let window = &audio[pos..end];
        let rms = (window.iter().map(|s| s * s).sum::<f32>() / window.len() as f32).sqrt();
        sum += rms;
        count += 1;
        if end == audio.len() {
            break;
        }
        pos += HOP_SIZE;
    }

    sum / count as f32
}

/// STFT-domain band EQ. Bands partition the spectrum by inequality, so each
/// bin receives exactly one band's gain.
fn apply_band_gains(audio: &[f32], sample_rate: u32, gains: &[f32; 5]) -> Vec<f32> {
    if audio.len() < FFT_SIZE {
        return audio.to_vec();
    }

    let window = hann_window(FFT_SIZE);
    let nyquist = sample_rate as f32 / 2.0;
    let freq_resolution = sample_rate as f32 / FFT_SIZE as f32;

    // Round the frame count up and zero-pad so the final hop's worth of
    // samples still falls inside a frame; otherwise the track loses its
    // tail to the overlap-add.
    let n_frames = (audio.len() - FFT_SIZE + HOP_SIZE - 1) / HOP_SIZE + 1;
    let padded_len = (n_frames - 1) * HOP_SIZE + FFT_SIZE;
    let mut padded = audio.to_vec();
    padded.resize(padded_len, 0.0);

    // Per-frame forward FFT, gain, inverse FFT. Frames are independent;
    // only the overlap-add below is sequential.
    let processed: Vec<Vec<f32>> = (0..n_frames)
        .into_par_iter()
        .map(|frame_idx| {
            let start = frame_idx * HOP_SIZE;

            let mut planner = FftPlanner::<f32>::new();
            let fft = planner.plan_fft_forward(FFT_SIZE);
            let ifft = planner.plan_fft_inverse(FFT_SIZE);

            let mut buf: Vec<Complex<f32>> = padded[start..start + FFT_SIZE]
                .iter()
                .enumerate()
                .map(|(i, &s)| Complex::new(s * window[i], 0.0))
                .collect();
            fft.process(&mut buf);

            // Apply gains to the non-negative frequencies, mirror conjugates
            // so the inverse transform stays real.
            for k in 0..=FFT_SIZE / 2 {
                let freq = k as f32 * freq_resolution;
                let gain = band_gain(freq, nyquist, gains);
                buf[k] *= gain;
                if k != 0 && k != FFT_SIZE / 2 {
                    buf[FFT_SIZE - k] = buf[k].conj();
                }
            }

            ifft.process(&mut buf);
            buf.iter().map(|c| c.re / FFT_SIZE as f32).collect()
        })
        .collect();

    let mut output = vec![0.0f32; padded_len];
    let mut window_sum = vec![0.0f32; padded_len];

    for (frame_idx, frame) in processed.iter().enumerate() {
        let start = frame_idx * HOP_SIZE;
        for i in 0..FFT_SIZE {
            output[start + i] += frame[i] * window[i];
            window_sum[start + i] += window[i] * window[i];
        }
    }

    output.truncate(audio.len());
    for (i, (s, w)) in output.iter_mut().zip(window_sum.iter()).enumerate() {
        if *w > 1e-6 {
            *s /= *w;
        } else {
            // Window zeros at the frame edges leave these samples without
            // coverage; pass the input through instead of muting them.
            *s = audio[i];
        }
    }

    output
}

fn band_gain(freq: f32, nyquist: f32, gains: &[f32; 5]) -> f32 {
    if freq < 20.0 {
        1.0
    } else if freq <= 60.0 {
        gains[0]
    } else if freq <= 250.0 {
        gains[1]
    } else if freq <= 2000.0 {
        gains[2]
    } else if freq <= 6000.0 {
        gains[3]
    } else if freq <= nyquist {
        gains[4]
    } else {
        1.0
    }
}

/// Duplicate mono into two channels with a fixed comb delay on the right.
/// A simple widening trick, not true decorrelation.
fn widen_stereo(audio: &[f32]) -> (Vec<f32>, Vec<f32>) {
    let left = audio.to_vec();
    let mut right = vec![0.0f32; audio.len()];
    for i in STEREO_DELAY_SAMPLES..audio.len() {
        right[i] = audio[i - STEREO_DELAY_SAMPLES];
    }
    (left, right)
}

/// Attenuate to the -1 dBFS ceiling (never amplifies), then brick-wall clip
/// anything still over. The clip is a documented simplification, not a
/// lookahead limiter.
fn apply_limiting(left: &mut [f32], right: &mut [f32]) {
    let target = 10.0f32.powf(TARGET_PEAK_DB / 20.0);

    let peak = left
        .iter()
        .chain(right.iter())
        .map(|s| s.abs())
        .fold(0.0f32, f32::max);

    // Silent signal: nothing to limit, avoid dividing by zero.
    if peak <= 0.0 {
        return;
    }

    let gain = (target / peak).min(1.0);

    for s in left.iter_mut().chain(right.iter_mut()) {
        *s *= gain;
        if s.abs() > target {
            *s = s.signum() * target;
        }
    }
}

fn audio_metrics(left: &[f32], right: &[f32], sample_rate: u32) -> MasterMetadata {
    let n = (left.len() + right.len()) as f32;
    let peak = left
        .iter()
        .chain(right.iter())
        .map(|s| s.abs())
        .fold(0.0f32, f32::max)
        .max(1e-10);
    let rms = (left
        .iter()
        .chain(right.iter())
        .map(|s| s * s)
        .sum::<f32>()
        / n.max(1.0))
    .sqrt()
    .max(1e-10);

    MasterMetadata {
        peak_db: 20.0 * peak.log10(),
        rms_db: 20.0 * rms.log10(),
        duration: left.len() as f32 / sample_rate as f32,
        sample_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, secs: f32, sr: u32, amplitude: f32) -> Vec<f32> {
        (0..(secs * sr as f32) as usize)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin() * amplitude)
            .collect()
    }

    fn band_energy(samples: &[f32], sample_rate: u32, low: f32, high: f32) -> f32 {
        let mut planner = FftPlanner::<f32>::new();
        let n = FFT_SIZE * 4;
        let fft = planner.plan_fft_forward(n);
        let mut buf: Vec<Complex<f32>> = samples[..n.min(samples.len())]
            .iter()
            .map(|&s| Complex::new(s, 0.0))
            .collect();
        buf.resize(n, Complex::new(0.0, 0.0));
        fft.process(&mut buf);

        let resolution = sample_rate as f32 / n as f32;
        buf[..n / 2]
            .iter()
            .enumerate()
            .filter(|(k, _)| {
                let f = *k as f32 * resolution;
                f >= low && f <= high
            })
            .map(|(_, c)| c.norm_sqr())
            .sum()
    }

    #[test]
    fn limiter_bounds_peak_for_hot_input() {
        let mut left = sine(1000.0, 0.1, 44100, 1.4);
        let mut right = left.clone();
        apply_limiting(&mut left, &mut right);

        let target = 10.0f32.powf(-1.0 / 20.0);
        let peak = left
            .iter()
            .chain(right.iter())
            .map(|s| s.abs())
            .fold(0.0f32, f32::max);
        assert!(peak <= target + f32::EPSILON);
    }

    #[test]
    fn limiter_never_amplifies_quiet_input() {
        let mut left = sine(1000.0, 0.1, 44100, 0.2);
        let mut right = left.clone();
        apply_limiting(&mut left, &mut right);
        let peak = left.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        assert!((peak - 0.2).abs() < 1e-3);
    }

    #[test]
    fn limiter_leaves_silence_untouched() {
        let mut left = vec![0.0f32; 1000];
        let mut right = vec![0.0f32; 1000];
        apply_limiting(&mut left, &mut right);
        assert!(left.iter().chain(right.iter()).all(|&s| s == 0.0));
    }

    #[test]
    fn compression_tames_loud_transients() {
        // Quiet bed with a loud burst in the middle
        let mut audio = sine(440.0, 1.0, 44100, 0.1);
        let burst_start = audio.len() / 2;
        for i in burst_start..burst_start + 2000 {
            audio[i] *= 9.0;
        }

        let compressed = apply_compression(&audio);
        assert_eq!(compressed.len(), audio.len());

        let in_peak = audio.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        let out_peak = compressed.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        assert!(out_peak < in_peak, "burst was not reduced: {out_peak} vs {in_peak}");
    }

    #[test]
    fn eq_roundtrip_with_inverse_gains_restores_band_energy() {
        let sr = 44100;
        let mut audio = vec![0.0f32; sr as usize];
        for &freq in &[40.0, 150.0, 1000.0, 4000.0, 10000.0f32] {
            for (i, s) in audio.iter_mut().enumerate() {
                *s += (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin() * 0.15;
            }
        }

        let inverse: [f32; 5] = [
            1.0 / EQ_GAINS[0],
            1.0 / EQ_GAINS[1],
            1.0 / EQ_GAINS[2],
            1.0 / EQ_GAINS[3],
            1.0 / EQ_GAINS[4],
        ];

        let boosted = apply_band_gains(&audio, sr, &EQ_GAINS);
        let restored = apply_band_gains(&boosted, sr, &inverse);

        for &(low, high) in &[(20.0, 60.0), (60.0, 250.0), (250.0, 2000.0), (2000.0, 6000.0), (6000.0, 20000.0)] {
            let original = band_energy(&audio, sr, low, high);
            let roundtrip = band_energy(&restored, sr, low, high);
            if original > 1e-6 {
                let rel = (roundtrip - original).abs() / original;
                assert!(rel < 0.15, "band {low}-{high} Hz off by {rel}");
            }
        }
    }

    #[test]
    fn eq_with_unity_gains_preserves_the_whole_signal() {
        // One second at 44.1 kHz does not land on a frame boundary, so the
        // final partial hop must survive the overlap-add instead of being
        // zeroed out.
        let sr = 44100;
        let audio = sine(330.0, 1.0, sr, 0.5);
        let output = apply_band_gains(&audio, sr, &[1.0; 5]);

        assert_eq!(output.len(), audio.len());
        for (i, (&out, &orig)) in output.iter().zip(audio.iter()).enumerate() {
            assert!(
                (out - orig).abs() < 0.02,
                "sample {i} diverged: {out} vs {orig}"
            );
        }

        let tail = &output[output.len() - HOP_SIZE..];
        assert!(
            tail.iter().any(|&s| s.abs() > 0.1),
            "tail was silently truncated"
        );
    }

    #[test]
    fn stereo_delay_is_twenty_ms_at_44100() {
        assert_eq!(STEREO_DELAY_SAMPLES, 882);
        let audio = sine(440.0, 0.5, 44100, 0.5);
        let (left, right) = widen_stereo(&audio);
        assert_eq!(left.len(), right.len());
        assert_eq!(right[STEREO_DELAY_SAMPLES], audio[0]);
        assert!(right[..STEREO_DELAY_SAMPLES].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn mastering_silent_input_yields_silence() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("silence.wav");
        wav::write_mono(&input, &vec![0.0f32; 44100], 44100).unwrap();

        let out = master(&input, dir.path());
        assert_ne!(out, input, "silent input should still master successfully");

        let result = decode_mono(&out).unwrap();
        assert!(result.samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn hot_sine_masters_to_the_target_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("tone.wav");
        // Full-scale tone: limiting has to engage and land on the ceiling.
        wav::write_mono(&input, &sine(1000.0, 1.0, 44100, 1.0), 44100).unwrap();

        let out = master(&input, dir.path());
        assert_ne!(out, input);

        let result = decode_mono(&out).unwrap();
        let peak = result.samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        let target = 10.0f32.powf(-1.0 / 20.0);
        let peak_db = 20.0 * peak.max(1e-10).log10();
        let target_db = 20.0 * target.log10();
        assert!(
            (peak_db - target_db).abs() < 0.1,
            "peak {peak_db:.2} dB vs target {target_db:.2} dB"
        );
    }

    #[test]
    fn quiet_sine_keeps_its_level_minus_the_midrange_cut() {
        // A -6 dBFS tone sits below the compression threshold and below the
        // limiter ceiling, so the only level change is the 0.9 midrange EQ
        // gain: about -6.9 dBFS. The never-amplifying limiter cannot pull it
        // up to the ceiling.
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("quiet_tone.wav");
        let amplitude = 10.0f32.powf(-6.0 / 20.0);
        wav::write_mono(&input, &sine(1000.0, 1.0, 44100, amplitude), 44100).unwrap();

        let out = master(&input, dir.path());
        let result = decode_mono(&out).unwrap();

        // Measure away from the frame edges, where the EQ windowing is
        // complete.
        let body = &result.samples[FFT_SIZE..result.samples.len() - FFT_SIZE];
        let peak = body.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        let peak_db = 20.0 * peak.max(1e-10).log10();

        let expected_db = -6.0 + 20.0 * 0.9f32.log10();
        assert!(
            (peak_db - expected_db).abs() < 0.2,
            "peak {peak_db:.2} dB vs expected {expected_db:.2} dB"
        );

        let ceiling = 10.0f32.powf(TARGET_PEAK_DB / 20.0);
        let overall = result.samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        assert!(overall <= ceiling + f32::EPSILON);
    }
}
