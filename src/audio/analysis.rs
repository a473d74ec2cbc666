use rustfft::{num_complex::Complex, FftPlanner};

pub const FFT_SIZE: usize = 2048;
pub const HOP_SIZE: usize = 1024;

/// Onset timestamps and tempo estimate for one track.
///
/// `tempo_bpm` is 0.0 when the track is too short or too quiet to carry a
/// pulse; callers treat a non-positive tempo as "do not stretch".
#[derive(Clone, Debug)]
pub struct RhythmProfile {
    pub onset_times: Vec<f32>,
    pub tempo_bpm: f32,
}

/// Estimate onsets and tempo via spectral-flux periodicity.
pub fn analyze_rhythm(samples: &[f32], sample_rate: u32) -> RhythmProfile {
    let flux = spectral_flux(samples, sample_rate);
    let onset_times = detect_onsets(&flux);
    let tempo_bpm = estimate_tempo(&onset_times);

    log::debug!(
        "Rhythm analysis: {} onsets, tempo={:.1} BPM",
        onset_times.len(),
        tempo_bpm
    );

    RhythmProfile {
        onset_times,
        tempo_bpm,
    }
}

/// Per-hop spectral flux: positive magnitude change summed over bins.
fn spectral_flux(samples: &[f32], sample_rate: u32) -> Vec<(f32, f32)> {
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(FFT_SIZE);
    let hann = hann_window(FFT_SIZE);

    let mut prev_magnitudes = vec![0.0f32; FFT_SIZE / 2];
    let mut flux_values: Vec<(f32, f32)> = Vec::new();

    let mut pos = 0;
    while pos + FFT_SIZE <= samples.len() {
        let mut buffer: Vec<Complex<f32>> = samples[pos..pos + FFT_SIZE]
            .iter()
            .enumerate()
            .map(|(i, &s)| Complex::new(s * hann[i], 0.0))
            .collect();
        fft.process(&mut buffer);

        let magnitudes: Vec<f32> = buffer[..FFT_SIZE / 2].iter().map(|c| c.norm()).collect();

        let flux: f32 = magnitudes
            .iter()
            .zip(prev_magnitudes.iter())
            .map(|(cur, prev)| (cur - prev).max(0.0))
            .sum();

        let time = pos as f32 / sample_rate as f32;
        flux_values.push((time, flux));
        prev_magnitudes = magnitudes;
        pos += HOP_SIZE;
    }

    flux_values
}

/// Pick onset times from the flux curve: adaptive local-mean threshold,
/// local-peak test, minimum 100ms spacing.
fn detect_onsets(flux_values: &[(f32, f32)]) -> Vec<f32> {
    if flux_values.is_empty() {
        return Vec::new();
    }

    let window = 20; // ~200ms at this hop rate
    let mut onset_times = Vec::new();

    for i in 0..flux_values.len() {
        let start = i.saturating_sub(window);
        let end = (i + window + 1).min(flux_values.len());
        let local_mean: f32 = flux_values[start..end].iter().map(|(_, f)| f).sum::<f32>()
            / (end - start) as f32;

        let threshold = local_mean * 1.5 + 0.01;

        if flux_values[i].1 > threshold {
            let is_peak = (i == 0 || flux_values[i].1 >= flux_values[i - 1].1)
                && (i == flux_values.len() - 1 || flux_values[i].1 >= flux_values[i + 1].1);

            let far_enough = onset_times
                .last()
                .map_or(true, |&last: &f32| flux_values[i].0 - last > 0.1);

            if is_peak && far_enough {
                onset_times.push(flux_values[i].0);
            }
        }
    }

    onset_times
}

/// Median-interval tempo estimate. Returns 0.0 when no plausible pulse exists,
/// which downstream code reads as "leave the waveform alone".
fn estimate_tempo(onset_times: &[f32]) -> f32 {
    if onset_times.len() < 2 {
        return 0.0;
    }

    let intervals: Vec<f32> = onset_times.windows(2).map(|w| w[1] - w[0]).collect();

    // Keep intervals in the 60-200 BPM range (0.3-1.0s)
    let mut reasonable: Vec<f32> = intervals
        .iter()
        .copied()
        .filter(|&i| (0.3..=1.0).contains(&i))
        .collect();

    if reasonable.is_empty() {
        return 0.0;
    }

    reasonable.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median_interval = reasonable[reasonable.len() / 2];

    60.0 / median_interval
}

pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}
