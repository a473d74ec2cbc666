use rustfft::{num_complex::Complex, FftPlanner};

use super::analysis::hann_window;

const FFT_SIZE: usize = 2048;
const HOP_SIZE: usize = FFT_SIZE / 4;

/// Phase-vocoder time stretch. `ratio` > 1.0 shortens (speeds up), < 1.0
/// lengthens; pitch is preserved. Output duration is roughly input / ratio.
///
/// Inputs too short for one analysis frame, and non-positive or non-finite
/// ratios, pass through unchanged.
pub fn time_stretch(input: &[f32], ratio: f32) -> Vec<f32> {
    if !ratio.is_finite() || ratio <= 0.0 || input.len() < FFT_SIZE + HOP_SIZE {
        return input.to_vec();
    }

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(FFT_SIZE);
    let ifft = planner.plan_fft_inverse(FFT_SIZE);
    let window = hann_window(FFT_SIZE);

    // Analysis STFT at a fixed hop
    let mut frames: Vec<Vec<Complex<f32>>> = Vec::new();
    let mut pos = 0;
    while pos + FFT_SIZE <= input.len() {
        let mut buf: Vec<Complex<f32>> = input[pos..pos + FFT_SIZE]
            .iter()
            .enumerate()
            .map(|(i, &s)| Complex::new(s * window[i], 0.0))
            .collect();
        fft.process(&mut buf);
        frames.push(buf);
        pos += HOP_SIZE;
    }

    if frames.len() < 2 {
        return input.to_vec();
    }

    // Expected per-hop phase advance for each bin, pre-wrapped so the
    // accumulator below only ever handles values in (-pi, pi]
    let omega: Vec<f32> = (0..FFT_SIZE)
        .map(|k| {
            wrap_phase(2.0 * std::f32::consts::PI * k as f32 * HOP_SIZE as f32 / FFT_SIZE as f32)
        })
        .collect();

    let mut phase_acc: Vec<f32> = frames[0].iter().map(|c| c.arg()).collect();

    let n_out_frames = ((frames.len() - 1) as f32 / ratio).ceil() as usize;
    let out_len = (n_out_frames.saturating_sub(1)) * HOP_SIZE + FFT_SIZE;
    let mut output = vec![0.0f32; out_len];
    let mut window_sum = vec![0.0f32; out_len];

    let mut spectrum = vec![Complex::new(0.0f32, 0.0f32); FFT_SIZE];

    for out_idx in 0..n_out_frames {
        let t = out_idx as f32 * ratio;
        let i0 = (t.floor() as usize).min(frames.len() - 2);
        let frac = t - i0 as f32;

        // Interpolated magnitude, accumulated phase
        for k in 0..FFT_SIZE {
            let mag = (1.0 - frac) * frames[i0][k].norm() + frac * frames[i0 + 1][k].norm();
            spectrum[k] = Complex::from_polar(mag, phase_acc[k]);
        }

        // Advance phase by the measured (wrapped) instantaneous frequency.
        // The accumulator is re-wrapped every hop; letting it grow without
        // bound loses f32 precision and audibly corrupts long inputs.
        for k in 0..FFT_SIZE {
            let delta = frames[i0 + 1][k].arg() - frames[i0][k].arg() - omega[k];
            phase_acc[k] = wrap_phase(phase_acc[k] + omega[k] + wrap_phase(delta));
        }

        let mut frame = spectrum.clone();
        ifft.process(&mut frame);

        let offset = out_idx * HOP_SIZE;
        for i in 0..FFT_SIZE {
            // rustfft inverse is unnormalized
            let sample = frame[i].re / FFT_SIZE as f32;
            output[offset + i] += sample * window[i];
            window_sum[offset + i] += window[i] * window[i];
        }
    }

    for (s, w) in output.iter_mut().zip(window_sum.iter()) {
        if *w > 1e-6 {
            *s /= *w;
        }
    }

    output
}

/// Wrap a phase difference into (-pi, pi].
fn wrap_phase(phase: f32) -> f32 {
    use std::f32::consts::PI;
    let mut p = phase % (2.0 * PI);
    if p > PI {
        p -= 2.0 * PI;
    } else if p <= -PI {
        p += 2.0 * PI;
    }
    p
}
