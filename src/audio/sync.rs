use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::{PipelineError, Stage};

use super::analysis::analyze_rhythm;
use super::decode::decode_mono;
use super::stretch::time_stretch;
use super::wav;

const VOCALS_GAIN: f32 = 0.8;
const BEAT_GAIN: f32 = 0.6;

#[derive(Debug, Serialize)]
struct SyncMetadata {
    beat_tempo: f32,
    original_vocal_duration: f32,
    final_duration: f32,
    beat_url: String,
}

/// Align vocals to a downloaded beat and mix them.
///
/// Best-effort by contract: any failure inside (download, decode, analysis,
/// stretch) is logged and the untouched vocals path is returned, so the
/// pipeline always has a usable track.
pub fn synchronize(
    http: &reqwest::blocking::Client,
    vocals_path: &Path,
    beat_url: &str,
    out_dir: &Path,
) -> PathBuf {
    match sync_inner(http, vocals_path, beat_url, out_dir) {
        Ok(path) => path,
        Err(err) => {
            log::warn!("Beat sync failed, keeping raw vocals: {err:#}");
            vocals_path.to_path_buf()
        }
    }
}

fn sync_inner(
    http: &reqwest::blocking::Client,
    vocals_path: &Path,
    beat_url: &str,
    out_dir: &Path,
) -> Result<PathBuf> {
    let vocals = decode_mono(vocals_path)?;

    let beat_file = download_beat(http, beat_url)?;
    let beat = decode_mono(beat_file.path())?;

    // Everything downstream (stretch, grid alignment, the mix itself) runs
    // at the beat's rate, so the vocals are brought over to it first.
    let vocal_samples = if vocals.sample_rate == beat.sample_rate {
        vocals.samples.clone()
    } else {
        log::info!(
            "Resampling vocals {} Hz -> {} Hz to match beat",
            vocals.sample_rate,
            beat.sample_rate
        );
        resample(&vocals.samples, vocals.sample_rate, beat.sample_rate)
    };

    let beat_rhythm = analyze_rhythm(&beat.samples, beat.sample_rate);
    let vocal_rhythm = analyze_rhythm(&vocal_samples, beat.sample_rate);

    // Non-positive tempo on either side means no stretch ratio exists.
    let stretched = if vocal_rhythm.tempo_bpm > 0.0 && beat_rhythm.tempo_bpm > 0.0 {
        let ratio = vocal_rhythm.tempo_bpm / beat_rhythm.tempo_bpm;
        log::info!(
            "Stretching vocals: {:.1} -> {:.1} BPM (ratio {:.3})",
            vocal_rhythm.tempo_bpm,
            beat_rhythm.tempo_bpm,
            ratio
        );
        time_stretch(&vocal_samples, ratio)
    } else {
        log::info!("No usable tempo estimate, skipping time-stretch");
        vocal_samples
    };

    let aligned = align_to_grid(&stretched, beat.sample_rate, &beat_rhythm.onset_times);

    let mixed = mix(&aligned, &beat.samples, VOCALS_GAIN, BEAT_GAIN);

    let output_path = out_dir.join("synced_track.wav");
    wav::write_mono(&output_path, &mixed, beat.sample_rate)?;

    let metadata = SyncMetadata {
        beat_tempo: beat_rhythm.tempo_bpm,
        original_vocal_duration: vocals.duration_secs(),
        final_duration: mixed.len() as f32 / beat.sample_rate as f32,
        beat_url: beat_url.to_string(),
    };
    let metadata_path = out_dir.join("sync_metadata.json");
    std::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)
        .with_context(|| format!("Failed to write {}", metadata_path.display()))?;

    log::info!("Synced track written to {}", output_path.display());
    Ok(output_path)
}

/// Fetch the beat into a temp file that is removed on drop.
fn download_beat(http: &reqwest::blocking::Client, url: &str) -> Result<NamedTempFile> {
    let response = http.get(url).send().context("Beat download request failed")?;

    if !response.status().is_success() {
        return Err(PipelineError::Download {
            stage: Stage::BeatSync,
            url: url.to_string(),
            status: response.status().as_u16(),
        }
        .into());
    }

    let bytes = response.bytes().context("Failed to read beat payload")?;

    let suffix = Path::new(url)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_else(|| ".mp3".to_string());

    let mut file = tempfile::Builder::new()
        .prefix("dissforge_beat")
        .suffix(&suffix)
        .tempfile()
        .context("Failed to create temp file for beat")?;
    file.write_all(&bytes)?;
    file.flush()?;

    log::info!("Downloaded beat ({} bytes) from {}", bytes.len(), url);
    Ok(file)
}

/// Linear-interpolation resample. Adequate for speech over a beat; anything
/// fancier would need a polyphase filter and none of the rates involved here
/// are exotic.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if samples.is_empty() || from_rate == to_rate {
        return samples.to_vec();
    }

    let step = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as f64 / step).round() as usize;
    let last = samples.len() - 1;

    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * step;
        let idx = (pos as usize).min(last);
        let frac = (pos - idx as f64) as f32;
        let a = samples[idx];
        let b = samples[(idx + 1).min(last)];
        out.push(a + (b - a) * frac);
    }
    out
}

/// Shift the vocal buffer toward the nearest grid timestamp per detected
/// onset. Each onset shifts the whole remaining buffer into a shared output,
/// so in overlapping regions the last onset wins. Documented baseline
/// behavior, kept as-is pending a product decision.
fn align_to_grid(audio: &[f32], sample_rate: u32, grid_times: &[f32]) -> Vec<f32> {
    if grid_times.is_empty() {
        return audio.to_vec();
    }

    let onsets = analyze_rhythm(audio, sample_rate).onset_times;
    if onsets.is_empty() {
        return audio.to_vec();
    }

    let mut out = vec![0.0f32; audio.len()];

    for &onset in &onsets {
        let nearest = grid_times
            .iter()
            .copied()
            .min_by(|a, b| {
                (a - onset)
                    .abs()
                    .partial_cmp(&(b - onset).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap();
        let diff = nearest - onset;
        let shift = (diff.abs() * sample_rate as f32) as usize;

        if shift == 0 || shift >= audio.len() {
            out.copy_from_slice(audio);
            continue;
        }

        if diff > 0.0 {
            // Later: silence at the head
            out[..shift].fill(0.0);
            out[shift..].copy_from_slice(&audio[..audio.len() - shift]);
        } else {
            // Earlier: drop samples from the head
            out[..audio.len() - shift].copy_from_slice(&audio[shift..]);
            out[audio.len() - shift..].fill(0.0);
        }
    }

    out
}

/// Sum two gain-scaled waveforms, zero-padding the shorter, and normalize to
/// unit peak. An all-zero mix is returned unchanged.
fn mix(vocals: &[f32], beat: &[f32], vocals_gain: f32, beat_gain: f32) -> Vec<f32> {
    let len = vocals.len().max(beat.len());
    let mut mixed = vec![0.0f32; len];

    for (i, out) in mixed.iter_mut().enumerate() {
        let v = vocals.get(i).copied().unwrap_or(0.0);
        let b = beat.get(i).copied().unwrap_or(0.0);
        *out = v * vocals_gain + b * beat_gain;
    }

    let peak = mixed.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
    if peak > 0.0 {
        for s in &mut mixed {
            *s /= peak;
        }
    }

    mixed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix_never_exceeds_unit_peak() {
        let w: Vec<f32> = (0..4096)
            .map(|i| (i as f32 * 0.01).sin() * 0.9)
            .collect();
        let mixed = mix(&w, &w, VOCALS_GAIN, BEAT_GAIN);
        let peak = mixed.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        assert!(peak <= 1.0 + f32::EPSILON);
    }

    #[test]
    fn mix_pads_shorter_input_to_longer() {
        let vocals = vec![0.5f32; 1000];
        let beat = vec![0.25f32; 3000];
        let mixed = mix(&vocals, &beat, VOCALS_GAIN, BEAT_GAIN);
        assert_eq!(mixed.len(), 3000);
    }

    #[test]
    fn silent_mix_stays_silent() {
        let mixed = mix(&vec![0.0f32; 500], &vec![0.0f32; 500], VOCALS_GAIN, BEAT_GAIN);
        assert!(mixed.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn silent_vocals_align_without_panicking() {
        let vocals = vec![0.0f32; 1000];
        let grid = [0.0f32, 0.5, 1.0];
        let aligned = align_to_grid(&vocals, 44100, &grid);
        assert_eq!(aligned.len(), vocals.len());
    }

    #[test]
    fn empty_grid_passes_audio_through() {
        let audio: Vec<f32> = (0..2048).map(|i| (i as f32 * 0.1).sin()).collect();
        assert_eq!(align_to_grid(&audio, 44100, &[]), audio);
    }

    #[test]
    fn resample_doubles_length_upward_and_halves_downward() {
        let input: Vec<f32> = (0..22050)
            .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 22050.0).sin())
            .collect();

        let up = resample(&input, 22050, 44100);
        assert!(((up.len() as i64 - 44100).unsigned_abs() as usize) < 4);

        let down = resample(&input, 22050, 11025);
        assert!(((down.len() as i64 - 11025).unsigned_abs() as usize) < 4);
    }

    #[test]
    fn resample_preserves_tone_frequency() {
        // A 441 Hz tone has 441 cycles per second at any rate; counting
        // upward zero crossings catches pitch errors from bad rate math.
        let sr_in = 22050;
        let input: Vec<f32> = (0..sr_in)
            .map(|i| (2.0 * std::f32::consts::PI * 441.0 * i as f32 / sr_in as f32).sin())
            .collect();
        let output = resample(&input, sr_in as u32, 44100);

        let crossings = output
            .windows(2)
            .filter(|w| w[0] <= 0.0 && w[1] > 0.0)
            .count();
        assert!(((crossings as i64 - 441).unsigned_abs() as usize) < 5);
    }

    #[test]
    fn mismatched_beat_rate_yields_sane_duration() {
        use std::io::{Read as _, Write as _};

        // One second of beat at 22.05 kHz against one second of vocals at
        // 44.1 kHz must still come out around one second, not two.
        let dir = tempfile::tempdir().unwrap();

        let beat_rate = 22050u32;
        let beat: Vec<f32> = (0..beat_rate)
            .map(|i| (2.0 * std::f32::consts::PI * 110.0 * i as f32 / beat_rate as f32).sin() * 0.5)
            .collect();
        let beat_path = dir.path().join("beat.wav");
        wav::write_mono(&beat_path, &beat, beat_rate).unwrap();
        let beat_bytes = std::fs::read(&beat_path).unwrap();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: audio/wav\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                beat_bytes.len()
            );
            let _ = stream.write_all(header.as_bytes());
            let _ = stream.write_all(&beat_bytes);
        });

        let vocals: Vec<f32> = (0..44100)
            .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 44100.0).sin() * 0.5)
            .collect();
        let vocals_path = dir.path().join("vocals.wav");
        wav::write_mono(&vocals_path, &vocals, 44100).unwrap();

        let http = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap();

        let beat_url = format!("http://{addr}/beat.wav");
        let result = synchronize(&http, &vocals_path, &beat_url, dir.path());
        server.join().unwrap();

        assert_ne!(result, vocals_path, "sync fell back to raw vocals");
        let synced = decode_mono(&result).unwrap();
        assert_eq!(synced.sample_rate, beat_rate);
        let duration = synced.duration_secs();
        assert!(
            (0.9..=1.2).contains(&duration),
            "synced duration {duration} s, expected about one second"
        );
    }

    #[test]
    fn non_success_status_returns_original_vocals_path() {
        use std::io::{Read as _, Write as _};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            let _ = stream.write_all(
                b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
        });

        let dir = tempfile::tempdir().unwrap();
        let vocals_path = dir.path().join("vocals.wav");
        wav::write_mono(&vocals_path, &vec![0.1f32; 4410], 44100).unwrap();

        let http = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap();

        let beat_url = format!("http://{addr}/beat.mp3");
        let result = synchronize(&http, &vocals_path, &beat_url, dir.path());
        assert_eq!(result, vocals_path);
        server.join().unwrap();
    }

    #[test]
    fn failed_download_returns_original_vocals_path() {
        let dir = tempfile::tempdir().unwrap();
        let vocals_path = dir.path().join("vocals.wav");
        wav::write_mono(&vocals_path, &vec![0.1f32; 4410], 44100).unwrap();

        let http = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(2))
            .build()
            .unwrap();

        // Nothing listens on the discard port: the download fails and the
        // synchronizer must fall back to the untouched vocals.
        let result = synchronize(
            &http,
            &vocals_path,
            "http://127.0.0.1:9/no_such_beat.mp3",
            dir.path(),
        );
        assert_eq!(result, vocals_path);
    }
}
