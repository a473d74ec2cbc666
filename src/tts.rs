use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::audio::decode::decode_mono;
use crate::audio::wav;
use crate::lyrics::Lyrics;

const SAMPLE_RATE: u32 = 44100;
const SECTION_PAUSE_SECS: f32 = 0.3;

/// Light compression applied during transcode, before any mastering.
const VOICE_FILTER: &str = "acompressor=threshold=-12dB:ratio=3:attack=0.1:release=0.2";

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

/// Which OS voice synthesizer to shell out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceEngine {
    /// macOS `say`
    Say,
    /// espeak / espeak-ng
    Espeak,
}

impl VoiceEngine {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "say" => Ok(Self::Say),
            "espeak" => Ok(Self::Espeak),
            other => bail!("Unknown TTS engine '{other}' (expected 'say' or 'espeak')"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VoiceSettings {
    pub engine: VoiceEngine,
    pub voice: String,
    pub rate_wpm: u32,
}

#[derive(Debug, Serialize)]
struct VocalsMetadata {
    sample_rate: u32,
    duration: f32,
    sections: Vec<String>,
}

pub struct VocalsOutput {
    pub audio_path: PathBuf,
}

/// Synthesize each non-empty lyric section, separated by short pauses, into
/// one mono vocal track. Fatal on failure; upstream has nothing to fall
/// back to without vocals. Scratch files live in temp dirs removed on drop.
pub fn synthesize_vocals(
    lyrics: &Lyrics,
    settings: &VoiceSettings,
    out_dir: &Path,
) -> Result<VocalsOutput> {
    let scratch = tempfile::tempdir().context("Failed to create TTS scratch dir")?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sections: Vec<String> = Vec::new();
    let pause = vec![0.0f32; (SAMPLE_RATE as f32 * SECTION_PAUSE_SECS) as usize];

    for (name, content) in lyrics.sections() {
        if content.is_empty() {
            continue;
        }

        log::info!("Synthesizing section: {name}");
        let spoken = clean_content(content);
        let section_wav = scratch.path().join(format!("{name}.wav"));
        synthesize_section(&spoken, settings, scratch.path(), &section_wav)?;

        let section = decode_mono(&section_wav)?;
        samples.extend(normalized(&section.samples));
        samples.extend_from_slice(&pause);
        sections.push(name.to_string());
    }

    if samples.is_empty() {
        bail!("No lyric sections to synthesize");
    }

    let audio_path = out_dir.join("raw_vocals.wav");
    wav::write_mono(&audio_path, &samples, SAMPLE_RATE)?;

    let metadata = VocalsMetadata {
        sample_rate: SAMPLE_RATE,
        duration: samples.len() as f32 / SAMPLE_RATE as f32,
        sections,
    };
    let metadata_path = out_dir.join("vocals_metadata.json");
    std::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)
        .with_context(|| format!("Failed to write {}", metadata_path.display()))?;

    log::info!(
        "Vocals written to {} ({:.1}s)",
        audio_path.display(),
        metadata.duration
    );
    Ok(VocalsOutput { audio_path })
}

/// Run the voice binary, then transcode through ffmpeg to 44.1kHz mono with
/// the voice compressor filter.
fn synthesize_section(
    text: &str,
    settings: &VoiceSettings,
    scratch: &Path,
    out_wav: &Path,
) -> Result<()> {
    let raw_path = match settings.engine {
        VoiceEngine::Say => {
            let raw = scratch.join("raw.aiff");
            run_checked(
                Command::new("say")
                    .args(["-v", &settings.voice])
                    .args(["-r", &settings.rate_wpm.to_string()])
                    .args(["-o"])
                    .arg(&raw)
                    .arg(text),
                "say",
            )?;
            raw
        }
        VoiceEngine::Espeak => {
            let raw = scratch.join("raw.wav");
            run_checked(
                Command::new("espeak")
                    .args(["-v", &settings.voice])
                    .args(["-s", &settings.rate_wpm.to_string()])
                    .arg("-w")
                    .arg(&raw)
                    .arg(text),
                "espeak",
            )?;
            raw
        }
    };

    run_checked(
        Command::new("ffmpeg")
            .arg("-i")
            .arg(&raw_path)
            .args(["-af", VOICE_FILTER])
            .args(["-ar", &SAMPLE_RATE.to_string()])
            .args(["-ac", "1"])
            .arg("-y")
            .arg(out_wav),
        "ffmpeg",
    )
}

fn run_checked(command: &mut Command, name: &str) -> Result<()> {
    let output = command
        .output()
        .with_context(|| format!("Failed to spawn {name}. Is it installed?"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{name} exited with {}:\n{stderr}", output.status);
    }
    Ok(())
}

/// Strip any markup the refiner let through, normalize whitespace, and make
/// sure the section ends on a pause-inducing punctuation mark.
fn clean_content(content: &str) -> String {
    let without_tags = TAG_RE.replace_all(content, "");
    let mut clean: String = without_tags.split_whitespace().collect::<Vec<_>>().join(" ");

    if !clean.ends_with(['.', '!', '?']) {
        clean.push('.');
    }
    clean
}

fn normalized(samples: &[f32]) -> Vec<f32> {
    let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
    if peak > 0.0 {
        samples.iter().map(|s| s / peak).collect()
    } else {
        samples.to_vec()
    }
}
