use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::error::{PipelineError, Stage, WithStage};
use crate::llm::ChatClient;
use crate::lyrics::Lyrics;
use crate::tts::VoiceSettings;
use crate::{audio, flow, lyrics, sanitize, scrape, themes, tts};

/// Everything one pipeline run needs, constructed once in `main` and passed
/// down. Explicit by design: no process-wide singletons, and every artifact
/// path carries the run id so concurrent runs cannot clobber each other.
pub struct RunContext {
    pub http: reqwest::blocking::Client,
    pub config: Config,
    pub voice: VoiceSettings,
    pub run_id: String,
    run_dir: PathBuf,
}

pub struct RunOutput {
    pub refined_lyrics: Lyrics,
    pub final_track: PathBuf,
    pub run_dir: PathBuf,
}

impl RunContext {
    pub fn new(
        config: Config,
        voice: VoiceSettings,
        output_root: &Path,
        run_id: String,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let run_dir = output_root.join(&run_id);
        std::fs::create_dir_all(&run_dir)
            .with_context(|| format!("Failed to create run dir {}", run_dir.display()))?;

        Ok(Self {
            http,
            config,
            voice,
            run_id,
            run_dir,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    fn audio_dir(&self) -> Result<PathBuf> {
        let dir = self.run_dir.join("audio");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(dir)
    }

    /// Write-once JSON artifact under the run directory.
    fn write_artifact<T: Serialize>(&self, subdir: &str, name: &str, value: &T) -> Result<PathBuf> {
        let dir = self.run_dir.join(subdir);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_string_pretty(value)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

/// Generate a fresh run id from the wall clock.
pub fn generate_run_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("run-{millis}")
}

/// The eight-stage pipeline, strictly linear. Stages 1-6 propagate tagged
/// errors; beat sync and mastering degrade to pass-through instead.
pub fn run(
    ctx: &RunContext,
    url: &str,
    style: &str,
    beat_url: Option<&str>,
    flow_complexity: u8,
) -> Result<RunOutput, PipelineError> {
    // 1. Fetch content
    log::info!("[1/8] Scraping post");
    let post = scrape::fetch_post(&ctx.http, url, &ctx.config.reddit.user_agent)
        .with_stage(Stage::Scrape)?;
    let safe_author = sanitize::safe_filename(&post.author);
    ctx.write_artifact("raw", &format!("post_{safe_author}.json"), &post)
        .with_stage(Stage::Scrape)?;

    // 2. Sanitize
    log::info!("[2/8] Cleaning text");
    let cleaned = sanitize::clean_record(&post);
    ctx.write_artifact("processed", &format!("cleaned_{safe_author}.json"), &cleaned)
        .with_stage(Stage::Sanitize)?;

    // 3. Extract themes (degrades to empty lists on classifier failure)
    log::info!("[3/8] Extracting themes");
    let themes = themes::extract_themes(&ctx.http, &ctx.config.classifier.endpoint, &cleaned);
    ctx.write_artifact("themes", &format!("themes_{safe_author}.json"), &themes)
        .with_stage(Stage::Themes)?;

    // 4. Generate lyrics (degrades to empty sections on model failure)
    log::info!("[4/8] Generating lyrics");
    let chat = ChatClient::new(&ctx.http, &ctx.config.llm.endpoint, &ctx.config.llm.model);
    let raw_lyrics = lyrics::generate_lyrics(&chat, &themes, style);
    ctx.write_artifact("lyrics", &format!("lyrics_{safe_author}.json"), &raw_lyrics)
        .with_stage(Stage::Lyrics)?;

    // 5. Refine flow (failed sections stay as generated)
    log::info!("[5/8] Refining flow");
    let refined = flow::refine_flow(&chat, &raw_lyrics, flow_complexity);
    ctx.write_artifact("refined", "refined_lyrics.json", &refined)
        .with_stage(Stage::Flow)?;

    // 6. Synthesize speech
    log::info!("[6/8] Synthesizing vocals");
    let audio_dir = ctx.audio_dir().with_stage(Stage::Tts)?;
    let vocals = tts::synthesize_vocals(&refined, &ctx.voice, &audio_dir).with_stage(Stage::Tts)?;

    // 7. Sync to beat (best-effort; falls back to raw vocals)
    let synced = match beat_url {
        Some(beat_url) => {
            log::info!("[7/8] Syncing to beat");
            audio::sync::synchronize(&ctx.http, &vocals.audio_path, beat_url, &audio_dir)
        }
        None => {
            log::info!("[7/8] No beat source, skipping sync");
            vocals.audio_path.clone()
        }
    };

    // 8. Master (best-effort; falls back to the synced mix)
    log::info!("[8/8] Mastering");
    let mastered_dir = audio_dir.join("mastered");
    let final_track = audio::master::master(&synced, &mastered_dir);

    Ok(RunOutput {
        refined_lyrics: refined,
        final_track,
        run_dir: ctx.run_dir.clone(),
    })
}
