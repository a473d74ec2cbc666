mod audio;
mod cli;
mod config;
mod error;
mod flow;
mod llm;
mod lyrics;
mod pipeline;
mod sanitize;
mod scrape;
mod themes;
mod tts;

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;

use cli::Cli;
use pipeline::RunContext;
use tts::{VoiceEngine, VoiceSettings};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect dissforge.toml / global config
    let config_path = cli.config.clone().or_else(|| {
        let local = std::path::PathBuf::from("dissforge.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(home) = dirs::home_dir() {
            let xdg = home.join(".config").join("dissforge").join("config.toml");
            if xdg.exists() {
                return Some(xdg);
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("dissforge").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    });

    let mut config = config::Config::default();
    if let Some(ref path) = config_path {
        if let Some(cfg) = config::load_config(path) {
            log::info!("Loaded config from {}", path.display());
            config = cfg;
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }

    // CLI overrides win over config values
    if let Some(user_agent) = cli.user_agent {
        config.reddit.user_agent = user_agent;
    }
    if let Some(endpoint) = cli.llm_endpoint {
        config.llm.endpoint = endpoint;
    }
    if let Some(model) = cli.llm_model {
        config.llm.model = model;
    }
    if let Some(endpoint) = cli.classifier_endpoint {
        config.classifier.endpoint = endpoint;
    }
    if let Some(engine) = cli.tts_engine {
        config.tts.engine = engine;
    }
    if let Some(voice) = cli.voice {
        config.tts.voice = voice;
    }
    if let Some(rate) = cli.rate_wpm {
        config.tts.rate_wpm = rate;
    }

    let url = cli.url.context("A Reddit post URL is required")?;

    let voice = VoiceSettings {
        engine: VoiceEngine::parse(&config.tts.engine)?,
        voice: config.tts.voice.clone(),
        rate_wpm: config.tts.rate_wpm,
    };

    let run_id = cli.run_id.unwrap_or_else(pipeline::generate_run_id);

    log::info!("dissforge - diss track pipeline");
    log::info!("Post: {url}");
    log::info!("Style: {}", cli.style);
    log::info!("Run id: {run_id}");
    match cli.beat_url {
        Some(ref beat) => log::info!("Beat: {beat}"),
        None => log::info!("Beat: none (sync will be skipped)"),
    }

    let ctx = RunContext::new(
        config,
        voice,
        &cli.output_dir,
        run_id,
        Duration::from_secs(cli.timeout_secs),
    )?;

    let output = pipeline::run(
        &ctx,
        &url,
        &cli.style,
        cli.beat_url.as_deref(),
        cli.flow_complexity,
    )?;

    log::info!("Done! Final track: {}", output.final_track.display());
    log::info!("Artifacts under: {}", output.run_dir.display());

    println!("{}", output.final_track.display());
    for (name, content) in output.refined_lyrics.sections() {
        if !content.is_empty() {
            println!("\n[{name}]\n{content}");
        }
    }

    Ok(())
}
