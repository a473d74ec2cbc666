use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dissforge", about = "Turn a Reddit post into a mastered diss track")]
pub struct Cli {
    /// Reddit post URL
    pub url: Option<String>,

    /// Diss track style (e.g. Aggressive, Playful, Sarcastic)
    #[arg(short, long, default_value = "Aggressive")]
    pub style: String,

    /// URL to a beat file; when omitted the beat-sync stage is skipped
    #[arg(short, long)]
    pub beat_url: Option<String>,

    /// Flow complexity passed to the refiner (1-10)
    #[arg(long, default_value_t = 5)]
    pub flow_complexity: u8,

    /// Root directory for run artifacts
    #[arg(short, long, default_value = "data")]
    pub output_dir: PathBuf,

    /// Run identifier woven into artifact paths (generated when omitted)
    #[arg(long)]
    pub run_id: Option<String>,

    /// User agent sent to Reddit
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Chat-completions endpoint for lyric generation
    #[arg(long)]
    pub llm_endpoint: Option<String>,

    /// Model name for lyric generation
    #[arg(long)]
    pub llm_model: Option<String>,

    /// Zero-shot classification endpoint for theme extraction
    #[arg(long)]
    pub classifier_endpoint: Option<String>,

    /// TTS engine: say or espeak
    #[arg(long)]
    pub tts_engine: Option<String>,

    /// TTS voice name
    #[arg(long)]
    pub voice: Option<String>,

    /// Speech rate in words per minute
    #[arg(long)]
    pub rate_wpm: Option<u32>,

    /// Per-request network timeout in seconds
    #[arg(long, default_value_t = 120)]
    pub timeout_secs: u64,

    /// Config file path (default: dissforge.toml, then the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
