use std::fmt;

use thiserror::Error;

/// Pipeline stages, in execution order. Attached to errors at the point of
/// failure so callers never have to infer the failing step from message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Scrape,
    Sanitize,
    Themes,
    Lyrics,
    Flow,
    Tts,
    BeatSync,
    Master,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Scrape => "scrape",
            Stage::Sanitize => "sanitize",
            Stage::Themes => "themes",
            Stage::Lyrics => "lyrics",
            Stage::Flow => "flow",
            Stage::Tts => "tts",
            Stage::BeatSync => "beat-sync",
            Stage::Master => "master",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("[{stage}] download of {url} failed with status {status}")]
    Download {
        stage: Stage,
        url: String,
        status: u16,
    },

    #[error("[scrape] no reddit user agent configured (set [reddit].user_agent or --user-agent)")]
    MissingCredentials,

    #[error("[{stage}] {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
}

/// Extension for tagging an `anyhow::Result` with the stage it failed in.
pub trait WithStage<T> {
    fn with_stage(self, stage: Stage) -> Result<T, PipelineError>;
}

impl<T> WithStage<T> for anyhow::Result<T> {
    fn with_stage(self, stage: Stage) -> Result<T, PipelineError> {
        self.map_err(|source| PipelineError::Stage { stage, source })
    }
}
