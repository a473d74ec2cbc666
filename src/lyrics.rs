use serde::{Deserialize, Serialize};

use crate::llm::ChatClient;
use crate::themes::ThemesRecord;

const SYSTEM_PROMPT: &str =
    "You are a skilled battle rapper who excels at writing diss tracks.";

/// Four-section track structure. Sections may be empty when the model
/// returned fewer blocks than expected or the call failed entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lyrics {
    pub verse1: String,
    pub chorus: String,
    pub verse2: String,
    pub outro: String,
}

impl Lyrics {
    pub fn sections(&self) -> [(&'static str, &str); 4] {
        [
            ("verse1", self.verse1.as_str()),
            ("chorus", self.chorus.as_str()),
            ("verse2", self.verse2.as_str()),
            ("outro", self.outro.as_str()),
        ]
    }
}

/// Generate structured lyrics from the extracted themes.
///
/// The model is an external collaborator: on failure the result is an empty
/// structure and the pipeline continues with degraded content.
pub fn generate_lyrics(chat: &ChatClient<'_>, themes: &ThemesRecord, style: &str) -> Lyrics {
    let prompt = build_prompt(themes, style);

    match chat.complete(SYSTEM_PROMPT, &prompt, 0.8, 1000) {
        Ok(raw) => structure_lyrics(&raw),
        Err(err) => {
            log::warn!("Lyrics generation failed, continuing with empty lyrics: {err:#}");
            Lyrics::default()
        }
    }
}

fn build_prompt(themes: &ThemesRecord, style: &str) -> String {
    let main_themes: Vec<&str> = themes
        .main_themes
        .iter()
        .map(|t| t.theme.as_str())
        .collect();

    format!(
        "Generate a {} diss track targeting {} from r/{}.\n\
         Main themes to focus on: {}\n\
         \n\
         The track should:\n\
         1. Include clever wordplay and metaphors\n\
         2. Reference the target's background and context\n\
         3. Have a clear flow and rhythm\n\
         4. Include punchlines that hit hard\n\
         5. Maintain a consistent theme throughout\n\
         \n\
         Structure:\n\
         - 16 bars for verse 1\n\
         - 8 bars for hook/chorus\n\
         - 16 bars for verse 2\n\
         - 8 bars for hook/chorus (repeat)\n\
         - 8 bars for outro\n\
         \n\
         Each bar should have internal rhyme schemes and follow proper rap cadence.",
        style.to_lowercase(),
        themes.target,
        themes.context,
        main_themes.join(", "),
    )
}

/// Split the raw completion on blank lines into the four sections; missing
/// trailing sections stay empty, and the outro takes the last block when
/// more than three blocks exist.
fn structure_lyrics(raw: &str) -> Lyrics {
    let sections: Vec<&str> = raw
        .split("\n\n")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    Lyrics {
        verse1: sections.first().copied().unwrap_or_default().to_string(),
        chorus: sections.get(1).copied().unwrap_or_default().to_string(),
        verse2: sections.get(2).copied().unwrap_or_default().to_string(),
        outro: if sections.len() > 3 {
            sections.last().copied().unwrap_or_default().to_string()
        } else {
            String::new()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::themes::ThemeScore;

    #[test]
    fn structure_lyrics_maps_blocks_to_sections() {
        let raw = "verse one lines\n\nchorus lines\n\nverse two lines\n\nbridge\n\noutro lines";
        let lyrics = structure_lyrics(raw);
        assert_eq!(lyrics.verse1, "verse one lines");
        assert_eq!(lyrics.chorus, "chorus lines");
        assert_eq!(lyrics.verse2, "verse two lines");
        assert_eq!(lyrics.outro, "outro lines");
    }

    #[test]
    fn structure_lyrics_tolerates_short_output() {
        let lyrics = structure_lyrics("only a verse");
        assert_eq!(lyrics.verse1, "only a verse");
        assert!(lyrics.chorus.is_empty());
        assert!(lyrics.outro.is_empty());
    }

    #[test]
    fn structure_lyrics_of_empty_output_is_empty() {
        let lyrics = structure_lyrics("");
        assert!(lyrics.sections().iter().all(|(_, s)| s.is_empty()));
    }

    #[test]
    fn prompt_names_target_style_and_themes() {
        let themes = ThemesRecord {
            main_themes: vec![
                ThemeScore {
                    theme: "wealth/money".into(),
                    confidence: 0.8,
                },
                ThemeScore {
                    theme: "skills/talent".into(),
                    confidence: 0.5,
                },
            ],
            comment_themes: Vec::new(),
            target: "some_user".into(),
            context: "some_sub".into(),
        };

        let prompt = build_prompt(&themes, "Aggressive");
        assert!(prompt.contains("aggressive diss track"));
        assert!(prompt.contains("some_user"));
        assert!(prompt.contains("r/some_sub"));
        assert!(prompt.contains("wealth/money, skills/talent"));
    }
}
