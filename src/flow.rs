use once_cell::sync::Lazy;
use regex::Regex;

use crate::llm::ChatClient;
use crate::lyrics::Lyrics;

const SYSTEM_PROMPT: &str = "You are a master battle rapper focused on improving flow and \
     punchlines while maintaining the original message. Output only the enhanced lyrics \
     without any tags, directions, or explanations.";

/// Lines opening with these words are model chatter, not lyrics.
const DIRECTION_PREFIXES: [&str; 9] = [
    "here", "enhanced", "original", "verse", "chorus", "improved", "note", "adding", "sure",
];

static MARKDOWN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[*_~`]").expect("valid regex"));
static SQUARE_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[.*?\]").expect("valid regex"));
static ANGLE_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<.*?>").expect("valid regex"));
static PAREN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^)]*\)").expect("valid regex"));

/// Rewrite each section for tighter internal rhyme and harder punchlines.
/// A failed call leaves that section unchanged.
pub fn refine_flow(chat: &ChatClient<'_>, lyrics: &Lyrics, flow_complexity: u8) -> Lyrics {
    Lyrics {
        verse1: enhance_section(chat, &lyrics.verse1, "verse1", flow_complexity),
        chorus: enhance_section(chat, &lyrics.chorus, "chorus", flow_complexity),
        verse2: enhance_section(chat, &lyrics.verse2, "verse2", flow_complexity),
        outro: enhance_section(chat, &lyrics.outro, "outro", flow_complexity),
    }
}

fn enhance_section(
    chat: &ChatClient<'_>,
    content: &str,
    section: &str,
    flow_complexity: u8,
) -> String {
    if content.is_empty() {
        return String::new();
    }

    let prompt = build_prompt(content, section, flow_complexity);

    match chat.complete(SYSTEM_PROMPT, &prompt, 0.7, 500) {
        Ok(response) => clean_response(&response),
        Err(err) => {
            log::warn!("Flow refinement of {section} failed, keeping original: {err:#}");
            content.to_string()
        }
    }
}

fn build_prompt(content: &str, section: &str, flow_complexity: u8) -> String {
    format!(
        "Enhance the following {section} while maintaining its core message and theme.\n\
         Flow complexity: {flow_complexity}/10.\n\
         Focus on:\n\
         1. Tightening internal rhyme schemes\n\
         2. Adding clever wordplay and double entendres\n\
         3. Strengthening punchlines\n\
         4. Improving flow and rhythm\n\
         5. Maintaining consistent syllable patterns\n\
         \n\
         Original content:\n\
         {content}\n\
         \n\
         Provide ONLY the enhanced lyrics without any tags, directions, or explanations. \
         Do not include any [pause], [emph], [speed], or other markers. \
         Do not include any explanations of changes made."
    )
}

/// Strip model chatter: direction lines, markdown, bracketed stage tags and
/// parenthetical directions.
fn clean_response(response: &str) -> String {
    let filtered: Vec<&str> = response
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            let lower = line.to_lowercase();
            !DIRECTION_PREFIXES.iter().any(|p| lower.starts_with(p))
        })
        .collect();

    let cleaned = filtered.join("\n");
    let cleaned = MARKDOWN_RE.replace_all(&cleaned, "");
    let cleaned = SQUARE_TAG_RE.replace_all(&cleaned, "");
    let cleaned = ANGLE_TAG_RE.replace_all(&cleaned, "");
    let cleaned = PAREN_RE.replace_all(&cleaned, "");

    cleaned
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_response_drops_direction_lines() {
        let response = "Here is the enhanced verse:\nbars that actually rhyme\nmore hard bars";
        assert_eq!(clean_response(response), "bars that actually rhyme\nmore hard bars");
    }

    #[test]
    fn clean_response_strips_tags_and_markdown() {
        let response = "spit **fire** [pause] every time\nno cap <emph>frfr</emph> (whisper this)";
        assert_eq!(clean_response(response), "spit fire  every time\nno cap frfr");
    }

    #[test]
    fn clean_response_of_pure_chatter_is_empty() {
        let response = "Here you go!\nNote: I tightened the rhymes.";
        assert_eq!(clean_response(response), "");
    }
}
