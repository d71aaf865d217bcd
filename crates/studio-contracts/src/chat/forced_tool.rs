//! Keyword heuristic for models that describe a generation instead of
//! calling the tool.
//!
//! When the first assistant turn carries no tool call but the user plainly
//! asked for media ("make a video of ..."), the tool loop synthesizes the
//! call itself. This is best-effort keyword matching and will produce false
//! positives ("can you make sense of this image?") and false negatives
//! (non-English requests). Keep it isolated and switchable.

use super::tools::ToolKind;

const REQUEST_VERBS: &[&str] = &[
    "generate", "create", "make", "draw", "render", "produce", "paint", "design", "compose",
    "animate", "narrate", "say", "speak", "read",
];

const IMAGE_WORDS: &[&str] = &[
    "image", "images", "picture", "pictures", "photo", "photos", "illustration", "drawing",
    "painting", "artwork", "wallpaper", "logo", "portrait",
];

const VIDEO_WORDS: &[&str] = &[
    "video", "videos", "clip", "animation", "movie", "footage", "film",
];

const AUDIO_WORDS: &[&str] = &[
    "audio", "voice", "speech", "narration", "voiceover", "tts", "recording", "aloud",
];

const FILLER_WORDS: &[&str] = &[
    "please", "can", "could", "would", "you", "me", "us", "a", "an", "the", "some", "of",
    "for", "showing", "that", "shows", "with", "i", "want", "need", "short", "quick",
];

const MAX_PROMPT_CHARS: usize = 500;

fn words(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Returns the tool an explicit user request asks for, if any. The modality
/// whose keyword appears first wins ("an image of a video game" is an image).
pub fn detect_generation_request(user_text: &str) -> Option<ToolKind> {
    let words = words(user_text);
    if !words.iter().any(|word| REQUEST_VERBS.contains(&word.as_str())) {
        return None;
    }
    words.iter().find_map(|word| {
        let word = word.as_str();
        if IMAGE_WORDS.contains(&word) {
            Some(ToolKind::GenerateImage)
        } else if VIDEO_WORDS.contains(&word) {
            Some(ToolKind::GenerateVideo)
        } else if AUDIO_WORDS.contains(&word) {
            Some(ToolKind::GenerateAudio)
        } else {
            None
        }
    })
}

/// Picks a prompt for the synthesized call: a quoted passage from the
/// assistant draft, then a `Prompt:` line, then the user's request with the
/// request phrasing stripped.
pub fn extract_prompt(assistant_draft: &str, user_text: &str) -> String {
    if let Some(quoted) = quoted_passage(assistant_draft) {
        return clamp(quoted);
    }
    if let Some(line) = assistant_draft.lines().find_map(prompt_line) {
        return clamp(line);
    }
    let stripped = strip_request_phrasing(user_text);
    if stripped.is_empty() {
        clamp(user_text.trim())
    } else {
        clamp(&stripped)
    }
}

fn quoted_passage(text: &str) -> Option<&str> {
    for (open, close) in [('"', '"'), ('\u{201c}', '\u{201d}')] {
        let Some(start) = text.find(open) else {
            continue;
        };
        let rest = &text[start + open.len_utf8()..];
        let Some(end) = rest.find(close) else {
            continue;
        };
        let quoted = rest[..end].trim();
        if quoted.split_whitespace().count() >= 2 {
            return Some(quoted);
        }
    }
    None
}

fn prompt_line(line: &str) -> Option<&str> {
    let trimmed = line.trim().trim_start_matches(['*', '-', ' ']);
    let lowered = trimmed.to_lowercase();
    if !lowered.starts_with("prompt") {
        return None;
    }
    let (_, rest) = trimmed.split_once(':')?;
    let rest = rest.trim().trim_matches(['*', ' ']);
    (!rest.is_empty()).then_some(rest)
}

fn strip_request_phrasing(user_text: &str) -> String {
    let tokens: Vec<&str> = user_text.split_whitespace().collect();
    let mut start = 0;
    while start < tokens.len() {
        let word = tokens[start]
            .trim_matches(|ch: char| !ch.is_alphanumeric())
            .to_lowercase();
        let skippable = FILLER_WORDS.contains(&word.as_str())
            || REQUEST_VERBS.contains(&word.as_str())
            || IMAGE_WORDS.contains(&word.as_str())
            || VIDEO_WORDS.contains(&word.as_str())
            || AUDIO_WORDS.contains(&word.as_str());
        if !skippable {
            break;
        }
        start += 1;
    }
    tokens[start..]
        .join(" ")
        .trim_end_matches(['.', '!', '?'])
        .trim()
        .to_string()
}

fn clamp(text: &str) -> String {
    text.chars().take(MAX_PROMPT_CHARS).collect()
}
