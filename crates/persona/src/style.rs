//! Post-processing that nudges a finished reply towards a language style.
//!
//! Needs the whole reply, so it is not applied to streamed tokens. The CLI
//! exposes it through `kindred persona shape`.

use kindred_core::persona::LanguageStyle;
use regex_lite::Regex;

const CONTRACTIONS: [(&str, &str); 8] = [
    ("I am", "I'm"),
    ("you are", "you're"),
    ("do not", "don't"),
    ("does not", "doesn't"),
    ("cannot", "can't"),
    ("it is", "it's"),
    ("that is", "that's"),
    ("will not", "won't"),
];

/// Shape `text` for emoji density, sentence length and formality.
pub fn shape_response(text: &str, style: &LanguageStyle) -> String {
    let mut out = text.trim().to_string();
    if out.is_empty() {
        return out;
    }

    out = apply_formality(&out, style.formality);
    out = split_long_sentences(&out, style.avg_sentence_length);
    out = apply_emoji_density(&out, style.emoji_frequency);
    out
}

fn apply_formality(text: &str, formality: f32) -> String {
    if formality < 0.3 {
        CONTRACTIONS
            .iter()
            .fold(text.to_string(), |out, (long, short)| replace_words(&out, long, short))
    } else if formality > 0.7 {
        let mut out = CONTRACTIONS
            .iter()
            .fold(text.to_string(), |out, (long, short)| replace_words(&out, short, long));
        capitalize_first(&mut out);
        if !out.ends_with(['.', '!', '?']) && !out.chars().last().is_some_and(is_emoji) {
            out.push('.');
        }
        out
    } else {
        text.to_string()
    }
}

/// Replace `from` only where it stands as whole words.
fn replace_words(text: &str, from: &str, to: &str) -> String {
    match Regex::new(&format!(r"\b{}\b", regex_lite::escape(from))) {
        Ok(re) => re.replace_all(text, regex_lite::NoExpand(to)).into_owned(),
        Err(_) => text.to_string(),
    }
}

/// Break sentences running past twice the target length at their first comma.
fn split_long_sentences(text: &str, avg_sentence_length: u32) -> String {
    let limit = avg_sentence_length.max(1).saturating_mul(2) as usize;

    sentences(text)
        .into_iter()
        .map(|sentence| {
            if sentence.split_whitespace().count() <= limit {
                return sentence.to_string();
            }
            match sentence.split_once(", ") {
                Some((head, tail)) => {
                    let mut tail = tail.to_string();
                    capitalize_first(&mut tail);
                    format!("{head}. {tail}")
                }
                None => sentence.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn apply_emoji_density(text: &str, emoji_frequency: f32) -> String {
    if emoji_frequency < 0.2 {
        let stripped: String = text
            .chars()
            .filter(|c| !is_emoji(*c) && *c != '\u{FE0F}' && *c != '\u{200D}')
            .collect();
        collapse_spaces(&stripped)
    } else if emoji_frequency > 0.6 && !text.chars().any(is_emoji) {
        format!("{text} 😊")
    } else {
        text.to_string()
    }
}

/// Split after `.`, `!` or `?` followed by whitespace, keeping the punctuation.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?')
            && chars.peek().is_some_and(|(_, next)| next.is_whitespace())
        {
            let end = i + c.len_utf8();
            out.push(text[start..end].trim());
            start = end;
        }
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

fn capitalize_first(s: &mut String) {
    if let Some(first) = s.chars().next()
        && first.is_lowercase()
    {
        let upper: String = first.to_uppercase().collect();
        s.replace_range(..first.len_utf8(), &upper);
    }
}

fn collapse_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_emoji(c: char) -> bool {
    matches!(
        c as u32,
        0x1F300..=0x1F5FF
            | 0x1F600..=0x1F64F
            | 0x1F680..=0x1F6FF
            | 0x1F900..=0x1F9FF
            | 0x1FA70..=0x1FAFF
            | 0x2600..=0x26FF
            | 0x2700..=0x27BF
            | 0x2764
    )
}
