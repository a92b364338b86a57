use super::types::{LorebookEntry, Message};

/// Whole-word, case-insensitive match. A trailing `*` turns the key into a
/// prefix match; keys with spaces match as phrases.
pub fn keyword_matches(keyword: &str, text: &str) -> bool {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return false;
    }

    let normalize = |s: &str| -> String {
        s.chars()
            .map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() {
                    c
                } else {
                    ' '
                }
            })
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    };

    let search_keyword = keyword.to_lowercase();
    let normalized_text = normalize(&text.to_lowercase());

    if let Some(prefix) = search_keyword.strip_suffix('*') {
        let prefix = normalize(prefix);
        if prefix.is_empty() {
            return false;
        }
        return normalized_text
            .split_whitespace()
            .any(|word| word.starts_with(prefix.as_str()));
    }

    let normalized_keyword = normalize(&search_keyword);
    if normalized_keyword.is_empty() {
        return false;
    }
    if normalized_keyword.contains(' ') {
        return format!(" {} ", normalized_text).contains(&format!(" {} ", normalized_keyword));
    }
    normalized_text
        .split_whitespace()
        .any(|word| word == normalized_keyword)
}

/// Entries to inject for this turn. Without gating every enabled entry is
/// active; with gating an entry needs a key hit in the last `scan_depth`
/// messages. Order follows the lorebook.
pub fn active_entries<'a>(
    lorebook: &'a [LorebookEntry],
    history: &[Message],
    keyword_gating: bool,
    scan_depth: usize,
) -> Vec<&'a LorebookEntry> {
    let enabled = lorebook.iter().filter(|e| e.enabled);
    if !keyword_gating {
        return enabled.collect();
    }

    let start = history.len().saturating_sub(scan_depth);
    let context = history[start..]
        .iter()
        .filter(|m| !m.is_thinking)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    enabled
        .filter(|entry| entry.keys.iter().any(|k| keyword_matches(k, &context)))
        .collect()
}

pub fn format_lorebook_for_prompt(entries: &[&LorebookEntry]) -> String {
    entries
        .iter()
        .map(|entry| entry.content.trim())
        .filter(|content| !content.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
