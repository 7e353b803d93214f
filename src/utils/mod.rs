//! Utility functions and helpers.

pub mod http;

use unicode_segmentation::UnicodeSegmentation;
use url::Url;

/// Extract the host from a URL, lowercased.
pub fn get_domain(url: &Url) -> Option<String> {
    url.host_str().map(|s| s.to_lowercase())
}

/// Cut `text` to at most `max_chars` characters without splitting a
/// grapheme, appending `…` when anything was removed.
pub fn truncate_graphemes(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let budget = max_chars.saturating_sub(1);
    let mut used = 0;
    let mut out = String::new();
    for grapheme in text.graphemes(true) {
        let len = grapheme.chars().count();
        if used + len > budget {
            break;
        }
        used += len;
        out.push_str(grapheme);
    }
    out.push('…');
    out
}
