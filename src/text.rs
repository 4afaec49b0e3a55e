use regex::Regex;
use scraper::ElementRef;

use crate::types::SpyError;

/// Splits raw text on whitespace and keeps lowercased tokens matching the
/// configured pattern. Everything else is dropped silently.
pub struct TextFilter {
    pattern: Regex,
}

impl TextFilter {
    pub fn new(pattern: &str) -> Result<Self, SpyError> {
        let pattern = Regex::new(pattern)
            .map_err(|e| SpyError::Config(format!("invalid filter pattern: {e}")))?;
        Ok(TextFilter { pattern })
    }

    pub fn filter(&self, text: &str) -> Vec<String> {
        text.split_whitespace()
            .map(|w| w.to_lowercase())
            .filter(|w| self.pattern.is_match(w))
            .collect()
    }
}

/// Text owned directly by `el`, excluding anything inside nested elements.
/// Without this, matching both `<div>` and a `<p>` inside it would count the
/// paragraph's words twice.
pub fn direct_text(el: ElementRef) -> String {
    let has_nested = el.children().any(|c| c.value().is_element());

    // leaf fast path
    if !has_nested {
        return el.text().collect();
    }

    let mut txt = String::new();
    for child in el.children() {
        if let Some(t) = child.value().as_text() {
            txt.push_str(t);
        }
    }
    txt
}
