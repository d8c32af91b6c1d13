//! Pattern-driven URL extraction
//!
//! Pulls raw URL strings out of arbitrary HTML/JSON text. Search pages embed
//! their results inside escaped JSON literals, so every match is unescaped
//! before it is returned.

use crate::config::PatternConfig;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;

/// Characters that end a prefix-scanned URL
const URL_DELIMITERS: &[char] = &['\'', '"', '<', '>', '`'];

/// JSON and HTML escapes seen around embedded URLs
const UNESCAPES: &[(&str, &str)] = &[
    ("\\/", "/"),
    ("\\u0026", "&"),
    ("\\u003d", "="),
    ("\\u003D", "="),
    ("\\u0027", "'"),
    ("\\u0022", "\""),
    ("&amp;", "&"),
];

/// A compiled extraction pattern
#[derive(Debug)]
enum Pattern {
    Prefix(String),
    Capture(Regex),
    Selector { selector: Selector, attribute: String },
}

/// Extracts candidate URLs from text using an ordered list of patterns
#[derive(Debug)]
pub struct Extractor {
    patterns: Vec<Pattern>,
}

impl Extractor {
    /// Compiles the given patterns
    ///
    /// A pattern that fails to compile is logged and skipped; the remaining
    /// patterns still run.
    pub fn new(configs: &[PatternConfig]) -> Self {
        let patterns = configs
            .iter()
            .filter_map(|config| match compile(config) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    tracing::warn!("Skipping extraction pattern {:?}: {}", config, e);
                    None
                }
            })
            .collect();

        Self { patterns }
    }

    /// Number of usable patterns
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Extracts raw URLs from `text`
    ///
    /// The result holds each URL once, in discovery order. No matches yields
    /// an empty vector, not an error.
    pub fn extract(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut urls = Vec::new();

        // Parsed lazily, only when a selector pattern exists
        let mut document: Option<Html> = None;

        for pattern in &self.patterns {
            let found = match pattern {
                Pattern::Prefix(prefix) => scan_prefix(text, prefix),
                Pattern::Capture(regex) => capture(text, regex),
                Pattern::Selector {
                    selector,
                    attribute,
                } => {
                    let doc = document.get_or_insert_with(|| Html::parse_document(text));
                    doc.select(selector)
                        .filter_map(|el| el.value().attr(attribute))
                        .map(str::to_string)
                        .collect()
                }
            };

            for raw in found {
                let url = unescape_url(raw.trim());
                if url.starts_with("http") && seen.insert(url.clone()) {
                    urls.push(url);
                }
            }
        }

        urls
    }
}

fn compile(config: &PatternConfig) -> Result<Pattern, String> {
    match config {
        PatternConfig::Prefix { prefix } if prefix.is_empty() => {
            Err("empty prefix".to_string())
        }
        PatternConfig::Prefix { prefix } => Ok(Pattern::Prefix(prefix.clone())),
        PatternConfig::Capture { regex } => Regex::new(regex)
            .map(Pattern::Capture)
            .map_err(|e| e.to_string()),
        PatternConfig::Selector {
            selector,
            attribute,
        } => Selector::parse(selector)
            .map(|selector| Pattern::Selector {
                selector,
                attribute: attribute.clone(),
            })
            .map_err(|e| format!("{:?}", e)),
    }
}

/// Finds every occurrence of `prefix` and takes the text up to the next delimiter
fn scan_prefix(text: &str, prefix: &str) -> Vec<String> {
    text.match_indices(prefix)
        .map(|(start, _)| {
            let rest = &text[start..];
            let end = rest
                .find(|c: char| c.is_whitespace() || URL_DELIMITERS.contains(&c))
                .unwrap_or(rest.len());
            // A JSON-escaped quote leaves a dangling backslash
            rest[..end].trim_end_matches('\\').to_string()
        })
        .filter(|url| url.len() > prefix.len())
        .collect()
}

/// Collects every capture group that looks like a URL
fn capture(text: &str, regex: &Regex) -> Vec<String> {
    let mut found = Vec::new();
    for caps in regex.captures_iter(text) {
        if caps.len() == 1 {
            if let Some(m) = caps.get(0) {
                found.push(m.as_str().to_string());
            }
            continue;
        }
        for group in caps.iter().skip(1).flatten() {
            if group.as_str().starts_with("http") {
                found.push(group.as_str().to_string());
            }
        }
    }
    found
}

/// Reverses JSON string escapes and `&amp;` inside a URL
pub fn unescape_url(url: &str) -> String {
    UNESCAPES
        .iter()
        .fold(url.to_string(), |acc, (from, to)| acc.replace(from, to))
}
