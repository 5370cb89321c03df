//! Per-field extraction over one message body
//!
//! Every lookup tries the HTML tree first (a labelled cell or tag followed by its value,
//! an anchor with a matching href) and falls back to a regex over the plain text only
//! when the structural pass finds nothing.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

static LABEL_CANDIDATES: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td, th, dt, label, strong, b, span, p, div").unwrap());

static ANCHORS: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// `LABEL: value` patterns, compiled once per label
static LABEL_PATTERNS: Lazy<Mutex<HashMap<String, Regex>>> = Lazy::new(Default::default);

const SKIPPED_ELEMENTS: &[&str] = &["head", "script", "style", "template"];
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "blockquote", "div", "dl", "dt", "dd", "footer", "form", "h1", "h2",
    "h3", "h4", "h5", "h6", "header", "hr", "li", "ol", "p", "pre", "section", "table", "tr",
    "ul",
];

/// Field lookups over a single message's bodies
pub struct FieldExtractor {
    text: String,
    html: String,
    document: Option<Html>,
}

impl FieldExtractor {
    /// Plain text wins as the regex haystack; an HTML-only message is flattened instead
    pub fn new(plain: &str, html: &str) -> Self {
        let text = if plain.trim().is_empty() {
            html_to_text(html)
        } else {
            normalize_newlines(plain)
        };
        let document = if html.trim().is_empty() {
            None
        } else {
            Some(Html::parse_document(html))
        };

        Self {
            text,
            html: html.to_string(),
            document,
        }
    }

    /// The text used for regex fallbacks
    pub fn text(&self) -> &str {
        &self.text
    }

    /// First non-empty value for any of `labels`
    pub fn field(&self, labels: &[&str]) -> Option<String> {
        labels
            .iter()
            .find_map(|label| self.structural_field(label))
            .or_else(|| labels.iter().find_map(|label| self.text_field(label)))
    }

    /// A `LABEL: value` line in the plain text
    pub fn text_field(&self, label: &str) -> Option<String> {
        label_pattern(label)?
            .captures(&self.text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|value| !value.is_empty())
    }

    /// An element whose whole text is the label, read from its next non-empty sibling
    fn structural_field(&self, label: &str) -> Option<String> {
        let document = self.document.as_ref()?;

        document
            .select(&LABEL_CANDIDATES)
            .filter(|element| is_label(element, label))
            .find_map(following_value)
    }

    /// Anchor href matching `shape`, else the first raw match anywhere in the HTML
    pub fn link_matching(&self, shape: &Regex) -> Option<String> {
        if let Some(document) = &self.document {
            let from_anchor = document
                .select(&ANCHORS)
                .filter_map(|a| a.value().attr("href"))
                .find(|href| shape.is_match(href))
                .and_then(|href| shape.find(href))
                .map(|m| m.as_str().to_string());
            if from_anchor.is_some() {
                return from_anchor;
            }
        }

        shape
            .find(&self.html)
            .or_else(|| shape.find(&self.text))
            .map(|m| m.as_str().to_string())
    }

    /// Customer text between the first start marker and the earliest end marker after it
    pub fn isolate_message(&self, start_markers: &[&str], end_markers: &[&str]) -> Option<String> {
        isolate_between(&self.text, start_markers, end_markers)
    }
}

fn label_pattern(label: &str) -> Option<Regex> {
    let mut cache = LABEL_PATTERNS
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(re) = cache.get(label) {
        return Some(re.clone());
    }

    let pattern = format!(r"(?im)^[ \t]*{}[ \t]*:[ \t]*(.+?)[ \t]*$", regex::escape(label));
    let re = Regex::new(&pattern).ok()?;
    cache.insert(label.to_string(), re.clone());
    Some(re)
}

fn is_label(element: &ElementRef<'_>, label: &str) -> bool {
    let own: String = element.text().collect();
    let own = own.trim().trim_end_matches(':').trim();
    own.eq_ignore_ascii_case(label)
}

fn following_value(element: ElementRef<'_>) -> Option<String> {
    for sibling in element.next_siblings() {
        let value = if let Some(text) = sibling.value().as_text() {
            text.trim().trim_start_matches(':').trim().to_string()
        } else if let Some(el) = ElementRef::wrap(sibling) {
            collapse_whitespace(&el.text().collect::<String>())
        } else {
            continue;
        };

        if !value.is_empty() {
            return Some(value);
        }
    }
    None
}

/// Slice `text` between markers (case-insensitive) and tidy the result
pub fn isolate_between(text: &str, start_markers: &[&str], end_markers: &[&str]) -> Option<String> {
    let start_re = marker_regex(start_markers)?;
    let start = start_re.find(text)?.end();
    let rest = &text[start..];

    let end = marker_regex(end_markers)
        .and_then(|re| re.find(rest))
        .map(|m| m.start())
        .unwrap_or(rest.len());

    let message = collapse_blank_lines(&rest[..end]);
    if message.is_empty() {
        None
    } else {
        Some(message)
    }
}

fn marker_regex(markers: &[&str]) -> Option<Regex> {
    if markers.is_empty() {
        return None;
    }
    let alternation = markers
        .iter()
        .map(|m| regex::escape(m))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i)(?:{})", alternation)).ok()
}

/// Trim every line and keep at most one blank line between paragraphs
pub fn collapse_blank_lines(text: &str) -> String {
    let trimmed_lines = normalize_newlines(text)
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    BLANK_RUN
        .replace_all(&trimmed_lines, "\n\n")
        .trim()
        .to_string()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Flatten HTML to text with one line per block element
///
/// Text comes from the parsed tree, so every named and numeric entity is decoded.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();
    push_element_text(document.root_element(), &mut out);

    let lines = out
        .lines()
        .map(collapse_whitespace)
        .collect::<Vec<_>>()
        .join("\n");
    collapse_blank_lines(&lines)
}

fn push_element_text(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if SKIPPED_ELEMENTS.contains(&name) {
        return;
    }
    if name == "br" {
        out.push('\n');
        return;
    }

    let block = BLOCK_ELEMENTS.contains(&name);
    if block {
        end_line(out);
    }

    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            // Source whitespace is layout; only elements break lines
            out.push_str(&text.replace(|c: char| c.is_ascii_whitespace(), " "));
        } else if let Some(child) = ElementRef::wrap(child) {
            push_element_text(child, out);
        }
    }

    match name {
        "td" | "th" => out.push(' '),
        _ if block => end_line(out),
        _ => {}
    }
}

/// Close the current line unless it is already empty
fn end_line(out: &mut String) {
    let kept = out.trim_end_matches(' ').len();
    out.truncate(kept);
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}
