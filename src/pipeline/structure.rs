//! Page structure reconstruction: positioned words → Markdown.
//!
//! ## Why reconstruct at all?
//!
//! A PDF text layer has no semantic structure — no headings, no lists, no
//! paragraphs, just words at coordinates in various font sizes. Dumping
//! `page_text()` gives a wall of hard-wrapped lines. This module rebuilds
//! structure from the two signals the format does preserve:
//!
//! - **Font size** relative to the page's body text identifies headings.
//! - **Horizontal position** relative to the left margin identifies list
//!   nesting and continuation lines.
//!
//! The thresholds in [`ReconstructorPolicy`] were tuned on Spanish-language
//! academic PDFs (theses, papers, book chapters). They are policy, not
//! invariants: callers with a different corpus can and should retune them.
//!
//! Each classification rule is a pure function over one line, independently
//! testable.

use crate::pipeline::extract::WordToken;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Tuning knobs for structure reconstruction.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ReconstructorPolicy {
    /// Vertical distance (points) within which two words share a line. Default: 2.5.
    pub line_tolerance: f32,
    /// Lines longer than this are never headings. Default: 140.
    ///
    /// Real headings are labels; a 200-character "heading" is a sentence
    /// that happens to be set in a larger font (pull quotes, epigraphs).
    pub max_heading_chars: usize,
    /// A line this close (points) to the page's maximum font size becomes
    /// an H2, provided the page has display-size text at all. Default: 0.3.
    pub near_max_delta: f32,
    /// Font-size ratio over body text for an H2 (H3 past the first two
    /// lines). Default: 1.45.
    pub h2_size_ratio: f32,
    /// Font-size ratio over body text for an H3. Default: 1.25.
    pub h3_size_ratio: f32,
    /// Horizontal points per list-indent level. Default: 18.0.
    ///
    /// 18 pt is half an inch at the 36 pt indents LibreOffice and Word
    /// emit, which is what most of the corpus was authored in.
    pub indent_unit: f32,
    /// A line indented more than this many points past the margin continues
    /// the previous list item. Default: 4.0.
    pub continuation_indent: f32,
}

impl Default for ReconstructorPolicy {
    fn default() -> Self {
        Self {
            line_tolerance: 2.5,
            max_heading_chars: 140,
            near_max_delta: 0.3,
            h2_size_ratio: 1.45,
            h3_size_ratio: 1.25,
            indent_unit: 18.0,
            continuation_indent: 4.0,
        }
    }
}

impl ReconstructorPolicy {
    /// Check the policy is internally consistent.
    pub fn validate(&self) -> Result<(), String> {
        if self.line_tolerance <= 0.0 {
            return Err("line_tolerance must be > 0".into());
        }
        if self.indent_unit <= 0.0 {
            return Err("indent_unit must be > 0".into());
        }
        if self.h3_size_ratio < 1.0 || self.h2_size_ratio < self.h3_size_ratio {
            return Err(format!(
                "heading size ratios must satisfy 1.0 ≤ h3 ≤ h2, got h3={} h2={}",
                self.h3_size_ratio, self.h2_size_ratio
            ));
        }
        if self.max_heading_chars == 0 {
            return Err("max_heading_chars must be ≥ 1".into());
        }
        Ok(())
    }
}

/// One reconstructed page: the Markdown fragment plus what was found in it.
#[derive(Debug, Clone, Default)]
pub struct PageFragment {
    pub markdown: String,
    pub headings: usize,
    pub list_items: usize,
    pub paragraphs: usize,
}

/// A visual line: words sharing a vertical band.
struct Line {
    text: String,
    avg_size: f32,
    x_min: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Heading,
    List,
    Paragraph,
}

/// Rebuild one page's Markdown from its positioned words.
///
/// `plain_text` is the page's layout-preserving plain extraction, used as
/// the fallback when there are no word tokens or classification produces
/// nothing.
pub fn reconstruct_page(
    words: &[WordToken],
    plain_text: &str,
    policy: &ReconstructorPolicy,
) -> PageFragment {
    if words.is_empty() {
        return plain_fallback(plain_text);
    }

    let lines = group_lines(words, policy.line_tolerance);
    let mut sizes: Vec<f32> = words.iter().map(|w| w.size).collect();
    sizes.sort_by(f32::total_cmp);
    let body_size = median_sorted(&sizes);
    let max_size = sizes.last().copied().unwrap_or(0.0);
    let baseline = words.iter().map(|w| w.x).fold(f32::MAX, f32::min);

    let mut blocks: Vec<(BlockKind, String)> = Vec::new();
    let mut paragraph: Vec<String> = Vec::new();
    let mut list_open = false;
    let mut headings = 0usize;
    let mut list_items = 0usize;
    let mut paragraphs = 0usize;

    for (idx, line) in lines.iter().enumerate() {
        let text = line.text.trim();
        if text.is_empty() {
            flush_paragraph(&mut blocks, &mut paragraph, &mut paragraphs);
            list_open = false;
            continue;
        }

        if let Some(level) = heading_level(text, line.avg_size, body_size, max_size, idx, policy) {
            flush_paragraph(&mut blocks, &mut paragraph, &mut paragraphs);
            list_open = false;
            blocks.push((
                BlockKind::Heading,
                format!("{} {}", "#".repeat(level), text),
            ));
            headings += 1;
            continue;
        }

        if let Some(caps) = RE_BULLET.captures(text) {
            flush_paragraph(&mut blocks, &mut paragraph, &mut paragraphs);
            let indent = indent_level(line.x_min - baseline, policy);
            blocks.push((
                BlockKind::List,
                format!("{}- {}", "  ".repeat(indent), &caps[1]),
            ));
            list_items += 1;
            list_open = true;
            continue;
        }

        if let Some(caps) = RE_NUMBERED.captures(text) {
            flush_paragraph(&mut blocks, &mut paragraph, &mut paragraphs);
            let indent = indent_level(line.x_min - baseline, policy);
            blocks.push((
                BlockKind::List,
                format!("{}{}. {}", "  ".repeat(indent), &caps[1], &caps[2]),
            ));
            list_items += 1;
            list_open = true;
            continue;
        }

        if list_open && (line.x_min - baseline) > policy.continuation_indent {
            if let Some((BlockKind::List, item)) = blocks.last_mut() {
                item.push(' ');
                item.push_str(text);
                continue;
            }
        }

        list_open = false;
        paragraph.push(text.to_string());
    }
    flush_paragraph(&mut blocks, &mut paragraph, &mut paragraphs);

    let markdown = render_blocks(&blocks);
    if markdown.trim().is_empty() {
        return plain_fallback(plain_text);
    }

    debug!(headings, list_items, paragraphs, "page reconstructed");
    PageFragment {
        markdown,
        headings,
        list_items,
        paragraphs,
    }
}

/// Layout-preserving fallback: the whole page as one paragraph block.
fn plain_fallback(plain_text: &str) -> PageFragment {
    let text = plain_text.trim();
    if text.is_empty() {
        return PageFragment::default();
    }
    PageFragment {
        markdown: text.to_string(),
        headings: 0,
        list_items: 0,
        paragraphs: 1,
    }
}

// ── Line grouping ────────────────────────────────────────────────────────────

/// Cluster words into visual lines.
///
/// Words are sorted by (y, x); a gap of more than `tolerance` points from
/// the previous word's y starts a new line. Within a line, words are
/// re-sorted by x so hyphenated column output still reads left to right.
fn group_lines(words: &[WordToken], tolerance: f32) -> Vec<Line> {
    let mut sorted: Vec<&WordToken> = words.iter().collect();
    sorted.sort_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)));

    let mut grouped: Vec<Vec<&WordToken>> = Vec::new();
    let mut last_y = f32::MIN;
    for w in sorted {
        if grouped.is_empty() || (w.y - last_y).abs() > tolerance {
            grouped.push(vec![w]);
        } else if let Some(line) = grouped.last_mut() {
            line.push(w);
        }
        last_y = w.y;
    }

    grouped
        .into_iter()
        .map(|mut tokens| {
            tokens.sort_by(|a, b| a.x.total_cmp(&b.x));
            let joined = tokens
                .iter()
                .map(|t| t.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let avg_size = tokens.iter().map(|t| t.size).sum::<f32>() / tokens.len() as f32;
            let x_min = tokens.iter().map(|t| t.x).fold(f32::MAX, f32::min);
            Line {
                text: tidy_spacing(&joined),
                avg_size,
                x_min,
            }
        })
        .collect()
}

fn median_sorted(sorted: &[f32]) -> f32 {
    if sorted.is_empty() {
        return 0.0;
    }
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

// ── Punctuation-spacing cleanup ──────────────────────────────────────────────
//
// Joining tokens with single spaces re-introduces space around punctuation
// ("word , word", "( word )"). Four passes undo that.

static RE_SPACE_BEFORE_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+([,.;:!?%])").unwrap());
static RE_SPACE_AFTER_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"([(\[{])\s+").unwrap());
static RE_SPACE_BEFORE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+([)\]}])").unwrap());
static RE_MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());

fn tidy_spacing(input: &str) -> String {
    let s = RE_SPACE_BEFORE_PUNCT.replace_all(input, "$1");
    let s = RE_SPACE_AFTER_OPEN.replace_all(&s, "$1");
    let s = RE_SPACE_BEFORE_CLOSE.replace_all(&s, "$1");
    let s = RE_MULTI_SPACE.replace_all(&s, " ");
    s.trim().to_string()
}

// ── Line classification ──────────────────────────────────────────────────────

static RE_BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-*•▪◦]\s+(.+)$").unwrap());
static RE_NUMBERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+(?:\.\d+)*)[.)]\s+(.+)$").unwrap());
static RE_SUBSECTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(?:\.\d+)+\.?\s+(\S)").unwrap());

/// Decide whether a line is a heading and at what level.
///
/// Size rules require the page to contain display-size text at all
/// (`max ≥ h3_ratio × body`); on a uniform-font page every line is "near
/// the maximum" and nothing should be promoted.
fn heading_level(
    text: &str,
    avg_size: f32,
    body_size: f32,
    max_size: f32,
    line_idx: usize,
    policy: &ReconstructorPolicy,
) -> Option<usize> {
    if text.chars().count() > policy.max_heading_chars {
        return None;
    }
    // A trailing period marks a sentence, not a label.
    if text.ends_with('.') {
        return None;
    }

    let has_display_sizes = body_size > 0.0 && max_size >= policy.h3_size_ratio * body_size;
    if has_display_sizes && (max_size - avg_size) <= policy.near_max_delta {
        return Some(2);
    }
    if body_size > 0.0 && avg_size >= policy.h2_size_ratio * body_size {
        return Some(if line_idx < 2 { 2 } else { 3 });
    }
    if body_size > 0.0 && avg_size >= policy.h3_size_ratio * body_size {
        return Some(3);
    }
    // "2.3 Métodos" is a sub-section even when set in body size.
    if let Some(caps) = RE_SUBSECTION.captures(text) {
        if caps[1].chars().next().is_some_and(char::is_uppercase) {
            return Some(3);
        }
    }
    None
}

fn indent_level(offset: f32, policy: &ReconstructorPolicy) -> usize {
    (offset.max(0.0) / policy.indent_unit).floor() as usize
}

// ── Assembly ─────────────────────────────────────────────────────────────────

fn flush_paragraph(
    blocks: &mut Vec<(BlockKind, String)>,
    paragraph: &mut Vec<String>,
    paragraphs: &mut usize,
) {
    if paragraph.is_empty() {
        return;
    }
    blocks.push((BlockKind::Paragraph, paragraph.join(" ")));
    paragraph.clear();
    *paragraphs += 1;
}

/// Join blocks: consecutive list items sit on adjacent lines, everything
/// else is separated by one blank line.
fn render_blocks(blocks: &[(BlockKind, String)]) -> String {
    let mut out = String::new();
    let mut prev: Option<BlockKind> = None;
    for (kind, text) in blocks {
        if !out.is_empty() {
            if prev == Some(BlockKind::List) && *kind == BlockKind::List {
                out.push('\n');
            } else {
                out.push_str("\n\n");
            }
        }
        out.push_str(text);
        prev = Some(*kind);
    }
    out
}
