//! Markdown normalisation: metadata cleanup, hierarchy repair, line fusion.
//!
//! ## Why normalise at all?
//!
//! Extraction output is *locally* correct but *globally* inconsistent.
//! Three recurring defects, whichever routine produced the Markdown:
//!
//! - Page furniture survives as headings (`## Página 12`, bare `---`
//!   separators, roman-numeral folios).
//! - Heading levels follow font size, not document logic: `1.2.1` ends up
//!   an H2 because it was typeset large, while its parent `1.2` is an H3.
//! - Hard page breaks split sentences, leaving fragments that render as
//!   separate paragraphs.
//!
//! ## Phase order
//!
//! Five phases, each pure, run in a fixed order: cleanup must precede
//! detection so furniture never becomes a heading; detection and hierarchy
//! analysis precede rewriting because the depth→level map needs the whole
//! document; line fusion runs last so it sees final heading markers and
//! never merges into them. A fidelity check over the result scores five
//! structural invariants and reports the ones that failed.
//!
//! Everything is logged into a change list so a conversion is auditable
//! after the fact: which headings moved where and why, which lines were
//! fused.

pub mod heading;

use crate::normalize::heading::{detect_headings, HeadingRecord, HierarchyMap};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// One edit the normaliser applied, for the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NormalizeChange {
    /// A numbered heading was mapped through the hierarchy analysis.
    SemanticMapping {
        line: usize,
        semantic_level: Vec<u32>,
        depth: usize,
        mapped_to: String,
        numbering: String,
    },
    /// A heading's level changed.
    HeadingLevelChange {
        line: usize,
        #[serde(rename = "from")]
        from_level: String,
        #[serde(rename = "to")]
        to_level: String,
        /// First 50 characters of the heading text.
        text: String,
        reason: String,
    },
    /// A fragmented line was fused with its continuation.
    LineMerge {
        line: usize,
        /// Merged text, truncated to 60 characters.
        result: String,
    },
}

/// Outcome of the five structural checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FidelityChecks {
    /// The document has an H1.
    pub has_h1: bool,
    /// No mangled runs of hashes (`### ##`).
    pub no_duplicate_hashes: bool,
    /// No heading jumps deeper than one level at a time.
    pub valid_hierarchy: bool,
    /// No page markers survive as headings.
    pub no_metadata_markers: bool,
    /// No runs of three or more blank lines.
    pub proper_spacing: bool,
}

/// Structural fidelity of a Markdown document, scored 0–100.
///
/// Each failed check costs 20 points and contributes its name to
/// `warnings`. The score is advisory: a dissertation without a title page
/// legitimately has no H1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FidelityReport {
    pub fidelity_score: f32,
    pub checks: FidelityChecks,
    pub warnings: Vec<String>,
}

/// Everything the normaliser produced for one document.
#[derive(Debug, Clone)]
pub struct NormalizeReport {
    /// The normalised Markdown.
    pub markdown: String,
    /// Fidelity of the normalised output.
    pub fidelity: FidelityReport,
    /// Ordered audit trail of edits.
    pub changes: Vec<NormalizeChange>,
    /// The depth→level mapping that was applied.
    pub hierarchy: HierarchyMap,
}

impl NormalizeReport {
    /// JSON body of the side report written next to a converted file:
    /// the fidelity result plus the first 20 changes.
    pub fn side_report(&self) -> serde_json::Value {
        json!({
            "validation": self.fidelity,
            "changes_count": self.changes.len(),
            "changes": self.changes.iter().take(20).collect::<Vec<_>>(),
        })
    }
}

/// Run the full normalisation pipeline over a Markdown document.
pub fn normalize(markdown: &str) -> NormalizeReport {
    let cleaned = cleanup_metadata(markdown);
    let lines: Vec<&str> = cleaned.lines().collect();

    let headings = detect_headings(&lines);
    let hierarchy = HierarchyMap::build(&headings);
    debug!(
        headings = headings.len(),
        base_level = hierarchy.base_level,
        depths = hierarchy.by_depth.len(),
        "hierarchy analysed"
    );

    let mut changes = Vec::new();
    let rewritten = apply_hierarchy(&lines, &headings, &hierarchy, &mut changes);
    let merged = merge_fragmented_lines(&rewritten, &mut changes);

    let markdown = merged.join("\n");
    let fidelity = check_fidelity(&markdown);

    info!(
        changes = changes.len(),
        fidelity = f64::from(fidelity.fidelity_score),
        "markdown normalised"
    );

    NormalizeReport {
        markdown,
        fidelity,
        changes,
        hierarchy,
    }
}

// ── Phase 1: metadata cleanup ────────────────────────────────────────────

static RE_PAGE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#+\s*(?:Página|Page)\s*\d+\s*$").unwrap());
static RE_LONE_RULE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^---\s*$\n").unwrap());
static RE_BOILERPLATE: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?m)^#{1,6}\s*(?:©|®|™|All rights|Derechos reservados).*$").unwrap(),
        Regex::new(r"(?m)^#{1,6}\s*(?:Footer|Header|Pie de página).*$").unwrap(),
        // Headings that are only a number or a dash are folios.
        Regex::new(r"(?m)^#{1,6}\s*(?:\d+|-|—)\s*$").unwrap(),
        Regex::new(r"(?m)^#{1,6}\s*[ivxIVX]+\s*$").unwrap(),
    ]
});
static RE_EXTRA_BLANKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\n+").unwrap());

/// Strip page furniture: page markers, lone rules, folio headings.
fn cleanup_metadata(markdown: &str) -> String {
    let s = RE_PAGE_MARKER.replace_all(markdown, "");
    let s = RE_LONE_RULE.replace_all(&s, "");
    let mut s = s.into_owned();
    for rule in RE_BOILERPLATE.iter() {
        s = rule.replace_all(&s, "").into_owned();
    }
    RE_EXTRA_BLANKS.replace_all(&s, "\n\n").trim().to_string()
}

// ── Phase 4: hierarchy rewriting ─────────────────────────────────────────
//
// (Phases 2 and 3, detection and analysis, live in [`heading`].)

fn apply_hierarchy(
    lines: &[&str],
    headings: &BTreeMap<usize, HeadingRecord>,
    hierarchy: &HierarchyMap,
    changes: &mut Vec<NormalizeChange>,
) -> Vec<String> {
    lines
        .iter()
        .enumerate()
        .map(|(line_num, line)| {
            let Some(record) = headings.get(&line_num) else {
                return line.to_string();
            };

            let new_level = match &record.semantic {
                Some(numbering) => {
                    let depth = numbering.depth();
                    let level = hierarchy.level_for(depth);
                    if hierarchy.contains(depth) {
                        changes.push(NormalizeChange::SemanticMapping {
                            line: line_num,
                            semantic_level: numbering.levels.clone(),
                            depth,
                            mapped_to: format!("H{}", level),
                            numbering: numbering.numbering.clone(),
                        });
                    }
                    level
                }
                // Unnumbered headings keep their level; inferred ALL-CAPS
                // lines gain their default H2 marker here.
                None => record.original_level,
            };

            if new_level != record.original_level {
                changes.push(NormalizeChange::HeadingLevelChange {
                    line: line_num,
                    from_level: format!("H{}", record.original_level),
                    to_level: format!("H{}", new_level),
                    text: truncate_chars(&record.text, 50),
                    reason: if record.semantic.is_some() {
                        "semantic_depth_mapping".to_string()
                    } else {
                        "unknown".to_string()
                    },
                });
            }

            format!("{} {}", "#".repeat(new_level as usize), record.text)
        })
        .collect()
}

// ── Phase 5: line fusion ─────────────────────────────────────────────────

/// Fuse lines a page break split mid-sentence.
///
/// A line continues into the next content line when it does not end with
/// strong punctuation and the continuation does not start a new sentence
/// (uppercase) or a heading. Blank lines are looked *through* but only
/// consumed when a merge actually happens; a failed probe leaves the
/// document untouched, so paragraph separation survives.
fn merge_fragmented_lines(lines: &[String], changes: &mut Vec<NormalizeChange>) -> Vec<String> {
    let mut merged = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        let line = &lines[i];
        if line.starts_with('#') || line.trim().is_empty() {
            merged.push(line.clone());
            i += 1;
            continue;
        }

        let base_line = i;
        let mut current = line.clone();
        loop {
            let mut j = i + 1;
            while j < lines.len() && lines[j].trim().is_empty() {
                j += 1;
            }
            let Some(next) = lines.get(j) else { break };

            let continues = !next.starts_with('#')
                && !ends_with_strong_punctuation(&current)
                && next.chars().next().is_some_and(|c| !c.is_uppercase());
            if !continues {
                break;
            }

            current = format!("{} {}", current.trim_end(), next.trim());
            i = j;
            changes.push(NormalizeChange::LineMerge {
                line: base_line,
                result: if current.chars().count() > 60 {
                    format!("{}...", truncate_chars(&current, 60))
                } else {
                    current.clone()
                },
            });
        }

        merged.push(current);
        i += 1;
    }

    merged
}

fn ends_with_strong_punctuation(line: &str) -> bool {
    matches!(
        line.trim_end().chars().last(),
        Some('.' | '!' | '?' | ':' | ';')
    )
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// ── Fidelity checks ──────────────────────────────────────────────────────

static RE_H1: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#\s+").unwrap());
static RE_DUP_HASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^###+\s*##").unwrap());
static RE_LEFTOVER_PAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#{1,6}\s*(?:Página|Page)\s*\d").unwrap());
static RE_TRIPLE_BLANK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\n\n+").unwrap());
static RE_ANY_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(#+)\s").unwrap());

/// Score a document's structural fidelity.
///
/// Usable on any Markdown, not just normaliser output; the conversion
/// layer runs it on raw output when normalisation is disabled.
pub fn check_fidelity(markdown: &str) -> FidelityReport {
    let checks = FidelityChecks {
        has_h1: RE_H1.is_match(markdown),
        no_duplicate_hashes: !RE_DUP_HASHES.is_match(markdown),
        valid_hierarchy: has_valid_hierarchy(markdown),
        no_metadata_markers: !RE_LEFTOVER_PAGE.is_match(markdown),
        proper_spacing: !RE_TRIPLE_BLANK.is_match(markdown),
    };

    let results = [
        ("has_h1", checks.has_h1),
        ("no_duplicate_hashes", checks.no_duplicate_hashes),
        ("valid_hierarchy", checks.valid_hierarchy),
        ("no_metadata_markers", checks.no_metadata_markers),
        ("proper_spacing", checks.proper_spacing),
    ];
    let passed = results.iter().filter(|(_, ok)| *ok).count();
    let warnings = results
        .iter()
        .filter(|(_, ok)| !ok)
        .map(|(name, _)| name.to_string())
        .collect();

    FidelityReport {
        fidelity_score: passed as f32 / results.len() as f32 * 100.0,
        checks,
        warnings,
    }
}

/// No heading may sit more than one level below its predecessor.
fn has_valid_hierarchy(markdown: &str) -> bool {
    let mut current = 0usize;
    for caps in RE_ANY_HEADING.captures_iter(markdown) {
        let level = caps[1].len();
        if current == 0 {
            current = level;
            continue;
        }
        if level > current + 1 {
            warn!(from = current, to = level, "heading hierarchy jump");
            return false;
        }
        current = level;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    // Condensed thesis front matter with every defect the normaliser
    // exists to fix: page markers, a lone rule, an ALL-CAPS faculty
    // line, roman chapters at H2, misleveled decimal headings, and a
    // sentence split by a page break.
    const THESIS_SAMPLE: &str = "\
## Página 1

## UNIVERSIDAD PRIVADA DE TACNA

FACULTAD DE INGENIERÍA

---

## CAPÍTULO I: EL PROBLEMA DE INVESTIGACIÓN

### 1.1 Descripción del problema

Este es un párrafo que describe el problema. El texto continúa
en la siguiente línea debido al salto de página.

## 1.2.1 Problema general

Aquí va el problema general del estudio.

## Página 2

## CAPÍTULO II: MARCO TEÓRICO

### 2.1 Antecedentes

Texto del marco teórico.
";

    #[test]
    fn cleanup_removes_page_furniture() {
        let cleaned = cleanup_metadata("## Página 1\n\nTexto real.\n\n---\n\n## Page 23\n\nMás texto.");
        assert!(!cleaned.contains("Página"));
        assert!(!cleaned.contains("Page 23"));
        assert!(!cleaned.contains("---"));
        assert!(cleaned.contains("Texto real."));
        assert!(cleaned.contains("Más texto."));
    }

    #[test]
    fn cleanup_removes_folio_headings() {
        let cleaned = cleanup_metadata("# 42\n\n## iv\n\nContenido.\n\n### —");
        assert!(!cleaned.contains("42"));
        assert!(!cleaned.contains("iv"));
        assert_eq!(cleaned, "Contenido.");
    }

    #[test]
    fn cleanup_collapses_blank_runs() {
        let cleaned = cleanup_metadata("uno\n\n\n\n\ndos");
        assert_eq!(cleaned, "uno\n\ndos");
    }

    #[test]
    fn roman_chapters_promote_to_h1() {
        let report = normalize(THESIS_SAMPLE);
        assert!(report
            .markdown
            .contains("\n# CAPÍTULO I: EL PROBLEMA DE INVESTIGACIÓN"));
        assert!(report.markdown.contains("\n# CAPÍTULO II: MARCO TEÓRICO"));
    }

    #[test]
    fn decimal_headings_follow_their_depth() {
        let report = normalize(THESIS_SAMPLE);
        // Depth 2 maps to H2, depth 3 to H3, regardless of original level.
        assert!(report.markdown.contains("\n## 1.1 Descripción del problema"));
        assert!(report.markdown.contains("\n### 1.2.1 Problema general"));
        assert!(report.markdown.contains("\n## 2.1 Antecedentes"));
    }

    #[test]
    fn all_caps_line_gains_heading_marker() {
        let report = normalize(THESIS_SAMPLE);
        assert!(report.markdown.contains("\n## FACULTAD DE INGENIERÍA"));
    }

    #[test]
    fn split_sentence_is_fused() {
        let report = normalize(THESIS_SAMPLE);
        assert!(report
            .markdown
            .contains("El texto continúa en la siguiente línea debido al salto de página."));
        assert!(report
            .changes
            .iter()
            .any(|c| matches!(c, NormalizeChange::LineMerge { .. })));
    }

    #[test]
    fn page_markers_do_not_survive() {
        let report = normalize(THESIS_SAMPLE);
        assert!(!report.markdown.contains("Página"));
        assert!(report.fidelity.checks.no_metadata_markers);
    }

    #[test]
    fn renormalizing_own_output_changes_nothing() {
        // Chapters promoted to H1 by the first pass must not read as a
        // document title on the second and push everything back down.
        let first = normalize(THESIS_SAMPLE);
        let second = normalize(&first.markdown);
        assert_eq!(second.markdown, first.markdown);
        assert_eq!(second.fidelity.fidelity_score, first.fidelity.fidelity_score);
        assert!(!second.changes.iter().any(|c| matches!(
            c,
            NormalizeChange::HeadingLevelChange { .. } | NormalizeChange::LineMerge { .. }
        )));
    }

    #[test]
    fn failed_merge_probe_keeps_paragraph_separation() {
        let input = "Primera frase sin puntuación final\n\nSegunda frase que Empieza con mayúscula.";
        let report = normalize(input);
        assert!(
            report.markdown.contains("final\n\nSegunda"),
            "blank separator must survive a failed merge: {:?}",
            report.markdown
        );
    }

    #[test]
    fn successful_merge_consumes_intervening_blank() {
        let input = "la frase quedó cortada\n\ny continúa en minúscula.";
        let report = normalize(input);
        assert_eq!(report.markdown, "la frase quedó cortada y continúa en minúscula.");
    }

    #[test]
    fn no_merge_after_strong_punctuation() {
        let input = "Primera frase completa.\nsegunda línea en minúscula";
        let report = normalize(input);
        assert!(report.markdown.contains("completa.\nsegunda"));
    }

    #[test]
    fn no_merge_into_headings() {
        let input = "texto sin puntuación final\n## 1. Encabezado";
        let report = normalize(input);
        assert!(report.markdown.contains("final\n"));
        assert!(!report.markdown.contains("final ##"));
    }

    #[test]
    fn change_log_records_semantic_mappings() {
        let report = normalize(THESIS_SAMPLE);
        let mapping = report.changes.iter().find_map(|c| match c {
            NormalizeChange::SemanticMapping {
                semantic_level,
                mapped_to,
                numbering,
                ..
            } if numbering == "1.2.1" => Some((semantic_level.clone(), mapped_to.clone())),
            _ => None,
        });
        let (levels, mapped_to) = mapping.expect("1.2.1 should be mapped");
        assert_eq!(levels, vec![1, 2, 1]);
        assert_eq!(mapped_to, "H3");
    }

    #[test]
    fn change_log_records_level_changes() {
        let report = normalize(THESIS_SAMPLE);
        assert!(report.changes.iter().any(|c| matches!(
            c,
            NormalizeChange::HeadingLevelChange { from_level, to_level, .. }
                if from_level == "H2" && to_level == "H1"
        )));
    }

    #[test]
    fn merge_result_is_truncated_in_the_log() {
        let long_a = "a".repeat(50);
        let long_b = "b".repeat(50);
        let input = format!("{}\n{}", long_a, long_b);
        let report = normalize(&input);
        let result = report.changes.iter().find_map(|c| match c {
            NormalizeChange::LineMerge { result, .. } => Some(result.clone()),
            _ => None,
        });
        let result = result.expect("lines should merge");
        assert_eq!(result.chars().count(), 63, "60 chars plus ellipsis");
        assert!(result.ends_with("..."));
    }

    #[test]
    fn fidelity_perfect_document_scores_100() {
        let report = check_fidelity("# Título\n\n## Sección\n\n### Subsección\n\nTexto.");
        assert_eq!(report.fidelity_score, 100.0);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn fidelity_missing_h1_costs_20_points() {
        let report = check_fidelity("## Sección\n\nTexto.");
        assert_eq!(report.fidelity_score, 80.0);
        assert_eq!(report.warnings, vec!["has_h1".to_string()]);
    }

    #[test]
    fn fidelity_flags_hierarchy_jumps() {
        let report = check_fidelity("# Título\n\n### Salto directo a H3");
        assert!(!report.checks.valid_hierarchy);
        assert!(report.warnings.contains(&"valid_hierarchy".to_string()));
    }

    #[test]
    fn fidelity_flags_sloppy_spacing() {
        let report = check_fidelity("# Título\n\n\n\nTexto.");
        assert!(!report.checks.proper_spacing);
    }

    #[test]
    fn fidelity_first_heading_may_be_any_level() {
        assert!(has_valid_hierarchy("### Empieza en H3\n\n#### Baja un nivel"));
        assert!(!has_valid_hierarchy("### Empieza en H3\n\n##### Salta dos"));
    }

    #[test]
    fn side_report_carries_validation_and_first_changes() {
        let report = normalize(THESIS_SAMPLE);
        let side = report.side_report();
        assert!(side["validation"]["fidelity_score"].is_number());
        assert_eq!(side["changes_count"], json!(report.changes.len()));
        assert!(side["changes"].as_array().unwrap().len() <= 20);
    }

    #[test]
    fn change_serialization_matches_report_format() {
        let change = NormalizeChange::HeadingLevelChange {
            line: 7,
            from_level: "H2".into(),
            to_level: "H4".into(),
            text: "1.2.1 Problema general".into(),
            reason: "semantic_depth_mapping".into(),
        };
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["type"], "heading_level_change");
        assert_eq!(value["from"], "H2");
        assert_eq!(value["to"], "H4");
        assert_eq!(value["line"], 7);
    }
}
