//! Heading semantics: numbering patterns, detection, and the hierarchy map.
//!
//! ## The value-space trick
//!
//! Academic documents number their headings in several schemes, often more
//! than one per document: decimal (`1.2.3`), appendix letters (`A.1`),
//! roman chapters (`III.`), and keyword forms (`Capítulo II`, `Apéndice B`).
//! To compare depths across schemes, every numbering is parsed into a
//! vector of integers in a partitioned value space:
//!
//! - decimal components keep their value: `1.2.3` → `[1, 2, 3]`
//! - letters map to 100 + index: `A.1` → `[100, 1]`
//! - roman numerals map to 200 + value: `III` → `[203]`
//!
//! The offsets both avoid collisions (chapter `I` is not section `1`) and
//! let the hierarchy analysis tell which family dominates a document: a
//! maximum first value of 200+ means roman chapters, which deserve H1.
//!
//! ## Rule order
//!
//! Decimal is tried first, then single letters, then romans, then keyword
//! forms. Letter-before-roman is deliberate: a lone `I.` reads as an
//! appendix-style letter heading (`[108]`), while multi-letter `III.` can
//! only be roman. Documents that mix bare roman chapter numbers with
//! lettered appendices are rare; ones that use `A.`/`B.`/`I.` sequences
//! are not.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

/// Letters occupy 100..=125 in the semantic value space.
pub const LETTER_BASE: u32 = 100;
/// Roman numerals occupy 201..=300.
pub const ROMAN_BASE: u32 = 200;

/// Numbering parsed from a heading: semantic level vector plus the prefix
/// text it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticNumbering {
    /// One component per depth, in the partitioned value space.
    pub levels: Vec<u32>,
    /// The numbering as written: `"1.2.3"`, `"A.1"`, `"III"`, `"2"`.
    pub numbering: String,
}

impl SemanticNumbering {
    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

/// One heading found in the document, explicit (`## ...`) or inferred.
#[derive(Debug, Clone)]
pub struct HeadingRecord {
    /// Line index in the cleaned document.
    pub line: usize,
    /// Heading text without the `#` prefix; raw line for inferred headings.
    pub text: String,
    /// Markdown level as written; 2 for inferred headings.
    pub original_level: u8,
    /// Parsed numbering, when the text starts with one.
    pub semantic: Option<SemanticNumbering>,
    /// Whether the line carried a `#` prefix.
    pub explicit: bool,
    /// Detection confidence: 0.95 explicit, 0.70 inferred.
    pub confidence: f32,
}

// ── Numbering extraction ─────────────────────────────────────────────────

static RE_DECIMAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+(?:\.\d+)*)[.\s:]+").unwrap());
static RE_LETTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z])(?:\.(\d+(?:\.\d+)*))?[.\s:]+").unwrap());
static RE_ROMAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([IVXLCDMivxlcdm]+)[.\s:]+").unwrap());

/// What a keyword rule's captured value means.
enum KeywordKind {
    /// Digits, taken verbatim.
    Verbatim,
    /// Roman numeral, mapped to `ROMAN_BASE + value`.
    Roman,
    /// Single capital letter, mapped to `LETTER_BASE + index`.
    Letter,
}

static KEYWORD_RULES: Lazy<Vec<(Regex, KeywordKind)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"^(?:Capítulo|Chapter|CAPÍTULO|CHAPTER)\s+(\d+)").unwrap(),
            KeywordKind::Verbatim,
        ),
        (
            Regex::new(r"^(?:Capítulo|Chapter|CAPÍTULO|CHAPTER)\s+([IVX]+)").unwrap(),
            KeywordKind::Roman,
        ),
        (
            Regex::new(r"^(?:Parte|Part|PARTE|PART)\s+(\d+)").unwrap(),
            KeywordKind::Verbatim,
        ),
        (
            Regex::new(r"^(?:Parte|Part|PARTE|PART)\s+([IVX]+)").unwrap(),
            KeywordKind::Roman,
        ),
        (
            Regex::new(r"^(?:Sección|Seccion|Section|SECCIÓN|SECCION|SECTION)\s+(\d+)").unwrap(),
            KeywordKind::Verbatim,
        ),
        (
            Regex::new(r"^(?:Sección|Seccion|Section|SECCIÓN|SECCION|SECTION)\s+([A-Z])\b")
                .unwrap(),
            KeywordKind::Letter,
        ),
        (
            Regex::new(r"^(?:Apéndice|Apendice|Appendix|APÉNDICE|APENDICE|APPENDIX)\s+([A-Z])\b")
                .unwrap(),
            KeywordKind::Letter,
        ),
        (
            Regex::new(r"^(?:Anexo|Annex|ANEXO|ANNEX)\s+(\d+)").unwrap(),
            KeywordKind::Verbatim,
        ),
    ]
});

/// Parse the numbering prefix of a heading, if it has one.
pub fn semantic_numbering(text: &str) -> Option<SemanticNumbering> {
    if let Some(caps) = RE_DECIMAL.captures(text) {
        let numbering = caps[1].to_string();
        let levels = numbering.split('.').map(str::parse).collect::<Result<_, _>>();
        if let Ok(levels) = levels {
            return Some(SemanticNumbering { levels, numbering });
        }
    }

    if let Some(caps) = RE_LETTER.captures(text) {
        let letter = caps[1].chars().next()?;
        let mut levels = vec![LETTER_BASE + (letter as u32 - 'A' as u32)];
        let mut numbering = letter.to_string();
        if let Some(tail) = caps.get(2) {
            let parsed: Result<Vec<u32>, _> = tail.as_str().split('.').map(str::parse).collect();
            if let Ok(parsed) = parsed {
                numbering.push('.');
                numbering.push_str(tail.as_str());
                levels.extend(parsed);
                return Some(SemanticNumbering { levels, numbering });
            }
        }
        return Some(SemanticNumbering { levels, numbering });
    }

    if let Some(caps) = RE_ROMAN.captures(text) {
        let numbering = caps[1].to_string();
        if let Some(value) = roman_to_u32(&numbering) {
            return Some(SemanticNumbering {
                levels: vec![ROMAN_BASE + value],
                numbering: numbering.to_uppercase(),
            });
        }
    }

    for (pattern, kind) in KEYWORD_RULES.iter() {
        let Some(caps) = pattern.captures(text) else {
            continue;
        };
        let value = &caps[1];
        let level = match kind {
            KeywordKind::Verbatim => value.parse::<u32>().ok(),
            KeywordKind::Roman => roman_to_u32(value).map(|v| ROMAN_BASE + v),
            KeywordKind::Letter => value
                .chars()
                .next()
                .map(|c| LETTER_BASE + (c as u32 - 'A' as u32)),
        };
        if let Some(level) = level {
            return Some(SemanticNumbering {
                levels: vec![level],
                numbering: value.to_string(),
            });
        }
    }

    None
}

/// Parse a roman numeral, subtractive forms included.
///
/// Values outside 1..=100 are rejected: a "roman numeral" of 3000 is a
/// word that happens to use only the letters M, C and X, not a chapter
/// number.
pub fn roman_to_u32(roman: &str) -> Option<u32> {
    let mut total: i64 = 0;
    let mut prev: i64 = 0;
    for c in roman.to_uppercase().chars().rev() {
        let value: i64 = match c {
            'I' => 1,
            'V' => 5,
            'X' => 10,
            'L' => 50,
            'C' => 100,
            'D' => 500,
            'M' => 1000,
            _ => return None,
        };
        if value < prev {
            total -= value;
        } else {
            total += value;
        }
        prev = value;
    }
    if (1..=100).contains(&total) {
        Some(total as u32)
    } else {
        None
    }
}

// ── Heading detection ────────────────────────────────────────────────────

static RE_MD_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#+)\s+(.+)$").unwrap());
static RE_CAP_THEN_LOWER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]\s+[a-z]").unwrap());

/// Find headings, explicit and inferred, keyed by line index.
///
/// Two filters keep prose out:
///
/// - An explicit `#` line is dropped when it reads like a paragraph:
///   over 100 characters, a dedication ("A Dios y a la virgencita…"),
///   or ending in sentence punctuation. Extractors routinely promote
///   dedication pages to headings because they are typeset large.
/// - An ALL-CAPS plain line is only promoted when it is plausibly short
///   (10–150 characters) and not a dedication.
pub fn detect_headings(lines: &[&str]) -> BTreeMap<usize, HeadingRecord> {
    let mut found = BTreeMap::new();

    for (line_num, line) in lines.iter().enumerate() {
        if let Some(caps) = RE_MD_HEADING.captures(line) {
            let level = caps[1].len() as u8;
            let text = caps[2].trim().to_string();

            let paragraph_like = text.chars().count() > 100
                || (text.starts_with("A ")
                    && !text.chars().nth(2).map_or(false, char::is_uppercase))
                || text.ends_with('.')
                || text.ends_with(',');
            if paragraph_like {
                continue;
            }

            found.insert(
                line_num,
                HeadingRecord {
                    line: line_num,
                    semantic: semantic_numbering(&text),
                    text,
                    original_level: level,
                    explicit: true,
                    confidence: 0.95,
                },
            );
        } else if !line.trim().is_empty()
            && is_all_caps(line)
            && (10..=150).contains(&line.chars().count())
            && !line.starts_with("A ")
            && !RE_CAP_THEN_LOWER.is_match(line)
        {
            found.insert(
                line_num,
                HeadingRecord {
                    line: line_num,
                    text: line.to_string(),
                    original_level: 2,
                    semantic: None,
                    explicit: false,
                    confidence: 0.70,
                },
            );
        }
    }

    found
}

/// At least one uppercase letter and no lowercase ones.
fn is_all_caps(line: &str) -> bool {
    line.chars().any(char::is_uppercase) && !line.chars().any(char::is_lowercase)
}

// ── Hierarchy analysis ───────────────────────────────────────────────────

/// Mapping from numbering depth to Markdown heading level.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HierarchyMap {
    /// Level assigned to the shallowest numbering depth.
    pub base_level: u8,
    /// Level per depth, ascending, capped at 6.
    pub by_depth: BTreeMap<usize, u8>,
}

impl HierarchyMap {
    /// Derive the depth→level mapping from the detected headings.
    ///
    /// The base level comes from two signals. An existing unnumbered H1
    /// (a document title) pushes all numbered headings to H2 and below;
    /// numbered H1s do not count, since the mapping re-levels them and a
    /// second pass over its own output must land on the same base.
    /// Otherwise the dominant numbering family decides: roman chapter
    /// numbers (200+) earn H1, while letter and decimal schemes start at
    /// H2, leaving H1 free for the title.
    pub fn build(records: &BTreeMap<usize, HeadingRecord>) -> Self {
        let has_h1 = records
            .values()
            .any(|r| r.original_level == 1 && r.semantic.is_none());

        let mut depths: BTreeMap<usize, Vec<u32>> = BTreeMap::new();
        for record in records.values() {
            if let Some(numbering) = &record.semantic {
                depths
                    .entry(numbering.depth())
                    .or_default()
                    .push(numbering.levels[0]);
            }
        }
        if depths.is_empty() {
            return HierarchyMap::default();
        }

        let max_first = depths
            .values()
            .flatten()
            .copied()
            .max()
            .unwrap_or(0);
        let base_level: u8 = if has_h1 {
            2
        } else if max_first >= ROMAN_BASE {
            1
        } else {
            2
        };

        let by_depth = depths
            .keys()
            .enumerate()
            .map(|(i, &depth)| (depth, (base_level + i as u8).min(6)))
            .collect();

        HierarchyMap {
            base_level,
            by_depth,
        }
    }

    /// Level for a numbering depth; unseen depths fall back to depth+1.
    pub fn level_for(&self, depth: usize) -> u8 {
        self.by_depth
            .get(&depth)
            .copied()
            .unwrap_or(((depth + 1).min(6)) as u8)
    }

    pub fn contains(&self, depth: usize) -> bool {
        self.by_depth.contains_key(&depth)
    }

    pub fn is_empty(&self) -> bool {
        self.by_depth.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(text: &str) -> Option<Vec<u32>> {
        semantic_numbering(text).map(|n| n.levels)
    }

    #[test]
    fn decimal_numbering() {
        assert_eq!(levels("1.2.3 Problema general"), Some(vec![1, 2, 3]));
        assert_eq!(levels("1. Introducción"), Some(vec![1]));
        assert_eq!(levels("2.10 Antecedentes"), Some(vec![2, 10]));
    }

    #[test]
    fn decimal_requires_terminator() {
        // A bare number with nothing after it is a page number, not a heading.
        assert_eq!(levels("42"), None);
    }

    #[test]
    fn letter_numbering_uses_offset_100() {
        assert_eq!(levels("A. Matriz de consistencia"), Some(vec![100]));
        assert_eq!(levels("B.2 Instrumentos"), Some(vec![101, 2]));
        assert_eq!(levels("A.1.3 Detalle"), Some(vec![100, 1, 3]));
    }

    #[test]
    fn single_roman_letter_reads_as_letter() {
        // "I." alone matches the letter rule before the roman rule.
        assert_eq!(levels("I. Introducción"), Some(vec![108]));
    }

    #[test]
    fn multi_letter_roman_uses_offset_200() {
        assert_eq!(levels("III. Metodología"), Some(vec![203]));
        assert_eq!(levels("IV: Resultados"), Some(vec![204]));
        assert_eq!(levels("XII. Conclusiones"), Some(vec![212]));
    }

    #[test]
    fn roman_numbering_preserves_prefix_text() {
        let n = semantic_numbering("III. Metodología").unwrap();
        assert_eq!(n.numbering, "III");
    }

    #[test]
    fn keyword_numbering() {
        assert_eq!(levels("Capítulo 2: Marco teórico"), Some(vec![2]));
        assert_eq!(levels("CAPÍTULO I: EL PROBLEMA"), Some(vec![201]));
        assert_eq!(levels("Chapter 5"), Some(vec![5]));
        assert_eq!(levels("Parte II"), Some(vec![202]));
        assert_eq!(levels("Apéndice B"), Some(vec![101]));
        assert_eq!(levels("Appendix C: Raw data"), Some(vec![102]));
        assert_eq!(levels("Anexo 3"), Some(vec![3]));
        assert_eq!(levels("Sección 4"), Some(vec![4]));
    }

    #[test]
    fn unnumbered_text_has_no_semantic_level() {
        assert_eq!(levels("Resumen"), None);
        assert_eq!(levels("Agradecimientos"), None);
    }

    #[test]
    fn roman_parser_accepts_subtractive_and_sloppy_forms() {
        assert_eq!(roman_to_u32("IV"), Some(4));
        assert_eq!(roman_to_u32("IX"), Some(9));
        assert_eq!(roman_to_u32("XL"), Some(40));
        assert_eq!(roman_to_u32("IIII"), Some(4));
        assert_eq!(roman_to_u32("xii"), Some(12));
    }

    #[test]
    fn roman_parser_rejects_out_of_range_and_junk() {
        assert_eq!(roman_to_u32("MMM"), None);
        assert_eq!(roman_to_u32("ABC"), None);
        assert_eq!(roman_to_u32(""), None);
    }

    #[test]
    fn detects_explicit_headings_with_numbering() {
        let lines = vec!["## 1.2 Antecedentes", "", "Texto normal."];
        let found = detect_headings(&lines);
        assert_eq!(found.len(), 1);
        let record = &found[&0];
        assert_eq!(record.original_level, 2);
        assert!(record.explicit);
        assert_eq!(record.semantic.as_ref().unwrap().levels, vec![1, 2]);
        assert!((record.confidence - 0.95).abs() < f32::EPSILON);
    }

    #[test]
    fn dedication_heading_is_not_a_heading() {
        let lines = vec![
            "## A Dios y a la virgencita por permitirme llegar hasta aquí.",
            "## A mis padres",
        ];
        let found = detect_headings(&lines);
        assert!(found.is_empty());
    }

    #[test]
    fn long_or_punctuated_headings_are_paragraphs() {
        let long = format!("## {}", "palabra ".repeat(20));
        let lines = vec![long.as_str(), "## Esto termina con punto.", "## Esto, con coma,"];
        let found = detect_headings(&lines);
        assert!(found.is_empty());
    }

    #[test]
    fn all_caps_line_becomes_inferred_heading() {
        let lines = vec!["FACULTAD DE INGENIERÍA", "texto normal en minúsculas"];
        let found = detect_headings(&lines);
        let record = &found[&0];
        assert!(!record.explicit);
        assert_eq!(record.original_level, 2);
        assert!((record.confidence - 0.70).abs() < f32::EPSILON);
    }

    #[test]
    fn short_or_dedication_caps_lines_are_ignored() {
        let lines = vec![
            "OK",                     // under 10 chars
            "A DIOS POR TODO LO QUE", // dedication prefix
            "Y esto es prosa normal",
        ];
        let found = detect_headings(&lines);
        assert!(found.is_empty());
    }

    #[test]
    fn hierarchy_map_from_decimal_depths() {
        let lines = vec![
            "## 1. El problema",
            "## 1.1 Descripción",
            "## 1.2.1 Problema general",
        ];
        let records = detect_headings(&lines);
        let map = HierarchyMap::build(&records);
        assert_eq!(map.base_level, 2);
        assert_eq!(map.level_for(1), 2);
        assert_eq!(map.level_for(2), 3);
        assert_eq!(map.level_for(3), 4);
    }

    #[test]
    fn roman_chapters_claim_h1() {
        let lines = vec!["## CAPÍTULO I: EL PROBLEMA", "## 1.1 Descripción"];
        let records = detect_headings(&lines);
        let map = HierarchyMap::build(&records);
        assert_eq!(map.base_level, 1);
        assert_eq!(map.level_for(1), 1);
        assert_eq!(map.level_for(2), 2);
    }

    #[test]
    fn existing_h1_pushes_everything_down() {
        let lines = vec!["# Título de la tesis", "## CAPÍTULO I: EL PROBLEMA"];
        let records = detect_headings(&lines);
        let map = HierarchyMap::build(&records);
        assert_eq!(map.base_level, 2);
        assert_eq!(map.level_for(1), 2);
    }

    #[test]
    fn numbered_h1_does_not_read_as_title() {
        // Already-promoted output: chapters sit at H1, no title line.
        let lines = vec!["# CAPÍTULO I: EL PROBLEMA", "## 1.1 Descripción"];
        let records = detect_headings(&lines);
        let map = HierarchyMap::build(&records);
        assert_eq!(map.base_level, 1);
        assert_eq!(map.level_for(1), 1);
        assert_eq!(map.level_for(2), 2);
    }

    #[test]
    fn deep_nesting_caps_at_h6() {
        let lines = vec![
            "## 1 a",
            "## 1.1 b",
            "## 1.1.1 c",
            "## 1.1.1.1 d",
            "## 1.1.1.1.1 e",
            "## 1.1.1.1.1.1 f",
        ];
        let records = detect_headings(&lines);
        let map = HierarchyMap::build(&records);
        assert_eq!(map.level_for(5), 6);
        assert_eq!(map.level_for(6), 6);
    }

    #[test]
    fn unseen_depth_falls_back() {
        let map = HierarchyMap::default();
        assert_eq!(map.level_for(1), 2);
        assert_eq!(map.level_for(3), 4);
        assert_eq!(map.level_for(9), 6);
    }
}
