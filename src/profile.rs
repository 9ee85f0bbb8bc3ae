//! Conversion profiles and automatic profile detection.
//!
//! A profile is a named parameter bundle for a recurring document family —
//! a university's thesis format, IEEE engineering papers, legal texts. The
//! pipeline uses two of its knobs directly (OCR languages, the fidelity
//! threshold below which a conversion gets flagged); the rest describe the
//! family for reports and the tracker's `profile_used` column.
//!
//! Profiles live in code. [`detect_profile`] samples the text of the first
//! pages and scores three pattern tables:
//!
//! 1. **Institution** — university names and acronyms. A hit that maps to
//!    an institution-specific profile short-circuits the whole detection.
//! 2. **Citation style** — APA `(2024).` / `et al.`, Vancouver–IEEE
//!    bracketed `[12]` references, `vol.`/`pp.` front matter.
//! 3. **Document type** — thesis formulas ("tesis para optar…"), paper
//!    section names, book chapters, legal articles.
//!
//! Confidence is additive: institution 0.4, citation style 0.3, document
//! type 0.3, capped at 1.0. A document matching nothing falls back to
//! [`academic_apa`](BUILTIN_PROFILES) with confidence 0.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::pipeline::extract::TextExtraction;

/// Pages sampled in quick mode.
const QUICK_SAMPLE_PAGES: usize = 3;
/// Pages sampled in thorough mode.
const FULL_SAMPLE_PAGES: usize = 10;

/// A named conversion parameter bundle.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConversionProfile {
    pub name: &'static str,
    pub description: &'static str,
    /// Document family: `thesis`, `paper`, `book`, `legal`.
    pub document_type: &'static str,
    pub citation_style: &'static str,
    /// Dominant heading numbering: `decimal`, `roman`, `keyword`.
    pub heading_style: &'static str,
    /// Languages handed to the OCR backend, most likely first.
    pub ocr_languages: &'static [&'static str],
    /// Fidelity score (0–100) under which the conversion gets a
    /// `low_fidelity` note.
    pub fidelity_threshold: f32,
}

/// The built-in profile set. First entry is the fallback default.
pub const BUILTIN_PROFILES: &[ConversionProfile] = &[
    ConversionProfile {
        name: "academic_apa",
        description: "Tesis y papers académicos con citación APA",
        document_type: "thesis",
        citation_style: "apa",
        heading_style: "decimal",
        ocr_languages: &["es", "en"],
        fidelity_threshold: 70.0,
    },
    ConversionProfile {
        name: "medical_vancouver",
        description: "Documentos de ciencias de la salud con citación Vancouver",
        document_type: "thesis",
        citation_style: "vancouver",
        heading_style: "decimal",
        ocr_languages: &["es", "en"],
        fidelity_threshold: 70.0,
    },
    ConversionProfile {
        name: "engineering_ieee",
        description: "Papers y tesis de ingeniería con citación IEEE",
        document_type: "paper",
        citation_style: "ieee",
        heading_style: "decimal",
        ocr_languages: &["en", "es"],
        fidelity_threshold: 75.0,
    },
    ConversionProfile {
        name: "book_chapters",
        description: "Libros organizados en capítulos y partes",
        document_type: "book",
        citation_style: "chicago",
        heading_style: "keyword",
        ocr_languages: &["es", "en"],
        fidelity_threshold: 65.0,
    },
    ConversionProfile {
        name: "legal_documents",
        description: "Textos legales con artículos e incisos numerados",
        document_type: "legal",
        citation_style: "iso",
        heading_style: "keyword",
        ocr_languages: &["es"],
        fidelity_threshold: 80.0,
    },
];

/// Look up a built-in profile by name.
pub fn find_profile(name: &str) -> Option<&'static ConversionProfile> {
    BUILTIN_PROFILES.iter().find(|p| p.name == name)
}

/// The fallback profile (`academic_apa`).
pub fn default_profile() -> &'static ConversionProfile {
    &BUILTIN_PROFILES[0]
}

/// What [`detect_profile`] concluded and from which signals.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileDetection {
    /// Name of the recommended built-in profile.
    pub profile: &'static str,
    /// 0.0 (nothing matched) to 1.0.
    pub confidence: f32,
    pub institution: Option<&'static str>,
    pub citation_style: Option<&'static str>,
    pub document_type: Option<&'static str>,
    /// Pages whose text actually contributed to the sample.
    pub analyzed_pages: usize,
}

impl ProfileDetection {
    fn fallback() -> Self {
        Self {
            profile: default_profile().name,
            confidence: 0.0,
            institution: None,
            citation_style: None,
            document_type: None,
            analyzed_pages: 0,
        }
    }
}

// ── Pattern tables ────────────────────────────────────────────────────────
//
// Declaration order is priority order: the first institution that matches
// wins, and ties between citation styles or document types resolve to the
// earlier entry. Acronyms carry \b so that e.g. "interrupted" does not
// match "upt".

static INSTITUTION_PATTERNS: Lazy<Vec<(&'static str, Vec<Regex>)>> = Lazy::new(|| {
    compile_table(&[
        (
            "universidad_de_chile",
            &[
                r"(?i)universidad\s+de\s+chile",
                r"(?i)\buchile\b",
                r"(?i)u\.\s*de\s*chile",
            ],
        ),
        (
            "universidad_catolica",
            &[
                r"(?i)pontificia\s+universidad\s+cat[oó]lica",
                r"(?i)\buc\s+chile\b",
                r"(?i)\bpuc\b",
            ],
        ),
        (
            "universidad_santiago",
            &[r"(?i)universidad\s+de\s+santiago", r"(?i)\busach\b"],
        ),
        (
            "universidad_tacna",
            &[
                r"(?i)universidad\s+(?:privada\s+)?de\s+tacna",
                r"(?i)\bupt\b",
            ],
        ),
        (
            "universidad_generica",
            &[
                r"(?i)universidad\s+\w+",
                r"(?i)facultad\s+de",
                r"(?i)escuela\s+profesional",
            ],
        ),
    ])
});

static CITATION_PATTERNS: Lazy<Vec<(&'static str, Vec<Regex>)>> = Lazy::new(|| {
    compile_table(&[
        (
            "apa",
            &[r"\(\d{4}\)\.", r"(?i)et\s+al\.", r"(?i)Retrieved\s+from"],
        ),
        ("vancouver", &[r"\[\d+\]", r"(?i)Available\s+from:"]),
        (
            "ieee",
            &[r"\[\d+\]", r"(?i)vol\.", r"(?i)no\.", r"(?i)pp\."],
        ),
    ])
});

static STRUCTURE_PATTERNS: Lazy<Vec<(&'static str, Vec<Regex>)>> = Lazy::new(|| {
    compile_table(&[
        (
            "thesis",
            &[
                r"(?i)tesis\s+para\s+optar",
                r"(?i)para\s+optar(?:\s+(?:el|al))?\s+t[ií]tulo",
                r"(?i)memoria\s+para\s+optar",
                r"(?i)thesis\s+submitted",
                r"(?i)cap[ií]tulo\s+[IVX]+",
                r"(?i)\btesis\b",
                r"(?i)escuela\s+profesional",
                r"(?i)facultad\s+de\s+ingenier[ií]a",
            ],
        ),
        (
            "paper",
            &[
                r"(?i)\babstract\b",
                r"(?i)keywords:",
                r"(?i)\bintroduction\b",
                r"(?i)\bmethodology\b",
                r"(?i)\bresults\b",
                r"(?i)\bdiscussion\b",
            ],
        ),
        (
            "book",
            &[
                r"(?i)cap[ií]tulo\s+\d+",
                r"(?i)chapter\s+\d+",
                r"(?i)parte\s+[IVX]+",
                r"(?i)secci[oó]n\s+\d+",
            ],
        ),
        (
            "legal",
            &[
                r"(?i)art[ií]culo\s+\d+",
                r"(?i)inciso\s+\d+",
                r"(?i)p[aá]rrafo\s+\d+",
                r"(?i)ley\s+n[º°]",
            ],
        ),
    ])
});

fn compile_table(table: &[(&'static str, &[&str])]) -> Vec<(&'static str, Vec<Regex>)> {
    table
        .iter()
        .map(|(key, patterns)| {
            let compiled = patterns
                .iter()
                .map(|p| Regex::new(p).unwrap())
                .collect::<Vec<_>>();
            (*key, compiled)
        })
        .collect()
}

// ── Detection ─────────────────────────────────────────────────────────────

/// Recommend a profile for a document by sampling its first pages.
///
/// `quick` samples 3 pages, otherwise 10 — title page, dedication and
/// abstract carry almost all of the signal, so quick mode is the default.
/// Detection never fails: extraction errors degrade to the default profile
/// with confidence 0.
pub fn detect_profile(extractor: &dyn TextExtraction, quick: bool) -> ProfileDetection {
    let sample_budget = if quick {
        QUICK_SAMPLE_PAGES
    } else {
        FULL_SAMPLE_PAGES
    };

    let total = match extractor.page_count() {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "profile detection could not open the document");
            return ProfileDetection::fallback();
        }
    };

    let mut parts = Vec::new();
    for page in 0..total.min(sample_budget) {
        match extractor.page_text(page) {
            Ok(text) => parts.push(text),
            Err(e) => {
                warn!(page = page + 1, error = %e, "skipping page in profile sample");
            }
        }
    }
    let analyzed_pages = parts.len();
    let sample = parts.join("\n\n");

    let institution = detect_institution(&sample);

    // An institution-specific profile decides on its own. The generic
    // "some university" match is a signal, not an identity, so it never
    // short-circuits.
    if let Some(inst) = institution.filter(|i| *i != "universidad_generica") {
        let candidate = format!("{inst}_thesis");
        if let Some(profile) = find_profile(&candidate) {
            info!(profile = profile.name, "profile detected by institution");
            return ProfileDetection {
                profile: profile.name,
                confidence: 0.9,
                institution,
                citation_style: None,
                document_type: None,
                analyzed_pages,
            };
        }
    }

    let citation_style = detect_citation_style(&sample);
    let document_type = detect_document_type(&sample);
    let profile = select_profile(citation_style, document_type);
    let confidence = detection_confidence(institution, citation_style, document_type);

    info!(
        profile,
        confidence,
        institution = institution.unwrap_or("-"),
        citation = citation_style.unwrap_or("-"),
        doc_type = document_type.unwrap_or("-"),
        "profile detected"
    );

    ProfileDetection {
        profile,
        confidence,
        institution,
        citation_style,
        document_type,
        analyzed_pages,
    }
}

/// First institution whose patterns hit, in table order.
fn detect_institution(text: &str) -> Option<&'static str> {
    for (institution, patterns) in INSTITUTION_PATTERNS.iter() {
        if patterns.iter().any(|re| re.is_match(text)) {
            debug!(institution, "institution pattern matched");
            return Some(institution);
        }
    }
    None
}

/// Citation style with the most pattern hits; earlier table entry wins ties.
fn detect_citation_style(text: &str) -> Option<&'static str> {
    best_scoring(&CITATION_PATTERNS, text)
}

/// Document type with the most pattern hits; earlier table entry wins ties.
fn detect_document_type(text: &str) -> Option<&'static str> {
    best_scoring(&STRUCTURE_PATTERNS, text)
}

fn best_scoring(
    table: &[(&'static str, Vec<Regex>)],
    text: &str,
) -> Option<&'static str> {
    let mut scores: BTreeMap<&'static str, usize> = BTreeMap::new();
    for (key, patterns) in table {
        let count: usize = patterns.iter().map(|re| re.find_iter(text).count()).sum();
        if count > 0 {
            scores.insert(key, count);
        }
    }
    if scores.is_empty() {
        return None;
    }
    // Strict > keeps the earlier table entry on equal counts.
    let mut best: Option<(&'static str, usize)> = None;
    for (key, _) in table {
        if let Some(&count) = scores.get(key) {
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((key, count));
            }
        }
    }
    best.map(|(key, count)| {
        debug!(key, count, "pattern table winner");
        key
    })
}

/// Map the detected signals onto a built-in profile name.
///
/// Priority: thesis + citation style pairing, then book/legal families,
/// then citation style alone, then the default.
fn select_profile(
    citation_style: Option<&'static str>,
    document_type: Option<&'static str>,
) -> &'static str {
    if document_type == Some("thesis") {
        return match citation_style {
            Some("vancouver") => "medical_vancouver",
            Some("ieee") => "engineering_ieee",
            _ => "academic_apa",
        };
    }
    if document_type == Some("book") {
        return "book_chapters";
    }
    if document_type == Some("legal") {
        return "legal_documents";
    }
    match citation_style {
        Some("apa") => "academic_apa",
        Some("vancouver") => "medical_vancouver",
        Some("ieee") => "engineering_ieee",
        _ => default_profile().name,
    }
}

fn detection_confidence(
    institution: Option<&'static str>,
    citation_style: Option<&'static str>,
    document_type: Option<&'static str>,
) -> f32 {
    let mut confidence: f32 = 0.0;
    if institution.is_some() {
        confidence += 0.4;
    }
    if citation_style.is_some() {
        confidence += 0.3;
    }
    if document_type.is_some() {
        confidence += 0.3;
    }
    confidence.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PdfmdError;

    struct PageFake {
        pages: Vec<&'static str>,
    }

    impl TextExtraction for PageFake {
        fn page_count(&self) -> Result<usize, PdfmdError> {
            Ok(self.pages.len())
        }
        fn page_text(&self, index: usize) -> Result<String, PdfmdError> {
            Ok(self.pages[index].to_string())
        }
        fn page_words(
            &self,
            _index: usize,
        ) -> Result<Vec<crate::pipeline::extract::WordToken>, PdfmdError> {
            Ok(Vec::new())
        }
        fn page_tables(
            &self,
            _index: usize,
        ) -> Result<Vec<crate::pipeline::extract::RawTable>, PdfmdError> {
            Ok(Vec::new())
        }
    }

    struct BrokenFake;

    impl TextExtraction for BrokenFake {
        fn page_count(&self) -> Result<usize, PdfmdError> {
            Err(PdfmdError::CorruptPdf {
                path: "/x.pdf".into(),
                detail: "bad xref".into(),
            })
        }
        fn page_text(&self, _index: usize) -> Result<String, PdfmdError> {
            unreachable!("page_count already failed")
        }
        fn page_words(
            &self,
            _index: usize,
        ) -> Result<Vec<crate::pipeline::extract::WordToken>, PdfmdError> {
            unreachable!()
        }
        fn page_tables(
            &self,
            _index: usize,
        ) -> Result<Vec<crate::pipeline::extract::RawTable>, PdfmdError> {
            unreachable!()
        }
    }

    #[test]
    fn builtin_lookup() {
        assert!(find_profile("academic_apa").is_some());
        assert!(find_profile("legal_documents").is_some());
        assert!(find_profile("no_such_profile").is_none());
        assert_eq!(default_profile().name, "academic_apa");
    }

    #[test]
    fn builtin_names_are_unique() {
        let mut names: Vec<_> = BUILTIN_PROFILES.iter().map(|p| p.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), BUILTIN_PROFILES.len());
    }

    #[test]
    fn thesis_with_apa_citations() {
        let fake = PageFake {
            pages: vec![
                "UNIVERSIDAD PRIVADA DE TACNA\nFACULTAD DE INGENIERÍA\n\
                 Tesis para optar el título profesional",
                "Según García (2019). el rendimiento mejora, et al. confirman",
                "CAPÍTULO I: EL PROBLEMA",
            ],
        };
        let detection = detect_profile(&fake, true);
        assert_eq!(detection.profile, "academic_apa");
        assert_eq!(detection.institution, Some("universidad_tacna"));
        assert_eq!(detection.citation_style, Some("apa"));
        assert_eq!(detection.document_type, Some("thesis"));
        assert_eq!(detection.analyzed_pages, 3);
        assert!((detection.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn vancouver_thesis_maps_to_medical_profile() {
        let fake = PageFake {
            pages: vec![
                "Tesis para optar el grado de magíster en salud pública",
                "Los resultados [1] y [2] coinciden. Available from: PubMed",
            ],
        };
        let detection = detect_profile(&fake, true);
        assert_eq!(detection.profile, "medical_vancouver");
        assert_eq!(detection.citation_style, Some("vancouver"));
    }

    #[test]
    fn ieee_signals_win_on_count() {
        // vol./no./pp. push IEEE past Vancouver even though both share [n].
        let fake = PageFake {
            pages: vec![
                "IEEE Transactions, vol. 12, no. 4, pp. 33-41 [1] [2]",
                "thesis submitted to the faculty",
            ],
        };
        let detection = detect_profile(&fake, true);
        assert_eq!(detection.citation_style, Some("ieee"));
        assert_eq!(detection.profile, "engineering_ieee");
    }

    #[test]
    fn book_chapters_profile_for_books() {
        let fake = PageFake {
            pages: vec!["Capítulo 1\nCapítulo 2\nCapítulo 3\nParte IV"],
        };
        let detection = detect_profile(&fake, true);
        assert_eq!(detection.document_type, Some("book"));
        assert_eq!(detection.profile, "book_chapters");
    }

    #[test]
    fn legal_documents_profile_for_statutes() {
        let fake = PageFake {
            pages: vec!["Artículo 12, inciso 3. Ley Nº 29733, párrafo 2"],
        };
        let detection = detect_profile(&fake, true);
        assert_eq!(detection.document_type, Some("legal"));
        assert_eq!(detection.profile, "legal_documents");
    }

    #[test]
    fn generic_university_is_not_a_specific_match() {
        // "universidad_generica" has no dedicated profile; detection falls
        // through to the document-type path.
        let fake = PageFake {
            pages: vec!["Universidad Nacional\nFacultad de Medicina\ntesis doctoral"],
        };
        let detection = detect_profile(&fake, true);
        assert_eq!(detection.institution, Some("universidad_generica"));
        assert_eq!(detection.profile, "academic_apa");
        assert!((detection.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn acronyms_require_word_boundaries() {
        let fake = PageFake {
            pages: vec!["The process was interrupted and output corrupted."],
        };
        let detection = detect_profile(&fake, true);
        assert_eq!(detection.institution, None);
    }

    #[test]
    fn quick_mode_samples_three_pages() {
        let mut pages = vec!["pagina sin señal"; 9];
        // Signal hidden on page 4: quick mode must not see it.
        pages.insert(3, "tesis para optar el título");
        let fake = PageFake { pages };

        let quick = detect_profile(&fake, true);
        assert_eq!(quick.document_type, None);
        assert_eq!(quick.analyzed_pages, 3);

        let full = detect_profile(&fake, false);
        assert_eq!(full.document_type, Some("thesis"));
        assert_eq!(full.analyzed_pages, 10);
    }

    #[test]
    fn confidence_accumulates_per_signal_and_clamps() {
        assert_eq!(detection_confidence(None, None, None), 0.0);
        assert!((detection_confidence(Some("u"), None, None) - 0.4).abs() < 1e-6);
        assert!((detection_confidence(None, Some("apa"), Some("thesis")) - 0.6).abs() < 1e-6);
        let full = detection_confidence(Some("u"), Some("apa"), Some("thesis"));
        assert!(full <= 1.0);
        assert!((full - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn empty_document_falls_back_with_zero_confidence() {
        let fake = PageFake { pages: vec![] };
        let detection = detect_profile(&fake, true);
        assert_eq!(detection.profile, "academic_apa");
        assert_eq!(detection.confidence, 0.0);
        assert_eq!(detection.analyzed_pages, 0);
    }

    #[test]
    fn unreadable_document_falls_back() {
        let detection = detect_profile(&BrokenFake, true);
        assert_eq!(detection.profile, "academic_apa");
        assert_eq!(detection.confidence, 0.0);
    }
}
