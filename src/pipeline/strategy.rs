//! Strategy dispatch: one routine per document type.
//!
//! Type detection says what a document *is*; this module decides what to
//! *do* about it and runs the matching routine:
//!
//! - **native** — per-page structure reconstruction over the text layer,
//!   plus table detection. For documents born digital.
//! - **ocr** — hand the whole file to the configured [`OcrConversion`]
//!   backend. For scans with no usable text layer.
//! - **hybrid** — intended for mixed documents (native cover, scanned
//!   body). Currently delegates to the native routine and says so in its
//!   notes; the enum variant keeps the dispatch seam open for a real
//!   region-based implementation.
//!
//! Every routine returns a [`StrategyOutput`] carrying the assembled
//! Markdown plus metadata the tracker records: page count, tables found,
//! and free-form notes about fallbacks taken along the way.

use crate::config::ConversionConfig;
use crate::error::PdfmdError;
use crate::pipeline::extract::{OcrSession, TextExtraction};
use crate::pipeline::structure::reconstruct_page;
use crate::pipeline::table::table_to_markdown;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Conversion routines the dispatcher can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Structured text extraction from the PDF's own text layer.
    Native,
    /// Whole-document OCR through the configured backend.
    Ocr,
    /// Mixed-document handling; currently a native fallback.
    Hybrid,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Native => "native",
            StrategyKind::Ocr => "ocr",
            StrategyKind::Hybrid => "hybrid",
        }
    }

    /// The routine detection recommends for a document type.
    ///
    /// `Unknown` maps to native: when detection cannot tell, trying the
    /// text layer first is cheap and fails loudly if there is nothing
    /// there, whereas OCR on a native document silently produces a worse
    /// version of text we already had.
    pub fn for_type(pdf_type: crate::classify::PdfType) -> StrategyKind {
        match pdf_type {
            crate::classify::PdfType::Native => StrategyKind::Native,
            crate::classify::PdfType::Scanned => StrategyKind::Ocr,
            crate::classify::PdfType::Mixed => StrategyKind::Hybrid,
            crate::classify::PdfType::Unknown => StrategyKind::Native,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = PdfmdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(StrategyKind::Native),
            "ocr" => Ok(StrategyKind::Ocr),
            "hybrid" => Ok(StrategyKind::Hybrid),
            other => Err(PdfmdError::InvalidConfig(format!(
                "unknown strategy '{}' (expected native, ocr or hybrid)",
                other
            ))),
        }
    }
}

/// What a routine produced for one document.
#[derive(Debug, Clone)]
pub struct StrategyOutput {
    /// Assembled Markdown, pages joined by the configured separator.
    pub markdown: String,
    /// The routine that actually ran. A hybrid dispatch reports `Native`
    /// here because that is what produced the output.
    pub strategy: StrategyKind,
    /// Pages in the document (not pages that produced text).
    pub pages: usize,
    /// Tables rendered into the output.
    pub tables_extracted: usize,
    /// Fallbacks and oddities worth recording, keyed for the tracker's
    /// notes column (`hybrid_native_fallback`, `ocr_raw_text_fallback`,
    /// `images_extracted`).
    pub notes: Map<String, Value>,
}

/// Run the routine for `kind` and return its output.
///
/// Errors propagate untouched so callers keep the precise failure
/// (password, corruption, missing backend); the conversion layer tags them
/// with the attempted strategy when recording them.
pub fn dispatch(
    kind: StrategyKind,
    extractor: &dyn TextExtraction,
    pdf_path: &Path,
    config: &ConversionConfig,
) -> Result<StrategyOutput, PdfmdError> {
    match kind {
        StrategyKind::Native => run_native(extractor, config),
        StrategyKind::Ocr => run_ocr(pdf_path, config),
        StrategyKind::Hybrid => {
            warn!("hybrid routine not yet implemented; using native extraction");
            let mut output = run_native(extractor, config)?;
            output.notes.insert("hybrid_native_fallback".into(), json!(true));
            Ok(output)
        }
    }
}

// ── Native routine ───────────────────────────────────────────────────────

/// Reconstruct every page from the text layer and detected tables.
///
/// Pages that yield no text and no tables are skipped; the page separator
/// only appears between pages that contributed output. Fails with
/// [`PdfmdError::StrategyFailed`] when the whole document yields nothing,
/// which is the usual outcome of forcing `native` on a scan.
pub fn run_native(
    extractor: &dyn TextExtraction,
    config: &ConversionConfig,
) -> Result<StrategyOutput, PdfmdError> {
    let total = extractor.page_count()?;
    if let Some(obs) = &config.progress {
        obs.on_conversion_start("native", total);
    }

    let mut parts: Vec<(usize, String)> = Vec::with_capacity(total);
    let mut tables_extracted = 0usize;

    for index in 0..total {
        let words = extractor.page_words(index)?;
        let plain = extractor.page_text(index)?;
        let fragment = reconstruct_page(&words, &plain, &config.reconstructor);

        let mut page_md = fragment.markdown;
        for table in extractor.page_tables(index)? {
            let table_md = table_to_markdown(&table);
            if table_md.is_empty() {
                continue;
            }
            if !page_md.is_empty() {
                page_md.push_str("\n\n");
            }
            page_md.push_str(&table_md);
            tables_extracted += 1;
        }

        if !page_md.trim().is_empty() {
            parts.push((index + 1, page_md));
        } else {
            debug!(page = index + 1, "page produced no text; skipped");
        }

        if let Some(obs) = &config.progress {
            obs.on_page_complete(index + 1, total);
        }
    }

    let markdown = assemble(&parts, config);
    if markdown.trim().is_empty() {
        return Err(PdfmdError::StrategyFailed {
            strategy: "native".into(),
            detail: "no extractable text on any page".into(),
        });
    }

    info!(
        pages = total,
        with_text = parts.len(),
        tables = tables_extracted,
        "native extraction complete"
    );

    Ok(StrategyOutput {
        markdown,
        strategy: StrategyKind::Native,
        pages: total,
        tables_extracted,
        notes: Map::new(),
    })
}

/// Join page fragments with the configured separator.
fn assemble(parts: &[(usize, String)], config: &ConversionConfig) -> String {
    let mut out = String::new();
    for (i, (page_num, markdown)) in parts.iter().enumerate() {
        if i > 0 {
            out.push_str(&config.page_separator.render(*page_num));
        }
        out.push_str(markdown);
    }
    out
}

// ── OCR routine ──────────────────────────────────────────────────────────

/// Hand the document to the OCR backend and pick the best of what it
/// returns: Markdown when present, raw text with a recorded fallback note
/// otherwise.
pub fn run_ocr(pdf_path: &Path, config: &ConversionConfig) -> Result<StrategyOutput, PdfmdError> {
    let backend = config.ocr.as_ref().ok_or(PdfmdError::OcrUnavailable)?;
    if let Some(obs) = &config.progress {
        // Page count not known until the backend reports back.
        obs.on_conversion_start("ocr", 0);
    }

    let session = OcrSession {
        languages: config.ocr_languages.clone(),
    };
    let output = backend.convert_document(pdf_path, &session)?;

    let mut notes = Map::new();
    if output.images_extracted > 0 {
        notes.insert("images_extracted".into(), json!(output.images_extracted));
    }

    let markdown = match (output.markdown, output.raw_text) {
        (Some(md), _) if !md.trim().is_empty() => md,
        (_, Some(raw)) if !raw.trim().is_empty() => {
            warn!("OCR backend produced no Markdown; falling back to raw text");
            notes.insert("ocr_raw_text_fallback".into(), json!(true));
            raw
        }
        _ => {
            return Err(PdfmdError::EmptyOcrOutput {
                detail: "backend returned neither markdown nor raw text".into(),
            })
        }
    };

    info!(
        pages = output.pages,
        images = output.images_extracted,
        "ocr conversion complete"
    );

    Ok(StrategyOutput {
        markdown,
        strategy: StrategyKind::Ocr,
        pages: output.pages,
        tables_extracted: 0,
        notes,
    })
}
